//! Example walking a configuration through the routing layer
//!
//! Run with: cargo run --package volware-core --example config_demo

use volware_core::domain::config::VolwareConfig;
use volware_core::domain::frame::parse_frame;
use volware_core::domain::router::ChannelRouter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("volware_core=trace,info")
        .init();

    println!("=== VolWare Configuration Demo ===\n");

    println!("1. Creating factory default configuration...");
    let config = VolwareConfig::factory_default();
    println!("   ✓ {} channels on {}", config.channel_apps.len(), config.com_port);

    println!("\n2. Saving and reloading...");
    let config_path = std::env::temp_dir().join("volware_demo_config.toml");
    config.save_to_file(&config_path).await?;
    let loaded = VolwareConfig::load_from_file(&config_path).await?;
    println!("   ✓ Reloaded from {}", config_path.display());

    println!("\n3. Routing a sample line...");
    let router = ChannelRouter::new(&loaded.channel_mapping()?, loaded.router_settings());
    let line = "1023,512,256,0";
    for command in router.route(&parse_frame(line)) {
        for volume in command.volume_commands() {
            println!(
                "   channel {} → {:<14} level {:.3}",
                command.channel, volume.target, volume.level
            );
        }
    }

    tokio::fs::remove_file(&config_path).await?;
    println!("\n=== Demo Complete ===");
    Ok(())
}
