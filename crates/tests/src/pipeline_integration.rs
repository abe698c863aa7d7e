//! Integration tests for the device line → system volume pipeline
//!
//! These tests drive the real parser, router, resolver and sink against the
//! in-memory backend, and run the serial worker over an in-process duplex
//! stream in place of a COM port.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use volware_core::domain::{
    ChannelRouter, FrameDispatcher, LineConsumer, SessionResolver, Target, VolumeSink,
    VolwareConfig,
};
use volware_infra::audio::InMemoryAudioBackend;
use volware_infra::serial::{
    ConnectionManager, ConnectionState, PortOpener, SerialIo, SerialSettings,
};

fn config(toml: &str) -> VolwareConfig {
    VolwareConfig::from_toml_str(toml).unwrap()
}

fn pipeline(config: &VolwareConfig, backend: &InMemoryAudioBackend) -> FrameDispatcher {
    let resolver = SessionResolver::with_ttl(config.session_cache_ttl());
    let sink = Arc::new(VolumeSink::new(Box::new(backend.clone()), resolver));
    let router = ChannelRouter::new(&config.channel_mapping().unwrap(), config.router_settings());
    FrameDispatcher::new(router, sink)
}

fn close(actual: f32, expected: f32) -> bool {
    (actual - expected).abs() < 1e-6
}

// ============================================================================
// LINE → VOLUME
// ============================================================================

#[test]
fn test_half_slider_sets_matching_sessions() {
    let config = config(
        r#"
        com_port = "COM3"
        baud_rate = 9600

        [channel_apps]
        0 = ["music.exe"]
        "#,
    );
    let backend = InMemoryAudioBackend::new();
    let first = backend.add_session(10, "/opt/music/music.exe");
    let second = backend.add_session(11, "/opt/music/Music.EXE");
    let other = backend.add_session(12, "/usr/bin/game.exe");

    pipeline(&config, &backend).on_line("512\r");

    let snapshot = backend.snapshot();
    assert!(close(snapshot.session(first).unwrap().volume, 0.5));
    assert!(close(snapshot.session(second).unwrap().volume, 0.5));
    assert!(close(snapshot.session(other).unwrap().volume, 1.0));
    assert!(close(snapshot.master_volume, 1.0));
}

#[test]
fn test_master_and_apps_on_separate_channels() {
    let config = config(
        r#"
        com_port = "COM3"
        baud_rate = 9600
        invert_slider = true

        [channel_apps]
        0 = ["master"]
        1 = ["chrome.exe", "firefox.exe"]
        "#,
    );
    let backend = InMemoryAudioBackend::new();
    let chrome = backend.add_session(1, "C:/Apps/chrome.exe");
    let firefox = backend.add_session(2, "C:/Apps/firefox.exe");

    pipeline(&config, &backend).on_line("1024, 256, 999");

    let snapshot = backend.snapshot();
    assert!(close(snapshot.master_volume, 0.0));
    assert!(close(snapshot.session(chrome).unwrap().volume, 0.75));
    assert!(close(snapshot.session(firefox).unwrap().volume, 0.75));
}

#[test]
fn test_mute_block_follows_sliders() {
    let config = config(
        r#"
        com_port = "COM3"
        baud_rate = 9600
        mute_buttons = true

        [channel_apps]
        0 = ["master"]
        1 = ["spotify.exe"]
        "#,
    );
    let backend = InMemoryAudioBackend::new();
    let spotify = backend.add_session(5, "/usr/bin/spotify.exe");
    let dispatcher = pipeline(&config, &backend);

    dispatcher.on_line("1024,512,0,1");
    let snapshot = backend.snapshot();
    assert!(!snapshot.master_muted);
    assert!(snapshot.session(spotify).unwrap().muted);

    dispatcher.on_line("1024,512,1,0");
    let snapshot = backend.snapshot();
    assert!(snapshot.master_muted);
    assert!(!snapshot.session(spotify).unwrap().muted);

    // No mute block: flags are left alone
    dispatcher.on_line("1024,512");
    assert!(backend.snapshot().master_muted);
}

#[test]
fn test_garbage_line_changes_nothing() {
    let config = config(
        r#"
        com_port = "COM3"
        baud_rate = 9600

        [channel_apps]
        0 = ["master"]
        "#,
    );
    let backend = InMemoryAudioBackend::new();

    pipeline(&config, &backend).on_line("hello, world");

    assert!(close(backend.snapshot().master_volume, 1.0));
}

#[test]
fn test_failing_channel_does_not_block_others() {
    let config = config(
        r#"
        com_port = "COM3"
        baud_rate = 9600

        [channel_apps]
        0 = ["appA.exe", "appB.exe"]
        1 = ["master"]
        "#,
    );
    let backend = InMemoryAudioBackend::new();
    let a = backend.add_session(1, "/bin/appA.exe");
    let b = backend.add_session(2, "/bin/appB.exe");
    backend.set_session_failing(a, true);

    pipeline(&config, &backend).on_line("256,768");

    let snapshot = backend.snapshot();
    // Fail-fast within the channel: appB is never reached
    assert!(close(snapshot.session(b).unwrap().volume, 1.0));
    assert!(close(snapshot.master_volume, 0.75));
}

#[test]
fn test_exited_process_is_skipped() {
    let backend = InMemoryAudioBackend::new();
    let sink = VolumeSink::new(
        Box::new(backend.clone()),
        SessionResolver::with_ttl(Duration::from_secs(30)),
    );
    let target = Target::from_name("player.exe");
    backend.add_session(40, "/bin/player.exe");

    sink.apply_volume(&target, 0.3).unwrap();
    backend.remove_process(40);

    assert!(sink.apply_volume(&target, 0.9).is_ok());
    assert!(backend.snapshot().sessions.is_empty());
}

#[test]
fn test_toggle_mute_round_trip() {
    let backend = InMemoryAudioBackend::new();
    let id = backend.add_session(3, "/bin/voice.exe");
    let sink = VolumeSink::new(
        Box::new(backend.clone()),
        SessionResolver::with_ttl(Duration::from_secs(30)),
    );
    let target = Target::from_name("voice.exe");

    assert!(sink.toggle_mute(&target).unwrap());
    assert!(backend.snapshot().session(id).unwrap().muted);
    assert!(!sink.toggle_mute(&target).unwrap());
    assert!(!backend.snapshot().session(id).unwrap().muted);
}

// ============================================================================
// SERIAL WORKER
// ============================================================================

/// Hands out the host end of a fresh duplex pipe on every open
#[derive(Default)]
struct PipeOpener {
    devices: Mutex<Vec<DuplexStream>>,
    fail: Mutex<bool>,
}

impl PipeOpener {
    fn take_device(&self) -> Option<DuplexStream> {
        self.devices.lock().unwrap().pop()
    }

    fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

impl PortOpener for PipeOpener {
    fn open(&self, _port: &str, _baud_rate: u32) -> io::Result<Box<dyn SerialIo>> {
        if *self.fail.lock().unwrap() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "port missing"));
        }
        let (host, device) = tokio::io::duplex(1024);
        self.devices.lock().unwrap().push(device);
        Ok(Box::new(host))
    }
}

fn fast_settings() -> SerialSettings {
    SerialSettings::new("PIPE", 9600)
        .with_heartbeat_interval(Duration::from_millis(20))
        .with_reconnect_backoff(Duration::from_millis(20))
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn wait_for_device(opener: &PipeOpener) -> DuplexStream {
    let mut device = None;
    wait_until("port open", || {
        device = opener.take_device();
        device.is_some()
    });
    device.unwrap()
}

#[test]
fn test_device_lines_drive_volume() {
    let config = config(
        r#"
        com_port = "PIPE"
        baud_rate = 9600

        [channel_apps]
        0 = ["music.exe"]
        "#,
    );
    let backend = InMemoryAudioBackend::new();
    let id = backend.add_session(10, "/bin/music.exe");
    let opener = Arc::new(PipeOpener::default());
    let mut manager = ConnectionManager::new(
        fast_settings(),
        opener.clone(),
        Arc::new(pipeline(&config, &backend)),
    );

    manager.start().unwrap();
    let mut device = wait_for_device(&opener);
    wait_until("connected", || manager.is_connected());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        device.write_all(b"256\n").await.unwrap();

        let mut heartbeat = [0u8; 1];
        device.read_exact(&mut heartbeat).await.unwrap();
        assert_eq!(&heartbeat, b"s");
    });

    wait_until("volume applied", || {
        close(backend.snapshot().session(id).unwrap().volume, 0.25)
    });

    manager.stop();
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[test]
fn test_reconnects_after_device_unplugged() {
    let opener = Arc::new(PipeOpener::default());
    let lines = Arc::new(Mutex::new(Vec::new()));

    struct Recorder(Arc<Mutex<Vec<String>>>);
    impl LineConsumer for Recorder {
        fn on_line(&self, line: &str) {
            self.0.lock().unwrap().push(line.to_string());
        }
    }

    let mut manager = ConnectionManager::new(
        fast_settings(),
        opener.clone(),
        Arc::new(Recorder(lines.clone())),
    );
    manager.start().unwrap();

    let first = wait_for_device(&opener);
    wait_until("connected", || manager.is_connected());

    // Unplug, and keep the port missing for a few backoff periods
    opener.set_failing(true);
    drop(first);
    wait_until("disconnected", || !manager.is_connected());
    std::thread::sleep(Duration::from_millis(60));
    assert!(!manager.is_connected());

    opener.set_failing(false);
    let mut device = wait_for_device(&opener);
    wait_until("reconnected", || manager.is_connected());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async { device.write_all(b"1,2,3\n").await.unwrap() });

    wait_until("line delivered", || lines.lock().unwrap().len() == 1);
    assert_eq!(lines.lock().unwrap()[0], "1,2,3");

    manager.stop();
    assert!(!manager.is_running());
}

#[test]
fn test_stop_silences_consumer() {
    let opener = Arc::new(PipeOpener::default());
    let count = Arc::new(Mutex::new(0usize));

    struct Counter(Arc<Mutex<usize>>);
    impl LineConsumer for Counter {
        fn on_line(&self, _line: &str) {
            *self.0.lock().unwrap() += 1;
        }
    }

    let mut manager =
        ConnectionManager::new(fast_settings(), opener.clone(), Arc::new(Counter(count.clone())));
    manager.start().unwrap();
    let mut device = wait_for_device(&opener);
    wait_until("connected", || manager.is_connected());

    manager.stop();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    // Port is closed once stop returns
    let result = runtime.block_on(async { device.write_all(b"512\n").await });
    assert!(result.is_err());
    assert_eq!(*count.lock().unwrap(), 0);
}
