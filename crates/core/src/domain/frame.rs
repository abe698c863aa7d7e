//! Line framing for the controller wire protocol
//!
//! The device sends one line per update: comma-separated decimal integers.
//! There is no escaping and no checksum, so tokens that do not parse are
//! dropped and the rest of the line is still used.

/// One decoded line of controller readings
pub type Frame = Vec<i32>;

/// Parse a complete line into its integer values.
///
/// Whitespace around a token is ignored. Invalid tokens are skipped
/// silently; an empty or all-invalid line yields an empty frame.
pub fn parse_frame(line: &str) -> Frame {
    line.split(',')
        .filter_map(|token| token.trim().parse::<i32>().ok())
        .collect()
}
