//! Newline framing for the device stream

use bytes::BytesMut;
use std::io;
use tokio_util::codec::Decoder;
use tracing::warn;

/// Longest line accepted from the device, excluding the terminator
pub const MAX_LINE_LENGTH: usize = 1024;

/// Splits the byte stream on `\n`.
///
/// A trailing `\r` is stripped and invalid UTF-8 is replaced rather than
/// rejected. Lines longer than the limit are skipped up to their terminator
/// instead of failing the stream, and a partial line at end of stream is
/// dropped.
#[derive(Debug, Clone)]
pub struct DeviceLineCodec {
    max_length: usize,
    discarding: bool,
}

impl DeviceLineCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            discarding: false,
        }
    }
}

impl Default for DeviceLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.strip_suffix('\r').unwrap_or(&text).to_string()
}

impl Decoder for DeviceLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        loop {
            match buf.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    let line = buf.split_to(end + 1);
                    if std::mem::take(&mut self.discarding) {
                        continue;
                    }
                    if end > self.max_length {
                        warn!(length = end, "Discarding overlong line");
                        continue;
                    }
                    return Ok(Some(decode_line(&line[..end])));
                }
                None => {
                    if buf.len() > self.max_length {
                        if !self.discarding {
                            warn!(length = buf.len(), "Discarding overlong line");
                        }
                        self.discarding = true;
                        buf.clear();
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        let line = self.decode(buf)?;
        if line.is_none() {
            buf.clear();
        }
        Ok(line)
    }
}
