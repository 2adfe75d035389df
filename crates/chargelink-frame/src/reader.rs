use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use tracing::warn;

use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 1024;
const READ_CHUNK_SIZE: usize = 256;

/// Default cap on a single unterminated line.
pub const DEFAULT_MAX_LINE_LEN: usize = 4 * 1024;

/// Splits a byte stream into newline-terminated text lines.
///
/// The reader does not own the stream: the port lives behind the link's
/// lock, so callers hand it in for each [`LineReader::fill_from`].
#[derive(Debug)]
pub struct LineReader {
    buf: BytesMut,
    max_line_len: usize,
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

impl LineReader {
    pub fn new() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_line_len,
        }
    }

    /// Read up to `limit` bytes from `src` into the buffer.
    ///
    /// Returns the number of bytes appended. A zero-length read is reported
    /// as [`FrameError::ConnectionClosed`].
    pub fn fill_from<R: Read + ?Sized>(&mut self, src: &mut R, limit: usize) -> Result<usize> {
        let mut total = 0usize;
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        while total < limit {
            let want = (limit - total).min(READ_CHUNK_SIZE);
            let read = match src.read(&mut chunk[..want]) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };
            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }
            self.buf.extend_from_slice(&chunk[..read]);
            total += read;
        }
        self.enforce_line_cap();
        Ok(total)
    }

    /// Pop the next complete, non-blank line with surrounding whitespace removed.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let pos = self.buf.iter().position(|&b| b == b'\n')?;
            let raw = self.buf.split_to(pos + 1);
            let line = String::from_utf8_lossy(&raw[..pos]).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
    }

    /// Whether a complete line is buffered.
    pub fn has_line(&self) -> bool {
        self.buf.contains(&b'\n')
    }

    /// Bytes currently buffered, complete lines or not.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop everything buffered and return how many bytes were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.buf.len();
        self.buf.clear();
        dropped
    }

    fn enforce_line_cap(&mut self) {
        let tail_start = self
            .buf
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |pos| pos + 1);
        let tail_len = self.buf.len() - tail_start;
        if tail_len > self.max_line_len {
            warn!(
                bytes = tail_len,
                max = self.max_line_len,
                "dropping unterminated input"
            );
            self.buf.truncate(tail_start);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn splits_lines() {
        let mut reader = LineReader::new();
        let bytes = b"<STAT;STATE=2;>\r\n<ACK;CMD=AUTH;STATUS=OK;>\n".to_vec();
        let len = bytes.len();
        let n = reader.fill_from(&mut Cursor::new(bytes), len).unwrap();
        assert_eq!(n, len);

        assert_eq!(reader.next_line().as_deref(), Some("<STAT;STATE=2;>"));
        assert_eq!(
            reader.next_line().as_deref(),
            Some("<ACK;CMD=AUTH;STATUS=OK;>")
        );
        assert_eq!(reader.next_line(), None);
    }

    #[test]
    fn keeps_partial_line_until_terminated() {
        let mut reader = LineReader::new();
        reader.fill_from(&mut Cursor::new(b"<STAT;STA".to_vec()), 9).unwrap();
        assert!(!reader.has_line());
        assert_eq!(reader.next_line(), None);

        reader.fill_from(&mut Cursor::new(b"TE=3;>\n".to_vec()), 7).unwrap();
        assert!(reader.has_line());
        assert_eq!(reader.next_line().as_deref(), Some("<STAT;STATE=3;>"));
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn skips_blank_lines() {
        let mut reader = LineReader::new();
        reader.fill_from(&mut Cursor::new(b"\n\r\n  \nX\n".to_vec()), 8).unwrap();
        assert_eq!(reader.next_line().as_deref(), Some("X"));
    }

    #[test]
    fn eof_is_connection_closed() {
        let mut reader = LineReader::new();
        let err = reader
            .fill_from(&mut Cursor::new(Vec::<u8>::new()), 4)
            .unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn oversized_unterminated_input_is_dropped() {
        let mut reader = LineReader::with_max_line_len(8);
        let mut bytes = b"OK\n".to_vec();
        bytes.extend_from_slice(&[b'x'; 32]);
        let len = bytes.len();
        reader.fill_from(&mut Cursor::new(bytes), len).unwrap();

        assert_eq!(reader.buffered(), 3);
        assert_eq!(reader.next_line().as_deref(), Some("OK"));
    }

    #[test]
    fn clear_reports_dropped_bytes() {
        let mut reader = LineReader::new();
        reader.fill_from(&mut Cursor::new(b"A\nB\n".to_vec()), 4).unwrap();
        assert_eq!(reader.clear(), 4);
        assert_eq!(reader.next_line(), None);
    }

    #[test]
    fn read_errors_propagate() {
        struct TimedOut;
        impl Read for TimedOut {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::from(ErrorKind::TimedOut))
            }
        }

        let mut reader = LineReader::new();
        let err = reader.fill_from(&mut TimedOut, 1).unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::TimedOut));
    }
}
