use std::io::{self, ErrorKind, Write};
use std::thread;
use std::time::Duration;

use crate::codec::validate_command;
use crate::error::{FrameError, Result};

const MAX_WOULD_BLOCK_RETRIES: u32 = 5;
const WOULD_BLOCK_PAUSE: Duration = Duration::from_millis(2);

/// Write one complete command frame and flush it (blocking).
///
/// `bytes` must be exactly one five-byte frame; anything else is rejected
/// before the stream is touched. A stream that keeps reporting `WouldBlock`
/// fails after a few short pauses.
pub fn write_command<W: Write + ?Sized>(dst: &mut W, bytes: &[u8]) -> Result<()> {
    let frame = validate_command(bytes)?;
    let mut blocked = 0u32;

    let mut offset = 0usize;
    while offset < frame.len() {
        match dst.write(&frame[offset..]) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => wait_writable(&mut blocked, err)?,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }

    loop {
        match dst.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => wait_writable(&mut blocked, err)?,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
}

fn wait_writable(blocked: &mut u32, err: io::Error) -> Result<()> {
    *blocked += 1;
    if *blocked > MAX_WOULD_BLOCK_RETRIES {
        return Err(FrameError::Io(err));
    }
    thread::sleep(WOULD_BLOCK_PAUSE);
    Ok(())
}
