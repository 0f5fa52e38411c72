//! Running blocking libssh2 work from async code.
//!
//! A session that carries a tunnel is non-blocking, so every libssh2 call
//! made on it can report EAGAIN. The `retry_*` helpers repeat such calls
//! until they complete or the deadline passes; on a blocking session they
//! simply run once.

use crate::TransportError;
use std::io::{self, ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

const LIBSSH2_ERROR_EAGAIN: i32 = -37;
const RETRY_BACKOFF: Duration = Duration::from_millis(2);

fn backoff(deadline: Instant) -> Result<(), TransportError> {
    if Instant::now() >= deadline {
        return Err(TransportError::Timeout);
    }
    thread::sleep(RETRY_BACKOFF);
    Ok(())
}

/// Repeat a libssh2 call while it reports EAGAIN
pub(crate) fn retry_ssh<T, F>(deadline: Instant, what: &str, mut call: F) -> Result<T, TransportError>
where
    F: FnMut() -> Result<T, ssh2::Error>,
{
    loop {
        match call() {
            Ok(value) => return Ok(value),
            Err(e) if e.code() == ssh2::ErrorCode::Session(LIBSSH2_ERROR_EAGAIN) => backoff(deadline)?,
            Err(e) => return Err(TransportError::from_ssh(what, e)),
        }
    }
}

/// Read until EOF, waiting out `WouldBlock`
pub(crate) fn read_to_end<R: Read>(reader: &mut R, deadline: Instant) -> Result<Vec<u8>, TransportError> {
    let mut out = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(out),
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => backoff(deadline)?,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
}

/// Copy exactly `len` bytes from `reader` to `writer`
pub(crate) fn copy_exact<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    len: u64,
    deadline: Instant,
) -> Result<u64, TransportError> {
    let mut buf = [0u8; 32 * 1024];
    let mut copied = 0u64;
    while copied < len {
        let want = usize::try_from(len - copied).map_or(buf.len(), |left| left.min(buf.len()));
        match reader.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => {
                write_all(writer, &buf[..n], deadline)?;
                copied += n as u64;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => backoff(deadline)?,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(copied)
}

/// Write the whole buffer, waiting out `WouldBlock`
pub(crate) fn write_all<W: Write>(writer: &mut W, mut data: &[u8], deadline: Instant) -> Result<(), TransportError> {
    while !data.is_empty() {
        match writer.write(data) {
            Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero).into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == ErrorKind::WouldBlock => backoff(deadline)?,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Run `work` on the blocking pool, giving up after `timeout`.
///
/// A timed-out task keeps running until libssh2's own session timeout
/// returns control to it.
pub async fn run_blocking<T, F>(timeout: Duration, what: &str, work: F) -> Result<T, TransportError>
where
    F: FnOnce() -> Result<T, TransportError> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(TransportError::Protocol(format!("{} task failed: {}", what, e))),
        Err(_) => {
            warn!("{} timed out after {}s", what, timeout.as_secs());
            Err(TransportError::Timeout)
        }
    }
}
