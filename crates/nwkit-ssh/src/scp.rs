//! SCP file copy over an established session

use crate::blocking::{copy_exact, retry_ssh};
use crate::TransportError;
use ssh2::{Channel, Session};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;

/// Mode given to uploaded files
pub const UPLOAD_MODE: i32 = 0o644;

/// Remote path for an upload; a trailing `/` means "into this directory"
pub fn remote_upload_path(local: &Path, remote: &str) -> Result<String, TransportError> {
    if !remote.ends_with('/') {
        return Ok(remote.to_string());
    }
    let name = local
        .file_name()
        .ok_or_else(|| TransportError::Configuration(format!("{} has no file name", local.display())))?;
    Ok(format!("{}{}", remote, name.to_string_lossy()))
}

/// Local path for a download; an existing directory receives the remote basename
pub fn local_download_path(remote: &str, local: &Path) -> PathBuf {
    if !local.is_dir() {
        return local.to_path_buf();
    }
    let name = remote.trim_end_matches('/').rsplit('/').next().unwrap_or(remote);
    local.join(name)
}

/// Send a local file; returns the number of bytes copied
pub fn upload(session: &Session, local: &Path, remote: &str, deadline: Instant) -> Result<u64, TransportError> {
    let remote = remote_upload_path(local, remote)?;
    let mut file = File::open(local)?;
    let size = file.metadata()?.len();

    debug!("SCP upload {} -> {} ({} bytes)", local.display(), remote, size);

    let what = format!("scp to {}", remote);
    let mut channel = retry_ssh(deadline, &what, || {
        session.scp_send(Path::new(&remote), UPLOAD_MODE, size, None)
    })?;

    let copied = copy_exact(&mut file, &mut channel, size, deadline)?;
    finish(&mut channel, &what, deadline)?;

    Ok(copied)
}

/// Fetch a remote file; returns the number of bytes copied
pub fn download(session: &Session, remote: &str, local: &Path, deadline: Instant) -> Result<u64, TransportError> {
    let what = format!("scp from {}", remote);
    let (mut channel, stat) = retry_ssh(deadline, &what, || session.scp_recv(Path::new(remote)))?;

    let expected = stat.size();
    let local = local_download_path(remote, local);

    debug!("SCP download {} -> {} ({} bytes)", remote, local.display(), expected);

    let mut file = File::create(&local)?;
    let copied = copy_exact(&mut channel, &mut file, expected, deadline)?;

    if copied != expected {
        return Err(TransportError::Protocol(format!(
            "short SCP read from {}: got {} of {} bytes",
            remote, copied, expected
        )));
    }

    finish(&mut channel, &what, deadline)?;
    Ok(copied)
}

fn finish(channel: &mut Channel, what: &str, deadline: Instant) -> Result<(), TransportError> {
    retry_ssh(deadline, what, || channel.send_eof())?;
    retry_ssh(deadline, what, || channel.wait_eof())?;
    retry_ssh(deadline, what, || channel.close())?;
    retry_ssh(deadline, what, || channel.wait_close())
}
