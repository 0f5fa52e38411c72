//! Local filesystem checks used around file transfers

use std::path::Path;
use tracing::{error, info, warn};

/// Whether `path` is an existing directory; an empty path is `false`
pub fn check_directory_exists(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        error!("No directory path provided");
        return false;
    }

    let exists = path.is_dir();
    if exists {
        info!("Directory exists: {}", path.display());
    } else {
        warn!("Directory does not exist: {}", path.display());
    }
    exists
}

/// Whether `path` is an existing regular file; an empty path is `false`
pub fn check_file_exists(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        error!("No filename provided");
        return false;
    }

    let exists = path.is_file();
    if exists {
        info!("File exists: {}", path.display());
    } else {
        warn!("File does not exist: {}", path.display());
    }
    exists
}

/// Create `path` and its parents; succeeds when it already exists
pub fn create_directory(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        error!("No directory path provided");
        return false;
    }

    match std::fs::create_dir_all(path) {
        Ok(()) => {
            info!("Directory created/verified: {}", path.display());
            true
        }
        Err(e) => {
            error!("Failed to create directory {}: {}", path.display(), e);
            false
        }
    }
}
