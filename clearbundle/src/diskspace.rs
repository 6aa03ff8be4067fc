//! Free-space check before installation.

use crate::config::UpdaterConfig;
use crate::error::UpdaterError;
use std::ffi::CString;
use std::mem;
use std::path::Path;
use tracing::debug;

/// Installs abort when the declared content size exceeds this fraction of
/// the free space; the extra 10% absorbs filesystem overhead.
const FUDGE_FACTOR: f64 = 1.1;

/// Free bytes available to unprivileged writes on the filesystem holding
/// `path`.
pub fn get_available_space(path: &Path) -> Result<u64, UpdaterError> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| UpdaterError::Unexpected(format!("path {} contains NUL", path.display())))?;

    let mut stat: libc::statvfs = unsafe { mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(UpdaterError::io(path, std::io::Error::last_os_error()));
    }

    Ok(stat.f_bsize as u64 * stat.f_bavail as u64)
}

/// Verify there is room for `bundle_size` bytes under `<prefix>/usr/`.
///
/// Only `/usr/` is probed; that is where bundle content lands.
pub fn check_disk_space_availability(
    config: &UpdaterConfig,
    bundle_size: u64,
) -> Result<(), UpdaterError> {
    if config.skip_diskspace_check {
        debug!("disk space check skipped by configuration");
        return Ok(());
    }

    let probe = config.path_prefix.join("usr/");
    let available = get_available_space(&probe)?;

    let needed = (bundle_size as f64 * FUDGE_FACTOR) as u64;
    if needed > available {
        return Err(UpdaterError::DiskSpace { needed, available });
    }

    debug!(needed, available, "disk space check passed");
    Ok(())
}
