//! Post-update script hook.
//!
//! After files land in the live tree, the OS needs its caches regenerated
//! (dynamic linker, boot manager when boot files changed). What exactly
//! runs is deployment policy, so the engine only defines the seam.

use std::io;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, warn};

/// Invoked once after a successful install, with the rename pass complete
/// and the filesystem synced.
pub trait PostUpdateHook: Send + Sync {
    /// `updated_boot_files` is true when at least one boot-flagged file was
    /// installed, so the hook can refresh the boot manager too.
    fn run(&self, updated_boot_files: bool) -> io::Result<()>;
}

/// Hook that does nothing. Default for library embedders and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl PostUpdateHook for NoopHook {
    fn run(&self, _updated_boot_files: bool) -> io::Result<()> {
        Ok(())
    }
}

/// Hook that executes a helper program.
///
/// The program gets `--update-boot` appended when boot files changed.
/// Failures are logged and swallowed: a missing helper must not fail an
/// otherwise complete installation.
#[derive(Debug, Clone)]
pub struct ScriptHook {
    program: PathBuf,
}

impl ScriptHook {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl PostUpdateHook for ScriptHook {
    fn run(&self, updated_boot_files: bool) -> io::Result<()> {
        let mut command = Command::new(&self.program);
        if updated_boot_files {
            command.arg("--update-boot");
        }
        match command.status() {
            Ok(status) if status.success() => {
                debug!(program = %self.program.display(), "post-update script complete");
            }
            Ok(status) => {
                warn!(program = %self.program.display(), %status, "post-update script failed");
            }
            Err(e) => {
                warn!(program = %self.program.display(), error = %e, "could not run post-update script");
            }
        }
        Ok(())
    }
}
