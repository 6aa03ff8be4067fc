//! User-facing output abstraction.
//!
//! Operations narrate progress ("Loading required manifests...") through a
//! [`Reporter`] so the library stays silent under test and the CLI decides
//! presentation. Diagnostic logging still goes through `tracing`.

use std::fmt::Arguments;

/// Sink for operation output.
///
/// `print` is unconditional command output (bundle listings, trees);
/// `info`/`warn`/`error` are progress and diagnostics that a front-end may
/// decorate or filter.
pub trait Reporter: Send + Sync {
    /// Unconditional command output.
    fn print(&self, args: Arguments<'_>);

    /// Progress information.
    fn info(&self, args: Arguments<'_>);

    /// Something worth the user's attention, operation continues.
    fn warn(&self, args: Arguments<'_>);

    /// Operation-fatal condition, reported before returning the error.
    fn error(&self, args: Arguments<'_>);
}

/// Reporter that writes to stdout/stderr like the interactive CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn print(&self, args: Arguments<'_>) {
        println!("{args}");
    }

    fn info(&self, args: Arguments<'_>) {
        println!("{args}");
    }

    fn warn(&self, args: Arguments<'_>) {
        println!("Warning: {args}");
    }

    fn error(&self, args: Arguments<'_>) {
        eprintln!("Error: {args}");
    }
}

/// Reporter that discards everything. Used by tests and embedders.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentReporter;

impl Reporter for SilentReporter {
    fn print(&self, _args: Arguments<'_>) {}
    fn info(&self, _args: Arguments<'_>) {}
    fn warn(&self, _args: Arguments<'_>) {}
    fn error(&self, _args: Arguments<'_>) {}
}
