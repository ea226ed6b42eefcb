//! External program execution behind a mockable seam.

use async_trait::async_trait;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command as TokioCommand;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` to completion and capture its output.
    async fn run(&self, program: &Path, args: &[OsString]) -> io::Result<Output>;
}

/// Runs child processes with tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &Path, args: &[OsString]) -> io::Result<Output> {
        TokioCommand::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
    }
}

/// Resolve `name` in `PATH`.
pub fn find_program(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Last non-empty stderr lines, for error reports.
pub fn stderr_tail(output: &Output, lines: usize) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let tail: Vec<&str> = stderr
        .lines()
        .filter(|l| !l.trim().is_empty())
        .collect();
    tail[tail.len().saturating_sub(lines)..].join("\n")
}
