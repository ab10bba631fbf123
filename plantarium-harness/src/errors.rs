//! Error types shared across the harness.

use std::time::Duration;

/// Error type for harness operations.
///
/// Command failures carry the full command line, working directory, and both
/// captured output streams so a CI log contains everything needed to diagnose
/// the failure without re-running anything.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error(
        "command `{command}` in `{cwd}` exited with status {status}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}"
    )]
    CommandFailed {
        command: String,
        cwd: String,
        status: i32,
        stdout: String,
        stderr: String,
    },

    #[error("failed to launch `{command}` in `{cwd}`: {source}")]
    CommandLaunch {
        command: String,
        cwd: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "command `{command}` in `{cwd}` killed after exceeding {timeout:?}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}"
    )]
    CommandTimeout {
        command: String,
        cwd: String,
        timeout: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("platform process failed to start: {0}")]
    ProcessStartFailed(String),

    #[error("platform executable missing after build: {0}")]
    ExecutableMissing(String),

    #[error("reverse proxy did not become ready within {deadline:?}: {detail}")]
    ProxyNotReady { deadline: Duration, detail: String },

    #[error("platform readiness sentinel not seen within {0:?}")]
    ReadinessTimeout(Duration),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("proxy API `{url}` returned status {status}")]
    ProxyApi { url: String, status: u16 },

    #[error("invalid harness configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    #[error("teardown completed with errors: {0}")]
    Shutdown(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;
