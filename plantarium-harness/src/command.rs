//! External command execution with captured output.
//!
//! Commands run synchronously and never share the harness's own stdio:
//! both streams are captured into buffers so a failure report can carry the
//! complete output without re-running anything.

use serde::Deserialize;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::errors::{HarnessError, HarnessResult};
use crate::logging::{HarnessLogger, LogLevel, LogSource};

/// Description of one external command: program, arguments, and an optional
/// working directory. Configurable so hermetic tests can substitute stubs
/// for the real VCS/build/runtime commands.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory; the harness's current directory when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            dir: None,
        }
    }

    /// Set the working directory the command runs in.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Full command line for logs and error reports.
    pub fn display_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    fn cwd_display(&self) -> String {
        match &self.dir {
            Some(dir) => dir.display().to_string(),
            None => std::env::current_dir()
                .map(|d| d.display().to_string())
                .unwrap_or_else(|_| ".".to_string()),
        }
    }
}

/// Captured result of a completed command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Run a command to completion, capturing both output streams.
///
/// Returns an error on launch failure or non-zero exit; either way the error
/// embeds the command line, working directory, and both captured streams.
pub fn run(spec: &CommandSpec, logger: &HarnessLogger) -> HarnessResult<CommandOutput> {
    run_with_timeout(spec, Duration::from_secs(600), logger)
}

/// Like [`run`], but kills the child once `timeout` elapses and reports the
/// output captured up to that point.
pub fn run_with_timeout(
    spec: &CommandSpec,
    timeout: Duration,
    logger: &HarnessLogger,
) -> HarnessResult<CommandOutput> {
    let command_line = spec.display_line();
    let cwd = spec.cwd_display();
    logger.log(
        LogLevel::Debug,
        LogSource::Command(spec.program.clone()),
        format!("running `{command_line}` in `{cwd}`"),
    );

    let start = Instant::now();
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(ref dir) = spec.dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|source| HarnessError::CommandLaunch {
        command: command_line.clone(),
        cwd: cwd.clone(),
        source,
    })?;

    let stdout_handle = child
        .stdout
        .take()
        .map(|mut stream| thread::spawn(move || read_to_string(&mut stream)));
    let stderr_handle = child
        .stderr
        .take()
        .map(|mut stream| thread::spawn(move || read_to_string(&mut stream)));

    let mut timed_out = false;
    let exit_status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if start.elapsed() >= timeout {
            timed_out = true;
            let _ = child.kill();
            break child.wait().ok();
        }
        thread::sleep(Duration::from_millis(10));
    };

    let duration = start.elapsed();
    let stdout = join_output(stdout_handle);
    let stderr = join_output(stderr_handle);

    if timed_out {
        logger.log(
            LogLevel::Error,
            LogSource::Command(spec.program.clone()),
            format!("killed `{command_line}` after {timeout:?}"),
        );
        return Err(HarnessError::CommandTimeout {
            command: command_line,
            cwd,
            timeout,
            stdout,
            stderr,
        });
    }

    let status = exit_status.and_then(|s| s.code()).unwrap_or(-1);
    let output = CommandOutput {
        status,
        stdout,
        stderr,
        duration,
    };

    if !output.success() {
        logger.log(
            LogLevel::Error,
            LogSource::Command(spec.program.clone()),
            format!("`{command_line}` exited with status {status}"),
        );
        return Err(HarnessError::CommandFailed {
            command: command_line,
            cwd,
            status,
            stdout: output.stdout,
            stderr: output.stderr,
        });
    }

    for line in output.stdout.lines() {
        logger.log(
            LogLevel::Debug,
            LogSource::Command(spec.program.clone()),
            line,
        );
    }
    logger.log(
        LogLevel::Debug,
        LogSource::Command(spec.program.clone()),
        format!(
            "`{command_line}` succeeded in {}ms",
            duration.as_millis()
        ),
    );

    Ok(output)
}

fn read_to_string<R: Read>(reader: &mut R) -> String {
    let mut buffer = Vec::new();
    if reader.read_to_end(&mut buffer).is_ok() {
        String::from_utf8_lossy(&buffer).to_string()
    } else {
        String::new()
    }
}

fn join_output(handle: Option<thread::JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.join().unwrap_or_default(),
        None => String::new(),
    }
}
