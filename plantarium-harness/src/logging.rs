//! Structured logging for harness runs.
//!
//! Every provisioning step, relayed platform log line, and teardown action
//! flows through one [`HarnessLogger`] per run: real-time console output for
//! a human watching the suite, plus a per-run JSONL file for CI postmortems.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write as IoWrite};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Log severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

impl LogLevel {
    fn color_code(&self) -> &'static str {
        match self {
            LogLevel::Debug => "\x1b[36m",
            LogLevel::Info => "\x1b[32m",
            LogLevel::Warn => "\x1b[33m",
            LogLevel::Error => "\x1b[31m",
        }
    }
}

/// Source attribution for a log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// The harness itself.
    Harness,
    /// A line relayed from the platform's stdout.
    PlatformStdout,
    /// A line relayed from the platform's stderr.
    PlatformStderr,
    /// The reverse proxy or its configuration API.
    Proxy,
    /// An external command run by the harness.
    Command(String),
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSource::Harness => write!(f, "harness"),
            LogSource::PlatformStdout => write!(f, "platform:stdout"),
            LogSource::PlatformStderr => write!(f, "platform:stderr"),
            LogSource::Proxy => write!(f, "proxy"),
            LogSource::Command(name) => write!(f, "cmd:{name}"),
        }
    }
}

/// A single timestamped log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub level: LogLevel,
    pub source: LogSource,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>6}ms] [{:<5}] [{}] {}",
            self.elapsed_ms, self.level, self.source, self.message
        )
    }
}

impl LogEntry {
    fn format_colored(&self) -> String {
        let reset = "\x1b[0m";
        let dim = "\x1b[2m";
        let color = self.level.color_code();
        format!(
            "{dim}[{:>6}ms]{reset} {color}[{:<5}]{reset} {dim}[{}]{reset} {}",
            self.elapsed_ms, self.level, self.source, self.message
        )
    }
}

/// Configuration for the harness logger.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Minimum level to capture.
    pub min_level: LogLevel,
    /// Print entries to stdout as they arrive.
    pub print_realtime: bool,
    /// Use ANSI colors when printing.
    pub use_colors: bool,
    /// Maximum entries kept in memory (0 = unlimited).
    pub max_entries: usize,
    /// Directory for the per-run JSONL file.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Debug,
            print_realtime: true,
            use_colors: true,
            max_entries: 10_000,
            log_dir: None,
        }
    }
}

/// Thread-safe logger shared by the provisioner, stream monitors, driver,
/// and teardown. Cloning is cheap and clones share the same sink.
#[derive(Clone)]
pub struct HarnessLogger {
    config: Arc<LoggerConfig>,
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    start_time: Instant,
    run_name: Arc<String>,
    file_writer: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl HarnessLogger {
    /// Create a logger with the given configuration.
    pub fn new(run_name: &str, config: LoggerConfig) -> Self {
        let mut file_writer = None;

        if let Some(ref dir) = config.log_dir
            && fs::create_dir_all(dir).is_ok()
        {
            let stamp = Utc::now().format("%Y%m%d_%H%M%S");
            let sanitized = run_name.replace("::", "_").replace(' ', "_");
            let path = dir.join(format!("{sanitized}_{stamp}.jsonl"));
            match File::create(&path) {
                Ok(file) => file_writer = Some(BufWriter::new(file)),
                Err(error) => {
                    eprintln!("warning: failed to create log file {}: {error}", path.display());
                }
            }
        }

        Self {
            config: Arc::new(config),
            entries: Arc::new(Mutex::new(VecDeque::new())),
            start_time: Instant::now(),
            run_name: Arc::new(run_name.to_string()),
            file_writer: Arc::new(Mutex::new(file_writer)),
        }
    }

    /// Create a logger with default configuration.
    pub fn default_for_run(run_name: &str) -> Self {
        Self::new(run_name, LoggerConfig::default())
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Record an entry.
    pub fn log(&self, level: LogLevel, source: LogSource, message: impl Into<String>) {
        if level < self.config.min_level {
            return;
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            elapsed_ms: self.start_time.elapsed().as_millis() as u64,
            level,
            source,
            message: message.into(),
        };

        if self.config.print_realtime {
            if self.config.use_colors {
                println!("{}", entry.format_colored());
            } else {
                println!("{entry}");
            }
        }

        if let Ok(mut writer) = self.file_writer.lock()
            && let Some(ref mut w) = *writer
            && let Ok(json) = serde_json::to_string(&entry)
        {
            let _ = writeln!(w, "{json}");
            let _ = w.flush();
        }

        let mut entries = self.entries.lock().unwrap();
        entries.push_back(entry);
        if self.config.max_entries > 0 && entries.len() > self.config.max_entries {
            entries.pop_front();
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, LogSource::Harness, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, LogSource::Harness, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, LogSource::Harness, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, LogSource::Harness, message);
    }

    /// All captured entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn has_errors(&self) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.level == LogLevel::Error)
    }

    pub fn error_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.level == LogLevel::Error)
            .count()
    }

    /// Print a run summary to stdout.
    pub fn print_summary(&self) {
        let entries = self.entries.lock().unwrap();
        let mut counts = [0usize; 4];
        let mut first_error = None;
        for entry in entries.iter() {
            let idx = match entry.level {
                LogLevel::Debug => 0,
                LogLevel::Info => 1,
                LogLevel::Warn => 2,
                LogLevel::Error => 3,
            };
            counts[idx] += 1;
            if entry.level == LogLevel::Error && first_error.is_none() {
                first_error = Some(entry.message.clone());
            }
        }

        println!("\n{}", "=".repeat(60));
        println!("Harness run summary: {}", self.run_name);
        println!("{}", "=".repeat(60));
        println!("Duration: {}ms", self.elapsed().as_millis());
        println!("Entries: {}", entries.len());
        println!("  DEBUG: {}", counts[0]);
        println!("  INFO:  {}", counts[1]);
        println!("  WARN:  {}", counts[2]);
        println!("  ERROR: {}", counts[3]);
        if let Some(err) = first_error {
            println!("First error: {err}");
        }
        println!("{}", "=".repeat(60));
    }
}

/// Builder for [`HarnessLogger`].
pub struct HarnessLoggerBuilder {
    run_name: String,
    config: LoggerConfig,
}

impl HarnessLoggerBuilder {
    /// By default, JSONL output goes to `target/harness-logs/` relative to
    /// the workspace, resolved via `CARGO_MANIFEST_DIR` when available.
    pub fn new(run_name: &str) -> Self {
        let config = LoggerConfig {
            log_dir: Self::auto_detect_log_dir(),
            ..Default::default()
        };
        Self {
            run_name: run_name.to_string(),
            config,
        }
    }

    fn auto_detect_log_dir() -> Option<PathBuf> {
        let base = std::env::var("CARGO_MANIFEST_DIR")
            .map(PathBuf::from)
            .ok()
            .and_then(|dir| dir.parent().map(|p| p.to_path_buf()))
            .or_else(|| std::env::current_dir().ok())?;
        let log_dir = base.join("target").join("harness-logs");
        fs::create_dir_all(&log_dir).ok()?;
        Some(log_dir)
    }

    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.config.min_level = level;
        self
    }

    pub fn print_realtime(mut self, enabled: bool) -> Self {
        self.config.print_realtime = enabled;
        self
    }

    pub fn use_colors(mut self, enabled: bool) -> Self {
        self.config.use_colors = enabled;
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.config.max_entries = max;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> HarnessLogger {
        HarnessLogger::new(&self.run_name, self.config)
    }
}
