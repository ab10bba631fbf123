//! Platform output monitoring and the readiness latch.
//!
//! One scanner thread per stream reads lines until EOF, relays each line to
//! the run logger under the stream's attribution, and fires the latch on the
//! first line containing the sentinel. Scanning continues after the latch
//! fires so late output still reaches the log.

use std::io::{BufRead, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::logging::{HarnessLogger, LogLevel, LogSource};

/// Single-fire readiness event.
///
/// The atomic guard makes redundant fires non-blocking no-ops; the
/// mutex/condvar pair carries the wakeup to waiters.
#[derive(Debug, Default)]
pub struct ReadyLatch {
    fired: AtomicBool,
    state: Mutex<bool>,
    cond: Condvar,
}

impl ReadyLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the latch. Returns `true` only for the call that actually fired
    /// it; every later call returns `false` without blocking.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        let mut ready = self.state.lock().unwrap();
        *ready = true;
        self.cond.notify_all();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Block until the latch fires or `timeout` elapses. Returns whether the
    /// latch fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut ready = self.state.lock().unwrap();
        while !*ready {
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return false,
            };
            let (guard, _) = self.cond.wait_timeout(ready, remaining).unwrap();
            ready = guard;
        }
        true
    }
}

/// Spawn a scanner thread over one output stream.
///
/// The thread exits when the stream closes (process exit or pipe teardown).
pub fn spawn_line_monitor<R>(
    reader: R,
    source: LogSource,
    sentinel: String,
    latch: Arc<ReadyLatch>,
    logger: HarnessLogger,
) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let level = match source {
            LogSource::PlatformStderr => LogLevel::Warn,
            _ => LogLevel::Debug,
        };
        let buffered = BufReader::new(reader);
        for line in buffered.lines() {
            let line = match line {
                Ok(line) => line,
                Err(error) => {
                    logger.log(
                        LogLevel::Warn,
                        source.clone(),
                        format!("error reading stream: {error}"),
                    );
                    break;
                }
            };
            logger.log(level, source.clone(), line.clone());
            if line.contains(&sentinel) && latch.fire() {
                logger.info(format!("readiness sentinel observed: {sentinel}"));
            }
        }
    })
}
