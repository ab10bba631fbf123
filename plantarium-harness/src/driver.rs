//! Suite driver.
//!
//! Linear lifecycle: `NotStarted → Provisioning → AwaitingReadiness →
//! Running → TearingDown → Done`. Once a platform process handle exists, no
//! path out of [`SuiteDriver::run`] skips teardown, and the suite result is
//! captured before teardown so a cleanup problem can never mask it.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::checks::{Check, CheckContext, CheckOutcome};
use crate::config::HarnessConfig;
use crate::errors::{HarnessError, HarnessResult};
use crate::logging::HarnessLogger;
use crate::provision::Provisioner;
use crate::shutdown;

/// Driver lifecycle states, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    NotStarted,
    Provisioning,
    AwaitingReadiness,
    Running,
    TearingDown,
    Done,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriverState::NotStarted => "not-started",
            DriverState::Provisioning => "provisioning",
            DriverState::AwaitingReadiness => "awaiting-readiness",
            DriverState::Running => "running",
            DriverState::TearingDown => "tearing-down",
            DriverState::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// Aggregate result of one suite run.
#[derive(Debug)]
pub struct SuiteReport {
    pub outcomes: Vec<CheckOutcome>,
}

impl SuiteReport {
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(CheckOutcome::passed)
    }

    pub fn executed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failures(&self) -> Vec<&CheckOutcome> {
        self.outcomes.iter().filter(|o| !o.passed()).collect()
    }
}

/// Orchestrates one full suite run.
pub struct SuiteDriver {
    config: HarnessConfig,
    logger: HarnessLogger,
    state: DriverState,
}

impl SuiteDriver {
    pub fn new(config: HarnessConfig, logger: HarnessLogger) -> Self {
        Self {
            config,
            logger,
            state: DriverState::NotStarted,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    fn transition(&mut self, next: DriverState) {
        self.logger
            .debug(format!("driver state: {} -> {next}", self.state));
        self.state = next;
    }

    /// Provision, start, await readiness, run the checks, tear down.
    ///
    /// Provisioning failures propagate directly: no platform process exists
    /// yet, so there is nothing to tear down. From the moment `start`
    /// succeeds, teardown runs exactly once on every path out of here; its
    /// errors are logged and never override the suite result.
    pub fn run(&mut self, checks: &[Check]) -> HarnessResult<SuiteReport> {
        self.transition(DriverState::Provisioning);
        let provisioner = Provisioner::new(self.config.clone(), self.logger.clone());
        let launch = provisioner.provision()?;
        let (process, latch) = launch.start()?;

        self.transition(DriverState::AwaitingReadiness);
        let timeout = self.config.readiness_timeout();
        self.logger
            .info(format!("waiting for platform readiness (timeout {timeout:?})"));

        let result = if latch.wait_timeout(timeout) {
            self.logger.info("platform readiness confirmed");
            self.transition(DriverState::Running);
            CheckContext::new(&self.config, self.logger.clone())
                .map(|context| self.run_checks(&context, checks))
        } else {
            self.logger.error(format!(
                "platform readiness timeout after {timeout:?}; running zero checks"
            ));
            Err(HarnessError::ReadinessTimeout(timeout))
        };

        self.transition(DriverState::TearingDown);
        if let Err(error) = shutdown::shutdown(process, &self.config, &self.logger) {
            self.logger.error(error.to_string());
        }
        self.transition(DriverState::Done);

        result
    }

    fn run_checks(&self, context: &CheckContext, checks: &[Check]) -> SuiteReport {
        let mut outcomes = Vec::with_capacity(checks.len());
        for check in checks {
            self.logger.info(format!("check `{}` starting", check.name));
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| (check.run)(context))) {
                Ok(Ok(())) => CheckOutcome {
                    name: check.name,
                    error: None,
                },
                Ok(Err(error)) => CheckOutcome {
                    name: check.name,
                    error: Some(error.to_string()),
                },
                Err(panic) => CheckOutcome {
                    name: check.name,
                    error: Some(panic_message(panic)),
                },
            };
            match &outcome.error {
                None => self.logger.info(format!("check `{}` passed", check.name)),
                Some(error) => self
                    .logger
                    .error(format!("check `{}` failed: {error}", check.name)),
            }
            outcomes.push(outcome);
        }

        let report = SuiteReport { outcomes };
        self.logger.info(format!(
            "suite finished: {}/{} checks passed",
            report.executed() - report.failures().len(),
            report.executed()
        ));
        report
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("check panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("check panicked: {message}")
    } else {
        "check panicked".to_string()
    }
}
