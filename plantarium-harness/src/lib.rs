//! Integration-test harness for the Plantarium platform.
//!
//! The harness treats the platform as a black box: it builds the platform
//! from source, starts it together with its HAProxy dependency, waits for
//! the startup sentinel in the platform's log output, runs HTTP assertions
//! against the running system, and tears everything down afterwards.
//!
//! The crate is consumed by the `plantarium-e2e` suite; nothing in here is
//! specific to a single test case.

pub mod checks;
pub mod command;
pub mod config;
pub mod driver;
pub mod errors;
pub mod logging;
pub mod monitor;
pub mod provision;
pub mod proxy;
pub mod shutdown;

pub use checks::{Check, CheckContext, CheckOutcome};
pub use command::{CommandOutput, CommandSpec};
pub use config::{ConfigError, HarnessConfig, ReadinessPolicy};
pub use driver::{DriverState, SuiteDriver, SuiteReport};
pub use errors::{HarnessError, HarnessResult};
pub use logging::{HarnessLogger, HarnessLoggerBuilder, LogLevel, LogSource};
pub use monitor::ReadyLatch;
pub use provision::{PlatformLaunch, PlatformProcess, Provisioner};
pub use proxy::{BackendServer, ProxyClient};
