//! Teardown: terminate the platform process and stop the reverse proxy.
//!
//! Both steps run unconditionally regardless of the other's outcome;
//! failures are collected into one combined error. Callers treat that error
//! as diagnostic only: a teardown problem never overrides a suite result.

use crate::command;
use crate::config::HarnessConfig;
use crate::errors::{HarnessError, HarnessResult};
use crate::logging::HarnessLogger;
use crate::provision::PlatformProcess;

/// Kill the platform process, then stop the proxy's backing runtime via the
/// configured stop command. Consumes the process handle: teardown is the end
/// of its lifetime.
pub fn shutdown(
    mut platform: PlatformProcess,
    config: &HarnessConfig,
    logger: &HarnessLogger,
) -> HarnessResult<()> {
    let mut failures: Vec<String> = Vec::new();

    logger.info(format!(
        "terminating platform process (pid {})",
        platform.pid
    ));
    match platform.kill() {
        Ok(()) => match platform.wait() {
            Ok(status) => {
                logger.info(format!("platform process terminated ({status})"));
            }
            Err(error) => {
                failures.push(format!("failed to reap platform process: {error}"));
            }
        },
        Err(error) => {
            failures.push(format!("failed to kill platform process: {error}"));
        }
    }

    logger.info(format!(
        "stopping proxy container `{}`",
        config.proxy_container
    ));
    match command::run_with_timeout(&config.proxy_stop, config.command_timeout(), logger) {
        Ok(_) => logger.info("proxy stopped"),
        Err(error) => failures.push(format!("failed to stop proxy: {error}")),
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(HarnessError::Shutdown(failures.join("; ")))
    }
}
