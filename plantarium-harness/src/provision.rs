//! Platform provisioning.
//!
//! Produces a ready-to-launch platform instance: workspace directories,
//! source checkout (clone or update), dependency tidy, executable build,
//! reverse-proxy bring-up, and readiness polling of the proxy's
//! configuration API. Every step is fatal on failure; a half-provisioned
//! environment cannot produce meaningful assertions.

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::command::{self, CommandSpec};
use crate::config::{HarnessConfig, ROOT_FOLDER_ENV};
use crate::errors::{HarnessError, HarnessResult};
use crate::logging::{HarnessLogger, LogLevel, LogSource};
use crate::monitor::{ReadyLatch, spawn_line_monitor};
use crate::proxy::ProxyClient;

/// Clone-vs-update decision for the source checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoSyncPlan {
    Clone,
    Update,
}

impl RepoSyncPlan {
    /// A pre-existing checkout directory is updated in place; anything else
    /// gets a fresh clone.
    pub fn for_checkout(path: &Path) -> Self {
        if path.is_dir() {
            RepoSyncPlan::Update
        } else {
            RepoSyncPlan::Clone
        }
    }
}

/// A fully provisioned, not-yet-started platform launch.
///
/// The driver starts it explicitly; the resulting process handle is owned by
/// the driver and handed to teardown, never stored globally.
pub struct PlatformLaunch {
    config: HarnessConfig,
    logger: HarnessLogger,
}

impl PlatformLaunch {
    /// Describe a launch without provisioning. [`Provisioner::provision`] is
    /// the normal way to obtain one; this constructor exists for suites that
    /// run against an already-provisioned environment.
    pub fn new(config: HarnessConfig, logger: HarnessLogger) -> Self {
        Self { config, logger }
    }

    /// Start the platform process with piped output and attach one readiness
    /// monitor per stream. The sentinel is accepted from either stream.
    pub fn start(self) -> HarnessResult<(PlatformProcess, Arc<ReadyLatch>)> {
        let config = self.config;
        let logger = self.logger;

        logger.info(format!(
            "starting platform `{}` ({ROOT_FOLDER_ENV}={})",
            config.platform_program.display(),
            config.platform_data_root.display(),
        ));

        let mut cmd = Command::new(&config.platform_program);
        cmd.args(&config.platform_args)
            .env(ROOT_FOLDER_ENV, &config.platform_data_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = config.platform_cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|error| {
            HarnessError::ProcessStartFailed(format!(
                "{}: {error}",
                config.platform_program.display()
            ))
        })?;
        let pid = child.id();

        let latch = Arc::new(ReadyLatch::new());
        let stdout = child.stdout.take().ok_or_else(|| {
            HarnessError::ProcessStartFailed("platform stdout pipe unavailable".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            HarnessError::ProcessStartFailed("platform stderr pipe unavailable".to_string())
        })?;

        let monitors = vec![
            spawn_line_monitor(
                stdout,
                LogSource::PlatformStdout,
                config.sentinel.clone(),
                Arc::clone(&latch),
                logger.clone(),
            ),
            spawn_line_monitor(
                stderr,
                LogSource::PlatformStderr,
                config.sentinel.clone(),
                Arc::clone(&latch),
                logger.clone(),
            ),
        ];

        logger.info(format!("platform process started (pid {pid})"));
        Ok((
            PlatformProcess {
                pid,
                child,
                monitors,
            },
            latch,
        ))
    }
}

/// Handle to the running platform process, including its stream monitors.
pub struct PlatformProcess {
    pub pid: u32,
    child: Child,
    monitors: Vec<JoinHandle<()>>,
}

impl PlatformProcess {
    /// Send the kill signal. No graceful shutdown request, no retry.
    pub fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill()
    }

    /// Reap the process and join the monitor threads. The monitors exit on
    /// their own once the pipes close.
    pub fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        let status = self.child.wait();
        for handle in self.monitors.drain(..) {
            let _ = handle.join();
        }
        status
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// Orchestrates the provisioning sequence.
pub struct Provisioner {
    config: HarnessConfig,
    logger: HarnessLogger,
}

impl Provisioner {
    pub fn new(config: HarnessConfig, logger: HarnessLogger) -> Self {
        Self { config, logger }
    }

    /// Run the full sequence and hand back a launchable platform.
    pub fn provision(&self) -> HarnessResult<PlatformLaunch> {
        self.ensure_directories()?;
        self.sync_sources()?;
        self.tidy_dependencies()?;
        self.build_platform()?;
        self.start_proxy()?;
        self.await_proxy_ready()?;
        Ok(PlatformLaunch {
            config: self.config.clone(),
            logger: self.logger.clone(),
        })
    }

    fn run_step(&self, spec: &CommandSpec) -> HarnessResult<()> {
        command::run_with_timeout(spec, self.config.command_timeout(), &self.logger)?;
        Ok(())
    }

    fn ensure_directories(&self) -> HarnessResult<()> {
        std::fs::create_dir_all(&self.config.workspace_dir)?;
        if let Some(parent) = self.config.platform_program.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn sync_sources(&self) -> HarnessResult<()> {
        let checkout = self.config.checkout_dir();
        match RepoSyncPlan::for_checkout(&checkout) {
            RepoSyncPlan::Clone => {
                self.logger.info(format!(
                    "cloning platform sources into {}",
                    checkout.display()
                ));
                self.run_step(&self.config.fetch_command)
            }
            RepoSyncPlan::Update => {
                self.logger.info(format!(
                    "updating platform sources in {}",
                    checkout.display()
                ));
                self.run_step(&self.config.update_command)
            }
        }
    }

    fn tidy_dependencies(&self) -> HarnessResult<()> {
        self.logger.info("resolving platform dependencies");
        self.run_step(&self.config.tidy_command)
    }

    fn build_platform(&self) -> HarnessResult<()> {
        self.logger.info("building platform executable");
        self.run_step(&self.config.build_command)?;
        if !self.config.platform_program.exists() {
            return Err(HarnessError::ExecutableMissing(
                self.config.platform_program.display().to_string(),
            ));
        }
        Ok(())
    }

    fn start_proxy(&self) -> HarnessResult<()> {
        self.logger.info("starting reverse proxy");
        self.run_step(&self.config.proxy_bootstrap)
    }

    /// Poll the proxy's configuration-version endpoint until the readiness
    /// policy accepts a status or the deadline passes. Exponential backoff,
    /// 10ms doubling up to 500ms per attempt.
    fn await_proxy_ready(&self) -> HarnessResult<()> {
        let client = ProxyClient::new(&self.config)?;
        let deadline = self.config.proxy_ready_timeout();
        let policy = &self.config.readiness_policy;

        let start = Instant::now();
        let mut delay = Duration::from_millis(10);
        let max_delay = Duration::from_millis(500);
        let mut last_detail = "no probe attempted".to_string();

        loop {
            match client.configuration_version_status() {
                Ok(status) if policy.accepts(status.as_u16()) => {
                    self.logger.log(
                        LogLevel::Info,
                        LogSource::Proxy,
                        format!(
                            "proxy ready (status {status}) after {}ms",
                            start.elapsed().as_millis()
                        ),
                    );
                    return Ok(());
                }
                Ok(status) => {
                    last_detail = format!("last probe returned status {status}");
                }
                Err(error) => {
                    last_detail = format!("last probe failed: {error}");
                }
            }

            if start.elapsed() >= deadline {
                self.logger.log(
                    LogLevel::Error,
                    LogSource::Proxy,
                    format!("proxy not ready after {deadline:?}: {last_detail}"),
                );
                return Err(HarnessError::ProxyNotReady {
                    deadline,
                    detail: last_detail,
                });
            }
            std::thread::sleep(delay);
            delay = (delay * 2).min(max_delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::HarnessLoggerBuilder;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn quiet_logger(name: &str) -> HarnessLogger {
        HarnessLoggerBuilder::new(name).print_realtime(false).build()
    }

    fn stub_config(base: &Path) -> HarnessConfig {
        let mut config = HarnessConfig::for_workspace(base);
        config.fetch_command = CommandSpec::new("true", Vec::<String>::new());
        config.update_command = CommandSpec::new("true", Vec::<String>::new());
        config.tidy_command = CommandSpec::new("true", Vec::<String>::new());
        config.build_command = CommandSpec::new("true", Vec::<String>::new());
        config.proxy_bootstrap = CommandSpec::new("true", Vec::<String>::new());
        config.proxy_stop = CommandSpec::new("true", Vec::<String>::new());
        config.platform_cwd = None;
        config
    }

    #[test]
    fn sync_plan_prefers_update_for_existing_checkout() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert_eq!(
            RepoSyncPlan::for_checkout(dir.path()),
            RepoSyncPlan::Update
        );
        assert_eq!(
            RepoSyncPlan::for_checkout(&dir.path().join("absent")),
            RepoSyncPlan::Clone
        );
    }

    #[test]
    fn sync_plan_treats_plain_file_as_missing_checkout() {
        let dir = tempfile::tempdir().expect("temp dir");
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();
        assert_eq!(RepoSyncPlan::for_checkout(&file), RepoSyncPlan::Clone);
    }

    #[test]
    fn sync_sources_clones_then_updates() {
        let dir = tempfile::tempdir().expect("temp dir");
        let logger = quiet_logger("sync_sources");
        let mut config = stub_config(dir.path());
        let cloned_marker = dir.path().join("cloned");
        let updated_marker = dir.path().join("updated");
        config.fetch_command = CommandSpec::new(
            "sh",
            [
                "-c".to_string(),
                format!("touch {}", cloned_marker.display()),
            ],
        );
        config.update_command = CommandSpec::new(
            "sh",
            [
                "-c".to_string(),
                format!("touch {}", updated_marker.display()),
            ],
        );

        let provisioner = Provisioner::new(config.clone(), logger.clone());

        // First pass: no checkout yet, so the fetch command runs.
        provisioner.sync_sources().expect("clone pass should succeed");
        assert!(cloned_marker.exists());
        assert!(!updated_marker.exists());

        // Second pass: the checkout exists, so only the update command runs.
        std::fs::create_dir_all(config.checkout_dir()).unwrap();
        std::fs::remove_file(&cloned_marker).unwrap();
        provisioner.sync_sources().expect("update pass should succeed");
        assert!(updated_marker.exists());
        assert!(!cloned_marker.exists());
    }

    #[test]
    fn build_fails_when_executable_is_missing() {
        let dir = tempfile::tempdir().expect("temp dir");
        let logger = quiet_logger("build_missing");
        let mut config = stub_config(dir.path());
        config.platform_program = dir.path().join("never-built");

        let provisioner = Provisioner::new(config, logger);
        let error = provisioner
            .build_platform()
            .expect_err("missing artifact should fail");
        assert!(matches!(error, HarnessError::ExecutableMissing(_)));
    }

    #[test]
    fn build_passes_when_artifact_appears() {
        let dir = tempfile::tempdir().expect("temp dir");
        let logger = quiet_logger("build_ok");
        let mut config = stub_config(dir.path());
        let artifact = dir.path().join("bin").join("platform");
        config.platform_program = artifact.clone();
        config.build_command = CommandSpec::new(
            "sh",
            [
                "-c".to_string(),
                format!(
                    "mkdir -p {} && touch {}",
                    artifact.parent().unwrap().display(),
                    artifact.display()
                ),
            ],
        );

        let provisioner = Provisioner::new(config, logger);
        provisioner.build_platform().expect("build should pass");
        assert!(artifact.exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn proxy_wait_accepts_default_policy_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/services/haproxy/configuration/version"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = stub_config(dir.path());
        config.proxy_base_url = format!("{}/v3/services/haproxy", server.uri());
        config.proxy_ready_timeout_secs = 5;

        let provisioner = Provisioner::new(config, quiet_logger("proxy_ready"));
        tokio::task::spawn_blocking(move || provisioner.await_proxy_ready())
            .await
            .unwrap()
            .expect("401 is ready under the default policy");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn proxy_wait_rejects_not_found_until_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/services/haproxy/configuration/version"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = stub_config(dir.path());
        config.proxy_base_url = format!("{}/v3/services/haproxy", server.uri());
        config.proxy_ready_timeout_secs = 1;

        let provisioner = Provisioner::new(config, quiet_logger("proxy_404"));
        let error = tokio::task::spawn_blocking(move || provisioner.await_proxy_ready())
            .await
            .unwrap()
            .expect_err("404 must never count as ready");
        match error {
            HarnessError::ProxyNotReady { detail, .. } => {
                assert!(detail.contains("404"), "detail should name the status: {detail}");
            }
            other => panic!("expected ProxyNotReady, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn proxy_wait_honors_exact_policy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/services/haproxy/configuration/version"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = stub_config(dir.path());
        config.proxy_base_url = format!("{}/v3/services/haproxy", server.uri());
        config.proxy_ready_timeout_secs = 1;
        config.readiness_policy = crate::config::ReadinessPolicy::Exact {
            statuses: vec![401],
        };

        let provisioner = Provisioner::new(config, quiet_logger("proxy_exact"));
        let error = tokio::task::spawn_blocking(move || provisioner.await_proxy_ready())
            .await
            .unwrap()
            .expect_err("200 is not in the exact set");
        assert!(matches!(error, HarnessError::ProxyNotReady { .. }));
    }

    #[test]
    fn launch_fires_latch_and_process_can_be_killed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let logger = quiet_logger("launch");
        let mut config = stub_config(dir.path());
        config.platform_program = "/bin/sh".into();
        config.platform_args = vec![
            "-c".to_string(),
            "echo Platform started successfully; sleep 30".to_string(),
        ];
        config.platform_data_root = dir.path().to_path_buf();

        let launch = PlatformLaunch::new(config, logger);
        let (mut process, latch) = launch.start().expect("launch should start");
        assert!(latch.wait_timeout(Duration::from_secs(5)), "sentinel expected");
        assert!(process.is_running());
        process.kill().expect("kill should succeed");
        process.wait().expect("wait should reap");
        assert!(!process.is_running());
    }
}
