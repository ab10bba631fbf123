//! Harness configuration.
//!
//! Defaults mirror the platform's canonical test layout: sources are cloned
//! under `testdata/temp`, the executable is built into `testdata/temp/bin`,
//! and the proxy bootstrap lives in `testdata/haproxy`. Every external
//! constant (URLs, credentials, sentinel, commands) can be overridden from a
//! TOML file so CI environments and hermetic tests can reshape the run
//! without code changes.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::command::CommandSpec;

/// Environment variable holding the platform's data-root directory. When
/// set, it overrides the configured value and is forwarded to the platform
/// process unchanged.
pub const ROOT_FOLDER_ENV: &str = "PLANTARIUM_ROOT_FOLDER";

/// Environment variable naming an alternate config file location.
pub const CONFIG_PATH_ENV: &str = "PLANTARIUM_E2E_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "e2e-config.toml";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },
}

/// Which HTTP statuses from the proxy's configuration-version endpoint count
/// as "ready". 404 means the Dataplane API is not mapped yet and is never
/// accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReadinessPolicy {
    /// Any reachable response except 404 Not Found.
    AnyReachable,
    /// Only the listed status codes (404 still rejected).
    Exact { statuses: Vec<u16> },
}

impl ReadinessPolicy {
    pub fn accepts(&self, status: u16) -> bool {
        if status == 404 {
            return false;
        }
        match self {
            ReadinessPolicy::AnyReachable => true,
            ReadinessPolicy::Exact { statuses } => statuses.contains(&status),
        }
    }
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        ReadinessPolicy::AnyReachable
    }
}

/// Full harness configuration.
///
/// `#[serde(default)]` means a config file only needs the fields it wants to
/// change; everything else falls back to the canonical layout.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Root directory for checkouts and build output.
    pub workspace_dir: PathBuf,
    /// Platform source repository.
    pub repo_url: String,
    /// Checkout directory name under `workspace_dir`.
    pub repo_dir_name: String,
    /// Data root handed to the platform via `PLANTARIUM_ROOT_FOLDER`.
    pub platform_data_root: PathBuf,
    /// Executable started as the platform process.
    pub platform_program: PathBuf,
    /// Arguments for the platform process.
    pub platform_args: Vec<String>,
    /// Working directory for the platform process (checkout dir when unset).
    pub platform_cwd: Option<PathBuf>,
    /// Base URL for the platform's public endpoints.
    pub platform_base_url: String,

    /// Base URL of the proxy's Dataplane API, including the API prefix.
    pub proxy_base_url: String,
    pub proxy_user: String,
    pub proxy_password: String,
    /// Container name handed to the proxy stop command.
    pub proxy_container: String,
    /// Bootstrap command starting the proxy, run in the script's directory.
    pub proxy_bootstrap: CommandSpec,
    /// Stop command for the proxy's backing runtime.
    pub proxy_stop: CommandSpec,

    /// Clone command used when the checkout does not exist yet.
    pub fetch_command: CommandSpec,
    /// Update command used when the checkout already exists.
    pub update_command: CommandSpec,
    /// Dependency-resolution command run in the checkout.
    pub tidy_command: CommandSpec,
    /// Build command producing `platform_program`, run in the checkout.
    pub build_command: CommandSpec,

    /// Substring in the platform's log output that signals readiness.
    pub sentinel: String,
    /// Bound on waiting for the sentinel once the platform is started.
    pub readiness_timeout_secs: u64,
    /// Bound on polling the proxy's configuration-version endpoint.
    pub proxy_ready_timeout_secs: u64,
    /// Bound on each provisioning command.
    pub command_timeout_secs: u64,
    pub readiness_policy: ReadinessPolicy,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::for_workspace(&cwd)
    }
}

impl HarnessConfig {
    /// Build a coherent configuration rooted at `base`: all paths and
    /// provisioning commands agree on the same layout. Tests use this with a
    /// temp directory and then swap in stub commands.
    pub fn for_workspace(base: &Path) -> Self {
        let workspace_dir = base.join("testdata").join("temp");
        let repo_dir_name = "herbarium-go".to_string();
        let checkout = workspace_dir.join(&repo_dir_name);
        let checkout_str = checkout.display().to_string();
        let executable = workspace_dir.join("bin").join("herbarium");
        let executable_str = executable.display().to_string();
        let repo_url = "https://github.com/plantarium-platform/herbarium-go".to_string();
        let haproxy_dir = base.join("testdata").join("haproxy");

        Self {
            fetch_command: CommandSpec::new(
                "git",
                ["clone".to_string(), repo_url.clone(), checkout_str.clone()],
            ),
            update_command: CommandSpec::new(
                "git",
                ["-C".to_string(), checkout_str, "pull".to_string()],
            ),
            tidy_command: CommandSpec::new("go", ["mod", "tidy"]).in_dir(&checkout),
            build_command: CommandSpec::new(
                "go",
                [
                    "build".to_string(),
                    "-o".to_string(),
                    executable_str,
                    "cmd/herbarium/main.go".to_string(),
                ],
            )
            .in_dir(&checkout),
            proxy_bootstrap: CommandSpec::new("bash", ["haproxy-run.sh"]).in_dir(&haproxy_dir),
            proxy_stop: CommandSpec::new("docker", ["stop", "haproxy"]),
            workspace_dir,
            repo_url,
            repo_dir_name,
            platform_data_root: base.join("testdata").join("plantarium"),
            platform_program: executable,
            platform_args: Vec::new(),
            platform_cwd: Some(checkout),
            platform_base_url: "http://localhost".to_string(),
            proxy_base_url: "http://localhost:5555/v3/services/haproxy".to_string(),
            proxy_user: "admin".to_string(),
            proxy_password: "mypassword".to_string(),
            proxy_container: "haproxy".to_string(),
            sentinel: "Platform started successfully".to_string(),
            readiness_timeout_secs: 10,
            proxy_ready_timeout_secs: 30,
            command_timeout_secs: 600,
            readiness_policy: ReadinessPolicy::default(),
        }
    }

    /// Load configuration from an explicit TOML file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let mut config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from `PLANTARIUM_E2E_CONFIG` (or `e2e-config.toml`), falling
    /// back to defaults when no file exists. Read or parse failures of an
    /// existing file are still errors: a broken config should never silently
    /// turn into a default run.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        match Self::load_from(&path) {
            Ok(config) => Ok(config),
            Err(ConfigError::NotFound(_)) => {
                let mut config = Self::default();
                config.apply_env_overrides();
                Ok(config)
            }
            Err(error) => Err(error),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var(ROOT_FOLDER_ENV)
            && !root.trim().is_empty()
        {
            self.platform_data_root = PathBuf::from(root);
        }
    }

    /// Checkout directory of the platform source.
    pub fn checkout_dir(&self) -> PathBuf {
        self.workspace_dir.join(&self.repo_dir_name)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn proxy_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_ready_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_rejects_only_not_found() {
        let policy = ReadinessPolicy::default();
        assert!(policy.accepts(200));
        assert!(policy.accepts(401));
        assert!(policy.accepts(500));
        assert!(!policy.accepts(404));
    }

    #[test]
    fn exact_policy_accepts_listed_statuses_only() {
        let policy = ReadinessPolicy::Exact {
            statuses: vec![401],
        };
        assert!(policy.accepts(401));
        assert!(!policy.accepts(200));
        assert!(!policy.accepts(500));
    }

    #[test]
    fn exact_policy_never_accepts_not_found() {
        let policy = ReadinessPolicy::Exact {
            statuses: vec![404],
        };
        assert!(!policy.accepts(404));
    }

    #[test]
    fn missing_file_is_distinguished() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("absent.toml");
        match HarnessConfig::load_from(&path) {
            Err(ConfigError::NotFound(p)) => assert_eq!(p, path),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("e2e-config.toml");
        std::fs::write(
            &path,
            r#"
sentinel = "listening on"
readiness_timeout_secs = 25

[readiness_policy]
mode = "exact"
statuses = [401]
"#,
        )
        .unwrap();

        let config = HarnessConfig::load_from(&path).expect("config should parse");
        assert_eq!(config.sentinel, "listening on");
        assert_eq!(config.readiness_timeout(), Duration::from_secs(25));
        assert_eq!(
            config.readiness_policy,
            ReadinessPolicy::Exact {
                statuses: vec![401]
            }
        );
        // Untouched fields keep the canonical layout.
        assert_eq!(config.proxy_user, "admin");
        assert!(config.platform_base_url.starts_with("http://localhost"));
    }

    #[test]
    fn broken_file_is_an_error_not_a_default() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("e2e-config.toml");
        std::fs::write(&path, "sentinel = [not toml").unwrap();
        assert!(matches!(
            HarnessConfig::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    #[serial_test::serial]
    fn root_folder_env_overrides_data_root() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("e2e-config.toml");
        std::fs::write(&path, "sentinel = \"ready\"\n").unwrap();

        // set_var is unsafe in edition 2024; confined to this serial test.
        #[allow(unsafe_code)]
        unsafe {
            std::env::set_var(ROOT_FOLDER_ENV, "/srv/plantarium-data");
        }
        let config = HarnessConfig::load_from(&path).expect("config should parse");
        #[allow(unsafe_code)]
        unsafe {
            std::env::remove_var(ROOT_FOLDER_ENV);
        }

        assert_eq!(
            config.platform_data_root,
            PathBuf::from("/srv/plantarium-data")
        );
    }
}
