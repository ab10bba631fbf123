//! Black-box assertion suite.
//!
//! Each check is independent and order-insensitive; the driver isolates
//! them so one failure never aborts a sibling. Bodies are compared
//! byte-exactly, with no whitespace tolerance.

use std::time::Duration;

use crate::config::HarnessConfig;
use crate::errors::{HarnessError, HarnessResult};
use crate::logging::HarnessLogger;
use crate::proxy::ProxyClient;

const EXPECTED_BODY: &str = "Hello, World!";
const GRAFT_BACKEND: &str = "hello-graft";
const GRAFT_SERVER: &str = "hello-graft-service-graft-node";

/// Shared state handed to every check.
pub struct CheckContext {
    pub config: HarnessConfig,
    pub proxy: ProxyClient,
    pub http: reqwest::blocking::Client,
    pub logger: HarnessLogger,
}

impl CheckContext {
    pub fn new(config: &HarnessConfig, logger: HarnessLogger) -> HarnessResult<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            proxy: ProxyClient::new(config)?,
            http,
            config: config.clone(),
            logger,
        })
    }

    fn platform_url(&self, path: &str) -> String {
        format!(
            "{}{path}",
            self.config.platform_base_url.trim_end_matches('/')
        )
    }
}

/// One named black-box check.
pub struct Check {
    pub name: &'static str,
    pub run: fn(&CheckContext) -> HarnessResult<()>,
}

/// Recorded result of one check.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub name: &'static str,
    pub error: Option<String>,
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

fn expect_exact_body(ctx: &CheckContext, path: &str) -> HarnessResult<()> {
    let url = ctx.platform_url(path);
    let response = ctx.http.get(&url).send()?;
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(HarnessError::AssertionFailed(format!(
            "GET {url}: expected status 200, got {status}"
        )));
    }
    let body = response.text()?;
    if body != EXPECTED_BODY {
        return Err(HarnessError::AssertionFailed(format!(
            "GET {url}: expected body {EXPECTED_BODY:?}, got {body:?}"
        )));
    }
    Ok(())
}

/// Plain GET against the platform's hello endpoint.
pub fn hello_endpoint(ctx: &CheckContext) -> HarnessResult<()> {
    ctx.logger.info("checking hello endpoint");
    expect_exact_body(ctx, "/hello")
}

/// The grafted route must be registered in the proxy backend and live
/// end-to-end.
pub fn hello_graft_endpoint(ctx: &CheckContext) -> HarnessResult<()> {
    ctx.logger.info(format!(
        "checking graft registration in backend `{GRAFT_BACKEND}`"
    ));
    if !ctx.proxy.has_backend_server(GRAFT_BACKEND, GRAFT_SERVER)? {
        return Err(HarnessError::AssertionFailed(format!(
            "server `{GRAFT_SERVER}` not found in proxy backend `{GRAFT_BACKEND}`"
        )));
    }
    ctx.logger.info(format!(
        "server `{GRAFT_SERVER}` present, checking hello-graft endpoint"
    ));
    expect_exact_body(ctx, "/hello-graft")
}

/// The full assertion suite in its canonical order. Order is cosmetic; the
/// checks do not depend on each other.
pub fn suite() -> Vec<Check> {
    vec![
        Check {
            name: "hello_endpoint",
            run: hello_endpoint,
        },
        Check {
            name: "hello_graft_endpoint",
            run: hello_graft_endpoint,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::HarnessLoggerBuilder;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context_for(platform_uri: &str, proxy_uri: &str) -> CheckContext {
        let mut config = HarnessConfig::for_workspace(std::path::Path::new("/tmp"));
        config.platform_base_url = platform_uri.to_string();
        config.proxy_base_url = format!("{proxy_uri}/v3/services/haproxy");
        let logger = HarnessLoggerBuilder::new("checks")
            .print_realtime(false)
            .build();
        CheckContext::new(&config, logger).expect("context should build")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn hello_passes_on_exact_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hello"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Hello, World!"))
            .mount(&server)
            .await;

        let uri = server.uri();
        tokio::task::spawn_blocking(move || hello_endpoint(&context_for(&uri, &uri)))
            .await
            .unwrap()
            .expect("exact body should pass");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn hello_rejects_inexact_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hello"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Hello, World!\n"))
            .mount(&server)
            .await;

        let uri = server.uri();
        let error = tokio::task::spawn_blocking(move || hello_endpoint(&context_for(&uri, &uri)))
            .await
            .unwrap()
            .expect_err("trailing newline must fail the byte-exact comparison");
        assert!(matches!(error, HarnessError::AssertionFailed(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn hello_rejects_wrong_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hello"))
            .respond_with(ResponseTemplate::new(503).set_body_string("Hello, World!"))
            .mount(&server)
            .await;

        let uri = server.uri();
        let error = tokio::task::spawn_blocking(move || hello_endpoint(&context_for(&uri, &uri)))
            .await
            .unwrap()
            .expect_err("non-200 must fail");
        let message = error.to_string();
        assert!(message.contains("503"), "message should name the status: {message}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn graft_check_passes_when_registered_and_routed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(
                "/v3/services/haproxy/configuration/backends/hello-graft/servers",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "name": "hello-graft-service-graft-node" }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hello-graft"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Hello, World!"))
            .mount(&server)
            .await;

        let uri = server.uri();
        tokio::task::spawn_blocking(move || hello_graft_endpoint(&context_for(&uri, &uri)))
            .await
            .unwrap()
            .expect("registered graft should pass");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn graft_check_names_the_missing_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(
                "/v3/services/haproxy/configuration/backends/hello-graft/servers",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "name": "unrelated-node" }
            ])))
            .mount(&server)
            .await;

        let uri = server.uri();
        let error =
            tokio::task::spawn_blocking(move || hello_graft_endpoint(&context_for(&uri, &uri)))
                .await
                .unwrap()
                .expect_err("missing server should fail");
        let message = error.to_string();
        assert!(
            message.contains("hello-graft-service-graft-node"),
            "failure must name the expected server: {message}"
        );
    }

    #[test]
    fn suite_lists_both_checks() {
        let checks = suite();
        let names: Vec<_> = checks.iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["hello_endpoint", "hello_graft_endpoint"]);
    }
}
