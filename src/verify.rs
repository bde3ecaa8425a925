use std::error::Error as StdError;
use std::time::Duration;

use reqwest::blocking::{Client, ClientBuilder};
use reqwest::Url;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::network::binding::ProcessBinding;
use crate::reporter::StatusReporter;

/// Outcome of one verification GET. Exactly one of `body` and `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub requested_url: String,
    pub http_status: Option<u16>,
    pub body: Option<String>,
    pub error: Option<String>,
}

impl VerificationResult {
    fn success(url: &str, status: u16, body: String) -> Self {
        Self {
            requested_url: url.to_string(),
            http_status: Some(status),
            body: Some(body),
            error: None,
        }
    }

    fn failure(url: &str, status: Option<u16>, error: String) -> Self {
        Self {
            requested_url: url.to_string(),
            http_status: status,
            body: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Performs the single blocking HTTP GET that proves the new network works.
///
/// Blocks the calling thread; run it on the blocking pool, never on a task
/// that receives platform signals.
#[derive(Debug, Clone)]
pub struct VerificationRunner {
    binding: ProcessBinding,
    timeout: Option<Duration>,
}

impl VerificationRunner {
    pub fn new(binding: ProcessBinding, timeout: Option<Duration>) -> Self {
        Self { binding, timeout }
    }

    pub fn run(&self, url: &str) -> VerificationResult {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return VerificationResult::failure(url, None, e.to_string()),
        };

        // No idle pool: the connection is released as soon as the response is dropped
        let builder = Client::builder()
            .local_address(self.binding.local_address())
            .pool_max_idle_per_host(0)
            .timeout(self.timeout);
        let client = match self.pin_to_bound_interface(builder).build() {
            Ok(client) => client,
            Err(e) => return VerificationResult::failure(url, None, error_chain(&e)),
        };

        debug!(
            "GET {} via {:?} ({:?})",
            parsed,
            self.binding.interface(),
            self.binding.local_address()
        );
        let response = match client.get(parsed).send() {
            Ok(response) => response,
            Err(e) => return VerificationResult::failure(url, None, error_chain(&e)),
        };

        let status = response.status().as_u16();
        match response.text() {
            Ok(body) => VerificationResult::success(url, status, body),
            Err(e) => VerificationResult::failure(url, Some(status), error_chain(&e)),
        }
    }

    #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
    fn pin_to_bound_interface(&self, builder: ClientBuilder) -> ClientBuilder {
        match self.binding.interface() {
            Some(iface) => builder.interface(&iface),
            None => builder,
        }
    }

    #[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
    fn pin_to_bound_interface(&self, builder: ClientBuilder) -> ClientBuilder {
        builder
    }

    /// Run and narrate the request into the status log
    pub fn run_and_report(&self, url: &str, reporter: &StatusReporter) -> VerificationResult {
        reporter.append(format!("Start http request to {url}"));
        let result = self.run(url);

        match (&result.error, result.http_status) {
            (Some(error), _) => {
                warn!("Verification of {} failed: {}", url, error);
                reporter.append("Fail:");
                reporter.append(error.clone());
            }
            (None, status) => info!("Verification of {} returned {:?}", url, status),
        }

        reporter.append("Finished http request");
        reporter.append("Response:");
        reporter.append(result.body.clone().unwrap_or_default());
        result
    }
}

fn error_chain(e: &dyn StdError) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::{Read, Write};
    use std::net::{IpAddr, Ipv4Addr, TcpListener};
    use std::sync::mpsc;
    use std::thread;

    use super::*;
    use crate::network::NetworkHandle;

    /// Serve exactly one HTTP response on a local port.
    /// Returns the base URL and a receiver for the raw request head.
    pub(crate) fn serve_once(status: &str, body: &str) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 512];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let _ = tx.send(String::from_utf8_lossy(&head).to_string());
            stream.write_all(response.as_bytes()).unwrap();
        });

        (format!("http://{addr}"), rx)
    }

    fn runner() -> VerificationRunner {
        VerificationRunner::new(ProcessBinding::new(), Some(Duration::from_secs(5)))
    }

    #[test]
    fn captures_body_of_successful_get() {
        let (base, requests) = serve_once("200 OK", "pong");
        let url = format!("{base}/ping");

        let result = runner().run(&url);

        assert_eq!(result.requested_url, url);
        assert_eq!(result.http_status, Some(200));
        assert_eq!(result.body.as_deref(), Some("pong"));
        assert_eq!(result.error, None);
        assert!(requests.recv().unwrap().starts_with("GET /ping HTTP/1.1\r\n"));
    }

    fn bound_runner(interface: &str) -> VerificationRunner {
        let binding = ProcessBinding::new();
        binding.set(NetworkHandle {
            interface: interface.into(),
            device: "/org/freedesktop/NetworkManager/Devices/1".into(),
            address: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        });
        VerificationRunner::new(binding, Some(Duration::from_secs(5)))
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn request_leaves_through_the_bound_interface() {
        let (base, _requests) = serve_once("200 OK", "pong");
        let result = bound_runner("lo").run(&format!("{base}/ping"));

        assert_eq!(result.error, None);
        assert_eq!(result.body.as_deref(), Some("pong"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn request_fails_when_the_bound_interface_is_gone() {
        let (base, _requests) = serve_once("200 OK", "pong");
        let result = bound_runner("nexus-absent0").run(&format!("{base}/ping"));

        assert_eq!(result.http_status, None);
        assert!(result.error.is_some());
    }

    #[test]
    fn error_statuses_are_data_not_failures() {
        let (base, _requests) = serve_once("503 Service Unavailable", "down");
        let result = runner().run(&format!("{base}/health"));

        assert_eq!(result.http_status, Some(503));
        assert_eq!(result.body.as_deref(), Some("down"));
        assert!(result.is_success());
    }

    #[test]
    fn connection_refused_is_captured() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = runner().run(&format!("http://127.0.0.1:{port}/ping"));

        assert_eq!(result.http_status, None);
        assert_eq!(result.body, None);
        assert!(result.error.is_some());
    }

    #[test]
    fn invalid_url_is_a_verification_error() {
        let result = runner().run("not a url");

        assert_eq!(result.requested_url, "not a url");
        assert_eq!(result.body, None);
        assert!(result.error.unwrap().contains("relative URL"));
    }

    #[tokio::test]
    async fn report_narrates_a_failure() {
        let (reporter, _task) = StatusReporter::spawn();
        let result = tokio::task::spawn_blocking({
            let reporter = reporter.clone();
            move || runner().run_and_report("not a url", &reporter)
        })
        .await
        .unwrap();

        let lines = reporter.snapshot().await.lines;
        assert_eq!(lines[0], "Start http request to not a url");
        assert_eq!(lines[1], "Fail:");
        assert_eq!(lines[2], result.error.unwrap());
        assert_eq!(
            lines[3..].to_vec(),
            vec!["Finished http request", "Response:", ""]
        );
    }
}
