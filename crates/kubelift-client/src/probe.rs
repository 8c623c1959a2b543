//! Proxy streaming compatibility probe.
//!
//! Forward proxies commonly buffer whole responses by default, which breaks
//! watch-style long polls: the client only sees data once the upstream
//! response *finishes*, and a watch never finishes. Rather than trusting
//! proxy configuration, the probe checks empirically: a throwaway local
//! server writes a short payload and then holds its response open, and a
//! client routed through the proxy must observe that payload within a tight
//! deadline. A buffering proxy sits on the bytes until the handler ends,
//! long after the deadline.
//!
//! The `watch=true` query parameter is the contract with streaming-aware
//! proxy scripts, which switch the flow to pass-through when they see it.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::debug;

use crate::error::Result;

/// The payload the throwaway server writes before holding the connection.
pub const STREAM_PROBE_PAYLOAD: &[u8] = b"DONE";

/// Where a streaming-aware proxy serves its CA certificate.
const PROXY_CA_URL: &str = "http://mitm.it/cert/pem";

/// Content type expected from the proxy CA endpoint.
const PROXY_CA_CONTENT_TYPE: &str = "application/x-x509-ca-cert";

/// Timeout for the proxy CA fetch.
const PROXY_CA_TIMEOUT: Duration = Duration::from_secs(10);

/// Probe parameters.
///
/// Both durations are configurable so tests can use deterministic doubles:
/// the deadline must be long enough for a streaming proxy to relay the first
/// write and much shorter than the hold-open duration.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// The forward proxy URL the probe client routes through.
    pub proxy_url: String,
    /// How long the client waits for the payload.
    pub deadline: Duration,
    /// How long the server handler keeps its response open.
    pub hold_open: Duration,
}

impl ProbeConfig {
    /// Probe parameters with the production deadline (100 ms) and hold-open
    /// duration (10 minutes).
    #[must_use]
    pub fn new(proxy_url: impl Into<String>) -> Self {
        Self {
            proxy_url: proxy_url.into(),
            deadline: Duration::from_millis(100),
            hold_open: Duration::from_secs(600),
        }
    }

    /// Overrides the client deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Overrides the server hold-open duration.
    #[must_use]
    pub const fn with_hold_open(mut self, hold_open: Duration) -> Self {
        self.hold_open = hold_open;
        self
    }
}

/// How the proxy behaved during the probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The payload arrived within the deadline; the proxy relays partial
    /// responses.
    StreamingSupported,
    /// The deadline elapsed before the payload arrived; the proxy buffers
    /// whole responses.
    StreamingUnsupported,
    /// The proxy itself could not be reached.
    ProxyUnreachable {
        /// The connect failure, for the user-facing message.
        detail: String,
    },
    /// The probe ran but produced no usable verdict.
    Inconclusive {
        /// What went wrong.
        detail: String,
    },
}

/// Runs the streaming probe against the configured proxy.
///
/// Binds a throwaway server on an ephemeral local port, issues one GET
/// through the proxy with the `watch=true` marker, and classifies the
/// result. The server task is aborted on every exit path; on an early
/// verdict the handler's hold-open sleep is not awaited.
///
/// # Errors
///
/// Returns an error only for local setup failures (socket bind, invalid
/// proxy URL); everything the proxy does wrong is reported through
/// [`ProbeOutcome`].
pub async fn probe_streaming(config: &ProbeConfig) -> Result<ProbeOutcome> {
    debug!("creating a throwaway server to test whether the proxy supports streaming");
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let addr = listener.local_addr()?;

    let hold_open = config.hold_open;
    let server = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(handle_probe_connection(stream, hold_open));
        }
    });

    let outcome = run_probe_client(config, addr).await;
    server.abort();
    outcome
}

/// Writes the payload as an immediately-flushed chunk, then keeps the
/// response open for `hold_open` before finishing it.
async fn handle_probe_connection(mut stream: tokio::net::TcpStream, hold_open: Duration) {
    // Drain the request head; its content does not matter.
    let mut head = [0u8; 1024];
    let _ = stream.read(&mut head).await;

    debug!("probe client connected, throwaway server sending 'DONE'");
    let response = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/plain\r\n\
         Transfer-Encoding: chunked\r\n\
         \r\n\
         {len:x}\r\nDONE\r\n",
        len = STREAM_PROBE_PAYLOAD.len(),
    );
    if stream.write_all(response.as_bytes()).await.is_err() {
        return;
    }
    let _ = stream.flush().await;

    // Stand-in for an open watch stream.
    tokio::time::sleep(hold_open).await;
    let _ = stream.write_all(b"0\r\n\r\n").await;
}

async fn run_probe_client(config: &ProbeConfig, addr: SocketAddr) -> Result<ProbeOutcome> {
    let proxy = reqwest::Proxy::all(&config.proxy_url)?;
    let client = reqwest::Client::builder().proxy(proxy).build()?;

    // watch=true asks a streaming-aware proxy to switch this flow to
    // pass-through.
    let url = format!("http://{addr}/?watch=true");
    let mut response = match client.get(&url).timeout(config.deadline).send().await {
        Ok(response) => response,
        Err(err) if err.is_connect() => {
            return Ok(ProbeOutcome::ProxyUnreachable {
                detail: error_chain(&err),
            });
        }
        Err(err) if err.is_timeout() => return Ok(ProbeOutcome::StreamingUnsupported),
        Err(err) => {
            return Ok(ProbeOutcome::Inconclusive {
                detail: error_chain(&err),
            });
        }
    };

    if !response.status().is_success() {
        return Ok(ProbeOutcome::Inconclusive {
            detail: format!(
                "the throwaway server returned a non-200 status code: {}",
                response.status().as_u16()
            ),
        });
    }

    // Read incrementally: the verdict must not wait for the response to end.
    let mut body = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                debug!(bytes = chunk.len(), "probe read from the throwaway server");
                body.extend_from_slice(&chunk);
                if body
                    .windows(STREAM_PROBE_PAYLOAD.len())
                    .any(|window| window == STREAM_PROBE_PAYLOAD)
                {
                    debug!("the proxy supports streaming responses");
                    return Ok(ProbeOutcome::StreamingSupported);
                }
            }
            Ok(None) => return Ok(ProbeOutcome::StreamingSupported),
            Err(err) if err.is_timeout() => return Ok(ProbeOutcome::StreamingUnsupported),
            Err(err) => {
                return Ok(ProbeOutcome::Inconclusive {
                    detail: error_chain(&err),
                });
            }
        }
    }
}

/// Fetches the proxy's CA certificate from its certificate-distribution
/// endpoint.
///
/// Streaming-aware proxies expose their CA at a well-known plain-HTTP URL
/// that only resolves through the proxy itself. The content type is checked
/// but a mismatch is only logged, matching how tolerant the endpoint is in
/// practice.
///
/// # Errors
///
/// Returns the underlying network error; callers treat a failed fetch as a
/// soft condition.
pub async fn fetch_proxy_ca(proxy_url: &str) -> Result<String> {
    let proxy = reqwest::Proxy::all(proxy_url)?;
    let client = reqwest::Client::builder()
        .proxy(proxy)
        .timeout(PROXY_CA_TIMEOUT)
        .build()?;

    let response = client.get(PROXY_CA_URL).send().await?;
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if content_type != PROXY_CA_CONTENT_TYPE {
        debug!("unexpected content type of GET {PROXY_CA_URL}: {content_type:?}");
    }

    Ok(response.text().await?)
}

fn error_chain(err: &reqwest::Error) -> String {
    use std::error::Error as _;

    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
