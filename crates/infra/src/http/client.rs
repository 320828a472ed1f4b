use std::time::Duration;

use dealflow_domain::DealflowError;
use rand::Rng;
use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response, StatusCode};
use tracing::debug;

use crate::errors::InfraError;

/// Thin wrapper over [`reqwest::Client`] that owns the transport retry policy
/// for every outbound integration.
///
/// Throttled (`429`) and server-error (`5xx`) responses are retried in place
/// with exponential backoff; any other status is handed back unchanged so each
/// integration keeps its own status mapping. The response from the final
/// attempt is always returned, whatever its status.
#[derive(Clone)]
pub struct HttpClient {
    inner: ReqwestClient,
    policy: RetryPolicy,
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: usize,
    backoff_floor: Duration,
}

impl RetryPolicy {
    fn retryable_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn retryable_transport(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.is_request()
    }

    /// Delay before the next attempt, given how many attempts have completed.
    /// Doubles from the floor per retry (capped at 2^8) plus up to 25% jitter
    /// so concurrent callers do not land on the server in lockstep.
    fn delay(&self, completed_attempts: usize) -> Duration {
        let doublings = completed_attempts.saturating_sub(1).min(8) as u32;
        let base = self.backoff_floor.saturating_mul(1 << doublings);
        let jitter_cap = (base.as_millis() as u64 / 4).max(1);
        let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
        base.saturating_add(Duration::from_millis(jitter))
    }
}

impl HttpClient {
    /// Start building a client with explicit settings.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Client with the default timeout and retry settings.
    pub fn new() -> Result<Self, DealflowError> {
        Self::builder().build()
    }

    /// Begin a request against the underlying reqwest client.
    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        U: reqwest::IntoUrl,
    {
        self.inner.request(method, url)
    }

    /// Execute the request, retrying per the client's policy.
    ///
    /// The builder must be cloneable, which rules out streaming bodies; every
    /// caller in this crate sends buffered JSON or query-only requests.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, DealflowError> {
        let mut attempt = 1usize;
        loop {
            let request = builder
                .try_clone()
                .ok_or_else(|| {
                    DealflowError::Internal(
                        "streaming request bodies cannot be retried; buffer the body first".into(),
                    )
                })?
                .build()
                .map_err(into_domain)?;

            let method = request.method().clone();
            let url = request.url().clone();
            let last = attempt >= self.policy.max_attempts;

            match self.inner.execute(request).await {
                Ok(response) if !last && RetryPolicy::retryable_status(response.status()) => {
                    let status = response.status();
                    debug!(%method, %url, %status, attempt, "retrying throttled or failed response");
                    self.pause(attempt).await;
                }
                Ok(response) => {
                    let status = response.status();
                    debug!(%method, %url, %status, attempt, "HTTP exchange finished");
                    return Ok(response);
                }
                Err(err) if !last && RetryPolicy::retryable_transport(&err) => {
                    debug!(%method, %url, error = %err, attempt, "transport error, will retry");
                    self.pause(attempt).await;
                }
                Err(err) => return Err(into_domain(err)),
            }

            attempt += 1;
        }
    }

    async fn pause(&self, completed_attempts: usize) {
        let delay = self.policy.delay(completed_attempts);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

fn into_domain(err: reqwest::Error) -> DealflowError {
    DealflowError::from(InfraError::from(err))
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    timeout: Duration,
    max_attempts: usize,
    backoff_floor: Duration,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff_floor: Duration::from_millis(200),
        }
    }
}

impl HttpClientBuilder {
    /// Per-request timeout covering connect, write, and read.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Total attempts per request, counting the first try. Clamped to >= 1.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Backoff before the first retry; later retries double from here.
    pub fn backoff_floor(mut self, floor: Duration) -> Self {
        self.backoff_floor = floor;
        self
    }

    pub fn build(self) -> Result<HttpClient, DealflowError> {
        let inner = ReqwestClient::builder()
            .timeout(self.timeout)
            .user_agent(concat!("dealflow/", env!("CARGO_PKG_VERSION")))
            .no_proxy()
            .build()
            .map_err(into_domain)?;

        Ok(HttpClient {
            inner,
            policy: RetryPolicy {
                max_attempts: self.max_attempts.max(1),
                backoff_floor: self.backoff_floor,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use reqwest::{Method, StatusCode};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn quick_client(max_attempts: usize) -> HttpClient {
        HttpClient::builder()
            .backoff_floor(Duration::from_millis(5))
            .max_attempts(max_attempts)
            .build()
            .expect("http client")
    }

    #[tokio::test]
    async fn success_is_returned_on_the_first_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = quick_client(3);
        let response =
            client.send(client.request(Method::GET, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn throttled_responses_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = quick_client(3);
        let response =
            client.send(client.request(Method::GET, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn persistent_server_errors_surface_after_the_last_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = quick_client(3);
        let response =
            client.send(client.request(Method::GET, server.uri())).await.expect("response");

        // The caller still gets the final response and maps the status itself
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn client_errors_are_never_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = quick_client(3);
        let response =
            client.send(client.request(Method::GET, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn refused_connections_map_to_network_errors() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener); // free the port so requests fail with ECONNREFUSED
        let url = format!("http://{}", addr);

        let client = quick_client(2);
        let result = client.send(client.request(Method::GET, &url)).await;

        match result {
            Err(DealflowError::Network(msg)) => {
                assert!(msg.to_lowercase().contains("http"));
            }
            other => panic!("expected network error, got {:?}", other),
        }
    }

    #[test]
    fn backoff_doubles_from_the_floor_with_bounded_jitter() {
        let policy = RetryPolicy { max_attempts: 3, backoff_floor: Duration::from_millis(100) };

        let first = policy.delay(1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));

        let third = policy.delay(3);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(500));
    }
}
