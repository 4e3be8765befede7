//! Read API client for Azure Computer Vision (v3.2), built on [`reqwest`].

use std::{fmt, time::Duration};

use leaky_bucket::RateLimiter;
use reqwest::{StatusCode, Url, header::CONTENT_TYPE};
use tokio::time;

use crate::{config::ReadApiOpts, error::OcrError, prelude::*};

use super::{JobHandle, ReadOperation, ReadTransport};

/// Path of the analyze endpoint, relative to the resource endpoint.
const ANALYZE_PATH: &str = "vision/v3.2/read/analyze";

/// Header carrying our subscription key.
const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Header carrying the URL to poll.
const OPERATION_LOCATION_HEADER: &str = "operation-location";

/// Error body returned by Azure Cognitive Services.
#[derive(Debug, Clone, Deserialize)]
struct AzureErrorResponse {
    error: AzureErrorDetail,
}

/// Error body detail.
#[derive(Debug, Clone, Deserialize)]
struct AzureErrorDetail {
    code: String,
    message: String,
}

/// Client for one Azure Computer Vision resource.
pub struct AzureReadClient {
    /// Shared connection pool.
    client: reqwest::Client,

    /// Full URL of the analyze endpoint.
    analyze_url: Url,

    /// Our subscription key.
    subscription_key: String,

    /// Upper bound on each individual call, including reading the body.
    request_timeout: Duration,

    /// Optional limit on calls to the service.
    rate_limiter: Option<RateLimiter>,
}

impl fmt::Debug for AzureReadClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureReadClient")
            .field("analyze_url", &self.analyze_url.as_str())
            .field("request_timeout", &self.request_timeout)
            .field("rate_limited", &self.rate_limiter.is_some())
            .finish_non_exhaustive()
    }
}

impl AzureReadClient {
    /// Create a new client from our options.
    pub fn new(opts: &ReadApiOpts) -> Result<Self> {
        let mut endpoint = Url::parse(opts.endpoint.trim())
            .with_context(|| format!("Invalid Read API endpoint: {:?}", opts.endpoint))?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        let analyze_url = endpoint
            .join(ANALYZE_PATH)
            .context("Could not build analyze URL")?;

        if opts.subscription_key.expose().is_empty() {
            return Err(anyhow!("Read API subscription key is empty"));
        }

        let client = reqwest::Client::builder()
            .build()
            .context("Could not create HTTP client")?;
        let rate_limiter = opts.rate_limit.as_ref().map(|limit| {
            debug!(%limit, "Rate limiting Read API calls");
            limit.to_rate_limiter()
        });

        Ok(Self {
            client,
            analyze_url,
            subscription_key: opts.subscription_key.expose().to_owned(),
            request_timeout: opts.request_timeout(),
            rate_limiter,
        })
    }

    /// The analyze endpoint we post images to.
    pub fn analyze_url(&self) -> &Url {
        &self.analyze_url
    }

    /// Wait for our rate limiter, if we have one.
    async fn throttle(&self) {
        if let Some(rate_limiter) = &self.rate_limiter {
            rate_limiter.acquire_one().await;
        }
    }

    /// Run `future` under our per-call timeout.
    async fn bounded<T>(
        &self,
        what: &str,
        future: impl Future<Output = reqwest::Result<T>>,
    ) -> Result<T> {
        match time::timeout(self.request_timeout, future).await {
            Ok(result) => result.with_context(|| format!("{what} failed")),
            Err(_) => Err(anyhow!(
                "{what} timed out after {:?}",
                self.request_timeout
            )),
        }
    }

    /// Turn a failed response into an error, including Azure's explanation if
    /// it sent one. Reading the body counts against the per-call timeout.
    async fn error_for_response(&self, what: &str, response: reqwest::Response) -> anyhow::Error {
        let status = response.status();
        let body = match self.bounded("Reading error response", response.bytes()).await {
            Ok(body) => body,
            Err(err) => return err.context(format!("{what} returned {status}")),
        };
        match serde_json::from_slice::<AzureErrorResponse>(&body) {
            Ok(body) => anyhow!(
                "{what} returned {status} ({}): {}",
                body.error.code,
                body.error.message
            ),
            Err(_) => anyhow!("{what} returned {status}"),
        }
    }

    /// Upload an image and return the `operation-location` header.
    async fn start_analysis(&self, image: Bytes) -> Result<JobHandle> {
        self.throttle().await;
        let request = self
            .client
            .post(self.analyze_url.clone())
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .body(image)
            .send();
        let response = self.bounded("Analyze request", request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.error_for_response("Analyze request", response).await);
        }
        if status != StatusCode::ACCEPTED {
            debug!(%status, "Analyze request succeeded with an unusual status");
        }

        let location = response
            .headers()
            .get(OPERATION_LOCATION_HEADER)
            .ok_or_else(|| anyhow!("Analyze response has no {OPERATION_LOCATION_HEADER} header"))?
            .to_str()
            .with_context(|| format!("{OPERATION_LOCATION_HEADER} header is not valid text"))?;
        Url::parse(location.trim()).with_context(|| {
            format!("{OPERATION_LOCATION_HEADER} header is not a URL: {location:?}")
        })?;
        JobHandle::new(location)
            .ok_or_else(|| anyhow!("Analyze response has an empty {OPERATION_LOCATION_HEADER} header"))
    }

    /// Fetch and decode one status report.
    async fn fetch_status(&self, handle: &JobHandle) -> Result<ReadOperation> {
        self.throttle().await;
        let request = self
            .client
            .get(handle.as_str())
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .send();
        let response = self.bounded("Status request", request).await?;
        if !response.status().is_success() {
            return Err(self.error_for_response("Status request", response).await);
        }
        self.bounded("Reading status response", response.json::<ReadOperation>())
            .await
    }
}

#[async_trait]
impl ReadTransport for AzureReadClient {
    #[instrument(level = "debug", skip_all, fields(bytes = image.len()))]
    async fn submit(&self, image: Bytes) -> Result<JobHandle, OcrError> {
        let handle = self
            .start_analysis(image)
            .await
            .map_err(OcrError::Submission)?;
        debug!(%handle, "Analysis started");
        Ok(handle)
    }

    #[instrument(level = "trace", skip_all)]
    async fn query(&self, handle: &JobHandle) -> Result<ReadOperation, OcrError> {
        let operation = self
            .fetch_status(handle)
            .await
            .map_err(OcrError::Transport)?;
        trace!(status = ?operation.status, "Status report");
        Ok(operation)
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, sync::Arc};

    use axum::{
        Json, Router,
        extract::{Path as UrlPath, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post},
    };
    use serde_json::json;
    use tokio::{
        io::{AsyncReadExt as _, AsyncWriteExt as _},
        net::TcpListener,
    };

    use crate::read_api::{RecognitionResult, RemoteStatus};

    use super::*;

    const KEY: &str = "test-key";

    /// A local stand-in for the Azure service.
    #[derive(Clone)]
    struct FakeAzure {
        addr: SocketAddr,
        /// Delay every status response by this much.
        status_delay: Duration,
        /// Leave out the `operation-location` header.
        omit_location: bool,
    }

    fn key_ok(headers: &HeaderMap) -> bool {
        headers
            .get(SUBSCRIPTION_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            == Some(KEY)
    }

    fn unauthorized() -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": {
                    "code": "401",
                    "message": "Access denied due to invalid subscription key."
                }
            })),
        )
            .into_response()
    }

    async fn analyze(
        State(fake): State<Arc<FakeAzure>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response {
        if !key_ok(&headers) {
            return unauthorized();
        }
        assert_eq!(
            headers.get(CONTENT_TYPE).unwrap(),
            "application/octet-stream"
        );
        if body.is_empty() {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": { "code": "InvalidImageSize", "message": "Image is empty." }
                })),
            )
                .into_response();
        }
        let mut response = StatusCode::ACCEPTED.into_response();
        if !fake.omit_location {
            let location = format!(
                "http://{}/vision/v3.2/read/analyzeResults/job-42",
                fake.addr
            );
            response
                .headers_mut()
                .insert(OPERATION_LOCATION_HEADER, location.parse().unwrap());
        }
        response
    }

    async fn analyze_results(
        State(fake): State<Arc<FakeAzure>>,
        UrlPath(id): UrlPath<String>,
        headers: HeaderMap,
    ) -> Response {
        if !key_ok(&headers) {
            return unauthorized();
        }
        time::sleep(fake.status_delay).await;
        if id == "job-42" {
            Json(ReadOperation::succeeded(RecognitionResult::from_pages([[
                "first line",
                "second line",
            ]])))
            .into_response()
        } else {
            (StatusCode::NOT_FOUND, "no such operation").into_response()
        }
    }

    /// Start a fake Azure server, returning its base URL.
    async fn start_fake(status_delay: Duration, omit_location: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let fake = Arc::new(FakeAzure {
            addr,
            status_delay,
            omit_location,
        });
        let app = Router::new()
            .route("/vision/v3.2/read/analyze", post(analyze))
            .route("/vision/v3.2/read/analyzeResults/:id", get(analyze_results))
            .with_state(fake);
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn opts(endpoint: &str, key: &str) -> ReadApiOpts {
        ReadApiOpts {
            subscription_key: key.parse().unwrap(),
            endpoint: endpoint.to_owned(),
            request_timeout_secs: 5,
            rate_limit: None,
        }
    }

    #[test]
    fn builds_analyze_url_with_or_without_trailing_slash() {
        for endpoint in [
            "https://example.cognitiveservices.azure.com",
            "https://example.cognitiveservices.azure.com/",
        ] {
            let client = AzureReadClient::new(&opts(endpoint, KEY)).unwrap();
            assert_eq!(
                client.analyze_url().as_str(),
                "https://example.cognitiveservices.azure.com/vision/v3.2/read/analyze"
            );
        }
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(AzureReadClient::new(&opts("not a url", KEY)).is_err());
        assert!(AzureReadClient::new(&opts("https://example.com", "  ")).is_err());
    }

    #[test]
    fn debug_output_hides_the_key() {
        let client = AzureReadClient::new(&opts("https://example.com", KEY)).unwrap();
        assert!(!format!("{client:?}").contains(KEY));
    }

    #[tokio::test]
    async fn submits_and_polls_against_the_service() {
        let endpoint = start_fake(Duration::ZERO, false).await;
        let client = AzureReadClient::new(&opts(&endpoint, KEY)).unwrap();

        let handle = client
            .submit(Bytes::from_static(b"\x89PNG fake image"))
            .await
            .unwrap();
        assert!(
            handle
                .as_str()
                .ends_with("/vision/v3.2/read/analyzeResults/job-42")
        );

        let operation = client.query(&handle).await.unwrap();
        assert_eq!(operation.status, RemoteStatus::Succeeded);
        assert_eq!(
            operation.analyze_result,
            Some(RecognitionResult::from_pages([[
                "first line",
                "second line"
            ]]))
        );
    }

    #[tokio::test]
    async fn rejected_submission_reports_azure_error() {
        let endpoint = start_fake(Duration::ZERO, false).await;
        let client = AzureReadClient::new(&opts(&endpoint, "wrong-key")).unwrap();

        let err = client
            .submit(Bytes::from_static(b"image"))
            .await
            .unwrap_err();
        let OcrError::Submission(source) = err else {
            panic!("expected a submission error, got {err:?}");
        };
        let message = source.to_string();
        assert!(message.contains("401"), "{message}");
        assert!(message.contains("invalid subscription key"), "{message}");
    }

    #[tokio::test]
    async fn missing_operation_location_is_a_submission_error() {
        let endpoint = start_fake(Duration::ZERO, true).await;
        let client = AzureReadClient::new(&opts(&endpoint, KEY)).unwrap();

        let err = client
            .submit(Bytes::from_static(b"image"))
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::Submission(_)), "{err:?}");
    }

    #[tokio::test]
    async fn unknown_operation_is_a_transport_error() {
        let endpoint = start_fake(Duration::ZERO, false).await;
        let client = AzureReadClient::new(&opts(&endpoint, KEY)).unwrap();
        let handle = JobHandle::new(format!(
            "{endpoint}/vision/v3.2/read/analyzeResults/missing"
        ))
        .unwrap();

        let err = client.query(&handle).await.unwrap_err();
        assert!(matches!(err, OcrError::Transport(_)), "{err:?}");
    }

    #[tokio::test]
    async fn slow_status_checks_time_out() {
        let endpoint = start_fake(Duration::from_secs(5), false).await;
        let mut opts = opts(&endpoint, KEY);
        opts.request_timeout_secs = 1;
        let client = AzureReadClient::new(&opts).unwrap();
        let handle = client.submit(Bytes::from_static(b"image")).await.unwrap();

        let err = client.query(&handle).await.unwrap_err();
        let OcrError::Transport(source) = err else {
            panic!("expected a transport error, got {err:?}");
        };
        assert!(source.to_string().contains("timed out"), "{source}");
    }

    #[tokio::test]
    async fn stalled_error_body_times_out() {
        // Send the headers of an error response, then never finish the body.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0; 16 * 1024];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(
                    b"HTTP/1.1 500 Internal Server Error\r\n\
                      Content-Type: application/json\r\n\
                      Content-Length: 100\r\n\r\n{",
                )
                .await
                .unwrap();
            time::sleep(Duration::from_secs(60)).await;
            drop(socket);
        });
        let mut opts = opts(&format!("http://{addr}"), KEY);
        opts.request_timeout_secs = 1;
        let client = AzureReadClient::new(&opts).unwrap();

        let err = time::timeout(
            Duration::from_secs(10),
            client.submit(Bytes::from_static(b"image")),
        )
        .await
        .expect("submit should give up on its own")
        .unwrap_err();
        let OcrError::Submission(source) = err else {
            panic!("expected a submission error, got {err:?}");
        };
        let message = format!("{source:#}");
        assert!(message.contains("500"), "{message}");
        assert!(message.contains("timed out"), "{message}");
    }

    #[tokio::test]
    async fn unreachable_service_is_a_submission_error() {
        // Bind and immediately drop a listener to find a port nobody is on.
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let client = AzureReadClient::new(&opts(&format!("http://{addr}"), KEY)).unwrap();

        let err = client
            .submit(Bytes::from_static(b"image"))
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::Submission(_)), "{err:?}");
    }
}
