use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, Uri};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::time::timeout;

use crate::error::LoadError;

/// Ceiling for a single resource load, measured from the moment the load is
/// issued. Expiry stops the observer; it does not abort the underlying fetch.
pub const RESOURCE_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Loads one script resource and reports completion exactly once.
///
/// Implementations perform the fetch; executing the script and registering
/// its custom elements is the embedder's side effect behind this seam. No
/// deduplication is attempted: callers must not request the same resource
/// twice concurrently if idempotency matters.
#[async_trait]
pub trait ResourceLoader: Send + Sync + 'static {
    async fn load(&self, url: &str) -> Result<(), LoadError>;
}

/// Wraps a load with the fixed timeout. Failure is terminal per call; the
/// caller decides whether it makes the owning plugin unavailable (it does).
pub async fn load_with_timeout<L>(loader: &L, url: &str) -> Result<(), LoadError>
where
    L: ResourceLoader + ?Sized,
{
    match timeout(RESOURCE_LOAD_TIMEOUT, loader.load(url)).await {
        Ok(result) => result,
        Err(_) => Err(LoadError::Timeout {
            url: url.to_string(),
            timeout_secs: RESOURCE_LOAD_TIMEOUT.as_secs(),
        }),
    }
}

type FetchClient = Client<HttpConnector, Empty<Bytes>>;

/// Production loader: fetches the script over HTTP and drains the body.
pub struct HttpResourceLoader {
    client: FetchClient,
}

impl HttpResourceLoader {
    pub fn new() -> Self {
        let mut connector = HttpConnector::new();
        connector.enforce_http(false);
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
        }
    }
}

impl Default for HttpResourceLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceLoader for HttpResourceLoader {
    async fn load(&self, url: &str) -> Result<(), LoadError> {
        let failed = |reason: String| LoadError::Failed {
            url: url.to_string(),
            reason,
        };
        let uri: Uri = url
            .parse()
            .map_err(|err| failed(format!("invalid url: {err}")))?;
        let request = Request::builder()
            .uri(uri)
            .body(Empty::<Bytes>::new())
            .map_err(|err| failed(err.to_string()))?;
        let response: Response<Incoming> = self
            .client
            .request(request)
            .await
            .map_err(|err| failed(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("unexpected status {status}")));
        }
        response
            .into_body()
            .collect()
            .await
            .map_err(|err| failed(err.to_string()))?;
        Ok(())
    }
}
