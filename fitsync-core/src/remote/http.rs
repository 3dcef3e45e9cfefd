use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;

use super::{QueryRequest, QueryResponse, RemoteStore};
use crate::error::{RemoteError, RemoteResult};
use crate::filter::Filter;
use crate::record::Document;

/// Remote store served over HTTP by `fitsync-server`.
///
/// Requests are authenticated with a bearer API key. Each request is bounded
/// by the client timeout; the health probe uses its own, shorter one.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: Client,
    base_url: Url,
    api_key: String,
    request_timeout: Duration,
    probe_timeout: Duration,
}

impl HttpRemoteStore {
    pub fn new(
        server_url: &str,
        api_key: &str,
        request_timeout: Duration,
        probe_timeout: Duration,
    ) -> RemoteResult<Self> {
        let base_url = Url::parse(&normalize_base_url(server_url))
            .map_err(|e| RemoteError::Unreachable(format!("invalid server URL: {e}")))?;

        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(probe_timeout)
            .build()
            .map_err(|e| RemoteError::Unreachable(format!("could not build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.to_string(),
            request_timeout,
            probe_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `{base}/collections/{collection}[/{id}]`, with segments percent-encoded.
    fn url(&self, segments: &[&str]) -> RemoteResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Unreachable("server URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.api_key)
    }

    fn transport_error(&self, e: reqwest::Error, timeout: Duration) -> RemoteError {
        if e.is_timeout() {
            RemoteError::Timeout(timeout)
        } else if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Unreachable(e.to_string())
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        collection: &str,
        id: &str,
    ) -> RemoteResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(e, self.request_timeout))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            404 => RemoteError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            },
            code if code >= 500 => RemoteError::Server {
                status: code,
                message,
            },
            code => RemoteError::Rejected {
                status: code,
                message,
            },
        })
    }

    async fn json<T: DeserializeOwned>(&self, response: Response) -> RemoteResult<T> {
        response
            .json()
            .await
            .map_err(|e| self.transport_error(e, self.request_timeout))
    }
}

impl RemoteStore for HttpRemoteStore {
    fn set<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        document: &'a Document,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            let url = self.url(&["collections", collection, id])?;
            let request = self.request(Method::PUT, url).json(document);
            self.send(request, collection, id).await?;
            Ok(())
        })
    }

    fn patch<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        fields: &'a Document,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            let url = self.url(&["collections", collection, id])?;
            let request = self.request(Method::PATCH, url).json(fields);
            self.send(request, collection, id).await?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, collection: &'a str, id: &'a str) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            let url = self.url(&["collections", collection, id])?;
            self.send(self.request(Method::DELETE, url), collection, id)
                .await?;
            Ok(())
        })
    }

    fn get<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, RemoteResult<Document>> {
        Box::pin(async move {
            let url = self.url(&["collections", collection, id])?;
            let response = self
                .send(self.request(Method::GET, url), collection, id)
                .await?;
            self.json(response).await
        })
    }

    fn query<'a>(
        &'a self,
        collection: &'a str,
        filters: &'a [Filter],
    ) -> BoxFuture<'a, RemoteResult<Vec<Document>>> {
        Box::pin(async move {
            let url = self.url(&["collections", collection, "query"])?;
            let body = QueryRequest {
                filters: filters.to_vec(),
            };
            let request = self.request(Method::POST, url).json(&body);
            let response = self.send(request, collection, "").await?;
            let result: QueryResponse = self.json(response).await?;
            Ok(result.documents)
        })
    }

    fn probe(&self) -> BoxFuture<'_, RemoteResult<()>> {
        Box::pin(async move {
            let url = self.url(&["health"])?;
            let response = self
                .client
                .get(url)
                .timeout(self.probe_timeout)
                .send()
                .await
                .map_err(|e| self.transport_error(e, self.probe_timeout))?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(RemoteError::Server {
                    status: status.as_u16(),
                    message: "health check failed".to_string(),
                })
            }
        })
    }
}

/// Accepts `host:port`, `http(s)://` and `ws(s)://` forms.
fn normalize_base_url(server_url: &str) -> String {
    let base = if let Some(rest) = server_url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else if let Some(rest) = server_url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
        format!("http://{}", server_url)
    } else {
        server_url.to_string()
    };
    base.trim_end_matches('/').to_string()
}
