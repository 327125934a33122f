//! HTTP client for the queue broker's RPC surface.
//!
//! Every request carries the shared secret in the `authorization` header;
//! non-success statuses are surfaced as [`ClientError::Status`] with the
//! broker's message body when one was provided.

#[macro_use]
extern crate tracing;

use std::time::Duration;

use queue_proto::{
    CancelItemRequest, ClaimNextItemResponse, ClaimedItem, CreateQueueRequest, EnqueueItemRequest,
    EnqueueItemResponse, ItemPage, ItemState, ListQueuesResponse, QueueInfo, SetItemStateRequest,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, StatusCode};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid queue address")]
    Address(#[source] url::ParseError),
    #[error("request failed")]
    Network(#[source] reqwest::Error),
    #[error("queue service answered {status}: {message}")]
    Status { status: StatusCode, message: String },
}

impl ClientError {
    /// Connectivity problems, as opposed to the broker answering an error.
    pub fn is_network(&self) -> bool {
        matches!(self, ClientError::Network(_))
    }
}

#[derive(Clone)]
pub struct QueueClient {
    http: reqwest::Client,
    base: Url,
}

impl QueueClient {
    pub fn new(address: &str, key: &str, connect_timeout: Duration) -> Result<Self, ClientError> {
        let base = Url::parse(address).map_err(ClientError::Address)?;

        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(key).map_err(|_| ClientError::Status {
            status: StatusCode::UNAUTHORIZED,
            message: "key is not a valid header value".to_owned(),
        })?;
        key.set_sensitive(true);
        headers.insert(AUTHORIZATION, key);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(ClientError::Network)?;

        Ok(QueueClient { http, base })
    }

    pub async fn create_queue(&self, name: &str) -> Result<QueueInfo, ClientError> {
        let request = self
            .request(Method::POST, &["queues"])?
            .json(&CreateQueueRequest { name: name.to_owned() });
        send(request).await
    }

    pub async fn list_queues(&self) -> Result<Vec<QueueInfo>, ClientError> {
        let response: ListQueuesResponse = send(self.request(Method::GET, &["queues"])?).await?;
        Ok(response.queues)
    }

    pub async fn enqueue_item(
        &self,
        queue: &str,
        source: &str,
        destination: &str,
        category: &str,
    ) -> Result<String, ClientError> {
        let request = self
            .request(Method::POST, &["queues", queue, "items"])?
            .json(&EnqueueItemRequest {
                source: source.to_owned(),
                destination: destination.to_owned(),
                category: category.to_owned(),
            });
        let response: EnqueueItemResponse = send(request).await?;
        Ok(response.id)
    }

    pub async fn claim_next_item(&self, queue: &str) -> Result<Option<ClaimedItem>, ClientError> {
        let response: ClaimNextItemResponse = send(self.request(Method::POST, &["queues", queue, "claim"])?).await?;
        Ok(response.item)
    }

    pub async fn set_item_state(
        &self,
        id: &str,
        state: ItemState,
        downloaded_bytes: u64,
        total_size_bytes: u64,
        message: &str,
    ) -> Result<(), ClientError> {
        let request = self.request(Method::POST, &["items", "state"])?.json(&SetItemStateRequest {
            id: id.to_owned(),
            state,
            downloaded_bytes,
            total_size_bytes,
            message: message.to_owned(),
        });
        send_no_body(request).await
    }

    pub async fn cancel_item(&self, id: &str) -> Result<(), ClientError> {
        let request = self
            .request(Method::POST, &["items", "cancel"])?
            .json(&CancelItemRequest { id: id.to_owned() });
        send_no_body(request).await
    }

    pub async fn get_queue_items(&self, queue: &str, next: &str, limit: u32) -> Result<ItemPage, ClientError> {
        let request = self.page_request(&["queues", queue, "items"], next, limit)?;
        send(request).await
    }

    pub async fn get_finished_items(&self, queue: &str, next: &str, limit: u32) -> Result<ItemPage, ClientError> {
        let request = self.page_request(&["queues", queue, "finished"], next, limit)?;
        send(request).await
    }

    pub async fn clear_history(&self, queue: &str) -> Result<(), ClientError> {
        send_no_body(self.request(Method::DELETE, &["queues", queue, "finished"])?).await
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, ClientError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| ClientError::Address(url::ParseError::RelativeUrlWithCannotBeABaseBase))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(self.http.request(method, url))
    }

    fn page_request(&self, segments: &[&str], next: &str, limit: u32) -> Result<RequestBuilder, ClientError> {
        let mut request = self.request(Method::GET, segments)?;
        if !next.is_empty() {
            request = request.query(&[("next", next)]);
        }
        if limit != 0 {
            request = request.query(&[("limit", limit)]);
        }
        Ok(request)
    }
}

async fn send<T: serde::de::DeserializeOwned>(request: RequestBuilder) -> Result<T, ClientError> {
    let response = check(request).await?;
    response.json().await.map_err(ClientError::Network)
}

async fn send_no_body(request: RequestBuilder) -> Result<(), ClientError> {
    let _ = check(request).await?;
    Ok(())
}

async fn check(request: RequestBuilder) -> Result<reqwest::Response, ClientError> {
    let response = request.send().await.map_err(ClientError::Network)?;
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    trace!(%status, message = %message, "Queue service error response");

    Err(ClientError::Status { status, message })
}
