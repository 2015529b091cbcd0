use crate::error::ClientError;
use async_trait::async_trait;
use futures::{future, stream, stream::BoxStream, StreamExt};
use portal_protocol::{ControlRequest, FrameDecoder, Message, StreamEvent};
use reqwest::header::ACCEPT;
use std::time::Duration;
use tracing::debug;

/// Decoded events of one push-channel subscription.
pub type EventStream = BoxStream<'static, Result<StreamEvent, ClientError>>;

/// Capability interface between the chat client and whatever delivers events.
#[async_trait]
pub trait ChatTransport: Send + Sync + 'static {
    /// Open the push channel. The first event is expected to be `init`.
    async fn subscribe(&self) -> Result<EventStream, ClientError>;

    /// Post a control request. Only the status matters.
    async fn control(&self, request: ControlRequest) -> Result<(), ClientError>;

    /// Fetch up to `limit` messages older than `before`, oldest first.
    async fn history_before(
        &self,
        _before: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<Message>, ClientError> {
        Ok(Vec::new())
    }
}

/// Transport talking to the chat server over HTTP: SSE for the push
/// channel, JSON POSTs for control requests.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/api/chat", server_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn check(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(ClientError::Rejected(status.as_u16()))
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn subscribe(&self) -> Result<EventStream, ClientError> {
        let resp = self
            .http
            .get(&self.endpoint)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let resp = check(resp)?;
        debug!(endpoint = %self.endpoint, "event stream opened");
        let events = resp
            .bytes_stream()
            .scan(FrameDecoder::new(), |decoder, chunk| {
                let batch: Vec<Result<StreamEvent, ClientError>> = match chunk {
                    Ok(bytes) => decoder
                        .push(&bytes)
                        .into_iter()
                        .map(|r| r.map_err(ClientError::from))
                        .collect(),
                    Err(e) => vec![Err(e.into())],
                };
                future::ready(Some(stream::iter(batch)))
            })
            .flatten()
            .boxed();
        Ok(events)
    }

    async fn control(&self, request: ControlRequest) -> Result<(), ClientError> {
        let resp = self.http.post(&self.endpoint).json(&request).send().await?;
        check(resp)?;
        Ok(())
    }

    async fn history_before(
        &self,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>, ClientError> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(before) = before {
            query.push(("before", before.to_string()));
        }
        let resp = self
            .http
            .get(format!("{}/history", self.endpoint))
            .query(&query)
            .send()
            .await?;
        Ok(check(resp)?.json().await?)
    }
}
