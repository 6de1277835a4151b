//! HTTP transport for the OMF emitter: a thin client-plus-POST wrapper
//! authenticating with a bearer producer token rather than request signing.

use bytes::Bytes;
use reqwest::Client;

use super::error::TransportError;

#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        verb: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: Bytes,
    ) -> Result<(u16, Bytes), TransportError>;
}

pub struct ReqwestTransport {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>, bearer_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            bearer_token,
        }
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    #[tracing::instrument(skip(self, headers, body), err)]
    async fn send(
        &self,
        verb: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: Bytes,
    ) -> Result<(u16, Bytes), TransportError> {
        let url = format!("{}{path}", self.base_url);
        let mut request = match verb {
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            other => self.client.request(other.parse().unwrap_or(reqwest::Method::POST), &url),
        };
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request.body(body).send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        Ok((status, bytes))
    }
}
