use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use localchat_core::ByteStream;
use localchat_core::ChatErr;
use localchat_core::Config;
use localchat_core::GenerateEndpoint;
use localchat_core::protocol::GenerateRequest;
use serde_json::Value as JsonValue;
use tracing::debug;
use tracing::warn;

use crate::url::base_url_to_host_root;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// What the sidebar shows about the inference server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    Online { models: Vec<String> },
    Offline,
}

/// Client for interacting with a local Ollama instance.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    host_root: String,
}

impl OllamaClient {
    pub fn from_config(config: &Config) -> Self {
        Self::build(&config.base_url, config.connect_timeout)
    }

    /// Low-level constructor given a raw host root, e.g. "http://localhost:11434".
    pub fn from_host_root(host_root: impl Into<String>) -> Self {
        Self::build(&host_root.into(), DEFAULT_CONNECT_TIMEOUT)
    }

    fn build(base_url: &str, connect_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            host_root: base_url_to_host_root(base_url),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.host_root.trim_end_matches('/'))
    }

    /// Return the list of model names known to the local Ollama instance.
    pub async fn fetch_models(&self) -> io::Result<Vec<String>> {
        let resp = self
            .client
            .get(self.url("/api/tags"))
            .send()
            .await
            .map_err(io::Error::other)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(io::Error::other(format!("unexpected status {status}")));
        }
        let val = resp.json::<JsonValue>().await.map_err(io::Error::other)?;
        let names = val
            .get("models")
            .and_then(|m| m.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.get("name").and_then(|n| n.as_str()))
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(names)
    }

    pub async fn server_status(&self) -> ServerStatus {
        match self.fetch_models().await {
            Ok(models) => ServerStatus::Online { models },
            Err(e) => {
                debug!("server at {} unreachable: {e}", self.host_root);
                ServerStatus::Offline
            }
        }
    }
}

#[async_trait]
impl GenerateEndpoint for OllamaClient {
    async fn open_generate_stream(
        &self,
        request: &GenerateRequest,
    ) -> localchat_core::error::Result<ByteStream> {
        let url = self.url("/api/generate");
        debug!("POST {url} model={}", request.model);
        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ChatErr::ConnectionFailure(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatErr::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let mut body = resp.bytes_stream();
        let stream = async_stream::stream! {
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => yield Ok(bytes),
                    Err(e) => {
                        warn!("generate stream broke: {e}");
                        yield Err(ChatErr::StreamInterrupted(e.to_string()));
                        return;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
