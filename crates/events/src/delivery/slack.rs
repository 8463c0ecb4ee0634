//! Slack Web API transport.
//!
//! Text goes through `chat.postMessage`; files use the external upload
//! flow (`files.getUploadURLExternal`, a multipart POST of the bytes, then
//! `files.completeUploadExternal`). Thread replies pass the start
//! message's `ts` as `thread_ts`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::Deserialize;
use timelapse_core::intent::{MessageRef, ThreadRef};
use tokio::sync::OnceCell;

use crate::transport::{FileRef, FileUpload, NotificationTransport, TransportError};

/// HTTP request timeout for a single API call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default Web API base URL.
pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub bot_token: String,
    /// Channel ID (`C0123...`) or name (`#timelapse`).
    pub channel: String,
    pub api_base: String,
}

/// Fields we read from Web API responses. Missing fields default.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiResponse {
    ok: bool,
    error: Option<String>,
    ts: Option<String>,
    upload_url: Option<String>,
    file_id: Option<String>,
    channels: Vec<ChannelInfo>,
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChannelInfo {
    id: String,
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResponseMetadata {
    next_cursor: String,
}

pub struct SlackTransport {
    client: reqwest::Client,
    config: SlackConfig,
    channel_id: OnceCell<String>,
}

impl SlackTransport {
    pub fn new(config: SlackConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            config,
            channel_id: OnceCell::new(),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.config.api_base.trim_end_matches('/'))
    }

    /// Resolve the configured channel to an ID, once.
    async fn channel_id(&self) -> Result<&str, TransportError> {
        self.channel_id
            .get_or_try_init(|| self.resolve_channel_id())
            .await
            .map(String::as_str)
    }

    /// The upload API only accepts channel IDs, so names are looked up via
    /// `conversations.list`.
    async fn resolve_channel_id(&self) -> Result<String, TransportError> {
        let channel = self.config.channel.trim();
        if looks_like_channel_id(channel) {
            return Ok(channel.to_string());
        }

        let wanted = channel.trim_start_matches('#');
        let mut cursor = String::new();
        loop {
            let mut params = vec![
                ("types", "public_channel,private_channel".to_string()),
                ("exclude_archived", "true".to_string()),
                ("limit", "200".to_string()),
            ];
            if !cursor.is_empty() {
                params.push(("cursor", cursor.clone()));
            }
            let response = self.call_form("conversations.list", &params).await?;
            if let Some(found) = response.channels.iter().find(|c| c.name == wanted) {
                tracing::debug!(channel = wanted, channel_id = %found.id, "Resolved Slack channel");
                return Ok(found.id.clone());
            }
            cursor = response
                .response_metadata
                .map(|m| m.next_cursor)
                .unwrap_or_default();
            if cursor.is_empty() {
                return Err(TransportError::Api("channel_not_found".into()));
            }
        }
    }

    async fn call_json(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<ApiResponse, TransportError> {
        let response = self
            .client
            .post(self.url(method))
            .bearer_auth(&self.config.bot_token)
            .json(body)
            .send()
            .await?;
        parse_response(response).await
    }

    async fn call_form(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<ApiResponse, TransportError> {
        let response = self
            .client
            .post(self.url(method))
            .bearer_auth(&self.config.bot_token)
            .form(params)
            .send()
            .await?;
        parse_response(response).await
    }
}

#[async_trait]
impl NotificationTransport for SlackTransport {
    async fn send_message(
        &self,
        text: &str,
        thread: Option<&ThreadRef>,
    ) -> Result<MessageRef, TransportError> {
        let channel = self.channel_id().await?;
        let mut body = serde_json::json!({
            "channel": channel,
            "text": text,
            "mrkdwn": true,
        });
        if let Some(thread) = thread {
            body["thread_ts"] = serde_json::Value::String(thread.0.clone());
        }

        let response = self.call_json("chat.postMessage", &body).await?;
        response
            .ts
            .map(MessageRef)
            .ok_or_else(|| TransportError::Api("missing_ts".into()))
    }

    async fn upload_file(
        &self,
        upload: &FileUpload,
        thread: Option<&ThreadRef>,
    ) -> Result<FileRef, TransportError> {
        let channel = self.channel_id().await?.to_string();

        let ticket = self
            .call_form(
                "files.getUploadURLExternal",
                &[
                    ("filename", upload.filename.clone()),
                    ("length", upload.bytes.len().to_string()),
                ],
            )
            .await?;
        let (upload_url, file_id) = match (ticket.upload_url, ticket.file_id) {
            (Some(url), Some(id)) => (url, id),
            _ => return Err(TransportError::Api("missing_upload_url".into())),
        };

        let part = reqwest::multipart::Part::bytes(upload.bytes.clone())
            .file_name(upload.filename.clone());
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = self.client.post(&upload_url).multipart(form).send().await?;
        check_status(&response)?;

        let files = serde_json::json!([{ "id": file_id, "title": upload.filename }]).to_string();
        let mut params = vec![
            ("files", files),
            ("channel_id", channel),
            ("initial_comment", upload.comment.clone()),
        ];
        if let Some(thread) = thread {
            params.push(("thread_ts", thread.0.clone()));
        }
        self.call_form("files.completeUploadExternal", &params).await?;

        Ok(FileRef(file_id))
    }
}

/// Map HTTP-level failures. 429 carries the server's `Retry-After`.
fn check_status(response: &reqwest::Response) -> Result<(), TransportError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(TransportError::RateLimited { retry_after });
    }
    if !status.is_success() {
        return Err(TransportError::HttpStatus(status.as_u16()));
    }
    Ok(())
}

async fn parse_response(response: reqwest::Response) -> Result<ApiResponse, TransportError> {
    check_status(&response)?;
    let body: ApiResponse = response.json().await?;
    if !body.ok {
        return Err(TransportError::Api(
            body.error.unwrap_or_else(|| "unknown_error".into()),
        ));
    }
    Ok(body)
}

/// Slack conversation IDs start with C, G or D followed by uppercase
/// alphanumerics.
fn looks_like_channel_id(channel: &str) -> bool {
    let mut chars = channel.chars();
    matches!(chars.next(), Some('C' | 'G' | 'D'))
        && channel.len() >= 9
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_ids_are_recognised() {
        assert!(looks_like_channel_id("C0123456789"));
        assert!(looks_like_channel_id("G01ABCDEFG"));
        assert!(!looks_like_channel_id("#timelapse"));
        assert!(!looks_like_channel_id("general"));
        assert!(!looks_like_channel_id("C01"));
    }

    #[test]
    fn api_response_tolerates_missing_fields() {
        let parsed: ApiResponse = serde_json::from_str(r#"{"ok":false,"error":"not_in_channel"}"#).unwrap();
        assert!(!parsed.ok);
        assert_eq!(parsed.error.as_deref(), Some("not_in_channel"));
        assert!(parsed.channels.is_empty());
    }

    #[test]
    fn new_does_not_fail() {
        let transport = SlackTransport::new(SlackConfig {
            bot_token: "xoxb-test".into(),
            channel: "#timelapse".into(),
            api_base: DEFAULT_API_BASE.into(),
        });
        assert!(transport.is_ok());
    }

    #[test]
    fn url_joins_base_and_method() {
        let transport = SlackTransport::new(SlackConfig {
            bot_token: "xoxb-test".into(),
            channel: "C0123456789".into(),
            api_base: "http://localhost:9000/api/".into(),
        })
        .unwrap();
        assert_eq!(transport.url("chat.postMessage"), "http://localhost:9000/api/chat.postMessage");
    }
}
