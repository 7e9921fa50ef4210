use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Destination;

/// Client for a Bot-API compatible destination (Bale by default)
pub struct BaleClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl BaleClient {
    pub fn new(api_url: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    async fn check(response: reqwest::Response, method: &str) -> Result<()> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("{} failed ({}): {}", method, status, body);
        }
        parse_api_response(&body).with_context(|| format!("{} was rejected", method))
    }
}

fn parse_api_response(body: &str) -> Result<()> {
    let parsed: ApiResponse =
        serde_json::from_str(body).context("Failed to parse destination response")?;
    if !parsed.ok {
        anyhow::bail!(
            "destination returned ok=false: {}",
            parsed.description.unwrap_or_default()
        );
    }
    Ok(())
}

#[async_trait]
impl Destination for BaleClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        debug!("sendMessage to {} ({} chars)", chat_id, text.chars().count());
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&SendMessageRequest { chat_id, text })
            .send()
            .await
            .context("Failed to send request to destination")?;
        Self::check(response, "sendMessage").await
    }

    async fn send_document(&self, chat_id: i64, file_name: &str, content: Vec<u8>) -> Result<()> {
        debug!("sendDocument '{}' to {} ({} bytes)", file_name, chat_id, content.len());
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", Part::bytes(content).file_name(file_name.to_string()));
        let response = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .context("Failed to upload document to destination")?;
        Self::check(response, "sendDocument").await
    }
}
