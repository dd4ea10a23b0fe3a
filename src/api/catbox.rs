use crate::api::FileHost;
use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use std::time::Duration;

const CATBOX_API: &str = "https://catbox.moe/user/api.php";

/// Anonymous catbox.moe uploads. The lip-sync service only accepts public URLs.
pub struct CatboxClient {
    client: Client,
}

impl CatboxClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

pub fn parse_upload_response(body: &str) -> PipelineResult<String> {
    let body = body.trim();
    if body.starts_with("http") {
        return Ok(body.to_string());
    }
    let snippet = body.chars().take(200).collect::<String>();
    Err(PipelineError::collaborator(
        "catbox",
        format!("upload failed: {snippet}"),
    ))
}

#[async_trait]
impl FileHost for CatboxClient {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str, filename: &str) -> PipelineResult<String> {
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(content_type)?;
        let form = Form::new()
            .text("reqtype", "fileupload")
            .part("fileToUpload", part);

        let resp = self
            .client
            .post(CATBOX_API)
            .multipart(form)
            .timeout(Duration::from_secs(120))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(PipelineError::collaborator(
                "catbox",
                format!("HTTP {}", status.as_u16()),
            ));
        }
        parse_upload_response(&body)
    }
}
