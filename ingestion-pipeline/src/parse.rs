use std::path::Path;

use bytes::Bytes;
use serde::Deserialize;
use tokio::time::{sleep, Duration, Instant};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{debug, info, warn};
use url::Url;

use common::{error::AppError, utils::config::AppConfig};

/// Client for the cloud parsing service's REST API. Parsing, OCR and table
/// extraction all happen on the service side; this client uploads the PDF,
/// polls the job and downloads the per-page results.
#[derive(Clone)]
pub struct ParseClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    parse_mode: String,
    high_res_ocr: bool,
    table_extraction: bool,
    tables_as_html: bool,
    poll_interval: Duration,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
pub struct ParseJob {
    pub id: String,
    #[serde(default)]
    pub status: Option<ParseJobStatus>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub enum ParseJobStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "CANCELED", alias = "CANCELLED")]
    Canceled,
}

impl ParseJobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ParseJobStatus::Pending)
    }
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    status: ParseJobStatus,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ParseResult {
    #[serde(default)]
    pub pages: Vec<ParsedPage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParsedPage {
    pub page: u32,
    #[serde(default)]
    pub md: String,
    #[serde(default)]
    pub images: Vec<PageImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageImage {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl ParsedPage {
    /// The full-page screenshot for this page, when the service produced
    /// one. Embedded figure crops are ignored.
    pub fn screenshot(&self) -> Option<&PageImage> {
        self.images
            .iter()
            .find(|image| image.kind.as_deref() == Some("full_page_screenshot"))
            .or_else(|| {
                self.images
                    .iter()
                    .find(|image| image.name.starts_with("page_"))
            })
    }
}

/// A fully parsed document: the job id (image downloads are keyed on it)
/// plus the per-page markdown and image descriptors.
#[derive(Debug)]
pub struct ParsedDocument {
    pub job_id: String,
    pub pages: Vec<ParsedPage>,
}

impl ParseClient {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let base_url = config.parse_base_url();
        Url::parse(&base_url)
            .map_err(|err| AppError::Validation(format!("Invalid parse base url: {err}")))?;

        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            api_key: config.parse_api_key.clone(),
            model: config.parse_model.clone(),
            parse_mode: config.parse_mode.clone(),
            high_res_ocr: config.parse_high_res_ocr,
            table_extraction: config.parse_table_extraction,
            tables_as_html: config.parse_tables_as_html,
            poll_interval: Duration::from_secs(config.parse_poll_interval_secs.max(1)),
            timeout: Duration::from_secs(config.parse_timeout_secs),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v1/parsing/{path}", self.base_url)
    }

    /// Uploads a PDF and waits for the service to finish parsing it.
    pub async fn parse_pdf(&self, pdf_path: &Path) -> Result<ParsedDocument, AppError> {
        let file_name = pdf_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());
        let pdf_bytes = tokio::fs::read(pdf_path).await?;

        let job = self.upload(pdf_bytes, &file_name).await?;
        info!(job_id = %job.id, %file_name, "Parse job submitted");

        self.wait_for_completion(&job.id).await?;

        let result = self.fetch_result(&job.id).await?;
        if result.pages.is_empty() {
            return Err(AppError::ParseService(format!(
                "Parse job {} returned no pages",
                job.id
            )));
        }

        debug!(job_id = %job.id, pages = result.pages.len(), "Parse job finished");

        Ok(ParsedDocument {
            job_id: job.id,
            pages: result.pages,
        })
    }

    async fn upload(&self, pdf_bytes: Vec<u8>, file_name: &str) -> Result<ParseJob, AppError> {
        let part = reqwest::multipart::Part::bytes(pdf_bytes)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")?;

        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("parse_mode", self.parse_mode.clone())
            .text("model", self.model.clone())
            .text("high_res_ocr", self.high_res_ocr.to_string())
            .text("outlined_table_extraction", self.table_extraction.to_string())
            .text("output_tables_as_HTML", self.tables_as_html.to_string());

        let response = self
            .http
            .post(self.endpoint("upload"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let response = check_service_response(response, "upload").await?;
        Ok(response.json().await?)
    }

    /// Polls the job until it leaves `PENDING`, or the configured timeout
    /// elapses. Transient poll failures are retried with backoff before
    /// counting as errors.
    async fn wait_for_completion(&self, job_id: &str) -> Result<(), AppError> {
        let deadline = Instant::now() + self.timeout;

        loop {
            let status = {
                let retry_strategy = ExponentialBackoff::from_millis(250).map(jitter).take(3);
                Retry::spawn(retry_strategy, || self.job_status(job_id)).await?
            };

            match status.status {
                ParseJobStatus::Success => return Ok(()),
                ParseJobStatus::Error | ParseJobStatus::Canceled => {
                    return Err(AppError::ParseService(format!(
                        "Parse job {job_id} ended as {:?}: {}",
                        status.status,
                        status.error_message.unwrap_or_else(|| "no details".into())
                    )));
                }
                ParseJobStatus::Pending => {
                    if Instant::now() >= deadline {
                        return Err(AppError::ParseService(format!(
                            "Parse job {job_id} timed out after {}s",
                            self.timeout.as_secs()
                        )));
                    }
                    debug!(%job_id, "Parse job still pending");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, AppError> {
        let response = self
            .http
            .get(self.endpoint(&format!("job/{job_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let response = check_service_response(response, "job status").await?;
        Ok(response.json().await?)
    }

    async fn fetch_result(&self, job_id: &str) -> Result<ParseResult, AppError> {
        let response = self
            .http
            .get(self.endpoint(&format!("job/{job_id}/result/json")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let response = check_service_response(response, "job result").await?;
        Ok(response.json().await?)
    }

    /// Downloads one result image (page screenshots among them).
    pub async fn fetch_image(&self, job_id: &str, image_name: &str) -> Result<Bytes, AppError> {
        let response = self
            .http
            .get(self.endpoint(&format!("job/{job_id}/result/image/{image_name}")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let response = check_service_response(response, "image download").await?;
        Ok(response.bytes().await?)
    }
}

/// Maps non-2xx service responses to a typed error carrying the body, which
/// is where the service puts its diagnostics.
async fn check_service_response(
    response: reqwest::Response,
    operation: &str,
) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    warn!(%status, operation, "Parse service request failed");
    Err(AppError::ParseService(format!(
        "{operation} failed with {status}: {body}"
    )))
}
