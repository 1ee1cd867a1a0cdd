use relay_common::config::ServerConfig;
use relay_common::frame::EncodedFrame;
use relay_common::reply::{
    decode_data_url, parse_frame_reply, parse_image_reply, ImageReply, SwitchReply, SwitchRequest,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Response, Url};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ClientError;

const AVAILABLE_MODELS: &str = "api/models/available-models";
const AVAILABLE_CLASSES: &str = "api/models/available-classes";
const SWITCH_MODEL: &str = "api/models/switch-model";
const DETECT_IMAGE: &str = "detect-image";
const PROCESS_VIDEO_FRAME: &str = "process-video-frame";

/// Typed access to the detection service endpoints.
#[derive(Debug, Clone)]
pub struct DetectClient {
    http: reqwest::Client,
    base_url: Url,
}

impl DetectClient {
    pub fn new(config: &ServerConfig) -> Result<Self, ClientError> {
        Self::with_timeout(&config.base_url, config.timeout())
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        // Endpoint paths are relative, so the base must end in '/' to keep any path prefix.
        let mut normalized = base_url.to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base_url = Url::parse(&normalized)
            .map_err(|e| ClientError::BaseUrl(base_url.to_string(), e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ClientError::BaseUrl(path.to_string(), e.to_string()))
    }

    /// `GET /api/models/available-models`
    pub async fn available_models(&self) -> Result<Vec<String>, ClientError> {
        self.get_list(AVAILABLE_MODELS).await
    }

    /// `GET /api/models/available-classes`
    pub async fn available_classes(&self) -> Result<Vec<String>, ClientError> {
        self.get_list(AVAILABLE_CLASSES).await
    }

    async fn get_list(&self, path: &str) -> Result<Vec<String>, ClientError> {
        let response = self
            .http
            .get(self.endpoint(path)?)
            .send()
            .await
            .map_err(ClientError::Http)?;
        let list: Vec<String> = check_status(response)?
            .json()
            .await
            .map_err(|e| ClientError::Malformed(e.to_string()))?;
        debug!(path, count = list.len(), "fetched option list");
        Ok(list)
    }

    /// Switch the service to another model and class list.
    ///
    /// Both names are required; an empty one fails without touching the
    /// network. Returns the service's confirmation message.
    pub async fn switch_model(
        &self,
        model_name: &str,
        classes_name: &str,
    ) -> Result<String, ClientError> {
        if model_name.is_empty() || classes_name.is_empty() {
            return Err(ClientError::MissingSelection);
        }

        let body = SwitchRequest {
            model_name: model_name.to_string(),
            classes_name: classes_name.to_string(),
        };
        let response = self
            .http
            .post(self.endpoint(SWITCH_MODEL)?)
            .json(&body)
            .send()
            .await
            .map_err(ClientError::Http)?;
        let reply: SwitchReply = check_status(response)?
            .json()
            .await
            .map_err(|e| ClientError::Malformed(e.to_string()))?;

        let message = reply.into_result()?;
        info!(model = model_name, classes = classes_name, "model switched");
        Ok(message)
    }

    /// Upload one image for detection as multipart field `file`.
    pub async fn detect_image(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<ImageReply, ClientError> {
        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(relay_common::frame::mime_for_file_name(file_name))
            .map_err(ClientError::Http)?;
        let form = Form::new().part("file", part);

        debug!(file_name, size, "uploading image for detection");
        let response = self
            .http
            .post(self.endpoint(DETECT_IMAGE)?)
            .multipart(form)
            .send()
            .await
            .map_err(ClientError::Http)?;
        let body = check_status(response)?
            .text()
            .await
            .map_err(ClientError::Http)?;

        Ok(parse_image_reply(&body)?)
    }

    /// Send one sampled frame and return the annotated JPEG bytes.
    pub async fn process_video_frame(&self, frame: &EncodedFrame) -> Result<Vec<u8>, ClientError> {
        let encoded = frame.to_base64();
        let response = self
            .http
            .post(self.endpoint(PROCESS_VIDEO_FRAME)?)
            .form(&[("frame", encoded.as_str())])
            .send()
            .await
            .map_err(ClientError::Http)?;
        let body = check_status(response)?
            .text()
            .await
            .map_err(ClientError::Http)?;

        Ok(parse_frame_reply(&body)?)
    }

    /// Resolve an image reference from `detect_image` to raw bytes.
    ///
    /// Inline `data:` URLs are decoded locally; anything else is fetched
    /// relative to the service's base URL.
    pub async fn fetch_reference(&self, src: &str) -> Result<Vec<u8>, ClientError> {
        if let Some(decoded) = decode_data_url(src) {
            return Ok(decoded?);
        }

        let url = self.endpoint(src)?;
        debug!(%url, "fetching result image");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(ClientError::Http)?;
        let bytes = check_status(response)?
            .bytes()
            .await
            .map_err(ClientError::Http)?;
        Ok(bytes.to_vec())
    }
}

fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        warn!(%status, url = %response.url(), "non-success response from detection service");
        Err(ClientError::HttpStatus(status))
    }
}
