use relay_client::{ClientError, DetectClient};
use relay_common::frame::{data_url, mime_for_file_name};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

pub const DEFAULT_DOWNLOAD_NAME: &str = "detection_result.jpg";
const NO_SELECTION_LABEL: &str = "No image selected";

#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("failed to read {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to write {0}: {1}")]
    WriteFile(String, std::io::Error),
    #[error("no detection result to download")]
    NothingToDownload,
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// What the result area currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultView {
    Placeholder,
    Detecting,
    Image { src: String },
    Failed { message: String },
}

struct Selection {
    name: String,
    bytes: Vec<u8>,
}

/// Still-image detection: pick a file, preview it, detect, download.
pub struct ImagePanel {
    selection: Option<Selection>,
    label: String,
    preview: Option<String>,
    result: ResultView,
    last_result: Option<String>,
}

impl Default for ImagePanel {
    fn default() -> Self {
        Self::new()
    }
}

impl ImagePanel {
    pub fn new() -> Self {
        Self {
            selection: None,
            label: NO_SELECTION_LABEL.to_string(),
            preview: None,
            result: ResultView::Placeholder,
            last_result: None,
        }
    }

    pub fn select_file(&mut self, path: &Path) -> Result<(), PanelError> {
        let bytes =
            std::fs::read(path).map_err(|e| PanelError::ReadFile(path.display().to_string(), e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.select_bytes(name, bytes);
        Ok(())
    }

    /// Take an image that did not come from disk, e.g. one dropped onto the panel.
    pub fn select_bytes(&mut self, name: String, bytes: Vec<u8>) {
        debug!(name, size = bytes.len(), "image selected");
        self.label = format!("Selected: {name}");
        self.preview = Some(data_url(mime_for_file_name(&name), &bytes));
        self.result = ResultView::Placeholder;
        self.selection = Some(Selection { name, bytes });
    }

    pub fn can_detect(&self) -> bool {
        self.selection.is_some() && self.result != ResultView::Detecting
    }

    /// Upload the selected image once and show the outcome.
    pub async fn detect(&mut self, client: &DetectClient) -> &ResultView {
        let Some(selection) = &self.selection else {
            return &self.result;
        };
        let name = selection.name.clone();
        let bytes = selection.bytes.clone();

        self.result = ResultView::Detecting;
        self.result = match client.detect_image(&name, bytes).await {
            Ok(reply) => {
                info!(name, "detection finished");
                self.last_result = Some(reply.src.clone());
                ResultView::Image { src: reply.src }
            }
            Err(e) => {
                error!(error = %e, name, "detection failed");
                ResultView::Failed {
                    message: e.to_string(),
                }
            }
        };
        &self.result
    }

    /// Save the last detected image. A directory destination gets the
    /// default file name.
    pub async fn download(
        &self,
        client: &DetectClient,
        dest: &Path,
    ) -> Result<PathBuf, PanelError> {
        let src = self.last_result.as_deref().ok_or(PanelError::NothingToDownload)?;
        let bytes = client.fetch_reference(src).await?;

        let path = if dest.is_dir() {
            dest.join(DEFAULT_DOWNLOAD_NAME)
        } else {
            dest.to_path_buf()
        };
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| PanelError::WriteFile(path.display().to_string(), e))?;
        info!(path = %path.display(), size = bytes.len(), "detection result saved");
        Ok(path)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn preview(&self) -> Option<&str> {
        self.preview.as_deref()
    }

    pub fn result(&self) -> &ResultView {
        &self.result
    }
}
