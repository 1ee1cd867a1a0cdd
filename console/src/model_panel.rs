use relay_client::{ClientError, DetectClient};
use tracing::{error, info, warn};

use crate::notice::Notice;

/// Model management: the option lists and the current selection.
#[derive(Debug, Default)]
pub struct ModelPanel {
    models: Vec<String>,
    classes: Vec<String>,
    selected_model: String,
    selected_classes: String,
}

impl ModelPanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch both option lists. A failed list is logged and left empty;
    /// the first entry of each list becomes the selection.
    pub async fn load(&mut self, client: &DetectClient) {
        self.models = client.available_models().await.unwrap_or_else(|e| {
            error!(error = %e, "failed to load available models");
            Vec::new()
        });
        self.classes = client.available_classes().await.unwrap_or_else(|e| {
            error!(error = %e, "failed to load available classes files");
            Vec::new()
        });
        self.selected_model = self.models.first().cloned().unwrap_or_default();
        self.selected_classes = self.classes.first().cloned().unwrap_or_default();
        info!(models = self.models.len(), classes = self.classes.len(), "model options loaded");
    }

    pub fn select_model(&mut self, name: &str) {
        if !self.models.is_empty() && !self.models.iter().any(|m| m == name) {
            warn!(model = name, "model is not in the available list");
        }
        self.selected_model = name.to_string();
    }

    pub fn select_classes(&mut self, name: &str) {
        if !self.classes.is_empty() && !self.classes.iter().any(|c| c == name) {
            warn!(classes = name, "classes file is not in the available list");
        }
        self.selected_classes = name.to_string();
    }

    /// Ask the service to switch to the selected model and classes file.
    pub async fn switch(&self, client: &DetectClient) -> Notice {
        match client
            .switch_model(&self.selected_model, &self.selected_classes)
            .await
        {
            Ok(message) => Notice::Info(format!("Model switched: {message}")),
            Err(ClientError::MissingSelection) => {
                Notice::Error("select a model and a classes file".into())
            }
            Err(e) => {
                error!(error = %e, "model switch failed");
                Notice::Error(format!("Model switch failed: {e}"))
            }
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn selected_model(&self) -> &str {
        &self.selected_model
    }

    pub fn selected_classes(&self) -> &str {
        &self.selected_classes
    }
}
