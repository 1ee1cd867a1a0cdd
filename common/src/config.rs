use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    /// Only the streamer needs a camera; the console runs without one.
    pub camera: Option<CameraConfig>,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub url: String,
    #[serde(default = "default_mode")]
    pub mode: CameraMode,
    #[serde(default = "default_quality")]
    pub quality: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraMode {
    /// Long-lived `multipart/x-mixed-replace` stream.
    Mjpeg,
    /// One JPEG per request, fetched at `fps`.
    Polling,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// When set, the canvas is written here after every paint.
    pub output_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            jpeg_quality: default_jpeg_quality(),
            output_path: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CameraConfig {
    /// URL of the MJPEG stream with the capture parameters appended.
    pub fn stream_url(&self) -> String {
        format!("{}?quality={}&fps={}", self.url, self.quality, self.fps)
    }

    /// URL of the single-frame snapshot endpoint.
    pub fn snapshot_url(&self) -> String {
        format!(
            "{}?quality={}",
            self.url.replace("/stream", "/frame"),
            self.quality
        )
    }

    /// Interval between snapshot requests in polling mode, between 1 ms
    /// and 10 s whatever `fps` holds.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(0.1)).max(Duration::from_millis(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl StreamConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// Default value functions
fn default_timeout_secs() -> u64 {
    30
}
fn default_mode() -> CameraMode {
    CameraMode::Mjpeg
}
fn default_quality() -> u32 {
    80
}
fn default_fps() -> f64 {
    10.0
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_sample_interval_ms() -> u64 {
    100
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = Config::parse(
            r#"
            [server]
            base_url = "http://localhost:8080"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.timeout_secs, 30);
        assert!(config.camera.is_none());
        assert_eq!(config.stream.sample_interval_ms, 100);
        assert_eq!(config.stream.jpeg_quality, 80);
        assert!(config.stream.output_path.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn camera_section_and_urls() {
        let config = Config::parse(
            r#"
            [server]
            base_url = "http://localhost:8080"

            [camera]
            url = "http://10.0.0.5:8081/stream"
            mode = "polling"
            quality = 60
            fps = 5.0
            "#,
        )
        .unwrap();
        let camera = config.camera.unwrap();
        assert_eq!(camera.mode, CameraMode::Polling);
        assert_eq!(camera.stream_url(), "http://10.0.0.5:8081/stream?quality=60&fps=5");
        assert_eq!(camera.snapshot_url(), "http://10.0.0.5:8081/frame?quality=60");
        assert_eq!(camera.poll_interval(), Duration::from_millis(200));
    }

    #[test]
    fn poll_interval_stays_positive_for_extreme_fps() {
        let camera_with_fps = |fps: &str| {
            Config::parse(&format!(
                "[server]\nbase_url = \"http://localhost:8080\"\n\
                 [camera]\nurl = \"http://cam/stream\"\nfps = {fps}\n"
            ))
            .unwrap()
            .camera
            .unwrap()
        };
        assert_eq!(camera_with_fps("inf").poll_interval(), Duration::from_millis(1));
        assert_eq!(camera_with_fps("5000.0").poll_interval(), Duration::from_millis(1));
        assert_eq!(camera_with_fps("nan").poll_interval(), Duration::from_secs(10));
        assert_eq!(camera_with_fps("-3.0").poll_interval(), Duration::from_secs(10));
    }

    #[test]
    fn unknown_camera_mode_is_rejected() {
        let result = Config::parse(
            r#"
            [server]
            base_url = "http://localhost:8080"
            [camera]
            url = "http://cam/stream"
            mode = "rtsp"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Config::load(Path::new("/nonexistent/relay.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/relay.toml"));
    }
}
