use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use relay_common::config::{CameraConfig, CameraMode};
use reqwest::{Response, StatusCode, Url};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";
/// Largest part the parser buffers before resyncing on the next boundary.
const MAX_PART_BYTES: usize = 8 * 1024 * 1024;

/// Why the camera could not be opened.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("camera access denied: {0}")]
    PermissionDenied(String),
    #[error("camera not found: {0}")]
    NotFound(String),
    #[error("camera busy: {0}")]
    Busy(String),
    #[error("camera cannot satisfy the requested settings: {0}")]
    Constraint(String),
    #[error("camera blocked by security policy: {0}")]
    Security(String),
    #[error("camera error: {0}")]
    Device(String),
}

impl CameraError {
    /// Message to show the user when starting the stream fails.
    pub fn user_message(&self) -> &'static str {
        match self {
            CameraError::PermissionDenied(_) => {
                "Camera access was denied. Check the camera's credentials and permissions."
            }
            CameraError::NotFound(_) => {
                "No camera found. Make sure the camera is connected and the URL is correct."
            }
            CameraError::Busy(_) => {
                "The camera is busy or not responding. Close other clients and try again."
            }
            CameraError::Constraint(_) => {
                "The camera does not support the requested settings. Adjust quality or fps."
            }
            CameraError::Security(_) => {
                "The camera URL is not allowed. Use an http or https camera address."
            }
            CameraError::Device(_) => {
                "Cannot access the camera. Make sure access is granted and the device is connected."
            }
        }
    }
}

/// Classify a non-success HTTP status from the camera.
pub fn classify_status(status: StatusCode) -> CameraError {
    let detail = status.to_string();
    match status.as_u16() {
        401 | 403 => CameraError::PermissionDenied(detail),
        404 => CameraError::NotFound(detail),
        409 | 423 | 429 | 503 => CameraError::Busy(detail),
        400 | 416 | 422 => CameraError::Constraint(detail),
        _ => CameraError::Device(detail),
    }
}

fn classify_request_error(e: &reqwest::Error) -> CameraError {
    if e.is_timeout() {
        CameraError::Busy(e.to_string())
    } else if e.is_connect() {
        CameraError::NotFound(e.to_string())
    } else {
        CameraError::Device(e.to_string())
    }
}

/// Latest-frame view of an open camera.
///
/// Holds the receiving end of a single-slot channel the camera reader keeps
/// overwriting with its newest JPEG, plus the reader task itself. Stopping
/// the track aborts the reader.
pub struct CameraTrack {
    frames: watch::Receiver<Option<Bytes>>,
    reader: Option<JoinHandle<()>>,
}

impl CameraTrack {
    pub fn new(frames: watch::Receiver<Option<Bytes>>, reader: Option<JoinHandle<()>>) -> Self {
        Self { frames, reader }
    }

    /// A new receiver for the latest frame. `None` until the camera has
    /// produced its first frame.
    pub fn frames(&self) -> watch::Receiver<Option<Bytes>> {
        self.frames.clone()
    }

    pub fn is_live(&self) -> bool {
        self.reader.as_ref().is_some_and(|r| !r.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for CameraTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Something that can be opened into a live [`CameraTrack`].
pub trait Camera: Send + Sync + 'static {
    fn open(&self) -> impl Future<Output = Result<CameraTrack, CameraError>> + Send;
}

/// Camera reachable over HTTP, either as an MJPEG stream or as a snapshot
/// endpoint polled at the configured fps.
pub struct HttpCamera {
    config: CameraConfig,
}

impl HttpCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }

    fn check_url(&self) -> Result<(), CameraError> {
        let url = Url::parse(&self.config.url)
            .map_err(|e| CameraError::Constraint(format!("invalid camera URL {}: {e}", self.config.url)))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(CameraError::Security(format!("unsupported scheme {other}"))),
        }
    }
}

impl Camera for HttpCamera {
    async fn open(&self) -> Result<CameraTrack, CameraError> {
        self.check_url()?;

        let client = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout())
            .build()
            .map_err(|e| CameraError::Device(e.to_string()))?;
        let (tx, rx) = watch::channel(None);

        let reader = match self.config.mode {
            CameraMode::Mjpeg => {
                let url = self.config.stream_url();
                info!(url, "opening MJPEG camera stream");
                let response = connect(&client, &url).await?;
                tokio::spawn(run_mjpeg_reader(client, url, response, tx))
            }
            CameraMode::Polling => {
                let url = self.config.snapshot_url();
                info!(url, "opening polling camera");
                let first = fetch_snapshot(&client, &url).await?;
                tx.send_replace(Some(first));
                let interval = self.config.poll_interval();
                tokio::spawn(run_polling_reader(client, url, interval, tx))
            }
        };

        Ok(CameraTrack::new(rx, Some(reader)))
    }
}

async fn connect(client: &reqwest::Client, url: &str) -> Result<Response, CameraError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| classify_request_error(&e))?;
    if !response.status().is_success() {
        return Err(classify_status(response.status()));
    }
    Ok(response)
}

async fn fetch_snapshot(client: &reqwest::Client, url: &str) -> Result<Bytes, CameraError> {
    connect(client, url)
        .await?
        .bytes()
        .await
        .map_err(|e| CameraError::Device(e.to_string()))
}

/// Keep the latest MJPEG frame published, reconnecting with exponential
/// backoff when the stream drops. Exits once nobody holds a receiver.
async fn run_mjpeg_reader(
    client: reqwest::Client,
    url: String,
    first: Response,
    tx: watch::Sender<Option<Bytes>>,
) {
    let mut pending = Some(first);
    let mut backoff = Duration::from_secs(2);
    let max_backoff = Duration::from_secs(30);

    loop {
        let response = match pending.take() {
            Some(r) => Ok(r),
            None => connect(&client, &url).await,
        };
        let outcome = match response {
            Ok(r) => {
                backoff = Duration::from_secs(2);
                pump_mjpeg(r, &tx).await
            }
            Err(e) => Err(e),
        };

        if tx.is_closed() {
            debug!("camera track released, stopping MJPEG reader");
            return;
        }
        match outcome {
            Ok(()) => info!("camera stream ended, reconnecting in {:?}", backoff),
            Err(e) => error!(error = %e, "camera stream error, reconnecting in {:?}", backoff),
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

async fn pump_mjpeg(
    response: Response,
    tx: &watch::Sender<Option<Bytes>>,
) -> Result<(), CameraError> {
    info!(status = %response.status(), "connected to MJPEG stream");
    let mut byte_stream = response.bytes_stream();
    let mut parser = MjpegParser::new();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(|e| CameraError::Device(e.to_string()))?;
        for jpeg in parser.push(&chunk) {
            debug!(bytes = jpeg.len(), "camera frame");
            tx.send_replace(Some(jpeg));
        }
        if tx.is_closed() {
            return Ok(());
        }
    }
    Ok(())
}

async fn run_polling_reader(
    client: reqwest::Client,
    url: String,
    interval: Duration,
    tx: watch::Sender<Option<Bytes>>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; the open call already fetched that frame.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if tx.is_closed() {
            debug!("camera track released, stopping snapshot polling");
            return;
        }
        match fetch_snapshot(&client, &url).await {
            Ok(jpeg) => {
                tx.send_replace(Some(jpeg));
            }
            Err(e) => warn!(error = %e, "failed to fetch camera snapshot"),
        }
    }
}

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for a `--frame` delimited MJPEG byte stream.
pub struct MjpegParser {
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
    max_part: usize,
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MjpegParser {
    pub fn new() -> Self {
        Self::with_limit(MAX_PART_BYTES)
    }

    /// Parser that gives up on any part longer than `max_part` bytes.
    pub fn with_limit(max_part: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_part.min(256 * 1024)),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
            max_part,
        }
    }

    /// Drop a runaway part, keeping only a tail that may hold the start of
    /// the next boundary.
    fn resync(&mut self) {
        warn!(
            buffered = self.buffer.len(),
            limit = self.max_part,
            "MJPEG part exceeds limit, resyncing"
        );
        if self.buffer.len() > BOUNDARY.len() {
            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
        }
        self.jpeg_start = 0;
        self.state = ParseState::SeekingBoundary;
    }

    /// Feed one network chunk; returns every JPEG completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep the tail in case the boundary spans chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        if self.buffer.len() > self.max_part {
                            self.resync();
                        }
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY)
                    else {
                        if self.buffer.len() > self.max_part {
                            self.resync();
                        } else {
                            // Skip already scanned bytes next time
                            self.jpeg_start = self.buffer.len().saturating_sub(BOUNDARY.len());
                        }
                        break;
                    };
                    let jpeg_end = self.jpeg_start + pos;
                    // Strip trailing \r\n before boundary
                    let end = if self.buffer[..jpeg_end].ends_with(b"\r\n") {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };

                    let part = self.buffer.split_to(jpeg_end + BOUNDARY.len());
                    if end > 0 {
                        frames.push(part.freeze().slice(..end));
                    }
                    self.state = ParseState::SeekingHeaderEnd;
                }
            }
        }

        frames
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, StatusCode as AxumStatus};
    use axum::routing::get;
    use axum::Router;

    fn part(jpeg: &[u8]) -> Vec<u8> {
        let mut out = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        out.extend_from_slice(jpeg);
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn parser_emits_frame_once_next_boundary_arrives() {
        let mut parser = MjpegParser::new();
        assert!(parser.push(&part(&[0xFF, 0xD8, 1, 2, 0xFF, 0xD9])).is_empty());
        let frames = parser.push(&part(&[0xFF, 0xD8, 3, 0xFF, 0xD9]));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), &[0xFF, 0xD8, 1, 2, 0xFF, 0xD9]);
    }

    #[test]
    fn parser_handles_byte_by_byte_chunks() {
        let mut stream = b"garbage before the first part".to_vec();
        stream.extend(part(b"first"));
        stream.extend(part(b"second"));
        stream.extend_from_slice(BOUNDARY);

        let mut parser = MjpegParser::new();
        let frames: Vec<Bytes> = stream.iter().flat_map(|b| parser.push(&[*b])).collect();
        assert_eq!(frames, vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")]);
    }

    #[test]
    fn parser_resyncs_after_oversized_part() {
        let mut parser = MjpegParser::with_limit(64);
        let mut runaway = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        runaway.extend(std::iter::repeat(0xAB).take(200));
        assert!(parser.push(&runaway).is_empty());
        assert!(parser.buffer.len() <= BOUNDARY.len());
        assert!(matches!(parser.state, ParseState::SeekingBoundary));

        assert!(parser.push(&part(b"ok")).is_empty());
        assert_eq!(parser.push(BOUNDARY), vec![Bytes::from_static(b"ok")]);
    }

    #[test]
    fn status_classification() {
        assert!(matches!(classify_status(StatusCode::FORBIDDEN), CameraError::PermissionDenied(_)));
        assert!(matches!(classify_status(StatusCode::UNAUTHORIZED), CameraError::PermissionDenied(_)));
        assert!(matches!(classify_status(StatusCode::NOT_FOUND), CameraError::NotFound(_)));
        assert!(matches!(classify_status(StatusCode::SERVICE_UNAVAILABLE), CameraError::Busy(_)));
        assert!(matches!(classify_status(StatusCode::BAD_REQUEST), CameraError::Constraint(_)));
        assert!(matches!(classify_status(StatusCode::INTERNAL_SERVER_ERROR), CameraError::Device(_)));
    }

    fn camera(url: String, mode: CameraMode) -> HttpCamera {
        HttpCamera::new(CameraConfig {
            url,
            mode,
            quality: 80,
            fps: 20.0,
            connect_timeout_secs: 2,
        })
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn non_http_scheme_is_security_error() {
        let err = camera("rtsp://10.0.0.2/stream".into(), CameraMode::Mjpeg)
            .open()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CameraError::Security(_)));
    }

    #[tokio::test]
    async fn unparsable_url_is_constraint_error() {
        let err = camera("not a url".into(), CameraMode::Mjpeg).open().await.err().unwrap();
        assert!(matches!(err, CameraError::Constraint(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_not_found() {
        let err = camera("http://127.0.0.1:9/stream".into(), CameraMode::Mjpeg)
            .open()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CameraError::NotFound(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn forbidden_camera_is_permission_denied() {
        let app = Router::new().route("/stream", get(|| async { AxumStatus::FORBIDDEN }));
        let base = serve(app).await;
        let err = camera(format!("{base}/stream"), CameraMode::Mjpeg)
            .open()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CameraError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn polling_camera_publishes_first_snapshot() {
        let app = Router::new().route("/frame", get(|| async { vec![0xFFu8, 0xD8, 0xFF, 0xD9] }));
        let base = serve(app).await;
        let mut track = camera(format!("{base}/stream"), CameraMode::Polling)
            .open()
            .await
            .unwrap();

        let frames = track.frames();
        assert_eq!(frames.borrow().as_deref(), Some(&[0xFF, 0xD8, 0xFF, 0xD9][..]));
        assert!(track.is_live());
        track.stop();
        assert!(!track.is_live());
    }

    #[tokio::test]
    async fn mjpeg_camera_publishes_parsed_frames() {
        let mut body = part(b"jpeg-one");
        body.extend(part(b"jpeg-two"));
        body.extend_from_slice(BOUNDARY);
        let app = Router::new().route(
            "/stream",
            get(move || {
                let body = body.clone();
                async move {
                    (
                        [(header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame")],
                        body,
                    )
                }
            }),
        );
        let base = serve(app).await;
        let track = camera(format!("{base}/stream"), CameraMode::Mjpeg)
            .open()
            .await
            .unwrap();

        let mut frames = track.frames();
        let latest = tokio::time::timeout(
            Duration::from_secs(2),
            frames.wait_for(|f| f.as_deref() == Some(&b"jpeg-two"[..])),
        )
        .await;
        assert!(latest.is_ok(), "second frame never published");
    }
}
