use parking_lot::Mutex;
use relay_common::config::StreamConfig;
use relay_common::frame::EncodedFrame;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::camera::{Camera, CameraError, CameraTrack};
use crate::dispatch::{Dispatcher, FrameBackend};
use crate::render::Canvas;
use crate::sampler::{run_sampler, Sampler};

/// Owns one live-detection session: the camera track, the sample timer,
/// the dispatcher and the canvas results are painted on.
pub struct StreamSession<C, B> {
    camera: C,
    dispatcher: Dispatcher<B>,
    canvas: Arc<Mutex<Canvas>>,
    sample_interval: Duration,
    jpeg_quality: u8,
    track: Option<CameraTrack>,
    timer: Option<JoinHandle<()>>,
    streaming: bool,
    notice: Option<String>,
}

impl<C: Camera, B: FrameBackend> StreamSession<C, B> {
    pub fn new(camera: C, backend: Arc<B>, stream: &StreamConfig) -> Self {
        let canvas = Arc::new(Mutex::new(Canvas::new(stream.output_path.clone())));
        Self {
            camera,
            dispatcher: Dispatcher::new(backend, Arc::clone(&canvas)),
            canvas,
            sample_interval: stream.sample_interval(),
            jpeg_quality: stream.jpeg_quality,
            track: None,
            timer: None,
            streaming: false,
            notice: None,
        }
    }

    /// Open the camera and start sampling. No-op while already streaming.
    ///
    /// On failure the classified error is returned and its user-facing
    /// message is kept as the session notice.
    pub async fn start(&mut self) -> Result<(), CameraError> {
        if self.streaming {
            return Ok(());
        }

        let track = match self.camera.open().await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "failed to open camera");
                self.notice = Some(e.user_message().to_string());
                return Err(e);
            }
        };

        let epoch = self.dispatcher.resume();
        let timer = tokio::spawn(run_sampler(
            track.frames(),
            self.dispatcher.clone(),
            Sampler::new(self.jpeg_quality),
            self.sample_interval,
            epoch,
        ));

        self.track = Some(track);
        self.timer = Some(timer);
        self.streaming = true;
        self.notice = None;
        info!(interval_ms = self.sample_interval.as_millis() as u64, "stream started");
        Ok(())
    }

    /// Stop sampling, release the camera and blank the canvas. Results
    /// still in flight are discarded, and nothing is painted after this
    /// returns. No-op when not streaming.
    pub fn stop(&mut self) {
        if !self.streaming {
            return;
        }
        self.streaming = false;
        self.dispatcher.cancel();

        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(mut track) = self.track.take() {
            track.stop();
        }
        self.canvas.lock().clear();

        let stats = self.dispatcher.stats();
        info!(
            sent = stats.sent,
            rendered = stats.rendered,
            dropped = stats.dropped,
            failed = stats.failed,
            "stream stopped"
        );
    }

    /// Hand a frame to the dispatcher directly, bypassing the sampler.
    /// Refused after `stop()` until the next `start()`.
    pub fn submit_frame(&self, frame: EncodedFrame) -> bool {
        self.dispatcher.submit(frame)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn has_active_timer(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn active_tracks(&self) -> usize {
        self.track.iter().filter(|t| t.is_live()).count()
    }

    /// Last user-facing message, set when starting fails.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn dispatcher(&self) -> &Dispatcher<B> {
        &self.dispatcher
    }

    pub fn canvas(&self) -> Arc<Mutex<Canvas>> {
        Arc::clone(&self.canvas)
    }
}

impl<C, B> Drop for StreamSession<C, B> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(mut track) = self.track.take() {
            track.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::tests::test_jpeg;
    use bytes::Bytes;
    use relay_client::ClientError;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::watch;

    /// Camera that republishes one JPEG every few milliseconds.
    struct FakeCamera {
        opened: Arc<AtomicUsize>,
        fail_with: Option<fn() -> CameraError>,
        size: (u32, u32),
    }

    impl FakeCamera {
        fn working() -> Self {
            Self {
                opened: Arc::new(AtomicUsize::new(0)),
                fail_with: None,
                size: (24, 16),
            }
        }
    }

    impl Camera for FakeCamera {
        fn open(&self) -> impl Future<Output = Result<CameraTrack, CameraError>> + Send {
            let opened = Arc::clone(&self.opened);
            let fail_with = self.fail_with;
            let (width, height) = self.size;
            async move {
                if let Some(make_err) = fail_with {
                    return Err(make_err());
                }
                opened.fetch_add(1, Ordering::SeqCst);
                let (tx, rx) = watch::channel(None);
                let jpeg = Bytes::from(test_jpeg(width, height));
                let reader = tokio::spawn(async move {
                    loop {
                        tx.send_replace(Some(jpeg.clone()));
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                });
                Ok(CameraTrack::new(rx, Some(reader)))
            }
        }
    }

    /// Echoes each frame back as its own annotation.
    struct EchoBackend {
        calls: AtomicUsize,
    }

    impl FrameBackend for EchoBackend {
        fn process_frame(
            &self,
            frame: &EncodedFrame,
        ) -> impl Future<Output = Result<Vec<u8>, ClientError>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let jpeg = frame.jpeg.clone();
            async move { Ok(jpeg) }
        }
    }

    fn stream_config(sample_interval_ms: u64) -> StreamConfig {
        StreamConfig {
            sample_interval_ms,
            jpeg_quality: 70,
            output_path: None,
        }
    }

    fn session_with_interval(
        camera: FakeCamera,
        sample_interval_ms: u64,
    ) -> StreamSession<FakeCamera, EchoBackend> {
        let backend = Arc::new(EchoBackend {
            calls: AtomicUsize::new(0),
        });
        StreamSession::new(camera, backend, &stream_config(sample_interval_ms))
    }

    fn session(camera: FakeCamera) -> StreamSession<FakeCamera, EchoBackend> {
        session_with_interval(camera, 10)
    }

    #[tokio::test]
    async fn start_paints_camera_frames_and_is_idempotent() {
        let camera = FakeCamera::working();
        let opened = Arc::clone(&camera.opened);
        let mut session = session(camera);

        session.start().await.unwrap();
        session.start().await.unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert!(session.is_streaming());
        assert!(session.has_active_timer());
        assert_eq!(session.active_tracks(), 1);

        let canvas = session.canvas();
        tokio::time::timeout(Duration::from_secs(2), async {
            while canvas.lock().dimensions().is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("no frame was rendered");
        assert_eq!(canvas.lock().dimensions(), Some((24, 16)));
    }

    #[tokio::test]
    async fn stop_releases_timer_and_tracks() {
        let mut session = session(FakeCamera::working());
        session.start().await.unwrap();

        session.stop();
        assert!(!session.is_streaming());
        assert!(!session.has_active_timer());
        assert_eq!(session.active_tracks(), 0);
        assert!(session.canvas().lock().dimensions().is_none());

        session.stop();
        assert!(!session.has_active_timer());
        assert_eq!(session.active_tracks(), 0);
    }

    #[tokio::test]
    async fn no_paints_after_stop() {
        let mut session = session(FakeCamera::working());
        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.stop();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(session.canvas().lock().dimensions().is_none());
    }

    #[tokio::test]
    async fn restart_after_stop_opens_camera_again() {
        let camera = FakeCamera::working();
        let opened = Arc::clone(&camera.opened);
        let mut session = session(camera);

        session.start().await.unwrap();
        session.stop();
        session.start().await.unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_eq!(session.active_tracks(), 1);
    }

    #[tokio::test]
    async fn camera_failure_sets_notice_and_stays_stopped() {
        let camera = FakeCamera {
            opened: Arc::new(AtomicUsize::new(0)),
            fail_with: Some(|| CameraError::PermissionDenied("403 Forbidden".into())),
            size: (24, 16),
        };
        let mut session = session(camera);

        let err = session.start().await.unwrap_err();
        assert!(matches!(err, CameraError::PermissionDenied(_)));
        assert_eq!(session.notice(), Some(err.user_message()));
        assert!(!session.is_streaming());
        assert!(!session.has_active_timer());
        assert_eq!(session.active_tracks(), 0);
    }

    #[tokio::test]
    async fn submitted_frame_is_rendered_without_camera() {
        let session = session(FakeCamera::working());
        session.submit_frame(EncodedFrame::new(test_jpeg(8, 6), 8, 6, 0, 0));

        let canvas = session.canvas();
        tokio::time::timeout(Duration::from_secs(2), async {
            while canvas.lock().paint_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("submitted frame was not rendered");
        assert_eq!(canvas.lock().dimensions(), Some((8, 6)));
    }

    #[tokio::test]
    async fn submit_frame_is_refused_after_stop() {
        let mut session = session(FakeCamera::working());
        session.start().await.unwrap();
        session.stop();

        assert!(!session.submit_frame(EncodedFrame::new(test_jpeg(8, 6), 8, 6, 0, 0)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(session.canvas().lock().dimensions().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn nothing_is_painted_after_stop_on_worker_threads() {
        let camera = FakeCamera {
            size: (640, 360),
            ..FakeCamera::working()
        };
        let mut session = session_with_interval(camera, 1);
        let canvas = session.canvas();

        for (round, run_ms) in [20u64, 35, 50, 60, 25, 45].into_iter().enumerate() {
            session.start().await.unwrap();
            tokio::time::sleep(Duration::from_millis(run_ms)).await;
            session.stop();

            let paints = canvas.lock().paint_count();
            tokio::time::sleep(Duration::from_millis(300)).await;
            let canvas = canvas.lock();
            assert_eq!(
                canvas.paint_count(),
                paints,
                "round {round}: painted after stop"
            );
            assert!(canvas.dimensions().is_none(), "round {round}: canvas not blank");
        }
    }
}
