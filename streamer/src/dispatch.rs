use chrono::Utc;
use parking_lot::Mutex;
use relay_client::{ClientError, DetectClient};
use relay_common::frame::EncodedFrame;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::render::{self, Canvas};

/// Where sampled frames go for detection.
pub trait FrameBackend: Send + Sync + 'static {
    /// Returns the annotated JPEG for `frame`.
    fn process_frame(
        &self,
        frame: &EncodedFrame,
    ) -> impl Future<Output = Result<Vec<u8>, ClientError>> + Send;
}

impl FrameBackend for DetectClient {
    fn process_frame(
        &self,
        frame: &EncodedFrame,
    ) -> impl Future<Output = Result<Vec<u8>, ClientError>> + Send {
        self.process_video_frame(frame)
    }
}

/// At most one item in flight, at most one waiting.
///
/// A submission while busy replaces whatever was waiting, so the item sent
/// after a completion is always the newest one.
#[derive(Debug)]
pub struct SingleFlight<T> {
    pending: Option<T>,
    in_flight: bool,
    dropped: u64,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            pending: None,
            in_flight: false,
            dropped: 0,
        }
    }
}

impl<T> SingleFlight<T> {
    /// Returns the item back if it should be sent right now; otherwise it is
    /// queued in place of any older waiting item.
    pub fn submit(&mut self, item: T) -> Option<T> {
        if !self.in_flight {
            self.in_flight = true;
            return Some(item);
        }
        if self.pending.replace(item).is_some() {
            self.dropped += 1;
        }
        None
    }

    /// Mark the outstanding item done. Returns the next item to send, if one
    /// is waiting; the slot stays busy in that case.
    pub fn complete(&mut self) -> Option<T> {
        let next = self.pending.take();
        self.in_flight = next.is_some();
        next
    }

    /// Drop the waiting item, if any. The outstanding one is unaffected.
    pub fn clear_pending(&mut self) -> bool {
        let had = self.pending.take().is_some();
        if had {
            self.dropped += 1;
        }
        had
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Counters for the frame pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub sent: u64,
    pub dropped: u64,
    pub failed: u64,
    pub rendered: u64,
    pub discarded: u64,
}

struct Ticket {
    generation: u64,
    frame: EncodedFrame,
}

struct Inner<B> {
    backend: Arc<B>,
    canvas: Arc<Mutex<Canvas>>,
    slot: Mutex<SingleFlight<Ticket>>,
    /// Cleared on cancel; nothing is accepted or painted until resumed.
    active: AtomicBool,
    /// Bumped on cancel; results of older tickets are not rendered.
    generation: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    rendered: AtomicU64,
    discarded: AtomicU64,
}

/// Sends sampled frames to the backend one at a time and paints the
/// annotated results onto the canvas.
pub struct Dispatcher<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for Dispatcher<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: FrameBackend> Dispatcher<B> {
    pub fn new(backend: Arc<B>, canvas: Arc<Mutex<Canvas>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                canvas,
                slot: Mutex::new(SingleFlight::default()),
                active: AtomicBool::new(true),
                generation: AtomicU64::new(0),
                sent: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                rendered: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        }
    }

    /// Accept frames again after [`cancel`](Self::cancel). Returns the epoch
    /// that frames must carry to be accepted.
    pub fn resume(&self) -> u64 {
        let _slot = self.inner.slot.lock();
        self.inner.active.store(true, Ordering::SeqCst);
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Queue `frame` in the current epoch. See [`submit_for`](Self::submit_for).
    pub fn submit(&self, frame: EncodedFrame) -> bool {
        let epoch = self.inner.generation.load(Ordering::SeqCst);
        self.submit_for(epoch, frame)
    }

    /// Queue `frame`, superseding any frame still waiting. Sends right away
    /// when nothing is outstanding. Refused, returning `false`, once the
    /// dispatcher is cancelled or `epoch` is no longer current.
    ///
    /// Must be called within a tokio runtime.
    pub fn submit_for(&self, epoch: u64, frame: EncodedFrame) -> bool {
        let ready = {
            let mut slot = self.inner.slot.lock();
            if !self.inner.is_current(epoch) {
                debug!(seq = frame.seq, "dispatcher cancelled, frame refused");
                return false;
            }
            slot.submit(Ticket {
                generation: epoch,
                frame,
            })
        };
        if let Some(ticket) = ready {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(inner.drive(ticket));
        }
        true
    }

    /// Stop accepting frames, drop the waiting one and make the outstanding
    /// one's result stale.
    pub fn cancel(&self) {
        let mut slot = self.inner.slot.lock();
        self.inner.active.store(false, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if slot.clear_pending() {
            debug!("dropped queued frame on cancel");
        }
    }

    pub fn in_flight(&self) -> bool {
        self.inner.slot.lock().is_in_flight()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            sent: self.inner.sent.load(Ordering::Relaxed),
            dropped: self.inner.slot.lock().dropped(),
            failed: self.inner.failed.load(Ordering::Relaxed),
            rendered: self.inner.rendered.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
        }
    }
}

impl<B: FrameBackend> Inner<B> {
    fn is_current(&self, epoch: u64) -> bool {
        self.active.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == epoch
    }

    fn discard(&self, seq: u64) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        debug!(seq, "stream stopped, discarding result");
    }

    async fn drive(self: Arc<Self>, first: Ticket) {
        let mut ticket = first;
        loop {
            self.dispatch_one(ticket).await;
            let next = self.slot.lock().complete();
            match next {
                Some(t) => ticket = t,
                None => return,
            }
        }
    }

    async fn dispatch_one(&self, ticket: Ticket) {
        let Ticket { generation, frame } = ticket;
        self.sent.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        debug!(seq = frame.seq, bytes = frame.payload_size(), "sending frame");

        let annotated = match self.backend.process_frame(&frame).await {
            Ok(a) => a,
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    error = %e,
                    seq = frame.seq,
                    rejected = e.is_rejection(),
                    "frame detection failed"
                );
                return;
            }
        };

        if !self.is_current(generation) {
            self.discard(frame.seq);
            return;
        }

        let size = self.canvas.lock().dimensions();
        let prepared =
            tokio::task::spawn_blocking(move || render::prepare(&annotated, size)).await;
        let image = match prepared {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => {
                warn!(error = %e, seq = frame.seq, "failed to render annotated frame");
                return;
            }
            Err(e) => {
                error!(error = %e, "spawn_blocking failed");
                return;
            }
        };

        // Checked under the canvas lock: a concurrent stop either prevents
        // this paint or clears it afterwards.
        let mirror = {
            let mut canvas = self.canvas.lock();
            if !self.is_current(generation) {
                drop(canvas);
                self.discard(frame.seq);
                return;
            }
            canvas.present(image);
            canvas
                .output_path()
                .zip(canvas.bitmap())
                .map(|(path, bitmap)| (path.to_path_buf(), bitmap.clone()))
        };
        self.rendered.fetch_add(1, Ordering::Relaxed);
        debug!(
            seq = frame.seq,
            elapsed_ms = started.elapsed().as_millis() as u64,
            age_ms = frame.age_ms(Utc::now().timestamp_millis()),
            "rendered annotated frame"
        );

        if let Some((path, bitmap)) = mirror {
            match tokio::task::spawn_blocking(move || render::save_frame(&path, &bitmap)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "failed to mirror canvas"),
                Err(e) => error!(error = %e, "spawn_blocking failed"),
            }
        }
    }
}
