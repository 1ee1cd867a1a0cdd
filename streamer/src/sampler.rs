use bytes::Bytes;
use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use relay_common::frame::EncodedFrame;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, trace};

use crate::dispatch::{Dispatcher, FrameBackend};

/// Turns the camera's current picture into an [`EncodedFrame`].
pub struct Sampler {
    quality: u8,
    next_seq: u64,
}

impl Sampler {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            next_seq: 0,
        }
    }

    /// Re-encode one camera image at the configured quality.
    ///
    /// Returns `None` when the camera bytes are not a decodable image yet.
    pub fn encode(&mut self, camera_image: &[u8]) -> Option<EncodedFrame> {
        let decoded = match image::load_from_memory(camera_image) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                debug!(error = %e, bytes = camera_image.len(), "camera frame not decodable, skipping");
                return None;
            }
        };
        let (width, height) = decoded.dimensions();

        let mut jpeg = Vec::with_capacity(camera_image.len());
        let encoder = JpegEncoder::new_with_quality(&mut jpeg, self.quality);
        if let Err(e) = decoded.write_with_encoder(encoder) {
            debug!(error = %e, "JPEG encoding failed, skipping frame");
            return None;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        Some(EncodedFrame::new(
            jpeg,
            width,
            height,
            Utc::now().timestamp_millis(),
            seq,
        ))
    }
}

/// Sample timer: every `interval`, encode the camera's latest frame and
/// hand it to the dispatcher under `epoch`. Ticks before the first camera
/// frame are no-ops. Exits once the dispatcher refuses the epoch.
pub async fn run_sampler<B: FrameBackend>(
    frames: watch::Receiver<Option<Bytes>>,
    dispatcher: Dispatcher<B>,
    mut sampler: Sampler,
    interval: Duration,
    epoch: u64,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let current = frames.borrow().clone();
        let Some(camera_image) = current else {
            trace!("no camera frame yet");
            continue;
        };

        let encoded = tokio::task::spawn_blocking(move || {
            let frame = sampler.encode(&camera_image);
            (sampler, frame)
        })
        .await;
        let frame = match encoded {
            Ok((returned, frame)) => {
                sampler = returned;
                frame
            }
            Err(e) => {
                error!(error = %e, "spawn_blocking failed, sampler exiting");
                return;
            }
        };

        if let Some(frame) = frame {
            if !dispatcher.submit_for(epoch, frame) {
                debug!("dispatcher cancelled, sampler exiting");
                return;
            }
        }
    }
}
