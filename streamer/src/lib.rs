//! Live detection pipeline: camera capture, frame sampling, single-flight
//! dispatch to the detection service and rendering of annotated results.
//!
//! - [`camera`]: HTTP camera tracks and camera error classification
//! - [`sampler`]: timer that re-encodes the latest camera frame
//! - [`dispatch`]: at most one frame in flight, newest waiting frame wins
//! - [`render`]: canvas the annotated results are painted on
//! - [`session`]: start/stop lifecycle tying the above together

pub mod camera;
pub mod dispatch;
pub mod render;
pub mod sampler;
pub mod session;
