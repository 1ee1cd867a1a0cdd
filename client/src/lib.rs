//! HTTP client for the detection service.

mod client;
mod error;

pub use client::DetectClient;
pub use error::ClientError;
