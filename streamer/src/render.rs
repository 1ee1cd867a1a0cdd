use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to decode annotated image: {0}")]
    Decode(image::ImageError),
    #[error("failed to write canvas to {0}: {1}")]
    Write(String, image::ImageError),
}

/// Decode an annotated image and scale it to `size` when the canvas is
/// already sized. CPU-bound; callers run it off the async workers.
pub fn prepare(encoded: &[u8], size: Option<(u32, u32)>) -> Result<RgbaImage, RenderError> {
    let decoded = image::load_from_memory(encoded)
        .map_err(RenderError::Decode)?
        .to_rgba8();
    Ok(fit(decoded, size))
}

fn fit(frame: RgbaImage, size: Option<(u32, u32)>) -> RgbaImage {
    match size {
        Some((w, h)) if frame.dimensions() != (w, h) => {
            image::imageops::resize(&frame, w, h, FilterType::Triangle)
        }
        _ => frame,
    }
}

/// Write a canvas snapshot as an image file; the format follows the extension.
pub fn save_frame(path: &Path, frame: &RgbaImage) -> Result<(), RenderError> {
    // JPEG has no alpha channel
    DynamicImage::ImageRgba8(frame.clone())
        .into_rgb8()
        .save(path)
        .map_err(|e| RenderError::Write(path.display().to_string(), e))
}

/// Display surface for annotated frames.
///
/// The first paint sizes the canvas to the image; later images of another
/// size are scaled to fit. With an output path, the owner mirrors every
/// paint to that file.
pub struct Canvas {
    bitmap: Option<RgbaImage>,
    paints: u64,
    output_path: Option<PathBuf>,
}

impl Canvas {
    pub fn new(output_path: Option<PathBuf>) -> Self {
        Self {
            bitmap: None,
            paints: 0,
            output_path,
        }
    }

    /// Swap in a frame produced by [`prepare`].
    pub fn present(&mut self, frame: RgbaImage) {
        let frame = match self.dimensions() {
            // sized again between prepare and present
            Some(size) => fit(frame, Some(size)),
            None => {
                debug!(width = frame.width(), height = frame.height(), "sizing canvas");
                frame
            }
        };
        self.bitmap = Some(frame);
        self.paints += 1;
    }

    /// Reset to the blank, unsized state.
    pub fn clear(&mut self) {
        self.bitmap = None;
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.bitmap.as_ref().map(|b| b.dimensions())
    }

    pub fn bitmap(&self) -> Option<&RgbaImage> {
        self.bitmap.as_ref()
    }

    pub fn paint_count(&self) -> u64 {
        self.paints
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }
}
