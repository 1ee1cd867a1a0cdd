use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// One sampled camera frame, JPEG-encoded and ready to send for detection.
///
/// Frames are ephemeral: the sampler produces them, the dispatcher sends
/// each at most once, and nothing keeps them afterwards.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl EncodedFrame {
    pub fn new(jpeg: Vec<u8>, width: u32, height: u32, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            jpeg,
            width,
            height,
            captured_at_ms,
            seq,
        }
    }

    /// Size of the JPEG payload in bytes.
    pub fn payload_size(&self) -> usize {
        self.jpeg.len()
    }

    /// Base64 of the JPEG bytes, as the `frame` form field expects it.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.jpeg)
    }

    /// Age of the frame relative to `now_ms`, clamped at zero.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.captured_at_ms).max(0)
    }
}

/// Build a `data:` URL for an image, the form previews and results take.
pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Guess an image MIME type from a file name's extension.
pub fn mime_for_file_name(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}
