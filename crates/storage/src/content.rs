//! Content types and the file-naming contract with the capture producer.

use derive_more::Display;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

// Producers use either zero-padded counters or timestamp-derived names
// (`capture_20250101_120000.jpg`), so the numeric part allows underscores.
regex!(CAPTURE_REGEX, r"^capture_\d[\d_]*\.jpg$");
regex!(THUMBNAIL_REGEX, r"^capture_\d[\d_]*_thumbnail\.jpg$");
regex!(SEGMENT_REGEX, r"^segment_\d[\d_]*\.ts$");
regex!(METADATA_REGEX, r"^capture_\d[\d_]*\.json$");
regex!(AUDIO_REGEX, r"^audio_\d[\d_]*\.(?:aac|m4a|mp3|opus|wav)$");
regex!(MANIFEST_REGEX, r"^[A-Za-z0-9_.-]+\.m3u8$");

/// One category of captured artifact.
///
/// Each content type owns a subdirectory of the same name on both tiers and
/// carries its own hot retention count and cold retention window.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Full-resolution capture images.
    #[display("captures")]
    Captures,
    /// Downscaled capture images.
    #[display("thumbnails")]
    Thumbnails,
    /// HLS transport-stream segments.
    #[display("segments")]
    Segments,
    /// JSON sidecars describing a capture.
    #[display("metadata")]
    Metadata,
    /// Audio chunks.
    #[display("audio")]
    Audio,
}

impl ContentType {
    pub const ALL: [ContentType; 5] = [
        ContentType::Captures,
        ContentType::Thumbnails,
        ContentType::Segments,
        ContentType::Metadata,
        ContentType::Audio,
    ];

    /// Name of the subdirectory this content type lives in, on both tiers.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Captures => "captures",
            Self::Thumbnails => "thumbnails",
            Self::Segments => "segments",
            Self::Metadata => "metadata",
            Self::Audio => "audio",
        }
    }

    fn pattern(&self) -> &'static Regex {
        match self {
            Self::Captures => &CAPTURE_REGEX,
            Self::Thumbnails => &THUMBNAIL_REGEX,
            Self::Segments => &SEGMENT_REGEX,
            Self::Metadata => &METADATA_REGEX,
            Self::Audio => &AUDIO_REGEX,
        }
    }

    /// Whether `name` is an archivable file of this content type.
    pub fn matches(&self, name: &str) -> bool {
        self.pattern().is_match(name)
    }

    /// Whether `name` is a file the producer rewrites in place (the live HLS
    /// manifest). Pinned files are never archived and never swept.
    pub fn is_pinned(&self, name: &str) -> bool {
        matches!(self, Self::Segments) && MANIFEST_REGEX.is_match(name)
    }

    /// Whether `name` is known to this content type at all, archivable or
    /// pinned. Anything else found in its directory is a stray.
    pub fn recognizes(&self, name: &str) -> bool {
        self.matches(name) || self.is_pinned(name)
    }
}
