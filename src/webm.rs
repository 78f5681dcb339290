//! Quick structural check of a WebM output.
//!
//! Not a demuxer: it checks the EBML signature and searches the bytes for the
//! Matroska codec ids of interest.

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// What [`inspect`] found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebmReport {
    pub is_webm: bool,
    pub has_vp8: bool,
    pub has_vp9: bool,
    /// An Opus or Vorbis track id is present.
    pub has_audio: bool,
    pub errors: Vec<String>,
}

impl WebmReport {
    pub fn is_valid(&self) -> bool {
        self.is_webm && (self.has_vp8 || self.has_vp9) && self.errors.is_empty()
    }

    /// Codec id found, preferring VP9.
    pub fn video_codec(&self) -> Option<&'static str> {
        if self.has_vp9 {
            Some("V_VP9")
        } else if self.has_vp8 {
            Some("V_VP8")
        } else {
            None
        }
    }
}

pub fn inspect(bytes: &[u8]) -> WebmReport {
    let mut report = WebmReport::default();

    if bytes.len() < 4 {
        report
            .errors
            .push("File too small to be a valid WebM file".into());
        return report;
    }

    if bytes[..4] != EBML_MAGIC {
        let signature = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        report
            .errors
            .push(format!("Invalid EBML signature: 0x{signature:08x}"));
        return report;
    }
    report.is_webm = true;

    report.has_vp8 = contains(bytes, b"V_VP8");
    report.has_vp9 = contains(bytes, b"V_VP9");
    report.has_audio = contains(bytes, b"A_OPUS") || contains(bytes, b"A_VORBIS");

    if !report.has_vp8 && !report.has_vp9 {
        report
            .errors
            .push("VP8 or VP9 codec not detected in file".into());
    }
    report
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}
