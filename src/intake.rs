//! Input file intake: opening, type detection, validation and naming.
//!
//! The MIME type is sniffed from the first bytes of the file and only falls
//! back to the extension when the header is not recognised.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncReadExt;

/// Default size ceiling, in megabytes.
pub const MAX_FILE_SIZE_MB: u64 = 500;

/// Extension given to converted files.
pub const OUTPUT_EXTENSION: &str = "webm";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const SNIFF_LEN: u64 = 512;
const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

// ---------------------------------------------------------------------------
// IntakeError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Please select a valid video file.")]
    InvalidType,

    #[error("File is too large. Maximum size is {max_mb} MB.")]
    TooLarge { max_mb: u64 },

    #[error("cannot open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// VideoFile
// ---------------------------------------------------------------------------

/// A user-selected input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFile {
    pub path: PathBuf,
    /// File name without directories.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    pub mime: String,
}

impl VideoFile {
    pub fn new(path: impl Into<PathBuf>, size: u64, mime: impl Into<String>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            name,
            size,
            mime: mime.into(),
        }
    }

    /// Stat `path` and sniff its MIME type.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IntakeError> {
        let path = path.as_ref();
        let io_err = |source| IntakeError::Io {
            path: path.to_path_buf(),
            source,
        };

        let meta = tokio::fs::metadata(path).await.map_err(io_err)?;
        if !meta.is_file() {
            return Err(IntakeError::InvalidType);
        }

        let file = tokio::fs::File::open(path).await.map_err(io_err)?;
        let mut header = Vec::with_capacity(SNIFF_LEN as usize);
        file.take(SNIFF_LEN)
            .read_to_end(&mut header)
            .await
            .map_err(io_err)?;

        let mime = sniff_mime(&header)
            .or_else(|| mime_from_extension(path))
            .unwrap_or("application/octet-stream");

        Ok(Self::new(path, meta.len(), mime))
    }
}

/// MIME type from magic bytes.
pub fn sniff_mime(header: &[u8]) -> Option<&'static str> {
    if header.len() >= 12 && &header[4..8] == b"ftyp" {
        return Some(if &header[8..12] == b"qt  " {
            "video/quicktime"
        } else {
            "video/mp4"
        });
    }

    if header.starts_with(&EBML_MAGIC) {
        let is_webm = header.windows(4).any(|w| w == b"webm");
        return Some(if is_webm { "video/webm" } else { "video/x-matroska" });
    }

    if header.len() >= 12 && &header[0..4] == b"RIFF" && &header[8..12] == b"AVI " {
        return Some("video/x-msvideo");
    }

    // MPEG-TS: sync byte at the start of two consecutive 188-byte packets.
    if header.len() > 188 && header[0] == 0x47 && header[188] == 0x47 {
        return Some("video/mp2t");
    }

    None
}

pub fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "ts" | "m2ts" => "video/mp2t",
        "mpg" | "mpeg" => "video/mpeg",
        "ogv" => "video/ogg",
        "3gp" => "video/3gpp",
        _ => return None,
    };
    Some(mime)
}

// ---------------------------------------------------------------------------
// Validation and naming
// ---------------------------------------------------------------------------

pub fn is_valid_video_mime(mime: &str) -> bool {
    mime.starts_with("video/")
}

/// Type check first, then the size ceiling.
pub fn validate_video_file(file: &VideoFile, max_mb: u64) -> Result<(), IntakeError> {
    if !is_valid_video_mime(&file.mime) {
        return Err(IntakeError::InvalidType);
    }
    if file.size as f64 / BYTES_PER_MB > max_mb as f64 {
        return Err(IntakeError::TooLarge { max_mb });
    }
    Ok(())
}

/// `1_572_864` → `"1.50 MB"`.
pub fn format_file_size(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / BYTES_PER_MB)
}

/// Swap the last extension for `.webm`.
///
/// Only a trailing `.ext` (no `/` or `.` inside `ext`) is replaced; a name
/// without one is returned unchanged.
///
/// ```
/// use webm_convert::intake::output_file_name;
///
/// assert_eq!(output_file_name("clip.mp4"), "clip.webm");
/// assert_eq!(output_file_name("a.b.mov"), "a.b.webm");
/// assert_eq!(output_file_name("no_extension"), "no_extension");
/// ```
pub fn output_file_name(name: &str) -> String {
    match name.rfind('.') {
        Some(dot) if dot + 1 < name.len() && !name[dot + 1..].contains('/') => {
            format!("{}.{OUTPUT_EXTENSION}", &name[..dot])
        }
        _ => name.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn video(size: u64, mime: &str) -> VideoFile {
        VideoFile::new("/videos/clip.mp4", size, mime)
    }

    // ---- output_file_name ---

    #[test]
    fn replaces_last_extension_only() {
        assert_eq!(output_file_name("clip.mp4"), "clip.webm");
        assert_eq!(output_file_name("a.b.mov"), "a.b.webm");
        assert_eq!(output_file_name("movie.WEBM"), "movie.webm");
    }

    #[test]
    fn leaves_names_without_extension() {
        assert_eq!(output_file_name("no_extension"), "no_extension");
        assert_eq!(output_file_name("trailing."), "trailing.");
        assert_eq!(output_file_name("dir.d/file"), "dir.d/file");
    }

    #[test]
    fn dotfile_is_all_extension() {
        assert_eq!(output_file_name(".hidden"), ".webm");
    }

    // ---- validation ---

    #[test]
    fn mime_prefix_check() {
        assert!(is_valid_video_mime("video/mp4"));
        assert!(is_valid_video_mime("video/quicktime"));
        assert!(!is_valid_video_mime("audio/mpeg"));
        assert!(!is_valid_video_mime("application/octet-stream"));
    }

    #[test]
    fn non_video_is_rejected_with_message() {
        let err = validate_video_file(&video(10, "image/png"), MAX_FILE_SIZE_MB).unwrap_err();
        assert_eq!(err.to_string(), "Please select a valid video file.");
    }

    #[test]
    fn oversized_file_is_rejected_with_message() {
        let size = 501 * 1024 * 1024;
        let err = validate_video_file(&video(size, "video/mp4"), MAX_FILE_SIZE_MB).unwrap_err();
        assert_eq!(err.to_string(), "File is too large. Maximum size is 500 MB.");
    }

    #[test]
    fn exactly_at_limit_is_accepted() {
        let size = 500 * 1024 * 1024;
        assert!(validate_video_file(&video(size, "video/mp4"), MAX_FILE_SIZE_MB).is_ok());
    }

    #[test]
    fn size_label_has_two_decimals() {
        assert_eq!(format_file_size(1_572_864), "1.50 MB");
        assert_eq!(format_file_size(0), "0.00 MB");
    }

    // ---- sniffing ---

    #[test]
    fn sniffs_mp4_and_quicktime() {
        assert_eq!(sniff_mime(b"\0\0\0\x18ftypisom\0\0\0\0"), Some("video/mp4"));
        assert_eq!(sniff_mime(b"\0\0\0\x14ftypqt  \0\0\0\0"), Some("video/quicktime"));
    }

    #[test]
    fn sniffs_webm_and_matroska() {
        let mut webm = EBML_MAGIC.to_vec();
        webm.extend_from_slice(b"\x9f\x42\x82\x84webm");
        assert_eq!(sniff_mime(&webm), Some("video/webm"));

        let mut mkv = EBML_MAGIC.to_vec();
        mkv.extend_from_slice(b"\x9f\x42\x82\x88matroska");
        assert_eq!(sniff_mime(&mkv), Some("video/x-matroska"));
    }

    #[test]
    fn sniffs_avi_and_transport_stream() {
        assert_eq!(sniff_mime(b"RIFF\0\0\0\0AVI LIST"), Some("video/x-msvideo"));

        let mut ts = vec![0u8; 200];
        ts[0] = 0x47;
        ts[188] = 0x47;
        assert_eq!(sniff_mime(&ts), Some("video/mp2t"));
    }

    #[test]
    fn unknown_header_is_none() {
        assert_eq!(sniff_mime(b"hello world"), None);
        assert_eq!(sniff_mime(b""), None);
    }

    #[test]
    fn extension_fallback() {
        assert_eq!(mime_from_extension(Path::new("a.MOV")), Some("video/quicktime"));
        assert_eq!(mime_from_extension(Path::new("a.txt")), None);
        assert_eq!(mime_from_extension(Path::new("noext")), None);
    }

    // ---- VideoFile::open ---

    #[tokio::test]
    async fn open_sniffs_header_over_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("misnamed.avi");
        std::fs::write(&path, b"\0\0\0\x18ftypmp42 rest of file").unwrap();

        let file = VideoFile::open(&path).await.unwrap();
        assert_eq!(file.name, "misnamed.avi");
        assert_eq!(file.mime, "video/mp4");
        assert_eq!(file.size, 25);
    }

    #[tokio::test]
    async fn open_falls_back_to_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.mkv");
        std::fs::write(&path, b"not a real header").unwrap();

        let file = VideoFile::open(&path).await.unwrap();
        assert_eq!(file.mime, "video/x-matroska");
    }

    #[tokio::test]
    async fn open_unknown_file_is_not_video() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"just text").unwrap();

        let file = VideoFile::open(&path).await.unwrap();
        assert_eq!(file.mime, "application/octet-stream");
        assert!(validate_video_file(&file, MAX_FILE_SIZE_MB).is_err());
    }

    #[tokio::test]
    async fn open_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = VideoFile::open(dir.path().join("gone.mp4")).await.unwrap_err();
        assert!(matches!(err, IntakeError::Io { .. }));
    }

    #[tokio::test]
    async fn open_directory_is_invalid() {
        let dir = tempdir().unwrap();
        let err = VideoFile::open(dir.path()).await.unwrap_err();
        assert!(matches!(err, IntakeError::InvalidType));
    }
}
