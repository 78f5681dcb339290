//! Engine artifact resolution.
//!
//! An engine is loaded from two artifacts: an executable **core** and a
//! companion **module**.  An [`ArtifactSource`] turns an artifact name into a
//! loadable local path.
//!
//! | Location string          | Source              | Resolution                        |
//! |--------------------------|---------------------|-----------------------------------|
//! | `"system"`               | [`SystemArtifacts`] | `which` lookup on `PATH`          |
//! | `http://…`, `https://…`  | [`HttpArtifacts`]   | download once into the cache dir  |
//! | anything else            | [`LocalArtifacts`]  | `{dir}/{name}` must exist         |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ArtifactError
// ---------------------------------------------------------------------------

/// Errors raised while resolving engine artifacts.
#[derive(Debug, Clone, Error)]
pub enum ArtifactError {
    /// The artifact does not exist at the configured location.
    #[error("artifact '{name}' not found in {location}")]
    NotFound { name: String, location: String },

    /// Downloading the artifact failed.
    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    /// Storing a downloaded artifact failed.
    #[error("artifact I/O error: {0}")]
    Io(String),
}

// ---------------------------------------------------------------------------
// EngineArtifacts
// ---------------------------------------------------------------------------

/// The resolved pair of artifacts handed to [`CodecEngine::load`].
///
/// [`CodecEngine::load`]: super::CodecEngine::load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineArtifacts {
    /// Executable core (the transcoder itself).
    pub core: PathBuf,
    /// Companion module the core needs at runtime.
    pub module: PathBuf,
}

// ---------------------------------------------------------------------------
// ArtifactSource trait
// ---------------------------------------------------------------------------

/// Resolves artifact names to loadable local paths.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Resolve `name` to a path the engine can load.
    async fn resolve(&self, name: &str) -> Result<PathBuf, ArtifactError>;

    /// Human-readable description of where artifacts come from.
    fn location(&self) -> String;
}

/// Resolve both engine artifacts, core first.
pub async fn resolve_artifacts(
    source: &dyn ArtifactSource,
    core_name: &str,
    module_name: &str,
) -> Result<EngineArtifacts, ArtifactError> {
    let core = source.resolve(core_name).await?;
    log::debug!("artifacts: core resolved to {}", core.display());
    let module = source.resolve(module_name).await?;
    log::debug!("artifacts: module resolved to {}", module.display());
    Ok(EngineArtifacts { core, module })
}

/// Pick the [`ArtifactSource`] matching a configured base location.
///
/// `cache_dir` is where [`HttpArtifacts`] keeps its downloads.
pub fn artifact_source_for(location: &str, cache_dir: &Path) -> Arc<dyn ArtifactSource> {
    if location == "system" {
        Arc::new(SystemArtifacts)
    } else if location.starts_with("http://") || location.starts_with("https://") {
        Arc::new(HttpArtifacts::new(location, cache_dir))
    } else {
        Arc::new(LocalArtifacts::new(location))
    }
}

// ---------------------------------------------------------------------------
// LocalArtifacts
// ---------------------------------------------------------------------------

/// Artifacts stored in a local directory.
#[derive(Debug, Clone)]
pub struct LocalArtifacts {
    dir: PathBuf,
}

impl LocalArtifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ArtifactSource for LocalArtifacts {
    async fn resolve(&self, name: &str) -> Result<PathBuf, ArtifactError> {
        let path = self.dir.join(name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(ArtifactError::NotFound {
                name: name.to_string(),
                location: self.location(),
            }),
        }
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

// ---------------------------------------------------------------------------
// SystemArtifacts
// ---------------------------------------------------------------------------

/// Artifacts installed as executables on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemArtifacts;

#[async_trait]
impl ArtifactSource for SystemArtifacts {
    async fn resolve(&self, name: &str) -> Result<PathBuf, ArtifactError> {
        which::which(name).map_err(|_| ArtifactError::NotFound {
            name: name.to_string(),
            location: self.location(),
        })
    }

    fn location(&self) -> String {
        "PATH".into()
    }
}

// ---------------------------------------------------------------------------
// HttpArtifacts
// ---------------------------------------------------------------------------

/// Artifacts served over HTTP(S).
///
/// Each artifact is downloaded once into the cache directory
/// (`AppPaths::engine_dir` in production). Later resolutions, in this process
/// or the next, reuse the local copy.
pub struct HttpArtifacts {
    client: reqwest::Client,
    base_url: String,
    cache_dir: PathBuf,
}

impl std::fmt::Debug for HttpArtifacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpArtifacts")
            .field("base_url", &self.base_url)
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

impl HttpArtifacts {
    pub fn new(base_url: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Local path `name` is cached under.
    pub fn cached_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(name)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), ArtifactError> {
        let fetch_err = |e: reqwest::Error| ArtifactError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        };

        let bytes = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fetch_err)?
            .bytes()
            .await
            .map_err(fetch_err)?;

        let io_err = |e: std::io::Error| ArtifactError::Io(e.to_string());
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(io_err)?;

        // Write under a temporary name so an interrupted download is never
        // mistaken for a cached artifact.
        let partial = dest.with_extension("part");
        tokio::fs::write(&partial, &bytes).await.map_err(io_err)?;
        mark_executable(&partial).await?;
        tokio::fs::rename(&partial, dest).await.map_err(io_err)?;

        log::info!("artifacts: downloaded {url} ({} bytes)", bytes.len());
        Ok(())
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifacts {
    async fn resolve(&self, name: &str) -> Result<PathBuf, ArtifactError> {
        let dest = self.cached_path(name);
        if let Ok(meta) = tokio::fs::metadata(&dest).await {
            if meta.is_file() {
                log::debug!("artifacts: using cached {}", dest.display());
                return Ok(dest);
            }
        }
        let url = artifact_url(&self.base_url, name);
        self.download(&url, &dest).await?;
        Ok(dest)
    }

    fn location(&self) -> String {
        self.base_url.clone()
    }
}

/// Join a base URL and an artifact name with exactly one slash.
pub fn artifact_url(base_url: &str, name: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), name)
}

#[cfg(unix)]
async fn mark_executable(path: &Path) -> Result<(), ArtifactError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|e| ArtifactError::Io(e.to_string()))
}

#[cfg(not(unix))]
async fn mark_executable(_path: &Path) -> Result<(), ArtifactError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn local_resolves_existing_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("ffmpeg"), b"core").unwrap();

        let source = LocalArtifacts::new(dir.path());
        let path = source.resolve("ffmpeg").await.unwrap();
        assert_eq!(path, dir.path().join("ffmpeg"));
    }

    #[tokio::test]
    async fn local_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let source = LocalArtifacts::new(dir.path());
        let err = source.resolve("ffprobe").await.unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound { ref name, .. } if name == "ffprobe"));
    }

    #[tokio::test]
    async fn local_directory_is_not_an_artifact() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("ffmpeg")).unwrap();
        let source = LocalArtifacts::new(dir.path());
        assert!(source.resolve("ffmpeg").await.is_err());
    }

    #[tokio::test]
    async fn resolve_artifacts_returns_both_paths() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("core.bin"), b"c").unwrap();
        std::fs::write(dir.path().join("module.bin"), b"m").unwrap();

        let source = LocalArtifacts::new(dir.path());
        let artifacts = resolve_artifacts(&source, "core.bin", "module.bin")
            .await
            .unwrap();
        assert_eq!(artifacts.core, dir.path().join("core.bin"));
        assert_eq!(artifacts.module, dir.path().join("module.bin"));
    }

    #[tokio::test]
    async fn resolve_artifacts_fails_on_missing_module() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("core.bin"), b"c").unwrap();

        let source = LocalArtifacts::new(dir.path());
        let err = resolve_artifacts(&source, "core.bin", "module.bin")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("module.bin"));
    }

    #[tokio::test]
    async fn system_lookup_of_unknown_tool_fails() {
        let err = SystemArtifacts
            .resolve("nonexistent_tool_xyz_12345")
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound { .. }));
    }

    #[test]
    fn artifact_url_joins_with_single_slash() {
        assert_eq!(
            artifact_url("https://cdn.example.com/engine/", "ffmpeg"),
            "https://cdn.example.com/engine/ffmpeg"
        );
        assert_eq!(
            artifact_url("https://cdn.example.com/engine", "ffprobe"),
            "https://cdn.example.com/engine/ffprobe"
        );
    }

    #[test]
    fn source_selection_by_location() {
        let cache = Path::new("/tmp/engine-cache");
        assert_eq!(artifact_source_for("system", cache).location(), "PATH");
        assert_eq!(
            artifact_source_for("https://cdn.example.com/e", cache).location(),
            "https://cdn.example.com/e"
        );
        assert_eq!(
            artifact_source_for("/opt/engine", cache).location(),
            "/opt/engine"
        );
    }

    // ---- HttpArtifacts cache ---

    #[tokio::test]
    async fn http_reuses_artifact_already_in_cache_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("ffmpeg"), b"cached core").unwrap();

        // Nothing listens on the discard port; a fetch attempt would fail.
        let source = HttpArtifacts::new("http://127.0.0.1:9/engine", dir.path());
        let path = source.resolve("ffmpeg").await.unwrap();

        assert_eq!(path, dir.path().join("ffmpeg"));
        assert_eq!(std::fs::read(&path).unwrap(), b"cached core");
    }

    #[tokio::test]
    async fn http_failed_download_leaves_no_cache_entry() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("engine");
        let source = HttpArtifacts::new("http://127.0.0.1:9/engine", &cache);

        let err = source.resolve("ffprobe").await.unwrap_err();
        assert!(matches!(err, ArtifactError::Fetch { ref url, .. } if url == "http://127.0.0.1:9/engine/ffprobe"));
        assert!(!source.cached_path("ffprobe").exists());
    }
}
