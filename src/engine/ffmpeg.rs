//! Native `ffmpeg` engine.
//!
//! [`FfmpegEngine`] implements [`CodecEngine`] on top of the `ffmpeg` and
//! `ffprobe` executables:
//!
//! * the **core** artifact is the `ffmpeg` binary that performs the transcode;
//! * the **module** artifact is `ffprobe`, used to read the input duration so
//!   `ffmpeg -progress` timestamps can be turned into a completion ratio.
//!
//! The engine's filesystem is a private temporary directory created on load.
//! File names are flat; anything containing a path separator is rejected.
//!
//! `exec` spawns the child with `kill_on_drop(true)`: dropping the exec future
//! (timeout, cancelled context) terminates the transcode.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::artifacts::EngineArtifacts;
use super::codec::{CodecEngine, DirEntry, EngineError, EngineEvent, EngineFactory, EventSink};

// ---------------------------------------------------------------------------
// Progress parsing
// ---------------------------------------------------------------------------

/// A single meaningful line of `ffmpeg -progress` output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressLine {
    /// Output timestamp reached, in microseconds.
    OutTime(i64),
    /// The encoder finished (`progress=end`).
    End,
}

/// Parse one `key=value` line of `ffmpeg -progress` output.
///
/// `out_time_ms` is reported in microseconds by ffmpeg despite its name;
/// both it and `out_time_us` are accepted.
pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_us" | "out_time_ms" => value.parse::<i64>().ok().map(ProgressLine::OutTime),
        "progress" if value == "end" => Some(ProgressLine::End),
        _ => None,
    }
}

/// Completion ratio for `time_us` into a stream of `duration_secs`.
pub fn progress_ratio(time_us: i64, duration_secs: f64) -> f64 {
    if duration_secs <= 0.0 {
        return 0.0;
    }
    (time_us.max(0) as f64 / 1_000_000.0 / duration_secs).clamp(0.0, 1.0)
}

/// Return the value that follows `-i` in an argument vector.
pub fn input_argument(args: &[String]) -> Option<&str> {
    args.iter()
        .position(|a| a == "-i")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

// ---------------------------------------------------------------------------
// FfmpegEngine
// ---------------------------------------------------------------------------

struct Loaded {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    root: Arc<TempDir>,
}

/// Production engine that shells out to `ffmpeg`.
pub struct FfmpegEngine {
    events: EventSink,
    loaded: Mutex<Option<Loaded>>,
}

impl std::fmt::Debug for FfmpegEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegEngine").finish_non_exhaustive()
    }
}

impl FfmpegEngine {
    pub fn new(events: EventSink) -> Self {
        Self {
            events,
            loaded: Mutex::new(None),
        }
    }

    fn emit(&self, event: EngineEvent) {
        // The receiver disappears when the worker is torn down.
        let _ = self.events.send(event);
    }

    /// Snapshot of the loaded paths. The lock is never held across `.await`.
    fn paths(&self) -> Result<(PathBuf, PathBuf, Arc<TempDir>), EngineError> {
        let guard = self
            .loaded
            .lock()
            .map_err(|e| EngineError::Io(format!("engine state poisoned: {e}")))?;
        guard
            .as_ref()
            .map(|l| (l.ffmpeg.clone(), l.ffprobe.clone(), Arc::clone(&l.root)))
            .ok_or(EngineError::NotLoaded)
    }

    fn file_path(&self, name: &str) -> Result<PathBuf, EngineError> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(EngineError::Io(format!("invalid file name: {name:?}")));
        }
        let (_, _, root) = self.paths()?;
        Ok(root.path().join(name))
    }

    async fn check_runs(binary: &Path) -> Result<String, EngineError> {
        let output = Command::new(binary)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| EngineError::Load(format!("cannot start {}: {e}", binary.display())))?;

        if !output.status.success() {
            return Err(EngineError::Load(format!(
                "{} -version exited with {}",
                binary.display(),
                output.status
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string())
    }

    /// Input duration in seconds, or `None` when ffprobe cannot tell.
    async fn probe_duration(ffprobe: &Path, input: &Path) -> Option<f64> {
        let output = Command::new(ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout).trim().parse().ok()
    }
}

#[async_trait]
impl CodecEngine for FfmpegEngine {
    async fn load(&self, artifacts: &EngineArtifacts) -> Result<(), EngineError> {
        let version = Self::check_runs(&artifacts.core).await?;
        Self::check_runs(&artifacts.module).await?;
        self.emit(EngineEvent::Log(version));

        let root = tempfile::Builder::new()
            .prefix("webm-convert-fs-")
            .tempdir()
            .map_err(|e| EngineError::Load(format!("cannot create engine filesystem: {e}")))?;

        let mut guard = self
            .loaded
            .lock()
            .map_err(|e| EngineError::Load(format!("engine state poisoned: {e}")))?;
        *guard = Some(Loaded {
            ffmpeg: artifacts.core.clone(),
            ffprobe: artifacts.module.clone(),
            root: Arc::new(root),
        });
        Ok(())
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> Result<(), EngineError> {
        let path = self.file_path(name)?;
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| EngineError::Io(format!("write {name}: {e}")))
    }

    async fn exec(&self, args: &[String]) -> Result<i32, EngineError> {
        let (ffmpeg, ffprobe, root) = self.paths()?;

        let duration = match input_argument(args) {
            Some(input) => Self::probe_duration(&ffprobe, &root.path().join(input)).await,
            None => None,
        };

        let mut child = Command::new(&ffmpeg)
            .current_dir(root.path())
            .args(["-hide_banner", "-nostdin", "-nostats", "-y", "-progress", "pipe:1"])
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Exec(format!("cannot spawn ffmpeg: {e}")))?;

        if let Some(stderr) = child.stderr.take() {
            let events = self.events.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = events.send(EngineEvent::Log(line));
                }
            });
        }

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match parse_progress_line(&line) {
                    Some(ProgressLine::OutTime(time_us)) => {
                        if let Some(secs) = duration {
                            self.emit(EngineEvent::Progress {
                                ratio: progress_ratio(time_us, secs),
                                time_us: Some(time_us),
                            });
                        }
                    }
                    Some(ProgressLine::End) => self.emit(EngineEvent::Progress {
                        ratio: 1.0,
                        time_us: None,
                    }),
                    None => {}
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| EngineError::Exec(format!("waiting for ffmpeg: {e}")))?;

        Ok(status.code().unwrap_or(-1))
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        let path = self.file_path(name)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::NotFound(name.to_string()),
            _ => EngineError::Io(format!("read {name}: {e}")),
        })
    }

    async fn delete_file(&self, name: &str) -> Result<(), EngineError> {
        let path = self.file_path(name)?;
        tokio::fs::remove_file(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::NotFound(name.to_string()),
            _ => EngineError::Io(format!("delete {name}: {e}")),
        })
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, EngineError> {
        if !matches!(path, "/" | "." | "") {
            return Err(EngineError::NotFound(path.to_string()));
        }
        let (_, _, root) = self.paths()?;

        let mut dir = tokio::fs::read_dir(root.path())
            .await
            .map_err(|e| EngineError::Io(format!("list {path}: {e}")))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| EngineError::Io(format!("list {path}: {e}")))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// FfmpegEngineFactory
// ---------------------------------------------------------------------------

/// [`EngineFactory`] producing [`FfmpegEngine`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegEngineFactory;

impl EngineFactory for FfmpegEngineFactory {
    fn create(&self, events: EventSink) -> Arc<dyn CodecEngine> {
        Arc::new(FfmpegEngine::new(events))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
