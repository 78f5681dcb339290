//! Scriptable test doubles for the engine layer.
//!
//! [`MockEngine`] keeps its filesystem in a `HashMap` and behaves according to
//! a [`MockScript`]. [`MockFactory`] hands out engines built from the current
//! script and remembers every instance it created. [`MockArtifacts`] resolves
//! any name without touching the disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::artifacts::{ArtifactError, ArtifactSource, EngineArtifacts};
use super::codec::{CodecEngine, DirEntry, EngineError, EngineEvent, EngineFactory, EventSink};

/// What `exec` does after emitting the scripted progress.
#[derive(Debug, Clone)]
pub enum MockExec {
    /// Return this exit code. On `0` the scripted output is written.
    Exit(i32),
    /// Never return.
    Hang,
    /// Fail the call itself.
    Fail(String),
    /// Panic inside the call.
    Panic(String),
}

/// Behaviour of engines built by a [`MockFactory`].
#[derive(Debug, Clone)]
pub struct MockScript {
    pub load_delay: Duration,
    pub load_error: Option<String>,
    pub exec: MockExec,
    /// Ratios emitted as progress events before `exec` settles.
    pub progress: Vec<f64>,
    /// Bytes stored under the last exec argument on a zero exit.
    pub output: Option<Vec<u8>>,
    pub delete_fails: bool,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            load_delay: Duration::ZERO,
            load_error: None,
            exec: MockExec::Exit(0),
            progress: vec![0.0, 0.5, 1.0],
            output: Some(fake_webm()),
            delete_fails: false,
        }
    }
}

/// Minimal byte sequence that passes [`crate::webm::inspect`] as VP8 WebM.
pub fn fake_webm() -> Vec<u8> {
    let mut bytes = vec![0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x82, 0x84];
    bytes.extend_from_slice(b"webm");
    bytes.extend_from_slice(&[0x16, 0x54, 0xAE, 0x6B, 0x86]);
    bytes.extend_from_slice(b"V_VP8");
    bytes.extend_from_slice(&[0u8; 16]);
    bytes
}

// ---------------------------------------------------------------------------
// MockEngine
// ---------------------------------------------------------------------------

pub struct MockEngine {
    script: MockScript,
    events: EventSink,
    loaded: AtomicBool,
    files: Mutex<HashMap<String, Vec<u8>>>,
    exec_calls: Mutex<Vec<Vec<String>>>,
}

impl MockEngine {
    pub fn new(script: MockScript, events: EventSink) -> Self {
        Self {
            script,
            events,
            loaded: AtomicBool::new(false),
            files: Mutex::new(HashMap::new()),
            exec_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn exec_calls(&self) -> Vec<Vec<String>> {
        self.exec_calls.lock().unwrap().clone()
    }

    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    fn ensure_loaded(&self) -> Result<(), EngineError> {
        if self.is_loaded() {
            Ok(())
        } else {
            Err(EngineError::NotLoaded)
        }
    }
}

#[async_trait]
impl CodecEngine for MockEngine {
    async fn load(&self, _artifacts: &EngineArtifacts) -> Result<(), EngineError> {
        if !self.script.load_delay.is_zero() {
            tokio::time::sleep(self.script.load_delay).await;
        }
        if let Some(message) = &self.script.load_error {
            return Err(EngineError::Load(message.clone()));
        }
        let _ = self.events.send(EngineEvent::Log("mock engine ready".into()));
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> Result<(), EngineError> {
        self.ensure_loaded()?;
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn exec(&self, args: &[String]) -> Result<i32, EngineError> {
        self.ensure_loaded()?;
        self.exec_calls.lock().unwrap().push(args.to_vec());

        for ratio in &self.script.progress {
            let _ = self.events.send(EngineEvent::Progress {
                ratio: *ratio,
                time_us: Some((ratio * 10_000_000.0) as i64),
            });
            tokio::task::yield_now().await;
        }

        match &self.script.exec {
            MockExec::Exit(code) => {
                if *code == 0 {
                    if let (Some(bytes), Some(name)) = (&self.script.output, args.last()) {
                        self.files
                            .lock()
                            .unwrap()
                            .insert(name.clone(), bytes.clone());
                    }
                }
                Ok(*code)
            }
            MockExec::Hang => std::future::pending::<Result<i32, EngineError>>().await,
            MockExec::Fail(message) => Err(EngineError::Exec(message.clone())),
            MockExec::Panic(message) => panic!("{message}"),
        }
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        self.ensure_loaded()?;
        self.files
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }

    async fn delete_file(&self, name: &str) -> Result<(), EngineError> {
        self.ensure_loaded()?;
        if self.script.delete_fails {
            return Err(EngineError::Io(format!("cannot delete {name}")));
        }
        self.files
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }

    async fn list_dir(&self, _path: &str) -> Result<Vec<DirEntry>, EngineError> {
        self.ensure_loaded()?;
        Ok(self
            .file_names()
            .into_iter()
            .map(|name| DirEntry {
                name,
                is_dir: false,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockFactory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockFactory {
    script: Mutex<MockScript>,
    engines: Mutex<Vec<Arc<MockEngine>>>,
    crash_next: AtomicBool,
}

impl MockFactory {
    pub fn new(script: MockScript) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            engines: Mutex::new(Vec::new()),
            crash_next: AtomicBool::new(false),
        })
    }

    /// Replace the script used for engines created from now on.
    pub fn set_script(&self, script: MockScript) {
        *self.script.lock().unwrap() = script;
    }

    /// Make the next `create` call panic with "engine constructor crashed".
    pub fn crash_next_create(&self) {
        self.crash_next.store(true, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.engines.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<Arc<MockEngine>> {
        self.engines.lock().unwrap().last().cloned()
    }
}

impl EngineFactory for MockFactory {
    fn create(&self, events: EventSink) -> Arc<dyn CodecEngine> {
        if self.crash_next.swap(false, Ordering::SeqCst) {
            panic!("engine constructor crashed");
        }
        let script = self.script.lock().unwrap().clone();
        let engine = Arc::new(MockEngine::new(script, events));
        self.engines.lock().unwrap().push(Arc::clone(&engine));
        engine
    }
}

// ---------------------------------------------------------------------------
// MockArtifacts
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockArtifacts {
    resolves: AtomicUsize,
    fail: AtomicBool,
}

impl MockArtifacts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let artifacts = Self::default();
        artifacts.fail.store(true, Ordering::SeqCst);
        Arc::new(artifacts)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactSource for MockArtifacts {
    async fn resolve(&self, name: &str) -> Result<PathBuf, ArtifactError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ArtifactError::Fetch {
                url: format!("mock://{name}"),
                message: "connection refused".into(),
            });
        }
        Ok(PathBuf::from(format!("/mock/{name}")))
    }

    fn location(&self) -> String {
        "mock".into()
    }
}
