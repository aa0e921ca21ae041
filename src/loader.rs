use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::mesh::ModelTemplate;

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Best-effort progress report. `total` is unknown for some sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadProgress {
    pub loaded: u64,
    pub total: Option<u64>,
}

impl LoadProgress {
    /// Completion in `[0, 1]`, or `None` when the total size is unknown.
    pub fn fraction(&self) -> Option<f32> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.loaded as f64 / total as f64).clamp(0.0, 1.0) as f32),
            None => None,
        }
    }

    pub fn percent(&self) -> Option<u32> {
        self.fraction().map(|f| (f * 100.0).round() as u32)
    }
}

type SuccessFn = Box<dyn FnOnce(ModelTemplate) + Send>;
type ProgressFn = Box<dyn FnMut(LoadProgress) + Send>;
type ErrorFn = Box<dyn FnOnce(anyhow::Error) + Send>;

/// Callbacks for one load request.
///
/// Progress may fire any number of times. Exactly one of success/error runs: the terminal
/// methods consume the bundle, and dropping it unsettled (worker panic, failed spawn, loader
/// discarding the request) reports an error instead.
pub struct LoadCallbacks {
    on_progress: ProgressFn,
    terminal: Option<(SuccessFn, ErrorFn)>,
}

impl LoadCallbacks {
    pub fn new(
        on_success: impl FnOnce(ModelTemplate) + Send + 'static,
        on_progress: impl FnMut(LoadProgress) + Send + 'static,
        on_error: impl FnOnce(anyhow::Error) + Send + 'static,
    ) -> Self {
        Self { on_progress: Box::new(on_progress), terminal: Some((Box::new(on_success), Box::new(on_error))) }
    }

    pub fn progress(&mut self, progress: LoadProgress) {
        (self.on_progress)(progress);
    }

    pub fn succeed(mut self, model: ModelTemplate) {
        if let Some((on_success, _)) = self.terminal.take() {
            on_success(model);
        }
    }

    pub fn fail(mut self, error: anyhow::Error) {
        if let Some((_, on_error)) = self.terminal.take() {
            on_error(error);
        }
    }

    pub fn settle(self, result: Result<ModelTemplate>) {
        match result {
            Ok(model) => self.succeed(model),
            Err(err) => self.fail(err),
        }
    }
}

impl Drop for LoadCallbacks {
    fn drop(&mut self) {
        if let Some((_, on_error)) = self.terminal.take() {
            let reason = if thread::panicking() { "loader panicked" } else { "request dropped" };
            on_error(anyhow!("Model load abandoned before it settled ({reason})"));
        }
    }
}

/// Asynchronous model source.
pub trait AssetLoader {
    /// Starts loading `locator`. Returns immediately; results arrive through `callbacks`.
    fn load(&mut self, locator: &Path, callbacks: LoadCallbacks);
}

/// Shared "still mounted" flag captured by load callbacks.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn mark_dead(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub enum LoadEvent {
    Progress(LoadProgress),
    Loaded(ModelTemplate),
    Failed(anyhow::Error),
}

impl LoadEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LoadEvent::Progress(_) => "progress",
            LoadEvent::Loaded(_) => "success",
            LoadEvent::Failed(_) => "error",
        }
    }
}

/// Receiving end of load callbacks created by [`LoadInbox::callbacks`].
///
/// Callbacks may run on any thread; events are queued until the owner drains them on its own
/// thread. Once the liveness flag is dead, callbacks drop their results.
pub struct LoadInbox {
    sender: Sender<LoadEvent>,
    receiver: Receiver<LoadEvent>,
    liveness: Liveness,
}

impl LoadInbox {
    pub fn new(liveness: Liveness) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver, liveness }
    }

    pub fn callbacks(&self) -> LoadCallbacks {
        let forward = |sender: Sender<LoadEvent>, liveness: Liveness| {
            move |event: LoadEvent| {
                if !liveness.is_alive() {
                    log::debug!("Viewport already disposed; dropping late {} event", event.kind());
                    return;
                }
                // The receiver only disappears together with the session.
                let _ = sender.send(event);
            }
        };
        let success = forward(self.sender.clone(), self.liveness.clone());
        let mut progress = forward(self.sender.clone(), self.liveness.clone());
        let error = forward(self.sender.clone(), self.liveness.clone());
        LoadCallbacks::new(
            move |model| success(LoadEvent::Loaded(model)),
            move |p| progress(LoadEvent::Progress(p)),
            move |err| error(LoadEvent::Failed(err)),
        )
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn try_next(&self) -> Option<LoadEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

/// Loads glTF/GLB files from disk on a worker thread.
pub struct GltfFileLoader {
    chunk_size: usize,
    workers: Vec<JoinHandle<()>>,
}

impl GltfFileLoader {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self { chunk_size: chunk_size.max(1), workers: Vec::new() }
    }

    /// Blocks until every load started so far has settled.
    pub fn wait_idle(&mut self) {
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("Model loader thread panicked");
            }
        }
    }
}

impl Default for GltfFileLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetLoader for GltfFileLoader {
    fn load(&mut self, locator: &Path, mut callbacks: LoadCallbacks) {
        self.workers.retain(|worker| !worker.is_finished());
        let path = locator.to_path_buf();
        let chunk_size = self.chunk_size;
        let spawned = thread::Builder::new().name("model-loader".into()).spawn(move || {
            let result = read_with_progress(&path, chunk_size, &mut callbacks).and_then(|bytes| {
                ModelTemplate::from_gltf_slice(&path.display().to_string(), &bytes, path.parent())
            });
            callbacks.settle(result);
        });
        match spawned {
            Ok(handle) => self.workers.push(handle),
            // The dropped closure reports the failure through the callbacks.
            Err(err) => log::error!("Failed to spawn model loader for {}: {err:?}", locator.display()),
        }
    }
}

fn read_with_progress(path: &Path, chunk_size: usize, callbacks: &mut LoadCallbacks) -> Result<Vec<u8>> {
    let mut file = File::open(path).with_context(|| format!("Failed to open model {}", path.display()))?;
    let total = file.metadata().ok().map(|meta| meta.len());
    let mut bytes = Vec::with_capacity(total.unwrap_or(0) as usize);
    let mut chunk = vec![0u8; chunk_size];
    loop {
        let read = file.read(&mut chunk).with_context(|| format!("Failed to read model {}", path.display()))?;
        if read == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..read]);
        callbacks.progress(LoadProgress { loaded: bytes.len() as u64, total });
    }
    if bytes.is_empty() {
        return Err(anyhow!("Model file {} is empty", path.display()));
    }
    Ok(bytes)
}
