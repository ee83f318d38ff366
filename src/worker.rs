//! Background pipeline worker.
//!
//! A `PipelineWorker` owns one thread that runs pipeline jobs off the caller's
//! thread. Requests are debounced: a job only starts once no newer submission
//! has arrived for the debounce window, and the newest job wins. Every
//! submission bumps an epoch counter; a job publishes its results only while
//! the epoch it was submitted with is still current, so stale work is dropped
//! silently.
//!
//! Run one worker per stage lane (heightmap, preview, export, thumbnails) so
//! that requests only supersede requests of the same kind.

use crate::colorize::ColorSpace;
use crate::config::{GeometrySettings, PrintSettings};
use crate::decode::{Codec, ImageCodec};
use crate::depth::Heightmap;
use crate::pipeline::{self, MeshPreview, Recipe, Thumbnail};
use crate::stl::export_stl;
use crate::stops::{ColorStop, Filament};
use crossbeam_channel::{self as channel, Receiver, RecvTimeoutError, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Worker configuration
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Quiet period before a submitted job starts
    pub debounce: Duration,
    /// Codec used by heightmap jobs
    pub codec: ImageCodec,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            codec: ImageCodec::default(),
        }
    }
}

/// Work a worker can run
#[derive(Clone, Debug)]
pub enum Job {
    /// Decode an image and build its heightmap
    Heightmap {
        bytes: Vec<u8>,
        geometry: GeometrySettings,
    },
    /// Build the colored preview mesh
    Preview {
        heightmap: Arc<Heightmap>,
        print: PrintSettings,
        stops: Vec<ColorStop>,
        filaments: Vec<Filament>,
        space: ColorSpace,
    },
    /// Serialize the relief to binary STL
    Export {
        heightmap: Arc<Heightmap>,
        print: PrintSettings,
    },
    /// One 2D thumbnail per recipe
    Thumbnails {
        heightmap: Arc<Heightmap>,
        recipes: Vec<Recipe>,
        geometry: GeometrySettings,
        print: PrintSettings,
        max_dim: u32,
    },
}

/// Results published by the worker, tagged with the submitting epoch
#[derive(Debug)]
pub enum WorkerEvent {
    Heightmap { epoch: u64, heightmap: Heightmap },
    Preview { epoch: u64, preview: MeshPreview },
    Stl { epoch: u64, bytes: Vec<u8> },
    Thumbnail {
        epoch: u64,
        thumbnail: Thumbnail,
        completed: usize,
        total: usize,
    },
    ThumbnailsDone { epoch: u64, total: usize },
    Failed { epoch: u64, message: String },
}

impl WorkerEvent {
    pub fn epoch(&self) -> u64 {
        match self {
            WorkerEvent::Heightmap { epoch, .. }
            | WorkerEvent::Preview { epoch, .. }
            | WorkerEvent::Stl { epoch, .. }
            | WorkerEvent::Thumbnail { epoch, .. }
            | WorkerEvent::ThumbnailsDone { epoch, .. }
            | WorkerEvent::Failed { epoch, .. } => *epoch,
        }
    }
}

enum Command {
    Submit { epoch: u64, job: Job },
    Stop,
}

/// Handle to a background pipeline thread
pub struct PipelineWorker {
    tx_cmd: Sender<Command>,
    rx_event: Receiver<WorkerEvent>,
    epoch: Arc<AtomicU64>,
    processing: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl PipelineWorker {
    pub fn new(config: WorkerConfig) -> Self {
        let (tx_cmd, rx_cmd) = channel::unbounded::<Command>();
        let (tx_event, rx_event) = channel::unbounded::<WorkerEvent>();
        let epoch = Arc::new(AtomicU64::new(0));
        let processing = Arc::new(AtomicBool::new(false));

        let ctx = WorkerContext {
            rx_cmd,
            tx_event,
            epoch: Arc::clone(&epoch),
            processing: Arc::clone(&processing),
            config,
        };
        let thread_handle = thread::Builder::new()
            .name("lithoforge-worker".into())
            .spawn(move || worker_thread(ctx))
            .map_err(|e| log::error!("Failed to spawn worker thread: {}", e))
            .ok();

        Self {
            tx_cmd,
            rx_event,
            epoch,
            processing,
            thread_handle,
        }
    }

    /// Queue a job, superseding anything pending or running. Returns its epoch.
    pub fn submit(&self, job: Job) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if self.tx_cmd.send(Command::Submit { epoch, job }).is_err() {
            log::warn!("Worker thread is gone, job {} dropped", epoch);
        }
        epoch
    }

    /// Invalidate pending and running work without queueing anything new
    pub fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// True while a job is executing
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn try_recv(&self) -> Option<WorkerEvent> {
        self.rx_event.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<WorkerEvent> {
        self.rx_event.recv_timeout(timeout).ok()
    }
}

impl Default for PipelineWorker {
    fn default() -> Self {
        Self::new(WorkerConfig::default())
    }
}

impl Drop for PipelineWorker {
    fn drop(&mut self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx_cmd.send(Command::Stop);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

struct WorkerContext {
    rx_cmd: Receiver<Command>,
    tx_event: Sender<WorkerEvent>,
    epoch: Arc<AtomicU64>,
    processing: Arc<AtomicBool>,
    config: WorkerConfig,
}

/// Where a running job sends its results
trait EventSink {
    fn is_current(&self, epoch: u64) -> bool;

    /// Returns false once the event was dropped or nobody is listening
    fn publish(&self, event: WorkerEvent) -> bool;
}

impl EventSink for WorkerContext {
    #[inline]
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn publish(&self, event: WorkerEvent) -> bool {
        if !self.is_current(event.epoch()) {
            log::debug!("Discarding stale result from epoch {}", event.epoch());
            return false;
        }
        self.tx_event.send(event).is_ok()
    }
}

/// Clears the processing flag on every exit path, panics included
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn start(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn worker_thread(ctx: WorkerContext) {
    loop {
        let (mut epoch, mut job) = match ctx.rx_cmd.recv() {
            Ok(Command::Submit { epoch, job }) => (epoch, job),
            Ok(Command::Stop) | Err(_) => return,
        };

        // Debounce: wait for a quiet window, newest submission wins
        loop {
            match ctx.rx_cmd.recv_timeout(ctx.config.debounce) {
                Ok(Command::Submit { epoch: e, job: j }) => {
                    epoch = e;
                    job = j;
                }
                Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => break,
            }
        }

        if !ctx.is_current(epoch) {
            continue;
        }

        let outcome = {
            let _guard = ProcessingGuard::start(&ctx.processing);
            panic::catch_unwind(AssertUnwindSafe(|| run_job(&ctx, epoch, job)))
        };

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };
        if let Some(message) = failure {
            log::error!("Pipeline job {} failed: {}", epoch, message);
            ctx.publish(WorkerEvent::Failed { epoch, message });
        }
    }
}

fn run_job(ctx: &WorkerContext, epoch: u64, job: Job) -> crate::Result<()> {
    match job {
        Job::Heightmap { bytes, geometry } => {
            let codec: &dyn Codec = &ctx.config.codec;
            let heightmap = pipeline::process_image_bytes(codec, &bytes, &geometry)?;
            ctx.publish(WorkerEvent::Heightmap { epoch, heightmap });
        }
        Job::Preview {
            heightmap,
            print,
            stops,
            filaments,
            space,
        } => {
            let preview = pipeline::build_preview(&heightmap, &print, &stops, &filaments, space);
            ctx.publish(WorkerEvent::Preview { epoch, preview });
        }
        Job::Export { heightmap, print } => {
            let bytes = export_stl(&heightmap, &print)?;
            ctx.publish(WorkerEvent::Stl { epoch, bytes });
        }
        Job::Thumbnails {
            heightmap,
            recipes,
            geometry,
            print,
            max_dim,
        } => run_thumbnails(ctx, epoch, &heightmap, &recipes, &geometry, &print, max_dim),
    }
    Ok(())
}

/// Render recipes one at a time, stopping as soon as the batch goes stale
fn run_thumbnails<S: EventSink>(
    sink: &S,
    epoch: u64,
    heightmap: &Heightmap,
    recipes: &[Recipe],
    geometry: &GeometrySettings,
    print: &PrintSettings,
    max_dim: u32,
) {
    let total = recipes.len();
    for (i, recipe) in recipes.iter().enumerate() {
        if !sink.is_current(epoch) {
            log::debug!("Thumbnail batch {} cancelled after {} of {}", epoch, i, total);
            return;
        }
        let thumbnail = pipeline::render_thumbnail(i, heightmap, recipe, geometry, print, max_dim);
        if !sink.publish(WorkerEvent::Thumbnail {
            epoch,
            thumbnail,
            completed: i + 1,
            total,
        }) {
            return;
        }
        thread::yield_now();
    }
    sink.publish(WorkerEvent::ThumbnailsDone { epoch, total });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker task panicked".to_string()
    }
}
