//! Fixed-size worker pool driven through a two-barrier handshake.
//!
//! The dispatcher writes the command word, meets the workers at the entry
//! barrier, and waits at the exit barrier until every worker has run its
//! slice. A failing slice records its cause in its own slot and raises a
//! sticky flag; later rounds still meet both barriers but run no slices.
//! Faults are handed back by [`WorkerPool::terminate`]. Rounds issued from
//! several threads through a shared pool run one at a time.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, info_span, warn};

use crate::error::{PoolError, SliceError};

/// Work partitioned across the pool by worker index.
///
/// Both methods are called concurrently for distinct indices.
pub trait Scene: Send + Sync {
    /// Advance simulation state for slice `index`.
    fn update_slice(&self, index: usize, phase: u8) -> Result<(), SliceError>;
    /// Render slice `index`.
    fn render_slice(&self, index: usize, phase: u8) -> Result<(), SliceError>;
}

/// Operation carried by the command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Meet the barriers without calling the scene.
    None,
    /// [`Scene::update_slice`].
    Update,
    /// [`Scene::render_slice`].
    Render,
}

/// Decoded command word: opcode in bits 0-1, phase in bits 2-9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// Operation.
    pub op: Op,
    /// Phase handed to the slice.
    pub phase: u8,
}

impl Command {
    /// Packed representation.
    pub const fn pack(self) -> u32 {
        let op = match self.op {
            Op::None => 0,
            Op::Update => 1,
            Op::Render => 2,
        };
        op | (self.phase as u32) << 2
    }

    /// Decode a packed word; opcode 3 reads as [`Op::None`].
    pub const fn unpack(word: u32) -> Self {
        let op = match word & 0x3 {
            1 => Op::Update,
            2 => Op::Render,
            _ => Op::None,
        };
        Self {
            op,
            phase: ((word >> 2) & 0xFF) as u8,
        }
    }
}

/// Cause recorded by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceFault {
    /// Worker index.
    pub index: usize,
    /// Text cause from the slice.
    pub cause: String,
}

struct Shared {
    command: AtomicU32,
    failed: AtomicBool,
    entry: Barrier,
    exit: Barrier,
    scenes: Vec<RwLock<Option<Arc<dyn Scene>>>>,
    slots: Vec<Mutex<Option<String>>>,
}

impl Shared {
    fn run_slice(&self, index: usize, scene: &dyn Scene) {
        let Command { op, phase } = Command::unpack(self.command.load(Ordering::Acquire));
        // Work already past this check finishes its round.
        if self.failed.load(Ordering::Acquire) {
            return;
        }
        let result = match op {
            Op::None => Ok(()),
            Op::Update => scene.update_slice(index, phase),
            Op::Render => scene.render_slice(index, phase),
        };
        if let Err(err) = result {
            error!(worker = index, phase, error = %err, "slice failed");
            let mut slot = self.slots[index].lock();
            if slot.is_none() {
                *slot = Some(err.0);
            }
            self.failed.store(true, Ordering::Release);
        }
    }
}

fn worker(index: usize, shared: Arc<Shared>, gate: mpsc::Receiver<bool>) {
    // A dropped sender means the pool never came up.
    if !gate.recv().unwrap_or(false) {
        return;
    }
    debug!(worker = index, "worker started");
    loop {
        shared.entry.wait();
        let scene = shared.scenes[index].read().clone();
        let Some(scene) = scene else {
            break;
        };
        shared.run_slice(index, scene.as_ref());
        shared.exit.wait();
    }
    shared.exit.wait();
    debug!(worker = index, "worker left");
}

/// Pool of worker threads bound to one scene.
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
    /// Held from the command store until the exit barrier releases.
    round: Mutex<()>,
}

impl WorkerPool {
    /// Spawn `threads` workers over `scene`.
    pub fn new(threads: usize, scene: Arc<dyn Scene>) -> Result<Self, PoolError> {
        if threads == 0 {
            return Err(PoolError::NoWorkers);
        }
        let shared = Arc::new(Shared {
            command: AtomicU32::new(0),
            failed: AtomicBool::new(false),
            entry: Barrier::new(threads + 1),
            exit: Barrier::new(threads + 1),
            scenes: (0..threads).map(|_| RwLock::new(Some(scene.clone()))).collect(),
            slots: (0..threads).map(|_| Mutex::new(None)).collect(),
        });

        let mut handles = Vec::with_capacity(threads);
        let mut gates = Vec::with_capacity(threads);
        for index in 0..threads {
            let (tx, rx) = mpsc::channel();
            let worker_shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("tracer-worker-{index}"))
                .spawn(move || worker(index, worker_shared, rx));
            match spawned {
                Ok(handle) => {
                    handles.push(handle);
                    gates.push(tx);
                }
                Err(source) => {
                    drop(gates);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(PoolError::Spawn { index, source });
                }
            }
        }
        for gate in gates {
            // Workers only exit early when the gate is dropped.
            let _ = gate.send(true);
        }

        info!(threads, "worker pool started");
        Ok(Self {
            shared,
            handles,
            round: Mutex::new(()),
        })
    }

    /// Number of workers.
    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Whether any slice has failed since the pool started.
    pub fn failed(&self) -> bool {
        self.shared.failed.load(Ordering::Acquire)
    }

    /// Run `update_slice(i, phase)` on every worker; blocks until all finish.
    pub fn update_scene(&self, phase: u8) {
        self.dispatch(Command {
            op: Op::Update,
            phase,
        });
    }

    /// Run `render_slice(i, phase)` on every worker; blocks until all finish.
    pub fn render_scene(&self, phase: u8) {
        self.dispatch(Command {
            op: Op::Render,
            phase,
        });
    }

    fn dispatch(&self, command: Command) {
        let _round = self.round.lock();
        let span = info_span!("round", op = ?command.op, phase = command.phase);
        let _guard = span.enter();
        if self.failed() {
            warn!("pool has failed; slices are skipped until teardown");
        }
        self.shared.command.store(command.pack(), Ordering::Release);
        self.shared.entry.wait();
        self.shared.exit.wait();
    }

    /// Stop every worker and collect the recorded faults in index order.
    pub fn terminate(mut self) -> Vec<SliceFault> {
        self.shutdown();
        self.shared
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.lock().take().map(|cause| SliceFault { index, cause })
            })
            .collect()
    }

    fn shutdown(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        for scene in &self.shared.scenes {
            *scene.write() = None;
        }
        self.shared.entry.wait();
        self.shared.exit.wait();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
        info!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
