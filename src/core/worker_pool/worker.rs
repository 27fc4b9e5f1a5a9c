//! A worker: one dedicated OS thread owning one engine instance.
//!
//! The engine instance is created on the worker thread and never leaves it.
//! Callers hand the thread closures over a channel and block on a one-slot
//! reply channel, so every engine call is serialized per worker.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::config::WorkerPoolConfig;
use crate::core::error::PoolError;
use crate::engine::{EngineBinding, EngineError};

use super::WorkerId;

/// Closure executed on the worker thread against its engine instance.
type Job<I> = Box<dyn FnOnce(&mut I) + Send>;

/// State shared by every handle to one worker.
struct WorkerCore<I> {
    id: WorkerId,
    /// Dropped on destroy, which ends the thread's receive loop.
    commands: Mutex<Option<Sender<Job<I>>>>,
    /// Held while joining so concurrent destroyers wait for the same teardown.
    thread: Mutex<Option<JoinHandle<()>>>,
    destroyed: Arc<AtomicBool>,
}

/// Cloneable handle to a worker thread.
pub(crate) struct Worker<I> {
    core: Arc<WorkerCore<I>>,
}

impl<I> Clone for Worker<I> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<I: 'static> Worker<I> {
    /// Spawn the worker thread and wait until its engine instance is up.
    pub(crate) fn spawn<B>(
        id: WorkerId,
        binding: &Arc<B>,
        config: &WorkerPoolConfig,
    ) -> Result<Self, PoolError>
    where
        B: EngineBinding<Instance = I>,
    {
        let (command_tx, command_rx) = unbounded::<Job<I>>();
        let (ready_tx, ready_rx) = bounded::<Result<(), EngineError>>(1);
        let destroyed = Arc::new(AtomicBool::new(false));

        let mut builder = thread::Builder::new().name(format!("{}-{}", config.thread_name_prefix, id.0));
        if let Some(stack) = config.thread_stack_size {
            builder = builder.stack_size(stack);
        }

        let thread_binding = Arc::clone(binding);
        let thread_destroyed = Arc::clone(&destroyed);
        let handle = builder
            .spawn(move || run_worker(id, &*thread_binding, &command_rx, &ready_tx, &thread_destroyed))
            .map_err(|e| PoolError::WorkerCreationFailed {
                source: EngineError::Startup(format!("failed to spawn worker thread: {e}")),
            })?;

        let startup = ready_rx.recv().unwrap_or_else(|_| {
            Err(EngineError::Startup("worker thread exited during startup".into()))
        });
        if let Err(source) = startup {
            let _ = handle.join();
            return Err(PoolError::WorkerCreationFailed { source });
        }

        debug!(worker_id = id.0, "Worker started");
        Ok(Self {
            core: Arc::new(WorkerCore {
                id,
                commands: Mutex::new(Some(command_tx)),
                thread: Mutex::new(Some(handle)),
                destroyed,
            }),
        })
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.core.id
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.core.destroyed.load(Ordering::Acquire)
    }

    /// Run `f` on the worker thread and wait for its result.
    pub(crate) fn call<T, F>(&self, operation: &'static str, f: F) -> Result<T, PoolError>
    where
        T: Send + 'static,
        F: FnOnce(&mut I) -> T + Send + 'static,
    {
        let destroyed = || PoolError::WorkerDestroyed {
            operation,
            worker: self.core.id,
        };
        if self.is_destroyed() {
            return Err(destroyed());
        }
        let sender = self.core.commands.lock().clone().ok_or_else(destroyed)?;

        let (reply_tx, reply_rx) = bounded::<T>(1);
        let job: Job<I> = Box::new(move |engine| {
            let _ = reply_tx.send(f(engine));
        });
        sender.send(job).map_err(|_| destroyed())?;
        drop(sender);

        // No reply means the job was discarded or panicked.
        let out = reply_rx.recv().map_err(|_| {
            self.core.destroyed.store(true, Ordering::Release);
            destroyed()
        })?;
        // A result produced after teardown started belongs to a dead instance.
        if self.is_destroyed() {
            return Err(destroyed());
        }
        Ok(out)
    }

    /// Mark the worker destroyed, stop its thread and wait for the engine
    /// instance to be dropped. Returns `false` if the thread panicked.
    ///
    /// Idempotent; concurrent callers all return after the thread has exited.
    pub(crate) fn destroy(&self) -> bool {
        self.core.destroyed.store(true, Ordering::Release);
        self.core.commands.lock().take();

        let mut thread = self.core.thread.lock();
        let Some(handle) = thread.take() else {
            return true;
        };
        match handle.join() {
            Ok(()) => {
                debug!(worker_id = self.core.id.0, "Worker joined");
                true
            }
            Err(_) => {
                warn!(worker_id = self.core.id.0, "Worker thread panicked");
                false
            }
        }
    }
}

fn run_worker<B: EngineBinding>(
    id: WorkerId,
    binding: &B,
    commands: &Receiver<Job<B::Instance>>,
    ready: &Sender<Result<(), EngineError>>,
    destroyed: &AtomicBool,
) {
    let mut engine = match binding.create_instance() {
        Ok(engine) => engine,
        Err(e) => {
            error!(worker_id = id.0, error = %e, "Failed to create engine instance");
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    // Pending jobs are drained after the sender is dropped; the flag check
    // makes them fail with `WorkerDestroyed` instead of running.
    while let Ok(job) = commands.recv() {
        if destroyed.load(Ordering::Acquire) {
            debug!(worker_id = id.0, "Worker destroyed, discarding job");
            break;
        }
        if panic::catch_unwind(AssertUnwindSafe(|| job(&mut engine))).is_err() {
            error!(worker_id = id.0, "Engine call panicked, retiring worker");
            destroyed.store(true, Ordering::Release);
            break;
        }
    }

    drop(engine);
    debug!(worker_id = id.0, "Worker thread exiting");
}
