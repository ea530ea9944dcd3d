//! Named worker threads
//!
//! A [`WorkerThread`] runs one [`Worker`] on a dedicated OS thread, calling
//! [`Worker::process`] until either a stop is requested from the controlling
//! thread or the worker reports it is finished.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error};

/// Linux limits thread names to 15 bytes plus the terminating NUL
pub const MAX_THREAD_NAME_LEN: usize = 15;

/// Outcome of one unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Run another unit unless a stop was requested
    Continue,
    /// Leave the loop now. The thread stays joinable until `stop`.
    Finish,
}

/// Work executed repeatedly on a dedicated thread
pub trait Worker: Send + 'static {
    /// Run one unit of work
    fn process(&mut self) -> Step;
}

/// Hook run on the controlling thread between the stop request and the join
pub type ShutdownHook = Box<dyn FnMut() + Send>;

/// Worker thread errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Thread {0} is already started")]
    AlreadyStarted(String),
    #[error("Failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// A named thread driving a [`Worker`]
pub struct WorkerThread<W: Worker> {
    name: String,
    stop_requested: Arc<AtomicBool>,
    shutdown: Option<ShutdownHook>,
    handle: Option<JoinHandle<W>>,
}

impl<W: Worker> WorkerThread<W> {
    /// Create a stopped thread. Names longer than the kernel limit are truncated.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: truncate_name(name.into()),
            stop_requested: Arc::new(AtomicBool::new(false)),
            shutdown: None,
            handle: None,
        }
    }

    /// Install the hook run by [`WorkerThread::stop`] before joining.
    ///
    /// Workers blocked in a system call need this to be woken up.
    pub fn with_shutdown(mut self, hook: ShutdownHook) -> Self {
        self.shutdown = Some(hook);
        self
    }

    /// Thread name as given to the OS
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }

    /// Id of the running thread, if any
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.handle.as_ref().map(|h| h.thread().id())
    }

    /// True when called from the worker's own thread
    pub fn in_thread_context(&self) -> bool {
        self.thread_id() == Some(thread::current().id())
    }

    /// Spawn the thread and hand it `worker`
    pub fn start(&mut self, mut worker: W) -> Result<(), WorkerError> {
        if self.handle.is_some() {
            return Err(WorkerError::AlreadyStarted(self.name.clone()));
        }

        self.stop_requested.store(false, Ordering::SeqCst);
        let stop_requested = Arc::clone(&self.stop_requested);

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                loop {
                    if worker.process() == Step::Finish {
                        break;
                    }
                    if stop_requested.load(Ordering::SeqCst) {
                        break;
                    }
                }
                worker
            })
            .map_err(|source| WorkerError::Spawn {
                name: self.name.clone(),
                source,
            })?;

        debug!("Thread {} started", self.name);
        self.handle = Some(handle);
        Ok(())
    }

    /// Request a stop, run the shutdown hook and join.
    ///
    /// Returns the worker so it can be restarted. `None` when the thread was
    /// not started or the worker panicked.
    pub fn stop(&mut self) -> Option<W> {
        let handle = self.handle.take()?;

        self.stop_requested.store(true, Ordering::SeqCst);
        if let Some(hook) = self.shutdown.as_mut() {
            hook();
        }

        match handle.join() {
            Ok(worker) => {
                debug!("Thread {} stopped", self.name);
                Some(worker)
            }
            Err(_) => {
                error!("Thread {} panicked", self.name);
                None
            }
        }
    }
}

impl<W: Worker> Drop for WorkerThread<W> {
    fn drop(&mut self) {
        if !thread::panicking() {
            assert!(
                self.handle.is_none(),
                "cannot drop running thread {}",
                self.name
            );
        }
    }
}

fn truncate_name(mut name: String) -> String {
    if name.len() > MAX_THREAD_NAME_LEN {
        let mut end = MAX_THREAD_NAME_LEN;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name
}
