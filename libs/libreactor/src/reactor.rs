//! Poll-based event reactor
//!
//! One dedicated thread polls the registered descriptors plus an inband wake
//! pipe and dispatches readiness to an [`EventListener`]. Other threads talk to
//! the loop only through the pipe: [`Waker::trigger`] asks the listener to run
//! [`EventListener::on_process`] on the reactor thread, and `stop` posts an exit
//! request before joining.
//!
//! Once started, the descriptor set belongs to the reactor thread. Callbacks
//! mutate it through the [`ReactorContext`] they receive; doing so from any
//! other thread is a programming error and panics.

use crate::worker::{Step, Worker, WorkerError, WorkerThread};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd::pipe2;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// Identifier chosen by the client when registering a descriptor
pub type ClientId = u32;

const TAG_PROCESS: u16 = 0;
const TAG_EXIT: u16 = 1;

/// Whether a callback changed the registered descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetChange {
    Unchanged,
    /// The loop re-polls instead of scanning the stale set
    Changed,
}

/// Callbacks invoked on the reactor thread
pub trait EventListener: Send + 'static {
    /// A registered descriptor is readable
    fn on_event(&mut self, ctx: &mut ReactorContext, fd: RawFd) -> SetChange;

    /// POLLERR on a registered descriptor
    fn on_error(&mut self, _ctx: &mut ReactorContext, _fd: RawFd) -> SetChange {
        SetChange::Unchanged
    }

    /// POLLHUP on a registered descriptor
    fn on_hangup(&mut self, _ctx: &mut ReactorContext, _fd: RawFd) -> SetChange {
        SetChange::Unchanged
    }

    /// The alarm armed with [`ReactorContext::set_alarm`] expired
    fn on_alarm(&mut self, _ctx: &mut ReactorContext) {}

    /// `poll` itself failed. The loop carries on with the next iteration.
    fn on_poll_error(&mut self, _ctx: &mut ReactorContext, _error: &io::Error) {}

    /// A trigger posted with [`Waker::trigger`] reached the reactor thread
    fn on_process(&mut self, _ctx: &mut ReactorContext, _event_id: u16) -> SetChange {
        SetChange::Unchanged
    }
}

/// Reactor errors
#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    #[error("Reactor {0} is already started")]
    AlreadyStarted(String),
    #[error("Client id {0} is already registered")]
    DuplicateId(ClientId),
    #[error("Failed to create wake pipe: {0}")]
    WakePipe(#[source] io::Error),
    #[error("Failed to post wake message: {0}")]
    Wake(#[source] io::Error),
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Reactor configuration
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Name of the loop thread
    pub name: String,
    /// Log every dispatched poll event at trace level
    pub trace_events: bool,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            name: "reactor".to_string(),
            trace_events: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WakeMessage {
    Process(u16),
    Exit,
}

impl WakeMessage {
    /// Low 16 bits carry the tag, high 16 bits the event id
    fn encode(self) -> [u8; 4] {
        let word = match self {
            WakeMessage::Process(event_id) => (u32::from(event_id) << 16) | u32::from(TAG_PROCESS),
            WakeMessage::Exit => u32::from(TAG_EXIT),
        };
        word.to_ne_bytes()
    }

    fn decode(bytes: [u8; 4]) -> Self {
        let word = u32::from_ne_bytes(bytes);
        match (word & 0xffff) as u16 {
            TAG_PROCESS => WakeMessage::Process((word >> 16) as u16),
            TAG_EXIT => WakeMessage::Exit,
            tag => panic!("malformed wake message: unknown tag {tag}"),
        }
    }
}

/// Handle posting requests to a reactor from any thread
#[derive(Clone)]
pub struct Waker {
    pipe: Arc<File>,
}

impl Waker {
    /// Run [`EventListener::on_process`] with `event_id` on the reactor thread.
    ///
    /// Triggers posted before `start` are queued in the pipe and dispatched
    /// once the loop runs, in posting order. Once the pipe is full this fails
    /// with [`ReactorError::Wake`] rather than blocking.
    pub fn trigger(&self, event_id: u16) -> Result<(), ReactorError> {
        self.post(WakeMessage::Process(event_id))
    }

    /// Fails with `WouldBlock` instead of waiting when the pipe is full
    fn post(&self, message: WakeMessage) -> Result<(), ReactorError> {
        // Writes of at most PIPE_BUF bytes are atomic
        (&*self.pipe)
            .write_all(&message.encode())
            .map_err(ReactorError::Wake)
    }

    /// Post the exit request, waiting for the loop to drain a full pipe
    fn post_exit(&self) -> Result<(), ReactorError> {
        loop {
            match self.post(WakeMessage::Exit) {
                Err(ReactorError::Wake(e)) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(1));
                }
                result => return result,
            }
        }
    }
}

struct Descriptor {
    id: ClientId,
    fd: OwnedFd,
    listen: bool,
}

/// Descriptor set and alarm owned by the reactor
pub struct ReactorContext {
    descriptors: Vec<Descriptor>,
    polled: usize,
    alarm: Option<Instant>,
    trace_events: bool,
}

impl ReactorContext {
    fn new(trace_events: bool) -> Self {
        Self {
            descriptors: Vec::new(),
            polled: 0,
            alarm: None,
            trace_events,
        }
    }

    /// Take ownership of `fd`. Only descriptors with `listen` set are polled.
    pub fn register(&mut self, id: ClientId, fd: OwnedFd, listen: bool) -> Result<(), ReactorError> {
        if self.descriptors.iter().any(|d| d.id == id) {
            return Err(ReactorError::DuplicateId(id));
        }

        if self.trace_events {
            trace!("Register fd {} as client {} (listen: {})", fd.as_raw_fd(), id, listen);
        }

        self.descriptors.push(Descriptor { id, fd, listen });
        if listen {
            self.polled += 1;
        }
        Ok(())
    }

    /// Remove and close the descriptor registered as `id`
    pub fn unregister_and_close(&mut self, id: ClientId) -> bool {
        let Some(index) = self.descriptors.iter().position(|d| d.id == id) else {
            return false;
        };

        let removed = self.descriptors.remove(index);
        if removed.listen {
            self.polled -= 1;
        }
        if self.trace_events {
            trace!("Close fd {} of client {}", removed.fd.as_raw_fd(), id);
        }
        true
    }

    /// Remove and close every registered descriptor
    pub fn close_all(&mut self) {
        self.descriptors.clear();
        self.polled = 0;
    }

    /// Raw descriptor registered as `id`
    pub fn descriptor(&self, id: ClientId) -> Option<RawFd> {
        self.descriptors
            .iter()
            .find(|d| d.id == id)
            .map(|d| d.fd.as_raw_fd())
    }

    /// Number of registered descriptors, polled or not
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Arm the alarm `duration` from now, replacing any pending one
    pub fn set_alarm(&mut self, duration: Duration) {
        debug!("Alarm armed in {:?}", duration);
        self.alarm = Some(Instant::now() + duration);
    }

    pub fn cancel_alarm(&mut self) {
        debug!("Alarm cancelled");
        self.alarm = None;
    }

    pub fn alarm_deadline(&self) -> Option<Instant> {
        self.alarm
    }

    /// Poll timeout in milliseconds, -1 for no alarm
    fn poll_timeout_ms(&self, now: Instant) -> i32 {
        match self.alarm {
            None => -1,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(now);
                // Round up so poll never returns before the deadline
                let ms = remaining.as_nanos().div_ceil(1_000_000);
                i32::try_from(ms).unwrap_or(i32::MAX)
            }
        }
    }

    fn alarm_due(&self, now: Instant) -> bool {
        self.alarm.is_some_and(|deadline| deadline <= now)
    }
}

struct Core<L> {
    ctx: ReactorContext,
    listener: L,
    wake: File,
}

impl<L: EventListener> Core<L> {
    fn run_once(&mut self) -> Step {
        let timeout = PollTimeout::try_from(self.ctx.poll_timeout_ms(Instant::now()))
            .unwrap_or(PollTimeout::NONE);

        // The wake pipe always comes first
        let mut raw_fds = Vec::with_capacity(self.ctx.polled + 1);
        let (result, revents) = {
            let mut fds = Vec::with_capacity(self.ctx.polled + 1);
            fds.push(PollFd::new(self.wake.as_fd(), PollFlags::POLLIN));
            raw_fds.push(self.wake.as_raw_fd());
            for descriptor in self.ctx.descriptors.iter().filter(|d| d.listen) {
                fds.push(PollFd::new(descriptor.fd.as_fd(), PollFlags::POLLIN));
                raw_fds.push(descriptor.fd.as_raw_fd());
            }
            debug_assert_eq!(fds.len(), self.ctx.polled + 1);

            let result = poll(&mut fds, timeout);
            let revents: Vec<PollFlags> = fds
                .iter()
                .map(|fd| fd.revents().unwrap_or(PollFlags::empty()))
                .collect();
            (result, revents)
        };

        match result {
            Ok(0) => {
                if self.ctx.alarm_due(Instant::now()) {
                    self.ctx.alarm = None;
                    self.listener.on_alarm(&mut self.ctx);
                }
                return Step::Continue;
            }
            Ok(_) => {}
            Err(Errno::EINTR) => return Step::Continue,
            Err(errno) => {
                let err = io::Error::from(errno);
                error!("Poll failed: {}", err);
                self.listener.on_poll_error(&mut self.ctx, &err);
                return Step::Continue;
            }
        }

        if revents[0].contains(PollFlags::POLLIN) {
            match self.read_wake_message() {
                WakeMessage::Exit => {
                    debug!("Reactor exit requested");
                    return Step::Finish;
                }
                WakeMessage::Process(event_id) => {
                    if self.ctx.trace_events {
                        trace!("Process event {}", event_id);
                    }
                    if self.listener.on_process(&mut self.ctx, event_id) == SetChange::Changed {
                        return Step::Continue;
                    }
                }
            }
        }

        for (&fd, &flags) in raw_fds.iter().zip(revents.iter()).skip(1) {
            if flags.contains(PollFlags::POLLERR) {
                if self.ctx.trace_events {
                    trace!("POLLERR on fd {}", fd);
                }
                if self.listener.on_error(&mut self.ctx, fd) == SetChange::Changed {
                    break;
                }
            }
            if flags.contains(PollFlags::POLLHUP) {
                if self.ctx.trace_events {
                    trace!("POLLHUP on fd {}", fd);
                }
                if self.listener.on_hangup(&mut self.ctx, fd) == SetChange::Changed {
                    break;
                }
            }
            if flags.contains(PollFlags::POLLIN) {
                if self.ctx.trace_events {
                    trace!("POLLIN on fd {}", fd);
                }
                if self.listener.on_event(&mut self.ctx, fd) == SetChange::Changed {
                    break;
                }
            }
        }

        Step::Continue
    }

    fn read_wake_message(&mut self) -> WakeMessage {
        let mut bytes = [0u8; 4];
        if let Err(e) = (&self.wake).read_exact(&mut bytes) {
            panic!("malformed wake message: {e}");
        }
        WakeMessage::decode(bytes)
    }
}

struct ReactorLoop<L> {
    core: Arc<Mutex<Core<L>>>,
}

impl<L: EventListener> Worker for ReactorLoop<L> {
    fn process(&mut self) -> Step {
        let mut core = lock(&self.core);
        // Run until the exit request is consumed so a restart never reads it
        while core.run_once() == Step::Continue {}
        Step::Finish
    }
}

fn lock<L>(core: &Mutex<Core<L>>) -> MutexGuard<'_, Core<L>> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Event reactor running its loop on a dedicated thread
pub struct Reactor<L: EventListener> {
    name: String,
    core: Arc<Mutex<Core<L>>>,
    thread: WorkerThread<ReactorLoop<L>>,
    waker: Waker,
}

impl<L: EventListener> Reactor<L> {
    /// Create a stopped reactor. The wake pipe is opened right away.
    pub fn new(listener: L, config: ReactorConfig) -> Result<Self, ReactorError> {
        let (read, write) =
            pipe2(OFlag::O_CLOEXEC).map_err(|e| ReactorError::WakePipe(e.into()))?;
        // Posting never blocks the caller, even with the loop stopped
        fcntl(write.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK))
            .map_err(|e| ReactorError::WakePipe(e.into()))?;

        let waker = Waker {
            pipe: Arc::new(File::from(write)),
        };
        let exit = waker.clone();
        let thread = WorkerThread::new(config.name.clone()).with_shutdown(Box::new(move || {
            if let Err(e) = exit.post_exit() {
                error!("Failed to post exit request: {}", e);
            }
        }));

        let core = Core {
            ctx: ReactorContext::new(config.trace_events),
            listener,
            wake: File::from(read),
        };

        Ok(Self {
            name: config.name,
            core: Arc::new(Mutex::new(core)),
            thread,
            waker,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_started(&self) -> bool {
        self.thread.is_started()
    }

    /// True when called from the reactor thread
    pub fn in_thread_context(&self) -> bool {
        self.thread.in_thread_context()
    }

    /// Register a descriptor before the loop runs.
    ///
    /// # Panics
    /// When the reactor is started: use the [`ReactorContext`] given to
    /// callbacks instead.
    pub fn register(&self, id: ClientId, fd: OwnedFd, listen: bool) -> Result<(), ReactorError> {
        self.owned_core().ctx.register(id, fd, listen)
    }

    /// # Panics
    /// When the reactor is started.
    pub fn unregister_and_close(&self, id: ClientId) -> bool {
        self.owned_core().ctx.unregister_and_close(id)
    }

    /// # Panics
    /// When the reactor is started.
    pub fn descriptor(&self, id: ClientId) -> Option<RawFd> {
        self.owned_core().ctx.descriptor(id)
    }

    /// Access the descriptor set and the listener while the loop is stopped.
    ///
    /// # Panics
    /// When the reactor is started.
    pub fn with_context<R>(&self, f: impl FnOnce(&mut ReactorContext, &mut L) -> R) -> R {
        let mut core = self.owned_core();
        let core = &mut *core;
        f(&mut core.ctx, &mut core.listener)
    }

    /// Spawn the loop thread
    pub fn start(&mut self) -> Result<(), ReactorError> {
        if self.thread.is_started() {
            return Err(ReactorError::AlreadyStarted(self.name.clone()));
        }

        self.thread.start(ReactorLoop {
            core: Arc::clone(&self.core),
        })?;
        debug!("Reactor {} started", self.name);
        Ok(())
    }

    /// Post an exit request and join the loop thread. No-op when stopped.
    pub fn stop(&mut self) {
        if !self.thread.is_started() {
            return;
        }

        if self.thread.stop().is_none() {
            error!("Reactor {} loop ended abnormally", self.name);
        }
        debug!("Reactor {} stopped", self.name);
    }

    /// See [`Waker::trigger`]
    pub fn trigger(&self, event_id: u16) -> Result<(), ReactorError> {
        self.waker.trigger(event_id)
    }

    /// Handle for triggering from other threads
    pub fn waker(&self) -> Waker {
        self.waker.clone()
    }

    fn owned_core(&self) -> MutexGuard<'_, Core<L>> {
        assert!(
            !self.thread.is_started(),
            "reactor {}: descriptor set is owned by the reactor thread once started",
            self.name
        );
        lock(&self.core)
    }
}

impl<L: EventListener> Drop for Reactor<L> {
    fn drop(&mut self) {
        self.stop();
    }
}
