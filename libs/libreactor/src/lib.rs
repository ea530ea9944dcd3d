//! # libreactor
//!
//! Threading primitives for the remote parameter service:
//!
//! - [`worker`]: named threads running a unit of work in a loop
//! - [`reactor`]: a poll loop on such a thread, woken through an inband pipe

pub mod reactor;
pub mod worker;

pub use reactor::{
    ClientId, EventListener, Reactor, ReactorConfig, ReactorContext, ReactorError, SetChange,
    Waker,
};
pub use worker::{Step, Worker, WorkerError, WorkerThread};
