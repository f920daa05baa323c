//! Rill: a level-ordered propagation network for functional reactive
//! programming.
//!
//! Time-varying sources ("reactives") connect through transformation edges
//! ("links") into a network that evaluates deterministically in response to
//! external stimuli: links run strictly in ascending topological level, each
//! input is consumed at most once per round, downstream values arrive within
//! the same cycle and upstream values defer to a later one.
//!
//! ```text
//! user threads ──▶ NetworkRef (mailbox) ──▶ worker ──▶ propagation engine
//!                                              │            │
//!                        executors ◀── async links          ▼
//!                            │                        Network (links,
//!                            └──── follow-up stimuli   levels, alive map)
//! ```
//!
//! The combinator vocabulary (`map`, `filter`, `merge`, ...) is library code
//! layered on this crate's surface: build links with [`Link::new`] and the
//! [`value_fn`]/[`try_value_fn`] adapters, drive them through a
//! [`NetworkRef`].

pub mod behavior;
mod engine;
pub mod event_stream;
pub mod executor;
pub mod fn_behavior;
pub mod link;
pub mod netref;
pub mod network;
pub mod reactive;
pub mod scheduler;
pub mod seq_stream;
pub mod value;

pub use behavior::Behavior;
pub use event_stream::{EventStream, DEFAULT_MAX_QUEUE};
pub use executor::{Executor, ThreadExecutor};
pub use fn_behavior::FnBehavior;
pub use link::{
    default_link_fn, try_value_fn, value_fn, CompleteFn, ErrorFn, Link, LinkFilter, LinkFn,
    LinkId, LinkInput, Outcome,
};
pub use netref::{current_netref, with_netref, NetworkRef, Stimulus};
pub use network::{Level, Network, ReactiveId, REBUILD_THRESHOLD};
pub use reactive::{same_reactive, DeliverError, Reactive, SharedReactive, WeakReactive};
pub use scheduler::{Scheduler, TaskThunk, ThreadScheduler, TimerTask, VirtualScheduler};
pub use seq_stream::SeqStream;
pub use value::{now_millis, Occurrence, Timestamp, Value};
