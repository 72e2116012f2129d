//! A work-stealing scheduler where workers talk instead of grab.
//!
//! Filch runs a fixed partition of worker threads, each with a private task
//! deque that no other thread ever touches. An idle worker circulates a
//! small fixed-size steal request; whoever holds it either answers with
//! tasks through a dedicated channel or forwards it to another candidate.
//! When a request runs out of candidates it climbs the binary worker tree
//! as a "lifeline": the parent keeps it and pushes work down the moment it
//! has some, so starved workers go silent instead of polling. The same tree
//! traffic doubles as distributed termination detection, letting the root
//! decide that the whole partition is out of work without ever stopping
//! the world.
//!
//! The message-passing design trades the classic lock-free deque races for
//! explicit channel traffic with a fixed per-worker budget: every worker
//! owns its inboxes, every steal request is a 32-byte copy, and nothing on
//! the hot path takes a lock or allocates.
//!
//! # Example
//!
//! ```rust,no_run
//! use filch::Config;
//!
//! let (result, stats) = filch::run(Config::new(4), |worker| {
//!     worker.spawn(|worker| {
//!         // Tasks may spawn further tasks; idle workers will steal them.
//!         worker.spawn(|_| {});
//!     });
//!     "done"
//! })
//! .unwrap();
//!
//! assert_eq!(result, "done");
//! assert_eq!(stats.tasks_executed(), 2);
//! ```
//!
//! # Acknowledgments
//!
//! The channel-based stealing protocol, lifelines, and the tree termination
//! scheme follow the design of channel work-stealing runtimes for
//! fine-grained task parallelism. The job representation is adapted from
//! `rayon_core` by way of Forte.

// -----------------------------------------------------------------------------
// Boilerplate for building without the standard library

#![no_std]

extern crate alloc;
extern crate std;

// -----------------------------------------------------------------------------
// Modules

mod bits;
mod channel;
mod config;
mod deque;
mod job;
mod request;
mod scheduler;
mod tree;
mod unwind;
mod util;
mod victim;

// -----------------------------------------------------------------------------
// Top-level exports

pub use config::Config;
pub use config::ConfigError;
pub use config::MAX_STEAL_LIMIT;
pub use config::MAX_WORKERS;
pub use config::StealStrategy;
pub use scheduler::Stats;
pub use scheduler::Worker;
pub use scheduler::WorkerStats;
pub use scheduler::run;
