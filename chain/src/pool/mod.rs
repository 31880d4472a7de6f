//! Admission pipeline: the front door for incoming transactions.
//!
//! [`receiver::Receiver`] validates submissions (signature, then schema)
//! and queues the accepted ones; [`scheduler::run_scheduler`] is the
//! single block-cutting task that drains the queue into blocks, indexes
//! them and hands them to the broadcast channel.

pub mod receiver;
pub mod scheduler;

pub use receiver::{AdmissionError, PoolConfig, PutOutcome, Receiver};
pub use scheduler::{SchedulerContext, run_scheduler};
