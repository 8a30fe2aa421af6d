//! Pacing and scheduling for railsweep.
//!
//! - [`jitter`] samples randomized delays and sleeps them cancellably
//! - [`scheduler`] drives the continuous-mode outer loop between sweeps

pub mod jitter;
pub mod scheduler;

pub use jitter::{sample_delay, Pacer};
pub use scheduler::{next_run_timestamp, run_loop};
