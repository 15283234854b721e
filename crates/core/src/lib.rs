//! Headshot domain core.
//!
//! Pure types and decision logic shared by the stores, the dispatcher and
//! the worker binary. This crate has no internal dependencies; its only
//! I/O is reading environment variables in [`config`].

pub mod config;
pub mod error;
pub mod hashing;
pub mod job;
pub mod job_events;
pub mod retry;
pub mod scheduling;
pub mod style;
pub mod types;
