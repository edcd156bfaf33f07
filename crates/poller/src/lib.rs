//! `vmpanel-poller` library crate.
//!
//! [`StatusPoller`] keeps a live projection of VM status for the
//! current user's inventory. The binary entrypoint lives in `main.rs`.

pub mod config;
pub mod poller;

pub use config::PollerConfig;
pub use poller::StatusPoller;
