//! `vmpanel-core` -- pure domain types for the VM dashboard client.
//!
//! Models and API route builders shared by the session/HTTP layer
//! (`vmpanel-client`) and the status poller (`vmpanel-poller`). No IO
//! and zero internal dependencies.

pub mod routes;
pub mod types;
pub mod user;
pub mod vm;

pub use types::DbId;
pub use user::User;
pub use vm::{NetIo, PowerAction, PowerState, ResourceUsage, Vm, VmStatus, VmWithStatus};
