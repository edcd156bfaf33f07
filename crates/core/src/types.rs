//! Shared primitive type aliases.

/// Server-assigned numeric identifier for users and VMs.
pub type DbId = i64;
