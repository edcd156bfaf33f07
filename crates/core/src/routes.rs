//! Route constants and builders for the backing API.
//!
//! Kept in `core` so the client and the poller agree on the exact
//! paths without duplicating format strings.

use crate::types::DbId;
use crate::vm::PowerAction;

/// POST: authenticate with email + password.
pub const AUTH_LOGIN: &str = "/auth/login";

/// POST: exchange a refresh token for a new access/refresh pair.
pub const AUTH_REFRESH: &str = "/auth/refresh";

/// GET: the current user (fallback when the access token carries no
/// embedded user claim).
pub const ME: &str = "/@me";

/// GET: live status for one of the current user's VMs.
pub fn vm_status(vm_id: DbId) -> String {
    format!("/@me/vm/{vm_id}/status")
}

/// PATCH: issue a power action against one of the current user's VMs.
pub fn vm_power(vm_id: DbId, action: PowerAction) -> String {
    format!("/@me/vm/{vm_id}/power/{action}")
}
