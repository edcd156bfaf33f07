//! The authenticated user and their VM inventory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::DbId;
use crate::vm::Vm;

/// A dashboard user as returned by `/auth/login` and `/@me`.
///
/// The user owns their VMs by value. Reconciliation (a VM deleted
/// server-side) replaces the whole list via [`User::without_vm`]
/// rather than editing it in place, so concurrent readers always see
/// a consistent snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: DbId,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Server-assigned order, not guaranteed stable across fetches.
    #[serde(rename = "VMs", default)]
    pub vms: Vec<Vm>,
}

impl User {
    /// Whether the given VM is part of this user's inventory.
    pub fn has_vm(&self, vm_id: DbId) -> bool {
        self.vms.iter().any(|vm| vm.id == vm_id)
    }

    /// A copy of this user with one VM removed from the inventory.
    pub fn without_vm(&self, vm_id: DbId) -> User {
        let mut next = self.clone();
        next.vms.retain(|vm| vm.id != vm_id);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user() -> User {
        serde_json::from_value(serde_json::json!({
            "id": 1,
            "email": "a@b.com",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-06-01T00:00:00Z",
            "VMs": [
                { "id": 5, "hostname": "h1" },
                { "id": 7, "hostname": "h2" },
            ],
        }))
        .expect("user fixture should deserialize")
    }

    #[test]
    fn deserializes_wire_format_with_vms_field() {
        let user = test_user();
        assert_eq!(user.id, 1);
        assert_eq!(user.email, "a@b.com");
        assert_eq!(user.vms.len(), 2);
        assert_eq!(user.vms[0].hostname, "h1");
    }

    #[test]
    fn missing_vms_field_defaults_to_empty() {
        let user: User = serde_json::from_value(serde_json::json!({
            "id": 2,
            "email": "c@d.com",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z",
        }))
        .expect("user without VMs should deserialize");
        assert!(user.vms.is_empty());
    }

    #[test]
    fn without_vm_removes_only_the_target() {
        let user = test_user();
        let next = user.without_vm(7);
        assert!(next.has_vm(5));
        assert!(!next.has_vm(7));
        // Original is untouched.
        assert!(user.has_vm(7));
    }

    #[test]
    fn without_vm_is_a_noop_for_unknown_ids() {
        let user = test_user();
        let next = user.without_vm(999);
        assert_eq!(next.vms.len(), 2);
    }
}
