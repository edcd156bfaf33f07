//! Single-flight coordinator for the token refresh exchange.
//!
//! Exactly one refresh operation may be in flight system-wide. The
//! first 401 to arrive installs a shared future in the slot
//! (*acquire*); every concurrent 401 clones it (*join*) and awaits the
//! same result. The slot is cleared by whichever awaiter finishes
//! last to observe it still holding that future, so release happens
//! exactly once per operation regardless of errors or a cancelled
//! leader (remaining waiters keep driving the shared future).

use std::sync::Mutex;

use futures::future::{BoxFuture, FutureExt, Shared};

/// Result delivered to every waiter when the refresh attempt fails.
/// Deliberately carries no detail: the caller's original 401 is the
/// error that matters, this only signals "do not retry".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("token refresh failed")]
pub struct RefreshFailed;

type SharedRefresh = Shared<BoxFuture<'static, Result<String, RefreshFailed>>>;

/// One pending-operation slot with acquire-or-join semantics.
#[derive(Default)]
pub struct RefreshGate {
    slot: Mutex<Option<SharedRefresh>>,
}

impl RefreshGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` unless one is already in flight, in which case
    /// join it. Resolves with the new access token shared by all
    /// waiters, or [`RefreshFailed`] for all of them together.
    pub async fn run<F>(&self, operation: F) -> Result<String, RefreshFailed>
    where
        F: FnOnce() -> BoxFuture<'static, Result<String, RefreshFailed>>,
    {
        let fut = {
            let mut slot = self.slot.lock().expect("refresh gate lock poisoned");
            match slot.as_ref() {
                Some(in_flight) => in_flight.clone(),
                None => {
                    let fresh = operation().shared();
                    *slot = Some(fresh.clone());
                    fresh
                }
            }
        };

        let result = fut.clone().await;

        // Clear the slot iff it still holds this operation, so a
        // refresh started after completion is never discarded.
        let mut slot = self.slot.lock().expect("refresh gate lock poisoned");
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&fut)) {
            *slot = None;
        }
        result
    }

    /// Whether a refresh operation is currently installed.
    pub fn is_in_flight(&self) -> bool {
        self.slot
            .lock()
            .expect("refresh gate lock poisoned")
            .is_some()
    }
}
