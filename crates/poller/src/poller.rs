//! Periodic VM status synchronization.
//!
//! [`StatusPoller`] owns the projection of VMs-with-status for the
//! current user: one concurrent status fetch per VM on a fixed
//! interval, 404 reconciliation against the user's inventory, and
//! manual single/bulk refresh. Readers only ever see an immutable
//! snapshot swapped in atomically at batch completion.
//!
//! Batches are numbered; a batch result is applied only if no newer
//! batch has been applied already, so a slow periodic tick can not
//! overwrite a fresher manual refresh.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use vmpanel_client::{ApiClient, SessionManager};
use vmpanel_core::{DbId, PowerAction, VmStatus, VmWithStatus};

/// Fixed delay between periodic `fetch_all` batches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

struct Projection {
    /// Current read model; swapped wholesale, never edited in place.
    entries: Arc<Vec<VmWithStatus>>,
    /// Sequence number of the batch that produced `entries`.
    applied_seq: u64,
}

/// Keeps the VM status projection in sync with the backing API for
/// exactly the VMs in the current user's inventory.
pub struct StatusPoller {
    api: ApiClient,
    session: Arc<SessionManager>,
    projection: RwLock<Projection>,
    /// Monotonic batch counter; see [`StatusPoller::apply_batch`].
    batch_seq: AtomicU64,
}

impl StatusPoller {
    pub fn new(api: ApiClient) -> Self {
        let session = api.session().clone();
        Self {
            api,
            session,
            projection: RwLock::new(Projection {
                entries: Arc::new(Vec::new()),
                applied_seq: 0,
            }),
            batch_seq: AtomicU64::new(0),
        }
    }

    /// The current projection. Cheap; the `Arc` is shared with the
    /// poller, which never mutates a published snapshot.
    pub fn snapshot(&self) -> Arc<Vec<VmWithStatus>> {
        self.read().entries.clone()
    }

    /// Fetch the live status of one VM.
    ///
    /// A 404 means the VM was deleted server-side: it is removed from
    /// the user's inventory and from the projection, and `None` is
    /// returned. Any other failure is logged and leaves the VM in a
    /// "status unavailable" state; no error escapes to the batch.
    pub async fn fetch_status(&self, vm_id: DbId) -> Option<VmStatus> {
        match self.api.vm_status(vm_id).await {
            Ok(status) => Some(status),
            Err(e) if e.is_not_found() => {
                tracing::info!(vm_id, "VM no longer exists server-side; removing from inventory");
                self.session.remove_vm(vm_id);
                self.drop_entry(vm_id);
                None
            }
            Err(e) => {
                tracing::warn!(vm_id, error = %e, "VM status fetch failed");
                None
            }
        }
    }

    /// Fetch statuses for every VM in the inventory, all in parallel,
    /// and swap in the resulting projection once all fetches settle.
    ///
    /// With `show_loading`, every VM is first published as loading
    /// (optimistic UI). A VM enters the result only if its fetch
    /// succeeded or it is still in the inventory after the batch's 404
    /// reconciliations, so a sibling fetch cannot resurrect a VM
    /// removed mid-batch.
    pub async fn fetch_all(&self, show_loading: bool) {
        let seq = self.next_seq();
        let vms = self.session.vms();

        if vms.is_empty() {
            self.apply_batch(seq, Vec::new());
            return;
        }

        if show_loading {
            self.swap_entries(vms.iter().cloned().map(VmWithStatus::loading).collect());
        }

        // Issue every fetch before awaiting any; completion order
        // across VMs is unspecified.
        let fetches = vms.iter().map(|vm| self.fetch_status(vm.id));
        let statuses = futures::future::join_all(fetches).await;

        let remaining: HashSet<DbId> = self.session.vms().iter().map(|vm| vm.id).collect();
        let now = Utc::now();
        let entries = vms
            .into_iter()
            .zip(statuses)
            .filter_map(|(vm, status)| {
                if status.is_none() && !remaining.contains(&vm.id) {
                    return None;
                }
                Some(VmWithStatus {
                    vm,
                    status,
                    is_loading_status: false,
                    last_updated: Some(now),
                })
            })
            .collect();

        self.apply_batch(seq, entries);
    }

    /// Refresh a single VM's status, updating only that projection
    /// entry -- and only if the VM is still in the inventory once the
    /// fetch settles (it may have been removed concurrently).
    pub async fn refresh_one(&self, vm_id: DbId, show_loading: bool) {
        if show_loading {
            self.update_entry(vm_id, |entry| entry.is_loading_status = true);
        }

        let status = self.fetch_status(vm_id).await;

        if !self.session.has_vm(vm_id) {
            return;
        }
        let now = Utc::now();
        self.update_entry(vm_id, |entry| {
            entry.status = status.clone();
            entry.is_loading_status = false;
            entry.last_updated = Some(now);
        });
    }

    /// User-triggered "refresh all", with loading indicators.
    pub async fn refresh_all(&self) {
        self.fetch_all(true).await;
    }

    /// Run the periodic poll loop until cancelled. Loading indicators
    /// are shown only on the very first pass. An in-flight batch is
    /// never aborted; cancellation takes effect at the next tick.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            "Status poller started"
        );

        let mut ticker = tokio::time::interval(interval);
        let mut first = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Status poller stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.fetch_all(first).await;
                    first = false;
                }
            }
        }
    }

    // ---- power actions ----------------------------------------------------

    pub async fn start(&self, vm_id: DbId) -> bool {
        self.power(vm_id, PowerAction::Start).await
    }

    pub async fn stop(&self, vm_id: DbId) -> bool {
        self.power(vm_id, PowerAction::Stop).await
    }

    pub async fn restart(&self, vm_id: DbId) -> bool {
        self.power(vm_id, PowerAction::Reboot).await
    }

    /// Issue one idempotent power request. Does not touch the
    /// projection; callers follow up with [`StatusPoller::refresh_one`]
    /// to observe the effect.
    async fn power(&self, vm_id: DbId, action: PowerAction) -> bool {
        match self.api.power(vm_id, action).await {
            Ok(()) => {
                tracing::info!(vm_id, %action, "Power action accepted");
                true
            }
            Err(e) => {
                tracing::warn!(vm_id, %action, error = %e, "Power action failed");
                false
            }
        }
    }

    // ---- projection plumbing ----------------------------------------------

    fn next_seq(&self) -> u64 {
        self.batch_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Publish a batch result unless a newer batch already landed
    /// (apply-if-newer: an old slow tick must not clobber a fresher
    /// manual refresh).
    fn apply_batch(&self, seq: u64, entries: Vec<VmWithStatus>) {
        let mut projection = self.write();
        if seq <= projection.applied_seq {
            tracing::debug!(
                seq,
                applied_seq = projection.applied_seq,
                "Discarding stale status batch"
            );
            return;
        }
        self.log_transitions(&projection.entries, &entries);
        projection.applied_seq = seq;
        projection.entries = Arc::new(entries);
    }

    /// Swap in entries without touching the applied sequence (used for
    /// the optimistic loading display, which the settling batch will
    /// overwrite).
    fn swap_entries(&self, entries: Vec<VmWithStatus>) {
        self.write().entries = Arc::new(entries);
    }

    /// Remove one VM from the projection (404 reconciliation).
    fn drop_entry(&self, vm_id: DbId) {
        let mut projection = self.write();
        if !projection.entries.iter().any(|entry| entry.vm.id == vm_id) {
            return;
        }
        let entries = projection
            .entries
            .iter()
            .filter(|entry| entry.vm.id != vm_id)
            .cloned()
            .collect();
        projection.entries = Arc::new(entries);
    }

    /// Clone-on-write update of a single projection entry.
    fn update_entry(&self, vm_id: DbId, apply: impl Fn(&mut VmWithStatus)) {
        let mut projection = self.write();
        let mut entries: Vec<VmWithStatus> = projection.entries.as_ref().clone();
        let Some(entry) = entries.iter_mut().find(|entry| entry.vm.id == vm_id) else {
            return;
        };
        apply(entry);
        projection.entries = Arc::new(entries);
    }

    /// Log status string changes between two published snapshots.
    fn log_transitions(&self, old: &[VmWithStatus], new: &[VmWithStatus]) {
        for entry in new {
            let Some(status) = entry.status.as_ref() else {
                continue;
            };
            let previous = old
                .iter()
                .find(|e| e.vm.id == entry.vm.id)
                .and_then(|e| e.status.as_ref());
            match previous {
                Some(prev) if prev.status == status.status => {}
                _ => {
                    tracing::info!(
                        vm_id = entry.vm.id,
                        hostname = %entry.vm.hostname,
                        status = %status.status,
                        "VM status changed"
                    );
                }
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Projection> {
        self.projection.read().expect("projection lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Projection> {
        self.projection.write().expect("projection lock poisoned")
    }
}
