use crate::model::{ServiceStatus, Transition};
use tokio::sync::watch;

/// Point-in-time view of what the manager believes about the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StatusSnapshot {
    pub observed: ServiceStatus,
    /// Set only while a start/stop command is in flight.
    pub transition: Option<Transition>,
    /// `observed` came from a reconciliation poll. Command outcomes are provisional.
    pub confirmed: bool,
}

impl StatusSnapshot {
    /// Running and not mid-command. `Starting` never counts.
    pub fn is_running(&self) -> bool {
        self.transition.is_none() && self.observed.is_running()
    }

    pub fn is_busy(&self) -> bool {
        self.transition.is_some()
    }

    pub fn label(&self) -> &'static str {
        match (self.transition, self.observed) {
            (Some(Transition::Starting), _) => "starting",
            (Some(Transition::Stopping), _) => "stopping",
            (None, ServiceStatus::Running) => "running",
            (None, ServiceStatus::Stopped) => "stopped",
        }
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            observed: ServiceStatus::Stopped,
            transition: None,
            confirmed: false,
        }
    }
}

pub(crate) type StatusView = watch::Receiver<StatusSnapshot>;

/// Single owner of the status belief. Readers subscribe; only the lifecycle controller writes.
pub(crate) struct StatusStore {
    tx: watch::Sender<StatusSnapshot>,
}

impl StatusStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StatusSnapshot::default());
        Self { tx }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> StatusView {
        self.tx.subscribe()
    }

    pub(super) fn begin(&self, transition: Transition) {
        self.update(|s| s.transition = Some(transition));
    }

    /// Command finished: record its outcome as provisional belief.
    pub(super) fn settle(&self, observed: ServiceStatus) {
        self.update(|s| {
            s.transition = None;
            s.observed = observed;
            s.confirmed = false;
        });
    }

    /// Command failed without telling us anything about the process.
    pub(super) fn abandon(&self) {
        self.update(|s| s.transition = None);
    }

    /// Authoritative poll result. Overwrites whatever a recent command set.
    pub(super) fn reconcile(&self, observed: ServiceStatus) {
        self.update(|s| {
            s.observed = observed;
            s.confirmed = true;
        });
    }

    fn update(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        self.tx.send_if_modified(|snapshot| {
            let before = *snapshot;
            f(snapshot);
            before != *snapshot
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_not_running() {
        let store = StatusStore::new();
        store.settle(ServiceStatus::Running);
        assert!(store.snapshot().is_running());

        store.begin(Transition::Stopping);
        let s = store.snapshot();
        assert!(!s.is_running());
        assert!(s.is_busy());
        assert_eq!(s.label(), "stopping");

        store.abandon();
        assert!(store.snapshot().is_running());
    }

    #[test]
    fn poll_confirms_and_overrides_command_belief() {
        let store = StatusStore::new();
        store.settle(ServiceStatus::Running);
        assert!(!store.snapshot().confirmed);

        store.reconcile(ServiceStatus::Stopped);
        let s = store.snapshot();
        assert_eq!(s.observed, ServiceStatus::Stopped);
        assert!(s.confirmed);
    }

    #[tokio::test]
    async fn subscribers_see_changes_only() {
        let store = StatusStore::new();
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        store.abandon();
        assert!(!rx.has_changed().unwrap());

        store.reconcile(ServiceStatus::Running);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().label(), "running");
    }
}
