/*!
Lifecycle state for every recognized device that is attached or awaiting removal
*/

use std::collections::{BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::daemon::connectivity::ConnectivityProbe;
use crate::daemon::error::{AutobackupError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Attached, backup not started yet
    PendingBackup,
    /// Handed to the backup runner
    InBackup,
    /// Backed up; waiting for the disk to be unplugged
    AwaitingRemoval,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub label: String,
    pub state: DeviceState,
}

/// Owns every [`DeviceRecord`].
///
/// All transitions run under one mutex; the lock is only held for the
/// transition itself, never across a backup or a notification. Each mutation
/// wakes the single consumer blocked in [`DeviceTracker::wait_for_work`].
pub struct DeviceTracker {
    pools: HashSet<String>,
    // Kept in insertion order so pending backups drain first-attached-first.
    records: Mutex<Vec<DeviceRecord>>,
    work: Notify,
}

impl DeviceTracker {
    pub fn new<I, S>(pools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pools: pools.into_iter().map(Into::into).collect(),
            records: Mutex::new(Vec::new()),
            work: Notify::new(),
        }
    }

    pub fn is_recognized(&self, label: &str) -> bool {
        self.pools.contains(label)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<DeviceRecord>>> {
        self.records.lock().map_err(|_| AutobackupError::StatePoisoned)
    }

    /// A recognized device was attached. Returns whether a new record was created.
    pub fn record_added(&self, label: &str) -> Result<bool> {
        if !self.is_recognized(label) {
            return Ok(false);
        }

        let created = {
            let mut records = self.lock()?;
            match records.iter().find(|r| r.label == label) {
                Some(existing) => {
                    debug!("Ignoring duplicate add for {} ({:?})", label, existing.state);
                    false
                }
                None => {
                    records.push(DeviceRecord {
                        label: label.to_string(),
                        state: DeviceState::PendingBackup,
                    });
                    true
                }
            }
        };

        if created {
            info!("{} attached, backup pending", label);
        }
        self.work.notify_one();
        Ok(created)
    }

    /// A device was detached. Drops a pending or awaiting-removal record; a
    /// pending backup is never started afterwards. A record in `InBackup` is
    /// kept, so a remove+re-add while the backup runs does not start another
    /// one. Returns the dropped state.
    pub fn record_removed(&self, label: &str) -> Result<Option<DeviceState>> {
        let removed = {
            let mut records = self.lock()?;
            let position = records.iter().position(|r| r.label == label);
            match position {
                Some(index) if records[index].state == DeviceState::InBackup => {
                    warn!("{} removed while its backup is running, ignoring", label);
                    None
                }
                Some(index) => Some(records.remove(index).state),
                None => None,
            }
        };

        match removed {
            Some(DeviceState::PendingBackup) => info!("{} removed before its backup started", label),
            Some(_) => info!("{} removed", label),
            None => {}
        }

        self.work.notify_one();
        Ok(removed)
    }

    /// Moves every pending record to `InBackup` and returns their labels in
    /// the order they were attached.
    pub fn take_pending_backups(&self) -> Result<Vec<String>> {
        let mut records = self.lock()?;
        Ok(records
            .iter_mut()
            .filter(|r| r.state == DeviceState::PendingBackup)
            .map(|r| {
                r.state = DeviceState::InBackup;
                r.label.clone()
            })
            .collect())
    }

    /// Backup finished. No-op if the record vanished or is not `InBackup`.
    pub fn mark_awaiting_removal(&self, label: &str) -> Result<bool> {
        let marked = {
            let mut records = self.lock()?;
            match records.iter_mut().find(|r| r.label == label) {
                Some(record) if record.state == DeviceState::InBackup => {
                    record.state = DeviceState::AwaitingRemoval;
                    true
                }
                Some(record) => {
                    warn!("Cannot mark {} awaiting removal from state {:?}", label, record.state);
                    false
                }
                None => {
                    warn!("Cannot mark {} awaiting removal: device no longer tracked", label);
                    false
                }
            }
        };

        if marked {
            self.work.notify_one();
        }
        Ok(marked)
    }

    /// Backup failed. Drops the `InBackup` record so nothing alerts for it.
    pub fn abandon_backup(&self, label: &str) -> Result<bool> {
        let mut records = self.lock()?;
        let position = records
            .iter()
            .position(|r| r.label == label && r.state == DeviceState::InBackup);
        match position {
            Some(index) => {
                records.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn snapshot_awaiting_removal(&self) -> Result<BTreeSet<String>> {
        let records = self.lock()?;
        Ok(records
            .iter()
            .filter(|r| r.state == DeviceState::AwaitingRemoval)
            .map(|r| r.label.clone())
            .collect())
    }

    /// Drops the `AwaitingRemoval` record for `label` if `probe` no longer sees it.
    pub fn prune_if_disconnected(&self, label: &str, probe: &dyn ConnectivityProbe) -> Result<bool> {
        if probe.is_connected(label) {
            return Ok(false);
        }

        let pruned = {
            let mut records = self.lock()?;
            let position = records
                .iter()
                .position(|r| r.label == label && r.state == DeviceState::AwaitingRemoval);
            match position {
                Some(index) => {
                    records.remove(index);
                    true
                }
                None => false,
            }
        };

        if pruned {
            info!("{} is no longer connected", label);
        }
        Ok(pruned)
    }

    pub fn state_of(&self, label: &str) -> Result<Option<DeviceState>> {
        let records = self.lock()?;
        Ok(records.iter().find(|r| r.label == label).map(|r| r.state))
    }

    /// Nothing pending and nothing awaiting removal
    pub fn is_idle(&self) -> Result<bool> {
        let records = self.lock()?;
        Ok(records.iter().all(|r| r.state == DeviceState::InBackup))
    }

    /// Blocks until a transition happens, or until `timeout` elapses.
    /// Returns `false` on timeout.
    ///
    /// A notification sent while nobody waits is kept, so a mutation between
    /// an emptiness check and this call is not lost.
    pub async fn wait_for_work(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.work.notified()).await.is_ok(),
            None => {
                self.work.notified().await;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct FixedProbe(bool);

    impl ConnectivityProbe for FixedProbe {
        fn is_connected(&self, _label: &str) -> bool {
            self.0
        }
    }

    fn tracker() -> DeviceTracker {
        DeviceTracker::new(["tank", "pool1", "pool2"])
    }

    #[test]
    fn unknown_labels_never_get_a_record() {
        let tracker = tracker();
        assert!(!tracker.record_added("usbstick").unwrap());
        assert_eq!(tracker.state_of("usbstick").unwrap(), None);
        assert_eq!(tracker.record_removed("usbstick").unwrap(), None);
        assert!(tracker.take_pending_backups().unwrap().is_empty());
        assert!(tracker.is_idle().unwrap());
    }

    #[test]
    fn duplicate_adds_are_ignored_in_every_state() {
        let tracker = tracker();
        assert!(tracker.record_added("tank").unwrap());
        assert!(!tracker.record_added("tank").unwrap());
        assert_eq!(tracker.state_of("tank").unwrap(), Some(DeviceState::PendingBackup));

        assert_eq!(tracker.take_pending_backups().unwrap(), vec!["tank"]);
        assert!(!tracker.record_added("tank").unwrap());
        assert_eq!(tracker.state_of("tank").unwrap(), Some(DeviceState::InBackup));

        assert!(tracker.mark_awaiting_removal("tank").unwrap());
        assert!(!tracker.record_added("tank").unwrap());
        assert_eq!(tracker.state_of("tank").unwrap(), Some(DeviceState::AwaitingRemoval));
        assert!(tracker.take_pending_backups().unwrap().is_empty());
    }

    #[test]
    fn pending_backups_drain_in_attach_order_once() {
        let tracker = tracker();
        tracker.record_added("pool2").unwrap();
        tracker.record_added("tank").unwrap();
        tracker.record_added("pool1").unwrap();

        assert_eq!(tracker.take_pending_backups().unwrap(), vec!["pool2", "tank", "pool1"]);
        assert!(tracker.take_pending_backups().unwrap().is_empty());

        tracker.mark_awaiting_removal("tank").unwrap();
        tracker.record_removed("tank").unwrap();
        tracker.record_added("tank").unwrap();
        assert_eq!(tracker.take_pending_backups().unwrap(), vec!["tank"]);
    }

    #[test]
    fn remove_while_pending_drops_record() {
        let tracker = tracker();
        tracker.record_added("tank").unwrap();
        assert_eq!(tracker.record_removed("tank").unwrap(), Some(DeviceState::PendingBackup));
        assert!(tracker.take_pending_backups().unwrap().is_empty());
        assert_eq!(tracker.state_of("tank").unwrap(), None);
    }

    #[test]
    fn remove_and_readd_during_backup_keep_the_running_backup() {
        let tracker = tracker();
        tracker.record_added("tank").unwrap();
        tracker.take_pending_backups().unwrap();

        assert_eq!(tracker.record_removed("tank").unwrap(), None);
        assert!(!tracker.record_added("tank").unwrap());
        assert_eq!(tracker.state_of("tank").unwrap(), Some(DeviceState::InBackup));
        assert!(tracker.take_pending_backups().unwrap().is_empty());

        assert!(tracker.mark_awaiting_removal("tank").unwrap());
        assert_eq!(tracker.snapshot_awaiting_removal().unwrap().into_iter().collect::<Vec<_>>(), vec!["tank"]);
    }

    #[test]
    fn mark_requires_in_backup() {
        let tracker = tracker();
        assert!(!tracker.mark_awaiting_removal("tank").unwrap());

        tracker.record_added("tank").unwrap();
        assert!(!tracker.mark_awaiting_removal("tank").unwrap());
        assert_eq!(tracker.state_of("tank").unwrap(), Some(DeviceState::PendingBackup));
    }

    #[test]
    fn awaiting_removal_until_removed_or_disconnected() {
        let tracker = tracker();
        for label in ["tank", "pool1"] {
            tracker.record_added(label).unwrap();
        }
        for label in tracker.take_pending_backups().unwrap() {
            tracker.mark_awaiting_removal(&label).unwrap();
        }
        assert_eq!(
            tracker.snapshot_awaiting_removal().unwrap().into_iter().collect::<Vec<_>>(),
            vec!["pool1", "tank"]
        );
        assert!(!tracker.is_idle().unwrap());

        assert!(!tracker.prune_if_disconnected("tank", &FixedProbe(true)).unwrap());
        assert!(tracker.prune_if_disconnected("tank", &FixedProbe(false)).unwrap());
        assert_eq!(tracker.record_removed("pool1").unwrap(), Some(DeviceState::AwaitingRemoval));

        assert!(tracker.snapshot_awaiting_removal().unwrap().is_empty());
        assert!(tracker.is_idle().unwrap());
    }

    #[test]
    fn prune_leaves_other_states_alone() {
        let tracker = tracker();
        tracker.record_added("tank").unwrap();
        assert!(!tracker.prune_if_disconnected("tank", &FixedProbe(false)).unwrap());
        assert_eq!(tracker.state_of("tank").unwrap(), Some(DeviceState::PendingBackup));
    }

    #[test]
    fn abandoned_backup_leaves_no_record() {
        let tracker = tracker();
        tracker.record_added("tank").unwrap();
        tracker.take_pending_backups().unwrap();
        assert!(tracker.abandon_backup("tank").unwrap());
        assert_eq!(tracker.state_of("tank").unwrap(), None);
        assert!(!tracker.abandon_backup("tank").unwrap());
    }

    #[tokio::test]
    async fn wait_for_work_times_out_without_mutation() {
        let tracker = tracker();
        assert!(!tracker.wait_for_work(Some(Duration::from_millis(20))).await);
    }

    #[tokio::test]
    async fn notification_before_wait_is_not_lost() {
        let tracker = tracker();
        tracker.record_added("tank").unwrap();
        assert!(tracker.wait_for_work(Some(Duration::from_millis(20))).await);
    }

    #[tokio::test]
    async fn waiter_wakes_on_producer_thread_mutation() {
        let tracker = Arc::new(tracker());
        let producer = {
            let tracker = tracker.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                tracker.record_added("pool1").unwrap();
            })
        };

        assert!(tracker.wait_for_work(None).await);
        producer.join().unwrap();
        assert_eq!(tracker.take_pending_backups().unwrap(), vec!["pool1"]);
    }
}
