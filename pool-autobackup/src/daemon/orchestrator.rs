/*!
Main coordinator: runs backups for attached pools and reminds the operator to
unplug them afterwards
*/

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::daemon::{
    alert::{Alert, PulsePattern, alert_from_config},
    backup::{BackupRunner, CommandBackup},
    config::{AutobackupConfig, PoolSettings},
    connectivity::{ByLabelProbe, ConnectivityProbe},
    error::Result,
    event_system::{EventFilter, EventIngestion},
    output_plugins::{Notifier, OutputManager},
    state_manager::DeviceTracker,
};

/// Timing and wording used by the [`Orchestrator`]
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub subject: String,
    pub pools: BTreeMap<String, PoolSettings>,
    /// Pause between removal reminders
    pub liveness_interval: Duration,
    pub start_pattern: PulsePattern,
    pub signal_duration: Duration,
    pub silence_duration: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AutobackupConfig) -> Result<Self> {
        Ok(Self {
            subject: config.notifications.subject.clone(),
            pools: config.pools.clone(),
            liveness_interval: config.alert.liveness_interval(),
            start_pattern: PulsePattern::parse(&config.alert.start_pattern)?,
            signal_duration: config.alert.signal_duration(),
            silence_duration: config.alert.silence_duration(),
        })
    }
}

/// External collaborators driven by the loop
pub struct Collaborators {
    pub backup: Arc<dyn BackupRunner>,
    pub notifier: Arc<dyn Notifier>,
    pub alert: Arc<dyn Alert>,
    pub probe: Arc<dyn ConnectivityProbe>,
}

impl Collaborators {
    pub fn from_config(config: &AutobackupConfig) -> Self {
        Self {
            backup: Arc::new(CommandBackup::new(&config.backup, config.pools.clone())),
            notifier: Arc::new(OutputManager::new(&config.notifications.outputs)),
            alert: Arc::from(alert_from_config(&config.alert)),
            probe: Arc::new(ByLabelProbe::new(config.connectivity.by_label_dir.clone())),
        }
    }
}

/// The single consumer of [`DeviceTracker`] work
pub struct Orchestrator {
    tracker: Arc<DeviceTracker>,
    settings: OrchestratorSettings,
    backup: Arc<dyn BackupRunner>,
    notifier: Arc<dyn Notifier>,
    alert: Arc<dyn Alert>,
    probe: Arc<dyn ConnectivityProbe>,
}

impl Orchestrator {
    pub fn new(tracker: Arc<DeviceTracker>, settings: OrchestratorSettings, collaborators: Collaborators) -> Self {
        Self {
            tracker,
            settings,
            backup: collaborators.backup,
            notifier: collaborators.notifier,
            alert: collaborators.alert,
            probe: collaborators.probe,
        }
    }

    /// Runs until an internal fault. Errors returned here are fatal.
    pub async fn run(&self) -> Result<()> {
        info!(
            "🚀 Watching for pools: {}",
            self.settings.pools.keys().cloned().collect::<Vec<_>>().join(", ")
        );

        loop {
            if self.tracker.is_idle()? {
                debug!("Waiting for devices");
                self.tracker.wait_for_work(None).await;
            }

            self.drain_pending_backups().await?;
            self.removal_liveness_cycle().await?;
        }
    }

    /// Back up every pending device, one at a time, until none are left.
    /// Devices attached while a backup runs are picked up by the next round.
    async fn drain_pending_backups(&self) -> Result<()> {
        loop {
            let labels = self.tracker.take_pending_backups()?;
            if labels.is_empty() {
                return Ok(());
            }
            for label in labels {
                self.back_up(&label).await?;
            }
        }
    }

    async fn back_up(&self, label: &str) -> Result<()> {
        self.alert
            .pulse_pattern(
                &self.settings.start_pattern,
                self.settings.signal_duration,
                self.settings.silence_duration,
            )
            .await;

        let pool = self.settings.pools.get(label).cloned().unwrap_or_default();
        self.notifier
            .notify(
                &self.settings.subject,
                &format!(
                    "Plugged in disk {} that is matching configuration:\n    {}\n    \
                     Starting backup! You will be notified once the backup has completed \
                     and you can safely unplug the disk.",
                    label, pool
                ),
            )
            .await;

        match self.backup.run_backup(label).await {
            Ok(()) => {
                let body = if self.tracker.mark_awaiting_removal(label)? {
                    format!("Backup finished. You can safely unplug the disk {} now", label)
                } else {
                    format!("Backup of disk {} finished", label)
                };
                self.notifier.notify(&self.settings.subject, &body).await;
            }
            Err(e) => {
                error!("{}", e);
                self.tracker.abandon_backup(label)?;
                self.notifier
                    .notify(
                        &self.settings.subject,
                        &format!(
                            "Backup of disk {} failed: {}\n    Check the logs before unplugging the disk.",
                            label, e
                        ),
                    )
                    .await;
            }
        }
        Ok(())
    }

    /// One round of the removal reminder: forget devices that are gone, then
    /// pulse and pause if any are still plugged in.
    async fn removal_liveness_cycle(&self) -> Result<()> {
        let awaiting = self.tracker.snapshot_awaiting_removal()?;
        if awaiting.is_empty() {
            return Ok(());
        }

        for label in &awaiting {
            self.tracker.prune_if_disconnected(label, self.probe.as_ref())?;
        }
        if self.tracker.snapshot_awaiting_removal()?.is_empty() {
            return Ok(());
        }

        self.alert.pulse().await;
        tokio::time::sleep(self.settings.liveness_interval).await;
        Ok(())
    }
}

/// Everything the daemon runs, wired from one config
pub struct Daemon {
    pub tracker: Arc<DeviceTracker>,
    pub orchestrator: Orchestrator,
    pub ingestion: EventIngestion,
}

impl Daemon {
    pub fn from_config(config: &AutobackupConfig) -> Result<Self> {
        let pools = config.pools.keys().cloned().collect::<Vec<_>>();
        let tracker = Arc::new(DeviceTracker::new(pools.clone()));

        let orchestrator = Orchestrator::new(
            tracker.clone(),
            OrchestratorSettings::from_config(config)?,
            Collaborators::from_config(config),
        );
        let ingestion = EventIngestion::new(EventFilter::new(&config.ingestion, pools), tracker.clone());

        Ok(Self {
            tracker,
            orchestrator,
            ingestion,
        })
    }
}
