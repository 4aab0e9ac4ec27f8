/*!
Device hotplug events and the filter that feeds recognized pools into the tracker
*/

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};

use crate::daemon::config::IngestionConfig;
use crate::daemon::error::Result;
use crate::daemon::state_manager::DeviceTracker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAction {
    Add,
    Remove,
    /// change, bind, unbind, ...
    Other(String),
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAction::Add => write!(f, "add"),
            DeviceAction::Remove => write!(f, "remove"),
            DeviceAction::Other(action) => write!(f, "{}", action),
        }
    }
}

/// One raw event from the device-event source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub action: DeviceAction,
    pub fs_type: Option<String>,
    pub label: Option<String>,
    pub uuid: Option<String>,
}

/// An event that concerns a configured pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    Attached(String),
    Detached(String),
}

/// Drops everything that is not an add/remove of a configured pool member
#[derive(Debug, Clone)]
pub struct EventFilter {
    fs_type: String,
    pools: HashSet<String>,
}

impl EventFilter {
    pub fn new<I, S>(config: &IngestionConfig, pools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fs_type: config.fs_type.clone(),
            pools: pools.into_iter().map(Into::into).collect(),
        }
    }

    pub fn classify(&self, event: &DeviceEvent) -> Option<PoolEvent> {
        if event.fs_type.as_deref() != Some(self.fs_type.as_str()) {
            return None;
        }
        let label = event.label.as_deref().filter(|label| self.pools.contains(*label))?;

        match event.action {
            DeviceAction::Add => Some(PoolEvent::Attached(label.to_string())),
            DeviceAction::Remove => Some(PoolEvent::Detached(label.to_string())),
            DeviceAction::Other(_) => None,
        }
    }
}

/// Forwards accepted events to the [`DeviceTracker`]
pub struct EventIngestion {
    filter: EventFilter,
    tracker: Arc<DeviceTracker>,
}

impl EventIngestion {
    pub fn new(filter: EventFilter, tracker: Arc<DeviceTracker>) -> Self {
        Self { filter, tracker }
    }

    pub fn handle(&self, event: &DeviceEvent) -> Result<Option<PoolEvent>> {
        debug!(
            "Event {} for {} uuid {}",
            event.action,
            event.label.as_deref().unwrap_or("-"),
            event.uuid.as_deref().unwrap_or("-")
        );

        let accepted = self.filter.classify(event);
        match &accepted {
            Some(PoolEvent::Attached(label)) => {
                info!("Pool disk {} plugged in", label);
                self.tracker.record_added(label)?;
            }
            Some(PoolEvent::Detached(label)) => {
                info!("Pool disk {} unplugged", label);
                self.tracker.record_removed(label)?;
            }
            None => {}
        }
        Ok(accepted)
    }

    /// Consume `events` until the stream ends, the source reports an error
    /// or the tracker fails
    pub async fn run<S>(&self, events: S) -> Result<()>
    where
        S: Stream<Item = Result<DeviceEvent>>,
    {
        tokio::pin!(events);
        while let Some(event) = events.next().await {
            self.handle(&event?)?;
        }
        Ok(())
    }
}
