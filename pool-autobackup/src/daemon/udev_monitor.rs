/*!
udev netlink subscription, run on a dedicated thread
*/

use std::ffi::OsStr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::thread::JoinHandle;
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tokio::sync::oneshot;
use tokio_stream::Stream;
use tracing::{error, info};
use udev::{MonitorBuilder, MonitorSocket};

use crate::daemon::config::IngestionConfig;
use crate::daemon::error::{AutobackupError, Result};
use crate::daemon::event_system::{DeviceAction, DeviceEvent, EventIngestion};
use crate::daemon::shutdown::{self, ShutdownReceiver, ShutdownSender};

impl From<&udev::Event> for DeviceEvent {
    fn from(uevent: &udev::Event) -> Self {
        let property = |key: &str| {
            uevent
                .property_value(key)
                .map(|value| value.to_string_lossy().into_owned())
        };
        let action = match uevent.action().map(OsStr::to_string_lossy).as_deref() {
            Some("add") => DeviceAction::Add,
            Some("remove") => DeviceAction::Remove,
            Some(other) => DeviceAction::Other(other.to_string()),
            None => DeviceAction::Other(String::new()),
        };

        Self {
            action,
            fs_type: property("ID_FS_TYPE"),
            label: property("ID_FS_LABEL"),
            uuid: property("ID_FS_UUID"),
        }
    }
}

struct UdevSocket {
    async_fd: AsyncFd<RawFd>,
    monitor_socket: MonitorSocket,
}

impl UdevSocket {
    fn listen(subsystem: &str) -> Result<Self> {
        let monitor_socket = MonitorBuilder::new()?.match_subsystem(subsystem)?.listen()?;
        let async_fd = AsyncFd::with_interest(monitor_socket.as_raw_fd(), Interest::READABLE)?;
        Ok(Self { async_fd, monitor_socket })
    }

    async fn read(&mut self) -> Result<Vec<DeviceEvent>> {
        loop {
            let mut guard = self.async_fd.readable().await?;
            guard.clear_ready();

            let events = self
                .monitor_socket
                .iter()
                .map(|event| DeviceEvent::from(&event))
                .collect::<Vec<_>>();
            if !events.is_empty() {
                return Ok(events);
            }
        }
    }

    fn into_stream(self) -> impl Stream<Item = Result<DeviceEvent>> {
        let mut socket = self;
        async_stream::stream! {
            loop {
                match socket.read().await {
                    Ok(events) => {
                        for event in events {
                            yield Ok(event);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        }
    }
}

/// Live subscription to udev. Events are handed to [`EventIngestion`] on the
/// `udev-events` thread; the monitor socket never leaves that thread.
pub struct UdevSubscription {
    shutdown: Option<ShutdownSender>,
    outcome: oneshot::Receiver<Result<()>>,
    thread: Option<JoinHandle<()>>,
}

impl UdevSubscription {
    pub fn start(config: &IngestionConfig, ingestion: EventIngestion) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = shutdown::new();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let subsystem = config.subsystem.clone();

        let thread = std::thread::Builder::new()
            .name("udev-events".to_string())
            .spawn(move || {
                let result = listen_until_shutdown(&subsystem, &ingestion, shutdown_rx);
                if let Err(e) = &result {
                    error!("udev listener stopped: {}", e);
                }
                let _ = outcome_tx.send(result);
            })?;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            outcome: outcome_rx,
            thread: Some(thread),
        })
    }

    /// Resolves only if the listener thread stops on its own
    pub async fn closed(&mut self) -> Result<()> {
        match (&mut self.outcome).await {
            Ok(result) => result,
            Err(_) => Err(AutobackupError::EventSource(
                "udev listener exited without reporting".to_string(),
            )),
        }
    }

    /// Unsubscribe and wait for the listener thread to exit
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.shutdown();
        }
        if let Some(thread) = self.thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => info!("udev listener stopped"),
                _ => error!("udev listener thread panicked"),
            }
        }
    }
}

fn listen_until_shutdown(subsystem: &str, ingestion: &EventIngestion, mut shutdown: ShutdownReceiver) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

    runtime.block_on(async {
        let socket = UdevSocket::listen(subsystem)?;
        info!("Listening for udev {} events", subsystem);

        tokio::select! {
            result = ingestion.run(socket.into_stream()) => {
                result?;
                Err(AutobackupError::EventSource("udev event stream ended".to_string()))
            }
            _ = shutdown.wait() => Ok(()),
        }
    })
}
