/*!
Hotplug-driven pool backup: device events in, backups and removal reminders out
*/

pub mod alert;
pub mod backup;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod event_system;
pub mod orchestrator;
pub mod output_plugins;
pub mod shutdown;
pub mod state_manager;
#[cfg(target_os = "linux")]
pub mod udev_monitor;
