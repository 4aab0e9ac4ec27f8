/*!
Configuration management for the autobackup daemon
*/

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::daemon::alert::PulsePattern;
use crate::daemon::error::{AutobackupError, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutobackupConfig {
    /// Recognized pools, keyed by filesystem label
    pub pools: BTreeMap<String, PoolSettings>,
    /// External backup command
    pub backup: BackupConfig,
    /// Device event filtering
    #[serde(default)]
    pub ingestion: IngestionConfig,
    /// Device link lookup
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    /// Audible alert settings
    #[serde(default)]
    pub alert: AlertConfig,
    /// Notification outputs
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Descriptive metadata for one pool. Only used for display.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct PoolSettings {
    pub description: Option<String>,
    /// Where the backup of this pool ends up
    pub target: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

impl fmt::Display for PoolSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(description) = &self.description {
            parts.push(format!("description: {}", description));
        }
        if let Some(target) = &self.target {
            parts.push(format!("target: {}", target));
        }
        for (key, value) in &self.extra {
            parts.push(format!("{}: {}", key, value));
        }
        if parts.is_empty() {
            write!(f, "{{}}")
        } else {
            write!(f, "{{{}}}", parts.join(", "))
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackupConfig {
    /// Program to run for each attached pool
    pub command: String,
    /// Arguments; `{label}` and `{target}` are substituted per device
    #[serde(default = "default_backup_args")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// udev subsystem to subscribe to
    pub subsystem: String,
    /// `ID_FS_TYPE` value that marks a pool member
    pub fs_type: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Directory holding one symlink per attached filesystem label
    pub by_label_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Terminal to ring the bell on. `None` only logs the pulse.
    pub device: Option<PathBuf>,
    /// Pause between removal reminders, in seconds
    pub liveness_interval_secs: u64,
    /// Pattern played when a backup starts
    pub start_pattern: String,
    pub signal_ms: u64,
    pub silence_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub subject: String,
    pub outputs: Vec<OutputConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Output plugin type
    pub plugin: OutputPlugin,
    /// Whether this output is enabled
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OutputPlugin {
    /// Pipe the body into a `mail -s <subject> <recipient>` compatible command
    Mail {
        #[serde(default = "default_mail_command")]
        command: String,
        recipients: Vec<String>,
    },
    Webhook { url: String, auth_token: Option<String> },
    Terminal,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `pool_autobackup=debug`
    pub level: String,
    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

fn default_backup_args() -> Vec<String> {
    vec!["{label}".to_string()]
}

fn default_mail_command() -> String {
    "mail".to_string()
}

fn enabled_by_default() -> bool {
    true
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            subsystem: "block".to_string(),
            fs_type: "zfs_member".to_string(),
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            by_label_dir: PathBuf::from("/dev/disk/by-label"),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            device: Some(PathBuf::from("/dev/tty5")),
            liveness_interval_secs: 3,
            start_pattern: "101111001010".to_string(),
            signal_ms: 100,
            silence_ms: 200,
        }
    }
}

impl AlertConfig {
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    pub fn signal_duration(&self) -> Duration {
        Duration::from_millis(self.signal_ms)
    }

    pub fn silence_duration(&self) -> Duration {
        Duration::from_millis(self.silence_ms)
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            subject: "ZFS-Autobackup with UDEV Trigger".to_string(),
            outputs: vec![OutputConfig {
                plugin: OutputPlugin::Terminal,
                enabled: true,
            }],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl AutobackupConfig {
    /// Read, parse and validate a TOML config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AutobackupConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// `<config dir>/pool-autobackup/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pool-autobackup").join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.pools.is_empty() {
            return Err(AutobackupError::invalid_config("at least one pool must be configured"));
        }
        if let Some(label) = self.pools.keys().find(|label| label.trim().is_empty()) {
            return Err(AutobackupError::invalid_config(format!("invalid pool label {:?}", label)));
        }
        if self.backup.command.trim().is_empty() {
            return Err(AutobackupError::invalid_config("backup.command must not be empty"));
        }
        if self.alert.liveness_interval_secs == 0 {
            return Err(AutobackupError::invalid_config("alert.liveness_interval_secs must be positive"));
        }
        PulsePattern::parse(&self.alert.start_pattern)?;
        if self.ingestion.fs_type.is_empty() {
            return Err(AutobackupError::invalid_config("ingestion.fs_type must not be empty"));
        }

        for output in &self.notifications.outputs {
            match &output.plugin {
                OutputPlugin::Mail { command, recipients } => {
                    if command.trim().is_empty() || recipients.is_empty() {
                        return Err(AutobackupError::invalid_config(
                            "mail output needs a command and at least one recipient",
                        ));
                    }
                }
                OutputPlugin::Webhook { url, .. } => {
                    if !(url.starts_with("http://") || url.starts_with("https://")) {
                        return Err(AutobackupError::invalid_config(format!("webhook url {:?} is not http(s)", url)));
                    }
                }
                OutputPlugin::Terminal => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [pools.tank]
        description = "offsite disk"
        target = "backup/tank"

        [backup]
        command = "/usr/local/bin/zfs-autobackup"
    "#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = AutobackupConfig::from_toml_str(MINIMAL).unwrap();

        assert_eq!(config.pools.len(), 1);
        assert_eq!(config.pools["tank"].target.as_deref(), Some("backup/tank"));
        assert_eq!(config.backup.args, vec!["{label}".to_string()]);
        assert_eq!(config.ingestion.fs_type, "zfs_member");
        assert_eq!(config.ingestion.subsystem, "block");
        assert_eq!(config.connectivity.by_label_dir, PathBuf::from("/dev/disk/by-label"));
        assert_eq!(config.alert.liveness_interval(), Duration::from_secs(3));
        assert_eq!(config.alert.start_pattern, "101111001010");
        assert_eq!(config.notifications.subject, "ZFS-Autobackup with UDEV Trigger");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parses_outputs_and_extra_pool_keys() {
        let config = AutobackupConfig::from_toml_str(
            r#"
            [pools.tank]
            keep = "10,1d1w"

            [backup]
            command = "backup.sh"
            args = ["--pool", "{label}"]

            [[notifications.outputs]]
            plugin = { mail = { recipients = ["root@localhost"] } }

            [[notifications.outputs]]
            plugin = { webhook = { url = "https://hooks.example.com/x" } }
            enabled = false

            [[notifications.outputs]]
            plugin = "terminal"
            "#,
        )
        .unwrap();

        let outputs = &config.notifications.outputs;
        assert_eq!(outputs.len(), 3);
        assert_eq!(
            outputs[0].plugin,
            OutputPlugin::Mail {
                command: "mail".to_string(),
                recipients: vec!["root@localhost".to_string()],
            }
        );
        assert!(outputs[0].enabled);
        assert!(!outputs[1].enabled);
        assert_eq!(outputs[2].plugin, OutputPlugin::Terminal);
        assert_eq!(config.pools["tank"].to_string(), "{keep: \"10,1d1w\"}");
    }

    #[test]
    fn rejects_config_without_pools() {
        let err = AutobackupConfig::from_toml_str(
            r#"
            pools = {}
            [backup]
            command = "backup.sh"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, AutobackupError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_bad_start_pattern() {
        let content = format!("{}\n[alert]\nstart_pattern = \"10x1\"\n", MINIMAL);
        let err = AutobackupConfig::from_toml_str(&content).unwrap_err();
        assert!(matches!(err, AutobackupError::InvalidPattern('x')));
    }

    #[test]
    fn rejects_zero_interval() {
        let content = format!("{}\n[alert]\nliveness_interval_secs = 0\n", MINIMAL);
        assert!(AutobackupConfig::from_toml_str(&content).is_err());
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = AutobackupConfig::from_file(&path).unwrap();
        assert!(config.pools.contains_key("tank"));

        let missing = AutobackupConfig::from_file(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, AutobackupError::Io(_)));
    }
}
