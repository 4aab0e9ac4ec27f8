/*!
Backup execution for an attached pool
*/

use std::collections::BTreeMap;
use std::process::Stdio;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use crate::daemon::config::{BackupConfig, PoolSettings};
use crate::daemon::error::{AutobackupError, Result};

/// Runs the backup of one pool to completion. May take hours.
#[async_trait]
pub trait BackupRunner: Send + Sync {
    async fn run_backup(&self, label: &str) -> Result<()>;
}

/// Runs the configured command once per attached pool
pub struct CommandBackup {
    command: String,
    args: Vec<String>,
    pools: BTreeMap<String, PoolSettings>,
}

impl CommandBackup {
    pub fn new(config: &BackupConfig, pools: BTreeMap<String, PoolSettings>) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            pools,
        }
    }

    /// Substitutes `{label}` and `{target}` in the configured arguments
    pub fn args_for(&self, label: &str) -> Vec<String> {
        let target = self
            .pools
            .get(label)
            .and_then(|pool| pool.target.as_deref())
            .unwrap_or("");
        self.args
            .iter()
            .map(|arg| arg.replace("{label}", label).replace("{target}", target))
            .collect()
    }
}

#[async_trait]
impl BackupRunner for CommandBackup {
    async fn run_backup(&self, label: &str) -> Result<()> {
        let args = self.args_for(label);
        info!("Backing up {}: {} {}", label, self.command, args.join(" "));

        let failed = |reason: String| AutobackupError::BackupFailed {
            label: label.to_string(),
            reason,
        };

        let mut child = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failed(format!("cannot run {}: {}", self.command, e)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (status, _, _) = tokio::join!(
            child.wait(),
            forward_lines(stdout, |line| info!("[{}] {}", label, line)),
            forward_lines(stderr, |line| warn!("[{}] {}", label, line)),
        );
        let status = status.map_err(|e| failed(format!("waiting for {}: {}", self.command, e)))?;

        if !status.success() {
            return Err(failed(format!("{} exited with {}", self.command, status)));
        }

        Ok(())
    }
}

/// Hands every line of `stream` to `emit` as it arrives
async fn forward_lines<R>(stream: Option<R>, emit: impl Fn(&str))
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return;
    };

    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => emit(&line),
            Ok(None) => break,
            Err(e) => {
                warn!("Cannot read backup output: {}", e);
                break;
            }
        }
    }
}
