/*!
Audible alerts: single bell pulses and timed pulse patterns
*/

use std::path::PathBuf;
use std::time::Duration;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::daemon::config::AlertConfig;
use crate::daemon::error::{AutobackupError, Result};

/// One step of a pulse pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseStep {
    Signal,
    Silence,
}

/// A sequence of signal/silence steps, written as a string over `{'0','1'}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulsePattern {
    steps: Vec<PulseStep>,
}

impl PulsePattern {
    pub fn parse(bits: &str) -> Result<Self> {
        let steps = bits
            .chars()
            .map(|c| match c {
                '1' => Ok(PulseStep::Signal),
                '0' => Ok(PulseStep::Silence),
                other => Err(AutobackupError::InvalidPattern(other)),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[PulseStep] {
        &self.steps
    }
}

/// Fire-and-forget physical alert
#[async_trait]
pub trait Alert: Send + Sync {
    /// Emit one pulse. Failures are logged, never returned.
    async fn pulse(&self);

    /// Play `pattern` once. Every signal is followed by `signal_duration`,
    /// every silence lasts `silence_duration`.
    async fn pulse_pattern(&self, pattern: &PulsePattern, signal_duration: Duration, silence_duration: Duration) {
        for step in pattern.steps() {
            match step {
                PulseStep::Signal => {
                    self.pulse().await;
                    tokio::time::sleep(signal_duration).await;
                }
                PulseStep::Silence => tokio::time::sleep(silence_duration).await,
            }
        }
    }
}

/// Rings the terminal bell by writing BEL to a tty
pub struct TerminalBell {
    device: PathBuf,
}

impl TerminalBell {
    pub fn new(device: PathBuf) -> Self {
        Self { device }
    }

    async fn ring(&self) -> std::io::Result<()> {
        let mut tty = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&self.device)
            .await?;
        tty.write_all(b"\x07").await?;
        tty.flush().await
    }
}

#[async_trait]
impl Alert for TerminalBell {
    async fn pulse(&self) {
        if let Err(e) = self.ring().await {
            warn!("Failed to ring bell on {}: {}", self.device.display(), e);
        }
    }
}

/// Alert for hosts without a usable tty
pub struct LogAlert;

#[async_trait]
impl Alert for LogAlert {
    async fn pulse(&self) {
        debug!("*beep*");
    }
}

pub fn alert_from_config(config: &AlertConfig) -> Box<dyn Alert> {
    match &config.device {
        Some(device) => Box::new(TerminalBell::new(device.clone())),
        None => Box::new(LogAlert),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[derive(Default)]
    struct CountingAlert {
        pulses: AtomicUsize,
    }

    #[async_trait]
    impl Alert for CountingAlert {
        async fn pulse(&self) {
            self.pulses.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn parses_bits() {
        let pattern = PulsePattern::parse("1010").unwrap();
        assert_eq!(
            pattern.steps(),
            &[PulseStep::Signal, PulseStep::Silence, PulseStep::Signal, PulseStep::Silence]
        );
        assert!(PulsePattern::parse("").unwrap().steps().is_empty());
        assert!(matches!(PulsePattern::parse("1 0"), Err(AutobackupError::InvalidPattern(' '))));
    }

    #[tokio::test]
    async fn pattern_pulses_once_per_signal_and_blocks_for_its_duration() {
        let alert = CountingAlert::default();
        let pattern = PulsePattern::parse("1101").unwrap();

        let started = Instant::now();
        alert
            .pulse_pattern(&pattern, Duration::from_millis(10), Duration::from_millis(20))
            .await;

        assert_eq!(alert.pulses.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn bell_writes_bel_to_device() {
        let dir = tempfile::tempdir().unwrap();
        let tty = dir.path().join("tty");
        std::fs::write(&tty, b"").unwrap();

        let bell = TerminalBell::new(tty.clone());
        bell.pulse().await;
        bell.pulse().await;

        assert_eq!(std::fs::read(&tty).unwrap(), b"\x07\x07");
    }

    #[tokio::test]
    async fn missing_device_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let bell = TerminalBell::new(dir.path().join("no-such-dir").join("tty"));
        bell.pulse().await;
    }
}
