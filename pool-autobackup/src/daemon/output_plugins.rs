/*!
Notification outputs: mail, webhook and terminal
*/

use std::process::Stdio;
use async_trait::async_trait;
use futures::future::join_all;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, info};

use crate::daemon::config::{OutputConfig, OutputPlugin};
use crate::daemon::error::{AutobackupError, Result};

/// Best-effort message delivery. Never fails towards the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str);
}

/// Trait for output plugins
#[async_trait]
pub trait OutputHandler: Send + Sync {
    /// Name of the output handler
    fn name(&self) -> &'static str;

    async fn send(&self, subject: &str, body: &str) -> Result<()>;
}

/// Fans a notification out to every enabled handler
pub struct OutputManager {
    handlers: Vec<Box<dyn OutputHandler>>,
}

impl OutputManager {
    pub fn new(configs: &[OutputConfig]) -> Self {
        let handlers = configs
            .iter()
            .filter(|config| config.enabled)
            .map(|config| -> Box<dyn OutputHandler> {
                match &config.plugin {
                    OutputPlugin::Mail { command, recipients } => {
                        Box::new(MailOutputHandler::new(command.clone(), recipients.clone()))
                    }
                    OutputPlugin::Webhook { url, auth_token } => {
                        Box::new(WebhookOutputHandler::new(url.clone(), auth_token.clone()))
                    }
                    OutputPlugin::Terminal => Box::new(TerminalOutputHandler),
                }
            })
            .collect::<Vec<_>>();

        info!("Initialized output manager with {} handlers", handlers.len());
        Self { handlers }
    }

    #[cfg(test)]
    pub fn with_handlers(handlers: Vec<Box<dyn OutputHandler>>) -> Self {
        Self { handlers }
    }
}

#[async_trait]
impl Notifier for OutputManager {
    async fn notify(&self, subject: &str, body: &str) {
        info!("{}", body);

        let sends = self.handlers.iter().map(|handler| async move {
            if let Err(e) = handler.send(subject, body).await {
                error!("Handler {} failed to deliver notification: {}", handler.name(), e);
            }
        });
        join_all(sends).await;
    }
}

/// Pipes the body into `<command> -s <subject> <recipient>`, once per recipient
pub struct MailOutputHandler {
    command: String,
    recipients: Vec<String>,
}

impl MailOutputHandler {
    pub fn new(command: String, recipients: Vec<String>) -> Self {
        Self { command, recipients }
    }

    async fn send_to(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        let failed = |reason: String| AutobackupError::NotificationFailed {
            handler: "Mail",
            reason: format!("{}: {}", recipient, reason),
        };

        let mut child = Command::new(&self.command)
            .arg("-s")
            .arg(subject)
            .arg(recipient)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| failed(format!("cannot run {}: {}", self.command, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(body.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(failed(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl OutputHandler for MailOutputHandler {
    fn name(&self) -> &'static str {
        "Mail"
    }

    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let mut first_error = None;
        for recipient in &self.recipients {
            if let Err(e) = self.send_to(recipient, subject, body).await {
                error!("{}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Webhook output handler
pub struct WebhookOutputHandler {
    url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl WebhookOutputHandler {
    pub fn new(url: String, auth_token: Option<String>) -> Self {
        Self {
            url,
            auth_token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl OutputHandler for WebhookOutputHandler {
    fn name(&self) -> &'static str {
        "Webhook"
    }

    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let mut request = self.client.post(&self.url);

        if let Some(ref token) = self.auth_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let payload = serde_json::json!({
            "subject": subject,
            "body": body,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let response = request.json(&payload).send().await?;

        if !response.status().is_success() {
            return Err(AutobackupError::NotificationFailed {
                handler: "Webhook",
                reason: format!("delivery failed: {}", response.status()),
            });
        }

        Ok(())
    }
}

/// Logs the notification
pub struct TerminalOutputHandler;

#[async_trait]
impl OutputHandler for TerminalOutputHandler {
    fn name(&self) -> &'static str {
        "Terminal"
    }

    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        info!("📧 {}: {}", subject, body);
        Ok(())
    }
}
