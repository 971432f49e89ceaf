//! MIME report mail, handed to sendmail.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

use super::RunReport;
use crate::config::{MailConfig, MailWhen};
use crate::utils::errors::{Result, RotateError};

/// Whether `report` should be mailed under `config`.
pub fn should_send(config: &MailConfig, report: &RunReport) -> bool {
    if config.to.is_none() {
        return false;
    }
    match config.when {
        MailWhen::Always => true,
        MailWhen::Failure => !report.succeeded(),
        MailWhen::Never => false,
    }
}

/// Compose a `multipart/mixed` message: summary text plus the full log as
/// an attachment.
pub fn compose(config: &MailConfig, report: &RunReport, boundary: &str) -> String {
    let to = config.to.as_deref().unwrap_or("root");
    let from = config
        .from
        .clone()
        .unwrap_or_else(|| format!("backup-rotate@{}", report.host));
    let subject = format!(
        "[backup-rotate] {} on {}: {}",
        report.name,
        report.host,
        report.status_word()
    );
    let attachment = format!("{}-{}.log", report.name, report.started.format("%Y-%m-%d"));

    let mut message = String::new();
    message.push_str(&format!("From: {from}\r\n"));
    message.push_str(&format!("To: {to}\r\n"));
    message.push_str(&format!("Subject: {subject}\r\n"));
    message.push_str(&format!("Date: {}\r\n", report.finished.to_rfc2822()));
    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str(&format!(
        "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n"
    ));
    message.push_str("\r\n");
    message.push_str("This is a multi-part message in MIME format.\r\n");

    message.push_str(&format!("\r\n--{boundary}\r\n"));
    message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
    message.push_str("Content-Transfer-Encoding: 8bit\r\n");
    message.push_str("\r\n");
    push_crlf(&mut message, &report.summary());

    message.push_str(&format!("\r\n--{boundary}\r\n"));
    message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
    message.push_str("Content-Transfer-Encoding: 8bit\r\n");
    message.push_str(&format!(
        "Content-Disposition: attachment; filename=\"{attachment}\"\r\n"
    ));
    message.push_str("\r\n");
    push_crlf(&mut message, &report.log);

    message.push_str(&format!("\r\n--{boundary}--\r\n"));
    message
}

/// Normalise line endings to CRLF while appending.
fn push_crlf(message: &mut String, text: &str) {
    for line in text.lines() {
        message.push_str(line);
        message.push_str("\r\n");
    }
}

/// Pipe `message` into the configured sendmail command.
pub async fn send(config: &MailConfig, message: &str) -> Result<()> {
    let (program, args) = config
        .sendmail
        .split_first()
        .ok_or_else(|| RotateError::Mail("mail.sendmail is empty".to_string()))?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| RotateError::Mail(format!("failed to run {program}: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(message.as_bytes())
            .await
            .map_err(|e| RotateError::Mail(format!("failed to write to {program}: {e}")))?;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(RotateError::Mail(format!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Send the report if configured to; failures are only logged.
pub async fn deliver(config: &MailConfig, report: &RunReport) {
    if !should_send(config, report) {
        return;
    }

    let boundary = format!("=_backup-rotate_{}", uuid::Uuid::new_v4().simple());
    let message = compose(config, report, &boundary);
    match send(config, &message).await {
        Ok(()) => info!(
            "Report mailed to {}",
            config.to.as_deref().unwrap_or_default()
        ),
        Err(e) => warn!("Failed to mail report: {e}"),
    }
}
