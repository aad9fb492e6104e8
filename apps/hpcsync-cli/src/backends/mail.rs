//! Mail delivery through a local sendmail-compatible binary.

use async_trait::async_trait;
use tracing::debug;

use hpcsync_connector::error::{ConnectorError, ConnectorResult};
use hpcsync_connector::traits::Notifier;

use crate::process::CommandRunner;

/// Render a message with its headers, as read by `sendmail -t`.
///
/// Header values must be single lines: `sendmail -t` would read anything
/// after a line break as further headers, recipients included.
pub fn render_message(
    sender: &str,
    recipient: &str,
    subject: &str,
    body: &str,
) -> ConnectorResult<String> {
    for (header, value) in [("From", sender), ("To", recipient), ("Subject", subject)] {
        if value.contains(['\r', '\n']) {
            return Err(ConnectorError::invalid_data(format!(
                "{header} header contains a line break: {value:?}"
            )));
        }
    }
    Ok(format!(
        "From: {sender}\nTo: {recipient}\nSubject: {subject}\n\n{body}\n"
    ))
}

/// [`Notifier`] that pipes messages into sendmail.
pub struct SendmailNotifier {
    program: String,
    sender: String,
    runner: CommandRunner,
}

impl SendmailNotifier {
    pub fn new(program: impl Into<String>, sender: impl Into<String>, runner: CommandRunner) -> Self {
        Self {
            program: program.into(),
            sender: sender.into(),
            runner,
        }
    }
}

#[async_trait]
impl Notifier for SendmailNotifier {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> ConnectorResult<()> {
        let message = render_message(&self.sender, recipient, subject, body)?;
        let args = vec!["-t".to_string(), "-f".to_string(), self.sender.clone()];
        let output = self
            .runner
            .run_with_input(&self.program, &args, &message)
            .await?;
        if !output.success() {
            return Err(ConnectorError::operation_failed(format!(
                "sendmail exited with status {}: {}",
                output.status,
                output.stderr.trim()
            )));
        }
        debug!(recipient, subject, "Mail handed to sendmail");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_message() {
        let message = render_message(
            "hpc@example.org",
            "jane@example.org",
            "Access ending",
            "Hello",
        )
        .unwrap();
        assert!(message.starts_with("From: hpc@example.org\nTo: jane@example.org\n"));
        assert!(message.contains("Subject: Access ending\n\nHello\n"));
    }

    #[test]
    fn test_render_message_rejects_multiline_headers() {
        let injected = [
            ("hpc@example.org", "jane@example.org\nBcc: all@example.org", "s"),
            ("hpc@example.org", "jane@example.org", "Access ending\r\nBcc: all@example.org"),
            ("hpc@example.org\n", "jane@example.org", "s"),
        ];
        for (sender, recipient, subject) in injected {
            let err = render_message(sender, recipient, subject, "body").unwrap_err();
            assert!(matches!(err, ConnectorError::InvalidData { .. }), "{err}");
        }
        // Line breaks in the body are fine.
        assert!(render_message("a@b", "c@d", "s", "line one\nline two").is_ok());
    }
}
