// Copyright (C) 2025 Kevin Exton
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
mod dispatcher;
mod smtp;
mod templates;

pub use dispatcher::MailDispatcher;
pub use smtp::SmtpMailer;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Failed to send email: {0}")]
    SendFailed(String),
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailTemplate {
    EmailVerification,
    PasswordReset,
}

/// Transport. Rendering and delivery both live behind this.
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, template: MailTemplate, link: &str) -> Result<(), MailError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMail {
    pub to: String,
    pub template: MailTemplate,
    pub link: String,
}

/// Fire-and-forget hand-off used by request handlers. Never blocks on delivery.
pub trait Outbox: Send + Sync {
    fn enqueue(&self, mail: OutboundMail);
}

/// Development transport: writes the link to the log instead of sending it.
pub struct LogMailer;

#[async_trait::async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, template: MailTemplate, link: &str) -> Result<(), MailError> {
        tracing::info!(recipient = %to, ?template, %link, "mail not sent (log transport)");
        Ok(())
    }
}

#[cfg(test)]
pub use recording::RecordingOutbox;
