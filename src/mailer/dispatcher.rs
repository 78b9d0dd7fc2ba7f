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
use super::{Mailer, OutboundMail, Outbox};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Queue in front of a detached delivery task. Delivery failures end up in the log
/// and nowhere else.
#[derive(Clone)]
pub struct MailDispatcher {
    tx: mpsc::UnboundedSender<OutboundMail>,
}

impl MailDispatcher {
    /// The worker exits once every dispatcher clone has been dropped.
    pub fn spawn(mailer: Arc<dyn Mailer>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMail>();
        let worker = tokio::spawn(async move {
            tracing::info!("mail worker started");
            while let Some(mail) = rx.recv().await {
                match mailer.send(&mail.to, mail.template, &mail.link).await {
                    Ok(()) => tracing::debug!(recipient = %mail.to, template = ?mail.template, "mail delivered"),
                    Err(e) => tracing::error!(
                        recipient = %mail.to,
                        template = ?mail.template,
                        error = %e,
                        "mail delivery failed"
                    ),
                }
            }
            tracing::info!("mail worker stopped");
        });
        (Self { tx }, worker)
    }

    /// Waits for the worker to flush what is queued. Call after every dispatcher is
    /// dropped. Returns false if the queue was still busy when `within` ran out.
    pub async fn drain(worker: JoinHandle<()>, within: Duration) -> bool {
        match tokio::time::timeout(within, worker).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "mail worker panicked");
                false
            }
            Err(_) => {
                tracing::warn!(timeout_secs = within.as_secs(), "mail queue not drained before shutdown");
                false
            }
        }
    }
}

impl Outbox for MailDispatcher {
    fn enqueue(&self, mail: OutboundMail) {
        if let Err(e) = self.tx.send(mail) {
            tracing::error!(recipient = %e.0.to, "mail worker is gone; dropping message");
        }
    }
}
