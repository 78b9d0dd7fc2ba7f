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
use crate::session::SessionManager;
use crate::verification::VerificationStore;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Expired tokens linger this long so late clicks still read as "expired".
pub const TOKEN_GRACE_HOURS: i64 = 24;

/// Periodic hygiene for expired tokens and sessions. Correctness never depends on it.
#[derive(Clone)]
pub struct Sweeper {
    tokens: VerificationStore,
    sessions: SessionManager,
}

impl Sweeper {
    pub fn new(tokens: VerificationStore, sessions: SessionManager) -> Self {
        Self { tokens, sessions }
    }

    /// Returns (tokens removed, sessions removed); failures are logged and counted as zero.
    pub async fn sweep_once(&self) -> (u64, u64) {
        let tokens = self
            .tokens
            .purge_expired(chrono::Duration::hours(TOKEN_GRACE_HOURS))
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "token sweep failed");
                0
            });
        let sessions = self.sessions.purge_expired().await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "session sweep failed");
            0
        });
        if tokens > 0 || sessions > 0 {
            tracing::info!(tokens, sessions, "swept expired rows");
        }
        (tokens, sessions)
    }

    pub fn spawn(self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(interval_secs = every.as_secs(), "sweeper started");
            loop {
                tokio::time::sleep(every).await;
                self.sweep_once().await;
            }
        })
    }
}
