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
pub mod models;
pub mod repository;

pub use models::VerificationToken;
pub use repository::TokenRepository;

use crate::clock::Clock;
use crate::crypto::{constant_time_eq, random_token};
use crate::store::{bounded, StoreError};
use crate::user_manager::normalize_email;
use chrono::Duration as TokenDuration;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("verification token not found")]
    NotFound,
    #[error("verification token expired")]
    Expired,
    #[error(transparent)]
    Store(#[from] StoreError),
}

// --- VerificationStore ---
// Issues, checks and purges one-time tokens keyed by recipient email.
#[derive(Clone)]
pub struct VerificationStore {
    repo: Arc<dyn TokenRepository>,
    clock: Arc<dyn Clock>,
    ttl: TokenDuration,
    deadline: Duration,
}

impl VerificationStore {
    pub fn new(
        repo: Arc<dyn TokenRepository>,
        clock: Arc<dyn Clock>,
        ttl: TokenDuration,
        deadline: Duration,
    ) -> Self {
        Self { repo, clock, ttl, deadline }
    }

    /// Generates a fresh token for `email`, replacing any row already held for it.
    /// Cooldown checks are the caller's job.
    pub async fn issue(&self, email: &str) -> Result<VerificationToken, StoreError> {
        let created_at = self.clock.now();
        let token = VerificationToken {
            token: random_token(),
            email: normalize_email(email),
            created_at,
            expiry: created_at + self.ttl,
        };
        bounded(self.deadline, self.repo.upsert_token(&token)).await?;
        Ok(token)
    }

    /// Only for cooldown arithmetic. Never use the result to authorize anything.
    pub async fn get(&self, email: &str) -> Result<Option<VerificationToken>, StoreError> {
        let email = normalize_email(email);
        bounded(self.deadline, self.repo.find_token(&email)).await
    }

    /// Checks that `token` is the live token for `email`. Leaves the row in place.
    pub async fn verify(&self, token: &str, email: &str) -> Result<(), VerifyError> {
        let email = normalize_email(email);
        let record = bounded(self.deadline, self.repo.find_token(&email))
            .await?
            .ok_or(VerifyError::NotFound)?;

        if !constant_time_eq(&record.token, token) {
            return Err(VerifyError::NotFound);
        }
        if record.is_expired(self.clock.now()) {
            return Err(VerifyError::Expired);
        }
        Ok(())
    }

    /// Idempotent.
    pub async fn purge(&self, email: &str) -> Result<(), StoreError> {
        let email = normalize_email(email);
        bounded(self.deadline, self.repo.delete_token(&email)).await
    }

    /// Hygiene only: drops rows that expired more than `grace` ago. Recently expired rows
    /// stay so a late click still reports `Expired` instead of `NotFound`.
    pub async fn purge_expired(&self, grace: TokenDuration) -> Result<u64, StoreError> {
        let cutoff = self.clock.now() - grace;
        bounded(self.deadline, self.repo.delete_tokens_expired_before(cutoff)).await
    }
}
