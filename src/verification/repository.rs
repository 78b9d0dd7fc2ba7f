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
use super::models::VerificationToken;
use crate::store::StoreError;
use chrono::{DateTime, Utc};

#[async_trait::async_trait]
pub trait TokenRepository: Send + Sync {
    /// Insert-or-replace keyed by email; never leaves two rows for one address.
    async fn upsert_token(&self, token: &VerificationToken) -> Result<(), StoreError>;

    async fn find_token(&self, email: &str) -> Result<Option<VerificationToken>, StoreError>;

    /// Idempotent.
    async fn delete_token(&self, email: &str) -> Result<(), StoreError>;

    /// Deletes rows whose expiry is before `cutoff`; returns how many went.
    async fn delete_tokens_expired_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
