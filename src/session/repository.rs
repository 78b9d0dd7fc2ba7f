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
use super::models::SessionRecord;
use crate::store::StoreError;
use chrono::{DateTime, Utc};

#[async_trait::async_trait]
pub trait SessionRepository: Send + Sync {
    /// Returns the row even if it has expired; the caller decides.
    async fn find_session(&self, token: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// `now` is the caller's clock reading, for backends that expire rows themselves.
    async fn save_session(&self, record: &SessionRecord, now: DateTime<Utc>)
        -> Result<(), StoreError>;

    /// Idempotent.
    async fn delete_session(&self, token: &str) -> Result<(), StoreError>;

    async fn delete_sessions_expired_before(&self, cutoff: DateTime<Utc>)
        -> Result<u64, StoreError>;
}
