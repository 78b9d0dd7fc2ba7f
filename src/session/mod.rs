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
pub mod context;
pub mod cookie;
pub mod flash;
pub mod models;
pub mod repository;

pub use context::{SessionContext, SessionStatus};
pub use flash::{Flash, FlashKind};
pub use models::SessionRecord;
pub use repository::SessionRepository;

use crate::clock::Clock;
use crate::store::{bounded, StoreError};
use chrono::Duration as SessionDuration;
use std::sync::Arc;
use std::time::Duration;

/// Session bag keys.
pub mod keys {
    pub const AUTHENTICATED_USER_ID: &str = "authenticated_user_id";
    pub const VERIFICATION_EMAIL: &str = "verification_email";
    pub const VERIFICATION_TOKEN: &str = "verification_token";
    pub const RESET_EMAIL: &str = "reset_email";
    pub const RESET_TOKEN: &str = "reset_token";
    pub const FLASH: &str = "flash";
}

// --- SessionManager ---
// Loads a SessionContext at the start of a request and commits it at the end.
#[derive(Clone)]
pub struct SessionManager {
    repo: Arc<dyn SessionRepository>,
    clock: Arc<dyn Clock>,
    lifetime: SessionDuration,
    deadline: Duration,
    secure_cookie: bool,
}

impl SessionManager {
    pub fn new(
        repo: Arc<dyn SessionRepository>,
        clock: Arc<dyn Clock>,
        lifetime: SessionDuration,
        deadline: Duration,
        secure_cookie: bool,
    ) -> Self {
        Self { repo, clock, lifetime, deadline, secure_cookie }
    }

    /// Unknown or expired ids yield a fresh, empty context.
    pub async fn load(&self, token: Option<&str>) -> Result<SessionContext, StoreError> {
        let Some(token) = token else {
            return Ok(SessionContext::new());
        };
        match bounded(self.deadline, self.repo.find_session(token)).await? {
            Some(record) if record.expiry > self.clock.now() => Ok(SessionContext::from_record(record)),
            _ => Ok(SessionContext::new()),
        }
    }

    /// Persists a modified context and returns the `Set-Cookie` value to send.
    /// A rotated-away id is deleted before the new one is written.
    pub async fn commit(&self, ctx: &mut SessionContext) -> Result<Option<String>, StoreError> {
        if ctx.status() == SessionStatus::Unmodified {
            return Ok(None);
        }

        let now = self.clock.now();
        let expiry = ctx.expiry().unwrap_or_else(|| now + self.lifetime);
        if let Some(old) = ctx.take_superseded() {
            bounded(self.deadline, self.repo.delete_session(&old)).await?;
        }
        bounded(self.deadline, self.repo.save_session(&ctx.to_record(expiry), now)).await?;
        ctx.mark_saved(expiry);

        Ok(Some(cookie::session_cookie(ctx.token(), expiry, self.secure_cookie)))
    }

    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        bounded(self.deadline, self.repo.delete_sessions_expired_before(now)).await
    }
}
