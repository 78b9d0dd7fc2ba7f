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
use crate::session::{keys, SessionContext};
use crate::user::{UserId, UserManagerError};
use crate::user_manager::UserManager;
use uuid::Uuid;

/// Per-request authentication verdict. Handlers consult this, never the raw session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthState {
    user_id: Option<UserId>,
}

impl AuthState {
    pub fn anonymous() -> Self {
        Self { user_id: None }
    }

    pub fn authenticated(user_id: UserId) -> Self {
        Self { user_id: Some(user_id) }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }
}

#[derive(Clone)]
pub struct Gate {
    users: UserManager,
}

impl Gate {
    pub fn new(users: UserManager) -> Self {
        Self { users }
    }

    /// Authenticated only while the stored id still names an existing user.
    pub async fn resolve(&self, session: &SessionContext) -> Result<AuthState, UserManagerError> {
        let Some(raw) = session.get_string(keys::AUTHENTICATED_USER_ID) else {
            return Ok(AuthState::anonymous());
        };
        let Ok(uuid) = Uuid::parse_str(&raw) else {
            tracing::warn!("session carries a malformed user id");
            return Ok(AuthState::anonymous());
        };

        let user_id = UserId(uuid);
        if self.users.exists(user_id).await? {
            Ok(AuthState::authenticated(user_id))
        } else {
            tracing::warn!(%user_id, "session references a deleted user");
            Ok(AuthState::anonymous())
        }
    }
}
