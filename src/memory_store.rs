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
use crate::session::{SessionRecord, SessionRepository};
use crate::store::StoreError;
use crate::user::{Contact, NewUser, Timeslot, User, UserId, UserRepository};
use crate::verification::{TokenRepository, VerificationToken};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    users_by_email: HashMap<String, UserId>,
    contacts: HashMap<UserId, Vec<Contact>>,
    timeslots: HashMap<UserId, BTreeSet<Timeslot>>,
    tokens: HashMap<String, VerificationToken>,
    sessions: HashMap<String, SessionRecord>,
}

/// In-process backend for development and tests. Every call takes the one lock,
/// so each operation is atomic the way a single row write is.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl UserRepository for MemoryStore {
    async fn insert_user(&self, user: &NewUser, now: DateTime<Utc>) -> Result<User, StoreError> {
        let mut state = self.state.lock();
        if state.users_by_email.contains_key(&user.email) {
            return Err(StoreError::AlreadyExists);
        }
        let row = User {
            user_id: UserId::new(),
            name: user.name.clone(),
            email: user.email.clone(),
            hashed_password: user.hashed_password.clone(),
            email_verified: user.email_verified,
            created_at: now,
            updated_at: now,
        };
        state.users_by_email.insert(row.email.clone(), row.user_id);
        state.users.insert(row.user_id, row.clone());
        Ok(row)
    }

    async fn find_user_by_id(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.state.lock().users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.lock();
        Ok(state.users_by_email.get(email).and_then(|id| state.users.get(id)).cloned())
    }

    async fn update_password(
        &self,
        user_id: UserId,
        hashed_password: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let user = state.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.hashed_password = hashed_password.to_string();
        user.updated_at = now;
        Ok(())
    }

    async fn insert_contact(&self, user_id: UserId, contact: &Contact) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if !state.users.contains_key(&user_id) {
            return Err(StoreError::NotFound);
        }
        state.contacts.entry(user_id).or_default().push(contact.clone());
        Ok(())
    }

    async fn insert_timeslot(&self, user_id: UserId, slot: Timeslot) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if !state.users.contains_key(&user_id) {
            return Err(StoreError::NotFound);
        }
        state.timeslots.entry(user_id).or_default().insert(slot);
        Ok(())
    }

    async fn list_contacts(&self, user_id: UserId) -> Result<Vec<Contact>, StoreError> {
        Ok(self.state.lock().contacts.get(&user_id).cloned().unwrap_or_default())
    }

    async fn list_timeslots(&self, user_id: UserId) -> Result<Vec<Timeslot>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .timeslots
            .get(&user_id)
            .map(|slots| slots.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn delete_user(&self, user_id: UserId) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let user = state.users.remove(&user_id).ok_or(StoreError::NotFound)?;
        state.users_by_email.remove(&user.email);
        state.contacts.remove(&user_id);
        state.timeslots.remove(&user_id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl TokenRepository for MemoryStore {
    async fn upsert_token(&self, token: &VerificationToken) -> Result<(), StoreError> {
        self.state.lock().tokens.insert(token.email.clone(), token.clone());
        Ok(())
    }

    async fn find_token(&self, email: &str) -> Result<Option<VerificationToken>, StoreError> {
        Ok(self.state.lock().tokens.get(email).cloned())
    }

    async fn delete_token(&self, email: &str) -> Result<(), StoreError> {
        self.state.lock().tokens.remove(email);
        Ok(())
    }

    async fn delete_tokens_expired_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock();
        let before = state.tokens.len();
        state.tokens.retain(|_, t| t.expiry >= cutoff);
        Ok((before - state.tokens.len()) as u64)
    }
}

#[async_trait::async_trait]
impl SessionRepository for MemoryStore {
    async fn find_session(&self, token: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.state.lock().sessions.get(token).cloned())
    }

    async fn save_session(
        &self,
        record: &SessionRecord,
        _now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.state.lock().sessions.insert(record.token.clone(), record.clone());
        Ok(())
    }

    async fn delete_session(&self, token: &str) -> Result<(), StoreError> {
        self.state.lock().sessions.remove(token);
        Ok(())
    }

    async fn delete_sessions_expired_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock();
        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.expiry >= cutoff);
        Ok((before - state.sessions.len()) as u64)
    }
}
