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
use super::models::{Contact, NewUser, Timeslot, User, UserId};
use crate::store::StoreError;
use chrono::{DateTime, Utc};

/// Durable user rows plus the rows that hang off a user.
///
/// Emails arrive lowercased. Backends must make `insert_user` fail with
/// `StoreError::AlreadyExists` when the email is taken, even under concurrent inserts.
#[async_trait::async_trait]
pub trait UserRepository: Send + Sync {
    async fn insert_user(&self, user: &NewUser, now: DateTime<Utc>) -> Result<User, StoreError>;

    async fn find_user_by_id(&self, user_id: UserId) -> Result<Option<User>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// `StoreError::NotFound` when the user does not exist.
    async fn update_password(
        &self,
        user_id: UserId,
        hashed_password: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn insert_contact(&self, user_id: UserId, contact: &Contact) -> Result<(), StoreError>;

    async fn insert_timeslot(&self, user_id: UserId, slot: Timeslot) -> Result<(), StoreError>;

    async fn list_contacts(&self, user_id: UserId) -> Result<Vec<Contact>, StoreError>;

    async fn list_timeslots(&self, user_id: UserId) -> Result<Vec<Timeslot>, StoreError>;

    /// Removes the user together with its contact and timeslot rows.
    async fn delete_user(&self, user_id: UserId) -> Result<(), StoreError>;
}
