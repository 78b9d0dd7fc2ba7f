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
use crate::clock::Clock;
use crate::store::{bounded, StoreError};
use crate::user::{
    AuthenticationError, Contact, NewUser, PasswordHasher, Timeslot, User, UserId,
    UserManagerError, UserRepository,
};
use std::sync::Arc;
use std::time::Duration;

/// Emails are compared case-insensitively by storing them lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// --- UserManager ---
// Credential store: identity, password hash and the verified flag.
#[derive(Clone)]
pub struct UserManager {
    repo: Arc<dyn UserRepository>,
    hasher: PasswordHasher,
    clock: Arc<dyn Clock>,
    deadline: Duration,
}

impl UserManager {
    pub fn new(
        repo: Arc<dyn UserRepository>,
        hasher: PasswordHasher,
        clock: Arc<dyn Clock>,
        deadline: Duration,
    ) -> Self {
        Self { repo, hasher, clock, deadline }
    }

    /// Creates a verified user. Only called once a verification token has been checked,
    /// so every inserted row starts out verified.
    pub async fn insert(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<UserId, UserManagerError> {
        let hashed_password = self.hasher.hash(password).await?;
        let new_user = NewUser {
            name: name.trim().to_string(),
            email: normalize_email(email),
            hashed_password,
            email_verified: true,
        };

        match bounded(self.deadline, self.repo.insert_user(&new_user, self.clock.now())).await {
            Ok(user) => Ok(user.user_id),
            Err(StoreError::AlreadyExists) => Err(UserManagerError::DuplicateEmail),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserId, AuthenticationError> {
        let email = normalize_email(email);
        let Some(user) = bounded(self.deadline, self.repo.find_user_by_email(&email)).await? else {
            self.hasher.verify_decoy(password).await?;
            return Err(AuthenticationError::InvalidCredentials);
        };

        if !self.hasher.verify(&user.hashed_password, password).await? {
            return Err(AuthenticationError::InvalidCredentials);
        }

        // Only reported after the password matched, so it reveals nothing to a guesser.
        if !user.email_verified {
            return Err(AuthenticationError::EmailNotVerified);
        }

        Ok(user.user_id)
    }

    pub async fn exists_email(&self, email: &str) -> Result<bool, UserManagerError> {
        let email = normalize_email(email);
        let user = bounded(self.deadline, self.repo.find_user_by_email(&email)).await?;
        Ok(user.is_some())
    }

    pub async fn exists(&self, user_id: UserId) -> Result<bool, UserManagerError> {
        Ok(self.get_user(user_id).await?.is_some())
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<Option<User>, UserManagerError> {
        Ok(bounded(self.deadline, self.repo.find_user_by_id(user_id)).await?)
    }

    pub async fn update_password(
        &self,
        email: &str,
        new_password: &str,
    ) -> Result<(), UserManagerError> {
        let email = normalize_email(email);
        let user = bounded(self.deadline, self.repo.find_user_by_email(&email))
            .await?
            .ok_or(UserManagerError::UserNotFound)?;

        let hashed_password = self.hasher.hash(new_password).await?;
        match bounded(
            self.deadline,
            self.repo.update_password(user.user_id, &hashed_password, self.clock.now()),
        )
        .await
        {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound) => Err(UserManagerError::UserNotFound),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn add_contact(&self, user_id: UserId, contact: &Contact) -> Result<(), UserManagerError> {
        Ok(bounded(self.deadline, self.repo.insert_contact(user_id, contact)).await?)
    }

    pub async fn add_timeslot(&self, user_id: UserId, slot: Timeslot) -> Result<(), UserManagerError> {
        Ok(bounded(self.deadline, self.repo.insert_timeslot(user_id, slot)).await?)
    }

    pub async fn contacts(&self, user_id: UserId) -> Result<Vec<Contact>, UserManagerError> {
        Ok(bounded(self.deadline, self.repo.list_contacts(user_id)).await?)
    }

    pub async fn timeslots(&self, user_id: UserId) -> Result<Vec<Timeslot>, UserManagerError> {
        Ok(bounded(self.deadline, self.repo.list_timeslots(user_id)).await?)
    }

    pub async fn delete_user(&self, user_id: UserId) -> Result<(), UserManagerError> {
        match bounded(self.deadline, self.repo.delete_user(user_id)).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound) => Err(UserManagerError::UserNotFound),
            Err(e) => Err(e.into()),
        }
    }
}
