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
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum UserManagerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("User not found")]
    UserNotFound,
    #[error("Email is already registered")]
    DuplicateEmail,
    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AuthenticationError {
    // Covers both "no such email" and "wrong password".
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Email not verified")]
    EmailNotVerified,
    #[error("Database error: {0}")]
    DatabaseError(#[from] UserManagerError),
}

impl From<StoreError> for AuthenticationError {
    fn from(e: StoreError) -> Self {
        AuthenticationError::DatabaseError(UserManagerError::Store(e))
    }
}
