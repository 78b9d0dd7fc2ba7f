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
use chrono::{DateTime, Utc};

/// Outstanding proof-of-email-control request. The email is the natural key,
/// so a backend holds at most one of these per address.
///
/// There is no purpose field: signup and password reset share the row shape and
/// differ only in which session keys the caller stashes.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationToken {
    pub token: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}

impl VerificationToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry
    }
}
