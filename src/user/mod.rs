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
pub mod errors;
pub mod models;
pub mod password;
pub mod repository;

pub use errors::{AuthenticationError, UserManagerError};
pub use models::{Contact, ContactMethod, Day, NewUser, TimeOfDay, Timeslot, User, UserId};
pub use password::PasswordHasher;
pub use repository::UserRepository;
