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
use super::errors::UserManagerError;
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use std::sync::Arc;
use tokio::sync::OnceCell;

const DECOY_PASSWORD: &str = "slotboard-decoy-password";

/// Argon2id in PHC string format. Both directions run on the blocking pool.
#[derive(Clone)]
pub struct PasswordHasher {
    params: Params,
    /// Hash with the configured params, verified against when there is no real one.
    decoy: Arc<OnceCell<String>>,
}

impl PasswordHasher {
    pub fn new(params: Params) -> Self {
        Self { params, decoy: Arc::new(OnceCell::new()) }
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub async fn hash(&self, password: &str) -> Result<String, UserManagerError> {
        let hasher = self.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            hasher
                .argon2()
                .hash_password(password.as_bytes(), &salt)
                .map(|phc| phc.to_string())
                .map_err(|e| UserManagerError::Hashing(e.to_string()))
        })
        .await
        .map_err(|e| UserManagerError::Hashing(e.to_string()))?
    }

    /// `Ok(false)` on mismatch; `Err` only when the stored hash is unusable.
    pub async fn verify(&self, hashed: &str, password: &str) -> Result<bool, UserManagerError> {
        let hasher = self.clone();
        let hashed = hashed.to_owned();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || {
            let parsed =
                PasswordHash::new(&hashed).map_err(|e| UserManagerError::Hashing(e.to_string()))?;
            match hasher.argon2().verify_password(password.as_bytes(), &parsed) {
                Ok(()) => Ok(true),
                Err(argon2::password_hash::Error::Password) => Ok(false),
                Err(e) => Err(UserManagerError::Hashing(e.to_string())),
            }
        })
        .await
        .map_err(|e| UserManagerError::Hashing(e.to_string()))?
    }

    /// Spends one full verification on a lookup miss, so a miss costs what a mismatch does.
    pub async fn verify_decoy(&self, password: &str) -> Result<(), UserManagerError> {
        let decoy = self.decoy.get_or_try_init(|| self.hash(DECOY_PASSWORD)).await?;
        self.verify(decoy, password).await?;
        Ok(())
    }

    #[cfg(test)]
    pub fn decoy_ready(&self) -> bool {
        self.decoy.initialized()
    }
}

#[cfg(test)]
pub fn test_hasher() -> PasswordHasher {
    // Minimum argon2 costs keep the suite fast.
    PasswordHasher::new(Params::new(8, 1, 1, None).expect("valid argon2 params"))
}
