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
use crate::user::{Contact, ContactMethod, NewUser, Timeslot, User, UserId, UserRepository};
use crate::verification::{TokenRepository, VerificationToken};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::value::{CqlTimestamp, CqlValue, Row};
use scylla::DeserializeRow;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        user_id UUID PRIMARY KEY,
        name TEXT,
        email TEXT,
        hashed_password TEXT,
        email_verified BOOLEAN,
        created_at TIMESTAMP,
        updated_at TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS users_by_email (
        email TEXT PRIMARY KEY,
        user_id UUID
    )",
    "CREATE TABLE IF NOT EXISTS contacts (
        user_id UUID,
        contact_id UUID,
        method TEXT,
        value TEXT,
        PRIMARY KEY (user_id, contact_id)
    )",
    "CREATE TABLE IF NOT EXISTS timeslots (
        user_id UUID,
        slot TEXT,
        PRIMARY KEY (user_id, slot)
    )",
    "CREATE TABLE IF NOT EXISTS verification_tokens (
        email TEXT PRIMARY KEY,
        token TEXT,
        created_at TIMESTAMP,
        expiry TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS sessions (
        token TEXT PRIMARY KEY,
        expiry TIMESTAMP,
        data TEXT
    )",
];

#[derive(Debug, DeserializeRow)]
struct UserRow {
    user_id: Uuid,
    name: String,
    email: String,
    hashed_password: String,
    email_verified: bool,
    created_at: CqlTimestamp,
    updated_at: CqlTimestamp,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, StoreError> {
        Ok(User {
            user_id: UserId(row.user_id),
            name: row.name,
            email: row.email,
            hashed_password: row.hashed_password,
            email_verified: row.email_verified,
            created_at: from_cql(row.created_at)?,
            updated_at: from_cql(row.updated_at)?,
        })
    }
}

#[derive(Debug, DeserializeRow)]
struct TokenRow {
    email: String,
    token: String,
    created_at: CqlTimestamp,
    expiry: CqlTimestamp,
}

#[derive(Debug, DeserializeRow)]
struct SessionRow {
    token: String,
    expiry: CqlTimestamp,
    data: String,
}

fn to_cql(at: DateTime<Utc>) -> CqlTimestamp {
    CqlTimestamp(at.timestamp_millis())
}

fn from_cql(ts: CqlTimestamp) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ts.0)
        .ok_or_else(|| StoreError::Backend(format!("timestamp out of range: {}", ts.0)))
}

/// Row TTL in seconds for a session expiring at `expiry`, measured from `now`.
fn session_ttl(expiry: DateTime<Utc>, now: DateTime<Utc>) -> i32 {
    (expiry - now).num_seconds().clamp(1, i32::MAX as i64) as i32
}

/// First column of a lightweight-transaction result.
fn applied(row: &Row) -> bool {
    matches!(row.columns.first(), Some(Some(CqlValue::Boolean(true))))
}

/// ScyllaDB-backed store for users, verification tokens and sessions.
///
/// Email uniqueness rides on a lightweight transaction against `users_by_email`;
/// every other write is a plain upsert.
#[derive(Clone)]
pub struct ScyllaStore {
    session: Arc<Session>,
}

impl ScyllaStore {
    /// Connects, creates the keyspace if needed and makes sure every table exists.
    ///
    /// # Arguments
    /// * `nodes` - ScyllaDB node addresses (e.g., `["127.0.0.1:9042"]`).
    /// * `keyspace` - The keyspace to create and use.
    pub async fn connect(nodes: &[String], keyspace: &str) -> Result<Self> {
        if keyspace.is_empty() || !keyspace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            bail!("invalid keyspace name {keyspace:?}");
        }

        let session = SessionBuilder::new()
            .known_nodes(nodes)
            .build()
            .await
            .context("Failed to connect to ScyllaDB")?;

        session
            .query_unpaged(
                format!(
                    "CREATE KEYSPACE IF NOT EXISTS {keyspace} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': '1'}}"
                ),
                (),
            )
            .await
            .context(format!("Failed to create keyspace {keyspace}"))?;
        session.use_keyspace(keyspace, true).await?;

        for statement in SCHEMA {
            session
                .query_unpaged(*statement, ())
                .await
                .context("Failed to create table")?;
        }

        tracing::info!(%keyspace, "connected to ScyllaDB and initialized schema");
        Ok(ScyllaStore { session: Arc::new(session) })
    }

    async fn user_exists(&self, user_id: UserId) -> Result<bool, StoreError> {
        Ok(self.find_user_by_id(user_id).await?.is_some())
    }
}

#[async_trait::async_trait]
impl UserRepository for ScyllaStore {
    async fn insert_user(&self, user: &NewUser, now: DateTime<Utc>) -> Result<User, StoreError> {
        let user_id = UserId::new();
        let claim = self
            .session
            .query_unpaged(
                "INSERT INTO users_by_email (email, user_id) VALUES (?, ?) IF NOT EXISTS",
                (&user.email, user_id.0),
            )
            .await
            .map_err(StoreError::backend)?
            .into_rows_result()
            .map_err(StoreError::backend)?
            .first_row::<Row>()
            .map_err(StoreError::backend)?;
        if !applied(&claim) {
            return Err(StoreError::AlreadyExists);
        }

        let written = self
            .session
            .query_unpaged(
                "INSERT INTO users (user_id, name, email, hashed_password, email_verified, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
                (
                    user_id.0,
                    &user.name,
                    &user.email,
                    &user.hashed_password,
                    user.email_verified,
                    to_cql(now),
                    to_cql(now),
                ),
            )
            .await;
        if let Err(e) = written {
            // Release the claim so the address can be registered again.
            if let Err(cleanup) = self
                .session
                .query_unpaged("DELETE FROM users_by_email WHERE email = ?", (&user.email,))
                .await
            {
                tracing::error!(email = %user.email, error = %cleanup, "failed to release email claim");
            }
            return Err(StoreError::backend(e));
        }

        Ok(User {
            user_id,
            name: user.name.clone(),
            email: user.email.clone(),
            hashed_password: user.hashed_password.clone(),
            email_verified: user.email_verified,
            created_at: now,
            updated_at: now,
        })
    }

    async fn find_user_by_id(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        let row = self
            .session
            .query_unpaged(
                "SELECT user_id, name, email, hashed_password, email_verified, created_at, updated_at FROM users WHERE user_id = ?",
                (user_id.0,),
            )
            .await
            .map_err(StoreError::backend)?
            .into_rows_result()
            .map_err(StoreError::backend)?
            .maybe_first_row::<UserRow>()
            .map_err(StoreError::backend)?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = self
            .session
            .query_unpaged("SELECT user_id FROM users_by_email WHERE email = ?", (email,))
            .await
            .map_err(StoreError::backend)?
            .into_rows_result()
            .map_err(StoreError::backend)?
            .maybe_first_row::<(Uuid,)>()
            .map_err(StoreError::backend)?;
        match row {
            Some((user_id,)) => self.find_user_by_id(UserId(user_id)).await,
            None => Ok(None),
        }
    }

    async fn update_password(
        &self,
        user_id: UserId,
        hashed_password: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let row = self
            .session
            .query_unpaged(
                "UPDATE users SET hashed_password = ?, updated_at = ? WHERE user_id = ? IF EXISTS",
                (hashed_password, to_cql(now), user_id.0),
            )
            .await
            .map_err(StoreError::backend)?
            .into_rows_result()
            .map_err(StoreError::backend)?
            .first_row::<Row>()
            .map_err(StoreError::backend)?;
        if applied(&row) { Ok(()) } else { Err(StoreError::NotFound) }
    }

    async fn insert_contact(&self, user_id: UserId, contact: &Contact) -> Result<(), StoreError> {
        if !self.user_exists(user_id).await? {
            return Err(StoreError::NotFound);
        }
        self.session
            .query_unpaged(
                "INSERT INTO contacts (user_id, contact_id, method, value) VALUES (?, ?, ?, ?)",
                (user_id.0, Uuid::new_v4(), contact.method.as_str(), &contact.value),
            )
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn insert_timeslot(&self, user_id: UserId, slot: Timeslot) -> Result<(), StoreError> {
        if !self.user_exists(user_id).await? {
            return Err(StoreError::NotFound);
        }
        self.session
            .query_unpaged(
                "INSERT INTO timeslots (user_id, slot) VALUES (?, ?)",
                (user_id.0, slot.field_name()),
            )
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn list_contacts(&self, user_id: UserId) -> Result<Vec<Contact>, StoreError> {
        let rows = self
            .session
            .query_unpaged("SELECT method, value FROM contacts WHERE user_id = ?", (user_id.0,))
            .await
            .map_err(StoreError::backend)?
            .into_rows_result()
            .map_err(StoreError::backend)?;

        let mut contacts = Vec::new();
        for row in rows.rows::<(String, String)>().map_err(StoreError::backend)? {
            let (method, value) = row.map_err(StoreError::backend)?;
            let method = ContactMethod::parse(&method)
                .ok_or_else(|| StoreError::Backend(format!("unknown contact method {method:?}")))?;
            contacts.push(Contact { method, value });
        }
        Ok(contacts)
    }

    async fn list_timeslots(&self, user_id: UserId) -> Result<Vec<Timeslot>, StoreError> {
        let rows = self
            .session
            .query_unpaged("SELECT slot FROM timeslots WHERE user_id = ?", (user_id.0,))
            .await
            .map_err(StoreError::backend)?
            .into_rows_result()
            .map_err(StoreError::backend)?;

        let mut slots = Vec::new();
        for row in rows.rows::<(String,)>().map_err(StoreError::backend)? {
            let (slot,) = row.map_err(StoreError::backend)?;
            let slot = Timeslot::parse(&slot)
                .ok_or_else(|| StoreError::Backend(format!("unknown timeslot {slot:?}")))?;
            slots.push(slot);
        }
        // Clustering order is by text; present the grid order instead.
        slots.sort();
        Ok(slots)
    }

    async fn delete_user(&self, user_id: UserId) -> Result<(), StoreError> {
        let user = self.find_user_by_id(user_id).await?.ok_or(StoreError::NotFound)?;

        for statement in [
            "DELETE FROM contacts WHERE user_id = ?",
            "DELETE FROM timeslots WHERE user_id = ?",
            "DELETE FROM users WHERE user_id = ?",
        ] {
            self.session
                .query_unpaged(statement, (user_id.0,))
                .await
                .map_err(StoreError::backend)?;
        }
        self.session
            .query_unpaged("DELETE FROM users_by_email WHERE email = ?", (&user.email,))
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl TokenRepository for ScyllaStore {
    async fn upsert_token(&self, token: &VerificationToken) -> Result<(), StoreError> {
        self.session
            .query_unpaged(
                "INSERT INTO verification_tokens (email, token, created_at, expiry) VALUES (?, ?, ?, ?)",
                (&token.email, &token.token, to_cql(token.created_at), to_cql(token.expiry)),
            )
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn find_token(&self, email: &str) -> Result<Option<VerificationToken>, StoreError> {
        let row = self
            .session
            .query_unpaged(
                "SELECT email, token, created_at, expiry FROM verification_tokens WHERE email = ?",
                (email,),
            )
            .await
            .map_err(StoreError::backend)?
            .into_rows_result()
            .map_err(StoreError::backend)?
            .maybe_first_row::<TokenRow>()
            .map_err(StoreError::backend)?;
        match row {
            Some(row) => Ok(Some(VerificationToken {
                token: row.token,
                email: row.email,
                created_at: from_cql(row.created_at)?,
                expiry: from_cql(row.expiry)?,
            })),
            None => Ok(None),
        }
    }

    async fn delete_token(&self, email: &str) -> Result<(), StoreError> {
        self.session
            .query_unpaged("DELETE FROM verification_tokens WHERE email = ?", (email,))
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn delete_tokens_expired_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut rows = self
            .session
            .query_iter("SELECT email, expiry FROM verification_tokens", ())
            .await
            .map_err(StoreError::backend)?
            .rows_stream::<(String, CqlTimestamp)>()
            .map_err(StoreError::backend)?;

        let mut removed = 0;
        while let Some((email, expiry)) = rows.try_next().await.map_err(StoreError::backend)? {
            if from_cql(expiry)? < cutoff {
                self.delete_token(&email).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait::async_trait]
impl SessionRepository for ScyllaStore {
    async fn find_session(&self, token: &str) -> Result<Option<SessionRecord>, StoreError> {
        let row = self
            .session
            .query_unpaged("SELECT token, expiry, data FROM sessions WHERE token = ?", (token,))
            .await
            .map_err(StoreError::backend)?
            .into_rows_result()
            .map_err(StoreError::backend)?
            .maybe_first_row::<SessionRow>()
            .map_err(StoreError::backend)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let values: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&row.data).map_err(StoreError::backend)?;
        Ok(Some(SessionRecord { token: row.token, expiry: from_cql(row.expiry)?, values }))
    }

    async fn save_session(&self, record: &SessionRecord, now: DateTime<Utc>) -> Result<(), StoreError> {
        let data = serde_json::to_string(&record.values).map_err(StoreError::backend)?;
        let ttl = session_ttl(record.expiry, now);
        self.session
            .query_unpaged(
                "INSERT INTO sessions (token, expiry, data) VALUES (?, ?, ?) USING TTL ?",
                (&record.token, to_cql(record.expiry), data, ttl),
            )
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn delete_session(&self, token: &str) -> Result<(), StoreError> {
        self.session
            .query_unpaged("DELETE FROM sessions WHERE token = ?", (token,))
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn delete_sessions_expired_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut rows = self
            .session
            .query_iter("SELECT token, expiry FROM sessions", ())
            .await
            .map_err(StoreError::backend)?
            .rows_stream::<(String, CqlTimestamp)>()
            .map_err(StoreError::backend)?;

        let mut removed = 0;
        while let Some((token, expiry)) = rows.try_next().await.map_err(StoreError::backend)? {
            if from_cql(expiry)? < cutoff {
                self.delete_session(&token).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
