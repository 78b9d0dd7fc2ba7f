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
use super::flash::Flash;
use super::keys;
use super::models::SessionRecord;
use crate::crypto::random_token;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Unmodified,
    Modified,
}

/// Request-scoped view of one browser session. Handlers mutate it in memory;
/// `SessionManager::commit` writes it back once the response is known.
#[derive(Debug)]
pub struct SessionContext {
    token: String,
    /// `None` until the first commit after creation or rotation.
    expiry: Option<DateTime<Utc>>,
    values: BTreeMap<String, Value>,
    persisted: bool,
    /// Persisted id replaced by `renew_token`, deleted at commit.
    superseded: Option<String>,
    status: SessionStatus,
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            token: random_token(),
            expiry: None,
            values: BTreeMap::new(),
            persisted: false,
            superseded: None,
            status: SessionStatus::Unmodified,
        }
    }

    pub(super) fn from_record(record: SessionRecord) -> Self {
        Self {
            token: record.token,
            expiry: Some(record.expiry),
            values: record.values,
            persisted: true,
            superseded: None,
            status: SessionStatus::Unmodified,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn put(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
        self.status = SessionStatus::Modified;
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.values.get(key).and_then(Value::as_str).map(str::to_string)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) {
        if self.values.remove(key).is_some() {
            self.status = SessionStatus::Modified;
        }
    }

    pub fn pop(&mut self, key: &str) -> Option<Value> {
        let value = self.values.remove(key)?;
        self.status = SessionStatus::Modified;
        Some(value)
    }

    pub fn pop_string(&mut self, key: &str) -> Option<String> {
        match self.pop(key)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Drops every key. The id is untouched; pair with `renew_token` at auth boundaries.
    pub fn clear(&mut self) {
        if !self.values.is_empty() {
            self.values.clear();
            self.status = SessionStatus::Modified;
        }
    }

    /// Issues a new id for the same bag. The old id stops resolving once committed.
    pub fn renew_token(&mut self) {
        let old = std::mem::replace(&mut self.token, random_token());
        if self.persisted && self.superseded.is_none() {
            self.superseded = Some(old);
        }
        self.persisted = false;
        self.expiry = None;
        self.status = SessionStatus::Modified;
    }

    pub fn put_flash(&mut self, flash: Flash) {
        self.put(keys::FLASH, flash);
    }

    pub fn pop_flash(&mut self) -> Option<Flash> {
        self.pop(keys::FLASH).and_then(|v| serde_json::from_value(v).ok())
    }

    pub(super) fn take_superseded(&mut self) -> Option<String> {
        self.superseded.take()
    }

    pub(super) fn to_record(&self, expiry: DateTime<Utc>) -> SessionRecord {
        SessionRecord { token: self.token.clone(), expiry, values: self.values.clone() }
    }

    pub(super) fn mark_saved(&mut self, expiry: DateTime<Utc>) {
        self.expiry = Some(expiry);
        self.persisted = true;
        self.status = SessionStatus::Unmodified;
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_unmodified() {
        let ctx = SessionContext::new();
        assert_eq!(ctx.status(), SessionStatus::Unmodified);
        assert!(ctx.expiry().is_none());
        assert!(!ctx.exists(keys::AUTHENTICATED_USER_ID));
    }

    #[test]
    fn put_get_remove() {
        let mut ctx = SessionContext::new();
        ctx.put(keys::VERIFICATION_EMAIL, "a@osu.edu");
        assert_eq!(ctx.status(), SessionStatus::Modified);
        assert_eq!(ctx.get_string(keys::VERIFICATION_EMAIL).as_deref(), Some("a@osu.edu"));
        assert!(ctx.exists(keys::VERIFICATION_EMAIL));

        ctx.remove(keys::VERIFICATION_EMAIL);
        assert!(ctx.get(keys::VERIFICATION_EMAIL).is_none());
    }

    #[test]
    fn pop_reads_exactly_once() {
        let mut ctx = SessionContext::new();
        ctx.put(keys::RESET_TOKEN, "t");
        assert_eq!(ctx.pop_string(keys::RESET_TOKEN).as_deref(), Some("t"));
        assert_eq!(ctx.pop_string(keys::RESET_TOKEN), None);

        ctx.put_flash(Flash::success("Successfully logged out."));
        assert_eq!(ctx.pop_flash(), Some(Flash::success("Successfully logged out.")));
        assert_eq!(ctx.pop_flash(), None);
    }

    #[test]
    fn clear_keeps_the_id_and_renew_keeps_the_bag() {
        let mut ctx = SessionContext::new();
        let first = ctx.token().to_string();
        ctx.put(keys::VERIFICATION_EMAIL, "a@osu.edu");
        ctx.clear();
        assert_eq!(ctx.token(), first);
        assert!(!ctx.exists(keys::VERIFICATION_EMAIL));

        ctx.put(keys::RESET_EMAIL, "a@osu.edu");
        ctx.renew_token();
        assert_ne!(ctx.token(), first);
        assert_eq!(ctx.get_string(keys::RESET_EMAIL).as_deref(), Some("a@osu.edu"));
        // Never persisted, so there is nothing to delete.
        assert!(ctx.take_superseded().is_none());
    }
}
