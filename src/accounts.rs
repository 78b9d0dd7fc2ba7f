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

//! Account lifecycle: signup and registration, login and logout, forgotten
//! password and reset, account deletion.
//!
//! Every operation takes the request's `SessionContext` and the gate's
//! `AuthState` and answers with a navigational `Outcome`. Signup and reset
//! share one token store; they differ only in which session keys they stash
//! and which credential write follows a successful verify.

use crate::clock::Clock;
use crate::gate::AuthState;
use crate::mailer::{MailTemplate, OutboundMail, Outbox};
use crate::session::{keys, Flash, SessionContext};
use crate::store::StoreError;
use crate::user::{AuthenticationError, Contact, ContactMethod, Timeslot, UserManagerError};
use crate::user_manager::{normalize_email, UserManager};
use crate::validator::{self, Validator, EMAIL_MAX_CHARS, PASSWORD_MAX_CHARS, PASSWORD_MIN_CHARS};
use crate::verification::{VerificationStore, VerifyError};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

pub const SIGNUP_NOTICE: &str = "A link to activate your account has been sent to the email address provided. Please check your junk folder.";
pub const RESET_NOTICE: &str = "A link to reset your password has been sent to the email address provided. Please check your junk folder.";
pub const EXPIRED_NOTICE: &str = "Expired verification token.";
pub const WELCOME_NOTICE: &str = "Successfully created account. Welcome!";
pub const PROFILE_INCOMPLETE_NOTICE: &str =
    "Your account was created, but some profile details could not be saved. Please add them again from your profile.";
pub const PASSWORD_UPDATED_NOTICE: &str = "Successfully updated password. Please login.";
pub const NOT_VERIFIED_NOTICE: &str = "Please confirm your email address before logging in.";
pub const LOGGED_OUT_NOTICE: &str = "Successfully logged out.";
pub const ACCOUNT_DELETED_NOTICE: &str = "Your account has been deleted.";

/// What the HTTP layer should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 303 to the given path.
    Redirect(String),
    /// 303 back to the page the form was posted from.
    Refresh,
    Render { status: StatusCode, page: &'static str, data: Value },
}

impl Outcome {
    pub fn page(page: &'static str, data: Value) -> Self {
        Outcome::Render { status: StatusCode::OK, page, data }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{}", .0.join("\n"))]
    ValidationFailed(Vec<String>),
    /// Bad or missing token, wrong credentials, duplicate registration. Always
    /// rendered the same way so nothing about accounts or tokens leaks.
    #[error("permission denied")]
    Unauthorized,
    #[error("bad request")]
    BadRequest,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Credentials(#[from] UserManagerError),
}

impl From<VerifyError> for AuthError {
    fn from(e: VerifyError) -> Self {
        match e {
            VerifyError::NotFound | VerifyError::Expired => AuthError::Unauthorized,
            VerifyError::Store(e) => AuthError::Store(e),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EmailForm {
    pub email: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResetForm {
    /// Blank means "use the email stashed at forgot time".
    pub email: String,
    pub password: String,
}

/// Registration submission. The availability grid arrives as one checkbox
/// per cell, so this is built from the raw field map.
#[derive(Debug, Default)]
pub struct RegisterForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub contact_method: String,
    pub contact_value: String,
    pub availability: BTreeSet<Timeslot>,
}

impl RegisterForm {
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        let get = |k: &str| fields.get(k).cloned().unwrap_or_default();
        Self {
            name: get("name"),
            email: get("email"),
            password: get("password"),
            contact_method: get("contact-method"),
            contact_value: get("contact-value"),
            availability: Timeslot::all()
                .filter(|slot| fields.get(&slot.field_name()).is_some_and(|v| v == "on"))
                .collect(),
        }
    }
}

/// Knobs that shape the flows.
#[derive(Debug, Clone)]
pub struct AccountPolicy {
    pub base_url: String,
    pub permitted_domain: String,
    pub resend_cooldown: chrono::Duration,
}

// --- Accounts ---
// Coordinates the credential store, the token store and the caller's session.
#[derive(Clone)]
pub struct Accounts {
    users: UserManager,
    tokens: VerificationStore,
    outbox: Arc<dyn Outbox>,
    clock: Arc<dyn Clock>,
    policy: AccountPolicy,
}

impl Accounts {
    pub fn new(
        users: UserManager,
        tokens: VerificationStore,
        outbox: Arc<dyn Outbox>,
        clock: Arc<dyn Clock>,
        policy: AccountPolicy,
    ) -> Self {
        Self { users, tokens, outbox, clock, policy }
    }

    pub async fn signup(
        &self,
        session: &mut SessionContext,
        auth: &AuthState,
        form: EmailForm,
    ) -> Result<Outcome, AuthError> {
        if auth.is_authenticated() {
            return Err(AuthError::BadRequest);
        }

        let mut v = Validator::new();
        self.check_email(&mut v, &form.email, true);
        v.finish().map_err(AuthError::ValidationFailed)?;

        let email = normalize_email(&form.email);
        // Known addresses and fresh tokens get the same answer as a real send.
        if !self.users.exists_email(&email).await? && self.outside_cooldown(&email).await? {
            let token = self.tokens.issue(&email).await?;
            self.dispatch(&email, MailTemplate::EmailVerification, "/auth/register", &token.token);
        }

        session.clear();
        session.renew_token();
        session.put(keys::VERIFICATION_EMAIL, email);
        session.put_flash(Flash::info(SIGNUP_NOTICE));
        Ok(Outcome::Refresh)
    }

    /// Landing page for the emailed link.
    pub async fn register_page(
        &self,
        session: &mut SessionContext,
        auth: &AuthState,
        token: Option<String>,
    ) -> Result<Outcome, AuthError> {
        if auth.is_authenticated() {
            return Err(AuthError::BadRequest);
        }
        let token = token.filter(|t| !t.is_empty()).ok_or(AuthError::Unauthorized)?;
        session.put(keys::VERIFICATION_TOKEN, token);

        let methods: Vec<&str> = [ContactMethod::Email, ContactMethod::Phone, ContactMethod::Other]
            .iter()
            .map(|m| m.as_str())
            .collect();
        let availability: Vec<String> = Timeslot::all().map(|s| s.field_name()).collect();

        Ok(Outcome::page(
            "auth-register",
            json!({
                "has_session_email": session.exists(keys::VERIFICATION_EMAIL),
                "contact_methods": methods,
                "availability": availability,
            }),
        ))
    }

    pub async fn register_submit(
        &self,
        session: &mut SessionContext,
        auth: &AuthState,
        form: RegisterForm,
    ) -> Result<Outcome, AuthError> {
        if auth.is_authenticated() {
            return Err(AuthError::BadRequest);
        }

        let email = effective_email(&form.email, session, keys::VERIFICATION_EMAIL);
        let method = ContactMethod::parse(&form.contact_method).ok_or(AuthError::BadRequest)?;

        let mut v = Validator::new();
        v.check(validator::not_blank(&form.name), "invalid name: cannot be blank");
        self.check_email(&mut v, &email, true);
        check_password(&mut v, &form.password);
        v.check(validator::not_blank(&form.contact_value), "invalid contact value: cannot be blank");
        match method {
            ContactMethod::Email => {
                v.check(validator::is_email(&form.contact_value), "invalid contact email: must be a valid email address");
                v.check(
                    validator::max_chars(&form.contact_value, EMAIL_MAX_CHARS),
                    "invalid contact email: must be no more than 254 characters long",
                );
            }
            ContactMethod::Phone => {
                v.check(validator::is_phone(&form.contact_value), "invalid contact phone: must be a valid phone number");
            }
            ContactMethod::Other => {}
        }
        v.finish().map_err(AuthError::ValidationFailed)?;

        let token = pending_token(session, keys::VERIFICATION_TOKEN)?;
        match self.tokens.verify(&token, &email).await {
            Ok(()) => {}
            Err(VerifyError::Expired) => {
                session.put_flash(Flash::error(EXPIRED_NOTICE));
                return Ok(Outcome::Redirect("/".into()));
            }
            Err(e) => return Err(e.into()),
        }

        // A racing registration that got here first surfaces as DuplicateEmail.
        let user_id = match self.users.insert(&form.name, &email, &form.password).await {
            Ok(id) => id,
            Err(UserManagerError::DuplicateEmail) => return Err(AuthError::Unauthorized),
            Err(e) => return Err(e.into()),
        };
        self.consume(&email).await;

        let mut complete = true;
        let contact = Contact { method, value: form.contact_value.trim().to_string() };
        if let Err(e) = self.users.add_contact(user_id, &contact).await {
            tracing::error!(%user_id, error = %e, "failed to save primary contact");
            complete = false;
        }
        for slot in &form.availability {
            if let Err(e) = self.users.add_timeslot(user_id, *slot).await {
                tracing::error!(%user_id, slot = %slot.field_name(), error = %e, "failed to save availability");
                complete = false;
            }
        }

        session.clear();
        session.renew_token();
        session.put(keys::AUTHENTICATED_USER_ID, user_id.to_string());
        session.put_flash(if complete {
            Flash::success(WELCOME_NOTICE)
        } else {
            Flash::error(PROFILE_INCOMPLETE_NOTICE)
        });
        tracing::info!(%user_id, "account registered");
        Ok(Outcome::Redirect("/".into()))
    }

    pub async fn login(
        &self,
        session: &mut SessionContext,
        auth: &AuthState,
        form: LoginForm,
    ) -> Result<Outcome, AuthError> {
        if auth.is_authenticated() {
            return Err(AuthError::BadRequest);
        }

        let mut v = Validator::new();
        v.check(validator::not_blank(&form.email), "invalid email: cannot be blank");
        v.check(validator::is_email(&form.email), "invalid email: must be a valid email address");
        v.check(validator::not_blank(&form.password), "invalid password: cannot be blank");
        v.finish().map_err(AuthError::ValidationFailed)?;

        let user_id = match self.users.authenticate(&form.email, &form.password).await {
            Ok(id) => id,
            Err(AuthenticationError::InvalidCredentials) => return Err(AuthError::Unauthorized),
            Err(AuthenticationError::EmailNotVerified) => {
                session.put_flash(Flash::error(NOT_VERIFIED_NOTICE));
                return Ok(Outcome::Redirect("/auth/login".into()));
            }
            Err(AuthenticationError::DatabaseError(e)) => return Err(e.into()),
        };

        session.renew_token();
        session.put(keys::AUTHENTICATED_USER_ID, user_id.to_string());
        Ok(Outcome::Redirect("/".into()))
    }

    /// Rotate first, then drop the key, so the old id never stays authenticated.
    pub async fn logout(&self, session: &mut SessionContext) -> Result<Outcome, AuthError> {
        session.renew_token();
        session.remove(keys::AUTHENTICATED_USER_ID);
        session.put_flash(Flash::success(LOGGED_OUT_NOTICE));
        Ok(Outcome::Redirect("/".into()))
    }

    pub async fn forgot(
        &self,
        session: &mut SessionContext,
        form: EmailForm,
    ) -> Result<Outcome, AuthError> {
        let mut v = Validator::new();
        self.check_email(&mut v, &form.email, false);
        v.finish().map_err(AuthError::ValidationFailed)?;

        let email = normalize_email(&form.email);
        // Unknown addresses get the same answer and no token.
        if self.users.exists_email(&email).await? && self.outside_cooldown(&email).await? {
            let token = self.tokens.issue(&email).await?;
            self.dispatch(&email, MailTemplate::PasswordReset, "/auth/reset/update", &token.token);
        }

        session.clear();
        session.renew_token();
        session.put(keys::RESET_EMAIL, email);
        session.put_flash(Flash::info(RESET_NOTICE));
        Ok(Outcome::Refresh)
    }

    pub async fn reset_page(
        &self,
        session: &mut SessionContext,
        token: Option<String>,
    ) -> Result<Outcome, AuthError> {
        let token = token.filter(|t| !t.is_empty()).ok_or(AuthError::Unauthorized)?;
        session.put(keys::RESET_TOKEN, token);
        Ok(Outcome::page(
            "auth-reset-update",
            json!({ "has_session_email": session.exists(keys::RESET_EMAIL) }),
        ))
    }

    pub async fn reset_submit(
        &self,
        session: &mut SessionContext,
        form: ResetForm,
    ) -> Result<Outcome, AuthError> {
        let email = effective_email(&form.email, session, keys::RESET_EMAIL);

        let mut v = Validator::new();
        self.check_email(&mut v, &email, false);
        check_password(&mut v, &form.password);
        v.finish().map_err(AuthError::ValidationFailed)?;

        let token = pending_token(session, keys::RESET_TOKEN)?;
        match self.tokens.verify(&token, &email).await {
            Ok(()) => {}
            Err(VerifyError::Expired) => {
                session.put_flash(Flash::error(EXPIRED_NOTICE));
                return Ok(Outcome::Redirect("/auth/reset".into()));
            }
            Err(e) => return Err(e.into()),
        }

        match self.users.update_password(&email, &form.password).await {
            Ok(()) => {}
            Err(UserManagerError::UserNotFound) => return Err(AuthError::Unauthorized),
            Err(e) => return Err(e.into()),
        }
        self.consume(&email).await;

        session.clear();
        session.renew_token();
        session.put_flash(Flash::success(PASSWORD_UPDATED_NOTICE));
        Ok(Outcome::Redirect("/auth/login".into()))
    }

    pub async fn profile_page(&self, auth: &AuthState) -> Result<Outcome, AuthError> {
        let user_id = auth.user_id().ok_or(AuthError::Unauthorized)?;
        let user = self.users.get_user(user_id).await?.ok_or(AuthError::Unauthorized)?;
        let contacts = self.users.contacts(user_id).await?;
        let availability: Vec<String> =
            self.users.timeslots(user_id).await?.iter().map(|s| s.field_name()).collect();

        Ok(Outcome::page(
            "profile",
            json!({
                "name": user.name,
                "email": user.email,
                "member_since": user.created_at.to_rfc3339(),
                "contacts": contacts,
                "availability": availability,
            }),
        ))
    }

    /// Removes the account with its contact and availability rows. Other
    /// browsers still holding the id are downgraded by the gate.
    pub async fn delete_account(
        &self,
        session: &mut SessionContext,
        auth: &AuthState,
    ) -> Result<Outcome, AuthError> {
        let user_id = auth.user_id().ok_or(AuthError::Unauthorized)?;
        match self.users.delete_user(user_id).await {
            Ok(()) => {}
            Err(UserManagerError::UserNotFound) => return Err(AuthError::Unauthorized),
            Err(e) => return Err(e.into()),
        }

        session.clear();
        session.renew_token();
        session.put_flash(Flash::success(ACCOUNT_DELETED_NOTICE));
        tracing::info!(%user_id, "account deleted");
        Ok(Outcome::Redirect("/".into()))
    }

    fn check_email(&self, v: &mut Validator, email: &str, restrict_domain: bool) {
        v.check(validator::not_blank(email), "invalid email: cannot be blank");
        v.check(validator::is_email(email), "invalid email: must be a valid email address");
        v.check(
            validator::max_chars(email, EMAIL_MAX_CHARS),
            "invalid email: must be no more than 254 characters long",
        );
        if restrict_domain {
            v.check(
                validator::permitted_email_domain(email, &self.policy.permitted_domain),
                format!("invalid email: must be an @{} email address", self.policy.permitted_domain),
            );
        }
    }

    /// False while the last token for `email` is younger than the cooldown.
    async fn outside_cooldown(&self, email: &str) -> Result<bool, StoreError> {
        match self.tokens.get(email).await? {
            Some(existing) if self.clock.now() - existing.created_at < self.policy.resend_cooldown => {
                tracing::debug!(%email, "token re-send suppressed by cooldown");
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    fn dispatch(&self, email: &str, template: MailTemplate, path: &str, token: &str) {
        let link = format!("{}{}?token={}", self.policy.base_url, path, token);
        self.outbox.enqueue(OutboundMail { to: email.to_string(), template, link });
    }

    /// The credential write already happened, so a failed purge is only logged.
    /// The row falls to the sweep once it expires.
    async fn consume(&self, email: &str) {
        if let Err(e) = self.tokens.purge(email).await {
            tracing::error!(%email, error = %e, "failed to purge consumed verification token");
        }
    }
}

fn effective_email(form_email: &str, session: &SessionContext, key: &str) -> String {
    if form_email.trim().is_empty() {
        session.get_string(key).unwrap_or_default()
    } else {
        form_email.trim().to_string()
    }
}

fn pending_token(session: &SessionContext, key: &str) -> Result<String, AuthError> {
    session.get_string(key).filter(|t| !t.is_empty()).ok_or(AuthError::Unauthorized)
}

fn check_password(v: &mut Validator, password: &str) {
    v.check(validator::not_blank(password), "invalid password: cannot be blank");
    v.check(
        validator::min_chars(password, PASSWORD_MIN_CHARS),
        "invalid password: must be at least 8 characters long",
    );
    v.check(
        validator::max_chars(password, PASSWORD_MAX_CHARS),
        "invalid password: must be no more than 72 characters long",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::mailer::RecordingOutbox;
    use crate::memory_store::MemoryStore;
    use crate::session::FlashKind;
    use crate::user::password::test_hasher;
    use crate::user::{NewUser, User, UserId, UserRepository};
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const DOMAIN: &str = "osu.edu";

    /// Delegates to the memory store but can be told to fail specific writes.
    #[derive(Default)]
    struct FaultyUsers {
        inner: MemoryStore,
        fail_insert: AtomicBool,
        fail_contacts: AtomicBool,
    }

    #[async_trait::async_trait]
    impl UserRepository for FaultyUsers {
        async fn insert_user(&self, user: &NewUser, now: DateTime<Utc>) -> Result<User, StoreError> {
            if self.fail_insert.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("connection reset".into()));
            }
            self.inner.insert_user(user, now).await
        }
        async fn find_user_by_id(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
            self.inner.find_user_by_id(user_id).await
        }
        async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            self.inner.find_user_by_email(email).await
        }
        async fn update_password(&self, user_id: UserId, hashed: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
            self.inner.update_password(user_id, hashed, now).await
        }
        async fn insert_contact(&self, user_id: UserId, contact: &Contact) -> Result<(), StoreError> {
            if self.fail_contacts.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("connection reset".into()));
            }
            self.inner.insert_contact(user_id, contact).await
        }
        async fn insert_timeslot(&self, user_id: UserId, slot: Timeslot) -> Result<(), StoreError> {
            self.inner.insert_timeslot(user_id, slot).await
        }
        async fn list_contacts(&self, user_id: UserId) -> Result<Vec<Contact>, StoreError> {
            self.inner.list_contacts(user_id).await
        }
        async fn list_timeslots(&self, user_id: UserId) -> Result<Vec<Timeslot>, StoreError> {
            self.inner.list_timeslots(user_id).await
        }
        async fn delete_user(&self, user_id: UserId) -> Result<(), StoreError> {
            self.inner.delete_user(user_id).await
        }
    }

    struct Harness {
        accounts: Accounts,
        users: UserManager,
        tokens: VerificationStore,
        user_rows: Arc<FaultyUsers>,
        clock: Arc<ManualClock>,
        outbox: Arc<RecordingOutbox>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 4, 1, 9, 0, 0).unwrap()));
        let user_rows = Arc::new(FaultyUsers::default());
        let outbox = Arc::new(RecordingOutbox::default());
        let deadline = Duration::from_secs(5);
        let users = UserManager::new(user_rows.clone(), test_hasher(), clock.clone(), deadline);
        let tokens = VerificationStore::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            ChronoDuration::hours(24),
            deadline,
        );
        let accounts = Accounts::new(
            users.clone(),
            tokens.clone(),
            outbox.clone(),
            clock.clone(),
            AccountPolicy {
                base_url: "http://localhost:4000".into(),
                permitted_domain: DOMAIN.into(),
                resend_cooldown: ChronoDuration::minutes(5),
            },
        );
        Harness { accounts, users, tokens, user_rows, clock, outbox }
    }

    fn anon() -> AuthState {
        AuthState::anonymous()
    }

    fn token_from(link: &str) -> String {
        link.split("token=").nth(1).unwrap().to_string()
    }

    fn email_form(email: &str) -> EmailForm {
        EmailForm { email: email.into() }
    }

    fn register_form(name: &str, email: &str, password: &str) -> RegisterForm {
        RegisterForm {
            name: name.into(),
            email: email.into(),
            password: password.into(),
            contact_method: "phone".into(),
            contact_value: "541-737-1000".into(),
            availability: [
                Timeslot::parse("mon-evening").unwrap(),
                Timeslot::parse("sat-morning").unwrap(),
            ]
            .into_iter()
            .collect(),
        }
    }

    /// Runs signup plus the emailed link in one browser; returns its session and the token.
    async fn pending_signup(h: &Harness, email: &str) -> (SessionContext, String) {
        let mut session = SessionContext::new();
        h.accounts.signup(&mut session, &anon(), email_form(email)).await.unwrap();
        let token = token_from(&h.outbox.last_link().unwrap());
        h.accounts.register_page(&mut session, &anon(), Some(token.clone())).await.unwrap();
        (session, token)
    }

    async fn registered_user(h: &Harness, email: &str, password: &str) -> UserId {
        h.users.insert("Existing", email, password).await.unwrap()
    }

    #[tokio::test]
    async fn happy_path_signup_registers_and_authenticates() {
        let h = harness();
        let mut session = SessionContext::new();
        let before = session.token().to_string();

        let out = h.accounts.signup(&mut session, &anon(), email_form("a@osu.edu")).await.unwrap();
        assert_eq!(out, Outcome::Refresh);
        assert_ne!(session.token(), before);
        assert_eq!(session.get_string(keys::VERIFICATION_EMAIL).as_deref(), Some("a@osu.edu"));

        let sent = h.outbox.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@osu.edu");
        assert_eq!(sent[0].template, MailTemplate::EmailVerification);
        assert!(sent[0].link.starts_with("http://localhost:4000/auth/register?token="));
        let token = token_from(&sent[0].link);

        let page = h.accounts.register_page(&mut session, &anon(), Some(token.clone())).await.unwrap();
        let Outcome::Render { status, page, data } = page else { panic!("expected a page") };
        assert_eq!((status, page), (StatusCode::OK, "auth-register"));
        assert_eq!(data["has_session_email"], true);
        assert_eq!(session.get_string(keys::VERIFICATION_TOKEN), Some(token.clone()));

        let before_register = session.token().to_string();
        let out = h
            .accounts
            .register_submit(&mut session, &anon(), register_form("A", "", "longenough1"))
            .await
            .unwrap();
        assert_eq!(out, Outcome::Redirect("/".into()));
        assert_ne!(session.token(), before_register);
        assert!(!session.exists(keys::VERIFICATION_EMAIL));
        assert!(!session.exists(keys::VERIFICATION_TOKEN));
        assert_eq!(session.pop_flash(), Some(Flash::success(WELCOME_NOTICE)));

        let user_id = h.users.authenticate("a@osu.edu", "longenough1").await.unwrap();
        assert_eq!(session.get_string(keys::AUTHENTICATED_USER_ID), Some(user_id.to_string()));
        assert_eq!(h.users.contacts(user_id).await.unwrap().len(), 1);
        assert_eq!(h.users.timeslots(user_id).await.unwrap().len(), 2);

        // Consumed.
        assert!(h.tokens.get("a@osu.edu").await.unwrap().is_none());
        assert!(matches!(h.tokens.verify(&token, "a@osu.edu").await, Err(VerifyError::NotFound)));
    }

    #[tokio::test]
    async fn link_opened_in_another_browser_uses_the_form_email() {
        let h = harness();
        h.accounts.signup(&mut SessionContext::new(), &anon(), email_form("b@osu.edu")).await.unwrap();
        let token = token_from(&h.outbox.last_link().unwrap());

        let mut other = SessionContext::new();
        let page = h.accounts.register_page(&mut other, &anon(), Some(token)).await.unwrap();
        let Outcome::Render { data, .. } = page else { panic!("expected a page") };
        assert_eq!(data["has_session_email"], false);

        // Without an email there is nothing to verify against.
        let err = h
            .accounts
            .register_submit(&mut other, &anon(), register_form("B", "", "longenough1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ValidationFailed(_)));

        h.accounts
            .register_submit(&mut other, &anon(), register_form("B", "B@osu.edu", "longenough1"))
            .await
            .unwrap();
        assert!(h.users.exists_email("b@osu.edu").await.unwrap());
    }

    #[tokio::test]
    async fn signup_within_cooldown_sends_once() {
        let h = harness();
        let mut session = SessionContext::new();
        h.accounts.signup(&mut session, &anon(), email_form("a@osu.edu")).await.unwrap();
        let first = token_from(&h.outbox.last_link().unwrap());

        h.clock.advance(ChronoDuration::minutes(4));
        let second = h.accounts.signup(&mut session, &anon(), email_form("a@osu.edu")).await.unwrap();
        assert_eq!(second, Outcome::Refresh);
        assert_eq!(session.pop_flash(), Some(Flash::info(SIGNUP_NOTICE)));
        assert_eq!(h.outbox.sent().len(), 1);
        h.tokens.verify(&first, "a@osu.edu").await.unwrap();

        h.clock.advance(ChronoDuration::minutes(2));
        h.accounts.signup(&mut session, &anon(), email_form("a@osu.edu")).await.unwrap();
        assert_eq!(h.outbox.sent().len(), 2);
        assert!(matches!(h.tokens.verify(&first, "a@osu.edu").await, Err(VerifyError::NotFound)));
    }

    #[tokio::test]
    async fn signup_for_existing_account_looks_like_a_send() {
        let h = harness();
        registered_user(&h, "taken@osu.edu", "longenough1").await;

        let mut known = SessionContext::new();
        let mut unknown = SessionContext::new();
        let a = h.accounts.signup(&mut known, &anon(), email_form("taken@osu.edu")).await.unwrap();
        let b = h.accounts.signup(&mut unknown, &anon(), email_form("fresh@osu.edu")).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(known.pop_flash(), unknown.pop_flash());
        assert_eq!(known.status(), unknown.status());
        assert!(h.tokens.get("taken@osu.edu").await.unwrap().is_none());
        assert_eq!(h.outbox.sent().len(), 1);
    }

    #[tokio::test]
    async fn signup_rejects_bad_input_and_authenticated_callers() {
        let h = harness();
        let mut session = SessionContext::new();

        let err = h.accounts.signup(&mut session, &anon(), email_form("a@gmail.com")).await.unwrap_err();
        let AuthError::ValidationFailed(messages) = err else { panic!("expected validation") };
        assert_eq!(messages, vec!["invalid email: must be an @osu.edu email address"]);

        let err = h.accounts.signup(&mut session, &anon(), email_form("")).await.unwrap_err();
        let AuthError::ValidationFailed(messages) = err else { panic!("expected validation") };
        assert!(messages.contains(&"invalid email: cannot be blank".to_string()));

        let authed = AuthState::authenticated(UserId::new());
        let err = h.accounts.signup(&mut session, &authed, email_form("a@osu.edu")).await.unwrap_err();
        assert!(matches!(err, AuthError::BadRequest));
        assert!(h.outbox.sent().is_empty());
    }

    #[tokio::test]
    async fn register_needs_a_pending_token() {
        let h = harness();
        let mut session = SessionContext::new();
        let err = h.accounts.register_page(&mut session, &anon(), Some(String::new())).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized));
        let err = h.accounts.register_page(&mut session, &anon(), None).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized));

        let err = h
            .accounts
            .register_submit(&mut session, &anon(), register_form("A", "a@osu.edu", "longenough1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized));
    }

    #[tokio::test]
    async fn register_with_wrong_token_is_unauthorized() {
        let h = harness();
        let (mut session, _) = pending_signup(&h, "a@osu.edu").await;
        session.put(keys::VERIFICATION_TOKEN, "forged");

        let err = h
            .accounts
            .register_submit(&mut session, &anon(), register_form("A", "", "longenough1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized));
        assert!(!h.users.exists_email("a@osu.edu").await.unwrap());
    }

    #[tokio::test]
    async fn register_rejects_unknown_contact_method() {
        let h = harness();
        let (mut session, _) = pending_signup(&h, "a@osu.edu").await;
        let mut form = register_form("A", "", "longenough1");
        form.contact_method = "fax".into();

        let err = h.accounts.register_submit(&mut session, &anon(), form).await.unwrap_err();
        assert!(matches!(err, AuthError::BadRequest));
    }

    #[tokio::test]
    async fn register_reports_every_invalid_field() {
        let h = harness();
        let (mut session, _) = pending_signup(&h, "a@osu.edu").await;
        let mut form = register_form(" ", "", "short");
        form.contact_value = "not a phone".into();

        let err = h.accounts.register_submit(&mut session, &anon(), form).await.unwrap_err();
        let AuthError::ValidationFailed(messages) = err else { panic!("expected validation") };
        assert_eq!(
            messages,
            vec![
                "invalid name: cannot be blank",
                "invalid password: must be at least 8 characters long",
                "invalid contact phone: must be a valid phone number",
            ]
        );
    }

    #[tokio::test]
    async fn expired_signup_token_restarts_the_flow() {
        let h = harness();
        let (mut session, token) = pending_signup(&h, "a@osu.edu").await;
        h.clock.advance(ChronoDuration::hours(25));

        for _ in 0..2 {
            let out = h
                .accounts
                .register_submit(&mut session, &anon(), register_form("A", "", "longenough1"))
                .await
                .unwrap();
            assert_eq!(out, Outcome::Redirect("/".into()));
            let flash = session.pop_flash().unwrap();
            assert_eq!((flash.kind, flash.message.as_str()), (FlashKind::Error, EXPIRED_NOTICE));
        }
        assert!(!h.users.exists_email("a@osu.edu").await.unwrap());
        assert!(matches!(h.tokens.verify(&token, "a@osu.edu").await, Err(VerifyError::Expired)));
    }

    #[tokio::test]
    async fn failed_user_insert_keeps_the_token() {
        let h = harness();
        let (mut session, token) = pending_signup(&h, "a@osu.edu").await;
        h.user_rows.fail_insert.store(true, Ordering::SeqCst);

        let err = h
            .accounts
            .register_submit(&mut session, &anon(), register_form("A", "", "longenough1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Credentials(UserManagerError::Store(_))));
        h.tokens.verify(&token, "a@osu.edu").await.unwrap();

        // Retry with the same link succeeds once the store recovers.
        h.user_rows.fail_insert.store(false, Ordering::SeqCst);
        h.accounts
            .register_submit(&mut session, &anon(), register_form("A", "", "longenough1"))
            .await
            .unwrap();
        assert!(h.users.exists_email("a@osu.edu").await.unwrap());
    }

    #[tokio::test]
    async fn dependent_row_failure_keeps_the_account_and_says_so() {
        let h = harness();
        let (mut session, _) = pending_signup(&h, "a@osu.edu").await;
        h.user_rows.fail_contacts.store(true, Ordering::SeqCst);

        let out = h
            .accounts
            .register_submit(&mut session, &anon(), register_form("A", "", "longenough1"))
            .await
            .unwrap();
        assert_eq!(out, Outcome::Redirect("/".into()));
        assert_eq!(session.pop_flash(), Some(Flash::error(PROFILE_INCOMPLETE_NOTICE)));
        assert!(session.exists(keys::AUTHENTICATED_USER_ID));

        let user_id = h.users.authenticate("a@osu.edu", "longenough1").await.unwrap();
        assert!(h.users.contacts(user_id).await.unwrap().is_empty());
        assert_eq!(h.users.timeslots(user_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_registrations_create_one_user() {
        let h = harness();
        let (mut first, _) = pending_signup(&h, "race@osu.edu").await;
        let mut second = SessionContext::new();
        second.put(keys::VERIFICATION_EMAIL, "race@osu.edu");
        second.put(keys::VERIFICATION_TOKEN, first.get_string(keys::VERIFICATION_TOKEN).unwrap());

        let (auth_one, auth_two) = (anon(), anon());
        let (a, b) = tokio::join!(
            h.accounts.register_submit(&mut first, &auth_one, register_form("One", "", "longenough1")),
            h.accounts.register_submit(&mut second, &auth_two, register_form("Two", "", "longenough2")),
        );

        let results = [a, b];
        let created = results.iter().filter(|r| r.is_ok()).count();
        let refused = results.iter().filter(|r| matches!(r, Err(AuthError::Unauthorized))).count();
        assert_eq!((created, refused), (1, 1));
        assert!(h.users.exists_email("race@osu.edu").await.unwrap());
    }

    #[tokio::test]
    async fn login_rotates_the_session() {
        let h = harness();
        let user_id = registered_user(&h, "a@osu.edu", "correct-pw").await;
        let mut session = SessionContext::new();
        let before = session.token().to_string();

        let out = h
            .accounts
            .login(&mut session, &anon(), LoginForm { email: "A@osu.edu".into(), password: "correct-pw".into() })
            .await
            .unwrap();
        assert_eq!(out, Outcome::Redirect("/".into()));
        assert_ne!(session.token(), before);
        assert_eq!(session.get_string(keys::AUTHENTICATED_USER_ID), Some(user_id.to_string()));
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized_and_sets_nothing() {
        let h = harness();
        registered_user(&h, "a@osu.edu", "correct-pw").await;
        let mut session = SessionContext::new();

        for (email, password) in [("a@osu.edu", "wrong-pw"), ("nobody@osu.edu", "correct-pw")] {
            let err = h
                .accounts
                .login(&mut session, &anon(), LoginForm { email: email.into(), password: password.into() })
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::Unauthorized));
        }
        assert!(!session.exists(keys::AUTHENTICATED_USER_ID));
    }

    #[tokio::test]
    async fn login_validation_and_double_login() {
        let h = harness();
        let mut session = SessionContext::new();
        let err = h
            .accounts
            .login(&mut session, &anon(), LoginForm { email: "nope".into(), password: String::new() })
            .await
            .unwrap_err();
        let AuthError::ValidationFailed(messages) = err else { panic!("expected validation") };
        assert_eq!(messages.len(), 2);

        let authed = AuthState::authenticated(UserId::new());
        let err = h.accounts.login(&mut session, &authed, LoginForm::default()).await.unwrap_err();
        assert!(matches!(err, AuthError::BadRequest));
    }

    #[tokio::test]
    async fn unverified_account_gets_a_notice() {
        let h = harness();
        let hashed_password = test_hasher().hash("correct-pw").await.unwrap();
        h.user_rows
            .insert_user(
                &NewUser {
                    name: "Legacy".into(),
                    email: "legacy@osu.edu".into(),
                    hashed_password,
                    email_verified: false,
                },
                h.clock.now(),
            )
            .await
            .unwrap();

        let mut session = SessionContext::new();
        let out = h
            .accounts
            .login(&mut session, &anon(), LoginForm { email: "legacy@osu.edu".into(), password: "correct-pw".into() })
            .await
            .unwrap();
        assert_eq!(out, Outcome::Redirect("/auth/login".into()));
        assert_eq!(session.pop_flash(), Some(Flash::error(NOT_VERIFIED_NOTICE)));
        assert!(!session.exists(keys::AUTHENTICATED_USER_ID));
    }

    #[tokio::test]
    async fn logout_rotates_then_forgets_the_user() {
        let h = harness();
        let mut session = SessionContext::new();
        session.put(keys::AUTHENTICATED_USER_ID, UserId::new().to_string());
        let before = session.token().to_string();

        assert_eq!(h.accounts.logout(&mut session).await.unwrap(), Outcome::Redirect("/".into()));
        assert_ne!(session.token(), before);
        assert!(!session.exists(keys::AUTHENTICATED_USER_ID));
        assert_eq!(session.pop_flash(), Some(Flash::success(LOGGED_OUT_NOTICE)));
    }

    #[tokio::test]
    async fn forgot_does_not_reveal_whether_an_account_exists() {
        let h = harness();
        registered_user(&h, "known@osu.edu", "correct-pw").await;

        let mut known = SessionContext::new();
        let mut unknown = SessionContext::new();
        let a = h.accounts.forgot(&mut known, email_form("known@osu.edu")).await.unwrap();
        let b = h.accounts.forgot(&mut unknown, email_form("unknown@osu.edu")).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(known.pop_flash(), Some(Flash::info(RESET_NOTICE)));
        assert_eq!(unknown.pop_flash(), Some(Flash::info(RESET_NOTICE)));
        assert!(known.exists(keys::RESET_EMAIL) && unknown.exists(keys::RESET_EMAIL));

        let sent = h.outbox.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "known@osu.edu");
        assert_eq!(sent[0].template, MailTemplate::PasswordReset);
        assert!(sent[0].link.starts_with("http://localhost:4000/auth/reset/update?token="));
        assert!(h.tokens.get("unknown@osu.edu").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn forgot_within_cooldown_sends_once() {
        let h = harness();
        registered_user(&h, "a@osu.edu", "correct-pw").await;
        let mut session = SessionContext::new();

        h.accounts.forgot(&mut session, email_form("a@osu.edu")).await.unwrap();
        let first = token_from(&h.outbox.last_link().unwrap());
        h.clock.advance(ChronoDuration::seconds(30));
        h.accounts.forgot(&mut session, email_form("a@osu.edu")).await.unwrap();

        assert_eq!(h.outbox.sent().len(), 1);
        h.tokens.verify(&first, "a@osu.edu").await.unwrap();
    }

    #[tokio::test]
    async fn reset_updates_password_and_forces_login() {
        let h = harness();
        registered_user(&h, "a@osu.edu", "old-password").await;
        let mut session = SessionContext::new();
        h.accounts.forgot(&mut session, email_form("a@osu.edu")).await.unwrap();
        let token = token_from(&h.outbox.last_link().unwrap());

        let page = h.accounts.reset_page(&mut session, Some(token.clone())).await.unwrap();
        let Outcome::Render { page, data, .. } = page else { panic!("expected a page") };
        assert_eq!(page, "auth-reset-update");
        assert_eq!(data["has_session_email"], true);

        let before = session.token().to_string();
        let out = h
            .accounts
            .reset_submit(&mut session, ResetForm { email: String::new(), password: "new-password".into() })
            .await
            .unwrap();
        assert_eq!(out, Outcome::Redirect("/auth/login".into()));
        assert_ne!(session.token(), before);
        assert!(!session.exists(keys::RESET_EMAIL));
        assert!(!session.exists(keys::RESET_TOKEN));
        assert_eq!(session.pop_flash(), Some(Flash::success(PASSWORD_UPDATED_NOTICE)));

        assert!(h.users.authenticate("a@osu.edu", "new-password").await.is_ok());
        assert!(h.users.authenticate("a@osu.edu", "old-password").await.is_err());
        assert!(matches!(h.tokens.verify(&token, "a@osu.edu").await, Err(VerifyError::NotFound)));
    }

    #[tokio::test]
    async fn expired_reset_token_leaves_password_alone() {
        let h = harness();
        registered_user(&h, "a@osu.edu", "old-password").await;
        let mut session = SessionContext::new();
        h.accounts.forgot(&mut session, email_form("a@osu.edu")).await.unwrap();
        let token = token_from(&h.outbox.last_link().unwrap());
        h.accounts.reset_page(&mut session, Some(token)).await.unwrap();

        h.clock.advance(ChronoDuration::hours(25));
        let out = h
            .accounts
            .reset_submit(&mut session, ResetForm { email: String::new(), password: "new-password".into() })
            .await
            .unwrap();
        assert_eq!(out, Outcome::Redirect("/auth/reset".into()));
        assert_eq!(session.pop_flash(), Some(Flash::error(EXPIRED_NOTICE)));
        assert!(h.users.authenticate("a@osu.edu", "old-password").await.is_ok());
    }

    #[tokio::test]
    async fn reset_without_pending_token_is_unauthorized() {
        let h = harness();
        registered_user(&h, "a@osu.edu", "old-password").await;
        let mut session = SessionContext::new();
        let err = h
            .accounts
            .reset_submit(&mut session, ResetForm { email: "a@osu.edu".into(), password: "new-password".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized));
    }

    #[tokio::test]
    async fn profile_and_delete_account() {
        let h = harness();
        let (mut session, _) = pending_signup(&h, "a@osu.edu").await;
        h.accounts
            .register_submit(&mut session, &anon(), register_form("A", "", "longenough1"))
            .await
            .unwrap();
        let user_id = h.users.authenticate("a@osu.edu", "longenough1").await.unwrap();
        let auth = AuthState::authenticated(user_id);

        let Outcome::Render { page, data, .. } = h.accounts.profile_page(&auth).await.unwrap() else {
            panic!("expected a page")
        };
        assert_eq!(page, "profile");
        assert_eq!(data["email"], "a@osu.edu");
        assert_eq!(data["contacts"][0]["method"], "phone");
        assert_eq!(data["availability"], json!(["mon-evening", "sat-morning"]));

        assert!(matches!(h.accounts.profile_page(&anon()).await, Err(AuthError::Unauthorized)));

        let before = session.token().to_string();
        let out = h.accounts.delete_account(&mut session, &auth).await.unwrap();
        assert_eq!(out, Outcome::Redirect("/".into()));
        assert_ne!(session.token(), before);
        assert!(!session.exists(keys::AUTHENTICATED_USER_ID));
        assert!(!h.users.exists(user_id).await.unwrap());
        assert!(h.users.contacts(user_id).await.unwrap().is_empty());

        let err = h.accounts.delete_account(&mut session, &auth).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized));
    }

    #[test]
    fn register_form_reads_checkbox_grid() {
        let fields: HashMap<String, String> = [
            ("name", "A"),
            ("contact-method", "email"),
            ("contact-value", "a@example.com"),
            ("mon-evening", "on"),
            ("tue-morning", "off"),
            ("funday-morning", "on"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let form = RegisterForm::from_fields(&fields);
        assert_eq!(form.name, "A");
        assert_eq!(form.contact_method, "email");
        assert_eq!(form.email, "");
        assert_eq!(form.availability.into_iter().collect::<Vec<_>>(), vec![Timeslot::parse("mon-evening").unwrap()]);
    }
}
