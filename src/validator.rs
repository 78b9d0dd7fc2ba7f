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
use regex::Regex;
use std::sync::LazyLock;

pub const EMAIL_MAX_CHARS: usize = 254;
pub const PASSWORD_MIN_CHARS: usize = 8;
/// Bcrypt-era ceiling kept so existing passwords stay valid.
pub const PASSWORD_MAX_CHARS: usize = 72;

static EMAIL_RX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .ok()
});

static PHONE_RX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9][0-9 ().-]{5,18}[0-9]$").ok());

/// Accumulates field errors in the order the checks ran.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<String>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, ok: bool, message: impl Into<String>) {
        if !ok {
            self.errors.push(message.into());
        }
    }

    pub fn finish(self) -> Result<(), Vec<String>> {
        if self.errors.is_empty() { Ok(()) } else { Err(self.errors) }
    }
}

pub fn not_blank(value: &str) -> bool {
    !value.trim().is_empty()
}

pub fn min_chars(value: &str, n: usize) -> bool {
    value.chars().count() >= n
}

pub fn max_chars(value: &str, n: usize) -> bool {
    value.chars().count() <= n
}

pub fn is_email(value: &str) -> bool {
    EMAIL_RX.as_ref().is_some_and(|rx| rx.is_match(value.trim()))
}

pub fn is_phone(value: &str) -> bool {
    PHONE_RX.as_ref().is_some_and(|rx| rx.is_match(value.trim()))
}

/// True when everything after the last `@` equals `domain`, ignoring case.
/// Subdomains do not count.
pub fn permitted_email_domain(value: &str, domain: &str) -> bool {
    value
        .trim()
        .rsplit_once('@')
        .is_some_and(|(_, host)| host.eq_ignore_ascii_case(domain))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_compile() {
        assert!(EMAIL_RX.is_some());
        assert!(PHONE_RX.is_some());
    }

    #[test]
    fn email_shapes() {
        assert!(is_email("a@oregonstate.edu"));
        assert!(is_email("first.last+tag@sub.oregonstate.edu"));
        assert!(!is_email("no-at-sign"));
        assert!(!is_email("two@@oregonstate.edu"));
        assert!(!is_email("a@-bad.edu"));
        assert!(!is_email(""));
    }

    #[test]
    fn phone_shapes() {
        assert!(is_phone("541-737-1000"));
        assert!(is_phone("+1 (541) 737.1000"));
        assert!(!is_phone("call me"));
        assert!(!is_phone("12"));
    }

    #[test]
    fn domain_restriction() {
        assert!(permitted_email_domain("a@oregonstate.edu", "oregonstate.edu"));
        assert!(permitted_email_domain("a@OregonState.EDU", "oregonstate.edu"));
        assert!(!permitted_email_domain("a@evil-oregonstate.edu", "oregonstate.edu"));
        assert!(!permitted_email_domain("a@eecs.oregonstate.edu", "oregonstate.edu"));
        assert!(!permitted_email_domain("oregonstate.edu", "oregonstate.edu"));
    }

    #[test]
    fn lengths_count_chars() {
        assert!(min_chars("longenough1", PASSWORD_MIN_CHARS));
        assert!(!min_chars("short", PASSWORD_MIN_CHARS));
        assert!(max_chars(&"é".repeat(72), PASSWORD_MAX_CHARS));
        assert!(!max_chars(&"x".repeat(73), PASSWORD_MAX_CHARS));
        assert!(!not_blank("   "));
    }

    #[test]
    fn validator_collects_in_order() {
        let mut v = Validator::new();
        v.check(true, "never");
        v.check(false, "first");
        v.check(false, "second");
        assert_eq!(v.finish().unwrap_err(), vec!["first", "second"]);
        assert!(Validator::new().finish().is_ok());
    }
}
