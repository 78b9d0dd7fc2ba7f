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
use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};

pub const SESSION_COOKIE: &str = "session";

pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for value in headers.get_all(header::COOKIE) {
        let Ok(s) = value.to_str() else { continue };
        for part in s.split(';') {
            if let Some((k, v)) = part.trim().split_once('=') {
                if k == name && !v.is_empty() {
                    return Some(v.to_string());
                }
            }
        }
    }
    None
}

/// `Set-Cookie` value for a session id; `Expires` mirrors the session expiry.
pub fn session_cookie(token: &str, expiry: DateTime<Utc>, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; Expires={}; HttpOnly; SameSite=Lax",
        SESSION_COOKIE,
        token,
        expiry.format("%a, %d %b %Y %H:%M:%S GMT"),
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::TimeZone;

    #[test]
    fn finds_named_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; session=abc-_1; x=y"));
        assert_eq!(parse_cookie(&headers, SESSION_COOKIE).as_deref(), Some("abc-_1"));
        assert_eq!(parse_cookie(&headers, "missing"), None);
    }

    #[test]
    fn empty_cookie_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session="));
        assert_eq!(parse_cookie(&headers, SESSION_COOKIE), None);
    }

    #[test]
    fn cookie_attributes() {
        let expiry = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let dev = session_cookie("tok", expiry, false);
        assert_eq!(
            dev,
            "session=tok; Path=/; Expires=Sat, 01 Mar 2025 00:00:00 GMT; HttpOnly; SameSite=Lax"
        );
        assert!(session_cookie("tok", expiry, true).ends_with("; Secure"));
    }
}
