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
use super::MailTemplate;

pub struct MailContent {
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl MailContent {
    pub fn render(template: MailTemplate, link: &str) -> Self {
        let (subject, intro, action) = match template {
            MailTemplate::EmailVerification => (
                "Activate your Slotboard account",
                "Thanks for signing up. Follow the link below to confirm your email address and finish creating your account.",
                "Activate account",
            ),
            MailTemplate::PasswordReset => (
                "Reset your Slotboard password",
                "Someone asked to reset the password for this email address. Follow the link below to choose a new one.",
                "Reset password",
            ),
        };

        let text = format!(
            "{intro}\n\n{link}\n\nThe link works once and expires soon. If you did not ask for it, ignore this email.\n"
        );
        let html = format!(
            r#"<!DOCTYPE html>
<html>
<body>
    <p>{intro}</p>
    <p><a href="{link}">{action}</a></p>
    <p>The link works once and expires soon. If you did not ask for it, ignore this email.</p>
</body>
</html>"#
        );

        Self { subject: subject.to_string(), text, html }
    }
}
