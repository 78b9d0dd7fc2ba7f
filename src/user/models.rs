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
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        UserId(Uuid::new_v4())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub user_id: UserId,
    pub name: String,
    pub email: String, // always stored lowercased
    pub hashed_password: String,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row handed to a repository; the password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub hashed_password: String,
    pub email_verified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactMethod {
    Email,
    Phone,
    Other,
}

impl ContactMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactMethod::Email => "email",
            ContactMethod::Phone => "phone",
            ContactMethod::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(ContactMethod::Email),
            "phone" => Some(ContactMethod::Phone),
            "other" => Some(ContactMethod::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub method: ContactMethod,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Day {
    Sun,
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
}

impl Day {
    pub const ALL: [Day; 7] = [
        Day::Sun,
        Day::Mon,
        Day::Tue,
        Day::Wed,
        Day::Thu,
        Day::Fri,
        Day::Sat,
    ];

    pub fn abbrev(&self) -> &'static str {
        match self {
            Day::Sun => "sun",
            Day::Mon => "mon",
            Day::Tue => "tue",
            Day::Wed => "wed",
            Day::Thu => "thu",
            Day::Fri => "fri",
            Day::Sat => "sat",
        }
    }

    pub fn from_abbrev(s: &str) -> Option<Self> {
        Day::ALL.into_iter().find(|d| d.abbrev() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
}

impl TimeOfDay {
    pub const ALL: [TimeOfDay; 3] = [TimeOfDay::Morning, TimeOfDay::Afternoon, TimeOfDay::Evening];

    pub fn abbrev(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Afternoon => "afternoon",
            TimeOfDay::Evening => "evening",
        }
    }

    pub fn from_abbrev(s: &str) -> Option<Self> {
        TimeOfDay::ALL.into_iter().find(|t| t.abbrev() == s)
    }
}

/// One cell of the weekly availability grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Timeslot {
    pub day: Day,
    pub time: TimeOfDay,
}

impl Timeslot {
    /// Form field name for this cell, e.g. `mon-evening`.
    pub fn field_name(&self) -> String {
        format!("{}-{}", self.day.abbrev(), self.time.abbrev())
    }

    pub fn parse(field: &str) -> Option<Self> {
        let (day, time) = field.split_once('-')?;
        Some(Timeslot {
            day: Day::from_abbrev(day)?,
            time: TimeOfDay::from_abbrev(time)?,
        })
    }

    pub fn all() -> impl Iterator<Item = Timeslot> {
        Day::ALL
            .into_iter()
            .flat_map(|day| TimeOfDay::ALL.into_iter().map(move |time| Timeslot { day, time }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeslot_field_names_round_trip() {
        for slot in Timeslot::all() {
            assert_eq!(Timeslot::parse(&slot.field_name()), Some(slot));
        }
        assert_eq!(Timeslot::all().count(), 21);
        assert_eq!(Timeslot::parse("mon"), None);
        assert_eq!(Timeslot::parse("funday-morning"), None);
    }

    #[test]
    fn contact_method_parse_rejects_unknown() {
        assert_eq!(ContactMethod::parse("phone"), Some(ContactMethod::Phone));
        assert_eq!(ContactMethod::parse("fax"), None);
    }
}
