//! Person and group value objects, and the search query.

use std::sync::LazyLock;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DirectoryError, DirectoryResult};

/// Accepted identifier pattern: a lowercase letter followed by lowercase
/// letters, digits, hyphens or underscores.
static UID_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[a-z][a-z0-9_-]+$").expect("UID_REGEX is a valid regex pattern")
});

/// Validate a person identifier.
pub fn validate_uid(uid: &str) -> DirectoryResult<()> {
    if uid.is_empty() {
        return Err(DirectoryError::EmptyUid);
    }
    if !UID_REGEX.is_match(uid) {
        return Err(DirectoryError::InvalidUid {
            uid: uid.to_string(),
        });
    }
    Ok(())
}

/// A person record.
///
/// Field names on the wire follow the short forms the directory schema
/// uses (`cn`, `gn`, `sn`, `eid`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    /// Login identifier.
    pub uid: String,

    /// Full display name.
    #[serde(rename = "cn", default, skip_serializing_if = "String::is_empty")]
    pub common_name: String,

    /// First name.
    #[serde(rename = "gn", default, skip_serializing_if = "String::is_empty")]
    pub given_name: String,

    /// Last name.
    #[serde(rename = "sn", default, skip_serializing_if = "String::is_empty")]
    pub surname: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nickname: String,

    /// Date of birth, `YYYYMMDD`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub birthday: String,

    /// `m`, `f` or empty for unspecified.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gender: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mobile: String,

    /// Desk phone.
    #[serde(rename = "tel", default, skip_serializing_if = "String::is_empty")]
    pub telephone: String,

    /// Employee number; zero means unset.
    #[serde(rename = "eid", default, skip_serializing_if = "is_zero")]
    pub employee_number: u32,

    /// Employment title or role.
    #[serde(rename = "etype", default, skip_serializing_if = "String::is_empty")]
    pub employee_type: String,

    #[serde(rename = "avatarPath", default, skip_serializing_if = "String::is_empty")]
    pub avatar_path: String,

    /// Inline JPEG portrait, never serialized.
    #[serde(skip)]
    pub jpeg_photo: Vec<u8>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Date of joining, `YYYYMMDD`.
    #[serde(rename = "joinDate", default, skip_serializing_if = "String::is_empty")]
    pub join_date: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,

    /// Distinguished name of the backing entry.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dn: String,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl Person {
    /// Create a person with only the identifier set.
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Self::default()
        }
    }

    /// Display name, falling back through nickname, common name, the
    /// formatted full name and finally the uid.
    #[must_use]
    pub fn name(&self) -> String {
        if !self.nickname.is_empty() {
            return self.nickname.clone();
        }
        if !self.common_name.is_empty() {
            return self.common_name.clone();
        }
        if !self.given_name.is_empty() && !self.surname.is_empty() {
            return self.full_name();
        }
        self.uid.clone()
    }

    /// Canonical common name: the stored one, else "given surname".
    #[must_use]
    pub fn canonical_common_name(&self) -> String {
        if !self.common_name.is_empty() {
            return self.common_name.clone();
        }
        self.full_name()
    }

    fn full_name(&self) -> String {
        format!("{} {}", self.given_name, self.surname)
    }

    /// Avatar URI: the stored path when set, else the inline photo as a
    /// `data:` URI, else empty.
    #[must_use]
    pub fn avatar_uri(&self) -> String {
        if !self.avatar_path.is_empty() {
            return self.avatar_path.clone();
        }
        if !self.jpeg_photo.is_empty() {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&self.jpeg_photo);
            return format!("data:image/jpeg;base64,{encoded}");
        }
        String::new()
    }
}

/// A group record. Members are bare uids; translation from member DNs
/// happens at the mapping boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default)]
    pub members: Vec<String>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Whether `uid` is a member.
    #[must_use]
    pub fn has(&self, uid: &str) -> bool {
        self.members.iter().any(|m| m == uid)
    }
}

/// A search query over people.
///
/// The alternatives are mutually exclusive and applied in fixed
/// precedence: uids, then name, then email, then mobile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mobile: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uids: Vec<String>,

    /// Maximum number of results; zero means the backend default.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub limit: u32,
}

impl Spec {
    /// Query a set of uids.
    pub fn with_uids<I, S>(uids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            uids: uids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}
