//! Entry-type descriptors.
//!
//! Each descriptor fixes how one kind of directory entry is addressed and
//! selected: its naming attribute, object class, search filter and
//! attribute set. Two schema dialects are covered. The standard dialect
//! keeps people and groups in `ou=people` / `ou=groups` containers; the
//! Active Directory dialect uses `CN=Users` / `CN=Builtin` with its own
//! attribute names. DN construction is dispatched over a closed
//! [`EntryKind`] so both dialects share one code path.

use ldap3::ldap_escape;

use crate::transport::AddRequest;

/// Discriminates the DN construction rule of an [`EntryType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// The root entry at the base DN itself.
    Base,
    /// An organizational-unit container directly under the base.
    Parent,
    /// A standard-dialect group under `ou=groups`.
    Group,
    /// A standard-dialect person under `ou=people`.
    Person,
    /// An Active Directory group under `CN=Builtin`.
    AdGroup,
    /// An Active Directory user under `CN=Users`.
    AdUser,
}

/// Immutable schema descriptor for one entry kind in one dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryType {
    pub kind: EntryKind,
    /// Naming (primary key) attribute.
    pub primary_key: &'static str,
    /// Structural object class; empty means any.
    pub object_class: &'static str,
    /// Presence filter for this type, always `(objectclass=<class>)`.
    pub filter: &'static str,
    /// Attributes requested on searches for this type.
    pub attributes: &'static [&'static str],
}

/// The directory root (`dcObject` style).
pub const BASE: EntryType = EntryType {
    kind: EntryKind::Base,
    primary_key: "dc",
    object_class: "",
    filter: "(objectclass=*)",
    attributes: &["dc", "o", "instanceType"],
};

/// An organizational-unit container under the base.
pub const PARENT: EntryType = EntryType {
    kind: EntryKind::Parent,
    primary_key: "ou",
    object_class: "organizationalUnit",
    filter: "(objectclass=organizationalUnit)",
    attributes: &["ou"],
};

/// A standard-dialect group.
pub const GROUP: EntryType = EntryType {
    kind: EntryKind::Group,
    primary_key: "cn",
    object_class: "groupOfNames",
    filter: "(objectclass=groupOfNames)",
    attributes: &["cn", "member", "description"],
};

/// A standard-dialect person.
pub const PERSON: EntryType = EntryType {
    kind: EntryKind::Person,
    primary_key: "uid",
    object_class: "inetOrgPerson",
    filter: "(objectclass=inetOrgPerson)",
    attributes: &[
        "uid",
        "cn",
        "givenName",
        "sn",
        "displayName",
        "mail",
        "mobile",
        "telephoneNumber",
        "description",
        "createdTime",
        "modifiedTime",
        "createTimestamp",
        "modifyTimestamp",
        "jpegPhoto",
        "avatarPath",
        "dateOfBirth",
        "dateOfJoin",
        "gender",
        "employeeNumber",
        "employeeType",
        "title",
    ],
};

/// An Active Directory group.
pub const AD_GROUP: EntryType = EntryType {
    kind: EntryKind::AdGroup,
    primary_key: "cn",
    object_class: "group",
    filter: "(objectclass=group)",
    attributes: &["cn", "member", "name", "description", "instanceType"],
};

/// An Active Directory user.
pub const AD_USER: EntryType = EntryType {
    kind: EntryKind::AdUser,
    primary_key: "cn",
    object_class: "user",
    filter: "(objectclass=user)",
    attributes: &[
        "cn",
        "name",
        "sAMAccountName",
        "userPrincipalName",
        "uid",
        "givenName",
        "sn",
        "displayName",
        "mail",
        "mobile",
        "telephoneNumber",
        "description",
        "employeeNumber",
        "employeeType",
        "title",
        "jpegPhoto",
    ],
};

/// Object classes written when creating a person entry.
pub const PERSON_OBJECT_CLASSES: &[&str] =
    &["top", "person", "organizationalPerson", "inetOrgPerson"];

impl EntryType {
    /// Build the distinguished name of an entry of this type.
    #[must_use]
    pub fn dn(&self, name: &str, base: &str) -> String {
        match self.kind {
            EntryKind::Base => base.to_string(),
            EntryKind::Parent => make_dn(self.primary_key, name, base),
            EntryKind::Group => make_dn(self.primary_key, name, &PARENT.dn("groups", base)),
            EntryKind::Person => make_dn(self.primary_key, name, &PARENT.dn("people", base)),
            EntryKind::AdGroup => format!("CN={name},CN=Builtin,{base}"),
            EntryKind::AdUser => format!("CN={name},CN=Users,{base}"),
        }
    }

    /// Build a filter matching exactly one entry by primary key.
    ///
    /// The value is escaped per RFC 4515, so filter metacharacters in it
    /// can never alter the filter structure.
    #[must_use]
    pub fn one_filter(&self, value: &str) -> String {
        format!(
            "(&({}={}){})",
            self.primary_key,
            ldap_escape(value),
            self.filter
        )
    }

    /// Object-class values written when creating an entry of this type.
    #[must_use]
    pub fn object_classes(&self) -> Vec<String> {
        if self.primary_key == "dc" {
            vec!["domain".to_string(), "top".to_string()]
        } else {
            vec![self.object_class.to_string(), "top".to_string()]
        }
    }

    /// Populate the minimal attributes required to create an entry of
    /// this type: object classes, the primary key, and the `l` locality
    /// attribute mirroring the name on the root entry.
    pub fn prepare_add(&self, name: &str, ar: &mut AddRequest) {
        ar.attr("objectClass", self.object_classes());
        ar.attr(self.primary_key, vec![name.to_string()]);
        if self.primary_key == "dc" {
            ar.attr("l", vec![name.to_string()]);
        }
    }
}

/// Compose `pk=name,parent`.
fn make_dn(pk: &str, name: &str, parent: &str) -> String {
    format!("{pk}={name},{parent}")
}

/// First domain component of a base DN: `dc=example,dc=org` gives
/// `example`. Falls back to the whole base when no `dc=` leads it.
#[must_use]
pub fn split_dc(base: &str) -> &str {
    let first = base.split(',').next().unwrap_or(base);
    first.strip_prefix("dc=").unwrap_or(first)
}
