//! Mapping between raw directory entries and the person/group records.
//!
//! Reads are tolerant: attribute fallback chains cover the Active
//! Directory names, and malformed numbers or timestamps degrade to unset
//! fields reported through a warning list instead of failing the whole
//! record. Writes are minimal: updates are emitted as value-level
//! replace diffs against the entry's current attributes.

use chrono::{DateTime, NaiveDateTime, Utc};
use ldap3::SearchEntry;

use crate::entry::PERSON_OBJECT_CLASSES;
use crate::model::{Group, Person};
use crate::transport::{AddRequest, ModifyRequest};

/// Timestamp layout used by both the application-managed and the
/// operational time attributes, e.g. `20260804120000Z`.
pub const TIME_LAYOUT: &str = "%Y%m%d%H%M%SZ";

/// Date layout for birthday and join-date fields, e.g. `20260804`.
pub const DATE_LAYOUT: &str = "%Y%m%d";

/// Attribute always replaced on update with the record's modification
/// time.
pub const MODIFIED_TIME_ATTR: &str = "modifiedTime";

/// A non-fatal degradation while mapping an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapWarning {
    /// Attribute whose value could not be used as-is.
    pub attribute: &'static str,
    /// The offending raw value.
    pub value: String,
    /// Why it was dropped.
    pub reason: String,
}

impl std::fmt::Display for MapWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={:?}: {}", self.attribute, self.value, self.reason)
    }
}

pub(crate) fn attr_first<'a>(entry: &'a SearchEntry, name: &str) -> &'a str {
    entry
        .attrs
        .get(name)
        .and_then(|vals| vals.first())
        .map_or("", String::as_str)
}

fn parse_time(
    entry: &SearchEntry,
    attribute: &'static str,
    warnings: &mut Vec<MapWarning>,
) -> Option<DateTime<Utc>> {
    let raw = attr_first(entry, attribute);
    if raw.is_empty() {
        return None;
    }
    match NaiveDateTime::parse_from_str(raw, TIME_LAYOUT) {
        Ok(t) => Some(t.and_utc()),
        Err(e) => {
            warnings.push(MapWarning {
                attribute,
                value: raw.to_string(),
                reason: e.to_string(),
            });
            None
        }
    }
}

/// Map a directory entry to a [`Person`].
///
/// Returns the record together with any degraded-parse warnings; callers
/// decide whether to log or assert on them.
#[must_use]
pub fn entry_to_person(entry: &SearchEntry) -> (Person, Vec<MapWarning>) {
    let mut warnings = Vec::new();

    let mut person = Person {
        dn: entry.dn.clone(),
        uid: attr_first(entry, "uid").to_string(),
        surname: attr_first(entry, "sn").to_string(),
        given_name: attr_first(entry, "givenName").to_string(),
        common_name: attr_first(entry, "cn").to_string(),
        email: attr_first(entry, "mail").to_string(),
        nickname: attr_first(entry, "displayName").to_string(),
        mobile: attr_first(entry, "mobile").to_string(),
        telephone: attr_first(entry, "telephoneNumber").to_string(),
        employee_type: attr_first(entry, "employeeType").to_string(),
        birthday: attr_first(entry, "dateOfBirth").to_string(),
        gender: attr_first(entry, "gender").to_string(),
        avatar_path: attr_first(entry, "avatarPath").to_string(),
        description: attr_first(entry, "description").to_string(),
        join_date: attr_first(entry, "dateOfJoin").to_string(),
        ..Person::default()
    };

    // AD schemas carry the identity under their own attribute names.
    if person.uid.is_empty() {
        let account = attr_first(entry, "sAMAccountName");
        if !account.is_empty() {
            person.uid = account.to_string();
        }
    }
    if person.email.is_empty() {
        let principal = attr_first(entry, "userPrincipalName");
        if !principal.is_empty() {
            person.email = principal.to_string();
        }
    }

    let number = attr_first(entry, "employeeNumber");
    if !number.is_empty() {
        match number.parse::<u32>() {
            Ok(n) => person.employee_number = n,
            Err(e) => warnings.push(MapWarning {
                attribute: "employeeNumber",
                value: number.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    person.created = parse_time(entry, "createdTime", &mut warnings)
        .or_else(|| parse_time(entry, "createTimestamp", &mut warnings));
    person.modified = parse_time(entry, MODIFIED_TIME_ATTR, &mut warnings)
        .or_else(|| parse_time(entry, "modifyTimestamp", &mut warnings));

    if let Some(blob) = entry.bin_attrs.get("jpegPhoto").and_then(|v| v.first()) {
        person.jpeg_photo = blob.clone();
    }

    (person, warnings)
}

/// Map a directory entry to a [`Group`].
///
/// Member DNs are reduced to bare uids by taking the text between the
/// first `=` and the first `,`. This assumes single-valued RDNs without
/// escaped separators; exotic DNs are a known limitation.
#[must_use]
pub fn entry_to_group(entry: &SearchEntry) -> Group {
    let mut group = Group::default();
    let name = attr_first(entry, "cn");
    group.name = if name.is_empty() {
        attr_first(entry, "name").to_string()
    } else {
        name.to_string()
    };
    group.description = attr_first(entry, "description").to_string();
    if let Some(members) = entry.attrs.get("member") {
        group.members = members.iter().map(|dn| rdn_value(dn)).collect();
    }
    group
}

/// Gender is stored as its first letter (`m`, `f`, `u`).
fn gender_initial(person: &Person) -> Option<String> {
    person.gender.chars().next().map(|c| c.to_string())
}

fn rdn_value(dn: &str) -> String {
    let start = dn.find('=').map_or(0, |i| i + 1);
    let end = dn.find(',').unwrap_or(dn.len());
    if end <= start {
        return dn.to_string();
    }
    dn[start..end].to_string()
}

/// Build the add request creating `person` at `dn`.
///
/// Emits the mandatory object classes, uid and canonical common name,
/// then every non-empty optional field.
#[must_use]
pub fn make_add_request(dn: &str, person: &Person) -> AddRequest {
    let mut ar = AddRequest::new(dn);
    ar.attr(
        "objectClass",
        PERSON_OBJECT_CLASSES.iter().map(|s| (*s).to_string()).collect(),
    );
    ar.attr("uid", vec![person.uid.clone()]);
    ar.attr("cn", vec![person.canonical_common_name()]);

    let optional = [
        ("sn", &person.surname),
        ("givenName", &person.given_name),
        ("mail", &person.email),
        ("displayName", &person.nickname),
        ("mobile", &person.mobile),
        ("telephoneNumber", &person.telephone),
    ];
    for (name, value) in optional {
        if !value.is_empty() {
            ar.attr(name, vec![value.clone()]);
        }
    }

    if person.employee_number > 0 {
        ar.attr("employeeNumber", vec![person.employee_number.to_string()]);
    }
    if !person.employee_type.is_empty() {
        ar.attr("employeeType", vec![person.employee_type.clone()]);
    }
    if let Some(initial) = gender_initial(person) {
        ar.attr("gender", vec![initial]);
    }
    if !person.birthday.is_empty() {
        ar.attr("dateOfBirth", vec![person.birthday.clone()]);
    }
    if !person.description.is_empty() {
        ar.attr("description", vec![person.description.clone()]);
    }
    if !person.avatar_path.is_empty() {
        ar.attr("avatarPath", vec![person.avatar_path.clone()]);
    }
    if !person.join_date.is_empty() {
        ar.attr("dateOfJoin", vec![person.join_date.clone()]);
    }
    if let Some(created) = person.created {
        ar.attr("createdTime", vec![created.format(TIME_LAYOUT).to_string()]);
    }

    ar
}

/// Build the modify request turning `entry` into `person`.
///
/// One replace per field whose desired value differs from the entry's
/// current value; unchanged fields emit nothing. Employee number and
/// type are left to the save path, which forces them separately. The
/// modification timestamp is always replaced, with the record's
/// `modified` value when set, else the current time.
#[must_use]
pub fn make_modify_request(entry: &SearchEntry, person: &Person) -> ModifyRequest {
    let mut mr = ModifyRequest::new(&entry.dn);

    if person.surname != attr_first(entry, "sn") {
        mr.replace("sn", vec![person.surname.clone()]);
    }
    if person.given_name != attr_first(entry, "givenName") {
        mr.replace("givenName", vec![person.given_name.clone()]);
    }
    if person.common_name != attr_first(entry, "cn") {
        mr.replace("cn", vec![person.canonical_common_name()]);
    }

    let guarded = [
        ("displayName", &person.nickname),
        ("mail", &person.email),
        ("mobile", &person.mobile),
        ("telephoneNumber", &person.telephone),
        ("avatarPath", &person.avatar_path),
        ("dateOfBirth", &person.birthday),
        ("description", &person.description),
        ("dateOfJoin", &person.join_date),
    ];
    for (name, value) in guarded {
        if !value.is_empty() && value.as_str() != attr_first(entry, name) {
            mr.replace(name, vec![value.clone()]);
        }
    }

    if let Some(gender) = gender_initial(person) {
        if gender != attr_first(entry, "gender") {
            mr.replace("gender", vec![gender]);
        }
    }

    let modified = person.modified.unwrap_or_else(Utc::now);
    mr.replace(
        MODIFIED_TIME_ATTR,
        vec![modified.format(TIME_LAYOUT).to_string()],
    );

    mr
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(dn: &str, attrs: &[(&str, &[&str])]) -> SearchEntry {
        SearchEntry {
            dn: dn.to_string(),
            attrs: attrs
                .iter()
                .map(|(k, vals)| {
                    (
                        (*k).to_string(),
                        vals.iter().map(|v| (*v).to_string()).collect(),
                    )
                })
                .collect(),
            bin_attrs: HashMap::new(),
        }
    }

    const DOE_DN: &str = "uid=doe,ou=people,dc=example,dc=org";

    #[test]
    fn test_entry_to_person_basic() {
        let e = entry(
            DOE_DN,
            &[
                ("uid", &["doe"]),
                ("cn", &["John Doe"]),
                ("sn", &["Doe"]),
                ("givenName", &["John"]),
                ("mail", &["doe@example.org"]),
                ("mobile", &["13012341234"]),
                ("employeeNumber", &["42"]),
                ("employeeType", &["Engineer"]),
                ("createdTime", &["20250102030405Z"]),
            ],
        );
        let (p, warnings) = entry_to_person(&e);
        assert!(warnings.is_empty());
        assert_eq!(p.dn, DOE_DN);
        assert_eq!(p.uid, "doe");
        assert_eq!(p.common_name, "John Doe");
        assert_eq!(p.employee_number, 42);
        let created = p.created.expect("createdTime parsed");
        assert_eq!(created.format(TIME_LAYOUT).to_string(), "20250102030405Z");
    }

    #[test]
    fn test_entry_to_person_ad_fallbacks() {
        let e = entry(
            "CN=doe,CN=Users,dc=example,dc=org",
            &[
                ("cn", &["doe"]),
                ("sAMAccountName", &["doe"]),
                ("userPrincipalName", &["doe@example.org"]),
            ],
        );
        let (p, _) = entry_to_person(&e);
        assert_eq!(p.uid, "doe");
        assert_eq!(p.email, "doe@example.org");
    }

    #[test]
    fn test_entry_to_person_operational_timestamp_fallback() {
        let e = entry(
            DOE_DN,
            &[
                ("uid", &["doe"]),
                ("createTimestamp", &["20240601000000Z"]),
                ("modifyTimestamp", &["20240602000000Z"]),
            ],
        );
        let (p, warnings) = entry_to_person(&e);
        assert!(warnings.is_empty());
        assert!(p.created.is_some());
        assert!(p.modified.is_some());
    }

    #[test]
    fn test_entry_to_person_degraded_parses_warn() {
        let e = entry(
            DOE_DN,
            &[
                ("uid", &["doe"]),
                ("employeeNumber", &["not-a-number"]),
                ("modifiedTime", &["yesterday"]),
            ],
        );
        let (p, warnings) = entry_to_person(&e);
        assert_eq!(p.employee_number, 0);
        assert!(p.modified.is_none());
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.attribute == "employeeNumber"));
        assert!(warnings.iter().any(|w| w.attribute == MODIFIED_TIME_ATTR));
    }

    #[test]
    fn test_entry_to_person_photo() {
        let mut e = entry(DOE_DN, &[("uid", &["doe"])]);
        e.bin_attrs
            .insert("jpegPhoto".to_string(), vec![vec![0xff, 0xd8, 0xff]]);
        let (p, _) = entry_to_person(&e);
        assert_eq!(p.jpeg_photo, vec![0xff, 0xd8, 0xff]);
    }

    #[test]
    fn test_entry_to_group_member_dns() {
        let e = entry(
            "cn=team,ou=groups,dc=example,dc=org",
            &[
                ("cn", &["team"]),
                ("description", &["the team"]),
                (
                    "member",
                    &[
                        "uid=doe,ou=people,dc=example,dc=org",
                        "CN=roe,CN=Users,dc=example,dc=org",
                    ],
                ),
            ],
        );
        let g = entry_to_group(&e);
        assert_eq!(g.name, "team");
        assert_eq!(g.description, "the team");
        assert_eq!(g.members, vec!["doe", "roe"]);
    }

    #[test]
    fn test_entry_to_group_ad_name_attribute() {
        let e = entry(
            "CN=Administrators,CN=Builtin,dc=example,dc=org",
            &[("name", &["Administrators"])],
        );
        let g = entry_to_group(&e);
        assert_eq!(g.name, "Administrators");
    }

    fn full_person() -> Person {
        Person {
            uid: "doe".to_string(),
            common_name: "doe".to_string(),
            surname: "Doe".to_string(),
            given_name: "John".to_string(),
            nickname: "johnny".to_string(),
            email: "doe@example.org".to_string(),
            mobile: "13012341234".to_string(),
            telephone: "010-555".to_string(),
            employee_number: 7,
            employee_type: "Engineer".to_string(),
            birthday: "20120304".to_string(),
            gender: "male".to_string(),
            avatar_path: "avatar.png".to_string(),
            description: "it's me".to_string(),
            join_date: "20240601".to_string(),
            ..Person::default()
        }
    }

    #[test]
    fn test_make_add_request_covers_non_empty_fields() {
        let p = full_person();
        let ar = make_add_request(DOE_DN, &p);

        assert_eq!(
            ar.get("objectClass"),
            Some(
                &[
                    "top".to_string(),
                    "person".to_string(),
                    "organizationalPerson".to_string(),
                    "inetOrgPerson".to_string()
                ][..]
            )
        );
        assert_eq!(ar.get("uid"), Some(&["doe".to_string()][..]));
        assert_eq!(ar.get("cn"), Some(&["doe".to_string()][..]));
        assert_eq!(ar.get("sn"), Some(&["Doe".to_string()][..]));
        assert_eq!(ar.get("employeeNumber"), Some(&["7".to_string()][..]));
        // gender is stored as its first letter
        assert_eq!(ar.get("gender"), Some(&["m".to_string()][..]));
        assert_eq!(ar.get("dateOfJoin"), Some(&["20240601".to_string()][..]));
        // unset optional fields are absent
        assert_eq!(ar.get("createdTime"), None);
    }

    /// Mapping an entry to a person and back must reproduce every
    /// non-empty input field.
    #[test]
    fn test_round_trip_add_request() {
        let p = full_person();
        let ar = make_add_request(DOE_DN, &p);

        let e = SearchEntry {
            dn: DOE_DN.to_string(),
            attrs: ar
                .attrs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            bin_attrs: HashMap::new(),
        };
        let (mapped, warnings) = entry_to_person(&e);
        assert!(warnings.is_empty());

        assert_eq!(mapped.uid, p.uid);
        assert_eq!(mapped.common_name, p.common_name);
        assert_eq!(mapped.surname, p.surname);
        assert_eq!(mapped.given_name, p.given_name);
        assert_eq!(mapped.nickname, p.nickname);
        assert_eq!(mapped.email, p.email);
        assert_eq!(mapped.mobile, p.mobile);
        assert_eq!(mapped.telephone, p.telephone);
        assert_eq!(mapped.employee_number, p.employee_number);
        assert_eq!(mapped.employee_type, p.employee_type);
        assert_eq!(mapped.birthday, p.birthday);
        assert_eq!(mapped.gender, "m");
        assert_eq!(mapped.avatar_path, p.avatar_path);
        assert_eq!(mapped.description, p.description);
        assert_eq!(mapped.join_date, p.join_date);
    }

    /// Unchanged fields must produce no replace entries.
    #[test]
    fn test_modify_diff_minimality() {
        let p = full_person();
        let ar = make_add_request(DOE_DN, &p);
        let e = SearchEntry {
            dn: DOE_DN.to_string(),
            attrs: ar.attrs.into_iter().collect(),
            bin_attrs: HashMap::new(),
        };

        let mr = make_modify_request(&e, &p);
        assert!(
            !mr.replaces_other_than(&[MODIFIED_TIME_ATTR]),
            "unexpected replaces: {:?}",
            mr.replaces
        );
        assert!(mr.get(MODIFIED_TIME_ATTR).is_some());
    }

    #[test]
    fn test_modify_diff_changed_fields_only() {
        let p = full_person();
        let ar = make_add_request(DOE_DN, &p);
        let e = SearchEntry {
            dn: DOE_DN.to_string(),
            attrs: ar.attrs.into_iter().collect(),
            bin_attrs: HashMap::new(),
        };

        let mut changed = p.clone();
        changed.email = "new@example.org".to_string();
        changed.surname = "Roe".to_string();

        let mr = make_modify_request(&e, &changed);
        assert_eq!(mr.get("mail"), Some(&["new@example.org".to_string()][..]));
        assert_eq!(mr.get("sn"), Some(&["Roe".to_string()][..]));
        assert!(!mr.replaces_other_than(&["mail", "sn", MODIFIED_TIME_ATTR]));
    }

    #[test]
    fn test_modify_uses_explicit_modified_time() {
        let e = entry(DOE_DN, &[("uid", &["doe"]), ("cn", &["doe"])]);
        let mut p = Person::new("doe");
        p.common_name = "doe".to_string();
        p.modified = Some(
            NaiveDateTime::parse_from_str("20260102030405Z", TIME_LAYOUT)
                .unwrap()
                .and_utc(),
        );
        let mr = make_modify_request(&e, &p);
        assert_eq!(
            mr.get(MODIFIED_TIME_ATTR),
            Some(&["20260102030405Z".to_string()][..])
        );
    }

    #[test]
    fn test_rdn_value_edge_cases() {
        assert_eq!(rdn_value("uid=doe,ou=people,dc=example,dc=org"), "doe");
        assert_eq!(rdn_value("uid=doe"), "doe");
        assert_eq!(rdn_value("garbage"), "garbage");
    }
}
