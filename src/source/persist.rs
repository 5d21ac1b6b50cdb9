//! Person writes against one backend: save, self-modify, delete, rename.

use tracing::{debug, instrument, warn};

use crate::error::{DirectoryError, DirectoryResult};
use crate::mapper::{attr_first, make_add_request, make_modify_request};
use crate::model::Person;
use crate::transport::{DirectoryHandle, ModifyDnRequest};

use super::{find_one, Source};

impl Source {
    /// Create or update a person. Returns whether a new entry was
    /// created.
    ///
    /// An existing entry gets the minimal modify diff; employee number
    /// and type are forced in here when they differ, since the generic
    /// diff leaves the numeric fields to this path.
    #[instrument(skip(self, person), fields(addr = %self.addr, uid = %person.uid))]
    pub async fn save_person(&self, person: &Person) -> DirectoryResult<bool> {
        let mut handle = self.admin_handle().await?;
        let result = self.save_inner(handle.as_mut(), person).await;
        self.release(handle).await;
        result
    }

    async fn save_inner(
        &self,
        handle: &mut dyn DirectoryHandle,
        person: &Person,
    ) -> DirectoryResult<bool> {
        let et = self.person_type();
        match find_one(handle, &self.base, &et.one_filter(&person.uid), et.attributes).await {
            Ok(entry) => {
                let mut mr = make_modify_request(&entry, person);
                let number = person.employee_number.to_string();
                if person.employee_number > 0 && number != attr_first(&entry, "employeeNumber") {
                    mr.replace("employeeNumber", vec![number]);
                }
                if person.employee_type != attr_first(&entry, "employeeType") {
                    mr.replace("employeeType", vec![person.employee_type.clone()]);
                }
                if let Err(e) = handle.modify(&mr).await {
                    warn!(dn = %mr.dn, error = %e, "modify person failed");
                    return Err(e);
                }
                Ok(false)
            }
            Err(e) if e.is_not_found() => {
                let dn = self.user_dn(&person.uid);
                let ar = make_add_request(&dn, person);
                if let Err(e) = handle.add(&ar).await {
                    warn!(dn = %dn, is_ad = self.is_ad(), error = %e, "add person failed");
                    return Err(e);
                }
                debug!(dn = %dn, "person created");
                Ok(true)
            }
            Err(e) => {
                warn!(uid = %person.uid, error = %e, "save person lookup failed");
                Err(e)
            }
        }
    }

    /// Update a person's own entry, bound with their credentials rather
    /// than the administrative context.
    #[instrument(skip(self, password, person), fields(addr = %self.addr))]
    pub async fn modify_by_self(
        &self,
        uid: &str,
        password: &str,
        person: &Person,
    ) -> DirectoryResult<()> {
        let et = self.person_type();
        let dn = self.user_dn(uid);
        let mut handle = self.bound_handle(&dn, password).await?;

        let result = async {
            let entry = find_one(handle.as_mut(), &dn, et.filter, et.attributes).await?;
            let mr = make_modify_request(&entry, person);
            handle.modify(&mr).await
        }
        .await;

        self.release(handle).await;
        if let Err(ref e) = result {
            warn!(dn = %dn, error = %e, "self modify failed");
        }
        result
    }

    /// Delete a person by uid.
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn delete_person(&self, uid: &str) -> DirectoryResult<()> {
        self.delete_dn(&self.user_dn(uid)).await
    }

    /// Delete an entry by explicit DN.
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn delete_dn(&self, dn: &str) -> DirectoryResult<()> {
        let mut handle = self.admin_handle().await?;
        let result = handle.delete(dn).await;
        self.release(handle).await;
        match result {
            Ok(()) => {
                debug!(dn = %dn, "entry deleted");
                Ok(())
            }
            Err(e) => {
                warn!(dn = %dn, error = %e, "delete failed");
                Err(e)
            }
        }
    }

    /// Change a person's uid by renaming the entry in place.
    ///
    /// The old uid is resolved to its current entry first, so renames
    /// work even when the entry's DN no longer matches the old uid. The
    /// server remains the authority on the new RDN's validity.
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn rename(&self, old_uid: &str, new_uid: &str) -> DirectoryResult<()> {
        if old_uid.is_empty() || new_uid.is_empty() {
            return Err(DirectoryError::EmptyUid);
        }
        let et = self.person_type();
        let mut handle = self.admin_handle().await?;

        let result = async {
            let entry =
                find_one(handle.as_mut(), &self.base, &et.one_filter(old_uid), et.attributes)
                    .await?;
            let req = ModifyDnRequest {
                dn: entry.dn,
                new_rdn: format!("{}={}", et.primary_key, new_uid),
                delete_old_rdn: true,
            };
            handle.modify_dn(&req).await
        }
        .await;

        self.release(handle).await;
        if let Err(ref e) = result {
            warn!(old = %old_uid, new = %new_uid, error = %e, "rename failed");
        }
        result
    }
}
