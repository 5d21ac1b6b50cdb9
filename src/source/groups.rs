//! Group operations against one backend.
//!
//! Group writes target the standard dialect only; Active Directory group
//! management is out of scope and reported as unsupported.

use ldap3::SearchEntry;
use tracing::{debug, instrument, warn};

use crate::entry::{EntryType, AD_GROUP, GROUP};
use crate::error::{DirectoryError, DirectoryResult};
use crate::mapper::entry_to_group;
use crate::model::Group;
use crate::transport::{AddRequest, ModifyRequest, SearchRequest};

use super::{find_one, Source};

/// Name of the administrators group in the standard dialect.
pub const ADMIN_GROUP_NAME: &str = "admins";

/// Builtin group Active Directory maps the administrators group to.
pub const AD_ADMIN_GROUP_NAME: &str = "Administrators";

/// Page size for group searches.
const GROUP_PAGE_SIZE: u32 = 20;

impl Source {
    fn group_type(&self) -> &'static EntryType {
        if self.is_ad() {
            &AD_GROUP
        } else {
            &GROUP
        }
    }

    /// Fetch a group's raw entry by common name.
    pub(crate) async fn get_group_entry(&self, cn: &str) -> DirectoryResult<SearchEntry> {
        if cn.is_empty() {
            return Err(DirectoryError::EmptyCn);
        }
        let et = self.group_type();
        let cn = if self.is_ad() && cn == ADMIN_GROUP_NAME {
            AD_ADMIN_GROUP_NAME
        } else {
            cn
        };
        self.get_entry(&et.dn(cn, &self.base), et.filter, et.attributes)
            .await
    }

    /// Fetch a group by name.
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn get_group(&self, name: &str) -> DirectoryResult<Group> {
        let entry = self.get_group_entry(name).await?;
        Ok(entry_to_group(&entry))
    }

    /// Search groups; an empty name lists every group under the base.
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn search_group(&self, name: &str) -> DirectoryResult<Vec<Group>> {
        let et = self.group_type();
        let dn = if name.is_empty() {
            self.base.clone()
        } else {
            et.dn(name, &self.base)
        };
        let req = SearchRequest::new(dn, et.filter, et.attributes).paged(GROUP_PAGE_SIZE);

        let mut handle = self.admin_handle().await?;
        let result = handle.search(&req).await;
        self.release(handle).await;

        match result {
            Ok(entries) => Ok(entries.iter().map(entry_to_group).collect()),
            Err(e) => {
                warn!(name = %name, error = %e, "group search failed");
                Err(e)
            }
        }
    }

    /// Create or update a group, replacing its member list.
    ///
    /// Member uids are expanded to this source's canonical person DNs.
    #[instrument(skip(self, group), fields(addr = %self.addr, name = %group.name))]
    pub async fn save_group(&self, group: &Group) -> DirectoryResult<()> {
        if self.is_ad() {
            return Err(DirectoryError::Unsupported);
        }
        if group.name.is_empty() {
            return Err(DirectoryError::EmptyCn);
        }

        let dn = GROUP.dn(&group.name, &self.base);
        let members: Vec<String> = group.members.iter().map(|m| self.user_dn(m)).collect();

        let mut handle = self.admin_handle().await?;
        let result = async {
            match find_one(handle.as_mut(), &dn, GROUP.filter, GROUP.attributes).await {
                Ok(_) => {
                    let mut mr = ModifyRequest::new(&dn);
                    mr.replace("member", members);
                    debug!(dn = %dn, "updating group members");
                    handle.modify(&mr).await
                }
                Err(e) if e.is_not_found() => {
                    let mut ar = AddRequest::new(&dn);
                    GROUP.prepare_add(&group.name, &mut ar);
                    ar.attr("member", members);
                    if !group.description.is_empty() {
                        ar.attr("description", vec![group.description.clone()]);
                    }
                    debug!(dn = %dn, "creating group");
                    handle.add(&ar).await
                }
                Err(e) => Err(e),
            }
        }
        .await;
        self.release(handle).await;

        if let Err(ref e) = result {
            warn!(name = %group.name, error = %e, "save group failed");
        }
        result
    }

    /// Delete a group by name.
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn erase_group(&self, name: &str) -> DirectoryResult<()> {
        if self.is_ad() {
            return Err(DirectoryError::Unsupported);
        }
        if name.is_empty() {
            return Err(DirectoryError::EmptyCn);
        }
        self.delete_dn(&GROUP.dn(name, &self.base)).await
    }
}
