//! Password operations against one backend.

use tracing::{info, instrument, warn};

use crate::error::DirectoryResult;
use crate::transport::PasswordModifyRequest;

use super::Source;

impl Source {
    /// Self-service password change.
    ///
    /// The password-modify extended operation carries the old and new
    /// values; the old password is the proof of identity, so no prior
    /// bind is required on the handle.
    #[instrument(skip(self, old_password, new_password), fields(addr = %self.addr))]
    pub async fn password_change(
        &self,
        uid: &str,
        old_password: &str,
        new_password: &str,
    ) -> DirectoryResult<()> {
        let req = PasswordModifyRequest {
            user_dn: self.user_dn(uid),
            old_password: old_password.to_string(),
            new_password: new_password.to_string(),
        };

        let mut handle = self.provider.acquire().await?;
        let result = handle.password_modify(&req).await;
        self.release(handle).await;

        match result {
            Ok(()) => {
                info!(uid = %uid, "password changed");
                Ok(())
            }
            Err(e) => {
                warn!(uid = %uid, error = %e, "password change failed");
                Err(e)
            }
        }
    }

    /// Administrative password reset, with no old-password proof.
    #[instrument(skip(self, new_password), fields(addr = %self.addr))]
    pub async fn password_reset(&self, uid: &str, new_password: &str) -> DirectoryResult<()> {
        let req = PasswordModifyRequest {
            user_dn: self.user_dn(uid),
            old_password: String::new(),
            new_password: new_password.to_string(),
        };

        let mut handle = self.admin_handle().await?;
        let result = handle.password_modify(&req).await;
        self.release(handle).await;

        match result {
            Ok(()) => {
                info!(uid = %uid, "password reset");
                Ok(())
            }
            Err(e) => {
                warn!(uid = %uid, error = %e, "password reset failed");
                Err(e)
            }
        }
    }
}
