//! Host identity lookup.
//!
//! The sandbox user is recreated with the same numeric ids the build user has
//! on the host, so files written to bind-mounted directories keep their
//! ownership.

use nix::unistd::{Gid, Group, User};
use tracing::debug;

use crate::error::IdentityError;

/// Numeric and symbolic identity of the build user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: String,
    pub uid: u32,
    pub gid: u32,
    pub group: String,
}

impl Identity {
    /// `user:group`, as accepted by `chown`.
    #[must_use]
    pub fn user_group(&self) -> String {
        format!("{}:{}", self.user, self.group)
    }
}

/// Lookup capability for the host's user and group database.
pub trait IdentityResolver {
    /// Returns `(uid, gid)` of `name`.
    fn lookup_user(&self, name: &str) -> Result<(u32, u32), IdentityError>;

    /// Returns the name of group `gid`.
    fn lookup_group(&self, gid: u32) -> Result<String, IdentityError>;

    /// Resolves the full identity of `name`.
    fn resolve(&self, name: &str) -> Result<Identity, IdentityError> {
        let (uid, gid) = self.lookup_user(name)?;
        let group = self.lookup_group(gid)?;
        debug!(user = name, uid, group = %group, gid, "Detected identity");
        Ok(Identity {
            user: name.to_string(),
            uid,
            gid,
            group,
        })
    }
}

/// Resolver backed by the host's passwd and group databases.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostIdentityResolver;

impl IdentityResolver for HostIdentityResolver {
    fn lookup_user(&self, name: &str) -> Result<(u32, u32), IdentityError> {
        let user = User::from_name(name)
            .map_err(|source| IdentityError::Lookup {
                context: format!("passwd entry for '{name}'"),
                source,
            })?
            .ok_or_else(|| IdentityError::UnknownUser(name.to_string()))?;
        Ok((user.uid.as_raw(), user.gid.as_raw()))
    }

    fn lookup_group(&self, gid: u32) -> Result<String, IdentityError> {
        let group = Group::from_gid(Gid::from_raw(gid))
            .map_err(|source| IdentityError::Lookup {
                context: format!("group entry for {gid}"),
                source,
            })?
            .ok_or(IdentityError::UnknownGroup(gid))?;
        Ok(group.name)
    }
}
