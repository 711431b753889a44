//! Users and per-database privileges.

use gale_id::SerdeVecMap;
use serde::{Deserialize, Serialize};

use crate::catalog::MetaData;
use crate::error::MetaError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Privilege {
    #[default]
    NoPrivileges = 0,
    Read = 1,
    Write = 2,
    All = 3,
}

impl std::fmt::Display for Privilege {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Privilege::NoPrivileges => "NO PRIVILEGES",
            Privilege::Read => "READ",
            Privilege::Write => "WRITE",
            Privilege::All => "ALL PRIVILEGES",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    pub hash: String,
    pub admin: bool,
    pub rwuser: bool,
    pub privileges: SerdeVecMap<String, Privilege>,
}

impl MetaData {
    pub fn user(&self, name: &str) -> Option<&UserInfo> {
        self.users.iter().find(|u| u.name == name)
    }

    /// Creates a user. At most one admin user may exist.
    pub fn create_user(&mut self, name: &str, hash: &str, admin: bool, rwuser: bool) -> Result<()> {
        if name.is_empty() {
            return Err(MetaError::UsernameRequired);
        }
        if self.user(name).is_some() {
            return Err(MetaError::UserExists);
        }
        if admin && self.has_admin_user() {
            return Err(MetaError::UserForbidden);
        }

        self.users.push(UserInfo {
            name: name.to_string(),
            hash: hash.to_string(),
            admin,
            rwuser,
            privileges: SerdeVecMap::new(),
        });
        if admin {
            self.admin_user_exists = true;
        }
        Ok(())
    }

    pub fn drop_user(&mut self, name: &str) -> Result<()> {
        if self.user(name).is_some_and(|u| u.admin) {
            return Err(MetaError::UserDropSelf);
        }
        let before = self.users.len();
        self.users.retain(|u| u.name != name);
        if self.users.len() == before {
            return Err(MetaError::UserNotFound);
        }
        Ok(())
    }

    /// Updates a user's password hash; re-using the current hash is refused.
    pub fn update_user(&mut self, name: &str, hash: &str) -> Result<()> {
        let user = self
            .users
            .iter_mut()
            .find(|u| u.name == name)
            .ok_or(MetaError::UserNotFound)?;
        if user.hash == hash {
            return Err(MetaError::PwdUsed);
        }
        user.hash = hash.to_string();
        Ok(())
    }

    pub fn set_privilege(&mut self, name: &str, database: &str, privilege: Privilege) -> Result<()> {
        if self.user(name).is_none() {
            return Err(MetaError::UserNotFound);
        }
        self.get_database(database)?;
        let user = self
            .users
            .iter_mut()
            .find(|u| u.name == name)
            .expect("user present");
        user.privileges.insert(database.to_string(), privilege);
        Ok(())
    }

    /// Admin privilege is fixed at user creation; runtime grant and revoke
    /// are rejected.
    pub fn set_admin_privilege(&mut self, name: &str, _admin: bool) -> Result<()> {
        if self.user(name).is_none() {
            return Err(MetaError::UserNotFound);
        }
        Err(MetaError::GrantOrRevokeAdmin)
    }

    /// Exhaustively checks for an admin user; `admin_user_exists` caches the
    /// answer.
    pub fn has_admin_user(&self) -> bool {
        self.users.iter().any(|u| u.admin)
    }

    pub fn user_privileges(&self, name: &str) -> Result<&SerdeVecMap<String, Privilege>> {
        self.user(name)
            .map(|u| &u.privileges)
            .ok_or(MetaError::UserNotFound)
    }

    pub fn user_privilege(&self, name: &str, database: &str) -> Result<Privilege> {
        let user = self.user(name).ok_or(MetaError::UserNotFound)?;
        Ok(user
            .privileges
            .get(database)
            .copied()
            .unwrap_or(Privilege::NoPrivileges))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::meta_with_config;
    use crate::catalog::HaPolicy;

    #[test]
    fn only_one_admin_user() {
        let mut data = meta_with_config(HaPolicy::WriteAvailableFirst, 1);
        assert!(!data.has_admin_user());
        data.create_user("root", "h1", true, false).unwrap();
        assert!(data.admin_user_exists);
        assert!(data.has_admin_user());

        assert!(matches!(
            data.create_user("other-admin", "h2", true, false),
            Err(MetaError::UserForbidden)
        ));
        assert!(matches!(
            data.create_user("root", "h3", false, false),
            Err(MetaError::UserExists)
        ));
        assert!(matches!(
            data.create_user("", "h", false, false),
            Err(MetaError::UsernameRequired)
        ));
    }

    #[test]
    fn admin_cannot_drop_itself() {
        let mut data = meta_with_config(HaPolicy::WriteAvailableFirst, 1);
        data.create_user("root", "h1", true, false).unwrap();
        data.create_user("bob", "h2", false, true).unwrap();
        assert!(matches!(data.drop_user("root"), Err(MetaError::UserDropSelf)));
        data.drop_user("bob").unwrap();
        assert!(matches!(data.drop_user("bob"), Err(MetaError::UserNotFound)));
    }

    #[test]
    fn password_reuse_is_rejected() {
        let mut data = meta_with_config(HaPolicy::WriteAvailableFirst, 1);
        data.create_user("bob", "h1", false, false).unwrap();
        assert!(matches!(data.update_user("bob", "h1"), Err(MetaError::PwdUsed)));
        data.update_user("bob", "h2").unwrap();
        assert_eq!(data.user("bob").unwrap().hash, "h2");
    }

    #[test]
    fn admin_grant_revoke_is_rejected() {
        let mut data = meta_with_config(HaPolicy::WriteAvailableFirst, 1);
        data.create_user("bob", "h1", false, false).unwrap();
        assert!(matches!(
            data.set_admin_privilege("bob", true),
            Err(MetaError::GrantOrRevokeAdmin)
        ));
        assert!(matches!(
            data.set_admin_privilege("nobody", true),
            Err(MetaError::UserNotFound)
        ));
    }
}
