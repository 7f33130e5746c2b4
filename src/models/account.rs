use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Privilege bitmask of an account
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Privileges(pub u32);

impl Privileges {
    pub const ACCESS: Privileges = Privileges(1);
    pub const ADMIN: Privileges = Privileges(3);

    /// Every requested bit must be granted
    pub fn grants(&self, requested: Privileges) -> bool {
        self.0 & requested.0 == requested.0
    }
}

impl std::str::FromStr for Privileges {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Privileges)
    }
}

/// Account stored in the account unit; the password is kept hashed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub privileges: Privileges,
}

impl Account {
    pub fn new(name: impl Into<String>, password: &str, privileges: Privileges) -> Self {
        Self {
            name: name.into(),
            password_hash: hash_password(password),
            privileges,
        }
    }

    pub fn verify(&self, password: &str, requested: Privileges) -> bool {
        self.password_hash == hash_password(password) && self.privileges.grants(requested)
    }
}

/// Lowercase hex SHA-256 digest
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_grants_access() {
        assert!(Privileges::ADMIN.grants(Privileges::ACCESS));
        assert!(!Privileges::ACCESS.grants(Privileges::ADMIN));
        assert!(Privileges(0).grants(Privileges(0)));
    }

    #[test]
    fn test_verify_hashes_password() {
        let account = Account::new("admin", "admin", Privileges::ADMIN);
        assert_ne!(account.password_hash, "admin");
        assert_eq!(account.password_hash.len(), 64);
        assert!(account.verify("admin", Privileges::ADMIN));
        assert!(!account.verify("Admin", Privileges::ACCESS));
    }
}
