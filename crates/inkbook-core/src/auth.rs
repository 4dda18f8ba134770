//! Role checks at the vault's operation boundary
//!
//! | Action              | Admin | Staff | Artist |
//! |---------------------|-------|-------|--------|
//! | read health         | yes   | yes   | yes    |
//! | create/list/verify  | yes   | yes   | no     |
//! | everything else     | yes   | no    | no     |
//!
//! Inactive accounts are denied everything.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Staff,
    Artist,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "staff" => Ok(Role::Staff),
            "artist" => Ok(Role::Artist),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
            Role::Artist => "artist",
        })
    }
}

/// Who is asking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    pub role: Role,
    pub active: bool,
}

impl Principal {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
            active: true,
        }
    }

    /// Local operator and scheduled jobs
    pub fn system() -> Self {
        Self::new("system", Role::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    InitializeDatabase,
    CreateSnapshot,
    ListSnapshots,
    VerifySnapshot,
    ApplyRetention,
    ExportArchive,
    Restore,
    ReadHealth,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::InitializeDatabase => "initialize the database",
            Action::CreateSnapshot => "create snapshots",
            Action::ListSnapshots => "list snapshots",
            Action::VerifySnapshot => "verify snapshots",
            Action::ApplyRetention => "apply retention",
            Action::ExportArchive => "export archives",
            Action::Restore => "restore the database",
            Action::ReadHealth => "read health",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Decide whether `principal` may perform `action`
pub fn authorize(principal: &Principal, action: Action) -> Decision {
    if !principal.active {
        return Decision::Deny("account is inactive".to_string());
    }

    let allowed = match principal.role {
        Role::Admin => true,
        Role::Staff => matches!(
            action,
            Action::CreateSnapshot
                | Action::ListSnapshots
                | Action::VerifySnapshot
                | Action::ReadHealth
        ),
        Role::Artist => action == Action::ReadHealth,
    };

    if allowed {
        Decision::Allow
    } else {
        Decision::Deny(format!("role '{}' is not permitted", principal.role))
    }
}

/// `authorize`, with denial as `Unauthorized`
pub fn require(principal: &Principal, action: Action) -> VaultResult<()> {
    match authorize(principal, action) {
        Decision::Allow => Ok(()),
        Decision::Deny(reason) => {
            tracing::warn!("Denied '{}' permission to {}: {}", principal.name, action, reason);
            Err(VaultError::Unauthorized {
                principal: principal.name.clone(),
                action: action.to_string(),
                reason,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Action; 8] = [
        Action::InitializeDatabase,
        Action::CreateSnapshot,
        Action::ListSnapshots,
        Action::VerifySnapshot,
        Action::ApplyRetention,
        Action::ExportArchive,
        Action::Restore,
        Action::ReadHealth,
    ];

    #[test]
    fn test_admin_may_do_everything() {
        let admin = Principal::new("root", Role::Admin);
        for action in ALL {
            assert!(authorize(&admin, action).is_allowed(), "{:?}", action);
        }
    }

    #[test]
    fn test_staff_matrix() {
        let staff = Principal::new("desk", Role::Staff);
        let allowed: Vec<Action> = ALL
            .into_iter()
            .filter(|a| authorize(&staff, *a).is_allowed())
            .collect();
        assert_eq!(
            allowed,
            vec![
                Action::CreateSnapshot,
                Action::ListSnapshots,
                Action::VerifySnapshot,
                Action::ReadHealth
            ]
        );
    }

    #[test]
    fn test_artist_reads_health_only() {
        let artist = Principal::new("ink", Role::Artist);
        let allowed: Vec<Action> = ALL
            .into_iter()
            .filter(|a| authorize(&artist, *a).is_allowed())
            .collect();
        assert_eq!(allowed, vec![Action::ReadHealth]);
    }

    #[test]
    fn test_inactive_is_denied() {
        let mut admin = Principal::new("former", Role::Admin);
        admin.active = false;

        assert_eq!(
            authorize(&admin, Action::ReadHealth),
            Decision::Deny("account is inactive".to_string())
        );
    }

    #[test]
    fn test_require_maps_to_unauthorized() {
        let staff = Principal::new("desk", Role::Staff);
        let err = require(&staff, Action::Restore).unwrap_err();

        assert!(matches!(err, VaultError::Unauthorized { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Unauthorized);
        assert!(err.to_string().contains("restore the database"));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("staff".parse::<Role>().unwrap(), Role::Staff);
        assert!("owner".parse::<Role>().is_err());
    }
}
