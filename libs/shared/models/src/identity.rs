use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::User;

/// Closed set of clinic roles. Policy code matches on this exhaustively, so
/// adding a role is a compile error everywhere a decision is made.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    #[serde(alias = "doctor")]
    Practitioner,
    Patient,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Practitioner => write!(f, "practitioner"),
            Role::Patient => write!(f, "patient"),
        }
    }
}

impl FromStr for Role {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "doctor" | "practitioner" => Ok(Role::Practitioner),
            "patient" => Ok(Role::Patient),
            other => Err(IdentityError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum IdentityError {
    #[error("Token subject is not a valid user id: {0}")]
    InvalidSubject(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Token carries no role")]
    MissingRole,
}

/// The authenticated caller as seen by the scheduling core.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: Uuid,
    pub role: Role,
}

impl CallerIdentity {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl TryFrom<&User> for CallerIdentity {
    type Error = IdentityError;

    fn try_from(user: &User) -> Result<Self, Self::Error> {
        let user_id = Uuid::parse_str(&user.id)
            .map_err(|_| IdentityError::InvalidSubject(user.id.clone()))?;
        let role = user
            .role
            .as_deref()
            .ok_or(IdentityError::MissingRole)?
            .parse()?;

        Ok(Self { user_id, role })
    }
}
