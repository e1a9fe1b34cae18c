//! Approver roles and acting principals
//!
//! Roles form a closed set so that a level's role requirement can be
//! checked structurally. Free-form role strings are parsed once, at the
//! boundary, and rejected with [`VerificationError::UnknownRole`].

use crate::VerificationError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A role that can be assigned to an approval level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Admin,
    Principal,
    VicePrincipal,
    BranchManager,
    ComplianceOfficer,
    HrManager,
    Registrar,
    Accountant,
    ClassTeacher,
}

impl Role {
    pub const ALL: [Role; 9] = [
        Role::Admin,
        Role::Principal,
        Role::VicePrincipal,
        Role::BranchManager,
        Role::ComplianceOfficer,
        Role::HrManager,
        Role::Registrar,
        Role::Accountant,
        Role::ClassTeacher,
    ];

    /// The display name used on the wire and in the admin UI
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Principal => "Principal",
            Role::VicePrincipal => "Vice Principal",
            Role::BranchManager => "Branch Manager",
            Role::ComplianceOfficer => "Compliance Officer",
            Role::HrManager => "HR Manager",
            Role::Registrar => "Registrar",
            Role::Accountant => "Accountant",
            Role::ClassTeacher => "Class Teacher",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Role {
    type Err = VerificationError;

    /// Accepts display names (`"Compliance Officer"`) and snake_case
    /// (`"compliance_officer"`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| if c == '_' || c == '-' { ' ' } else { c })
            .collect::<String>()
            .to_lowercase();

        Role::ALL
            .iter()
            .copied()
            .find(|role| role.display_name().to_lowercase() == normalized)
            .ok_or_else(|| VerificationError::UnknownRole(s.to_string()))
    }
}

impl Serialize for Role {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.display_name())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A principal acting on a policy or request
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    /// Stable user identifier
    pub id: String,
    /// The role the user is acting in
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    /// Whether this actor holds the given role
    pub fn holds(&self, role: Role) -> bool {
        self.role == role
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.id, self.role)
    }
}
