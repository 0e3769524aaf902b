//! Authentication Models
//! Mission: Define the role claims carried by bearer tokens

use serde::{Deserialize, Serialize};

/// Caller roles for RBAC
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    #[serde(rename = "investor")]
    Investor, // Own payouts only
    #[serde(rename = "asset_manager")]
    AssetManager, // Assigned distributions, first sign-off
    #[serde(rename = "compliance")]
    Compliance, // Second sign-off, read-all
    #[serde(rename = "admin")]
    Admin, // Final sign-off, payments, cancellation
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Investor => "investor",
            Role::AssetManager => "asset_manager",
            Role::Compliance => "compliance",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "investor" => Some(Role::Investor),
            "asset_manager" | "asset-manager" => Some(Role::AssetManager),
            "compliance" => Some(Role::Compliance),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Roles allowed to read every distribution.
    pub fn sees_all(&self) -> bool {
        matches!(self, Role::Compliance | Role::Admin)
    }
}

/// JWT Claims payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // subject (user id issued by the identity service)
    pub role: Role,
    pub exp: usize, // expiration timestamp
}

/// Authenticated caller as seen by the distribution service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

impl From<&Claims> for Principal {
    fn from(claims: &Claims) -> Self {
        Self {
            id: claims.sub.clone(),
            role: claims.role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        let role = Role::AssetManager;
        let json = serde_json::to_string(&role).unwrap();
        assert_eq!(json, r#""asset_manager""#);

        let compliance: Role = serde_json::from_str(r#""compliance""#).unwrap();
        assert_eq!(compliance, Role::Compliance);
    }

    #[test]
    fn test_role_string_conversion() {
        assert_eq!(Role::Admin.as_str(), "admin");
        assert_eq!(Role::from_str("ASSET-MANAGER"), Some(Role::AssetManager));
        assert_eq!(Role::from_str("trader"), None);
    }

    #[test]
    fn test_sees_all_roles() {
        assert!(Role::Compliance.sees_all());
        assert!(Role::Admin.sees_all());
        assert!(!Role::AssetManager.sees_all());
        assert!(!Role::Investor.sees_all());
    }

    #[test]
    fn test_principal_from_claims() {
        let claims = Claims {
            sub: "inv-42".to_string(),
            role: Role::Investor,
            exp: 1234567890,
        };
        let principal = Principal::from(&claims);
        assert_eq!(principal, Principal::new("inv-42", Role::Investor));
    }
}
