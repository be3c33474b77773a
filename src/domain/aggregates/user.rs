//! User Aggregate and the principal derived from it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::value_objects::{TenantId, UserId};
use crate::PosError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role { Superadmin, Owner, Staff, Customer }

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Superadmin => "superadmin",
            Self::Owner => "owner",
            Self::Staff => "staff",
            Self::Customer => "customer",
        }
    }

    /// Owners and staff run a business of their own.
    pub fn is_business(&self) -> bool { matches!(self, Self::Owner | Self::Staff) }
}

impl FromStr for Role {
    type Err = PosError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "superadmin" => Ok(Self::Superadmin),
            "owner" => Ok(Self::Owner),
            "staff" => Ok(Self::Staff),
            "customer" => Ok(Self::Customer),
            other => Err(PosError::Validation(format!("unknown role '{other}'"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Clone, Debug, Serialize)]
pub struct User {
    id: UserId,
    username: String,
    #[serde(skip_serializing)]
    password_hash: String,
    role: Role,
    owning_business_id: Option<TenantId>,
    created_at: DateTime<Utc>,
}

impl User {
    /// Rebuilds a user, enforcing that exactly the customers carry an owning business.
    pub fn restore(
        id: UserId,
        username: impl Into<String>,
        password_hash: impl Into<String>,
        role: Role,
        owning_business_id: Option<TenantId>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, PosError> {
        check_ownership(role, owning_business_id)?;
        Ok(Self { id, username: username.into(), password_hash: password_hash.into(), role, owning_business_id, created_at })
    }

    pub fn id(&self) -> UserId { self.id }
    pub fn username(&self) -> &str { &self.username }
    pub fn password_hash(&self) -> &str { &self.password_hash }
    pub fn role(&self) -> Role { self.role }
    pub fn owning_business_id(&self) -> Option<TenantId> { self.owning_business_id }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }

    pub fn verify_password(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.password_hash).unwrap_or(false)
    }

    pub fn principal(&self) -> Principal {
        let tenant = match self.role {
            Role::Owner | Role::Staff => Some(TenantId::from(self.id)),
            Role::Customer => self.owning_business_id,
            Role::Superadmin => None,
        };
        Principal { user_id: self.id, role: self.role, tenant }
    }
}

pub fn check_ownership(role: Role, owning_business_id: Option<TenantId>) -> Result<(), PosError> {
    match (role, owning_business_id) {
        (Role::Customer, None) => Err(PosError::Validation("a customer must belong to a business".into())),
        (Role::Customer, Some(_)) | (_, None) => Ok(()),
        (role, Some(_)) => Err(PosError::Validation(format!("a {role} account cannot belong to a business"))),
    }
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, PosError> {
    bcrypt::hash(password, cost).map_err(|e| PosError::Validation(format!("cannot hash password: {e}")))
}

/// The acting identity behind a request, already authenticated upstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
    pub tenant: Option<TenantId>,
}

/// Which slice of the order book and analytics a principal sees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Platform,
    Business(TenantId),
    Customer(UserId),
}

impl Scope {
    /// Value for the `business_owner_id` predicate; `None` leaves the column unfiltered.
    pub fn business_filter(&self) -> Option<i64> {
        match self { Self::Business(t) => Some(t.0), _ => None }
    }

    /// Value for the `customer_id` predicate; `None` leaves the column unfiltered.
    pub fn customer_filter(&self) -> Option<i64> {
        match self { Self::Customer(u) => Some(u.0), _ => None }
    }
}

impl Principal {
    /// The tenant whose catalog this principal reads: their own, or their business's for customers.
    pub fn tenant(&self) -> Result<TenantId, PosError> {
        self.tenant.ok_or_else(|| PosError::Forbidden(format!("{} accounts have no catalog", self.role)))
    }

    /// Tenant id of an owner or staff account. Everyone else is refused.
    pub fn business(&self) -> Result<TenantId, PosError> {
        match (self.role.is_business(), self.tenant) {
            (true, Some(t)) => Ok(t),
            _ => Err(PosError::Forbidden(format!("{} accounts cannot manage a business", self.role))),
        }
    }

    pub fn require_superadmin(&self) -> Result<(), PosError> {
        match self.role {
            Role::Superadmin => Ok(()),
            role => Err(PosError::Forbidden(format!("{role} accounts cannot administer users"))),
        }
    }

    pub fn order_scope(&self) -> Result<Scope, PosError> {
        match self.role {
            Role::Superadmin => Ok(Scope::Platform),
            Role::Owner | Role::Staff => self.business().map(Scope::Business),
            Role::Customer => Ok(Scope::Customer(self.user_id)),
        }
    }

    pub fn analytics_scope(&self) -> Result<Scope, PosError> {
        match self.role {
            Role::Customer => Err(PosError::Forbidden("customers cannot view sales analytics".into())),
            _ => self.order_scope(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64, role: Role, business: Option<i64>) -> User {
        User::restore(UserId(id), format!("user{id}"), "", role, business.map(TenantId), Utc::now()).unwrap()
    }

    #[test]
    fn test_customer_requires_owning_business() {
        assert!(User::restore(UserId(1), "c", "", Role::Customer, None, Utc::now()).is_err());
        assert!(User::restore(UserId(1), "o", "", Role::Owner, Some(TenantId(2)), Utc::now()).is_err());
        assert!(User::restore(UserId(1), "o", "", Role::Owner, None, Utc::now()).is_ok());
    }

    #[test]
    fn test_principal_tenants() {
        assert_eq!(user(4, Role::Owner, None).principal().business().unwrap(), TenantId(4));
        assert_eq!(user(5, Role::Staff, None).principal().order_scope().unwrap(), Scope::Business(TenantId(5)));

        let customer = user(9, Role::Customer, Some(4)).principal();
        assert_eq!(customer.tenant().unwrap(), TenantId(4));
        assert!(matches!(customer.business(), Err(PosError::Forbidden(_))));
        assert_eq!(customer.order_scope().unwrap(), Scope::Customer(UserId(9)));
        assert!(customer.analytics_scope().is_err());

        let admin = user(1, Role::Superadmin, None).principal();
        assert!(admin.tenant().is_err());
        assert_eq!(admin.analytics_scope().unwrap(), Scope::Platform);
        assert!(admin.require_superadmin().is_ok());
    }

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("admin123", 4).unwrap();
        assert_ne!(hash, "admin123");
        let owner = User::restore(UserId(1), "owner", hash, Role::Owner, None, Utc::now()).unwrap();
        assert!(owner.verify_password("admin123"));
        assert!(!owner.verify_password("admin124"));
    }

    #[test]
    fn test_scope_filters() {
        assert_eq!(Scope::Platform.business_filter(), None);
        assert_eq!(Scope::Business(TenantId(3)).business_filter(), Some(3));
        assert_eq!(Scope::Customer(UserId(8)).customer_filter(), Some(8));
        assert_eq!(Scope::Customer(UserId(8)).business_filter(), None);
    }
}
