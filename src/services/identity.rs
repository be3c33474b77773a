//! Accounts, login and customer management.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use super::bounded;
use crate::domain::aggregates::user::hash_password;
use crate::domain::aggregates::{Principal, Role, User};
use crate::domain::value_objects::{TenantId, UserId};
use crate::store::{NewUser, UserRepository};
use crate::{PosError, Result};

const MIN_PASSWORD_LEN: usize = 6;

/// Superadmin edit of an existing account. A missing password keeps the current one.
#[derive(Clone, Debug, Deserialize)]
pub struct UserUpdate {
    pub username: String,
    pub password: Option<String>,
    pub role: Role,
}

pub struct IdentityService {
    users: Arc<dyn UserRepository>,
    bcrypt_cost: u32,
    timeout: Duration,
}

impl IdentityService {
    pub fn new(users: Arc<dyn UserRepository>, bcrypt_cost: u32, timeout: Duration) -> Self {
        Self { users, bcrypt_cost, timeout }
    }

    /// Self-service sign up for business accounts.
    #[instrument(skip(self, password))]
    pub async fn register(&self, username: &str, password: &str, role: Role) -> Result<User> {
        if !role.is_business() {
            return Err(PosError::Validation(format!("cannot register a {role} account")));
        }
        self.create(username, password, role, None).await
    }

    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        let user = bounded(self.timeout, self.users.find_by_username(username.trim()))
            .await?
            .ok_or(PosError::InvalidCredentials)?;
        let password = password.to_string();
        let candidate = user.clone();
        let valid = tokio::task::spawn_blocking(move || candidate.verify_password(&password))
            .await
            .map_err(|e| PosError::Persistence(format!("password check aborted: {e}")))?;
        if !valid {
            tracing::warn!(username = user.username(), "failed login");
            return Err(PosError::InvalidCredentials);
        }
        tracing::info!(user_id = %user.id(), role = %user.role(), "login");
        Ok(user)
    }

    pub async fn username_exists(&self, username: &str) -> Result<bool> {
        Ok(bounded(self.timeout, self.users.find_by_username(username.trim())).await?.is_some())
    }

    /// Resolves the principal behind an authenticated user id. Unknown ids are treated as bad credentials.
    pub async fn principal_for(&self, user_id: UserId) -> Result<Principal> {
        bounded(self.timeout, self.users.find_user(user_id))
            .await?
            .map(|u| u.principal())
            .ok_or(PosError::InvalidCredentials)
    }

    #[instrument(skip(self, principal, password), fields(user_id = %principal.user_id))]
    pub async fn create_customer(&self, principal: &Principal, username: &str, password: &str) -> Result<User> {
        let tenant = principal.business()?;
        self.create(username, password, Role::Customer, Some(tenant)).await
    }

    pub async fn customers_for(&self, principal: &Principal) -> Result<Vec<User>> {
        let tenant = principal.business()?;
        bounded(self.timeout, self.users.customers_of(tenant)).await
    }

    pub async fn delete_customer(&self, principal: &Principal, customer: UserId) -> Result<()> {
        let tenant = principal.business()?;
        if !bounded(self.timeout, self.users.delete_customer(tenant, customer)).await? {
            return Err(PosError::not_found("Customer", customer));
        }
        tracing::info!(customer_id = %customer, tenant = %tenant, "customer deleted");
        Ok(())
    }

    pub async fn list_users(&self, principal: &Principal) -> Result<Vec<User>> {
        principal.require_superadmin()?;
        bounded(self.timeout, self.users.list_users()).await
    }

    pub async fn get_user(&self, principal: &Principal, id: UserId) -> Result<User> {
        principal.require_superadmin()?;
        self.find(id).await
    }

    #[instrument(skip(self, principal, update), fields(user_id = %principal.user_id))]
    pub async fn update_user(&self, principal: &Principal, id: UserId, update: UserUpdate) -> Result<User> {
        principal.require_superadmin()?;
        let current = self.find(id).await?;
        if (current.role() == Role::Customer) != (update.role == Role::Customer) {
            return Err(PosError::Validation(format!(
                "cannot change a {} account into a {} account",
                current.role(),
                update.role
            )));
        }
        let username = valid_username(&update.username)?;
        let hash = match update.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => Some(self.hash(password).await?),
            None => None,
        };
        if !bounded(self.timeout, self.users.update_user(id, &username, hash.as_deref(), update.role)).await? {
            return Err(PosError::not_found("User", id));
        }
        self.find(id).await
    }

    /// Deletes an account together with the customers of its business.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn delete_user(&self, principal: &Principal, id: UserId) -> Result<()> {
        principal.require_superadmin()?;
        if principal.user_id == id {
            return Err(PosError::Validation("cannot delete your own account".into()));
        }
        if !bounded(self.timeout, self.users.delete_user(id)).await? {
            return Err(PosError::not_found("User", id));
        }
        Ok(())
    }

    /// Creates the platform administrator on first start. Existing accounts are left alone.
    pub async fn ensure_superadmin(&self, username: &str, password: &str) -> Result<User> {
        if let Some(existing) = bounded(self.timeout, self.users.find_by_username(username)).await? {
            if existing.role() != Role::Superadmin {
                return Err(PosError::Conflict(format!("'{username}' exists and is not a superadmin")));
            }
            return Ok(existing);
        }
        let admin = self.create(username, password, Role::Superadmin, None).await?;
        tracing::info!(user_id = %admin.id(), "bootstrapped superadmin");
        Ok(admin)
    }

    async fn create(&self, username: &str, password: &str, role: Role, business: Option<TenantId>) -> Result<User> {
        let username = valid_username(username)?;
        let password_hash = self.hash(password).await?;
        let user = bounded(
            self.timeout,
            self.users.insert_user(NewUser { username, password_hash, role, owning_business_id: business }),
        )
        .await?;
        tracing::info!(user_id = %user.id(), role = %role, "account created");
        Ok(user)
    }

    async fn find(&self, id: UserId) -> Result<User> {
        bounded(self.timeout, self.users.find_user(id))
            .await?
            .ok_or_else(|| PosError::not_found("User", id))
    }

    async fn hash(&self, password: &str) -> Result<String> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(PosError::Validation(format!("password must be at least {MIN_PASSWORD_LEN} characters")));
        }
        let password = password.to_string();
        let cost = self.bcrypt_cost;
        tokio::task::spawn_blocking(move || hash_password(&password, cost))
            .await
            .map_err(|e| PosError::Persistence(format!("password hashing aborted: {e}")))?
    }
}

fn valid_username(username: &str) -> Result<String> {
    let username = username.trim();
    if username.is_empty() || username.chars().any(char::is_whitespace) {
        return Err(PosError::Validation("username must be a single non-empty word".into()));
    }
    Ok(username.to_string())
}
