//! User rows

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{corrupt, NewUser, SqliteStore, UserRepository};
use crate::domain::aggregates::{Role, User};
use crate::domain::value_objects::{TenantId, UserId};
use crate::Result;

const USER_COLUMNS: &str = "id, username, password_hash, role, owning_business_id, created_at";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    password_hash: String,
    role: String,
    owning_business_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = crate::PosError;
    fn try_from(r: UserRow) -> Result<Self> {
        let role: Role = r.role.parse().map_err(|e| corrupt("user", e))?;
        User::restore(UserId(r.id), r.username, r.password_hash, role, r.owning_business_id.map(TenantId), r.created_at)
            .map_err(|e| corrupt("user", e))
    }
}

fn users(rows: Vec<UserRow>) -> Result<Vec<User>> { rows.into_iter().map(User::try_from).collect() }

#[async_trait]
impl UserRepository for SqliteStore {
    async fn insert_user(&self, user: NewUser) -> Result<User> {
        crate::domain::aggregates::user::check_ownership(user.role, user.owning_business_id)?;
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (username, password_hash, role, owning_business_id, created_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING {USER_COLUMNS}"
        ))
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.owning_business_id.map(|t| t.0))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?"))
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        users(rows)
    }

    async fn customers_of(&self, tenant: TenantId) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE role = 'customer' AND owning_business_id = ? ORDER BY created_at DESC, id DESC"
        ))
        .bind(tenant.0)
        .fetch_all(&self.pool)
        .await?;
        users(rows)
    }

    async fn update_user(&self, id: UserId, username: &str, password_hash: Option<&str>, role: Role) -> Result<bool> {
        let done = sqlx::query(
            "UPDATE users SET username = ?, password_hash = COALESCE(?, password_hash), role = ? WHERE id = ?",
        )
        .bind(username)
        .bind(password_hash)
        .bind(role.as_str())
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn delete_user(&self, id: UserId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let customers = sqlx::query("DELETE FROM users WHERE role = 'customer' AND owning_business_id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        let done = sqlx::query("DELETE FROM users WHERE id = ?").bind(id.0).execute(&mut *tx).await?;
        tx.commit().await?;
        tracing::debug!(user_id = %id, customers = customers.rows_affected(), "deleted user");
        Ok(done.rows_affected() == 1)
    }

    async fn delete_customer(&self, tenant: TenantId, customer: UserId) -> Result<bool> {
        let done = sqlx::query("DELETE FROM users WHERE id = ? AND role = 'customer' AND owning_business_id = ?")
            .bind(customer.0)
            .bind(tenant.0)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() == 1)
    }
}
