use async_trait::async_trait;
use sqlx::Row;

use signoff_core::approvals::ports::{StoreError, UserDirectory};
use signoff_core::domain::user::{UserContext, UserId};

use super::RepositoryError;
use crate::DbPool;

/// Read side of `app_user` and `user_role`. Roles and department are loaded on
/// every lookup so membership changes apply to the next decision.
pub struct SqlUserDirectory {
    pool: DbPool,
}

impl SqlUserDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces a user together with its full role set.
    pub async fn upsert_user(&self, user: &UserContext) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO app_user (id, username, name, dept_id, active)
             VALUES (?, ?, ?, ?, 1)
             ON CONFLICT(id) DO UPDATE SET
                 username = excluded.username,
                 name = excluded.name,
                 dept_id = excluded.dept_id,
                 active = 1",
        )
        .bind(user.id.as_str())
        .bind(&user.username)
        .bind(&user.name)
        .bind(&user.dept_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM user_role WHERE user_id = ?")
            .bind(user.id.as_str())
            .execute(&mut *tx)
            .await?;

        for role_code in &user.role_codes {
            sqlx::query("INSERT INTO user_role (user_id, role_code) VALUES (?, ?)")
                .bind(user.id.as_str())
                .bind(role_code)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Deactivated users are invisible to approval lookups.
    #[cfg(test)]
    pub async fn deactivate(&self, id: &UserId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE app_user SET active = 0 WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl UserDirectory for SqlUserDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<UserContext>, StoreError> {
        let row = sqlx::query(
            "SELECT id, username, name, dept_id FROM app_user WHERE id = ? AND active = 1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());
        let user_id: String = row.try_get("id").map_err(decode)?;
        let username: String = row.try_get("username").map_err(decode)?;
        let name: String = row.try_get("name").map_err(decode)?;
        let dept_id: Option<String> = row.try_get("dept_id").map_err(decode)?;

        let roles: Vec<String> = sqlx::query_scalar(
            "SELECT role_code FROM user_role WHERE user_id = ? ORDER BY role_code",
        )
        .bind(&user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let mut user = UserContext::new(user_id, username).with_name(name).with_roles(roles);
        user.dept_id = dept_id;
        Ok(Some(user))
    }
}
