use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, instrument};

use crate::error::StoreError;
use crate::users::repo_types::{User, UserDetail};

/// Read access to user storage and the entry point for transactional writes.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_user_detail(&self, email: &str) -> Result<Option<UserDetail>, StoreError>;
    async fn list_users(&self) -> Result<Vec<UserDetail>, StoreError>;
    async fn begin(&self) -> Result<Box<dyn UserTx>, StoreError>;
}

/// An open write transaction. Writes become visible only after `commit`;
/// dropping the transaction without committing discards them.
#[async_trait]
pub trait UserTx: Send {
    async fn create_user(
        &mut self,
        email: &str,
        name: &str,
        password_hash: &str,
    ) -> Result<i64, StoreError>;
    async fn create_user_detail(
        &mut self,
        gender: &str,
        address: &str,
        user_id: i64,
    ) -> Result<(), StoreError>;
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    #[instrument(skip(self))]
    async fn find_user(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, name, password_hash
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    #[instrument(skip(self))]
    async fn find_user_detail(&self, email: &str) -> Result<Option<UserDetail>, StoreError> {
        let detail = sqlx::query_as::<_, UserDetail>(
            r#"
            SELECT u.id, u.email, u.name, d.gender, d.address
            FROM users u
            JOIN user_details d ON d.user_id = u.id
            WHERE u.email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(detail)
    }

    #[instrument(skip(self))]
    async fn list_users(&self) -> Result<Vec<UserDetail>, StoreError> {
        let rows = sqlx::query_as::<_, UserDetail>(
            r#"
            SELECT u.id, u.email, u.name, d.gender, d.address
            FROM users u
            JOIN user_details d ON d.user_id = u.id
            ORDER BY u.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn begin(&self) -> Result<Box<dyn UserTx>, StoreError> {
        let tx = self.pool.begin().await?;
        debug!("transaction started");
        Ok(Box::new(PgUserTx { tx }))
    }
}

/// Wraps a sqlx transaction, which rolls back on drop when not committed.
pub struct PgUserTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UserTx for PgUserTx {
    #[instrument(skip(self, password_hash))]
    async fn create_user(
        &mut self,
        email: &str,
        name: &str,
        password_hash: &str,
    ) -> Result<i64, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO users (email, name, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(email)
        .bind(name)
        .bind(password_hash)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn create_user_detail(
        &mut self,
        gender: &str,
        address: &str,
        user_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_details (user_id, gender, address)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(gender)
        .bind(address)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        debug!("transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        debug!("transaction rolled back");
        Ok(())
    }
}
