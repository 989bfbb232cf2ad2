use std::sync::{
    atomic::{AtomicI64, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::error::StoreError;
use crate::users::repo::{UserStore, UserTx};
use crate::users::repo_types::{User, UserDetail};

/// Write step at which an `InMemoryUserStore` can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    CreateUser,
    CreateUserDetail,
    Commit,
}

#[derive(Debug, Clone)]
struct DetailRow {
    user_id: i64,
    gender: String,
    address: String,
}

#[derive(Debug, Default)]
struct Tables {
    users: Vec<User>,
    details: Vec<DetailRow>,
}

impl Tables {
    fn joined(&self, user: &User) -> Option<UserDetail> {
        self.details
            .iter()
            .find(|d| d.user_id == user.id)
            .map(|d| UserDetail {
                id: user.id,
                email: user.email.clone(),
                name: user.name.clone(),
                gender: d.gender.clone(),
                address: d.address.clone(),
            })
    }
}

struct Shared {
    tables: Mutex<Tables>,
    next_id: AtomicI64,
    create_calls: AtomicUsize,
    fail_on: Option<FailPoint>,
}

/// In-memory `UserStore` for development mode and tests.
///
/// Data is lost when the process exits. Ids come from a sequence that, like a
/// Postgres sequence, is not rewound by a rollback.
#[derive(Clone)]
pub struct InMemoryUserStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A store whose transactions fail at `point`.
    pub fn failing_on(point: FailPoint) -> Self {
        Self::build(Some(point))
    }

    fn build(fail_on: Option<FailPoint>) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                next_id: AtomicI64::new(1),
                create_calls: AtomicUsize::new(0),
                fail_on,
            }),
        }
    }

    /// Number of `create_user` and `create_user_detail` calls made, committed or not.
    pub fn create_calls(&self) -> usize {
        self.shared.create_calls.load(Ordering::SeqCst)
    }

    pub async fn user_count(&self) -> usize {
        self.shared.tables.lock().await.users.len()
    }

    pub async fn detail_count(&self) -> usize {
        self.shared.tables.lock().await.details.len()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    #[instrument(skip(self))]
    async fn find_user(&self, email: &str) -> Result<Option<User>, StoreError> {
        let tables = self.shared.tables.lock().await;
        Ok(tables.users.iter().find(|u| u.email == email).cloned())
    }

    #[instrument(skip(self))]
    async fn find_user_detail(&self, email: &str) -> Result<Option<UserDetail>, StoreError> {
        let tables = self.shared.tables.lock().await;
        Ok(tables
            .users
            .iter()
            .find(|u| u.email == email)
            .and_then(|u| tables.joined(u)))
    }

    #[instrument(skip(self))]
    async fn list_users(&self) -> Result<Vec<UserDetail>, StoreError> {
        let tables = self.shared.tables.lock().await;
        let mut rows: Vec<UserDetail> = tables
            .users
            .iter()
            .filter_map(|u| tables.joined(u))
            .collect();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    async fn begin(&self) -> Result<Box<dyn UserTx>, StoreError> {
        debug!("memory transaction started");
        Ok(Box::new(MemoryUserTx {
            shared: Arc::clone(&self.shared),
            users: Vec::new(),
            details: Vec::new(),
        }))
    }
}

/// Staged writes; applied to the shared tables on commit only.
struct MemoryUserTx {
    shared: Arc<Shared>,
    users: Vec<User>,
    details: Vec<DetailRow>,
}

impl MemoryUserTx {
    fn check(&self, point: FailPoint) -> Result<(), StoreError> {
        if self.shared.fail_on == Some(point) {
            warn!(?point, "injected store failure");
            return Err(anyhow::anyhow!("injected failure at {point:?}").into());
        }
        Ok(())
    }
}

#[async_trait]
impl UserTx for MemoryUserTx {
    async fn create_user(
        &mut self,
        email: &str,
        name: &str,
        password_hash: &str,
    ) -> Result<i64, StoreError> {
        self.shared.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check(FailPoint::CreateUser)?;

        let taken = self.users.iter().any(|u| u.email == email)
            || self
                .shared
                .tables
                .lock()
                .await
                .users
                .iter()
                .any(|u| u.email == email);
        if taken {
            return Err(StoreError::UniqueViolation);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        self.users.push(User {
            id,
            email: email.to_string(),
            name: name.to_string(),
            password_hash: password_hash.to_string(),
        });
        Ok(id)
    }

    async fn create_user_detail(
        &mut self,
        gender: &str,
        address: &str,
        user_id: i64,
    ) -> Result<(), StoreError> {
        self.shared.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check(FailPoint::CreateUserDetail)?;

        let known = self.users.iter().any(|u| u.id == user_id)
            || self
                .shared
                .tables
                .lock()
                .await
                .users
                .iter()
                .any(|u| u.id == user_id);
        if !known {
            return Err(anyhow::anyhow!("user_details.user_id {user_id} has no users row").into());
        }

        self.details.push(DetailRow {
            user_id,
            gender: gender.to_string(),
            address: address.to_string(),
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.check(FailPoint::Commit)?;
        let shared = Arc::clone(&self.shared);
        let mut tables = shared.tables.lock().await;
        // A concurrent transaction may have committed the same email first.
        if self
            .users
            .iter()
            .any(|staged| tables.users.iter().any(|u| u.email == staged.email))
        {
            return Err(StoreError::UniqueViolation);
        }
        let this = *self;
        tables.users.extend(this.users);
        tables.details.extend(this.details);
        debug!("memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        debug!(
            staged_users = self.users.len(),
            staged_details = self.details.len(),
            "memory transaction rolled back"
        );
        Ok(())
    }
}
