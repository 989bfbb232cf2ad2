use std::sync::Arc;

use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, instrument, warn};

use crate::{
    error::{AppError, StoreError},
    state::AppState,
    users::{
        dto::{
            CreateUserInput, FindUserInput, LoginData, LoginResult, UserLoginInput, UserProfile,
            UserSummary,
        },
        jwt::JwtKeys,
        password,
        repo::{UserStore, UserTx},
    },
};

pub const LOGIN_SUCCEEDED: &str = "login succeeded";

/// The user query and mutations, composed over a `UserStore` and a token issuer.
#[derive(Clone)]
pub struct UserResolver {
    store: Arc<dyn UserStore>,
    keys: JwtKeys,
}

impl FromRef<AppState> for UserResolver {
    fn from_ref(state: &AppState) -> Self {
        Self::new(Arc::clone(&state.users), JwtKeys::from_ref(state))
    }
}

impl UserResolver {
    pub fn new(store: Arc<dyn UserStore>, keys: JwtKeys) -> Self {
        Self { store, keys }
    }

    #[instrument(skip(self))]
    pub async fn list_users(&self) -> Result<Vec<UserProfile>, AppError> {
        logged("listUsers", self.all_users().await)
    }

    #[instrument(skip(self, input), fields(email = ?input.email))]
    pub async fn create_user(&self, input: CreateUserInput) -> Result<Vec<UserSummary>, AppError> {
        logged("createUser", self.register(input).await)
    }

    #[instrument(skip(self, input), fields(email = ?input.email))]
    pub async fn find_user(&self, input: FindUserInput) -> Result<Vec<UserSummary>, AppError> {
        logged("findUser", self.lookup(input).await)
    }

    #[instrument(skip(self, input), fields(email = ?input.email))]
    pub async fn find_user_detail(
        &self,
        input: FindUserInput,
    ) -> Result<Vec<UserProfile>, AppError> {
        logged("findUserDetail", self.lookup_detail(input).await)
    }

    #[instrument(skip(self, input), fields(email = ?input.email))]
    pub async fn user_login(&self, input: UserLoginInput) -> Result<LoginResult, AppError> {
        logged("userLogin", self.login(input).await)
    }

    async fn all_users(&self) -> Result<Vec<UserProfile>, AppError> {
        let rows = self.store.list_users().await?;
        Ok(rows.into_iter().map(UserProfile::from).collect())
    }

    async fn register(&self, input: CreateUserInput) -> Result<Vec<UserSummary>, AppError> {
        let email = normalize_email(required(input.email, "email")?);
        if !is_valid_email(&email) {
            return Err(AppError::InvalidInput("email is malformed".into()));
        }
        let name = required(input.name, "name")?;
        let password = required_secret(input.password, "password")?;
        let gender = required(input.gender, "gender")?;
        let address = required(input.address, "address")?;

        if self.store.find_user(&email).await?.is_some() {
            return Err(AppError::DuplicateUser);
        }

        let hash = password::hash(password)
            .await
            .map_err(|e| write_error(e.into()))?;

        let mut tx = self.store.begin().await.map_err(write_error)?;
        let id = match insert_user(&mut tx, &email, &name, &hash, &gender, &address).await {
            Ok(id) => id,
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "rollback failed");
                }
                return Err(write_error(e));
            }
        };
        tx.commit().await.map_err(write_error)?;

        info!(user_id = id, email = %email, "user registered");
        Ok(vec![UserSummary { id, email }])
    }

    async fn lookup(&self, input: FindUserInput) -> Result<Vec<UserSummary>, AppError> {
        let email = normalize_email(required(input.email, "email")?);
        let user = self
            .store
            .find_user(&email)
            .await?
            .ok_or(AppError::UserNotFound)?;
        Ok(vec![user.into()])
    }

    async fn lookup_detail(&self, input: FindUserInput) -> Result<Vec<UserProfile>, AppError> {
        let email = normalize_email(required(input.email, "email")?);
        let detail = self
            .store
            .find_user_detail(&email)
            .await?
            .ok_or(AppError::UserNotFound)?;
        Ok(vec![detail.into()])
    }

    async fn login(&self, input: UserLoginInput) -> Result<LoginResult, AppError> {
        let email = normalize_email(required(input.email, "email")?);
        let password = required_secret(input.password, "password")?;

        let user = self
            .store
            .find_user(&email)
            .await?
            .ok_or(AppError::UserNotFound)?;

        if !password::verify(password, user.password_hash.clone()).await? {
            warn!(user_id = user.id, "login invalid password");
            return Err(AppError::InvalidCredentials);
        }

        let token = self.keys.issue(&user)?;
        info!(user_id = user.id, "user logged in");
        Ok(LoginResult {
            success: true,
            message: LOGIN_SUCCEEDED.into(),
            data: LoginData { token },
        })
    }
}

async fn insert_user(
    tx: &mut Box<dyn UserTx>,
    email: &str,
    name: &str,
    password_hash: &str,
    gender: &str,
    address: &str,
) -> Result<i64, StoreError> {
    let id = tx.create_user(email, name, password_hash).await?;
    tx.create_user_detail(gender, address, id).await?;
    Ok(id)
}

/// Failures on the registration write path, from hashing through commit. A
/// unique violation means another registration for the same email won the race.
fn write_error(e: StoreError) -> AppError {
    match e {
        StoreError::UniqueViolation => AppError::DuplicateUser,
        StoreError::Backend(e) => AppError::Transaction(e),
    }
}

fn logged<T>(op: &'static str, result: Result<T, AppError>) -> Result<T, AppError> {
    if let Err(e) = &result {
        if e.is_client_error() {
            warn!(op, kind = ?e.kind(), error = %e, "request rejected");
        } else {
            error!(op, kind = ?e.kind(), error = ?e, "request failed");
        }
    }
    result
}

fn required(value: Option<String>, field: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::InvalidInput(format!("{field} is required")))
}

// Passwords are used verbatim.
fn required_secret(value: Option<String>, field: &str) -> Result<String, AppError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::InvalidInput(format!("{field} is required")))
}

fn normalize_email(email: String) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::error::ErrorKind;
    use crate::users::memory::{FailPoint, InMemoryUserStore};

    fn keys() -> JwtKeys {
        JwtKeys::from(&JwtConfig {
            secret: "test-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            ttl_minutes: 5,
        })
    }

    fn resolver(store: &InMemoryUserStore) -> UserResolver {
        UserResolver::new(Arc::new(store.clone()), keys())
    }

    fn registration(email: &str, password: &str) -> CreateUserInput {
        CreateUserInput {
            email: Some(email.into()),
            name: Some("Ada".into()),
            password: Some(password.into()),
            gender: Some("female".into()),
            address: Some("12 Analytical St".into()),
        }
    }

    fn login(email: &str, password: &str) -> UserLoginInput {
        UserLoginInput {
            email: Some(email.into()),
            password: Some(password.into()),
        }
    }

    fn find(email: &str) -> FindUserInput {
        FindUserInput {
            email: Some(email.into()),
        }
    }

    #[tokio::test]
    async fn create_user_writes_base_and_detail_rows() {
        let store = InMemoryUserStore::new();
        let r = resolver(&store);

        let created = r
            .create_user(registration("ada@example.com", "pw-123456"))
            .await
            .expect("registration succeeds");

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].email, "ada@example.com");
        assert_eq!(store.user_count().await, 1);
        assert_eq!(store.detail_count().await, 1);

        let stored = store.find_user("ada@example.com").await.unwrap().unwrap();
        assert_eq!(stored.id, created[0].id);
    }

    #[tokio::test]
    async fn duplicate_registration_performs_no_writes() {
        let store = InMemoryUserStore::new();
        let r = resolver(&store);
        r.create_user(registration("ada@example.com", "pw-123456"))
            .await
            .unwrap();
        let calls_before = store.create_calls();

        let err = r
            .create_user(registration("ada@example.com", "other-pw"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DuplicateUser);
        assert_eq!(err.to_string(), "already registered");
        assert_eq!(store.create_calls(), calls_before);
        assert_eq!(store.user_count().await, 1);
        assert_eq!(store.detail_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_check_ignores_case_and_whitespace() {
        let store = InMemoryUserStore::new();
        let r = resolver(&store);
        r.create_user(registration("ada@example.com", "pw-123456"))
            .await
            .unwrap();

        let err = r
            .create_user(registration("  ADA@Example.com ", "pw-123456"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateUser);
    }

    #[tokio::test]
    async fn failure_between_inserts_leaves_no_records() {
        let store = InMemoryUserStore::failing_on(FailPoint::CreateUserDetail);
        let r = resolver(&store);

        let err = r
            .create_user(registration("ada@example.com", "pw-123456"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransactionFailure);
        assert_eq!(store.create_calls(), 2);
        assert_eq!(store.user_count().await, 0);
        assert_eq!(store.detail_count().await, 0);
    }

    #[tokio::test]
    async fn failed_commit_leaves_no_records() {
        let store = InMemoryUserStore::failing_on(FailPoint::Commit);
        let r = resolver(&store);

        let err = r
            .create_user(registration("ada@example.com", "pw-123456"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransactionFailure);
        assert_eq!(store.user_count().await, 0);
        assert_eq!(store.detail_count().await, 0);
    }

    #[tokio::test]
    async fn failure_on_first_insert_leaves_no_records() {
        let store = InMemoryUserStore::failing_on(FailPoint::CreateUser);
        let r = resolver(&store);

        let err = r
            .create_user(registration("ada@example.com", "pw-123456"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransactionFailure);
        assert_eq!(store.create_calls(), 1);
        assert_eq!(store.user_count().await, 0);
        assert_eq!(store.detail_count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_registrations_for_one_email_create_one_user() {
        let store = InMemoryUserStore::new();
        let r = resolver(&store);

        let (a, b) = tokio::join!(
            r.create_user(registration("race@example.com", "pw-123456")),
            r.create_user(registration("race@example.com", "pw-654321")),
        );

        let kinds: Vec<ErrorKind> = [a.as_ref().err(), b.as_ref().err()]
            .into_iter()
            .flatten()
            .map(AppError::kind)
            .collect();
        assert_eq!(kinds, [ErrorKind::DuplicateUser]);
        assert!(a.is_ok() || b.is_ok());
        assert_eq!(store.user_count().await, 1);
        assert_eq!(store.detail_count().await, 1);
    }

    /// Delegates to an in-memory store but never reports an existing user, so
    /// the duplicate can only be caught inside the transaction.
    struct StaleLookup(InMemoryUserStore);

    #[async_trait::async_trait]
    impl UserStore for StaleLookup {
        async fn find_user(
            &self,
            _email: &str,
        ) -> Result<Option<crate::users::repo_types::User>, StoreError> {
            Ok(None)
        }
        async fn find_user_detail(
            &self,
            email: &str,
        ) -> Result<Option<crate::users::repo_types::UserDetail>, StoreError> {
            self.0.find_user_detail(email).await
        }
        async fn list_users(
            &self,
        ) -> Result<Vec<crate::users::repo_types::UserDetail>, StoreError> {
            self.0.list_users().await
        }
        async fn begin(&self) -> Result<Box<dyn UserTx>, StoreError> {
            self.0.begin().await
        }
    }

    #[tokio::test]
    async fn unique_violation_in_transaction_is_duplicate_user() {
        let store = InMemoryUserStore::new();
        let r = UserResolver::new(Arc::new(StaleLookup(store.clone())), keys());
        r.create_user(registration("ada@example.com", "pw-123456"))
            .await
            .unwrap();

        let err = r
            .create_user(registration("ada@example.com", "pw-123456"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DuplicateUser);
        assert_eq!(store.create_calls(), 3);
        assert_eq!(store.user_count().await, 1);
        assert_eq!(store.detail_count().await, 1);
    }

    #[test]
    fn write_path_errors_are_classified() {
        assert_eq!(
            write_error(anyhow::anyhow!("argon2 failed").into()).kind(),
            ErrorKind::TransactionFailure
        );
        assert_eq!(
            write_error(StoreError::UniqueViolation).kind(),
            ErrorKind::DuplicateUser
        );
    }

    #[tokio::test]
    async fn incomplete_registration_is_rejected_before_storage() {
        let store = InMemoryUserStore::new();
        let r = resolver(&store);

        let mut input = registration("ada@example.com", "pw-123456");
        input.address = Some("   ".into());
        let err = r.create_user(input).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = r
            .create_user(registration("not-an-email", "pw-123456"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(store.create_calls(), 0);
    }

    #[tokio::test]
    async fn stored_hash_is_not_the_plaintext() {
        let store = InMemoryUserStore::new();
        let r = resolver(&store);
        r.create_user(registration("ada@example.com", "pw-123456"))
            .await
            .unwrap();

        let stored = store.find_user("ada@example.com").await.unwrap().unwrap();
        assert_ne!(stored.password_hash, "pw-123456");
        assert!(password::verify_password("pw-123456", &stored.password_hash).unwrap());
        assert!(!password::verify_password("pw-1234567", &stored.password_hash).unwrap());
    }

    #[tokio::test]
    async fn find_user_returns_known_and_rejects_unknown() {
        let store = InMemoryUserStore::new();
        let r = resolver(&store);
        let created = r
            .create_user(registration("ada@example.com", "pw-123456"))
            .await
            .unwrap();

        let found = r.find_user(find("ada@example.com")).await.unwrap();
        assert_eq!(found, created);

        let err = r.find_user(find("nobody@example.com")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UserNotFound);
        assert_eq!(err.to_string(), "user does not exist");
    }

    #[tokio::test]
    async fn find_user_detail_returns_profile() {
        let store = InMemoryUserStore::new();
        let r = resolver(&store);
        let created = r
            .create_user(registration("ada@example.com", "pw-123456"))
            .await
            .unwrap();

        let detail = r.find_user_detail(find("ada@example.com")).await.unwrap();
        assert_eq!(
            detail,
            vec![UserProfile {
                id: created[0].id,
                email: "ada@example.com".into(),
                name: "Ada".into(),
                gender: "female".into(),
                address: "12 Analytical St".into(),
            }]
        );

        let err = r
            .find_user_detail(find("nobody@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UserNotFound);
    }

    #[tokio::test]
    async fn list_users_returns_every_profile() {
        let store = InMemoryUserStore::new();
        let r = resolver(&store);
        assert!(r.list_users().await.unwrap().is_empty());

        r.create_user(registration("ada@example.com", "pw-123456"))
            .await
            .unwrap();
        r.create_user(registration("bob@example.com", "pw-654321"))
            .await
            .unwrap();

        let users = r.list_users().await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].email, "ada@example.com");
        assert_eq!(users[1].email, "bob@example.com");
    }

    #[tokio::test]
    async fn login_with_correct_password_issues_token() {
        let store = InMemoryUserStore::new();
        let r = resolver(&store);
        let created = r
            .create_user(registration("ada@example.com", "pw-123456"))
            .await
            .unwrap();

        let result = r
            .user_login(login("ada@example.com", "pw-123456"))
            .await
            .expect("login succeeds");

        assert!(result.success);
        assert_eq!(result.message, LOGIN_SUCCEEDED);
        assert!(!result.data.token.is_empty());
        let claims = keys().verify(&result.data.token).unwrap();
        assert_eq!(claims.sub, created[0].id);
        assert_eq!(claims.email, "ada@example.com");
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_rejected_without_token() {
        let store = InMemoryUserStore::new();
        let r = resolver(&store);
        r.create_user(registration("ada@example.com", "pw-123456"))
            .await
            .unwrap();

        let result = r.user_login(login("ada@example.com", "wrong-pw")).await;

        match result {
            Ok(issued) => panic!("expected rejection, got token {}", issued.data.token),
            Err(err) => {
                assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
                assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
            }
        }
    }

    #[tokio::test]
    async fn login_for_unknown_email_is_user_not_found() {
        let store = InMemoryUserStore::new();
        let r = resolver(&store);
        let err = r
            .user_login(login("ghost@example.com", "whatever"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UserNotFound);
    }

    #[test]
    fn email_shape_check() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.d"));
    }
}
