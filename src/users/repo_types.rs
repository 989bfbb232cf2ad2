use sqlx::FromRow;

/// Base user row used for lookups and login.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,                // generated by storage
    pub email: String,          // unique
    pub name: String,
    pub password_hash: String,  // Argon2 hash, never leaves the resolver
}

/// User row joined with its `user_details` record.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UserDetail {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub gender: String,
    pub address: String,
}
