use serde::{Deserialize, Serialize};

use crate::users::repo_types::{User, UserDetail};

/// Registration input. Fields are optional on the wire and validated by the resolver.
#[derive(Debug, Default, Deserialize)]
pub struct CreateUserInput {
    pub email: Option<String>,
    pub name: Option<String>,
    pub password: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
}

/// Lookup input shared by `findUser` and `findUserDetail`.
#[derive(Debug, Default, Deserialize)]
pub struct FindUserInput {
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserLoginInput {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub email: String,
}

impl From<User> for UserSummary {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub gender: String,
    pub address: String,
}

impl From<UserDetail> for UserProfile {
    fn from(d: UserDetail) -> Self {
        Self {
            id: d.id,
            email: d.email,
            name: d.name,
            gender: d.gender,
            address: d.address,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginData {
    pub token: String,
}

/// Response returned after a successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResult {
    pub success: bool,
    pub message: String,
    pub data: LoginData,
}
