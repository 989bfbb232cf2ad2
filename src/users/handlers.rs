use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    error::AppError,
    state::AppState,
    users::{
        dto::{
            CreateUserInput, FindUserInput, LoginResult, UserLoginInput, UserProfile, UserSummary,
        },
        resolver::UserResolver,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/find", post(find_user))
        .route("/users/detail", post(find_user_detail))
        .route("/users/login", post(user_login))
}

#[instrument(skip(resolver))]
pub async fn list_users(
    State(resolver): State<UserResolver>,
) -> Result<Json<Vec<UserProfile>>, AppError> {
    Ok(Json(resolver.list_users().await?))
}

#[instrument(skip(resolver, payload))]
pub async fn create_user(
    State(resolver): State<UserResolver>,
    Json(payload): Json<CreateUserInput>,
) -> Result<Json<Vec<UserSummary>>, AppError> {
    Ok(Json(resolver.create_user(payload).await?))
}

#[instrument(skip(resolver, payload))]
pub async fn find_user(
    State(resolver): State<UserResolver>,
    Json(payload): Json<FindUserInput>,
) -> Result<Json<Vec<UserSummary>>, AppError> {
    Ok(Json(resolver.find_user(payload).await?))
}

#[instrument(skip(resolver, payload))]
pub async fn find_user_detail(
    State(resolver): State<UserResolver>,
    Json(payload): Json<FindUserInput>,
) -> Result<Json<Vec<UserProfile>>, AppError> {
    Ok(Json(resolver.find_user_detail(payload).await?))
}

#[instrument(skip(resolver, payload))]
pub async fn user_login(
    State(resolver): State<UserResolver>,
    Json(payload): Json<UserLoginInput>,
) -> Result<Json<LoginResult>, AppError> {
    Ok(Json(resolver.user_login(payload).await?))
}
