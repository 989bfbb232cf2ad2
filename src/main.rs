use user_accounts::{app, AppState};

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "user_accounts=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let app_state = AppState::init().await?;

    // Run migrations if present
    if let Some(db) = &app_state.db {
        if let Err(e) = sqlx::migrate!("./migrations").run(db).await {
            tracing::warn!(error = %e, "migrations failed; continuing");
        }
    }

    app::serve(app::build_app(app_state)).await
}
