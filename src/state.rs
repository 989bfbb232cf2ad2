use crate::config::{AppConfig, JwtConfig, StoreBackend};
use crate::users::{memory::InMemoryUserStore, repo::PgUserStore, repo::UserStore};
use anyhow::Context;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Option<PgPool>,
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        match (config.store, config.database_url.as_deref()) {
            (StoreBackend::Postgres, Some(url)) => {
                let db = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;
                let users = Arc::new(PgUserStore::new(db.clone())) as Arc<dyn UserStore>;
                Ok(Self {
                    db: Some(db),
                    config,
                    users,
                })
            }
            (StoreBackend::Postgres, None) => anyhow::bail!("DATABASE_URL is not set"),
            (StoreBackend::Memory, _) => {
                tracing::warn!("using in-memory user store; data is lost on exit");
                Ok(Self::from_parts(config, Arc::new(InMemoryUserStore::new())))
            }
        }
    }

    pub fn from_parts(config: Arc<AppConfig>, users: Arc<dyn UserStore>) -> Self {
        Self {
            db: None,
            config,
            users,
        }
    }

    /// In-memory state with fixed test JWT settings.
    pub fn fake() -> Self {
        let config = Arc::new(AppConfig {
            store: StoreBackend::Memory,
            database_url: None,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
            },
        });
        Self::from_parts(config, Arc::new(InMemoryUserStore::new()))
    }
}
