use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Which `UserStore` backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl StoreBackend {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "memory" | "mem" => Ok(Self::Memory),
            other => anyhow::bail!("unknown USER_STORE value: {other}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let store = match std::env::var("USER_STORE") {
            Ok(v) => StoreBackend::parse(&v)?,
            Err(_) => StoreBackend::Postgres,
        };
        let database_url = std::env::var("DATABASE_URL").ok();
        if store == StoreBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL must be set when USER_STORE=postgres");
        }
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "user-accounts".into()),
            audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "user-accounts-clients".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60),
        };
        Ok(Self {
            store,
            database_url,
            jwt,
        })
    }
}
