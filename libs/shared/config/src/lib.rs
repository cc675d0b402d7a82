use std::env;
use tracing::warn;

/// Which datastore backs the analysis workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Supabase,
    InMemory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
    pub supabase_jwt_secret: String,
    pub api_port: u16,
    pub store_backend: StoreBackend,
    pub jobs_enabled: bool,
    pub scheduler_interval_seconds: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, background jobs will use the anon key");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            api_port: parse_or_default("API_PORT", 3000),
            store_backend: match env::var("ANALYSIS_STORE").as_deref() {
                Ok("memory") => StoreBackend::InMemory,
                Ok("supabase") | Err(_) => StoreBackend::Supabase,
                Ok(other) => {
                    warn!("Unknown ANALYSIS_STORE value '{}', using supabase", other);
                    StoreBackend::Supabase
                }
            },
            jobs_enabled: parse_or_default("JOBS_ENABLED", true),
            scheduler_interval_seconds: parse_or_default("SCHEDULER_INTERVAL_SECONDS", 300),
        };

        if config.store_backend == StoreBackend::Supabase && !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    /// Key used by jobs that run without a user session.
    pub fn job_api_key(&self) -> &str {
        if self.supabase_service_role_key.is_empty() {
            &self.supabase_anon_key
        } else {
            &self.supabase_service_role_key
        }
    }
}

fn parse_or_default<T: std::str::FromStr + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
