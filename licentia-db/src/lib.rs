//! Typed PostgreSQL repositories over the entities in the data model.
//!
//! Pool construction and schema bootstrap follow the same shape as this
//! workspace's tenant manager: a `PgPool` held behind a thin struct,
//! `CREATE TABLE IF NOT EXISTS` run once at startup, JSONB for nested
//! config blobs, and explicit `row.try_get` mapping per entity — no
//! reflection-based field renaming.

pub mod entities;
pub mod error;
pub mod repo_connection;
pub mod repo_credential;
pub mod repo_customer;
pub mod repo_si;
pub mod repo_sso;
pub mod repo_theme;
pub mod repo_user;

pub use error::{DbError, DbResult};

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub pool_size: u32,
    pub instance_connection_name: Option<String>,
    pub use_cloud_sql: bool,
}

impl DbConfig {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("DB_HOST").unwrap_or_else(|_| "localhost".into()),
            port: std::env::var("DB_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(5432),
            user: std::env::var("DB_USER").unwrap_or_else(|_| "postgres".into()),
            password: std::env::var("DB_PASSWORD").unwrap_or_default(),
            dbname: std::env::var("DB_NAME").unwrap_or_else(|_| "licentia".into()),
            pool_size: std::env::var("DB_POOL_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(10),
            instance_connection_name: std::env::var("INSTANCE_CONNECTION_NAME").ok(),
            use_cloud_sql: std::env::var("USE_CLOUD_SQL").map(|v| v == "true").unwrap_or(false),
        }
    }

    fn connection_string(&self) -> String {
        if self.use_cloud_sql {
            if let Some(instance) = &self.instance_connection_name {
                return format!(
                    "postgres://{}:{}@/{}?host=/cloudsql/{}",
                    self.user, self.password, self.dbname, instance
                );
            }
        }
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.dbname
        )
    }
}

/// Thin wrapper around a connection pool; every repository method takes
/// `&Db` and issues its own query or transaction against `self.pool`.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(config: &DbConfig) -> DbResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.connection_string())
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates every table this server needs if it does not already exist.
    /// Idempotent; safe to call on every startup.
    pub async fn initialize_schema(&self) -> DbResult<()> {
        sqlx::query(SCHEMA_SERVICE_INTEGRATORS).execute(&self.pool).await?;
        sqlx::query(SCHEMA_THEMES).execute(&self.pool).await?;
        sqlx::query(SCHEMA_CUSTOMERS).execute(&self.pool).await?;
        sqlx::query(SCHEMA_USERS).execute(&self.pool).await?;
        sqlx::query(SCHEMA_ACTIVE_CONNECTIONS).execute(&self.pool).await?;
        sqlx::query(SCHEMA_CONNECTION_EVENTS).execute(&self.pool).await?;
        sqlx::query(SCHEMA_CREDENTIALS).execute(&self.pool).await?;
        sqlx::query(SCHEMA_CREDENTIAL_AUDITS).execute(&self.pool).await?;
        sqlx::query(SCHEMA_SSO_CONFIGS).execute(&self.pool).await?;
        sqlx::query(SCHEMA_SSO_SESSIONS).execute(&self.pool).await?;
        Ok(())
    }
}

const SCHEMA_SERVICE_INTEGRATORS: &str = r#"
CREATE TABLE IF NOT EXISTS service_integrators (
    id UUID PRIMARY KEY,
    company_name TEXT NOT NULL,
    contact_email TEXT NOT NULL,
    billing_email TEXT NOT NULL,
    master_license_key TEXT NOT NULL UNIQUE,
    white_label_config JSONB,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)"#;

const SCHEMA_THEMES: &str = r#"
CREATE TABLE IF NOT EXISTS themes (
    id UUID PRIMARY KEY,
    service_integrator_id UUID NOT NULL REFERENCES service_integrators(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    display_name TEXT NOT NULL,
    primary_color TEXT NOT NULL,
    secondary_color TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT false,
    is_default BOOLEAN NOT NULL DEFAULT false,
    blob JSONB NOT NULL,
    UNIQUE (service_integrator_id, key)
)"#;

const SCHEMA_CUSTOMERS: &str = r#"
CREATE TABLE IF NOT EXISTS customers (
    id UUID PRIMARY KEY,
    service_integrator_id UUID NOT NULL REFERENCES service_integrators(id) ON DELETE CASCADE,
    display_name TEXT NOT NULL,
    contact_email TEXT NOT NULL,
    license_key TEXT NOT NULL UNIQUE,
    theme_id UUID REFERENCES themes(id),
    developer_seats INTEGER NOT NULL DEFAULT -1,
    stakeholder_seats INTEGER NOT NULL DEFAULT -1,
    active_developer_seats INTEGER NOT NULL DEFAULT 0,
    active_stakeholder_seats INTEGER NOT NULL DEFAULT 0,
    seat_limits_enforced BOOLEAN NOT NULL DEFAULT true,
    status TEXT NOT NULL DEFAULT 'active',
    api_call_count BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)"#;

const SCHEMA_USERS: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user_id TEXT NOT NULL,
    customer_id UUID REFERENCES customers(id) ON DELETE CASCADE,
    service_integrator_id UUID REFERENCES service_integrators(id) ON DELETE CASCADE,
    raw_machine_id TEXT,
    display_name TEXT,
    email TEXT,
    role TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    last_login_at TIMESTAMPTZ,
    last_seen_ip TEXT,
    last_seen_ua TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CHECK ((customer_id IS NULL) <> (service_integrator_id IS NULL)),
    PRIMARY KEY (user_id, customer_id, service_integrator_id)
)"#;

const SCHEMA_ACTIVE_CONNECTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS active_connections (
    connection_id UUID NOT NULL,
    customer_id UUID NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    ip TEXT,
    user_agent TEXT,
    connected_at TIMESTAMPTZ NOT NULL,
    last_seen TIMESTAMPTZ NOT NULL,
    jwt_hash TEXT,
    PRIMARY KEY (customer_id, user_id, role)
)"#;

const SCHEMA_CONNECTION_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS connection_events (
    id UUID PRIMARY KEY,
    customer_id UUID NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    event TEXT NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL DEFAULT now(),
    ip TEXT,
    error_message TEXT,
    seat_limit INTEGER,
    active_count INTEGER
)"#;

const SCHEMA_CREDENTIALS: &str = r#"
CREATE TABLE IF NOT EXISTS credentials (
    id UUID PRIMARY KEY,
    owner_customer_id UUID REFERENCES customers(id) ON DELETE CASCADE,
    owner_si_id UUID REFERENCES service_integrators(id) ON DELETE CASCADE,
    service_type TEXT NOT NULL,
    credential_type TEXT NOT NULL,
    access_token_enc TEXT,
    refresh_token_enc TEXT,
    api_token_enc TEXT,
    password_enc TEXT,
    base_url TEXT,
    username_or_email TEXT,
    client_id TEXT,
    scope TEXT,
    token_type TEXT,
    expires_at TIMESTAMPTZ,
    enabled BOOLEAN NOT NULL DEFAULT true,
    last_test_status TEXT NOT NULL DEFAULT 'untested',
    last_test_message TEXT,
    last_used TIMESTAMPTZ,
    last_refreshed TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CHECK ((owner_customer_id IS NULL) <> (owner_si_id IS NULL)),
    UNIQUE (owner_customer_id, service_type),
    UNIQUE (owner_si_id, service_type)
)"#;

const SCHEMA_CREDENTIAL_AUDITS: &str = r#"
CREATE TABLE IF NOT EXISTS credential_audits (
    id UUID PRIMARY KEY,
    credential_id UUID NOT NULL REFERENCES credentials(id) ON DELETE CASCADE,
    event TEXT NOT NULL,
    success BOOLEAN NOT NULL,
    error_message TEXT,
    timestamp TIMESTAMPTZ NOT NULL DEFAULT now()
)"#;

const SCHEMA_SSO_CONFIGS: &str = r#"
CREATE TABLE IF NOT EXISTS sso_configs (
    customer_id UUID PRIMARY KEY REFERENCES customers(id) ON DELETE CASCADE,
    entry_point TEXT NOT NULL,
    issuer TEXT NOT NULL,
    idp_certificate TEXT NOT NULL,
    acs_url TEXT NOT NULL,
    logout_url TEXT,
    name_id_format TEXT NOT NULL,
    signing_enabled BOOLEAN NOT NULL DEFAULT true,
    attribute_mapping JSONB NOT NULL DEFAULT '{}'
)"#;

const SCHEMA_SSO_SESSIONS: &str = r#"
CREATE TABLE IF NOT EXISTS sso_sessions (
    id UUID PRIMARY KEY,
    customer_id UUID NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
    upstream_user_id TEXT NOT NULL,
    email TEXT,
    display_name TEXT,
    jwt TEXT NOT NULL,
    name_id TEXT NOT NULL,
    session_index TEXT,
    ip TEXT,
    user_agent TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    expires_at TIMESTAMPTZ NOT NULL,
    last_activity TIMESTAMPTZ NOT NULL DEFAULT now()
)"#;
