//! Plain structs for the entities in the data model. Snake/camel translation
//! happens explicitly in each repository's row-mapping function, one line
//! per field — never via reflection (see `SPEC_FULL.md` §3.A / §9).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegratorStatus {
    Active,
    Suspended,
    Churned,
}

impl IntegratorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IntegratorStatus::Active => "active",
            IntegratorStatus::Suspended => "suspended",
            IntegratorStatus::Churned => "churned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(IntegratorStatus::Active),
            "suspended" => Some(IntegratorStatus::Suspended),
            "churned" => Some(IntegratorStatus::Churned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceIntegrator {
    pub id: Uuid,
    pub company_name: String,
    pub contact_email: String,
    pub billing_email: String,
    pub master_license_key: String,
    pub white_label_config: Option<serde_json::Value>,
    pub status: IntegratorStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerStatus {
    Active,
    Suspended,
    Churned,
}

impl CustomerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CustomerStatus::Active => "active",
            CustomerStatus::Suspended => "suspended",
            CustomerStatus::Churned => "churned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(CustomerStatus::Active),
            "suspended" => Some(CustomerStatus::Suspended),
            "churned" => Some(CustomerStatus::Churned),
            _ => None,
        }
    }

    pub fn is_usable(self) -> bool {
        matches!(self, CustomerStatus::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub service_integrator_id: Uuid,
    pub display_name: String,
    pub contact_email: String,
    pub license_key: String,
    pub theme_id: Option<Uuid>,
    /// `-1` at the storage boundary means unlimited; callers should prefer
    /// `licentia_license::SeatLimit::from_storage` over reading this raw.
    pub developer_seats: i32,
    pub stakeholder_seats: i32,
    pub active_developer_seats: i32,
    pub active_stakeholder_seats: i32,
    pub seat_limits_enforced: bool,
    pub status: CustomerStatus,
    pub api_call_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Developer,
    Stakeholder,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Developer => "developer",
            Role::Stakeholder => "stakeholder",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "developer" => Some(Role::Developer),
            "stakeholder" => Some(Role::Stakeholder),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserStatus {
    Active,
    Inactive,
    Suspended,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(UserStatus::Active),
            "inactive" => Some(UserStatus::Inactive),
            "suspended" => Some(UserStatus::Suspended),
            _ => None,
        }
    }
}

/// Exactly one of `customer_id` / `service_integrator_id` is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub customer_id: Option<Uuid>,
    pub service_integrator_id: Option<Uuid>,
    pub raw_machine_id: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_seen_ip: Option<String>,
    pub last_seen_ua: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveConnection {
    pub connection_id: Uuid,
    pub customer_id: Uuid,
    pub user_id: String,
    pub role: Role,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub jwt_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEventKind {
    Connect,
    Disconnect,
    Heartbeat,
    Timeout,
    Rejected,
}

impl ConnectionEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionEventKind::Connect => "connect",
            ConnectionEventKind::Disconnect => "disconnect",
            ConnectionEventKind::Heartbeat => "heartbeat",
            ConnectionEventKind::Timeout => "timeout",
            ConnectionEventKind::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub user_id: String,
    pub role: Role,
    pub event: ConnectionEventKind,
    pub timestamp: DateTime<Utc>,
    pub ip: Option<String>,
    pub error_message: Option<String>,
    pub seat_limit: Option<i32>,
    pub active_count: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialType {
    OAuth2,
    ApiToken,
    BasicAuth,
    Pat,
}

impl CredentialType {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialType::OAuth2 => "oauth2",
            CredentialType::ApiToken => "api_token",
            CredentialType::BasicAuth => "basic_auth",
            CredentialType::Pat => "pat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "oauth2" => Some(CredentialType::OAuth2),
            "api_token" => Some(CredentialType::ApiToken),
            "basic_auth" => Some(CredentialType::BasicAuth),
            "pat" => Some(CredentialType::Pat),
            _ => None,
        }
    }
}

/// Owner of a credential row: either a customer or a service integrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialOwner {
    Customer(Uuid),
    ServiceIntegrator(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestStatus {
    Untested,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    pub owner: CredentialOwner,
    pub service_type: String,
    pub credential_type: CredentialType,
    /// Ciphertext blobs, in the wire format from `licentia-crypto`.
    pub access_token_enc: Option<String>,
    pub refresh_token_enc: Option<String>,
    pub api_token_enc: Option<String>,
    pub password_enc: Option<String>,
    pub base_url: Option<String>,
    pub username_or_email: Option<String>,
    pub client_id: Option<String>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub last_test_status: TestStatus,
    pub last_test_message: Option<String>,
    pub last_used: Option<DateTime<Utc>>,
    pub last_refreshed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialAuditKind {
    Created,
    Updated,
    Accessed,
    Deleted,
    Tested,
    Refreshed,
}

impl CredentialAuditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialAuditKind::Created => "created",
            CredentialAuditKind::Updated => "updated",
            CredentialAuditKind::Accessed => "accessed",
            CredentialAuditKind::Deleted => "deleted",
            CredentialAuditKind::Tested => "tested",
            CredentialAuditKind::Refreshed => "refreshed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialAudit {
    pub id: Uuid,
    pub credential_id: Uuid,
    pub event: CredentialAuditKind,
    pub success: bool,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsoConfig {
    pub customer_id: Uuid,
    pub entry_point: String,
    pub issuer: String,
    pub idp_certificate: String,
    pub acs_url: String,
    pub logout_url: Option<String>,
    pub name_id_format: String,
    pub signing_enabled: bool,
    pub attribute_mapping: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsoSession {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub upstream_user_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub jwt: String,
    pub name_id: String,
    pub session_index: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Theme {
    pub id: Uuid,
    pub service_integrator_id: Uuid,
    pub key: String,
    pub display_name: String,
    pub primary_color: String,
    pub secondary_color: String,
    pub is_active: bool,
    pub is_default: bool,
    pub blob: serde_json::Value,
}

pub fn past_expiry(expires_at: NaiveDate, now: DateTime<Utc>) -> bool {
    now.date_naive() > expires_at
}
