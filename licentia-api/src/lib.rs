//! Thin axum dispatch layer over the seat, vault, and auth cores.
//! Handlers extract, call a core method, map the error, and respond — no
//! business logic lives here (`SPEC_FULL.md` §6).

mod error;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose;
use base64::Engine as _;
use chrono::Utc;
use error::ApiError;
use licentia_auth::machine::MachineAuthenticator;
use licentia_auth::sso::{build_session_cookie, SsoSessionManager};
use licentia_auth::{SamlAssertionVerifier, SsoError};
use licentia_db::entities::{CredentialOwner, CredentialType, Role};
use licentia_db::Db;
use licentia_seats::{SeatManager, TryConnectRequest};
use licentia_vault::{NewCredentialInput, SecretInput, Vault};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Db>,
    pub seats: Arc<SeatManager>,
    pub vault: Arc<Vault>,
    pub machine_auth: Arc<MachineAuthenticator>,
    pub sso: Arc<SsoSessionManager>,
    pub saml_verifier: Arc<dyn SamlAssertionVerifier>,
    /// Out-of-band key granting unconditional admin-API access, for
    /// bootstrap and emergency access when no admin SSO session exists yet.
    pub admin_key: Arc<String>,
    pub cookie_secure: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/mcp/connect", post(mcp_connect))
        .route("/mcp/heartbeat", post(mcp_heartbeat))
        .route("/mcp/disconnect", post(mcp_disconnect))
        .route("/sso/login/:customerId", get(sso_login))
        .route("/sso/callback", post(sso_callback))
        .route("/sso/metadata/:customerId", get(sso_metadata))
        .route("/sso/logout", post(sso_logout))
        .route("/api/credentials/:service", get(get_credential).put(upsert_credential).delete(delete_credential))
        .route("/api/admin/customers", get(list_customers).post(create_customer))
        .route("/api/admin/service-integrators", post(create_service_integrator))
        .with_state(state)
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()
}

fn parse_role(raw: &str) -> Result<Role, ApiError> {
    Role::parse(raw).ok_or_else(|| ApiError::bad_request(format!("unknown role: {raw}")))
}

/// Byte-length- and content-blind to timing: every comparison walks both
/// slices fully regardless of where (or whether) they first differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Admin API gate: `ADMIN_KEY` bearer token or an admin SSO session JWT,
/// per the wire contract's "Admin key or admin JWT" (`SPEC_FULL.md` §6).
async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let token = bearer(headers).and_then(|h| h.strip_prefix("Bearer ")).ok_or(SsoError::SsoRequired)?;
    if constant_time_eq(token.as_bytes(), state.admin_key.as_bytes()) {
        return Ok(());
    }
    state.sso.require_sso_auth(token).await?;
    Ok(())
}

#[derive(Deserialize)]
struct McpConnectRequest {
    role: String,
    #[serde(rename = "userId")]
    user_id: String,
}

async fn mcp_connect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<McpConnectRequest>,
) -> Result<Json<Value>, ApiError> {
    let auth = bearer(&headers).ok_or(licentia_auth::MachineAuthError::MissingBearer)?;
    let principal = state.machine_auth.authenticate(auth).await?;
    let role = parse_role(&req.role)?;

    let result = state
        .seats
        .try_connect(TryConnectRequest {
            customer_id: principal.customer_id,
            user_id: req.user_id,
            role,
            ip: headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()).map(str::to_string),
            user_agent: headers.get(axum::http::header::USER_AGENT).and_then(|v| v.to_str().ok()).map(str::to_string),
            jwt_hash: None,
        })
        .await?;

    Ok(Json(json!({
        "connectionId": result.connection_id,
        "seatLimit": result.seat_limit,
        "active": result.active,
    })))
}

#[derive(Deserialize)]
struct McpHeartbeatRequest {
    role: String,
    #[serde(rename = "userId")]
    user_id: String,
}

async fn mcp_heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<McpHeartbeatRequest>,
) -> Result<Json<Value>, ApiError> {
    let auth = bearer(&headers).ok_or(licentia_auth::MachineAuthError::MissingBearer)?;
    let principal = state.machine_auth.authenticate(auth).await?;
    let role = parse_role(&req.role)?;
    let found = state.seats.heartbeat(principal.customer_id, &req.user_id, role).await?;
    Ok(Json(json!({ "ok": found })))
}

#[derive(Deserialize)]
struct McpDisconnectRequest {
    role: String,
    #[serde(rename = "userId")]
    user_id: String,
}

async fn mcp_disconnect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<McpDisconnectRequest>,
) -> Result<Json<Value>, ApiError> {
    let auth = bearer(&headers).ok_or(licentia_auth::MachineAuthError::MissingBearer)?;
    let principal = state.machine_auth.authenticate(auth).await?;
    let role = parse_role(&req.role)?;
    let ip = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok());
    let existed = state.seats.disconnect(principal.customer_id, &req.user_id, role, ip).await?;
    Ok(Json(json!({ "ok": existed })))
}

/// SP-initiated SAML: looks up the customer's `SsoConfig` and redirects the
/// browser to the IdP's entry point with a minimal base64url-encoded
/// AuthnRequest.
async fn sso_login(State(state): State<AppState>, Path(customer_id): Path<Uuid>) -> Result<Response, ApiError> {
    let config = state.db.get_sso_config(customer_id).await?;
    let request_id = format!("_{}", Uuid::new_v4());
    let authn_request = format!(
        r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{request_id}" Version="2.0" IssueInstant="{issue_instant}" Destination="{destination}" AssertionConsumerServiceURL="{acs}"><saml:Issuer>{issuer}</saml:Issuer></samlp:AuthnRequest>"#,
        request_id = request_id,
        issue_instant = Utc::now().to_rfc3339(),
        destination = config.entry_point,
        acs = config.acs_url,
        issuer = config.issuer,
    );
    let encoded = general_purpose::URL_SAFE_NO_PAD.encode(authn_request);
    let location = format!("{}?SAMLRequest={}", config.entry_point, encoded);
    Ok(Redirect::to(&location).into_response())
}

#[derive(Deserialize)]
struct SsoCallbackRequest {
    #[serde(rename = "customerId")]
    customer_id: Uuid,
    #[serde(rename = "SAMLResponse")]
    saml_response: String,
}

/// Validates the signed assertion against the customer's `SsoConfig.cert`,
/// mints the session JWT via `SsoSessionManager::establish`, and sets the
/// `sso_token` cookie on the response.
async fn sso_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SsoCallbackRequest>,
) -> Result<Response, ApiError> {
    let config = state.db.get_sso_config(req.customer_id).await?;
    let raw = general_purpose::STANDARD
        .decode(&req.saml_response)
        .map_err(|_| SsoError::AssertionInvalid("malformed SAMLResponse encoding".into()))?;
    let raw = String::from_utf8(raw).map_err(|_| SsoError::AssertionInvalid("assertion is not valid utf-8".into()))?;
    let assertion = state.saml_verifier.verify(&raw, &config.idp_certificate)?;

    let ip = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok());
    let user_agent = headers.get(axum::http::header::USER_AGENT).and_then(|v| v.to_str().ok());
    let (jwt, _session) = state.sso.establish(req.customer_id, &assertion, ip, user_agent).await?;

    let cookie = build_session_cookie(&jwt, state.cookie_secure);
    let mut response = Json(json!({ "ok": true })).into_response();
    let cookie_value = HeaderValue::from_str(&cookie).map_err(|_| ApiError::bad_request("session cookie was not valid"))?;
    response.headers_mut().insert(axum::http::header::SET_COOKIE, cookie_value);
    Ok(response)
}

/// Static SP metadata XML for this customer's SAML relying-party config.
async fn sso_metadata(State(state): State<AppState>, Path(customer_id): Path<Uuid>) -> Result<Response, ApiError> {
    let config = state.db.get_sso_config(customer_id).await?;
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{issuer}"><md:SPSSODescriptor AuthnRequestsSigned="false" WantAssertionsSigned="true" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol"><md:NameIDFormat>{name_id_format}</md:NameIDFormat><md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="{acs}" index="0"/></md:SPSSODescriptor></md:EntityDescriptor>"#,
        issuer = config.issuer,
        name_id_format = config.name_id_format,
        acs = config.acs_url,
    );
    Ok(([(axum::http::header::CONTENT_TYPE, "application/xml")], xml).into_response())
}

async fn sso_logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    let token = bearer(&headers).and_then(|h| h.strip_prefix("Bearer ")).ok_or(SsoError::SsoRequired)?;
    let (_, session) = state.sso.require_sso_auth(token).await?;
    state.sso.logout(session.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct CredentialResponse {
    id: Uuid,
    #[serde(rename = "serviceType")]
    service_type: String,
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
    enabled: bool,
}

async fn get_credential(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(service): Path<String>,
) -> Result<Json<CredentialResponse>, ApiError> {
    let token = bearer(&headers).and_then(|h| h.strip_prefix("Bearer ")).ok_or(licentia_auth::sso::SsoError::SsoRequired)?;
    let (claims, _) = state.sso.require_sso_auth(token).await?;

    let view = state.vault.get(CredentialOwner::Customer(claims.customer_id), &service).await?;
    let access_token = match view.access_token {
        licentia_vault::SecretField::Present(v) => Some(v),
        _ => None,
    };
    Ok(Json(CredentialResponse { id: view.id, service_type: view.service_type, access_token, enabled: view.enabled }))
}

#[derive(Deserialize)]
struct UpsertCredentialRequest {
    #[serde(rename = "credentialType")]
    credential_type: String,
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
    #[serde(rename = "refreshToken")]
    refresh_token: Option<String>,
}

async fn upsert_credential(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(service): Path<String>,
    Json(req): Json<UpsertCredentialRequest>,
) -> Result<StatusCode, ApiError> {
    let token = bearer(&headers).and_then(|h| h.strip_prefix("Bearer ")).ok_or(licentia_auth::sso::SsoError::SsoRequired)?;
    let (claims, _) = state.sso.require_sso_auth(token).await?;

    let credential_type = CredentialType::parse(&req.credential_type).unwrap_or(CredentialType::ApiToken);
    state
        .vault
        .create(NewCredentialInput {
            owner: CredentialOwner::Customer(claims.customer_id),
            service_type: &service,
            credential_type,
            secrets: SecretInput { access_token: req.access_token, refresh_token: req.refresh_token, ..Default::default() },
            base_url: None,
            username_or_email: None,
            client_id: None,
            scope: None,
            token_type: None,
            expires_at: None,
        })
        .await?;
    Ok(StatusCode::CREATED)
}

async fn delete_credential(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(service): Path<String>,
) -> Result<StatusCode, ApiError> {
    let token = bearer(&headers).and_then(|h| h.strip_prefix("Bearer ")).ok_or(licentia_auth::sso::SsoError::SsoRequired)?;
    let (claims, _) = state.sso.require_sso_auth(token).await?;
    let view = state.vault.get(CredentialOwner::Customer(claims.customer_id), &service).await?;
    state.vault.delete(view.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct CreateCustomerRequest {
    #[serde(rename = "serviceIntegratorId")]
    service_integrator_id: Uuid,
    #[serde(rename = "displayName")]
    display_name: String,
    #[serde(rename = "contactEmail")]
    contact_email: String,
    #[serde(rename = "licenseKey")]
    license_key: String,
    #[serde(rename = "developerSeats")]
    developer_seats: i32,
    #[serde(rename = "stakeholderSeats")]
    stakeholder_seats: i32,
}

async fn create_customer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateCustomerRequest>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    // Referential check: fail fast on an unknown integrator rather than
    // leaving an orphaned customer row for a foreign key to catch later.
    state.db.get_service_integrator(req.service_integrator_id).await?;

    let customer = state
        .db
        .create_customer(
            req.service_integrator_id,
            &req.display_name,
            &req.contact_email,
            &req.license_key,
            req.developer_seats,
            req.stakeholder_seats,
            true,
        )
        .await?;
    Ok(Json(json!({ "id": customer.id, "createdAt": customer.created_at })))
}

async fn list_customers(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    let customers = state.db.list_customers(100, 0).await?;
    let ids: Vec<Uuid> = customers.iter().map(|c| c.id).collect();
    Ok(Json(json!({ "customerIds": ids })))
}

#[derive(Deserialize)]
struct CreateServiceIntegratorRequest {
    #[serde(rename = "companyName")]
    company_name: String,
    #[serde(rename = "contactEmail")]
    contact_email: String,
    #[serde(rename = "billingEmail")]
    billing_email: String,
    #[serde(rename = "masterLicenseKey")]
    master_license_key: String,
}

async fn create_service_integrator(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateServiceIntegratorRequest>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers).await?;
    if state.db.get_service_integrator_by_key(&req.master_license_key).await.is_ok() {
        return Err(ApiError::bad_request("master license key already in use"));
    }
    let si = state
        .db
        .create_service_integrator(&req.company_name, &req.contact_email, &req.billing_email, &req.master_license_key)
        .await?;
    Ok(Json(json!({ "id": si.id, "createdAt": si.created_at })))
}
