//! Request authentication: bearer license keys for machine clients, SAML/JWT
//! sessions for admins, and the rate limiter shared by both (`SPEC_FULL.md`
//! §4.7).

pub mod machine;
pub mod rate_limit;
pub mod sso;

pub use machine::{MachineAuthError, MachineAuthenticator, MachinePrincipal};
pub use rate_limit::RateLimiter;
pub use sso::{SamlAssertion, SamlAssertionVerifier, SsoClaims, SsoError, SsoSessionManager, XmlAssertionVerifier};
