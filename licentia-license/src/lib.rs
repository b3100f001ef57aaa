//! License-key grammar: parsing, generation, and checksum validation.
//!
//! Two wire formats share a prefix:
//!
//! ```text
//! SNOW-<TIER>-<ORG>-<DEV>/<STAKE>-<YYYYMMDD>-<CHECKSUM>   (seat-based)
//! SNOW-<TIER>-<ORG>-<YYYYMMDD>-<CHECKSUM>                 (legacy, unlimited)
//! ```
//!
//! plus a family of opaque administrative keys (`SNOW-ENT-CUST-XXXXXX`,
//! `SNOW-SI-...`) used for seed data and SI/admin bootstrap, which carry no
//! seat information and skip the checksum check entirely.

use chrono::{NaiveDate, Utc};
use licentia_crypto::hmac_sha256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LicenseError {
    #[error("license key is malformed")]
    LicenseMalformed,
    #[error("license checksum is invalid")]
    LicenseChecksumInvalid,
    #[error("license expired")]
    LicenseExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    Team,
    Pro,
    Ent,
}

impl Tier {
    fn parse(raw: &str) -> Option<Tier> {
        match raw {
            "TEAM" => Some(Tier::Team),
            "PRO" | "PROFESSIONAL" => Some(Tier::Pro),
            "ENT" | "ENTERPRISE" => Some(Tier::Ent),
            _ => None,
        }
    }
}

/// Per `§9`, unlimited seats are a distinct variant, not a `-1` sentinel.
/// The sentinel only exists at the storage/wire boundary; see
/// [`SeatLimit::to_storage`] / [`SeatLimit::from_storage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeatLimit {
    Unlimited,
    Limited(u32),
}

impl SeatLimit {
    pub fn to_storage(self) -> i32 {
        match self {
            SeatLimit::Unlimited => -1,
            SeatLimit::Limited(n) => n as i32,
        }
    }

    pub fn from_storage(v: i32) -> Self {
        if v < 0 {
            SeatLimit::Unlimited
        } else {
            SeatLimit::Limited(v as u32)
        }
    }

    pub fn gates_admission(self) -> bool {
        matches!(self, SeatLimit::Limited(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LicenseFormat {
    SeatBased,
    Legacy,
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLicense {
    pub tier: Tier,
    pub org: String,
    pub developer_seats: SeatLimit,
    pub stakeholder_seats: SeatLimit,
    /// `None` for opaque administrative keys, which carry no expiry.
    pub expires_at: Option<NaiveDate>,
    pub format: LicenseFormat,
}

pub struct GenerateOptions {
    pub tier: Tier,
    pub org: String,
    pub dev_seats: SeatLimit,
    pub stake_seats: SeatLimit,
    pub expires_at: NaiveDate,
}

fn tier_str(tier: Tier) -> &'static str {
    match tier {
        Tier::Team => "TEAM",
        Tier::Pro => "PRO",
        Tier::Ent => "ENT",
    }
}

fn normalize_org(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn checksum(base_key: &str, license_secret: &[u8]) -> String {
    let digest = hmac_sha256(base_key.as_bytes(), license_secret);
    licentia_crypto::hex_encode(&digest[..4]).to_uppercase()
}

fn is_opaque_customer_key(key: &str) -> bool {
    match key.strip_prefix("SNOW-ENT-CUST-") {
        Some(rest) => rest.len() == 6 && rest.chars().all(|c| c.is_uppercase_or_digit()),
        None => false,
    }
}

trait UppercaseOrDigit {
    fn is_uppercase_or_digit(&self) -> bool;
}
impl UppercaseOrDigit for char {
    fn is_uppercase_or_digit(&self) -> bool {
        self.is_ascii_digit() || self.is_ascii_uppercase()
    }
}

fn is_opaque_si_key(key: &str) -> bool {
    match key.strip_prefix("SNOW-SI-") {
        Some(rest) => !rest.is_empty() && rest.len() <= 20 && rest.chars().all(|c| c.is_ascii_alphanumeric()),
        None => false,
    }
}

/// Parses a license key. `enforce_expiry` controls whether an expired
/// seat-based/legacy key fails with [`LicenseError::LicenseExpired`] or is
/// returned as-is for the caller to inspect (e.g. an admin "show license
/// details" endpoint that displays expired licenses rather than rejecting
/// them outright).
pub fn parse(key: &str, license_secret: &[u8], enforce_expiry: bool) -> Result<ParsedLicense, LicenseError> {
    if is_opaque_customer_key(key) || is_opaque_si_key(key) {
        let org = key
            .strip_prefix("SNOW-ENT-CUST-")
            .or_else(|| key.strip_prefix("SNOW-SI-"))
            .unwrap_or_default()
            .to_string();
        return Ok(ParsedLicense {
            tier: Tier::Ent,
            org,
            developer_seats: SeatLimit::Unlimited,
            stakeholder_seats: SeatLimit::Unlimited,
            expires_at: None,
            format: LicenseFormat::Opaque,
        });
    }

    let segments: Vec<&str> = key.split('-').collect();
    let (tier_raw, org_raw, seat_field, date_raw, checksum_raw, format) = match segments.as_slice() {
        ["SNOW", tier, org, seats, date, sum] => (*tier, *org, Some(*seats), *date, *sum, LicenseFormat::SeatBased),
        ["SNOW", tier, org, date, sum] => (*tier, *org, None, *date, *sum, LicenseFormat::Legacy),
        _ => return Err(LicenseError::LicenseMalformed),
    };

    let tier = Tier::parse(tier_raw).ok_or(LicenseError::LicenseMalformed)?;
    if org_raw.is_empty() || !org_raw.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(LicenseError::LicenseMalformed);
    }

    let (developer_seats, stakeholder_seats) = match seat_field {
        Some(field) => {
            let (dev, stake) = field.split_once('/').ok_or(LicenseError::LicenseMalformed)?;
            (parse_seat_count(dev)?, parse_seat_count(stake)?)
        }
        None => (SeatLimit::Unlimited, SeatLimit::Unlimited),
    };

    let expires_at = parse_date(date_raw)?;

    let base_key = key.rsplit_once('-').ok_or(LicenseError::LicenseMalformed)?.0;
    let expected = checksum(base_key, license_secret);
    if !checksum_raw.eq_ignore_ascii_case(&expected) {
        return Err(LicenseError::LicenseChecksumInvalid);
    }

    if enforce_expiry {
        let today = Utc::now().date_naive();
        if today > expires_at {
            return Err(LicenseError::LicenseExpired);
        }
    }

    Ok(ParsedLicense {
        tier,
        org: org_raw.to_string(),
        developer_seats,
        stakeholder_seats,
        expires_at: Some(expires_at),
        format,
    })
}

fn parse_seat_count(raw: &str) -> Result<SeatLimit, LicenseError> {
    let n: u32 = raw.parse().map_err(|_| LicenseError::LicenseMalformed)?;
    Ok(if n == 0 { SeatLimit::Unlimited } else { SeatLimit::Limited(n) })
}

fn parse_date(raw: &str) -> Result<NaiveDate, LicenseError> {
    if raw.len() != 8 {
        return Err(LicenseError::LicenseMalformed);
    }
    let year: i32 = raw[0..4].parse().map_err(|_| LicenseError::LicenseMalformed)?;
    let month: u32 = raw[4..6].parse().map_err(|_| LicenseError::LicenseMalformed)?;
    let day: u32 = raw[6..8].parse().map_err(|_| LicenseError::LicenseMalformed)?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or(LicenseError::LicenseMalformed)
}

/// Generates a seat-based key that round-trips through [`parse`].
pub fn generate(opts: GenerateOptions, license_secret: &[u8]) -> Result<String, LicenseError> {
    let today = Utc::now().date_naive();
    if opts.expires_at < today {
        return Err(LicenseError::LicenseMalformed);
    }
    if opts.expires_at > today + chrono::Duration::days(365 * 10) {
        return Err(LicenseError::LicenseMalformed);
    }

    let org = normalize_org(&opts.org);
    if org.is_empty() {
        return Err(LicenseError::LicenseMalformed);
    }

    let dev = match opts.dev_seats {
        SeatLimit::Unlimited => 0,
        SeatLimit::Limited(n) => n,
    };
    let stake = match opts.stake_seats {
        SeatLimit::Unlimited => 0,
        SeatLimit::Limited(n) => n,
    };

    let date_str = opts.expires_at.format("%Y%m%d").to_string();
    let base_key = format!("SNOW-{}-{}-{}/{}-{}", tier_str(opts.tier), org, dev, stake, date_str);
    let sum = checksum(&base_key, license_secret);
    Ok(format!("{}-{}", base_key, sum))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-license-secret";

    fn future_date() -> NaiveDate {
        Utc::now().date_naive() + chrono::Duration::days(400)
    }

    #[test]
    fn generate_then_parse_round_trips() {
        let expires = future_date();
        let key = generate(
            GenerateOptions {
                tier: Tier::Ent,
                org: "Acme Corporation".into(),
                dev_seats: SeatLimit::Limited(10),
                stake_seats: SeatLimit::Limited(5),
                expires_at: expires,
            },
            SECRET,
        )
        .unwrap();

        assert!(key.starts_with("SNOW-ENT-ACMECORPORATION-10/5-"));

        let parsed = parse(&key, SECRET, false).unwrap();
        assert_eq!(parsed.tier, Tier::Ent);
        assert_eq!(parsed.org, "ACMECORPORATION");
        assert_eq!(parsed.developer_seats, SeatLimit::Limited(10));
        assert_eq!(parsed.stakeholder_seats, SeatLimit::Limited(5));
        assert_eq!(parsed.expires_at, Some(expires));
        assert_eq!(parsed.format, LicenseFormat::SeatBased);
    }

    #[test]
    fn flipped_checksum_char_is_rejected() {
        let key = generate(
            GenerateOptions {
                tier: Tier::Pro,
                org: "Globex".into(),
                dev_seats: SeatLimit::Limited(3),
                stake_seats: SeatLimit::Unlimited,
                expires_at: future_date(),
            },
            SECRET,
        )
        .unwrap();

        let mut chars: Vec<char> = key.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '0' { '1' } else { '0' };
        let tampered: String = chars.into_iter().collect();

        assert_eq!(parse(&tampered, SECRET, false), Err(LicenseError::LicenseChecksumInvalid));
    }

    #[test]
    fn zero_seat_count_is_unlimited() {
        let key = generate(
            GenerateOptions {
                tier: Tier::Team,
                org: "Zero".into(),
                dev_seats: SeatLimit::Unlimited,
                stake_seats: SeatLimit::Unlimited,
                expires_at: future_date(),
            },
            SECRET,
        )
        .unwrap();
        let parsed = parse(&key, SECRET, false).unwrap();
        assert_eq!(parsed.developer_seats, SeatLimit::Unlimited);
        assert_eq!(parsed.stakeholder_seats, SeatLimit::Unlimited);
    }

    #[test]
    fn expired_key_rejected_only_when_enforced() {
        let past = Utc::now().date_naive() - chrono::Duration::days(1);
        let base_key = format!("SNOW-ENT-OLDCO-5/5-{}", past.format("%Y%m%d"));
        let sum = checksum(&base_key, SECRET);
        let key = format!("{}-{}", base_key, sum);

        assert!(parse(&key, SECRET, false).is_ok());
        assert_eq!(parse(&key, SECRET, true), Err(LicenseError::LicenseExpired));
    }

    #[test]
    fn opaque_customer_key_has_no_seats_and_no_checksum() {
        let parsed = parse("SNOW-ENT-CUST-AB12CD", b"irrelevant", true).unwrap();
        assert_eq!(parsed.format, LicenseFormat::Opaque);
        assert_eq!(parsed.developer_seats, SeatLimit::Unlimited);
        assert!(parsed.expires_at.is_none());
    }

    #[test]
    fn opaque_si_key_parses() {
        let parsed = parse("SNOW-SI-PARTNER01", b"irrelevant", true).unwrap();
        assert_eq!(parsed.format, LicenseFormat::Opaque);
    }

    #[test]
    fn legacy_format_is_unlimited() {
        let base_key = format!("SNOW-ENT-LEGACYCO-{}", future_date().format("%Y%m%d"));
        let sum = checksum(&base_key, SECRET);
        let key = format!("{}-{}", base_key, sum);
        let parsed = parse(&key, SECRET, false).unwrap();
        assert_eq!(parsed.format, LicenseFormat::Legacy);
        assert_eq!(parsed.developer_seats, SeatLimit::Unlimited);
    }

    #[test]
    fn seat_limit_storage_round_trip() {
        assert_eq!(SeatLimit::from_storage(SeatLimit::Unlimited.to_storage()), SeatLimit::Unlimited);
        assert_eq!(SeatLimit::from_storage(SeatLimit::Limited(7).to_storage()), SeatLimit::Limited(7));
    }
}
