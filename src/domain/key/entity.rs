//! Key entity and refill configuration

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::id::{ApiId, IdentityId, KeyId};
use crate::domain::ratelimit::RatelimitRule;

/// How often a key's usage counter is restored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefillInterval {
    /// Every day at 00:00 UTC
    Daily,
    /// Once a month on `refill_day`
    Monthly,
}

impl std::fmt::Display for RefillInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Monthly => write!(f, "monthly"),
        }
    }
}

impl std::str::FromStr for RefillInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Self::Daily),
            "monthly" => Ok(Self::Monthly),
            other => Err(format!("Unknown refill interval '{}'", other)),
        }
    }
}

/// Periodic restoration of `remaining` to a fixed amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Refill {
    pub interval: RefillInterval,
    pub amount: i64,
    /// Day of month for monthly refills (1-31, clamped to the month length)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refill_day: Option<u32>,
}

impl Refill {
    pub fn daily(amount: i64) -> Self {
        Self {
            interval: RefillInterval::Daily,
            amount,
            refill_day: None,
        }
    }

    pub fn monthly(amount: i64, refill_day: u32) -> Self {
        Self {
            interval: RefillInterval::Monthly,
            amount,
            refill_day: Some(refill_day),
        }
    }

    /// Start of the refill period containing `now`
    pub fn period_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();

        match self.interval {
            RefillInterval::Daily => midnight(today),
            RefillInterval::Monthly => {
                let wanted = self.refill_day.unwrap_or(1).clamp(1, 31);
                let this_month = refill_date(today.year(), today.month(), wanted);

                if today >= this_month {
                    midnight(this_month)
                } else {
                    let (year, month) = if today.month() == 1 {
                        (today.year() - 1, 12)
                    } else {
                        (today.year(), today.month() - 1)
                    };
                    midnight(refill_date(year, month, wanted))
                }
            }
        }
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

fn refill_date(year: i32, month: u32, day: u32) -> NaiveDate {
    let day = day.min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .map(|first| (first - Duration::days(1)).day())
        .unwrap_or(28)
}

/// A secret credential, stored only as a hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    id: KeyId,
    api_id: ApiId,
    /// Hash of the full secret
    hash: String,
    /// Visible prefix of the secret, safe to display
    start: String,
    name: Option<String>,
    owner_id: Option<String>,
    identity_id: Option<IdentityId>,
    meta: Map<String, Value>,
    /// Usage counter, `None` means unlimited
    remaining: Option<i64>,
    refill: Option<Refill>,
    last_refill_at: Option<DateTime<Utc>>,
    ratelimits: Vec<RatelimitRule>,
    permissions: Vec<String>,
    roles: Vec<String>,
    enabled: bool,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl Key {
    pub fn new(api_id: ApiId, hash: impl Into<String>, start: impl Into<String>) -> Self {
        let now = Utc::now();

        Self {
            id: KeyId::generate(),
            api_id,
            hash: hash.into(),
            start: start.into(),
            name: None,
            owner_id: None,
            identity_id: None,
            meta: Map::new(),
            remaining: None,
            refill: None,
            last_refill_at: None,
            ratelimits: Vec::new(),
            permissions: Vec::new(),
            roles: Vec::new(),
            enabled: true,
            expires_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    // Builder methods

    pub fn with_id(mut self, id: KeyId) -> Self {
        self.id = id;
        self
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn with_owner_id(mut self, owner_id: Option<String>) -> Self {
        self.owner_id = owner_id;
        self
    }

    pub fn with_identity(mut self, identity_id: Option<IdentityId>) -> Self {
        self.identity_id = identity_id;
        self
    }

    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_remaining(mut self, remaining: Option<i64>) -> Self {
        self.remaining = remaining;
        self
    }

    pub fn with_refill(mut self, refill: Option<Refill>) -> Self {
        self.refill = refill;
        self
    }

    pub fn with_last_refill_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.last_refill_at = at;
        self
    }

    pub fn with_ratelimits(mut self, ratelimits: Vec<RatelimitRule>) -> Self {
        self.ratelimits = ratelimits;
        self
    }

    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn with_timestamps(mut self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = updated_at;
        self
    }

    pub fn with_deleted_at(mut self, deleted_at: Option<DateTime<Utc>>) -> Self {
        self.deleted_at = deleted_at;
        self
    }

    // Getters

    pub fn id(&self) -> &KeyId {
        &self.id
    }

    pub fn api_id(&self) -> &ApiId {
        &self.api_id
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    pub fn identity_id(&self) -> Option<&IdentityId> {
        self.identity_id.as_ref()
    }

    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    pub fn remaining(&self) -> Option<i64> {
        self.remaining
    }

    pub fn refill(&self) -> Option<&Refill> {
        self.refill.as_ref()
    }

    pub fn last_refill_at(&self) -> Option<DateTime<Utc>> {
        self.last_refill_at
    }

    pub fn ratelimits(&self) -> &[RatelimitRule] {
        &self.ratelimits
    }

    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    // State checks

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// A key expires at the instant `expires_at` is reached
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_unlimited(&self) -> bool {
        self.remaining.is_none()
    }

    /// Start of the current refill period if the key has not been refilled in it yet
    pub fn refill_due(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let refill = self.refill?;
        let period_start = refill.period_start(now);
        let last = self.last_refill_at.unwrap_or(self.created_at);

        (last < period_start).then_some(period_start)
    }

    // Mutations

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
        self.touch();
    }

    pub fn set_owner_id(&mut self, owner_id: Option<String>) {
        self.owner_id = owner_id;
        self.touch();
    }

    pub fn set_identity_id(&mut self, identity_id: Option<IdentityId>) {
        self.identity_id = identity_id;
        self.touch();
    }

    pub fn set_meta(&mut self, meta: Map<String, Value>) {
        self.meta = meta;
        self.touch();
    }

    pub fn set_remaining(&mut self, remaining: Option<i64>) {
        self.remaining = remaining;
        self.touch();
    }

    pub fn set_refill(&mut self, refill: Option<Refill>) {
        self.refill = refill;
        self.touch();
    }

    pub fn set_ratelimits(&mut self, ratelimits: Vec<RatelimitRule>) {
        self.ratelimits = ratelimits;
        self.touch();
    }

    pub fn set_permissions(&mut self, permissions: Vec<String>) {
        self.permissions = permissions;
        self.touch();
    }

    pub fn set_roles(&mut self, roles: Vec<String>) {
        self.roles = roles;
        self.touch();
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.touch();
    }

    pub fn set_expires_at(&mut self, expires_at: Option<DateTime<Utc>>) {
        self.expires_at = expires_at;
        self.touch();
    }

    /// Restore `remaining` to the refill amount for the period starting at `at`
    pub fn apply_refill(&mut self, amount: i64, at: DateTime<Utc>) {
        self.remaining = Some(amount);
        self.last_refill_at = Some(at);
        self.touch();
    }

    pub fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.deleted_at = Some(at);
        self.updated_at = at;
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn api() -> ApiId {
        ApiId::new("api_test").unwrap()
    }

    #[test]
    fn test_new_key_defaults() {
        let key = Key::new(api(), "sha256$abc", "sk_abcd");

        assert!(key.id().as_str().starts_with("key_"));
        assert!(key.enabled());
        assert!(key.is_unlimited());
        assert!(!key.is_deleted());
        assert!(key.permissions().is_empty());
    }

    #[test]
    fn test_expiry_is_inclusive() {
        let now = at(2024, 5, 1, 12);
        let key = Key::new(api(), "h", "s").with_expires_at(Some(now));

        assert!(key.is_expired_at(now));
        assert!(!key.is_expired_at(now - Duration::seconds(1)));
    }

    #[test]
    fn test_daily_period_start() {
        let refill = Refill::daily(10);
        assert_eq!(refill.period_start(at(2024, 5, 17, 15)), at(2024, 5, 17, 0));
    }

    #[test]
    fn test_monthly_period_start() {
        let refill = Refill::monthly(100, 15);

        assert_eq!(refill.period_start(at(2024, 5, 20, 8)), at(2024, 5, 15, 0));
        assert_eq!(refill.period_start(at(2024, 5, 3, 8)), at(2024, 4, 15, 0));
        assert_eq!(refill.period_start(at(2024, 1, 3, 8)), at(2023, 12, 15, 0));
    }

    #[test]
    fn test_monthly_refill_day_clamped_to_month_length() {
        let refill = Refill::monthly(100, 31);

        assert_eq!(refill.period_start(at(2024, 2, 29, 8)), at(2024, 2, 29, 0));
        assert_eq!(refill.period_start(at(2024, 3, 5, 8)), at(2024, 2, 29, 0));
    }

    #[test]
    fn test_refill_due_once_per_period() {
        let created = at(2024, 5, 1, 10);
        let mut key = Key::new(api(), "h", "s")
            .with_remaining(Some(0))
            .with_refill(Some(Refill::daily(10)))
            .with_timestamps(created, created);

        assert_eq!(key.refill_due(at(2024, 5, 1, 23)), None);

        let next_day = at(2024, 5, 2, 9);
        let period = key.refill_due(next_day).unwrap();
        assert_eq!(period, at(2024, 5, 2, 0));

        key.apply_refill(10, next_day);
        assert_eq!(key.remaining(), Some(10));
        assert_eq!(key.refill_due(at(2024, 5, 2, 18)), None);
    }

    #[test]
    fn test_refill_interval_parse() {
        assert_eq!("daily".parse::<RefillInterval>().unwrap(), RefillInterval::Daily);
        assert!("weekly".parse::<RefillInterval>().is_err());
    }
}
