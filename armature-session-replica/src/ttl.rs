//! Session expiration policy and resolution.

use crate::error::{StoreError, StoreResult};
use crate::traits::SessionRecord;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// TTL used when the policy derives the TTL and the session carries no hint.
pub const DEFAULT_TTL_SECS: u64 = 86_400;

/// Store-wide TTL policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TtlPolicy {
    /// Derive the TTL from each session's cookie lifetime
    #[default]
    Derive,
    /// Never set an expiration
    Disabled,
    /// Always expire after this many seconds
    Fixed(u64),
}

/// Effective expiration for one write or touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// No expiration
    Disabled,
    /// Expire after this many seconds
    Seconds(u64),
}

impl Ttl {
    /// Seconds until expiry, or `None` when disabled.
    pub fn as_secs(self) -> Option<u64> {
        match self {
            Ttl::Disabled => None,
            Ttl::Seconds(secs) => Some(secs),
        }
    }
}

impl TtlPolicy {
    /// Resolve the TTL for `session`.
    ///
    /// An explicit policy wins without looking at the session. A derived TTL
    /// is the cookie's `maxAge` floored to whole seconds, or one day when the
    /// session has no usable hint; it is never [`Ttl::Disabled`].
    pub fn resolve<S: SessionRecord + ?Sized>(self, session: &S) -> Ttl {
        match self {
            TtlPolicy::Disabled => Ttl::Disabled,
            TtlPolicy::Fixed(secs) => Ttl::Seconds(secs),
            TtlPolicy::Derive => match session.max_age_ms() {
                Some(ms) => Ttl::Seconds(ms.div_euclid(1000).max(0) as u64),
                None => Ttl::Seconds(DEFAULT_TTL_SECS),
            },
        }
    }

    /// Parse the loose configuration form: `null` derives, `false` disables,
    /// a non-negative integer is a fixed TTL in seconds.
    pub fn from_value(value: &Value) -> StoreResult<Self> {
        match value {
            Value::Null => Ok(TtlPolicy::Derive),
            Value::Bool(false) => Ok(TtlPolicy::Disabled),
            Value::Number(n) => n.as_u64().map(TtlPolicy::Fixed).ok_or_else(|| {
                StoreError::Config(format!("ttl must be a non-negative integer, got {}", n))
            }),
            other => Err(StoreError::Config(format!(
                "ttl must be an integer, false or null, got {}",
                other
            ))),
        }
    }

    /// Parse the environment form: `derive`/`null`/empty, `false`/`disabled`,
    /// or an integer number of seconds.
    pub fn parse(s: &str) -> StoreResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "derive" | "null" => Ok(TtlPolicy::Derive),
            "false" | "disabled" => Ok(TtlPolicy::Disabled),
            other => other.parse().map(TtlPolicy::Fixed).map_err(|_| {
                StoreError::Config(format!("ttl must be an integer, false or null, got {:?}", s))
            }),
        }
    }

    fn to_value(self) -> Value {
        match self {
            TtlPolicy::Derive => Value::Null,
            TtlPolicy::Disabled => Value::Bool(false),
            TtlPolicy::Fixed(secs) => Value::from(secs),
        }
    }
}

impl Serialize for TtlPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TtlPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        TtlPolicy::from_value(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{Session, SessionCookie};
    use serde_json::json;

    #[test]
    fn test_derive_floors_max_age_to_seconds() {
        let session = Session::new(SessionCookie::with_max_age(2000));
        assert_eq!(TtlPolicy::Derive.resolve(&session), Ttl::Seconds(2));

        let session = Session::new(SessionCookie::with_max_age(2999));
        assert_eq!(TtlPolicy::Derive.resolve(&session), Ttl::Seconds(2));
    }

    #[test]
    fn test_derive_without_hint_uses_one_day() {
        assert_eq!(
            TtlPolicy::Derive.resolve(&Session::default()),
            Ttl::Seconds(DEFAULT_TTL_SECS)
        );
        assert_eq!(TtlPolicy::Derive.resolve(&json!({"bar": "baz"})), Ttl::Seconds(86_400));
    }

    #[test]
    fn test_derive_never_disables() {
        let session = Session::new(SessionCookie::with_max_age(-5000));
        assert_eq!(TtlPolicy::Derive.resolve(&session), Ttl::Seconds(0));
    }

    #[test]
    fn test_explicit_policy_ignores_session() {
        let session = Session::new(SessionCookie::with_max_age(2000));
        assert_eq!(TtlPolicy::Fixed(60).resolve(&session), Ttl::Seconds(60));
        assert_eq!(TtlPolicy::Fixed(0).resolve(&session), Ttl::Seconds(0));
        assert_eq!(TtlPolicy::Disabled.resolve(&session), Ttl::Disabled);
        assert_eq!(Ttl::Disabled.as_secs(), None);
    }

    #[test]
    fn test_from_value() {
        assert_eq!(TtlPolicy::from_value(&json!(null)).unwrap(), TtlPolicy::Derive);
        assert_eq!(TtlPolicy::from_value(&json!(false)).unwrap(), TtlPolicy::Disabled);
        assert_eq!(TtlPolicy::from_value(&json!(300)).unwrap(), TtlPolicy::Fixed(300));

        for invalid in [json!(true), json!(-1), json!(1.5), json!("300"), json!({}), json!([])] {
            assert!(
                matches!(TtlPolicy::from_value(&invalid), Err(StoreError::Config(_))),
                "accepted {}",
                invalid
            );
        }
    }

    #[test]
    fn test_parse_env_form() {
        assert_eq!(TtlPolicy::parse("").unwrap(), TtlPolicy::Derive);
        assert_eq!(TtlPolicy::parse("derive").unwrap(), TtlPolicy::Derive);
        assert_eq!(TtlPolicy::parse("FALSE").unwrap(), TtlPolicy::Disabled);
        assert_eq!(TtlPolicy::parse(" 3600 ").unwrap(), TtlPolicy::Fixed(3600));
        assert!(TtlPolicy::parse("-1").is_err());
        assert!(TtlPolicy::parse("soon").is_err());
    }

    #[test]
    fn test_serde_round_trip_uses_loose_form() {
        assert_eq!(serde_json::to_value(TtlPolicy::Disabled).unwrap(), json!(false));
        let policy: TtlPolicy = serde_json::from_value(json!(120)).unwrap();
        assert_eq!(policy, TtlPolicy::Fixed(120));
        assert!(serde_json::from_value::<TtlPolicy>(json!(true)).is_err());
    }
}
