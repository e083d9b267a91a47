//! Serde helpers for configuration files

/// `Duration` as a number of seconds.
///
/// Whole durations are written as integers; sub-second timeouts are written
/// and read as fractions (`timeout = 0.5`). Negative or non-finite values are
/// rejected.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Limits {
///     #[serde(with = "herd_core::config::serde_utils::duration_secs")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_secs {
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_u64(duration.as_secs())
        } else {
            serializer.serialize_f64(duration.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(SecondsVisitor)
    }

    struct SecondsVisitor;

    impl<'de> Visitor<'de> for SecondsVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative number of seconds")
        }

        fn visit_u64<E: de::Error>(self, secs: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(secs))
        }

        fn visit_i64<E: de::Error>(self, secs: i64) -> Result<Duration, E> {
            u64::try_from(secs)
                .map(Duration::from_secs)
                .map_err(|_| E::invalid_value(de::Unexpected::Signed(secs), &self))
        }

        fn visit_f64<E: de::Error>(self, secs: f64) -> Result<Duration, E> {
            Duration::try_from_secs_f64(secs)
                .map_err(|_| E::invalid_value(de::Unexpected::Float(secs), &self))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Limits {
        #[serde(with = "duration_secs")]
        timeout: Duration,
    }

    #[test]
    fn test_whole_seconds() {
        let limits: Limits = toml::from_str("timeout = 90").unwrap();
        assert_eq!(limits.timeout, Duration::from_secs(90));
        assert_eq!(toml::to_string(&limits).unwrap().trim(), "timeout = 90");
    }

    #[test]
    fn test_fractional_seconds() {
        let limits: Limits = toml::from_str("timeout = 0.25").unwrap();
        assert_eq!(limits.timeout, Duration::from_millis(250));
        let json = serde_json::to_string(&limits).unwrap();
        assert_eq!(json, r#"{"timeout":0.25}"#);
    }

    #[test]
    fn test_negative_rejected() {
        assert!(toml::from_str::<Limits>("timeout = -1").is_err());
        assert!(toml::from_str::<Limits>("timeout = -0.5").is_err());
        assert!(toml::from_str::<Limits>("timeout = \"soon\"").is_err());
    }
}
