//! Shared serde helpers for configuration types

/// Serialize `Duration` as whole seconds
pub mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serialize `Duration` as milliseconds, for sub-second timeouts
pub mod duration_millis {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Optional `Duration` as whole seconds; absent means "no limit"
pub mod option_duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timeouts {
        #[serde(with = "duration_secs")]
        handshake: Duration,
        #[serde(with = "duration_millis")]
        host_keys: Duration,
        #[serde(default, with = "option_duration_secs")]
        idle: Option<Duration>,
    }

    #[test]
    fn test_serialize() {
        let t = Timeouts {
            handshake: Duration::from_secs(40),
            host_keys: Duration::from_millis(1500),
            idle: None,
        };
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, r#"{"handshake":40,"host_keys":1500,"idle":null}"#);
    }

    #[test]
    fn test_deserialize_with_missing_optional() {
        let t: Timeouts = serde_json::from_str(r#"{"handshake":5,"host_keys":250}"#).unwrap();
        assert_eq!(t.handshake, Duration::from_secs(5));
        assert_eq!(t.host_keys, Duration::from_millis(250));
        assert_eq!(t.idle, None);
    }
}
