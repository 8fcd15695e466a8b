use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Serializes Duration as float seconds, the unit used in config files
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    duration.as_secs_f64().serialize(serializer)
}

/// Deserializes Duration from seconds
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

/// Serializes SystemTime as seconds since UNIX_EPOCH
pub fn serialize_time<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let duration = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    duration.as_secs_f64().serialize(serializer)
}

/// Deserializes SystemTime from seconds since UNIX_EPOCH
pub fn deserialize_time<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    let duration = Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)?;
    Ok(UNIX_EPOCH + duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_as_epoch_seconds() {
        #[derive(Serialize, Deserialize)]
        struct Stamped {
            #[serde(serialize_with = "serialize_time")]
            #[serde(deserialize_with = "deserialize_time")]
            at: SystemTime,
        }

        let stamped = Stamped {
            at: UNIX_EPOCH + Duration::from_millis(1_500),
        };
        let json = serde_json::to_string(&stamped).unwrap();
        assert_eq!(json, r#"{"at":1.5}"#);

        let back: Stamped = serde_json::from_str(&json).unwrap();
        assert_eq!(back.at, stamped.at);
    }

    #[test]
    fn test_duration_rejects_negative() {
        #[derive(Deserialize)]
        struct Test {
            #[serde(deserialize_with = "deserialize_duration")]
            #[allow(dead_code)]
            interval: Duration,
        }

        assert!(serde_json::from_str::<Test>(r#"{"interval": -1.0}"#).is_err());
        assert!(serde_json::from_str::<Test>(r#"{"interval": 0.5}"#).is_ok());
    }
}
