use serde::{Deserialize, Deserializer, Serializer};
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

/// Fills an unset string from the environment.
pub fn load_env_string_opt(name: &str, target: &mut Option<String>) {
    if target.is_none()
        && let Ok(value) = std::env::var(name)
    {
        *target = Some(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use serial_test::serial;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Holder {
        #[serde(with = "super")]
        timeout: Duration,
    }

    #[test]
    fn durations_are_milliseconds() {
        let holder: Holder = serde_json::from_str(r#"{"timeout":1500}"#).unwrap();
        assert_eq!(holder.timeout, Duration::from_millis(1500));
        assert_eq!(serde_json::to_string(&holder).unwrap(), r#"{"timeout":1500}"#);
    }

    #[test]
    #[serial]
    fn env_only_fills_unset_values() {
        // SAFETY: environment tests are serialized.
        unsafe { std::env::set_var("DEVO_TEST_HELPER_VALUE", "fallback") };

        let mut unset = None;
        load_env_string_opt("DEVO_TEST_HELPER_VALUE", &mut unset);
        assert_eq!(unset.as_deref(), Some("fallback"));

        let mut set = Some("explicit".to_string());
        load_env_string_opt("DEVO_TEST_HELPER_VALUE", &mut set);
        assert_eq!(set.as_deref(), Some("explicit"));

        unsafe { std::env::remove_var("DEVO_TEST_HELPER_VALUE") };
    }
}
