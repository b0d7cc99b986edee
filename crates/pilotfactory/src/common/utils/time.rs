use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Deserializes a duration written in humantime format (`90s`, `5m`, `1h 30m`).
pub fn deserialize_human_duration_opt<'de, D>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|value| humantime::parse_duration(value.trim()).map_err(serde::de::Error::custom))
        .transpose()
}

pub fn format_duration(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

#[cfg(not(test))]
pub fn now_monotonic() -> std::time::Instant {
    std::time::Instant::now()
}

#[cfg(test)]
pub use mock_time::now_monotonic;

/// Testing utilities for mocking (monotonic) timestamps.
/// Use the `now_monotonic` function if you want to be able to mock the time in tests.
#[cfg(test)]
pub mod mock_time {
    use std::cell::RefCell;
    use std::time::Instant;

    thread_local! {
        static MOCK_TIME: RefCell<Option<Instant>> = const { RefCell::new(None) };
    }

    pub struct MockTime;

    impl MockTime {
        pub fn mock(time: Instant) -> Self {
            MOCK_TIME.with(|cell| {
                assert!(cell.borrow().is_none());
                *cell.borrow_mut() = Some(time);
            });
            MockTime
        }
    }

    impl Drop for MockTime {
        fn drop(&mut self) {
            MOCK_TIME.with(|cell| *cell.borrow_mut() = None);
        }
    }

    pub fn now_monotonic() -> Instant {
        MOCK_TIME.with(|cell| cell.borrow().as_ref().cloned().unwrap_or_else(Instant::now))
    }
}

#[cfg(test)]
mod tests {
    use super::deserialize_human_duration_opt;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Deserialize)]
    struct Wrapper {
        #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
        value: Option<Duration>,
    }

    #[test]
    fn parse_human_duration() {
        let wrapper: Wrapper = toml::from_str(r#"value = "1m 30s""#).unwrap();
        assert_eq!(wrapper.value, Some(Duration::from_secs(90)));
    }

    #[test]
    fn missing_human_duration() {
        let wrapper: Wrapper = toml::from_str("").unwrap();
        assert_eq!(wrapper.value, None);
    }

    #[test]
    fn invalid_human_duration() {
        assert!(toml::from_str::<Wrapper>(r#"value = "soon""#).is_err());
    }
}
