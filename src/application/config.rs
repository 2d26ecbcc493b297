use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a unit of work protects its read-balance-then-write sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyMode {
    /// Hold per-account locks from the first read until commit.
    #[default]
    Pessimistic,
    /// Take no locks; rely on expected-prior checks at commit and retry.
    Optimistic,
}

impl std::str::FromStr for ConcurrencyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pessimistic" => Ok(ConcurrencyMode::Pessimistic),
            "optimistic" => Ok(ConcurrencyMode::Optimistic),
            other => Err(format!("unknown concurrency mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub concurrency: ConcurrencyMode,
    /// Upper bound on waiting for account locks.
    #[serde(with = "millis")]
    pub lock_timeout: Duration,
    /// Extra attempts after a `Conflict` before it is surfaced.
    pub max_conflict_retries: u32,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyMode::Pessimistic,
            lock_timeout: Duration::from_secs(5),
            max_conflict_retries: 3,
            default_page_size: 20,
            max_page_size: 200,
        }
    }
}

impl EngineConfig {
    /// Normalises a requested page: `page < 1` becomes 1, a zero page size
    /// falls back to the default, and oversized pages are capped.
    pub fn clamp_page(&self, page: usize, page_size: usize) -> (usize, usize) {
        let page = page.max(1);
        let page_size = match page_size {
            0 => self.default_page_size,
            n => n.min(self.max_page_size),
        };
        (page, page_size)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer, ser};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis())
            .map_err(|_| <S::Error as ser::Error>::custom(format!("duration {value:?} does not fit in u64 milliseconds")))?;
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_page() {
        let config = EngineConfig::default();
        assert_eq!(config.clamp_page(0, 0), (1, 20));
        assert_eq!(config.clamp_page(3, 500), (3, 200));
        assert_eq!(config.clamp_page(2, 15), (2, 15));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"concurrency": "optimistic", "lock_timeout": 250}"#).unwrap();
        assert_eq!(config.concurrency, ConcurrencyMode::Optimistic);
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.max_page_size, 200);
    }

    #[test]
    fn test_oversized_timeout_fails_to_serialize() {
        let config = EngineConfig {
            lock_timeout: Duration::MAX,
            ..EngineConfig::default()
        };
        assert!(serde_json::to_string(&config).is_err());

        let json = serde_json::to_string(&EngineConfig::default()).unwrap();
        assert!(json.contains(r#""lock_timeout":5000"#));
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("Optimistic".parse::<ConcurrencyMode>(), Ok(ConcurrencyMode::Optimistic));
        assert!("eventual".parse::<ConcurrencyMode>().is_err());
    }
}
