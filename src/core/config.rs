/*!
 * Datapath Configuration
 *
 * Runtime tuning for the enqueue/dequeue fast path, loadable from
 * environment variables or a JSON document.
 */

use super::errors::{HqmError, HqmResult};
use super::limits::{DEFAULT_CREDIT_BATCH_SIZE, DEFAULT_RELEASE_BATCH_SIZE};
use serde::{Deserialize, Serialize};

/// Handling of release/pop requests that exceed the owed counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverRequestPolicy {
    /// Silently clamp to the owed count (compatible behavior)
    Clamp,
    /// Fail with InvalidArgument
    Reject,
}

/// Burst-write strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurstPreference {
    /// Probe the CPU once per port and pick the widest store available
    Auto,
    /// Always use four volatile 16-byte stores
    Portable,
}

/// Datapath configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatapathConfig {
    /// Credits moved per pool refill; a port returns one batch once its
    /// cache holds twice this many
    pub credit_batch_size: u32,
    /// REL commands issued per burst by `release`
    pub release_batch_size: usize,
    /// Validate queue ids and domain state on every datapath call
    pub validate_args: bool,
    /// Release/pop over-request handling
    pub over_request: OverRequestPolicy,
    /// Burst-write strategy selection
    pub burst: BurstPreference,
}

impl Default for DatapathConfig {
    fn default() -> Self {
        Self {
            credit_batch_size: DEFAULT_CREDIT_BATCH_SIZE,
            release_batch_size: DEFAULT_RELEASE_BATCH_SIZE,
            validate_args: true,
            over_request: OverRequestPolicy::Clamp,
            burst: BurstPreference::Auto,
        }
    }
}

impl DatapathConfig {
    /// Configuration that turns over-requests into errors
    pub const fn strict() -> Self {
        Self {
            credit_batch_size: DEFAULT_CREDIT_BATCH_SIZE,
            release_batch_size: DEFAULT_RELEASE_BATCH_SIZE,
            validate_args: true,
            over_request: OverRequestPolicy::Reject,
            burst: BurstPreference::Auto,
        }
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> HqmResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| HqmError::invalid(format!("datapath config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `HQM_*` environment variables
    ///
    /// - HQM_CREDIT_BATCH: credit batch size
    /// - HQM_RELEASE_BATCH: release batch size
    /// - HQM_VALIDATE: "0"/"false" disables argument validation
    /// - HQM_OVER_REQUEST: "clamp" or "reject"
    /// - HQM_BURST: "auto" or "portable"
    pub fn from_env() -> HqmResult<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("HQM_CREDIT_BATCH") {
            config.credit_batch_size = v
                .parse()
                .map_err(|_| HqmError::invalid(format!("HQM_CREDIT_BATCH={}", v)))?;
        }
        if let Ok(v) = std::env::var("HQM_RELEASE_BATCH") {
            config.release_batch_size = v
                .parse()
                .map_err(|_| HqmError::invalid(format!("HQM_RELEASE_BATCH={}", v)))?;
        }
        if let Ok(v) = std::env::var("HQM_VALIDATE") {
            config.validate_args = !(v == "0" || v.eq_ignore_ascii_case("false"));
        }
        if let Ok(v) = std::env::var("HQM_OVER_REQUEST") {
            config.over_request = match v.to_ascii_lowercase().as_str() {
                "clamp" => OverRequestPolicy::Clamp,
                "reject" => OverRequestPolicy::Reject,
                _ => return Err(HqmError::invalid(format!("HQM_OVER_REQUEST={}", v))),
            };
        }
        if let Ok(v) = std::env::var("HQM_BURST") {
            config.burst = match v.to_ascii_lowercase().as_str() {
                "auto" => BurstPreference::Auto,
                "portable" => BurstPreference::Portable,
                _ => return Err(HqmError::invalid(format!("HQM_BURST={}", v))),
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> HqmResult<()> {
        if self.credit_batch_size == 0 {
            return Err(HqmError::invalid("credit_batch_size must be non-zero"));
        }
        if self.release_batch_size == 0 {
            return Err(HqmError::invalid("release_batch_size must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DatapathConfig::default();
        assert_eq!(config.credit_batch_size, 32);
        assert_eq!(config.over_request, OverRequestPolicy::Clamp);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            DatapathConfig::from_json(r#"{"credit_batch_size": 8, "over_request": "reject"}"#)
                .unwrap();
        assert_eq!(config.credit_batch_size, 8);
        assert_eq!(config.over_request, OverRequestPolicy::Reject);
        assert_eq!(config.release_batch_size, 4);
    }

    #[test]
    fn test_zero_batch_rejected() {
        let err = DatapathConfig::from_json(r#"{"credit_batch_size": 0}"#).unwrap_err();
        assert!(matches!(err, HqmError::InvalidArgument(_)));
    }
}
