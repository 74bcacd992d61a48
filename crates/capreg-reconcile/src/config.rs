//! Reconciliation settings.
//!
//! Read from the environment with [`ReconcileConfig::from_env`]:
//!
//! | Variable                      | Default  |
//! |-------------------------------|----------|
//! | `CAPREG_CONFIRM_TIMEOUT_SECS` | `60`     |
//! | `CAPREG_CAPABILITY_MODE`      | `append` |
//! | `CAPREG_TARGET_CHAIN`         | `evm`    |

use std::time::Duration;

use capreg_consensus::ChainFamily;

use crate::confirm::ConfirmOptions;
use crate::error::ConfigError;
use crate::node_params::CapabilityMode;

const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings for a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Deadline for each transaction confirmation. `None` waits forever.
    pub confirm_timeout: Option<Duration>,

    /// How desired node capabilities combine with current ones.
    pub capability_mode: CapabilityMode,

    /// Chain whose native address format transmit accounts must use.
    pub target_chain: ChainFamily,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            confirm_timeout: Some(DEFAULT_CONFIRM_TIMEOUT),
            capability_mode: CapabilityMode::Append,
            target_chain: ChainFamily::Evm,
        }
    }
}

impl ReconcileConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from any variable source. Unset variables take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup("CAPREG_CONFIRM_TIMEOUT_SECS") {
            let secs: u64 = value.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidValue {
                    var: "CAPREG_CONFIRM_TIMEOUT_SECS",
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
            // 0 disables the deadline
            config.confirm_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(value) = lookup("CAPREG_CAPABILITY_MODE") {
            config.capability_mode =
                value
                    .parse()
                    .map_err(|reason: String| ConfigError::InvalidValue {
                        var: "CAPREG_CAPABILITY_MODE",
                        value: value.clone(),
                        reason,
                    })?;
        }

        if let Some(value) = lookup("CAPREG_TARGET_CHAIN") {
            config.target_chain = value.trim().parse().map_err(
                |e: capreg_core::ValidationError| ConfigError::InvalidValue {
                    var: "CAPREG_TARGET_CHAIN",
                    value: value.clone(),
                    reason: e.to_string(),
                },
            )?;
        }

        Ok(config)
    }

    /// Set the confirmation deadline.
    #[must_use]
    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = Some(timeout);
        self
    }

    /// Wait for confirmations without a deadline.
    #[must_use]
    pub fn without_confirm_timeout(mut self) -> Self {
        self.confirm_timeout = None;
        self
    }

    /// Set the capability mode.
    #[must_use]
    pub fn with_capability_mode(mut self, mode: CapabilityMode) -> Self {
        self.capability_mode = mode;
        self
    }

    /// Set the target chain family.
    #[must_use]
    pub fn with_target_chain(mut self, chain: ChainFamily) -> Self {
        self.target_chain = chain;
        self
    }

    /// Confirmation options without cancellation.
    pub fn confirm_options(&self) -> ConfirmOptions {
        ConfirmOptions {
            timeout: self.confirm_timeout,
            cancel: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| vars.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ReconcileConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ReconcileConfig::default());
        assert_eq!(config.confirm_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn reads_every_variable() {
        let config = ReconcileConfig::from_lookup(lookup(&[
            ("CAPREG_CONFIRM_TIMEOUT_SECS", "5"),
            ("CAPREG_CAPABILITY_MODE", "replace"),
            ("CAPREG_TARGET_CHAIN", "solana"),
        ]))
        .unwrap();
        assert_eq!(config.confirm_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.capability_mode, CapabilityMode::Replace);
        assert_eq!(config.target_chain, ChainFamily::Solana);
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        let config =
            ReconcileConfig::from_lookup(lookup(&[("CAPREG_CONFIRM_TIMEOUT_SECS", "0")])).unwrap();
        assert_eq!(config.confirm_timeout, None);
    }

    #[test]
    fn bad_values_are_errors() {
        let err = ReconcileConfig::from_lookup(lookup(&[("CAPREG_CONFIRM_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { var: "CAPREG_CONFIRM_TIMEOUT_SECS", .. }
        ));
        assert!(ReconcileConfig::from_lookup(lookup(&[("CAPREG_CAPABILITY_MODE", "merge")])).is_err());
        assert!(ReconcileConfig::from_lookup(lookup(&[("CAPREG_TARGET_CHAIN", "cosmos")])).is_err());
    }

    #[test]
    fn builder_methods() {
        let config = ReconcileConfig::default()
            .with_confirm_timeout(Duration::from_secs(1))
            .with_capability_mode(CapabilityMode::Replace)
            .with_target_chain(ChainFamily::Aptos);
        assert_eq!(config.confirm_options().timeout, Some(Duration::from_secs(1)));
        assert!(config.without_confirm_timeout().confirm_timeout.is_none());
    }
}
