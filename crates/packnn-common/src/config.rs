//! Kernel configuration for the packed-weight operators.
//!
//! Loads [`KernelConfig`] from a TOML file with environment variable
//! overrides via `PACKNN_*` prefixed variables. The configuration only ever
//! changes which eval variant Prepare selects; it never changes results.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Performance/memory trade-off selector carried by a packing descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnpackingHint {
    /// No preference; the configured default applies.
    #[default]
    NoHint,
    /// Unpack the whole tensor into scratch once, then run a dense kernel.
    MaxSpeed,
    /// Decode weights on the fly inside the accumulation loop.
    MinMemory,
}

impl std::fmt::Display for UnpackingHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoHint => write!(f, "no_hint"),
            Self::MaxSpeed => write!(f, "max_speed"),
            Self::MinMemory => write!(f, "min_memory"),
        }
    }
}

impl std::str::FromStr for UnpackingHint {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "no_hint" | "none" => Ok(Self::NoHint),
            "max_speed" | "speed" => Ok(Self::MaxSpeed),
            "min_memory" | "memory" => Ok(Self::MinMemory),
            other => Err(format!("unknown unpacking hint: {other}")),
        }
    }
}

/// Kernel configuration loaded from TOML with environment variable overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Hint applied when a packing descriptor carries [`UnpackingHint::NoHint`].
    /// Defaults to `max_speed`, so unhinted tensors are unpacked to scratch.
    /// Override: `PACKNN_UNPACKING_HINT`
    pub default_unpacking_hint: UnpackingHint,

    /// Allow bit widths outside the specialised set to use the slow generic
    /// decode path. When false such widths fail at Prepare.
    /// Override: `PACKNN_ALLOW_GENERIC_WIDTHS`
    pub allow_generic_widths: bool,

    /// Largest scratch request the unpack-to-scratch variant may make, in
    /// bytes (0 = unlimited). Larger requests fall back to streaming decode.
    /// Override: `PACKNN_MAX_SCRATCH_BYTES`
    pub max_scratch_bytes: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            default_unpacking_hint: UnpackingHint::MaxSpeed,
            allow_generic_widths: true,
            max_scratch_bytes: 0,
        }
    }
}

/// Errors that can occur when loading or validating a [`KernelConfig`].
#[derive(Debug, thiserror::Error)]
pub enum KernelConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid environment override {key}={value}: {reason}")]
    EnvOverride { key: String, value: String, reason: String },
}

impl KernelConfig {
    /// The defaults rendered as TOML, e.g. as a starting point for a config file.
    pub fn default_toml() -> String {
        let cfg = Self::default();
        toml::to_string_pretty(&cfg).expect("default config should serialize")
    }

    /// Read `path` as TOML. Missing keys keep their defaults and `PACKNN_*`
    /// variables override the file.
    pub fn load(path: &Path) -> Result<Self, KernelConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse `toml_str`, then apply the `PACKNN_*` overrides.
    pub fn from_toml(toml_str: &str) -> Result<Self, KernelConfigError> {
        let mut cfg: KernelConfig = toml::from_str(toml_str)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults plus `PACKNN_*` overrides, with no file.
    pub fn from_env() -> Result<Self, KernelConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values no kernel could honour.
    pub fn validate(&self) -> Result<(), KernelConfigError> {
        if usize::try_from(self.max_scratch_bytes).is_err() {
            return Err(KernelConfigError::Validation(format!(
                "max_scratch_bytes must fit in usize, got {}",
                self.max_scratch_bytes
            )));
        }
        Ok(())
    }

    /// Resolve a descriptor hint against the configured default.
    pub fn resolve_hint(&self, hint: UnpackingHint) -> UnpackingHint {
        match hint {
            UnpackingHint::NoHint => self.default_unpacking_hint,
            other => other,
        }
    }

    /// Whether a scratch request of `bytes` is within the configured cap.
    pub fn scratch_allowed(&self, bytes: usize) -> bool {
        self.max_scratch_bytes == 0 || bytes as u64 <= self.max_scratch_bytes
    }

    /// Apply `PACKNN_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), KernelConfigError> {
        if let Ok(val) = std::env::var("PACKNN_UNPACKING_HINT") {
            self.default_unpacking_hint = val.parse::<UnpackingHint>().map_err(|reason| {
                KernelConfigError::EnvOverride {
                    key: "PACKNN_UNPACKING_HINT".into(),
                    value: val.clone(),
                    reason,
                }
            })?;
        }

        if let Ok(val) = std::env::var("PACKNN_ALLOW_GENERIC_WIDTHS") {
            self.allow_generic_widths = match val.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(KernelConfigError::EnvOverride {
                        key: "PACKNN_ALLOW_GENERIC_WIDTHS".into(),
                        value: val.clone(),
                        reason: "expected a boolean".into(),
                    })
                }
            };
        }

        if let Ok(val) = std::env::var("PACKNN_MAX_SCRATCH_BYTES") {
            self.max_scratch_bytes =
                val.parse::<u64>().map_err(|e| KernelConfigError::EnvOverride {
                    key: "PACKNN_MAX_SCRATCH_BYTES".into(),
                    value: val.clone(),
                    reason: e.to_string(),
                })?;
        }

        Ok(())
    }
}
