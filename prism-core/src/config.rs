//! Runtime Configuration
//!
//! Switches that change how every controller sharing the config renders.
//! Hosts usually load them once from their own JSON configuration:
//!
//! ```rust,ignore
//! let config = RuntimeConfig::from_json(r#"{ "useStrictDiff": true }"#)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Render pipeline settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Diff nested values field by field and emit sub-path patch entries
    /// (`list[0].title`) instead of whole top-level values.
    pub use_strict_diff: bool,

    /// Do not log failures of injected render functions before falling
    /// back to the full-data render.
    pub ignore_render_error: bool,
}

impl RuntimeConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn strict() -> Self {
        Self {
            use_strict_diff: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_loose() {
        let config = RuntimeConfig::default();
        assert!(!config.use_strict_diff);
        assert!(!config.ignore_render_error);
    }

    #[test]
    fn parses_camel_case_with_defaults() {
        let config = RuntimeConfig::from_json(r#"{ "useStrictDiff": true }"#).unwrap();
        assert_eq!(config, RuntimeConfig::strict());

        let config = RuntimeConfig::from_json(r#"{ "ignoreRenderError": true }"#).unwrap();
        assert!(config.ignore_render_error);
        assert!(!config.use_strict_diff);
    }

    #[test]
    fn rejects_bad_json() {
        assert!(matches!(
            RuntimeConfig::from_json("{ nope"),
            Err(ConfigError::Json(_))
        ));
    }
}
