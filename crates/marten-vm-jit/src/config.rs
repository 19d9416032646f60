//! Compiling backend configuration

use crate::bailout::DEOPT_THRESHOLD;

/// Entries plus loop back-edges before a code block is compiled
pub const HOT_THRESHOLD: u32 = 1000;

/// Knobs of the compiling backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitConfig {
    /// Compile hot code at all; when off the backend only interprets
    pub enabled: bool,
    /// Hotness count that triggers compilation
    pub hot_threshold: u32,
    /// Guard failures that trigger deoptimization
    pub deopt_threshold: u32,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hot_threshold: HOT_THRESHOLD,
            deopt_threshold: DEOPT_THRESHOLD,
        }
    }
}

impl JitConfig {
    /// Defaults overridden by environment flags.
    ///
    /// `MARTEN_DISABLE_JIT=1` turns compilation off.
    /// `MARTEN_JIT_HOT_THRESHOLD=<u32>` and `MARTEN_JIT_DEOPT_THRESHOLD=<u32>`
    /// replace the thresholds; zero or garbage keeps the default.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let threshold = |name: &str, default: u32| {
            var(name)
                .and_then(|value| parse_u32(&value))
                .filter(|threshold| *threshold > 0)
                .unwrap_or(default)
        };
        Self {
            enabled: !var("MARTEN_DISABLE_JIT").is_some_and(|v| parse_env_truthy(&v)),
            hot_threshold: threshold("MARTEN_JIT_HOT_THRESHOLD", defaults.hot_threshold),
            deopt_threshold: threshold("MARTEN_JIT_DEOPT_THRESHOLD", defaults.deopt_threshold),
        }
    }
}

/// Whether an environment flag value means "on"
pub fn parse_env_truthy(value: &str) -> bool {
    !matches!(value.trim(), "" | "0")
        && !value.trim().eq_ignore_ascii_case("false")
        && !value.trim().eq_ignore_ascii_case("off")
        && !value.trim().eq_ignore_ascii_case("no")
}

fn parse_u32(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn config(vars: &[(&str, &str)]) -> JitConfig {
        let vars: FxHashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        JitConfig::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn truthy_values() {
        for value in ["1", "true", "yes", " on ", "anything"] {
            assert!(parse_env_truthy(value), "{value:?}");
        }
        for value in ["", "0", "false", "FALSE", "off", "No", "  "] {
            assert!(!parse_env_truthy(value), "{value:?}");
        }
    }

    #[test]
    fn no_vars_means_defaults() {
        assert_eq!(config(&[]), JitConfig::default());
        assert_eq!(JitConfig::default().hot_threshold, HOT_THRESHOLD);
        assert_eq!(JitConfig::default().deopt_threshold, DEOPT_THRESHOLD);
    }

    #[test]
    fn disable_flag() {
        assert!(!config(&[("MARTEN_DISABLE_JIT", "1")]).enabled);
        assert!(config(&[("MARTEN_DISABLE_JIT", "off")]).enabled);
    }

    #[test]
    fn thresholds_override_defaults() {
        let parsed = config(&[
            ("MARTEN_JIT_HOT_THRESHOLD", " 5 "),
            ("MARTEN_JIT_DEOPT_THRESHOLD", "3"),
        ]);
        assert_eq!(parsed.hot_threshold, 5);
        assert_eq!(parsed.deopt_threshold, 3);
    }

    #[test]
    fn zero_or_garbage_threshold_keeps_default() {
        let parsed = config(&[
            ("MARTEN_JIT_HOT_THRESHOLD", "0"),
            ("MARTEN_JIT_DEOPT_THRESHOLD", "many"),
        ]);
        assert_eq!(parsed.hot_threshold, HOT_THRESHOLD);
        assert_eq!(parsed.deopt_threshold, DEOPT_THRESHOLD);
    }
}
