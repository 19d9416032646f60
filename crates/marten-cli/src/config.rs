//! Configuration file parsing for marten.toml.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use marten_vm_core::VmConfig;
use marten_vm_jit::JitConfig;

/// Config file names searched for, in order
const CONFIG_NAMES: &[&str] = &["marten.toml", ".martenrc.toml"];

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// VM limits
    #[serde(default)]
    pub vm: VmSection,

    /// Compiling backend settings
    #[serde(default)]
    pub jit: JitSection,

    /// Watchdog settings
    #[serde(default)]
    pub watchdog: WatchdogSection,
}

/// `[vm]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VmSection {
    /// Maximum number of frames
    pub max_call_depth: Option<usize>,

    /// Register file size in slots
    pub register_file_capacity: Option<usize>,

    /// Permute opcode numbering with this seed
    pub opcode_seed: Option<u64>,
}

/// `[jit]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JitSection {
    /// Run with the compiling backend by default
    pub enabled: Option<bool>,

    /// Hotness count that triggers compilation
    pub hot_threshold: Option<u32>,

    /// Guard failures that trigger deoptimization
    pub deopt_threshold: Option<u32>,
}

/// `[watchdog]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchdogSection {
    /// Interrupt scripts running longer than this (0 = no limit)
    #[serde(default)]
    pub timeout_ms: u64,
}

impl Config {
    /// VM configuration with file overrides applied
    pub fn vm_config(&self) -> VmConfig {
        let defaults = VmConfig::default();
        VmConfig {
            max_call_depth: self.vm.max_call_depth.unwrap_or(defaults.max_call_depth),
            register_file_capacity: self
                .vm
                .register_file_capacity
                .unwrap_or(defaults.register_file_capacity),
            opcode_seed: self.vm.opcode_seed.or(defaults.opcode_seed),
        }
    }

    /// `base` (usually from the environment) with file overrides applied
    pub fn jit_config(&self, base: JitConfig) -> JitConfig {
        JitConfig {
            enabled: base.enabled,
            hot_threshold: self
                .jit
                .hot_threshold
                .filter(|t| *t > 0)
                .unwrap_or(base.hot_threshold),
            deopt_threshold: self
                .jit
                .deopt_threshold
                .filter(|t| *t > 0)
                .unwrap_or(base.deopt_threshold),
        }
    }
}

/// Load configuration from a file or search for default config files.
///
/// An explicit `path` must exist; a missing searched file means defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config_path = match path {
        Some(path) if !path.exists() => {
            anyhow::bail!("Config file {} does not exist", path.display())
        }
        Some(path) => Some(path.to_path_buf()),
        None => std::env::current_dir()
            .ok()
            .and_then(|cwd| find_config_file(&cwd)),
    };

    let Some(path) = config_path else {
        return Ok(Config::default());
    };
    let content = std::fs::read_to_string(&path)?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Search for a configuration file in `start` and its parent directories.
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let path = current.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        dir = current.parent();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.vm_config().max_call_depth, VmConfig::default().max_call_depth);
        assert_eq!(config.jit.enabled, None);
        assert_eq!(config.watchdog.timeout_ms, 0);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[vm]
max_call_depth = 200
opcode_seed = 7

[jit]
enabled = true
hot_threshold = 50

[watchdog]
timeout_ms = 1500
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let vm = config.vm_config();
        assert_eq!(vm.max_call_depth, 200);
        assert_eq!(vm.register_file_capacity, VmConfig::default().register_file_capacity);
        assert_eq!(vm.opcode_seed, Some(7));

        assert_eq!(config.jit.enabled, Some(true));
        let jit = config.jit_config(JitConfig::default());
        assert_eq!(jit.hot_threshold, 50);
        assert_eq!(jit.deopt_threshold, JitConfig::default().deopt_threshold);
        assert_eq!(config.watchdog.timeout_ms, 1500);
    }

    #[test]
    fn test_zero_threshold_keeps_base() {
        let config: Config = toml::from_str("[jit]\nhot_threshold = 0\n").unwrap();
        let base = JitConfig {
            hot_threshold: 9,
            ..JitConfig::default()
        };
        assert_eq!(config.jit_config(base).hot_threshold, 9);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("[vm]\nmax_depth = 3\n").is_err());
        assert!(toml::from_str::<Config>("[gc]\n").is_err());
    }

    #[test]
    fn test_config_found_in_parent_directory() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.path().join("marten.toml"), "[watchdog]\ntimeout_ms = 10\n").unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, root.path().join("marten.toml"));
        let config = load_config(Some(&found)).unwrap();
        assert_eq!(config.watchdog.timeout_ms, 10);
    }

    #[test]
    fn test_explicit_missing_config_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("custom.toml");
        assert!(load_config(Some(&missing)).is_err());
    }

    #[test]
    fn test_malformed_config_names_the_file() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("marten.toml");
        std::fs::write(&path, "[vm\n").unwrap();
        let error = load_config(Some(&path)).unwrap_err().to_string();
        assert!(error.contains("marten.toml"), "{error}");
    }
}
