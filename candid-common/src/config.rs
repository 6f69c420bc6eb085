//! Configuration file resolution
//!
//! Services resolve their TOML configuration file with the following
//! priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config directory, then system config directory
//!
//! Missing files are not an error: services fall back to compiled defaults
//! with environment-variable overrides applied on top.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::PathBuf;

/// Resolve the configuration file path for a service.
///
/// Returns `None` when no configuration file exists anywhere on the
/// lookup path; callers then run on defaults.
pub fn resolve_config_path(
    cli_arg: Option<&str>,
    env_var_name: &str,
    service_name: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        return Some(PathBuf::from(path));
    }

    // Priority 3: Per-user config directory
    if let Some(dir) = dirs::config_dir() {
        let path = dir.join("candid").join(format!("{}.toml", service_name));
        if path.exists() {
            return Some(path);
        }
    }

    // Priority 4: System config directory (Linux deployments)
    let system_path = PathBuf::from(format!("/etc/candid/{}.toml", service_name));
    if system_path.exists() {
        return Some(system_path);
    }

    None
}

/// Load and parse a TOML configuration file.
pub fn load_toml<T: DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read config failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse config failed ({}): {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serial_test::serial;

    #[derive(Deserialize)]
    struct TestConfig {
        name: String,
        port: u16,
    }

    #[test]
    #[serial]
    fn cli_arg_takes_priority() {
        std::env::set_var("CANDID_TEST_CONFIG", "/from/env.toml");
        let path = resolve_config_path(Some("/from/cli.toml"), "CANDID_TEST_CONFIG", "test");
        assert_eq!(path, Some(PathBuf::from("/from/cli.toml")));
        std::env::remove_var("CANDID_TEST_CONFIG");
    }

    #[test]
    #[serial]
    fn env_var_used_when_no_cli_arg() {
        std::env::set_var("CANDID_TEST_CONFIG2", "/from/env.toml");
        let path = resolve_config_path(None, "CANDID_TEST_CONFIG2", "test");
        assert_eq!(path, Some(PathBuf::from("/from/env.toml")));
        std::env::remove_var("CANDID_TEST_CONFIG2");
    }

    #[test]
    fn load_toml_parses_valid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("svc.toml");
        std::fs::write(&path, "name = \"sync\"\nport = 8085\n").unwrap();

        let config: TestConfig = load_toml(&path).unwrap();
        assert_eq!(config.name, "sync");
        assert_eq!(config.port, 8085);
    }

    #[test]
    fn load_toml_reports_missing_file() {
        let path = PathBuf::from("/nonexistent/candid/sync.toml");
        let result: Result<TestConfig> = load_toml(&path);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
