//! Bridge configuration file – `config.toml` plus `CTXBRIDGE_*` overrides.
//!
//! The whitelist lives next to it as `whitelist.json`.

use std::fs;
use std::path::{Path, PathBuf};

use ctxbridge_types::{BridgeConfig, BridgeError, BrokerConfig};

const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
const WHITELIST_FILE: &str = "whitelist.json";
const DEFAULT_BROKER_PORT: u16 = 1026;

/// Config file location: the first CLI argument, then `CTXBRIDGE_CONFIG`,
/// then `./config/config.toml`.
pub fn config_path(arg: Option<String>) -> PathBuf {
    arg.or_else(|| std::env::var("CTXBRIDGE_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// `whitelist.json` in the config file's directory.
pub fn whitelist_path(config_path: &Path) -> PathBuf {
    config_path.with_file_name(WHITELIST_FILE)
}

/// Load the config, falling back to defaults when the file is missing.
/// Environment overrides apply in both cases.
pub fn load(path: &Path) -> Result<BridgeConfig, BridgeError> {
    match load_from(path)? {
        Some(cfg) => Ok(cfg),
        None => {
            let mut cfg = BridgeConfig::default();
            apply_env_overrides(&mut cfg);
            Ok(cfg)
        }
    }
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<BridgeConfig>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("failed to read {}: {e}", path.display())))?;
    let mut cfg: BridgeConfig = toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `CTXBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `CTXBRIDGE_NODE_NAME` | `node_name` |
/// | `CTXBRIDGE_BROKER_ADDRESS` | `contextbroker.address` (creates the section, port 1026) |
/// | `CTXBRIDGE_BROKER_PORT` | `contextbroker.port` |
/// | `CTXBRIDGE_ENDPOINT_PORT` | `endpoint.port` |
/// | `CTXBRIDGE_PUB_FREQUENCY_MS` | `pub_frequency_ms` |
///
/// Unparsable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut BridgeConfig) {
    apply_overrides(cfg, |name| std::env::var(name).ok());
}

/// Extracted for testability without mutating environment variables.
pub(crate) fn apply_overrides(cfg: &mut BridgeConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("CTXBRIDGE_NODE_NAME") {
        cfg.node_name = v;
    }
    if let Some(v) = var("CTXBRIDGE_BROKER_ADDRESS") {
        match cfg.contextbroker.as_mut() {
            Some(broker) => broker.address = v,
            None => cfg.contextbroker = Some(BrokerConfig::new(v, DEFAULT_BROKER_PORT)),
        }
    }
    if let Some(v) = var("CTXBRIDGE_BROKER_PORT")
        && let Ok(port) = v.parse::<u16>()
        && let Some(broker) = cfg.contextbroker.as_mut()
    {
        broker.port = port;
    }
    if let Some(v) = var("CTXBRIDGE_ENDPOINT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.endpoint.port = Some(port);
    }
    if let Some(v) = var("CTXBRIDGE_PUB_FREQUENCY_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.pub_frequency_ms = ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let result = load_from(&dir.path().join("config.toml")).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn load_reads_broker_section() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
            node_name = "firos"
            ros_subscriber_queue = 5

            [endpoint]
            address = "10.0.0.2"
            port = 10100

            [contextbroker]
            address = "orion"
            port = 1026

            [contextbroker.subscription]
            subscription_length = 600
            "#,
        )
        .expect("write");

        let cfg = load(&path).expect("load ok");
        assert_eq!(cfg.node_name, "firos");
        assert_eq!(cfg.ros_subscriber_queue, 5);
        assert_eq!(cfg.endpoint.port, Some(10100));
        let broker = cfg.contextbroker.expect("broker section");
        assert_eq!(broker.base_url(), "http://orion:1026");
        assert_eq!(broker.subscription.subscription_length, 600);
        assert_eq!(broker.subscription.subscription_refresh_delay, 0.9);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "node_name = [").expect("write");
        assert!(matches!(load(&path), Err(BridgeError::Config(_))));
    }

    #[test]
    fn whitelist_sits_next_to_the_config() {
        let path = whitelist_path(Path::new("/etc/ctxbridge/config.toml"));
        assert_eq!(path, PathBuf::from("/etc/ctxbridge/whitelist.json"));
    }

    #[test]
    fn cli_argument_wins_over_default_path() {
        assert_eq!(
            config_path(Some("/tmp/bridge.toml".to_string())),
            PathBuf::from("/tmp/bridge.toml")
        );
    }

    #[test]
    fn broker_address_override_creates_the_section() {
        let mut cfg = BridgeConfig::default();
        apply_overrides(
            &mut cfg,
            vars(&[("CTXBRIDGE_BROKER_ADDRESS", "orion"), ("CTXBRIDGE_BROKER_PORT", "1027")]),
        );
        let broker = cfg.contextbroker.expect("broker section");
        assert_eq!(broker.address, "orion");
        assert_eq!(broker.port, 1027);
    }

    #[test]
    fn broker_port_without_broker_is_ignored() {
        let mut cfg = BridgeConfig::default();
        apply_overrides(&mut cfg, vars(&[("CTXBRIDGE_BROKER_PORT", "1027")]));
        assert!(cfg.contextbroker.is_none());
    }

    #[test]
    fn invalid_numbers_are_ignored() {
        let mut cfg = BridgeConfig::default();
        apply_overrides(
            &mut cfg,
            vars(&[
                ("CTXBRIDGE_ENDPOINT_PORT", "not-a-port"),
                ("CTXBRIDGE_PUB_FREQUENCY_MS", "-3"),
                ("CTXBRIDGE_NODE_NAME", "robot_bridge"),
            ]),
        );
        assert_eq!(cfg.endpoint.port, None);
        assert_eq!(cfg.pub_frequency_ms, 0);
        assert_eq!(cfg.node_name, "robot_bridge");
    }

    #[test]
    fn apply_env_overrides_reads_the_process_environment() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("CTXBRIDGE_PUB_FREQUENCY_MS", "250") };
        let mut cfg = BridgeConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.pub_frequency_ms, 250);
        unsafe { std::env::remove_var("CTXBRIDGE_PUB_FREQUENCY_MS") };
    }
}
