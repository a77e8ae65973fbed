//! Shared helpers for integration tests.

use std::path::Path;

use devfence::config::Config;

/// Config rooted in a temporary state directory.
pub fn config_in(state_dir: &Path) -> Config {
    let mut config = Config {
        state_dir: state_dir.to_path_buf(),
        ..Default::default()
    };
    config.dns_override.resolv_dir = state_dir.join("resolv");
    config.dns_override.start_backoff_secs = vec![0, 0];
    config.dns_override.stop_poll_ms = 0;
    config.dns_override.stop_max_polls = 2;
    config
}

/// Register a device the way the external registration step does.
pub fn register_device(config: &Config, id: &str, mac: &str, interface_index: u8) {
    let dir = config.devices_dir().join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("device.yaml"),
        format!(
            "mac: \"{}\"\ninterface: eth{}\ninterface_index: {}\n",
            mac, interface_index, interface_index
        ),
    )
    .unwrap();
}
