//! Server configuration (§6.4). The core consumes already-validated
//! configuration; loading and validating it from a file is `fleet_server`'s
//! job, but the types live here because the car server and supervisor are
//! built directly from them.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// TLS material for every car's MQTT connection, supplied on the CLI
/// (§6.5) rather than in the config file — the same `--ca`/`--cert`/`--key`
/// paths apply uniformly across cars.
#[derive(Clone, Debug)]
pub struct TlsSettings {
    /// PEM file containing the CA certificate(s) to trust.
    pub ca_file: String,
    /// PEM file containing the client certificate, for mutual TLS.
    pub cert_file: Option<String>,
    /// PEM file containing the client private key, for mutual TLS.
    pub key_file: Option<String>,
}

/// Configuration for a single native module plugin.
#[derive(Clone, Debug, Deserialize)]
pub struct ModuleConfig {
    /// Path to the plugin's dynamic library.
    pub lib_path: String,
    /// Module-specific `(key, value)` configuration entries, passed to the
    /// plugin's `init` alongside `company_name` and `car_name`.
    #[serde(default)]
    pub config: HashMap<String, String>,
}

/// Per-car configuration overrides.
#[derive(Clone, Debug, Deserialize)]
pub struct CarConfig {
    /// The car's name, used in its MQTT topics.
    pub car_name: String,
    /// Modules available to this car, keyed by module id.
    pub modules: HashMap<u32, ModuleConfig>,
}

/// Top-level server configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    /// Company name shared by every configured car.
    pub company_name: String,
    /// Cars to run, keyed by car name.
    pub cars: HashMap<String, CarConfig>,
    /// Broker hostname or IP address.
    pub mqtt_address: String,
    /// Broker TCP port.
    pub mqtt_port: u16,
    /// Bound, in seconds, on blocking waits during the connect handshake.
    pub mqtt_timeout_seconds: u64,
    /// Status and command-response timer duration, in seconds.
    pub timeout_seconds: u64,
    /// Permit publishing a command whose declared module differs from the
    /// target device's module.
    #[serde(default)]
    pub send_invalid_command: bool,
    /// Delay applied after a connection attempt is refused, before retrying.
    pub sleep_duration_after_connection_refused_seconds: u64,
}

impl ServerConfig {
    /// The bound on blocking waits during the connect handshake.
    #[must_use]
    pub fn mqtt_timeout(&self) -> Duration {
        Duration::from_secs(self.mqtt_timeout_seconds)
    }

    /// The status/command-response timer duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// The delay applied after a connection attempt is refused.
    #[must_use]
    pub fn sleep_duration_after_connection_refused(&self) -> Duration {
        Duration::from_secs(self.sleep_duration_after_connection_refused_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_toml() {
        let toml = r#"
            company_name = "acme"
            mqtt_address = "broker.example.com"
            mqtt_port = 8883
            mqtt_timeout_seconds = 5
            timeout_seconds = 10
            sleep_duration_after_connection_refused_seconds = 3

            [cars.car1]
            car_name = "car1"
            [cars.car1.modules.1]
            lib_path = "/lib/module1.so"
        "#;
        let config: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.company_name, "acme");
        assert_eq!(config.cars.len(), 1);
        assert_eq!(config.timeout(), Duration::from_secs(10));
    }
}
