//! MQTT 3.1.1 connection settings

use std::time::Duration;

use derive_builder::Builder;

/// All the settings required to establish an MQTT 3.1.1 connection for a single car.
#[derive(Builder, Clone, Debug)]
#[builder(pattern = "owned", setter(into), build_fn(validate = "Self::validate"))]
pub struct MqttConnectionSettings {
    /// Client identifier presented in the CONNECT packet.
    pub client_id: String,
    /// FQDN or IP address of the broker to connect to.
    pub hostname: String,
    /// TCP port of the broker.
    #[builder(default = "8883")]
    pub port: u16,
    /// Keep-alive interval negotiated with the broker.
    #[builder(default = "Duration::from_secs(15)")]
    pub keep_alive: Duration,
    /// Timeout applied to the initial TCP+TLS+CONNACK handshake.
    #[builder(default = "Duration::from_secs(30)")]
    pub connection_timeout: Duration,
    /// Whether to negotiate TLS. When `true`, `ca_file` must be set and
    /// `cert_file`/`key_file` must both be set or both unset.
    #[builder(default = "true")]
    pub use_tls: bool,
    /// PEM file containing the CA certificate(s) to trust.
    #[builder(default)]
    pub ca_file: Option<String>,
    /// PEM file containing the client certificate, for mutual TLS.
    #[builder(default)]
    pub cert_file: Option<String>,
    /// PEM file containing the client private key, for mutual TLS.
    #[builder(default)]
    pub key_file: Option<String>,
}

impl MqttConnectionSettingsBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.client_id.as_ref().is_some_and(String::is_empty) {
            return Err("client_id must not be empty".to_string());
        }
        if self.hostname.as_ref().is_some_and(String::is_empty) {
            return Err("hostname must not be empty".to_string());
        }
        let use_tls = self.use_tls.unwrap_or(true);
        if use_tls && self.ca_file.as_ref().and_then(Option::as_ref).is_none() {
            return Err("ca_file is required when use_tls is set".to_string());
        }
        let has_cert = self.cert_file.as_ref().and_then(Option::as_ref).is_some();
        let has_key = self.key_file.as_ref().and_then(Option::as_ref).is_some();
        if has_cert != has_key {
            return Err("cert_file and key_file must be set together".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let settings = MqttConnectionSettingsBuilder::default()
            .client_id("abc123")
            .hostname("broker.example.com")
            .ca_file(Some("ca.pem".to_string()))
            .build()
            .unwrap();
        assert_eq!(settings.port, 8883);
        assert_eq!(settings.keep_alive, Duration::from_secs(15));
        assert_eq!(settings.connection_timeout, Duration::from_secs(30));
        assert!(settings.use_tls);
    }

    #[test]
    fn rejects_tls_without_ca_file() {
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("abc123")
            .hostname("broker.example.com")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_cert_without_key() {
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("abc123")
            .hostname("broker.example.com")
            .ca_file(Some("ca.pem".to_string()))
            .cert_file(Some("cert.pem".to_string()))
            .build();
        assert!(result.is_err());
    }
}
