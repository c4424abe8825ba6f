//! Adapter layer binding [`crate::interface`] traits to the `rumqttc` crate.

use std::fs;
use std::io::BufReader;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rumqttc::tokio_rustls::rustls::{ClientConfig, RootCertStore};
use rumqttc::{AsyncClient, EventLoop, MqttOptions, Transport};

use crate::connection_settings::MqttConnectionSettings;
use crate::control_packet::{Publish, QoS};
use crate::error::{AckError, AckErrorKind, DisconnectError, DisconnectErrorKind, TlsError};
use crate::error::{ConnectionError, PublishError, PublishErrorKind, SubscribeError, SubscribeErrorKind};
use crate::interface::{Event, MqttEventLoop, MqttPubSub};

/// Build a rustls [`ClientConfig`] from the CA/cert/key PEM files named in `settings`.
///
/// # Errors
/// Returns [`TlsError`] if a file cannot be read or does not contain valid PEM material.
pub fn build_tls_config(settings: &MqttConnectionSettings) -> Result<ClientConfig, TlsError> {
    let ca_path = settings
        .ca_file
        .as_deref()
        .expect("validated present when use_tls is set");
    let ca_bytes = fs::read(ca_path).map_err(|e| TlsError::Io("ca_file", e))?;
    let mut ca_reader = BufReader::new(ca_bytes.as_slice());
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut ca_reader) {
        let cert = cert.map_err(|_| TlsError::InvalidPem("ca_file"))?;
        roots
            .add(cert)
            .map_err(|_| TlsError::InvalidPem("ca_file"))?;
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);

    let config = match (&settings.cert_file, &settings.key_file) {
        (Some(cert_path), Some(key_path)) => {
            let cert_bytes = fs::read(cert_path).map_err(|e| TlsError::Io("cert_file", e))?;
            let mut cert_reader = BufReader::new(cert_bytes.as_slice());
            let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
                .collect::<Result<_, _>>()
                .map_err(|_| TlsError::InvalidPem("cert_file"))?;

            let key_bytes = fs::read(key_path).map_err(|e| TlsError::Io("key_file", e))?;
            let mut key_reader = BufReader::new(key_bytes.as_slice());
            let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_reader)
                .map_err(|_| TlsError::InvalidPem("key_file"))?
                .ok_or(TlsError::MissingKey)?;

            builder
                .with_client_auth_cert(certs, key)
                .map_err(TlsError::Rustls)?
        }
        _ => builder.with_no_client_auth(),
    };

    Ok(config)
}

/// Translate [`MqttConnectionSettings`] into a [`rumqttc::MqttOptions`], creating the
/// `AsyncClient`/`EventLoop` pair for a single car's MQTT session.
///
/// # Errors
/// Returns [`TlsError`] if TLS is enabled and the supplied PEM material is invalid.
pub fn new_client(
    settings: &MqttConnectionSettings,
    outgoing_queue_cap: usize,
) -> Result<(AsyncClient, EventLoop), TlsError> {
    let mut options = MqttOptions::new(&settings.client_id, &settings.hostname, settings.port);
    options.set_keep_alive(settings.keep_alive);

    if settings.use_tls {
        let tls_config = build_tls_config(settings)?;
        options.set_transport(Transport::tls_with_config(tls_config.into()));
    }

    let (client, mut eventloop) = AsyncClient::new(options, outgoing_queue_cap);
    let mut network_options = rumqttc::NetworkOptions::new();
    network_options.set_connection_timeout(settings.connection_timeout.as_secs());
    eventloop.set_network_options(network_options);

    Ok((client, eventloop))
}

#[async_trait]
impl MqttPubSub for AsyncClient {
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Bytes,
    ) -> Result<(), PublishError> {
        self.publish(topic, qos, retain, payload)
            .await
            .map_err(|_| PublishError::new(PublishErrorKind::DetachedClient))
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), SubscribeError> {
        self.subscribe(topic, qos)
            .await
            .map_err(|_| SubscribeError::new(SubscribeErrorKind::DetachedClient))
    }

    async fn ack(&self, publish: &Publish) -> Result<(), AckError> {
        self.ack(publish)
            .await
            .map_err(|_| AckError::new(AckErrorKind::DetachedClient))
    }

    async fn disconnect(&self) -> Result<(), DisconnectError> {
        self.disconnect()
            .await
            .map_err(|_| DisconnectError::new(DisconnectErrorKind::DetachedClient))
    }
}

#[async_trait]
impl MqttEventLoop for EventLoop {
    async fn poll(&mut self) -> Result<Event, ConnectionError> {
        self.poll().await
    }
}

/// Generate a 20-character lowercase-alphanumeric client id, per the wire
/// protocol's client identifier convention.
#[must_use]
pub fn random_client_id() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..20)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// The outgoing publish queue capacity mandated for fleet-protocol sessions.
pub const OUTGOING_QUEUE_CAP: usize = 20;

#[cfg(test)]
mod tests {
    use super::random_client_id;

    #[test]
    fn client_id_has_expected_length_and_charset() {
        let id = random_client_id();
        assert_eq!(id.len(), 20);
        assert!(id.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
    }

    #[test]
    fn client_ids_are_not_trivially_constant() {
        let a = random_client_id();
        let b = random_client_id();
        assert_ne!(a, b);
    }
}
