//! Re-exports of the MQTT 3.1.1 control packet types this crate's traits speak in.

/// Quality of Service
pub type QoS = rumqttc::QoS;

/// PUBLISH packet
pub type Publish = rumqttc::Publish;
