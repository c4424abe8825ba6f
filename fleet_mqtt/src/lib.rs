#![warn(missing_docs)]

//! MQTT 3.1.1 transport for a single car's connection to the fleet-protocol broker.

pub use crate::connection_settings::{
    MqttConnectionSettings, MqttConnectionSettingsBuilder, MqttConnectionSettingsBuilderError,
};
pub use crate::rumqttc_adapter::{new_client, random_client_id, OUTGOING_QUEUE_CAP};
pub use crate::topic::{CarTopics, TopicSegment, TopicSegmentError};

mod connection_settings;
pub mod control_packet;
pub mod error;
pub mod interface;
mod rumqttc_adapter;
pub mod topic;

#[macro_use]
extern crate derive_builder;
