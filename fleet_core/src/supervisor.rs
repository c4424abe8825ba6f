//! Multi-car supervisor (C10): owns one [`CarServer`] task per configured
//! car and fans out start/stop across them.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_mqtt::topic::{CarTopics, TopicSegmentError};
use fleet_mqtt::{new_client, random_client_id, MqttConnectionSettingsBuilder, OUTGOING_QUEUE_CAP};
use fleet_protocol::plugin::ffi::FfiModulePlugin;
use fleet_protocol::ModulePlugin;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::car_server::CarServer;
use crate::config::{ServerConfig, TlsSettings};
use crate::event::channel;

/// Errors that can prevent the supervisor from starting a car.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A company or car name is not a valid topic segment.
    #[error("car {car}: invalid topic segment: {source}")]
    InvalidTopic {
        /// The car the invalid segment belongs to.
        car: String,
        /// The underlying validation error.
        #[source]
        source: TopicSegmentError,
    },
    /// Building the MQTT connection settings for a car failed.
    #[error("car {car}: invalid mqtt connection settings: {source}")]
    ConnectionSettings {
        /// The car whose settings were rejected.
        car: String,
        /// The underlying validation error.
        #[source]
        source: fleet_mqtt::MqttConnectionSettingsBuilderError,
    },
    /// The TLS material named in the car's settings could not be loaded.
    #[error("car {car}: tls setup failed: {source}")]
    Tls {
        /// The car whose TLS setup failed.
        car: String,
        /// The underlying TLS error.
        #[source]
        source: fleet_mqtt::error::TlsError,
    },
    /// Loading a configured module's plugin failed.
    #[error("car {car}: failed to load module {module}: {source}")]
    ModuleLoad {
        /// The car the module belongs to.
        car: String,
        /// The module id that failed to load.
        module: u32,
        /// The underlying plugin error.
        #[source]
        source: fleet_protocol::PluginError,
    },
    /// The car's module plugin rejected its configured module id.
    #[error("car {car}: module {module} host setup failed: {reason}")]
    ModuleHost {
        /// The car the module belongs to.
        car: String,
        /// The module id that failed to start.
        module: u32,
        /// Human-readable reason reported by the module host.
        reason: String,
    },
}

/// Owns one running [`CarServer`] task per configured car.
pub struct Supervisor {
    config: Arc<ServerConfig>,
    tls: Option<TlsSettings>,
    tasks: HashMap<String, (JoinHandle<()>, CancellationToken)>,
}

impl Supervisor {
    /// Build a supervisor for `config`, applying `tls` (if given) to every
    /// car's MQTT connection. Does not connect or start any car.
    #[must_use]
    pub fn new(config: ServerConfig, tls: Option<TlsSettings>) -> Self {
        Self {
            config: Arc::new(config),
            tls,
            tasks: HashMap::new(),
        }
    }

    /// Build and start every configured car's server as its own task.
    ///
    /// # Errors
    /// Returns the first [`SupervisorError`] encountered while constructing
    /// a car's connection settings or loading its modules; cars already
    /// started remain running.
    pub async fn start(&mut self) -> Result<(), SupervisorError> {
        let car_names: Vec<String> = self.config.cars.keys().cloned().collect();
        for car_name in car_names {
            self.start_car(&car_name).await?;
        }
        Ok(())
    }

    async fn start_car(&mut self, car_name: &str) -> Result<(), SupervisorError> {
        let car_config = self
            .config
            .cars
            .get(car_name)
            .expect("car_name sourced from config.cars.keys()")
            .clone();
        let company = self.config.company_name.clone();

        let company_segment = fleet_mqtt::topic::TopicSegment::new(company.clone())
            .map_err(|source| SupervisorError::InvalidTopic {
                car: car_name.to_string(),
                source,
            })?;
        let car_segment = fleet_mqtt::topic::TopicSegment::new(car_name)
            .map_err(|source| SupervisorError::InvalidTopic {
                car: car_name.to_string(),
                source,
            })?;
        let topics = CarTopics::new(&company_segment, &car_segment);

        let builder = MqttConnectionSettingsBuilder::default()
            .client_id(random_client_id())
            .hostname(self.config.mqtt_address.clone())
            .port(self.config.mqtt_port);
        let builder = match &self.tls {
            Some(tls) => builder
                .use_tls(true)
                .ca_file(Some(tls.ca_file.clone()))
                .cert_file(tls.cert_file.clone())
                .key_file(tls.key_file.clone()),
            None => builder.use_tls(false),
        };
        let settings = builder
            .build()
            .map_err(|source| SupervisorError::ConnectionSettings {
                car: car_name.to_string(),
                source,
            })?;

        // Validate once up front so a misconfigured car fails fast at
        // startup rather than on its first reconnection attempt.
        new_client(&settings, OUTGOING_QUEUE_CAP).map_err(|source| SupervisorError::Tls {
            car: car_name.to_string(),
            source,
        })?;

        let (events_tx, events_rx) = channel();
        let transport: crate::car_server::TransportFactory<_, _> = Arc::new(move || {
            new_client(&settings, OUTGOING_QUEUE_CAP).map_err(|e| e.to_string())
        });

        let mut server = CarServer::new(
            company,
            car_name.to_string(),
            self.config.clone(),
            topics,
            transport,
            events_rx,
            events_tx,
        );

        for (&module_id, module_config) in &car_config.modules {
            let entries: Vec<(Vec<u8>, Vec<u8>)> = module_config
                .config
                .iter()
                .map(|(k, v)| (k.clone().into_bytes(), v.clone().into_bytes()))
                .collect();
            let plugin = unsafe { FfiModulePlugin::load(&module_config.lib_path, &entries) }
                .map_err(|source| SupervisorError::ModuleLoad {
                    car: car_name.to_string(),
                    module: module_id,
                    source,
                })?;
            let plugin: Box<dyn ModulePlugin> = Box::new(plugin);
            server
                .add_module(module_id, plugin)
                .map_err(|e| SupervisorError::ModuleHost {
                    car: car_name.to_string(),
                    module: module_id,
                    reason: e.to_string(),
                })?;
        }

        let token = server.stop_token();
        let handle = tokio::spawn(async move {
            let mut server = server;
            server.start().await;
        });
        self.tasks.insert(car_name.to_string(), (handle, token));
        Ok(())
    }

    /// Stop every running car and wait for its task to finish.
    pub async fn stop(&mut self) {
        for (car_name, (_, token)) in &self.tasks {
            log::info!("stopping car {car_name}");
            token.cancel();
        }
        for (car_name, (handle, _)) in self.tasks.drain() {
            if let Err(e) = handle.await {
                log::warn!("car {car_name} task panicked: {e}");
            }
        }
    }

    /// Names of the currently running cars.
    #[must_use]
    pub fn running_cars(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }
}
