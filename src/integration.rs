use std::sync::Arc;

use thiserror::Error;

use crate::{
    client::{ClientError, DeviceClient, KStarClient},
    config_record::ConfigRecord,
    coordinator::{FirstRefreshError, PollCoordinator},
    entity::ENTITY_BINDINGS,
    sensor::SensorAdapter,
    settings::Settings,
};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("Inverter not ready: {0}")]
    FirstRefresh(#[from] FirstRefreshError),
}

/// A running inverter: its coordinator plus one sensor per entity binding.
#[derive(Debug)]
pub struct Integration {
    record: ConfigRecord,
    coordinator: PollCoordinator,
    sensors: Vec<SensorAdapter>,
}

impl Integration {
    /// Connects to the inverter described by `record` using the http client.
    pub async fn setup(record: ConfigRecord, settings: &Settings) -> Result<Self, SetupError> {
        let client = KStarClient::new(
            record.host(),
            &settings.inverter.data_path,
            settings.inverter.request_timeout,
        )?;
        Self::setup_with_client(record, settings, Arc::new(client)).await
    }

    /// Fails without creating any sensor when the first refresh fails.
    pub async fn setup_with_client(
        record: ConfigRecord,
        settings: &Settings,
        client: Arc<dyn DeviceClient>,
    ) -> Result<Self, SetupError> {
        let coordinator = PollCoordinator::new(record.host(), client, settings.app.poll_interval);

        coordinator.first_refresh().await?;

        log::info!("Creating KStar sensors for [{}]", record.title());
        let sensors = ENTITY_BINDINGS
            .iter()
            .map(|binding| SensorAdapter::new(&coordinator, binding))
            .collect();

        coordinator.start();

        Ok(Self {
            record,
            coordinator,
            sensors,
        })
    }

    pub fn record(&self) -> &ConfigRecord {
        &self.record
    }

    pub fn coordinator(&self) -> &PollCoordinator {
        &self.coordinator
    }

    pub fn sensors(&self) -> &[SensorAdapter] {
        &self.sensors
    }

    pub fn sensor(&self, key: &str) -> Option<&SensorAdapter> {
        self.sensors.iter().find(|s| s.key() == key)
    }

    /// Stops polling and removes all sensors.
    pub async fn unload(self) {
        log::info!("Unloading [{}]", self.record.title());
        drop(self.sensors);
        self.coordinator.stop().await;
    }
}
