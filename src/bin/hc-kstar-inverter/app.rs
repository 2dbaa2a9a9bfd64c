use color_eyre::eyre::{Result, WrapErr};
use hc_kstar_inverter::{
    app_state::{AppEvent, AppState},
    config_record::{ConfigRecord, CONFIG_FILE},
    integration::Integration,
    settings::{env_name, Settings, CHANNEL_CAPACITY},
};
use tokio::sync::mpsc::{self, Receiver};

use crate::app_env::get_data_dir;

pub async fn initialize_app(settings: &Settings) -> Result<(Receiver<AppEvent>, AppState)> {
    // Resolve the inverter to talk to
    // =====================================================
    let record_path = get_data_dir(settings.app.data_dir.as_deref()).join(CONFIG_FILE);
    let record = ConfigRecord::resolve(settings.inverter.host.as_deref(), &record_path, &env_name("HOST"))?;
    log::info!("Using inverter [{}]", record.title());

    // Connect and create sensors
    // =====================================================
    let integration = Integration::setup(record, settings)
        .await
        .wrap_err("Cannot set up the inverter integration")?;

    for sensor in integration.sensors() {
        let identity = sensor.identify();
        log::debug!(
            "Sensor {}: {}",
            identity.entity_id,
            serde_json::to_string(&identity).unwrap_or_default()
        );
    }

    let (app_event_sender, app_event_receiver) = mpsc::channel::<AppEvent>(CHANNEL_CAPACITY);
    let mut state = AppState::new(integration, app_event_sender);
    state.start_forwarders();

    Ok((app_event_receiver, state))
}

pub async fn deinitialize_app(mut state: AppState) -> Result<()> {
    state.stop_forwarders();
    if let Some(integration) = state.integration.take() {
        integration.unload().await;
    }
    log::debug!("Deinitialized app...");
    Ok(())
}
