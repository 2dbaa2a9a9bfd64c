use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use hc_kstar_inverter::{
    app_state::{AppEvent, AppState},
    client::{DeviceClient, FetchError},
    config_record::ConfigRecord,
    coordinator::CoordinatorState,
    entity::{EntityValue, ENTITY_BINDINGS},
    integration::{Integration, SetupError},
    settings::Settings,
    snapshot::Snapshot,
};
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::mpsc;

struct ScriptedInverter {
    readings: Mutex<VecDeque<Result<Snapshot, FetchError>>>,
    calls: AtomicUsize,
}

impl ScriptedInverter {
    fn new(readings: Vec<Result<Snapshot, FetchError>>) -> Arc<Self> {
        Arc::new(Self {
            readings: Mutex::new(readings.into()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DeviceClient for ScriptedInverter {
    async fn fetch_latest(&self) -> Result<Snapshot, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.readings
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Timeout("inverter went quiet".to_string())))
    }
}

fn full_reading() -> Snapshot {
    Snapshot::from_json(json!({
        "stats": {"temperature": 21.5, "energy_today": 3.2, "energy_total": 1000.0},
        "pv": {"power": 1500},
        "grid": {"power": -200},
        "load": {"power": 1300}
    }))
    .unwrap()
}

fn reading_with_pv(power: f64) -> Snapshot {
    Snapshot::from_json(json!({
        "stats": {"temperature": 30.0, "energy_today": 4.0, "energy_total": 1001.0},
        "pv": {"power": power},
        "grid": {"power": 0},
        "load": {"power": power}
    }))
    .unwrap()
}

fn timeout() -> Result<Snapshot, FetchError> {
    Err(FetchError::Timeout("deadline elapsed".to_string()))
}

fn record() -> ConfigRecord {
    ConfigRecord::new("192.168.1.50").unwrap()
}

async fn setup(readings: Vec<Result<Snapshot, FetchError>>) -> Result<Integration, SetupError> {
    Integration::setup_with_client(record(), &Settings::default(), ScriptedInverter::new(readings)).await
}

fn value(integration: &Integration, key: &str) -> EntityValue {
    integration.sensor(key).unwrap().current_value()
}

#[tokio::test]
async fn reading_maps_to_entities() {
    let integration = setup(vec![Ok(full_reading())]).await.unwrap();

    assert_eq!(integration.sensors().len(), ENTITY_BINDINGS.len());
    assert_eq!(value(&integration, "temperature"), EntityValue::Value(21.5));
    assert_eq!(value(&integration, "energy_today"), EntityValue::Value(3.2));
    assert_eq!(value(&integration, "energy_total"), EntityValue::Value(1000.0));
    assert_eq!(value(&integration, "pv_power"), EntityValue::Value(1500.0));
    assert_eq!(value(&integration, "grid_power"), EntityValue::Value(-200.0));
    assert_eq!(value(&integration, "load_power"), EntityValue::Value(1300.0));

    integration.unload().await;
}

#[tokio::test]
async fn first_refresh_failure_creates_no_sensors() {
    let err = setup(vec![timeout()]).await.unwrap_err();
    assert!(matches!(err, SetupError::FirstRefresh(ref e) if e.is_timeout()));

    let err = setup(vec![Err(FetchError::Status(StatusCode::BAD_GATEWAY))]).await.unwrap_err();
    assert!(matches!(err, SetupError::FirstRefresh(ref e) if !e.is_timeout()));
}

#[tokio::test]
async fn missing_temperature_is_unavailable() {
    let reading = Snapshot::from_json(json!({
        "stats": {"energy_today": 0.0, "energy_total": 12.0},
        "pv": {"power": 0}
    }))
    .unwrap();
    let integration = setup(vec![Ok(reading)]).await.unwrap();

    assert_eq!(value(&integration, "temperature"), EntityValue::Unavailable);
    assert_eq!(value(&integration, "energy_today"), EntityValue::Value(0.0));
    assert_eq!(value(&integration, "pv_power"), EntityValue::Value(0.0));
    assert_eq!(value(&integration, "grid_power"), EntityValue::Unavailable);
    assert!(integration.sensor("temperature").unwrap().available());

    integration.unload().await;
}

#[tokio::test]
async fn timeouts_after_success_keep_first_reading() {
    let first = full_reading();
    let integration = setup(vec![Ok(first.clone()), timeout(), timeout()]).await.unwrap();
    let coordinator = integration.coordinator();

    coordinator.refresh_now().await;
    coordinator.refresh_now().await;

    match coordinator.current_state() {
        CoordinatorState::Degraded { last_good, .. } => assert!(last_good.unwrap().same_reading(&first)),
        other => panic!("expected degraded, got {other:?}"),
    }
    assert_eq!(value(&integration, "temperature"), EntityValue::Value(21.5));
    assert_eq!(value(&integration, "grid_power"), EntityValue::Value(-200.0));
    assert!(integration.sensors().iter().all(|s| !s.available()));

    integration.unload().await;
}

#[tokio::test]
async fn entities_track_the_newest_reading() {
    let readings = vec![
        Ok(reading_with_pv(100.0)),
        Ok(reading_with_pv(200.0)),
        timeout(),
        Ok(reading_with_pv(300.0)),
    ];
    let integration = setup(readings).await.unwrap();
    let coordinator = integration.coordinator();

    for expected in [200.0, 200.0, 300.0] {
        coordinator.refresh_now().await;
        let snapshot = coordinator.current_snapshot().unwrap();
        for sensor in integration.sensors() {
            assert_eq!(sensor.current_value(), sensor.binding().evaluate(&snapshot));
        }
        assert_eq!(value(&integration, "pv_power"), EntityValue::Value(expected));
    }

    integration.unload().await;
}

#[tokio::test(start_paused = true)]
async fn polls_on_the_configured_interval() {
    let inverter = ScriptedInverter::new(vec![
        Ok(reading_with_pv(1.0)),
        Ok(reading_with_pv(2.0)),
        timeout(),
        Ok(reading_with_pv(4.0)),
    ]);
    let mut settings = Settings::default();
    settings.app.poll_interval = Duration::from_secs(60);

    let integration = Integration::setup_with_client(record(), &settings, inverter.clone())
        .await
        .unwrap();
    assert_eq!(inverter.calls.load(Ordering::SeqCst), 1);
    assert!(integration.coordinator().is_running());

    tokio::time::sleep(Duration::from_secs(2 * 60 + 1)).await;
    assert_eq!(inverter.calls.load(Ordering::SeqCst), 3);
    assert_eq!(value(&integration, "pv_power"), EntityValue::Value(2.0));
    assert!(!integration.coordinator().last_update_success());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(value(&integration, "pv_power"), EntityValue::Value(4.0));
    assert!(integration.coordinator().last_update_success());

    let coordinator = integration.coordinator().clone();
    integration.unload().await;
    assert!(!coordinator.is_running());
    assert_eq!(coordinator.subscriber_count(), 0);
}

#[tokio::test]
async fn forwards_values_and_availability() {
    let integration = setup(vec![Ok(full_reading()), timeout(), Ok(reading_with_pv(50.0))])
        .await
        .unwrap();
    let coordinator = integration.coordinator().clone();
    let (sender, mut receiver) = mpsc::channel(64);
    let mut state = AppState::new(integration, sender);
    state.start_forwarders();

    let mut initial = Vec::new();
    for _ in 0..ENTITY_BINDINGS.len() + 1 {
        initial.push(receiver.recv().await.unwrap());
    }
    assert!(initial.contains(&AppEvent::AvailabilityChanged(true)));
    assert!(initial.contains(&AppEvent::EntityChanged {
        key: "grid_power",
        value: EntityValue::Value(-200.0),
    }));

    coordinator.refresh_now().await;
    assert_eq!(receiver.recv().await.unwrap(), AppEvent::AvailabilityChanged(false));

    coordinator.refresh_now().await;
    let mut events = Vec::new();
    while events.len() < ENTITY_BINDINGS.len() + 1 {
        events.push(receiver.recv().await.unwrap());
    }
    assert!(events.contains(&AppEvent::AvailabilityChanged(true)));
    assert!(events.contains(&AppEvent::EntityChanged {
        key: "pv_power",
        value: EntityValue::Value(50.0),
    }));

    state.stop_forwarders();
    if let Some(integration) = state.integration.take() {
        integration.unload().await;
    }
}
