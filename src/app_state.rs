use tokio::{sync::mpsc::Sender, task::JoinHandle};

use crate::{entity::EntityValue, integration::Integration};

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    EntityChanged { key: &'static str, value: EntityValue },
    AvailabilityChanged(bool),
    Exit,
}

pub struct AppState {
    pub integration: Option<Integration>,
    pub app_event_sender: Sender<AppEvent>,
    pub should_exit: bool,
    pub availability: AvailabilityState,
    forwarders: Vec<JoinHandle<()>>,
}

impl AppState {
    pub fn new(integration: Integration, app_event_sender: Sender<AppEvent>) -> Self {
        Self {
            integration: Some(integration),
            app_event_sender,
            should_exit: false,
            availability: AvailabilityState::Init,
            forwarders: Vec::new(),
        }
    }

    /// Forwards the current value of every sensor and the coordinator's availability into the
    /// app event channel, then every change of either.
    pub fn start_forwarders(&mut self) {
        let Some(integration) = &self.integration else {
            return;
        };

        for sensor in integration.sensors() {
            let key = sensor.key();
            let mut receiver = sensor.watch();
            let sender = self.app_event_sender.clone();
            self.forwarders.push(tokio::spawn(async move {
                loop {
                    let value = *receiver.borrow_and_update();
                    if let Err(err) = sender.send(AppEvent::EntityChanged { key, value }).await {
                        log::warn!("Error forwarding value of {}: {}", key, err);
                        break;
                    }
                    if receiver.changed().await.is_err() {
                        break;
                    }
                }
            }));
        }

        let mut state_receiver = integration.coordinator().watch_state();
        let sender = self.app_event_sender.clone();
        self.forwarders.push(tokio::spawn(async move {
            let mut available = None;
            loop {
                let now_available = state_receiver.borrow_and_update().is_healthy();
                if available != Some(now_available) {
                    available = Some(now_available);
                    if sender.send(AppEvent::AvailabilityChanged(now_available)).await.is_err() {
                        break;
                    }
                }
                if state_receiver.changed().await.is_err() {
                    break;
                }
            }
        }));
    }

    pub fn stop_forwarders(&mut self) {
        log::debug!("Stopping {} forwarders", self.forwarders.len());
        for handle in self.forwarders.drain(..) {
            handle.abort();
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AvailabilityState {
    Init,
    Available,
    Unavailable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AvailabilityEvent {
    Online,
    Lost,
    Restored,
}

impl AvailabilityState {
    pub fn change_state(&mut self, new_state: AvailabilityState) -> Option<AvailabilityEvent> {
        let event = match (&self, &new_state) {
            (AvailabilityState::Init, AvailabilityState::Available) => Some(AvailabilityEvent::Online),
            (AvailabilityState::Init | AvailabilityState::Available, AvailabilityState::Unavailable) => {
                Some(AvailabilityEvent::Lost)
            }
            (AvailabilityState::Unavailable, AvailabilityState::Available) => Some(AvailabilityEvent::Restored),
            _ => None, // No event if state change is not meaningful
        };

        *self = new_state;
        event
    }
}
