use serde::Serialize;
use tokio::sync::watch;

use crate::{
    coordinator::{PollCoordinator, Subscription},
    entity::{DeviceClass, EntityBinding, EntityValue, StateClass, Unit, DOMAIN},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: (String, String),
    pub manufacturer: String,
    pub model: String,
    pub name: String,
}

impl DeviceInfo {
    pub fn for_coordinator(coordinator: &PollCoordinator) -> Self {
        Self {
            identifiers: (DOMAIN.to_string(), coordinator.name().to_string()),
            manufacturer: "KStar".to_string(),
            model: "Solar Inverter".to_string(),
            name: coordinator.name().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityIdentity {
    pub unique_id: String,
    pub entity_id: String,
    pub name: String,
    pub unit: Unit,
    pub display_unit: Unit,
    pub device_class: DeviceClass,
    pub state_class: Option<StateClass>,
    pub device: DeviceInfo,
}

/// Republishes one [`EntityBinding`] of every snapshot the coordinator publishes.
///
/// The adapter keeps showing the last value while the coordinator is degraded; use
/// [`SensorAdapter::available`] to tell whether that value is current.
#[derive(Debug)]
pub struct SensorAdapter {
    binding: &'static EntityBinding,
    coordinator: PollCoordinator,
    value: watch::Receiver<EntityValue>,
    _subscription: Subscription,
}

impl SensorAdapter {
    pub fn new(coordinator: &PollCoordinator, binding: &'static EntityBinding) -> Self {
        let (sender, value) = watch::channel(EntityValue::Unavailable);

        // Seeded with the current snapshot under the subscriber lock, so a tick racing with
        // creation cannot leave the adapter one snapshot behind.
        let subscription = coordinator.subscribe_with_current(move |snapshot| {
            let next = binding.evaluate(snapshot);
            // Only wake watchers on an actual change.
            sender.send_if_modified(|current| {
                if *current == next {
                    false
                } else {
                    *current = next;
                    true
                }
            });
        });

        log::debug!("Created sensor {} ({})", binding.entity_id(), *value.borrow());
        Self {
            binding,
            coordinator: coordinator.clone(),
            value,
            _subscription: subscription,
        }
    }

    pub fn binding(&self) -> &'static EntityBinding {
        self.binding
    }

    pub fn key(&self) -> &'static str {
        self.binding.key
    }

    pub fn identify(&self) -> EntityIdentity {
        EntityIdentity {
            unique_id: self.binding.unique_id(),
            entity_id: self.binding.entity_id(),
            name: self.binding.name.to_string(),
            unit: self.binding.unit,
            display_unit: self.binding.display_unit(),
            device_class: self.binding.device_class,
            state_class: self.binding.state_class,
            device: DeviceInfo::for_coordinator(&self.coordinator),
        }
    }

    /// Value from the most recent good snapshot, in the binding's native unit.
    pub fn current_value(&self) -> EntityValue {
        *self.value.borrow()
    }

    /// Current value converted to the suggested display unit.
    pub fn display_value(&self) -> EntityValue {
        self.binding.to_display(self.current_value())
    }

    /// False while the coordinator is degraded or has not fetched yet.
    pub fn available(&self) -> bool {
        self.coordinator.last_update_success()
    }

    pub fn watch(&self) -> watch::Receiver<EntityValue> {
        self.value.clone()
    }
}
