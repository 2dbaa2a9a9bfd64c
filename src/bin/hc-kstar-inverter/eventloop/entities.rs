use color_eyre::eyre::Result;
use hc_kstar_inverter::{
    app_state::{AppState, AvailabilityEvent, AvailabilityState},
    entity::{binding, EntityValue},
};

pub fn handle_entity_changed(key: &str, value: EntityValue, _state: &mut AppState) -> Result<bool> {
    let Some(binding) = binding(key) else {
        log::warn!("Value for unknown entity [{}]", key);
        return Ok(false);
    };

    match binding.to_display(value) {
        EntityValue::Value(v) => log::info!("{} -- {} {}", binding.entity_id(), v, binding.display_unit()),
        EntityValue::Unavailable => log::info!("{} -- unavailable", binding.entity_id()),
    }
    Ok(false)
}

pub fn handle_availability_changed(available: bool, state: &mut AppState) -> Result<bool> {
    let new_state = if available {
        AvailabilityState::Available
    } else {
        AvailabilityState::Unavailable
    };

    match state.availability.change_state(new_state) {
        Some(AvailabilityEvent::Online) => log::info!("Inverter online"),
        Some(AvailabilityEvent::Lost) => log::warn!("Inverter unavailable, showing last known values"),
        Some(AvailabilityEvent::Restored) => log::info!("Inverter available again"),
        None => {}
    }
    Ok(false)
}
