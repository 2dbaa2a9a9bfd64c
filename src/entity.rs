use std::fmt;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::snapshot::Snapshot;

pub const DOMAIN: &str = "kstar";

pub type Accessor = fn(&Snapshot) -> Option<f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Unit {
    #[serde(rename = "°C")]
    Celsius,
    #[serde(rename = "kWh")]
    KiloWattHour,
    #[serde(rename = "W")]
    Watt,
    #[serde(rename = "kW")]
    KiloWatt,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Celsius => "°C",
            Unit::KiloWattHour => "kWh",
            Unit::Watt => "W",
            Unit::KiloWatt => "kW",
        }
    }

    /// Converts `value` from this unit into `target`, if the two measure the same quantity.
    pub fn convert(self, value: f64, target: Unit) -> Option<f64> {
        match (self, target) {
            (from, to) if from == to => Some(value),
            (Unit::Watt, Unit::KiloWatt) => Some(value / 1000.0),
            (Unit::KiloWatt, Unit::Watt) => Some(value * 1000.0),
            _ => None,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Temperature,
    Energy,
    Power,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Total,
    TotalIncreasing,
}

/// What an entity shows. `Unavailable` is never the same as a zero reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntityValue {
    Value(f64),
    Unavailable,
}

impl EntityValue {
    pub fn value(self) -> Option<f64> {
        match self {
            EntityValue::Value(v) => Some(v),
            EntityValue::Unavailable => None,
        }
    }
}

impl From<Option<f64>> for EntityValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(EntityValue::Unavailable, EntityValue::Value)
    }
}

impl fmt::Display for EntityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityValue::Value(v) => write!(f, "{}", v),
            EntityValue::Unavailable => f.write_str("unavailable"),
        }
    }
}

/// Static description of one sensor: how it is named, in which unit it reports and where
/// its value lives in a [`Snapshot`].
#[derive(Clone)]
pub struct EntityBinding {
    pub key: &'static str,
    pub name: &'static str,
    pub unit: Unit,
    pub suggested_unit: Option<Unit>,
    pub device_class: DeviceClass,
    pub state_class: Option<StateClass>,
    pub accessor: Accessor,
}

impl fmt::Debug for EntityBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityBinding")
            .field("key", &self.key)
            .field("unit", &self.unit)
            .field("device_class", &self.device_class)
            .field("state_class", &self.state_class)
            .finish_non_exhaustive()
    }
}

impl EntityBinding {
    pub fn evaluate(&self, snapshot: &Snapshot) -> EntityValue {
        (self.accessor)(snapshot).into()
    }

    pub fn unique_id(&self) -> String {
        format!("solar_inverter_{}", self.key).to_lowercase()
    }

    pub fn entity_id(&self) -> String {
        format!("{}.solar_inverter_{}", DOMAIN, self.key)
    }

    /// Unit the value should be displayed in.
    pub fn display_unit(&self) -> Unit {
        self.suggested_unit.unwrap_or(self.unit)
    }

    pub fn to_display(&self, value: EntityValue) -> EntityValue {
        value.value().and_then(|v| self.unit.convert(v, self.display_unit())).into()
    }
}

pub static ENTITY_BINDINGS: Lazy<Vec<EntityBinding>> = Lazy::new(|| {
    vec![
        EntityBinding {
            key: "temperature",
            name: "Temperature",
            unit: Unit::Celsius,
            suggested_unit: None,
            device_class: DeviceClass::Temperature,
            state_class: None,
            accessor: |data| data.get("stats", "temperature"),
        },
        EntityBinding {
            key: "energy_today",
            name: "Energy Today",
            unit: Unit::KiloWattHour,
            suggested_unit: None,
            device_class: DeviceClass::Energy,
            state_class: Some(StateClass::TotalIncreasing),
            accessor: |data| data.get("stats", "energy_today"),
        },
        EntityBinding {
            key: "energy_total",
            name: "Energy Total",
            unit: Unit::KiloWattHour,
            suggested_unit: None,
            device_class: DeviceClass::Energy,
            state_class: Some(StateClass::Total),
            accessor: |data| data.get("stats", "energy_total"),
        },
        EntityBinding {
            key: "pv_power",
            name: "PV Power",
            unit: Unit::Watt,
            suggested_unit: Some(Unit::KiloWatt),
            device_class: DeviceClass::Power,
            state_class: None,
            accessor: |data| data.get("pv", "power"),
        },
        EntityBinding {
            key: "grid_power",
            name: "Grid Power",
            unit: Unit::Watt,
            suggested_unit: Some(Unit::KiloWatt),
            device_class: DeviceClass::Power,
            state_class: None,
            accessor: |data| data.get("grid", "power"),
        },
        EntityBinding {
            key: "load_power",
            name: "Load Power",
            unit: Unit::Watt,
            suggested_unit: Some(Unit::KiloWatt),
            device_class: DeviceClass::Power,
            state_class: None,
            accessor: |data| data.get("load", "power"),
        },
    ]
});

pub fn binding(key: &str) -> Option<&'static EntityBinding> {
    ENTITY_BINDINGS.iter().find(|b| b.key == key)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use super::*;

    fn sample() -> Snapshot {
        Snapshot::from_json(json!({
            "stats": {"temperature": 21.5, "energy_today": 3.2, "energy_total": 1000.0},
            "pv": {"power": 1500},
            "grid": {"power": -200},
            "load": {"power": 1300}
        }))
        .unwrap()
    }

    fn value_of(key: &str, snapshot: &Snapshot) -> EntityValue {
        binding(key).unwrap().evaluate(snapshot)
    }

    #[test]
    fn evaluates_every_binding() {
        let snapshot = sample();
        assert_eq!(value_of("temperature", &snapshot), EntityValue::Value(21.5));
        assert_eq!(value_of("energy_today", &snapshot), EntityValue::Value(3.2));
        assert_eq!(value_of("energy_total", &snapshot), EntityValue::Value(1000.0));
        assert_eq!(value_of("pv_power", &snapshot), EntityValue::Value(1500.0));
        assert_eq!(value_of("grid_power", &snapshot), EntityValue::Value(-200.0));
        assert_eq!(value_of("load_power", &snapshot), EntityValue::Value(1300.0));
    }

    #[test]
    fn missing_field_is_unavailable_not_zero() {
        let snapshot = Snapshot::from_json(json!({"stats": {"energy_today": 0.0}})).unwrap();
        let temperature = value_of("temperature", &snapshot);
        assert_eq!(temperature, EntityValue::Unavailable);
        assert_ne!(temperature, EntityValue::Value(0.0));
        assert_eq!(value_of("energy_today", &snapshot), EntityValue::Value(0.0));
        assert_eq!(value_of("pv_power", &Snapshot::default()), EntityValue::Unavailable);
    }

    #[test]
    fn ids_follow_key() {
        let pv = binding("pv_power").unwrap();
        assert_eq!(pv.unique_id(), "solar_inverter_pv_power");
        assert_eq!(pv.entity_id(), "kstar.solar_inverter_pv_power");
    }

    #[test]
    fn keys_are_unique_and_ordered() {
        let keys: Vec<_> = ENTITY_BINDINGS.iter().map(|b| b.key).collect();
        assert_eq!(
            keys,
            ["temperature", "energy_today", "energy_total", "pv_power", "grid_power", "load_power"]
        );
        assert_eq!(keys.iter().collect::<HashSet<_>>().len(), keys.len());
    }

    #[test]
    fn power_is_displayed_in_kilowatts() {
        let grid = binding("grid_power").unwrap();
        assert_eq!(grid.display_unit(), Unit::KiloWatt);
        assert_eq!(grid.to_display(EntityValue::Value(-200.0)), EntityValue::Value(-0.2));
        assert_eq!(grid.to_display(EntityValue::Unavailable), EntityValue::Unavailable);

        let temperature = binding("temperature").unwrap();
        assert_eq!(temperature.display_unit(), Unit::Celsius);
        assert_eq!(temperature.to_display(EntityValue::Value(21.5)), EntityValue::Value(21.5));
    }

    #[test]
    fn incompatible_units_do_not_convert() {
        assert_eq!(Unit::Celsius.convert(1.0, Unit::Watt), None);
        assert_eq!(Unit::KiloWatt.convert(1.5, Unit::Watt), Some(1500.0));
    }
}
