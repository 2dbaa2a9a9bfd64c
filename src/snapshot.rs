use std::{collections::BTreeMap, sync::Arc};

use serde_json::Value;
use thiserror::Error;

pub type Group = BTreeMap<String, f64>;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Expected a JSON object of measurement groups, got: {0}")]
    NotAnObject(&'static str),
}

/// One complete reading from the inverter, grouped as `group -> field -> value`
/// (e.g. `stats.temperature`, `pv.power`).
///
/// Cloning is cheap and shares the underlying data. There is no way to mutate a
/// snapshot once it is built; a newer reading always comes as a new snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot(Arc<BTreeMap<String, Group>>);

impl Snapshot {
    pub fn new(groups: BTreeMap<String, Group>) -> Self {
        Self(Arc::new(groups))
    }

    /// Builds a snapshot from the raw device payload.
    ///
    /// Groups that are not objects and fields that are not numbers are dropped, so they read
    /// as missing rather than failing the whole reading.
    pub fn from_json(value: Value) -> Result<Self, SnapshotError> {
        let Value::Object(raw_groups) = value else {
            return Err(SnapshotError::NotAnObject(json_kind(&value)));
        };

        let groups = raw_groups
            .into_iter()
            .filter_map(|(name, group)| match group {
                Value::Object(fields) => {
                    let fields = fields
                        .into_iter()
                        .filter_map(|(field, value)| value.as_f64().map(|v| (field, v)))
                        .collect::<Group>();
                    Some((name, fields))
                }
                _ => {
                    log::trace!("Skipping non-object measurement group [{}]", name);
                    None
                }
            })
            .collect();

        Ok(Self::new(groups))
    }

    pub fn get(&self, group: &str, field: &str) -> Option<f64> {
        self.0.get(group)?.get(field).copied()
    }

    pub fn group(&self, group: &str) -> Option<&Group> {
        self.0.get(group)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &Group)> {
        self.0.iter().map(|(name, group)| (name.as_str(), group))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when both handles point to the same published reading.
    pub fn same_reading(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
