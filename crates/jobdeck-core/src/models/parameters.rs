use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParameterValue {
    String(String),
    Long(i64),
    Double(f64),
    Date(SystemTime),
}

impl ParameterValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::Date(_) => "date",
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(value) => Some(*value),
            _ => None,
        }
    }

    fn canonical(&self) -> String {
        match self {
            Self::String(value) => value.clone(),
            Self::Long(value) => value.to_string(),
            // -0.0 == 0.0, so both must render alike.
            Self::Double(value) if *value == 0.0 => "0".to_string(),
            Self::Double(value) => value.to_string(),
            Self::Date(value) => value
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_millis().to_string())
                .unwrap_or_else(|error| format!("-{}", error.duration().as_millis())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    pub value: ParameterValue,
    pub identifying: bool,
}

/// Immutable-by-convention parameter set handed to a job launch.
///
/// Only identifying entries take part in instance identity; see
/// [`JobParameters::identity_key`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParameters {
    entries: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameter(
        mut self,
        key: impl Into<String>,
        value: ParameterValue,
        identifying: bool,
    ) -> Self {
        self.entries
            .insert(key.into(), JobParameter { value, identifying });
        self
    }

    pub fn with_string(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_parameter(key, ParameterValue::String(value.into()), true)
    }

    pub fn with_long(self, key: impl Into<String>, value: i64) -> Self {
        self.with_parameter(key, ParameterValue::Long(value), true)
    }

    pub fn with_double(self, key: impl Into<String>, value: f64) -> Self {
        self.with_parameter(key, ParameterValue::Double(value), true)
    }

    pub fn with_date(self, key: impl Into<String>, value: SystemTime) -> Self {
        self.with_parameter(key, ParameterValue::Date(value), true)
    }

    pub fn get(&self, key: &str) -> Option<&JobParameter> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn identifying(&self) -> JobParameters {
        JobParameters {
            entries: self
                .entries
                .iter()
                .filter(|(_, parameter)| parameter.identifying)
                .map(|(key, parameter)| (key.clone(), parameter.clone()))
                .collect(),
        }
    }

    /// Canonical rendering of the identifying entries, stable under insertion
    /// order. Each entry is a JSON `[key, type, value]` triple, so values
    /// containing separators cannot collide with other parameter sets.
    pub fn identity_key(&self) -> String {
        let entries: Vec<serde_json::Value> = self
            .entries
            .iter()
            .filter(|(_, parameter)| parameter.identifying)
            .map(|(key, parameter)| {
                serde_json::json!([
                    key,
                    parameter.value.type_name(),
                    parameter.value.canonical()
                ])
            })
            .collect();
        serde_json::Value::Array(entries).to_string()
    }

    pub fn same_identity(&self, other: &JobParameters) -> bool {
        self.identity_key() == other.identity_key()
    }
}
