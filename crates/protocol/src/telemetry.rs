use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Epoch marker attached to a frame by the broker or the device.
///
/// Devices have been seen sending both integers and strings, so both are
/// accepted and rendered verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Int(v) => write!(f, "{v}"),
            Timestamp::Float(v) => write!(f, "{v}"),
            Timestamp::Text(v) => f.write_str(v),
        }
    }
}

/// One UE session as reported inside a telemetry frame.
///
/// Only `rnti` and `rsrp` are interpreted; every other field is carried
/// through untouched, in the order the device sent it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UeRecord {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl UeRecord {
    /// Session identifier, normalised to a string.
    pub fn rnti(&self) -> Option<String> {
        match self.fields.get("rnti")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Signal strength in dBm. Accepts numbers and numeric strings.
    pub fn rsrp(&self) -> Option<f64> {
        match self.fields.get("rsrp")? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// One message delivered on a device's telemetry topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub timestamp: Timestamp,
    /// Absent and `null` both read as no UEs.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub ues: Vec<UeRecord>,
    /// Top-level fields other than `timestamp` and `ues`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<UeRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<UeRecord>>::deserialize(deserializer)?.unwrap_or_default())
}

impl TelemetryFrame {
    /// Parses a MESSAGE body.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Whether the frame reports at least one UE.
    pub fn has_ues(&self) -> bool {
        !self.ues.is_empty()
    }
}
