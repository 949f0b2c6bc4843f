//! Flattening of buffered frames into a table, one row per frame.
//!
//! Only frames reporting at least one UE become rows. Each UE contributes a
//! column group: `<key>.<field>` where the key is the UE's position in the
//! frame ([`Alignment::Slot`]) or its RNTI ([`Alignment::Rnti`]). With slot
//! alignment, a slot that changes hands between frames mixes sessions in the
//! same columns.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use gnbwatch_protocol::{TelemetryFrame, UeRecord};

/// Name of the index column.
pub const INDEX_COLUMN: &str = "timestamp";

/// How UEs of different frames are matched to columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    /// By position in the frame's `ues` array.
    #[default]
    Slot,
    /// By the UE's `rnti`, falling back to `#<position>` when absent.
    Rnti,
}

/// One exported row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub timestamp: String,
    /// One cell per entry of [`Table::columns`]; `None` is written empty.
    pub cells: Vec<Option<String>>,
}

/// Flat table ready to be written out.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by name.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at `row` under column `name`.
    pub fn cell(&self, row: usize, name: &str) -> Option<&str> {
        let col = self.column(name)?;
        self.rows.get(row)?.cells.get(col)?.as_deref()
    }
}

/// Column groups in first-seen order, each with its fields in first-seen
/// order.
#[derive(Default)]
struct Schema {
    groups: Vec<(String, Vec<String>)>,
    group_index: HashMap<String, usize>,
    field_index: Vec<HashMap<String, usize>>,
}

impl Schema {
    fn locate(&mut self, group: &str, field: &str) -> (usize, usize) {
        let g = match self.group_index.get(group) {
            Some(&g) => g,
            None => {
                let g = self.groups.len();
                self.groups.push((group.to_string(), Vec::new()));
                self.group_index.insert(group.to_string(), g);
                self.field_index.push(HashMap::new());
                g
            }
        };
        let f = match self.field_index[g].get(field) {
            Some(&f) => f,
            None => {
                let f = self.groups[g].1.len();
                self.groups[g].1.push(field.to_string());
                self.field_index[g].insert(field.to_string(), f);
                f
            }
        };
        (g, f)
    }

    /// Column offset of each group in the final layout.
    fn offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.groups.len());
        let mut acc = 0;
        for (_, fields) in &self.groups {
            offsets.push(acc);
            acc += fields.len();
        }
        offsets
    }

    fn columns(&self) -> Vec<String> {
        self.groups
            .iter()
            .flat_map(|(key, fields)| fields.iter().map(move |f| format!("{key}.{f}")))
            .collect()
    }
}

type Placed = Vec<((usize, usize), Option<String>)>;

/// Turns frames into a table. Frames with an empty `ues` array are dropped;
/// duplicate timestamps stay separate rows.
pub fn flatten(frames: &[Arc<TelemetryFrame>], alignment: Alignment) -> Table {
    let mut schema = Schema::default();
    let mut pending: Vec<(String, Placed)> = Vec::new();

    for frame in frames.iter().filter(|f| f.has_ues()) {
        let mut placed = Placed::new();
        let mut used_keys: Vec<String> = Vec::with_capacity(frame.ues.len());
        for (index, ue) in frame.ues.iter().enumerate() {
            let key = group_key(ue, index, alignment, &used_keys);
            let mut leaves = Vec::new();
            flatten_fields(ue, &mut leaves);
            for (field, value) in leaves {
                placed.push((schema.locate(&key, &field), value));
            }
            used_keys.push(key);
        }
        pending.push((frame.timestamp.to_string(), placed));
    }

    let offsets = schema.offsets();
    let columns = schema.columns();
    let rows = pending
        .into_iter()
        .map(|(timestamp, placed)| {
            let mut cells = vec![None; columns.len()];
            for ((g, f), value) in placed {
                cells[offsets[g] + f] = value;
            }
            Row { timestamp, cells }
        })
        .collect();

    Table { columns, rows }
}

fn group_key(ue: &UeRecord, index: usize, alignment: Alignment, used: &[String]) -> String {
    match alignment {
        Alignment::Slot => index.to_string(),
        Alignment::Rnti => {
            let key = ue.rnti().unwrap_or_else(|| format!("#{index}"));
            if used.contains(&key) {
                format!("{key}#{index}")
            } else {
                key
            }
        }
    }
}

/// Leaf fields of a UE record; nested objects are joined with `.`.
fn flatten_fields(ue: &UeRecord, out: &mut Vec<(String, Option<String>)>) {
    for (name, value) in &ue.fields {
        flatten_value(name.clone(), value, out);
    }
}

fn flatten_value(path: String, value: &Value, out: &mut Vec<(String, Option<String>)>) {
    match value {
        Value::Object(map) => {
            for (name, inner) in map {
                flatten_value(format!("{path}.{name}"), inner, out);
            }
        }
        other => out.push((path, cell_text(other))),
    }
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}
