use crate::event::{Event, Sid};
use serde_json::{Map, Value};
use smol_str::SmolStr;
use std::collections::HashMap;

/// Snapshot of the latest event per sid, projected onto the environment's frame schema. This is
/// the structure handed to the algorithm's `handle_frame` callback: rows persist across frames,
/// so each call sees the freshest known state of every sid it subscribed to.
#[derive(Clone, PartialEq, Debug)]
pub struct EventFrame {
    index: Vec<SmolStr>,
    rows: HashMap<Sid, Map<String, Value>>,
}

impl EventFrame {
    /// Constructs an empty [`EventFrame`] with the provided column schema.
    pub fn new(index: Vec<SmolStr>) -> Self {
        Self {
            index,
            rows: HashMap::new(),
        }
    }

    /// Columns of each row, in schema order.
    pub fn index(&self) -> &[SmolStr] {
        &self.index
    }

    /// Projects an event onto the schema and upserts it as the row for its sid. Dateless filler
    /// events carry no sid and are ignored.
    pub fn insert(&mut self, event: &Event) {
        let Some(sid) = event.sid() else {
            return;
        };

        let fields = match serde_json::to_value(event) {
            Ok(Value::Object(fields)) => fields,
            _ => return,
        };

        let row = self
            .index
            .iter()
            .map(|column| {
                let value = fields.get(column.as_str()).cloned().unwrap_or(Value::Null);
                (column.to_string(), value)
            })
            .collect();

        self.rows.insert(sid, row);
    }

    /// Row for a sid, if one has been observed.
    pub fn row(&self, sid: Sid) -> Option<&Map<String, Value>> {
        self.rows.get(&sid)
    }

    /// Sids with a row in the frame.
    pub fn sids(&self) -> impl Iterator<Item = Sid> + '_ {
        self.rows.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
