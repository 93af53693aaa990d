//! Row mutation events: the notification payload emitted by the trigger
//! procedure and the wire event delivered to subscribers.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// The kind of row mutation that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
   Insert,
   Update,
   Delete,
}

impl fmt::Display for Operation {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(match self {
         Operation::Insert => "INSERT",
         Operation::Update => "UPDATE",
         Operation::Delete => "DELETE",
      })
   }
}

/// A row mutation as decoded from the `pqstream_notify` channel.
///
/// Field presence follows the trigger procedure: DELETE carries the OLD row
/// in `payload`, INSERT carries the NEW row, UPDATE carries the NEW row plus
/// the OLD row in `previous`. Either map may have been shed by the trigger's
/// size ladder when the serialized notification approached the NOTIFY payload
/// limit, in which case only `{schema, table, op, id}` survives.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawEvent {
   pub schema: String,
   pub table: String,
   pub op: Operation,
   /// Text form of the row's `id` column; empty when the row has none.
   #[serde(default, deserialize_with = "null_as_default")]
   pub id: String,
   #[serde(default)]
   pub payload: Option<Map<String, Value>>,
   #[serde(default)]
   pub previous: Option<Map<String, Value>>,
}

/// The event delivered to subscribers.
///
/// `changes` is populated only for UPDATE events where both the new and the
/// old row survived the trigger's size ladder; it holds the RFC 7396 merge
/// patch transforming the old row into the new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
   pub schema: String,
   pub table: String,
   pub op: Operation,
   #[serde(default, deserialize_with = "null_as_default")]
   pub id: String,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub payload: Option<Map<String, Value>>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub changes: Option<Map<String, Value>>,
}

// The trigger emits `'id', json_extract_path(payload, 'id')::text`, which is
// JSON null for rows without an id column.
fn null_as_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
   D: Deserializer<'de>,
{
   Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde_json::json;

   #[test]
   fn decodes_insert_notification() {
      let raw: RawEvent = serde_json::from_str(
         r#"{"schema":"public","table":"notes","op":"INSERT","id":"1","payload":{"id":1,"note":"hi"},"previous":null}"#,
      )
      .unwrap();

      assert_eq!(raw.schema, "public");
      assert_eq!(raw.table, "notes");
      assert_eq!(raw.op, Operation::Insert);
      assert_eq!(raw.id, "1");
      assert_eq!(raw.payload.unwrap().get("note"), Some(&json!("hi")));
      assert!(raw.previous.is_none());
   }

   #[test]
   fn decodes_null_id_as_empty() {
      let raw: RawEvent = serde_json::from_str(
         r#"{"schema":"public","table":"audit","op":"DELETE","id":null,"payload":{"who":"x"}}"#,
      )
      .unwrap();

      assert_eq!(raw.id, "");
   }

   #[test]
   fn decodes_size_shed_notification() {
      // The fully shed form retains only the identifying quad.
      let raw: RawEvent = serde_json::from_str(
         r#"{"schema":"public","table":"notes","op":"UPDATE","id":"4"}"#,
      )
      .unwrap();

      assert_eq!(raw.op, Operation::Update);
      assert!(raw.payload.is_none());
      assert!(raw.previous.is_none());
   }

   #[test]
   fn rejects_unknown_operation() {
      let err = serde_json::from_str::<RawEvent>(
         r#"{"schema":"public","table":"notes","op":"TRUNCATE","id":""}"#,
      );
      assert!(err.is_err());
   }

   #[test]
   fn event_omits_absent_maps() {
      let event = Event {
         schema: "public".into(),
         table: "notes".into(),
         op: Operation::Delete,
         id: "1".into(),
         payload: None,
         changes: None,
      };

      let text = serde_json::to_string(&event).unwrap();
      assert_eq!(
         text,
         r#"{"schema":"public","table":"notes","op":"DELETE","id":"1"}"#
      );
   }

   #[test]
   fn operation_displays_wire_form() {
      assert_eq!(Operation::Insert.to_string(), "INSERT");
      assert_eq!(Operation::Update.to_string(), "UPDATE");
      assert_eq!(Operation::Delete.to_string(), "DELETE");
   }
}
