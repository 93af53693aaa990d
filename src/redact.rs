//! Field-level redaction of event payloads.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::Result;
use crate::error::Error;
use crate::event::RawEvent;

/// Fields to strip from event payloads, keyed by schema then table.
///
/// Redaction happens once per event, before the merge patch is computed, so
/// redacted fields never appear in `payload`, `previous`, or `changes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct FieldRedactions(HashMap<String, HashMap<String, HashSet<String>>>);

impl FieldRedactions {
   /// Decodes the JSON text form `{"schema": {"table": ["field", …]}}`.
   pub fn parse(text: &str) -> Result<Self> {
      serde_json::from_str(text).map_err(Error::Redactions)
   }

   pub fn is_empty(&self) -> bool {
      self.0.is_empty()
   }

   /// Removes every configured field for the event's schema and table from
   /// its `payload` and `previous` maps. Absent maps are a no-op.
   pub fn redact(&self, event: &mut RawEvent) {
      let Some(tables) = self.0.get(&event.schema) else {
         return;
      };
      let Some(fields) = tables.get(&event.table) else {
         return;
      };
      for field in fields {
         if let Some(payload) = event.payload.as_mut() {
            payload.remove(field);
         }
         if let Some(previous) = event.previous.as_mut() {
            previous.remove(field);
         }
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::event::Operation;
   use serde_json::json;

   fn redactions() -> FieldRedactions {
      FieldRedactions::parse(r#"{"public":{"users":["password","email"]}}"#).unwrap()
   }

   fn user_event() -> RawEvent {
      serde_json::from_value(json!({
         "schema": "public",
         "table": "users",
         "op": "UPDATE",
         "id": "1",
         "payload": {"first_name": "a", "password": "_insecure_", "email": "someone@corp.com"},
         "previous": {"first_name": "a", "password": "_previous_", "email": "old@corp.com"}
      }))
      .unwrap()
   }

   #[test]
   fn parses_text_form() {
      let parsed =
         FieldRedactions::parse(r#"{"public":{"users":["first_name","last_name","email"]}}"#)
            .unwrap();
      assert!(!parsed.is_empty());
   }

   #[test]
   fn rejects_malformed_text() {
      let err = FieldRedactions::parse(r#"{"public": ["not", "a", "map"]}"#).unwrap_err();
      assert!(matches!(err, Error::Redactions(_)));
   }

   #[test]
   fn strips_fields_from_payload_and_previous() {
      let mut event = user_event();
      redactions().redact(&mut event);

      let payload = event.payload.unwrap();
      assert_eq!(payload.get("first_name"), Some(&json!("a")));
      assert!(payload.get("password").is_none());
      assert!(payload.get("email").is_none());

      let previous = event.previous.unwrap();
      assert!(previous.get("password").is_none());
      assert!(previous.get("email").is_none());
   }

   #[test]
   fn missing_payload_is_noop() {
      let mut event = RawEvent {
         schema: "public".into(),
         table: "users".into(),
         op: Operation::Delete,
         id: String::new(),
         payload: None,
         previous: None,
      };
      redactions().redact(&mut event);
      assert!(event.payload.is_none());
      assert!(event.previous.is_none());
   }

   #[test]
   fn unmatched_table_is_untouched() {
      let mut event = user_event();
      event.table = "orders".into();
      let expected = event.clone();
      redactions().redact(&mut event);
      assert_eq!(event, expected);
   }

   #[test]
   fn redaction_is_idempotent() {
      let mut once = user_event();
      redactions().redact(&mut once);
      let mut twice = once.clone();
      redactions().redact(&mut twice);
      assert_eq!(once, twice);
   }
}
