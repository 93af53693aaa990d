//! JSON merge-patch generation (RFC 7396) for UPDATE events.

use serde_json::{Map, Value};

/// Computes the merge patch that transforms `a` into `b`.
///
/// An absent map is treated as empty. Keys added or changed in `b` appear
/// with their new value, keys removed from `a` appear as JSON null, unchanged
/// keys are omitted. Nested objects are diffed recursively so that applying
/// the result to `a` under RFC 7396 merge semantics yields `b`.
pub fn merge_patch(
   a: Option<&Map<String, Value>>,
   b: Option<&Map<String, Value>>,
) -> Map<String, Value> {
   let empty = Map::new();
   diff_maps(a.unwrap_or(&empty), b.unwrap_or(&empty))
}

fn diff_maps(a: &Map<String, Value>, b: &Map<String, Value>) -> Map<String, Value> {
   let mut patch = Map::new();
   for (key, new) in b {
      match a.get(key) {
         Some(old) if old == new => {}
         Some(Value::Object(old)) => {
            if let Value::Object(new) = new {
               patch.insert(key.clone(), Value::Object(diff_maps(old, new)));
            } else {
               patch.insert(key.clone(), new.clone());
            }
         }
         _ => {
            patch.insert(key.clone(), new.clone());
         }
      }
   }
   for key in a.keys() {
      if !b.contains_key(key) {
         patch.insert(key.clone(), Value::Null);
      }
   }
   patch
}
