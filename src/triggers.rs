//! Installation and removal of the row-level notify triggers.
//!
//! Every managed table gets an AFTER INSERT OR UPDATE OR DELETE trigger bound
//! to the `pqstream_notify()` procedure, which publishes the mutated row as
//! JSON on the `pqstream_notify` channel. NOTIFY payloads are capped at about
//! 8000 bytes, so the procedure sheds `previous` and then `payload` until the
//! notification fits; the ingestion loop recovers shed payloads with a row
//! lookup.

use regex::Regex;
use sqlx::PgPool;
use tracing::debug;

use crate::Result;
use crate::error::Error;

pub(crate) const SQL_QUERY_TABLES: &str = "
SELECT table_name
  FROM information_schema.tables
 WHERE table_schema = 'public'
   AND table_type = 'BASE TABLE'
";

pub(crate) const SQL_TRIGGER_FUNCTION: &str = r#"
CREATE OR REPLACE FUNCTION pqstream_notify() RETURNS TRIGGER AS $$
    DECLARE
        payload json;
        previous json;
        notification json;
    BEGIN
        IF (TG_OP = 'DELETE') THEN
            payload = row_to_json(OLD);
        ELSE
            payload = row_to_json(NEW);
        END IF;
        IF (TG_OP = 'UPDATE') THEN
            previous = row_to_json(OLD);
        END IF;

        notification = json_build_object(
            'schema', TG_TABLE_SCHEMA,
            'table', TG_TABLE_NAME,
            'op', TG_OP,
            'id', json_extract_path(payload, 'id')::text,
            'payload', payload,
            'previous', previous);
        IF (length(notification::text) >= 8000) THEN
            notification = json_build_object(
                'schema', TG_TABLE_SCHEMA,
                'table', TG_TABLE_NAME,
                'op', TG_OP,
                'id', json_extract_path(payload, 'id')::text,
                'payload', payload);
        END IF;
        IF (length(notification::text) >= 8000) THEN
            notification = json_build_object(
                'schema', TG_TABLE_SCHEMA,
                'table', TG_TABLE_NAME,
                'op', TG_OP,
                'id', json_extract_path(payload, 'id')::text);
        END IF;

        PERFORM pg_notify('pqstream_notify', notification::text);
        RETURN NULL;
    END;
$$ LANGUAGE plpgsql;
"#;

// Table and trigger identifiers cannot be bound as query parameters; the
// names interpolated here come from the catalog query above.
pub(crate) fn install_trigger_sql(table: &str) -> String {
   format!(
      "CREATE TRIGGER pqstream_notify\n\
       AFTER INSERT OR UPDATE OR DELETE ON {table}\n    \
       FOR EACH ROW EXECUTE PROCEDURE pqstream_notify()"
   )
}

pub(crate) fn remove_trigger_sql(table: &str) -> String {
   format!("DROP TRIGGER IF EXISTS pqstream_notify ON {table}")
}

pub(crate) fn fetch_row_sql(table: &str, id_type: &str) -> String {
   format!("SELECT row_to_json(r)::text FROM (SELECT * FROM {table} WHERE id = $1::{id_type}) r")
}

/// Lists the base tables in schema `public` that match `filter`.
///
/// `None` matches every table. Order is whatever the catalog returns.
pub async fn table_names(pool: &PgPool, filter: Option<&Regex>) -> Result<Vec<String>> {
   let names: Vec<String> = sqlx::query_scalar(SQL_QUERY_TABLES)
      .fetch_all(pool)
      .await
      .map_err(Error::CatalogQuery)?;

   Ok(names
      .into_iter()
      .filter(|name| filter.is_none_or(|re| re.is_match(name)))
      .collect())
}

/// Creates the notify procedure and installs the trigger on every matching
/// table.
///
/// A per-table failure aborts the remaining installs; triggers already
/// created are left in place and [`remove_triggers`] cleans them up.
pub async fn install_triggers(pool: &PgPool, filter: Option<&Regex>) -> Result<()> {
   sqlx::query(SQL_TRIGGER_FUNCTION)
      .execute(pool)
      .await
      .map_err(Error::CreateFunction)?;

   let tables = table_names(pool, filter).await?;
   if tables.is_empty() {
      return Err(Error::NoTables);
   }
   for table in &tables {
      debug!(table = %table, "installing notify trigger");
      sqlx::query(&install_trigger_sql(table))
         .execute(pool)
         .await
         .map_err(|source| Error::InstallTrigger {
            table: table.clone(),
            source,
         })?;
   }
   Ok(())
}

/// Drops the notify trigger from every matching table.
///
/// Missing triggers are not an error. The procedure itself is left in place.
pub async fn remove_triggers(pool: &PgPool, filter: Option<&Regex>) -> Result<()> {
   for table in &table_names(pool, filter).await? {
      debug!(table = %table, "removing notify trigger");
      sqlx::query(&remove_trigger_sql(table))
         .execute(pool)
         .await
         .map_err(|source| Error::RemoveTrigger {
            table: table.clone(),
            source,
         })?;
   }
   Ok(())
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn catalog_query_targets_public_base_tables() {
      assert!(SQL_QUERY_TABLES.contains("information_schema.tables"));
      assert!(SQL_QUERY_TABLES.contains("table_schema = 'public'"));
      assert!(SQL_QUERY_TABLES.contains("table_type = 'BASE TABLE'"));
   }

   #[test]
   fn trigger_function_sheds_previous_then_payload() {
      assert!(SQL_TRIGGER_FUNCTION.contains("CREATE OR REPLACE FUNCTION pqstream_notify()"));
      assert!(SQL_TRIGGER_FUNCTION.contains("pg_notify('pqstream_notify'"));

      // Two shedding steps, both gated on the NOTIFY payload limit.
      assert_eq!(
         SQL_TRIGGER_FUNCTION
            .matches("length(notification::text) >= 8000")
            .count(),
         2
      );
      // The final form keeps the identifying quad and nothing else.
      let last = SQL_TRIGGER_FUNCTION.rfind("json_build_object").unwrap();
      let tail = &SQL_TRIGGER_FUNCTION[last..];
      assert!(tail.contains("'id'"));
      assert!(!tail.contains("'payload'"));
      assert!(!tail.contains("'previous'"));
   }

   #[test]
   fn install_sql_names_the_trigger_and_table() {
      let sql = install_trigger_sql("notes");
      assert!(sql.contains("CREATE TRIGGER pqstream_notify"));
      assert!(sql.contains("AFTER INSERT OR UPDATE OR DELETE ON notes"));
      assert!(sql.contains("FOR EACH ROW EXECUTE PROCEDURE pqstream_notify()"));
   }

   #[test]
   fn remove_sql_is_idempotent_form() {
      assert_eq!(
         remove_trigger_sql("notes"),
         "DROP TRIGGER IF EXISTS pqstream_notify ON notes"
      );
   }

   #[test]
   fn fetch_sql_casts_the_id_parameter() {
      assert_eq!(
         fetch_row_sql("notes", "integer"),
         "SELECT row_to_json(r)::text FROM (SELECT * FROM notes WHERE id = $1::integer) r"
      );
   }
}
