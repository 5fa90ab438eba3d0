use anyhow::{bail, Context, Result};
use rusqlite::Connection;

const SCHEMA_VERSION: i32 = 1;
const SCHEMA: &str = include_str!("schemas/schema_v1.sql");

/// Create the coordination tables on a fresh file. Several processes may race
/// here; the `IF NOT EXISTS` script makes the loser's run a no-op.
pub fn ensure_schema(conn: &mut Connection) -> Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    match version {
        0 => {
            let tx = conn
                .transaction()
                .context("failed to open schema transaction")?;
            tx.execute_batch(SCHEMA)
                .context("failed to create coordination tables")?;
            tx.pragma_update(None, "user_version", SCHEMA_VERSION)
                .context("failed to update user_version pragma")?;
            tx.commit().context("failed to commit coordination schema")
        }
        SCHEMA_VERSION => Ok(()),
        newer => bail!(
            "coordination database version ({newer}) is newer than supported schema ({SCHEMA_VERSION})"
        ),
    }
}
