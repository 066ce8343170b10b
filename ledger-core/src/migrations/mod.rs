//! Ledger database migrations - embedded SQL files
//!
//! Each migration is a `(name, sql)` pair compiled in with `include_str!`
//! and applied in order by `MigrationService`.

/// All ledger migrations.
///
/// To add one, create `NNN_description.sql` next to this file and append
/// an entry here.
pub const MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    ("001_ledger_schema.sql", include_str!("001_ledger_schema.sql")),
];
