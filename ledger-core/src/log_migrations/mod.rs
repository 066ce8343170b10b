//! Event log migrations - embedded SQL files
//!
//! Kept apart from the ledger migrations because the event log lives in
//! its own database file.

pub const LOG_MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    (
        "001_initial_schema.sql",
        include_str!("001_initial_schema.sql"),
    ),
];
