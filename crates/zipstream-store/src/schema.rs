use rusqlite_migration::{M, Migrations};

pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "CREATE TABLE bundles (
            id               TEXT PRIMARY KEY,
            secret           TEXT NOT NULL,
            filename         TEXT NOT NULL DEFAULT '',
            files_json       TEXT NOT NULL DEFAULT '[]',
            expiration_date  INTEGER NOT NULL
        );

        CREATE INDEX idx_bundles_expiration ON bundles(expiration_date);",
    )])
}
