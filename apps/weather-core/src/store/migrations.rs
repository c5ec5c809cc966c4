//! Embedded schema migrations for the config store.
//!
//! Migrations are linearly numbered up/down SQL pairs applied at open time.
//! `schema_migrations` records the current version; each step runs in its
//! own transaction and a failed step rolls back and fails the open.

use rusqlite::Connection;

use super::{StoreError, StoreResult};

pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial",
        up: r#"
CREATE TABLE configs (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
INSERT INTO configs (id, name) VALUES (1, 'default');

CREATE TABLE devices (
    id INTEGER PRIMARY KEY,
    config_id INTEGER NOT NULL REFERENCES configs(id),
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    hostname TEXT,
    port INTEGER,
    serial_device TEXT,
    baud INTEGER,
    path TEXT,
    latitude REAL NOT NULL DEFAULT 0,
    longitude REAL NOT NULL DEFAULT 0,
    altitude REAL NOT NULL DEFAULT 0,
    wind_dir_correction REAL NOT NULL DEFAULT 0,
    base_snow_distance REAL NOT NULL DEFAULT 0,
    capabilities INTEGER,
    wu_enabled INTEGER NOT NULL DEFAULT 0,
    wu_station_id TEXT NOT NULL DEFAULT '',
    wu_password TEXT NOT NULL DEFAULT '',
    wu_upload_interval INTEGER,
    wu_upload_url TEXT,
    pws_enabled INTEGER NOT NULL DEFAULT 0,
    pws_station_id TEXT NOT NULL DEFAULT '',
    pws_password TEXT NOT NULL DEFAULT '',
    pws_upload_interval INTEGER,
    pws_upload_url TEXT,
    aeris_enabled INTEGER NOT NULL DEFAULT 0,
    aeris_api_client_id TEXT NOT NULL DEFAULT '',
    aeris_api_client_secret TEXT NOT NULL DEFAULT '',
    aeris_api_endpoint TEXT,
    wll_sensor_mapping TEXT NOT NULL DEFAULT '',
    wll_broadcast INTEGER NOT NULL DEFAULT 0,
    wll_poll_interval INTEGER,
    UNIQUE (config_id, name)
);

CREATE TABLE storage_configs (
    id INTEGER PRIMARY KEY,
    config_id INTEGER NOT NULL REFERENCES configs(id),
    name TEXT NOT NULL UNIQUE,
    backend TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    timescale_dsn TEXT,
    grpc_endpoint TEXT,
    grpc_tls_cert TEXT,
    grpc_tls_key TEXT,
    aprs_server TEXT,
    health_status TEXT,
    health_message TEXT,
    health_error TEXT,
    health_checked_at TEXT
);

CREATE TABLE controller_configs (
    id INTEGER PRIMARY KEY,
    config_id INTEGER NOT NULL REFERENCES configs(id),
    type TEXT NOT NULL UNIQUE,
    enabled INTEGER NOT NULL DEFAULT 0,
    endpoint TEXT,
    fetch_interval INTEGER
);

CREATE TABLE weather_websites (
    id INTEGER PRIMARY KEY,
    config_id INTEGER NOT NULL REFERENCES configs(id),
    name TEXT NOT NULL UNIQUE,
    hostname TEXT,
    page_title TEXT,
    about TEXT,
    device_name TEXT
);

CREATE TABLE station_aprs_configs (
    id INTEGER PRIMARY KEY,
    device_name TEXT NOT NULL UNIQUE,
    enabled INTEGER NOT NULL DEFAULT 0,
    callsign TEXT NOT NULL DEFAULT '',
    passcode TEXT NOT NULL DEFAULT ''
);
"#,
        down: r#"
DROP TABLE station_aprs_configs;
DROP TABLE weather_websites;
DROP TABLE controller_configs;
DROP TABLE storage_configs;
DROP TABLE devices;
DROP TABLE configs;
"#,
    },
    Migration {
        version: 2,
        name: "remote_stations",
        up: r#"
CREATE TABLE remote_stations (
    station_id TEXT PRIMARY KEY,
    station_name TEXT NOT NULL,
    station_type TEXT NOT NULL DEFAULT '',
    aprs_enabled INTEGER NOT NULL DEFAULT 0,
    aprs_callsign TEXT NOT NULL DEFAULT '',
    wu_enabled INTEGER NOT NULL DEFAULT 0,
    wu_station_id TEXT NOT NULL DEFAULT '',
    wu_password TEXT NOT NULL DEFAULT '',
    pws_enabled INTEGER NOT NULL DEFAULT 0,
    pws_station_id TEXT NOT NULL DEFAULT '',
    pws_password TEXT NOT NULL DEFAULT '',
    aeris_enabled INTEGER NOT NULL DEFAULT 0,
    aeris_api_client_id TEXT NOT NULL DEFAULT '',
    aeris_api_client_secret TEXT NOT NULL DEFAULT '',
    latitude REAL NOT NULL DEFAULT 0,
    longitude REAL NOT NULL DEFAULT 0,
    altitude REAL NOT NULL DEFAULT 0,
    registered_at TEXT NOT NULL,
    last_seen TEXT NOT NULL
);
"#,
        down: "DROP TABLE remote_stations;",
    },
    Migration {
        version: 3,
        name: "snow_totals_cache",
        up: r#"
CREATE TABLE snow_totals_cache (
    station_name TEXT PRIMARY KEY,
    midnight_mm REAL NOT NULL DEFAULT 0,
    last24_mm REAL NOT NULL DEFAULT 0,
    last72_mm REAL NOT NULL DEFAULT 0,
    season_mm REAL NOT NULL DEFAULT 0,
    computed_at TEXT NOT NULL
);
"#,
        down: "DROP TABLE snow_totals_cache;",
    },
    Migration {
        version: 4,
        name: "sun_times",
        up: r#"
CREATE TABLE sun_times (
    id INTEGER PRIMARY KEY,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    day TEXT NOT NULL,
    sunrise TEXT NOT NULL,
    sunset TEXT NOT NULL,
    UNIQUE (latitude, longitude, day)
);
"#,
        down: "DROP TABLE sun_times;",
    },
    Migration {
        version: 5,
        name: "device_remote_station_id",
        up: "ALTER TABLE devices ADD COLUMN remote_station_id TEXT;",
        down: "ALTER TABLE devices DROP COLUMN remote_station_id;",
    },
];

pub fn current_version(conn: &Connection) -> StoreResult<i64> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER NOT NULL)",
        [],
    )?;
    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })?;
    Ok(version.unwrap_or(0))
}

/// Applies every pending up migration in order. Each step is transactional;
/// the first failure rolls back that step and aborts the open.
pub fn migrate_up(conn: &mut Connection) -> StoreResult<i64> {
    let mut version = current_version(conn)?;
    for migration in MIGRATIONS {
        if migration.version <= version {
            continue;
        }
        if migration.version != version + 1 {
            return Err(StoreError::MigrationOrder {
                version: migration.version,
                current: version,
            });
        }
        let tx = conn.transaction()?;
        tx.execute_batch(migration.up)
            .map_err(|source| StoreError::Migration {
                version: migration.version,
                source,
            })?;
        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [migration.version],
        )?;
        tx.commit()?;
        tracing::debug!(version = migration.version, name = migration.name, "applied migration");
        version = migration.version;
    }
    Ok(version)
}

/// Rolls back down to (and including) `target + 1`, leaving the store at
/// `target`. Down N requires the store to currently be at N.
pub fn migrate_down(conn: &mut Connection, target: i64) -> StoreResult<i64> {
    let mut version = current_version(conn)?;
    while version > target {
        let migration = MIGRATIONS
            .iter()
            .find(|m| m.version == version)
            .ok_or(StoreError::MigrationOrder {
                version,
                current: version,
            })?;
        let tx = conn.transaction()?;
        tx.execute_batch(migration.down)
            .map_err(|source| StoreError::Migration {
                version: migration.version,
                source,
            })?;
        tx.execute(
            "DELETE FROM schema_migrations WHERE version = ?1",
            [migration.version],
        )?;
        tx.commit()?;
        version -= 1;
    }
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_contiguous_from_one() {
        for (idx, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version, idx as i64 + 1);
            assert!(!migration.up.trim().is_empty());
            assert!(!migration.down.trim().is_empty());
        }
    }

    #[test]
    fn migrates_up_and_back_down() {
        let mut conn = Connection::open_in_memory().unwrap();
        let version = migrate_up(&mut conn).unwrap();
        assert_eq!(version, MIGRATIONS.len() as i64);

        // All entities exist at head.
        for table in [
            "configs",
            "devices",
            "storage_configs",
            "controller_configs",
            "weather_websites",
            "station_aprs_configs",
            "remote_stations",
            "snow_totals_cache",
            "sun_times",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }

        let version = migrate_down(&mut conn, 0).unwrap();
        assert_eq!(version, 0);
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name != 'schema_migrations'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 0);

        // Re-applying from zero works and is idempotent at head.
        migrate_up(&mut conn).unwrap();
        let version = migrate_up(&mut conn).unwrap();
        assert_eq!(version, MIGRATIONS.len() as i64);
    }
}
