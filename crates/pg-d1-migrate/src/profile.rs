//! Table profiles.
//!
//! Each migratable table is one variant of [`TableProfile`], carrying its column
//! list, its destination DDL and its row transform. The profile is resolved once
//! from configuration and passed to every component that needs table shape.

use serde::{Deserialize, Serialize};

use crate::core::{SourceRow, TransformedRow};
use crate::error::{MigrateError, Result};
use crate::transform;

/// Logical column type, used to decode source values and to pick transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
    Timestamp,
}

/// Column definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
}

const fn col(name: &'static str, kind: ColumnKind, nullable: bool) -> ColumnDef {
    ColumnDef {
        name,
        kind,
        nullable,
    }
}

const CAMERA_LOCATIONS_COLUMNS: &[ColumnDef] = &[
    col("id", ColumnKind::Integer, false),
    col("camera_id", ColumnKind::Text, false),
    col("road_name", ColumnKind::Text, true),
    col("latitude", ColumnKind::Real, true),
    col("longitude", ColumnKind::Real, true),
    col("updated_at", ColumnKind::Timestamp, true),
];

const CAMERA_LOCATIONS_DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS camera_locations (
        id INTEGER NOT NULL,
        camera_id TEXT NOT NULL,
        road_name TEXT,
        latitude REAL,
        longitude REAL,
        updated_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_camera_locations_id ON camera_locations(id)",
    "CREATE INDEX IF NOT EXISTS idx_camera_locations_camera_id ON camera_locations(camera_id)",
];

const SPEED_READINGS_COLUMNS: &[ColumnDef] = &[
    col("id", ColumnKind::Integer, false),
    col("camera_id", ColumnKind::Text, false),
    col("speed_kmh", ColumnKind::Real, true),
    col("vehicle_count", ColumnKind::Integer, true),
    col("recorded_at", ColumnKind::Timestamp, false),
];

const SPEED_READINGS_DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS speed_readings (
        id INTEGER NOT NULL,
        camera_id TEXT NOT NULL,
        speed_kmh REAL,
        vehicle_count INTEGER,
        recorded_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_speed_readings_id ON speed_readings(id)",
    "CREATE INDEX IF NOT EXISTS idx_speed_readings_camera_id ON speed_readings(camera_id)",
    "CREATE INDEX IF NOT EXISTS idx_speed_readings_recorded_at ON speed_readings(recorded_at)",
];

/// The closed set of tables this tool knows how to migrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableProfile {
    /// Traffic camera positions.
    CameraLocations,
    /// Per-camera speed measurements.
    SpeedReadings,
}

impl TableProfile {
    /// All known profiles.
    pub const ALL: [TableProfile; 2] = [TableProfile::CameraLocations, TableProfile::SpeedReadings];

    /// Resolve a profile from a table name.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.table_name() == name)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|p| p.table_name()).collect();
                MigrateError::Config(format!(
                    "Unknown table '{}'. Known tables: {}",
                    name,
                    known.join(", ")
                ))
            })
    }

    /// Table name, identical in source and destination.
    pub fn table_name(&self) -> &'static str {
        match self {
            TableProfile::CameraLocations => "camera_locations",
            TableProfile::SpeedReadings => "speed_readings",
        }
    }

    /// Column definitions in insert order. The first column is always `id`.
    pub fn columns(&self) -> &'static [ColumnDef] {
        match self {
            TableProfile::CameraLocations => CAMERA_LOCATIONS_COLUMNS,
            TableProfile::SpeedReadings => SPEED_READINGS_COLUMNS,
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns().len()
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns().iter().map(|c| c.name).collect()
    }

    /// Destination DDL: the table followed by its indexes.
    pub fn ddl(&self) -> &'static [&'static str] {
        match self {
            TableProfile::CameraLocations => CAMERA_LOCATIONS_DDL,
            TableProfile::SpeedReadings => SPEED_READINGS_DDL,
        }
    }

    /// Apply this profile's row transform.
    pub fn transform(&self, row: &SourceRow) -> Result<TransformedRow> {
        match self {
            TableProfile::CameraLocations | TableProfile::SpeedReadings => {
                transform::normalize_timestamps(self.columns(), row)
            }
        }
    }
}

impl std::fmt::Display for TableProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}
