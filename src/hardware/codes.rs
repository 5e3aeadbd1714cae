use crate::error::{ExperimentError, Result};

use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::Path;

// -----------------------------------------------------------------------------
// INTENSITY VALUE
// -----------------------------------------------------------------------------

/// Stimulation intensity at the generator's 0.1 resolution, stored as tenths so
/// equality and table lookups are exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Intensity(i32);

impl Intensity {
    pub const ZERO: Intensity = Intensity(0);

    /// Rounds to one decimal.
    pub fn from_f64(value: f64) -> Self {
        Intensity((value * 10.0).round() as i32)
    }

    pub fn from_tenths(tenths: i32) -> Self {
        Intensity(tenths)
    }

    pub fn tenths(self) -> i32 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 10.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Smallest whole-unit intensity strictly above `self`.
    pub fn next_lattice_point(self) -> Intensity {
        Intensity((self.0.div_euclid(10) + 1) * 10)
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.as_f64())
    }
}

impl Serialize for Intensity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

// -----------------------------------------------------------------------------
// CODE TABLE
// -----------------------------------------------------------------------------

/// Intensity -> generator command lookup, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct IntensityCodeTable {
    commands: HashMap<Intensity, String>,
}

impl IntensityCodeTable {
    /// Reads a headerless two-column CSV of `command,intensity` rows.
    /// Duplicate intensities keep the last row.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            ExperimentError::CodeTable(format!("Failed to open {}: {}", path.display(), e))
        })?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut table = Self::default();
        for (line, record) in rdr.records().enumerate() {
            let record = record
                .map_err(|e| ExperimentError::CodeTable(format!("row {}: {}", line + 1, e)))?;
            let (Some(command), Some(value)) = (record.get(0), record.get(1)) else {
                return Err(ExperimentError::CodeTable(format!(
                    "row {}: expected `command,intensity`",
                    line + 1
                )));
            };
            let value: f64 = value.parse().map_err(|e| {
                ExperimentError::CodeTable(format!(
                    "row {}: bad intensity {:?}: {}",
                    line + 1,
                    value,
                    e
                ))
            })?;
            table.insert(Intensity::from_f64(value), command);
        }

        if table.is_empty() {
            return Err(ExperimentError::CodeTable("table has no rows".to_string()));
        }
        Ok(table)
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (f64, S)>,
        S: Into<String>,
    {
        let mut table = Self::default();
        for (value, command) in pairs {
            table.insert(Intensity::from_f64(value), command);
        }
        table
    }

    fn insert(&mut self, intensity: Intensity, command: impl Into<String>) {
        self.commands.insert(intensity, command.into());
    }

    pub fn command(&self, intensity: Intensity) -> Option<&str> {
        self.commands.get(&intensity).map(String::as_str)
    }

    pub fn contains(&self, intensity: Intensity) -> bool {
        self.commands.contains_key(&intensity)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Lowest and highest representable intensity.
    pub fn range(&self) -> Option<(Intensity, Intensity)> {
        let min = self.commands.keys().min()?;
        let max = self.commands.keys().max()?;
        Some((*min, *max))
    }
}
