use crate::error::Result;
use crate::experiment::trial::{Correctness, EventRecord, EventType};

use colored::Colorize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const EVENT_LOG_HEADER: [&str; 9] = [
    "time",
    "block",
    "ISI",
    "intensity",
    "event_type",
    "trigger",
    "n_in_block",
    "correct",
    "reset_procedure",
];

/// Append-only destination for event records.
pub trait EventSink {
    fn record(&mut self, event: &EventRecord) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

// CSV SINK --------------------------------------------------------------------

/// Writes one CSV row per event and flushes it immediately, so an aborted
/// run keeps everything logged up to the failure.
pub struct CsvEventLog<W: Write> {
    writer: csv::Writer<W>,
}

impl CsvEventLog<File> {
    /// Creates the parent directory if needed and truncates any existing file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        tracing::info!(path = %path.display(), "event log opened");
        Self::new(file)
    }
}

impl<W: Write> CsvEventLog<W> {
    /// The header row is written immediately.
    pub fn new(inner: W) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(inner);
        writer.write_record(EVENT_LOG_HEADER)?;
        writer.flush()?;
        Ok(Self { writer })
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()).into())
    }
}

impl<W: Write> EventSink for CsvEventLog<W> {
    fn record(&mut self, event: &EventRecord) -> Result<()> {
        self.writer.serialize(event)?;
        self.writer.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

// MEMORY SINK -----------------------------------------------------------------

/// Keeps records in memory; clones share the same list.
#[derive(Clone, Default)]
pub struct MemoryEventLog {
    events: Arc<Mutex<Vec<EventRecord>>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl EventSink for MemoryEventLog {
    fn record(&mut self, event: &EventRecord) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

// HELPERS ---------------------------------------------------------------------

/// `output/data.csv` -> `output/data_20250131_142501.csv` when `timestamped`.
pub fn session_log_path(base: &Path, timestamped: bool) -> PathBuf {
    if !timestamped {
        return base.to_path_buf();
    }
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "events".to_string());
    let file_name = match base.extension() {
        Some(ext) => format!("{}_{}.{}", stem, stamp, ext.to_string_lossy()),
        None => format!("{}_{}", stem, stamp),
    };
    base.with_file_name(file_name)
}

/// Console line per logged event.
pub fn echo_event(event: &EventRecord) {
    let label = match &event.event_type {
        EventType::Salient => event.event_type.to_string().white(),
        EventType::Target(_) => event.event_type.to_string().yellow(),
        EventType::Response => match event.correct {
            Correctness::Correct => "response (correct)".green(),
            Correctness::Incorrect => "response (incorrect)".red(),
            Correctness::Unset => "response".normal(),
        },
    };
    println!(
        "{:>9.3}s  block {:<20} #{:<3} {:<24} intensity: {}",
        event.time, event.block.to_string(), event.n_in_block, label, event.intensity
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::trial::BlockId;
    use crate::hardware::Intensity;

    fn record(event_type: EventType, correct: Correctness) -> EventRecord {
        EventRecord {
            time: 1.25,
            block: BlockId::Index(2),
            isi: 1.45,
            intensity: Intensity::from_f64(2.3),
            event_type,
            trigger: 6,
            n_in_block: 4,
            correct,
            reset_procedure: false,
        }
    }

    #[test]
    fn csv_log_writes_header_then_rows() {
        let mut log = CsvEventLog::new(Vec::new()).unwrap();
        log.record(&record(EventType::target("weak"), Correctness::Unset)).unwrap();
        log.record(&record(EventType::Response, Correctness::Correct)).unwrap();

        let text = String::from_utf8(log.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "time,block,ISI,intensity,event_type,trigger,n_in_block,correct,reset_procedure",
                "1.25,2,1.45,2.3,target/weak,6,4,NA,false",
                "1.25,2,1.45,2.3,response,6,4,1,false",
            ]
        );
    }

    #[test]
    fn header_is_written_even_without_events() {
        let log = CsvEventLog::new(Vec::new()).unwrap();
        let text = String::from_utf8(log.into_inner().unwrap()).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn calibration_rows_use_the_sentinel() {
        let mut log = CsvEventLog::new(Vec::new()).unwrap();
        let mut event = record(EventType::Salient, Correctness::Unset);
        event.block = BlockId::Calibration;
        log.record(&event).unwrap();

        let text = String::from_utf8(log.into_inner().unwrap()).unwrap();
        let first_row = text.lines().nth(1).unwrap();
        assert!(first_row.starts_with("1.25,det_respiratory_rate,1.45,2.3,stim/salient"));
    }

    #[test]
    fn timestamped_paths_keep_directory_and_extension() {
        let path = session_log_path(Path::new("output/data.csv"), true);
        assert_eq!(path.parent(), Some(Path::new("output")));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("csv"));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("data_"));

        assert_eq!(session_log_path(Path::new("x.csv"), false), PathBuf::from("x.csv"));
    }
}
