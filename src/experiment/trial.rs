use crate::hardware::Intensity;

use serde::{Serialize, Serializer};
use std::fmt;

/// Which block a trial belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockId {
    /// Position in the configured block order.
    Index(usize),
    /// The respiratory-rate calibration run.
    Calibration,
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockId::Index(idx) => write!(f, "{}", idx),
            BlockId::Calibration => f.write_str("det_respiratory_rate"),
        }
    }
}

impl Serialize for BlockId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BlockId::Index(idx) => serializer.serialize_u64(*idx as u64),
            BlockId::Calibration => serializer.serialize_str("det_respiratory_rate"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    /// Rhythm-establishing stimulus (`stim/salient`).
    Salient,
    /// Trial requiring a judgement (`target/<tag>`).
    Target(String),
    /// A captured reply; replaces the target type once a key arrives.
    Response,
}

impl EventType {
    pub fn target(tag: impl Into<String>) -> Self {
        EventType::Target(tag.into())
    }

    pub fn is_target(&self) -> bool {
        matches!(self, EventType::Target(_))
    }

    pub fn target_tag(&self) -> Option<&str> {
        match self {
            EventType::Target(tag) => Some(tag),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Salient => f.write_str("stim/salient"),
            EventType::Target(tag) => write!(f, "target/{}", tag),
            EventType::Response => f.write_str("response"),
        }
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    /// Seconds from this trial's stimulus to the next one.
    pub isi: f64,
    pub event_type: EventType,
    /// 1-based position within the block.
    pub n_in_block: usize,
    pub block: BlockId,
    pub reset_procedure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correctness {
    Unset,
    Incorrect,
    Correct,
}

impl From<bool> for Correctness {
    fn from(correct: bool) -> Self {
        if correct {
            Correctness::Correct
        } else {
            Correctness::Incorrect
        }
    }
}

impl Serialize for Correctness {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Correctness::Unset => serializer.serialize_str("NA"),
            Correctness::Incorrect => serializer.serialize_u8(0),
            Correctness::Correct => serializer.serialize_u8(1),
        }
    }
}

/// One row of the event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub time: f64,
    pub block: BlockId,
    #[serde(rename = "ISI")]
    pub isi: f64,
    pub intensity: Intensity,
    pub event_type: EventType,
    pub trigger: u16,
    pub n_in_block: usize,
    pub correct: Correctness,
    pub reset_procedure: bool,
}

impl EventRecord {
    pub fn for_trial(
        trial: &Trial,
        time: f64,
        intensity: Intensity,
        trigger: u16,
        correct: Correctness,
    ) -> Self {
        Self {
            time,
            block: trial.block,
            isi: trial.isi,
            intensity,
            event_type: trial.event_type.clone(),
            trigger,
            n_in_block: trial.n_in_block,
            correct,
            reset_procedure: trial.reset_procedure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_types_render_as_tags() {
        assert_eq!(EventType::Salient.to_string(), "stim/salient");
        assert_eq!(EventType::target("omis").to_string(), "target/omis");
        assert_eq!(EventType::Response.to_string(), "response");
        assert_eq!(EventType::target("left").target_tag(), Some("left"));
        assert!(!EventType::Salient.is_target());
    }

    #[test]
    fn block_ids_render_index_or_sentinel() {
        assert_eq!(BlockId::Index(4).to_string(), "4");
        assert_eq!(BlockId::Calibration.to_string(), "det_respiratory_rate");
    }
}
