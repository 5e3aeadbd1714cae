//! Stimulus delivery strategies.
//!
//! The scheduler does not know how many stimulators exist or which one a tag
//! addresses; it asks the strategy to fire the current trial and to pre-stage
//! intensities for the next one.

use super::trial::EventType;
use crate::error::{ExperimentError, Result};
use crate::hardware::{Intensity, Stimulator};

use std::collections::BTreeMap;

/// Current salient and adaptive ("weak") intensities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntensityMap {
    pub salient: Intensity,
    pub weak: Intensity,
}

pub trait StimulusDelivery {
    fn deliver_stimulus(&mut self, event: &EventType) -> Result<()>;

    /// Runs before the response window opens, so any intensity ramp finishes
    /// before the next pulse.
    fn prepare_next(
        &mut self,
        event: &EventType,
        next: Option<&EventType>,
        intensities: &IntensityMap,
    ) -> Result<()>;

    fn stimulators_mut(&mut self) -> Vec<&mut Stimulator>;
}

// DETECTION -------------------------------------------------------------------

/// One stimulation site; targets are either a weak (adaptive) pulse or an
/// omission that delivers nothing.
pub struct DetectionDelivery {
    stimulator: Stimulator,
    weak_tag: String,
}

impl DetectionDelivery {
    pub fn new(stimulator: Stimulator, weak_tag: impl Into<String>) -> Self {
        Self {
            stimulator,
            weak_tag: weak_tag.into(),
        }
    }

    fn is_weak(&self, event: &EventType) -> bool {
        event.target_tag() == Some(self.weak_tag.as_str())
    }
}

impl StimulusDelivery for DetectionDelivery {
    fn deliver_stimulus(&mut self, event: &EventType) -> Result<()> {
        if matches!(event, EventType::Salient) || self.is_weak(event) {
            self.stimulator.pulse()?;
        }
        Ok(())
    }

    fn prepare_next(
        &mut self,
        event: &EventType,
        next: Option<&EventType>,
        intensities: &IntensityMap,
    ) -> Result<()> {
        if self.is_weak(event) {
            self.stimulator.set_intensity_exact(intensities.salient)?;
        }
        if next.map_or(false, |next| self.is_weak(next)) {
            self.stimulator.set_intensity_exact(intensities.weak)?;
        }
        Ok(())
    }

    fn stimulators_mut(&mut self) -> Vec<&mut Stimulator> {
        vec![&mut self.stimulator]
    }
}

// LATERALISED -----------------------------------------------------------------

/// One stimulator per site (e.g. index and ring finger). Salient stimuli go to
/// every site, targets only to the site named by their tag.
pub struct LateralisedDelivery {
    sites: BTreeMap<String, Stimulator>,
}

impl LateralisedDelivery {
    pub fn new(sites: BTreeMap<String, Stimulator>) -> Result<Self> {
        if sites.is_empty() {
            return Err(ExperimentError::Config(
                "lateralised delivery needs at least one stimulation site".to_string(),
            ));
        }
        Ok(Self { sites })
    }

    fn site(&mut self, event: &EventType) -> Result<Option<&mut Stimulator>> {
        let Some(tag) = event.target_tag() else {
            return Ok(None);
        };
        self.sites
            .get_mut(tag)
            .map(Some)
            .ok_or_else(|| ExperimentError::Config(format!("no stimulator for site {:?}", tag)))
    }
}

impl StimulusDelivery for LateralisedDelivery {
    fn deliver_stimulus(&mut self, event: &EventType) -> Result<()> {
        match event {
            EventType::Salient => {
                for stimulator in self.sites.values_mut() {
                    stimulator.pulse()?;
                }
            }
            EventType::Target(_) => {
                if let Some(stimulator) = self.site(event)? {
                    stimulator.pulse()?;
                }
            }
            EventType::Response => {}
        }
        Ok(())
    }

    fn prepare_next(
        &mut self,
        event: &EventType,
        next: Option<&EventType>,
        intensities: &IntensityMap,
    ) -> Result<()> {
        if let Some(stimulator) = self.site(event)? {
            stimulator.set_intensity_exact(intensities.salient)?;
        }
        if let Some(next) = next {
            if let Some(stimulator) = self.site(next)? {
                stimulator.set_intensity_exact(intensities.weak)?;
            }
        }
        Ok(())
    }

    fn stimulators_mut(&mut self) -> Vec<&mut Stimulator> {
        self.sites.values_mut().collect()
    }
}
