use crate::error::{ExperimentError, Result};
use crate::experiment::calibration::is_mains_aliased;
use crate::experiment::staircase::{PsychometricParams, Quest};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Weak stimulus vs. omission on a single site.
    Detection,
    /// Weak stimulus on one of two sites after salient stimuli on both.
    Lateralised,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub experiment: ExperimentConfig,
    pub intensities: IntensitiesConfig,
    pub staircase: StaircaseConfig,
    pub hardware: HardwareConfig,
    pub triggers: TriggersConfig,
    pub responses: ResponsesConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExperimentConfig {
    pub variant: Variant,
    /// Seconds between stimuli before calibration.
    pub reference_isi: f64,
    /// Block conditions: 0 fast, 1 reference, 2 slow.
    pub order: Vec<usize>,
    pub n_sequences: usize,
    pub calibration_sequences: usize,
    pub targets: [String; 2],
    pub target_proportions: [f64; 2],
    /// Target tag that delivers no stimulus (detection only).
    pub omission_target: Option<String>,
    pub isi_adjustment_factor: f64,
    /// Reset the staircase every n blocks.
    pub reset_every: Option<usize>,
    pub reset_requires_response: bool,
    pub seed: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct IntensitiesConfig {
    pub salient: f64,
    /// Starting point of the staircase.
    pub weak: f64,
}

/// Which estimator drives the weak intensity.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StaircaseMethod {
    #[default]
    QuestPlus,
    /// Classic QUEST; pair with slope 3.5 and lapse_rate 0.01.
    Quest,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct StaircaseConfig {
    #[serde(default)]
    pub method: StaircaseMethod,
    #[serde(flatten)]
    pub psychometric: PsychometricParams,
    pub min_intensity: f64,
    /// Probability correct tracked by classic QUEST.
    #[serde(default = "default_target_probability")]
    pub target_probability: f64,
    /// Prior spread of classic QUEST, in log10 units.
    #[serde(default = "default_start_sd")]
    pub start_sd: f64,
}

fn default_target_probability() -> f64 {
    0.75
}

fn default_start_sd() -> f64 {
    0.2
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SiteConfig {
    pub name: String,
    /// Serial port of the stimulator; no port means a fake transport.
    pub port: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HardwareConfig {
    pub code_table: PathBuf,
    pub start_intensity: f64,
    pub pulse_duration_ms: u32,
    pub trigger_delay_ms: Option<u32>,
    pub wake_on_start: bool,
    pub sites: Vec<SiteConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TriggersConfig {
    pub duration_ms: f64,
    pub codes: BTreeMap<String, u16>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponsesConfig {
    /// Keys counted as correct for each target tag.
    pub keys: BTreeMap<String, Vec<char>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub output: PathBuf,
    pub timestamped: bool,
    pub echo_events: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CalibrationConfig {
    /// Answers used instead of prompting on stdin.
    pub scripted_rates: Option<Vec<String>>,
}

const STIM_BIT: u16 = 1;
const TARGET_BIT: u16 = 2;
const RESPONSE_BIT: u16 = 16;
const CORRECT_BIT: u16 = 32;
const INCORRECT_BIT: u16 = 64;

impl Config {
    pub fn default_for(variant: Variant) -> Self {
        // (first tag, its bit, second tag, its bit)
        let (first, first_bit, second, second_bit) = match variant {
            Variant::Detection => ("weak", 4, "omis", 8),
            Variant::Lateralised => ("right", 4, "left", 8),
        };

        // Detection marks a miss with the tag the subject reported; lateralised
        // keeps the stimulated side.
        let (first_miss, second_miss) = match variant {
            Variant::Detection => (second_bit, first_bit),
            Variant::Lateralised => (first_bit, second_bit),
        };
        let codes = BTreeMap::from([
            ("stim/salient".to_string(), STIM_BIT),
            (format!("target/{}", first), TARGET_BIT + first_bit),
            (format!("target/{}", second), TARGET_BIT + second_bit),
            (format!("response/{}/correct", first), RESPONSE_BIT + first_bit + CORRECT_BIT),
            (format!("response/{}/incorrect", first), RESPONSE_BIT + first_miss + INCORRECT_BIT),
            (format!("response/{}/correct", second), RESPONSE_BIT + second_bit + CORRECT_BIT),
            (format!("response/{}/incorrect", second), RESPONSE_BIT + second_miss + INCORRECT_BIT),
        ]);

        let (targets, proportions, omission_target, sites, intensities, output) = match variant {
            Variant::Detection => (
                [first.to_string(), second.to_string()],
                [0.9, 0.1],
                Some(second.to_string()),
                vec![SiteConfig {
                    name: "main".to_string(),
                    port: None,
                }],
                IntensitiesConfig {
                    salient: 6.0,
                    weak: 2.0,
                },
                "output_detection/events.csv",
            ),
            Variant::Lateralised => (
                [second.to_string(), first.to_string()],
                [0.5, 0.5],
                None,
                vec![
                    SiteConfig {
                        name: "left".to_string(),
                        port: None,
                    },
                    SiteConfig {
                        name: "right".to_string(),
                        port: None,
                    },
                ],
                IntensitiesConfig {
                    salient: 4.0,
                    weak: 1.0,
                },
                "output_lateralised/events.csv",
            ),
        };

        let keys = BTreeMap::from([
            (targets[0].clone(), vec!['2', 'y']),
            (targets[1].clone(), vec!['1', 'b']),
        ]);

        Config {
            experiment: ExperimentConfig {
                variant,
                reference_isi: 1.45,
                order: vec![0, 1, 0, 2, 1, 0, 2, 1, 0, 2, 0, 1],
                n_sequences: 10,
                calibration_sequences: 3,
                targets,
                target_proportions: proportions,
                omission_target,
                isi_adjustment_factor: 0.1,
                reset_every: None,
                reset_requires_response: true,
                seed: None,
            },
            intensities,
            staircase: StaircaseConfig {
                method: StaircaseMethod::QuestPlus,
                psychometric: PsychometricParams::default(),
                min_intensity: 1.0,
                target_probability: default_target_probability(),
                start_sd: default_start_sd(),
            },
            hardware: HardwareConfig {
                code_table: PathBuf::from("intensity_code.csv"),
                start_intensity: 1.0,
                pulse_duration_ms: 200,
                trigger_delay_ms: None,
                wake_on_start: false,
                sites,
            },
            triggers: TriggersConfig {
                duration_ms: 1.0,
                codes,
            },
            responses: ResponsesConfig { keys },
            logging: LoggingConfig {
                output: PathBuf::from(output),
                timestamped: true,
                echo_events: true,
            },
            calibration: CalibrationConfig::default(),
        }
    }

    /// Highest intensity the staircase may propose.
    pub fn staircase_max(&self) -> f64 {
        self.intensities.salient - 1.0
    }

    /// Consistency checks that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let exp = &self.experiment;
        let invalid = |msg: String| Err(ExperimentError::Config(msg));

        if !(exp.reference_isi.is_finite() && exp.reference_isi > 0.0) {
            return invalid(format!("reference_isi must be positive, got {}", exp.reference_isi));
        }
        if !(exp.isi_adjustment_factor.is_finite() && exp.isi_adjustment_factor >= 0.0) {
            return invalid(format!(
                "isi_adjustment_factor must be finite and non-negative, got {}",
                exp.isi_adjustment_factor
            ));
        }
        if !(self.triggers.duration_ms.is_finite() && self.triggers.duration_ms >= 0.0) {
            return invalid(format!(
                "triggers.duration_ms must be finite and non-negative, got {}",
                self.triggers.duration_ms
            ));
        }
        if is_mains_aliased(exp.reference_isi) {
            return invalid(format!(
                "reference_isi {} is a multiple of the mains period; \
                 no calibration could be accepted",
                exp.reference_isi
            ));
        }
        if let Some(bad) = exp.order.iter().find(|c| **c > 2) {
            return invalid(format!("block condition {} is not one of 0, 1, 2", bad));
        }
        if exp.n_sequences == 0 {
            return invalid("n_sequences must be at least 1".to_string());
        }
        if exp.targets[0] == exp.targets[1] {
            return invalid(format!("target tags must differ, got {:?}", exp.targets));
        }
        if let Some(omission) = &exp.omission_target {
            if !exp.targets.contains(omission) {
                return invalid(format!("omission target {:?} is not a target tag", omission));
            }
            if exp.variant == Variant::Lateralised {
                return invalid("lateralised runs have no omission target".to_string());
            }
        }
        if exp.reset_every == Some(0) {
            return invalid("reset_every must be at least 1".to_string());
        }

        let min = self.staircase.min_intensity;
        let max = self.staircase_max();
        if !(min > 0.0 && min < max) {
            return invalid(format!(
                "staircase range [{}, {}) is empty; salient intensity {} is too low",
                min, max, self.intensities.salient
            ));
        }
        if self.staircase.method == StaircaseMethod::Quest {
            let sc = &self.staircase;
            if Quest::threshold_offset(sc.target_probability, &sc.psychometric).is_none() {
                return invalid(format!(
                    "target_probability {} is unreachable with guess rate {} and lapse rate {}",
                    sc.target_probability, sc.psychometric.guess_rate, sc.psychometric.lapse_rate
                ));
            }
            if !(sc.start_sd.is_finite() && sc.start_sd > 0.0) {
                return invalid(format!("start_sd must be positive, got {}", sc.start_sd));
            }
        }

        match exp.variant {
            Variant::Detection if self.hardware.sites.len() != 1 => {
                return invalid("detection runs use exactly one stimulation site".to_string());
            }
            Variant::Lateralised => {
                for tag in &exp.targets {
                    if !self.hardware.sites.iter().any(|site| &site.name == tag) {
                        return invalid(format!("no stimulation site for target {:?}", tag));
                    }
                }
            }
            _ => {}
        }

        for tag in &exp.targets {
            if !self.responses.keys.contains_key(tag) {
                return invalid(format!("no response keys for target {:?}", tag));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::default_for(Variant::Detection)
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config_str = fs::read_to_string(&path).map_err(|e| {
        ExperimentError::Config(format!(
            "Failed to read config file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;

    let config: Config = serde_yaml::from_str(&config_str)
        .map_err(|e| ExperimentError::Config(format!("Failed to parse config file: {}", e)))?;
    config.validate()?;
    Ok(config)
}

pub fn save_config<P: AsRef<Path>>(config: &Config, path: P) -> Result<()> {
    let yaml = serde_yaml::to_string(config)
        .map_err(|e| ExperimentError::Config(format!("Failed to serialize config: {}", e)))?;

    fs::write(path, yaml)
        .map_err(|e| ExperimentError::Config(format!("Failed to write config file: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_for_both_variants() {
        Config::default_for(Variant::Detection).validate().unwrap();
        Config::default_for(Variant::Lateralised).validate().unwrap();
    }

    #[test]
    fn detection_trigger_codes_match_the_bit_layout() {
        let codes = Config::default().triggers.codes;
        assert_eq!(codes["stim/salient"], 1);
        assert_eq!(codes["target/weak"], 6);
        assert_eq!(codes["target/omis"], 10);
        assert_eq!(codes["response/weak/correct"], 52);
        assert_eq!(codes["response/weak/incorrect"], 88);
        assert_eq!(codes["response/omis/correct"], 56);
        assert_eq!(codes["response/omis/incorrect"], 84);
    }

    #[test]
    fn lateralised_misses_keep_the_stimulated_side() {
        let codes = Config::default_for(Variant::Lateralised).triggers.codes;
        assert_eq!(codes["target/right"], 6);
        assert_eq!(codes["target/left"], 10);
        assert_eq!(codes["response/right/correct"], 52);
        assert_eq!(codes["response/right/incorrect"], 84);
        assert_eq!(codes["response/left/correct"], 56);
        assert_eq!(codes["response/left/incorrect"], 88);
    }

    #[test]
    fn yaml_round_trip_preserves_the_config() {
        let config = Config::default_for(Variant::Lateralised);
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.experiment.targets, config.experiment.targets);
        assert_eq!(parsed.responses.keys, config.responses.keys);
        assert_eq!(parsed.staircase.psychometric, config.staircase.psychometric);
        parsed.validate().unwrap();
    }

    #[test]
    fn classic_quest_needs_a_reachable_target() {
        let mut config = Config::default();
        config.staircase.method = StaircaseMethod::Quest;
        config.staircase.psychometric = PsychometricParams {
            slope: 3.5,
            guess_rate: 0.5,
            lapse_rate: 0.01,
        };
        config.validate().unwrap();

        config.staircase.target_probability = 0.4;
        assert!(matches!(config.validate(), Err(ExperimentError::Config(_))));
    }

    #[test]
    fn staircase_method_defaults_when_absent() {
        let yaml = "slope: 3.5\nguess_rate: 0.5\nlapse_rate: 0.01\nmin_intensity: 1.0\n";
        let staircase: StaircaseConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(staircase.method, StaircaseMethod::QuestPlus);
        assert_eq!(staircase.target_probability, 0.75);

        let yaml = format!("method: quest\n{}", yaml);
        let staircase: StaircaseConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(staircase.method, StaircaseMethod::Quest);
    }

    #[test]
    fn rejects_a_salient_intensity_that_leaves_no_staircase_range() {
        let mut config = Config::default();
        config.intensities.salient = 2.0;
        assert!(matches!(config.validate(), Err(ExperimentError::Config(_))));
    }

    #[test]
    fn rejects_an_aliased_reference_isi() {
        let mut config = Config::default();
        config.experiment.reference_isi = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_finite_timing_values() {
        let mut config = Config::default();
        config.experiment.reference_isi = f64::INFINITY;
        assert!(matches!(config.validate(), Err(ExperimentError::Config(_))));

        let mut config = Config::default();
        config.experiment.reference_isi = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.experiment.isi_adjustment_factor = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.triggers.duration_ms = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_block_conditions() {
        let mut config = Config::default();
        config.experiment.order = vec![0, 3];
        assert!(config.validate().is_err());
    }

    #[test]
    fn lateralised_needs_a_site_per_target() {
        let mut config = Config::default_for(Variant::Lateralised);
        config.hardware.sites.retain(|site| site.name != "left");
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_config("does/not/exist.yaml").unwrap_err();
        assert!(matches!(err, ExperimentError::Config(_)));
    }
}
