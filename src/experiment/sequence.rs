//! Trial list generation.
//!
//! Every sequence is three salient stimuli followed by one target whose tag is
//! drawn from a two-way categorical distribution. Generation is pure: the only
//! input besides the parameters is the RNG, so seeded runs are reproducible.

use super::trial::{BlockId, EventType, Trial};
use crate::error::{ExperimentError, Result};

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

pub const N_SALIENT: usize = 3;
pub const EVENTS_PER_SEQUENCE: usize = N_SALIENT + 1;

/// The two target tags and their draw probabilities.
#[derive(Debug, Clone)]
pub struct TargetChoice {
    tags: [String; 2],
    weights: WeightedIndex<f64>,
}

impl TargetChoice {
    pub fn new(tags: [String; 2], proportions: [f64; 2]) -> Result<Self> {
        let weights = WeightedIndex::new(proportions).map_err(|e| {
            ExperimentError::Config(format!(
                "invalid target proportions {:?}: {}",
                proportions, e
            ))
        })?;
        Ok(Self { tags, weights })
    }

    pub fn tags(&self) -> &[String; 2] {
        &self.tags
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        &self.tags[self.weights.sample(rng)]
    }
}

pub fn generate_block<R: Rng + ?Sized>(
    rng: &mut R,
    n_sequences: usize,
    isi: f64,
    block: BlockId,
    targets: &TargetChoice,
    reset_at: Option<usize>,
) -> Vec<Trial> {
    let mut trials = Vec::with_capacity(n_sequences * EVENTS_PER_SEQUENCE);
    let mut n_in_block = 0;

    for seq in 0..n_sequences {
        for _ in 0..N_SALIENT {
            n_in_block += 1;
            trials.push(Trial {
                isi,
                event_type: EventType::Salient,
                n_in_block,
                block,
                reset_procedure: false,
            });
        }

        n_in_block += 1;
        trials.push(Trial {
            isi,
            event_type: EventType::target(targets.draw(rng)),
            n_in_block,
            block,
            reset_procedure: reset_at == Some(seq),
        });
    }

    trials
}

/// Short run at the reference ISI used while the operator counts breaths.
pub fn generate_calibration_block<R: Rng + ?Sized>(
    rng: &mut R,
    n_sequences: usize,
    isi: f64,
    targets: &TargetChoice,
) -> Vec<Trial> {
    generate_block(rng, n_sequences, isi, BlockId::Calibration, targets, None)
}

// BLOCK PLAN ------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockPlan {
    pub block: BlockId,
    /// Index into the ISI set: 0 fast, 1 reference, 2 slow.
    pub condition: usize,
    pub reset_at: Option<usize>,
}

/// One entry per element of `order`. With `reset_every = Some(n)`, every n-th
/// block (never the first) resets the staircase about halfway through. A block
/// too short to have a midpoint past its first sequence gets no reset.
pub fn plan_blocks(
    order: &[usize],
    n_sequences: usize,
    reset_every: Option<usize>,
) -> Vec<BlockPlan> {
    order
        .iter()
        .enumerate()
        .map(|(block_idx, &condition)| {
            let reset_at = match reset_every {
                Some(every) if every > 0 && block_idx != 0 && block_idx % every == 0 => {
                    Some(n_sequences / 2).filter(|&mid| mid > 0)
                }
                _ => None,
            };
            BlockPlan {
                block: BlockId::Index(block_idx),
                condition,
                reset_at,
            }
        })
        .collect()
}

/// Rough session length in seconds, taking every ISI as the reference ISI.
pub fn estimate_duration(
    reference_isi: f64,
    n_blocks: usize,
    n_sequences: usize,
    calibration_sequences: usize,
) -> f64 {
    let total_events = EVENTS_PER_SEQUENCE * (n_sequences * n_blocks + calibration_sequences);
    total_events as f64 * reference_isi
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn choice(proportions: [f64; 2]) -> TargetChoice {
        TargetChoice::new(["weak".to_string(), "omis".to_string()], proportions).unwrap()
    }

    #[test]
    fn deterministic_block_structure() {
        let mut rng = StdRng::seed_from_u64(7);
        let choice = choice([1.0, 0.0]);
        let trials = generate_block(&mut rng, 2, 1.45, BlockId::Index(0), &choice, None);

        let tags: Vec<String> = trials.iter().map(|t| t.event_type.to_string()).collect();
        assert_eq!(
            tags,
            vec![
                "stim/salient", "stim/salient", "stim/salient", "target/weak",
                "stim/salient", "stim/salient", "stim/salient", "target/weak",
            ]
        );
        let ordinals: Vec<usize> = trials.iter().map(|t| t.n_in_block).collect();
        assert_eq!(ordinals, (1..=8).collect::<Vec<_>>());
        assert!(trials.iter().all(|t| t.isi == 1.45 && t.block == BlockId::Index(0)));
        assert!(trials.iter().all(|t| !t.reset_procedure));
    }

    #[test]
    fn one_target_after_every_three_salient() {
        let mut rng = StdRng::seed_from_u64(42);
        let choice = choice([0.5, 0.5]);
        let trials = generate_block(&mut rng, 25, 1.0, BlockId::Index(3), &choice, None);

        assert_eq!(trials.len(), 100);
        for (i, trial) in trials.iter().enumerate() {
            assert_eq!(trial.n_in_block, i + 1);
            assert_eq!(trial.event_type.is_target(), i % 4 == 3);
        }
        // With a fair draw over 25 targets both tags show up.
        let weak = trials.iter().filter(|t| t.event_type.target_tag() == Some("weak")).count();
        assert!(weak > 0 && weak < 25);
    }

    #[test]
    fn ordinals_restart_per_block() {
        let mut rng = StdRng::seed_from_u64(1);
        let first = generate_block(&mut rng, 3, 1.0, BlockId::Index(0), &choice([0.9, 0.1]), None);
        let second = generate_block(&mut rng, 3, 1.0, BlockId::Index(1), &choice([0.9, 0.1]), None);
        assert_eq!(first.last().unwrap().n_in_block, 12);
        assert_eq!(second.first().unwrap().n_in_block, 1);
    }

    #[test]
    fn seeded_generation_is_reproducible() {
        let choice = choice([0.5, 0.5]);
        let block = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            generate_block(&mut rng, 10, 1.0, BlockId::Index(0), &choice, None)
        };
        let a = block(9);
        let b = block(9);
        assert_eq!(a, b);
    }

    #[test]
    fn reset_marks_only_the_chosen_target() {
        let mut rng = StdRng::seed_from_u64(3);
        let choice = choice([0.9, 0.1]);
        let trials = generate_block(&mut rng, 4, 1.0, BlockId::Index(3), &choice, Some(2));

        let flagged: Vec<usize> = trials
            .iter()
            .filter(|t| t.reset_procedure)
            .map(|t| t.n_in_block)
            .collect();
        assert_eq!(flagged, vec![12]);
        assert!(trials[11].event_type.is_target());
    }

    #[test]
    fn calibration_block_uses_sentinel_id() {
        let mut rng = StdRng::seed_from_u64(3);
        let trials = generate_calibration_block(&mut rng, 3, 1.45, &choice([0.9, 0.1]));
        assert_eq!(trials.len(), 12);
        assert!(trials.iter().all(|t| t.block == BlockId::Calibration && !t.reset_procedure));
    }

    #[test]
    fn rejects_degenerate_proportions() {
        let tags = ["weak".to_string(), "omis".to_string()];
        assert!(TargetChoice::new(tags.clone(), [0.0, 0.0]).is_err());
        assert!(TargetChoice::new(tags, [-1.0, 2.0]).is_err());
    }

    #[test]
    fn periodic_reset_plan() {
        let order = [0, 1, 0, 2, 1, 0, 2];
        let plan = plan_blocks(&order, 10, Some(3));

        let resets: Vec<(BlockId, Option<usize>)> =
            plan.iter().map(|p| (p.block, p.reset_at)).collect();
        assert_eq!(resets[0], (BlockId::Index(0), None));
        assert_eq!(resets[3], (BlockId::Index(3), Some(5)));
        assert_eq!(resets[6], (BlockId::Index(6), Some(5)));
        assert_eq!(plan.iter().filter(|p| p.reset_at.is_some()).count(), 2);
        assert_eq!(plan[3].condition, 2);

        assert!(plan_blocks(&order, 10, None).iter().all(|p| p.reset_at.is_none()));
    }

    #[test]
    fn single_sequence_blocks_never_reset() {
        let plan = plan_blocks(&[0, 1, 2, 0], 1, Some(1));
        assert!(plan.iter().all(|p| p.reset_at.is_none()));
    }

    #[test]
    fn duration_estimate_counts_all_events() {
        // 4 events * (5 sequences * 12 blocks + 3 calibration sequences) * 1.0 s
        assert_eq!(estimate_duration(1.0, 12, 5, 3), 252.0);
    }
}
