//! Stimulus current generator (SGC) driver.
//!
//! Owns the generator's current intensity and the command protocol. Upward
//! intensity changes are ramped so that no single command raises the output
//! by more than one unit.

use super::codes::{Intensity, IntensityCodeTable};
use super::transport::Transport;
use crate::error::{ExperimentError, Result};

pub const PULSE_COMMAND: &str = "?*A,S$C0#";
pub const WAKEUP_COMMAND: &str = "?*W$57#";
pub const TRIGGER_DELAY_0_COMMAND: &str = "?D,0$A0#";
pub const TRIGGER_DELAY_50_COMMAND: &str = "?D,1$A1#";
pub const PULSE_DURATION_200_COMMAND: &str = "?L,20$DA#";

const UNIT_STEP_TENTHS: i32 = 10;

pub struct Stimulator {
    label: String,
    codes: IntensityCodeTable,
    current: Intensity,
    transport: Box<dyn Transport>,
}

impl Stimulator {
    /// The generator is assumed to already sit at `start_intensity`; nothing is
    /// sent on construction.
    pub fn new(
        label: impl Into<String>,
        codes: IntensityCodeTable,
        start_intensity: Intensity,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            label: label.into(),
            codes,
            current: start_intensity,
            transport,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn current(&self) -> Intensity {
        self.current
    }

    /// Moves the generator to `target`, which is rounded to one decimal first.
    pub fn set_intensity(&mut self, target: f64) -> Result<()> {
        self.set_intensity_exact(Intensity::from_f64(target))
    }

    pub fn set_intensity_exact(&mut self, target: Intensity) -> Result<()> {
        let commands = self.plan_transition(target)?;
        if commands.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            stimulator = %self.label,
            from = %self.current,
            to = %target,
            steps = commands.len(),
            "changing intensity"
        );
        for command in &commands {
            self.send_command(command)?;
        }
        self.current = target;
        Ok(())
    }

    /// Commands realizing `current -> target`, every one resolved against the
    /// code table before anything is written.
    ///
    /// Intermediate lattice points lie strictly below the target, so a target
    /// that sits on the lattice (3.0 from 1.0 gives `[2.0, 3.0]`) is sent once.
    pub fn plan_transition(&self, target: Intensity) -> Result<Vec<String>> {
        if !self.codes.contains(target) {
            return Err(ExperimentError::UnrepresentableIntensity {
                intensity: target.as_f64(),
            });
        }

        if target == self.current {
            return Ok(Vec::new());
        }

        let mut steps = Vec::new();
        if target > self.current && target.tenths() - self.current.tenths() > UNIT_STEP_TENTHS {
            let mut stone = self.current.next_lattice_point();
            while stone < target {
                steps.push(stone);
                stone = Intensity::from_tenths(stone.tenths() + UNIT_STEP_TENTHS);
            }
        }
        // The terminal command is always the one for the requested value.
        steps.push(target);

        steps
            .into_iter()
            .map(|step| {
                self.codes
                    .command(step)
                    .map(str::to_string)
                    .ok_or(ExperimentError::UnrepresentableIntensity {
                        intensity: step.as_f64(),
                    })
            })
            .collect()
    }

    pub fn pulse(&mut self) -> Result<()> {
        self.send_command(PULSE_COMMAND)
    }

    pub fn wake(&mut self) -> Result<()> {
        self.send_command(WAKEUP_COMMAND)
    }

    /// Both values are checked before either command is sent.
    pub fn configure(&mut self, pulse_duration_ms: u32, trigger_delay_ms: u32) -> Result<()> {
        let duration_command = pulse_duration_command(pulse_duration_ms)?;
        let delay_command = trigger_delay_command(trigger_delay_ms)?;
        self.send_command(duration_command)?;
        self.send_command(delay_command)
    }

    pub fn set_pulse_duration(&mut self, duration_ms: u32) -> Result<()> {
        let command = pulse_duration_command(duration_ms)?;
        self.send_command(command)
    }

    pub fn set_trigger_delay(&mut self, delay_ms: u32) -> Result<()> {
        let command = trigger_delay_command(delay_ms)?;
        self.send_command(command)
    }

    fn send_command(&mut self, command: &str) -> Result<()> {
        tracing::trace!(stimulator = %self.label, command, "send");
        self.transport.write(command.as_bytes())?;
        Ok(())
    }
}

fn pulse_duration_command(duration_ms: u32) -> Result<&'static str> {
    match duration_ms {
        200 => Ok(PULSE_DURATION_200_COMMAND),
        other => Err(ExperimentError::UnsupportedConfiguration {
            parameter: "pulse_duration",
            value: other,
        }),
    }
}

fn trigger_delay_command(delay_ms: u32) -> Result<&'static str> {
    match delay_ms {
        0 => Ok(TRIGGER_DELAY_0_COMMAND),
        50 => Ok(TRIGGER_DELAY_50_COMMAND),
        other => Err(ExperimentError::UnsupportedConfiguration {
            parameter: "trigger_delay",
            value: other,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::transport::FakeTransport;

    fn stimulator(pairs: &[(f64, &str)], start: f64) -> (Stimulator, FakeTransport) {
        let fake = FakeTransport::new();
        let codes = IntensityCodeTable::from_pairs(pairs.iter().map(|(v, c)| (*v, *c)));
        let stim = Stimulator::new(
            "test",
            codes,
            Intensity::from_f64(start),
            Box::new(fake.clone()),
        );
        (stim, fake)
    }

    /// Table with every tenth from 0.0 to 6.0, command = "I<tenths>".
    fn full_table(start: f64) -> (Stimulator, FakeTransport) {
        let pairs: Vec<(f64, String)> =
            (0..=60).map(|t| (t as f64 / 10.0, format!("I{}", t))).collect();
        let fake = FakeTransport::new();
        let codes = IntensityCodeTable::from_pairs(pairs);
        let stim = Stimulator::new(
            "test",
            codes,
            Intensity::from_f64(start),
            Box::new(fake.clone()),
        );
        (stim, fake)
    }

    fn tenths_of(command: &str) -> i32 {
        command.trim_start_matches('I').parse().unwrap()
    }

    #[test]
    fn ramps_up_through_unit_steps() {
        let (mut stim, fake) = stimulator(&[(1.0, "A"), (2.0, "B"), (3.0, "C")], 1.0);

        stim.set_intensity(3.0).unwrap();

        assert_eq!(fake.sent(), vec!["B", "C"]);
        assert_eq!(stim.current(), Intensity::from_f64(3.0));
    }

    #[test]
    fn upward_ramps_never_step_more_than_one_unit() {
        for (from, to) in [(0.0, 6.0), (1.3, 3.5), (1.5, 2.6), (2.0, 3.0), (0.7, 4.0), (4.9, 5.0)] {
            let (mut stim, fake) = full_table(from);
            stim.set_intensity(to).unwrap();

            let sent = fake.sent();
            assert_eq!(sent.last().map(|c| tenths_of(c)), Some((to * 10.0_f64).round() as i32));

            let mut previous = (from * 10.0_f64).round() as i32;
            for command in &sent {
                let next = tenths_of(command);
                assert!(next > previous, "{from} -> {to}: non ascending {sent:?}");
                assert!(next - previous <= 10, "{from} -> {to}: step too large {sent:?}");
                previous = next;
            }
            assert_eq!(stim.current(), Intensity::from_f64(to));
        }
    }

    #[test]
    fn goes_down_in_one_command() {
        let (mut stim, fake) = full_table(5.5);
        stim.set_intensity(1.2).unwrap();

        assert_eq!(fake.sent(), vec!["I12"]);
        assert_eq!(stim.current(), Intensity::from_f64(1.2));
    }

    #[test]
    fn same_intensity_is_a_noop() {
        let (mut stim, fake) = full_table(2.0);
        stim.set_intensity(2.04).unwrap();
        assert!(fake.sent().is_empty());
    }

    #[test]
    fn missing_target_fails_without_side_effects() {
        let (mut stim, fake) = stimulator(&[(1.0, "A"), (2.0, "B")], 1.0);

        let err = stim.set_intensity(2.5).unwrap_err();

        assert!(matches!(
            err,
            ExperimentError::UnrepresentableIntensity { intensity } if intensity == 2.5
        ));
        assert!(fake.sent().is_empty());
        assert_eq!(stim.current(), Intensity::from_f64(1.0));
    }

    #[test]
    fn missing_ramp_step_fails_before_any_write() {
        // 2.0 is absent, so the ramp 1.0 -> 3.0 cannot be realized.
        let (mut stim, fake) = stimulator(&[(1.0, "A"), (3.0, "C")], 1.0);

        let err = stim.set_intensity(3.0).unwrap_err();

        assert!(matches!(
            err,
            ExperimentError::UnrepresentableIntensity { intensity } if intensity == 2.0
        ));
        assert!(fake.sent().is_empty());
        assert_eq!(stim.current(), Intensity::from_f64(1.0));
    }

    #[test]
    fn pulse_and_wake_use_fixed_commands() {
        let (mut stim, fake) = full_table(1.0);
        stim.wake().unwrap();
        stim.pulse().unwrap();
        assert_eq!(fake.sent(), vec![WAKEUP_COMMAND, PULSE_COMMAND]);
        assert_eq!(stim.current(), Intensity::from_f64(1.0));
    }

    #[test]
    fn configure_accepts_only_supported_values() {
        let (mut stim, fake) = full_table(1.0);

        stim.configure(200, 50).unwrap();
        assert_eq!(fake.sent(), vec![PULSE_DURATION_200_COMMAND, TRIGGER_DELAY_50_COMMAND]);
        fake.clear();

        let err = stim.configure(100, 0).unwrap_err();
        assert!(matches!(
            err,
            ExperimentError::UnsupportedConfiguration { parameter: "pulse_duration", value: 100 }
        ));
        let err = stim.configure(200, 25).unwrap_err();
        assert!(matches!(
            err,
            ExperimentError::UnsupportedConfiguration { parameter: "trigger_delay", value: 25 }
        ));
        assert!(fake.sent().is_empty());

        stim.set_trigger_delay(0).unwrap();
        assert_eq!(fake.sent(), vec![TRIGGER_DELAY_0_COMMAND]);
    }

    #[test]
    fn transport_failure_propagates_and_keeps_state() {
        let codes = IntensityCodeTable::from_pairs([(1.0, "A"), (2.0, "B")]);
        let mut stim = Stimulator::new(
            "broken",
            codes,
            Intensity::from_f64(1.0),
            Box::new(FakeTransport::failing()),
        );

        assert!(matches!(stim.pulse(), Err(ExperimentError::Transport(_))));
        assert!(matches!(stim.set_intensity(2.0), Err(ExperimentError::Transport(_))));
        assert_eq!(stim.current(), Intensity::from_f64(1.0));
    }
}
