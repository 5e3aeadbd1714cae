//! Operator console on stdin.
//!
//! A single reader thread owns stdin. While a rate prompt is pending, each
//! line is handed to the prompt; otherwise every character of the line is a
//! key press for the response listener. Stdin is line-buffered, so key presses
//! reach the listener when Enter is pressed.

use crate::error::{ExperimentError, Result};
use crate::experiment::calibration::RateInput;
use crate::experiment::responses::ResponseListener;

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

/// Decides where one line of console input goes.
struct LineRouter {
    listener: ResponseListener,
    prompt_pending: Arc<AtomicBool>,
    answers: Sender<String>,
}

impl LineRouter {
    /// Returns `false` once the prompt side has gone away.
    fn route(&self, line: &str) -> bool {
        if self.prompt_pending.load(Ordering::SeqCst) {
            return self.answers.send(line.trim().to_string()).is_ok();
        }
        for key in line.trim().chars() {
            self.listener.on_press(key);
        }
        true
    }
}

/// Respiratory-rate prompt fed by the console thread.
pub struct StdinRateInput {
    prompt_pending: Arc<AtomicBool>,
    answers: Receiver<String>,
}

impl RateInput for StdinRateInput {
    fn read_rate(&mut self) -> Result<String> {
        print!("{}", "Please input the respiratory rate: ".cyan().bold());
        io::stdout().flush()?;

        self.prompt_pending.store(true, Ordering::SeqCst);
        let answer = self.answers.recv();
        self.prompt_pending.store(false, Ordering::SeqCst);

        answer.map_err(|_| {
            ExperimentError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "console input closed while waiting for a respiratory rate",
            ))
        })
    }
}

/// Starts the console thread. The thread exits when stdin closes.
pub fn spawn_console(listener: ResponseListener) -> StdinRateInput {
    let prompt_pending = Arc::new(AtomicBool::new(false));
    let (answers_tx, answers_rx) = mpsc::channel();
    let router = LineRouter {
        listener,
        prompt_pending: Arc::clone(&prompt_pending),
        answers: answers_tx,
    };

    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if !router.route(&line) {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("console input failed: {}", e);
                    break;
                }
            }
        }
        tracing::debug!("console reader stopped");
    });

    StdinRateInput {
        prompt_pending,
        answers: answers_rx,
    }
}
