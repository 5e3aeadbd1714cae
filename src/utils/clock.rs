use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Monotonic time source for the trial loop.
pub trait Clock {
    /// Time since the clock's origin (session start).
    fn elapsed(&self) -> Duration;
}

impl<C: Clock + ?Sized> Clock for Rc<C> {
    fn elapsed(&self) -> Duration {
        (**self).elapsed()
    }
}

pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Busy-waits until `deadline`; never sleeps.
pub fn spin_until(clock: &dyn Clock, deadline: Duration) {
    while clock.elapsed() < deadline {
        std::hint::spin_loop();
    }
}

// STEPPING CLOCK --------------------------------------------------------------

type Action = Box<dyn FnOnce()>;

/// Deterministic clock that advances by a fixed step on every read and runs
/// scheduled actions (e.g. simulated key presses) once their time is reached.
pub struct SteppingClock {
    now: Cell<Duration>,
    step: Duration,
    actions: RefCell<Vec<(Duration, Action)>>,
}

impl SteppingClock {
    pub fn new(step: Duration) -> Self {
        Self {
            now: Cell::new(Duration::ZERO),
            step,
            actions: RefCell::new(Vec::new()),
        }
    }

    pub fn at(&self, when: Duration, action: impl FnOnce() + 'static) {
        self.actions.borrow_mut().push((when, Box::new(action)));
    }

    pub fn now(&self) -> Duration {
        self.now.get()
    }

    fn fire_due(&self, now: Duration) {
        let due: Vec<Action> = {
            let mut actions = self.actions.borrow_mut();
            let (due, pending): (Vec<_>, Vec<_>) =
                actions.drain(..).partition(|(when, _)| *when <= now);
            *actions = pending;
            due.into_iter().map(|(_, action)| action).collect()
        };
        for action in due {
            action();
        }
    }
}

impl Clock for SteppingClock {
    fn elapsed(&self) -> Duration {
        let now = self.now.get() + self.step;
        self.now.set(now);
        self.fire_due(now);
        now
    }
}
