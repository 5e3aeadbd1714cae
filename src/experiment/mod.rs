pub mod calibration;
pub mod delivery;
pub mod responses;
pub mod scheduler;
pub mod sequence;
pub mod session;
pub mod staircase;
pub mod trial;

pub use session::{estimate_duration, Session, SessionParts};
