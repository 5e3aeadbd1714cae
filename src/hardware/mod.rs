pub mod codes;
pub mod sgc;
pub mod transport;
pub mod trigger;

pub use codes::{Intensity, IntensityCodeTable};
pub use sgc::Stimulator;
pub use transport::{FakeTransport, SerialTransport, Transport};
pub use trigger::{NullTrigger, TriggerLine};
