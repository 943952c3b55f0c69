//! Ports - seams for time and id generation.
//!
//! Both are traits so tests can pin time (`FixedClock`) and still get unique ids.

pub mod clock;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
