//! Stream combinators for viewer output

mod throttle;

pub use throttle::{Throttle, ThrottleExt};
