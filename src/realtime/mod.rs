//! Real-time event classifiers
//!
//! These run on sensor change notifications rather than on the refresh tick:
//! - [`HeatingDetector`]: heating sessions from power-threshold crossings
//! - [`WindowDetector`]: window-open from the indoor temperature rate of change
//! - [`WindowAlert`]: delayed, cancellable window-open alert

pub mod alert;
pub mod heating;
pub mod window;

pub use alert::{AlertOutcome, WindowAlert};
pub use heating::{HeatingDetector, HeatingEvent, HeatingSegment};
pub use window::{polling_window_open, WindowDetector, WindowTransition};
