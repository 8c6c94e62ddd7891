//! Hardware backends for the tensile tester.
//!
//! The default build provides a simulated rig (axis, limit switch, load
//! cell) good enough to exercise the whole motion and capture stack on a
//! host machine. The `hardware` feature adds Raspberry Pi GPIO backends.

pub mod error;
#[cfg(feature = "hardware")]
pub mod gpio;
pub mod sim;

pub use sim::{SimAxisHandle, SimulatedAxis, SimulatedLoadCell, SimulatedSwitch, SwitchHandle};
