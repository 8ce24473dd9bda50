//! Firmware protocols
//!
//! The link speaks the GRBL line protocol; other controllers that follow it
//! (grblHAL, FluidNC in GRBL mode) work unchanged.

pub mod grbl;

pub use grbl::{Response, StatusModel};
