//! Synchronous SPI driver for TMC5160-class stepper controllers.
//!
//! Drives a mechanical stage through the chip's internal ramp generator:
//! absolute position moves, constant-velocity moves, a blocking stop, and a
//! limit-switch homing routine that re-bases the coordinate origin.
//!
//! The register bus is shared between the board's two motor slots; each
//! [`motor::MotorDriver`] frames its own transfers with its channel's
//! chip-select line.

pub mod config;
pub mod motor;

pub use motor::{Direction, MotorDriver, RpiTransport, Tmc5160Bus, Tmc5160Error};
