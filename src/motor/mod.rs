// Motor control module for the TMC5160 stage driver
//
// Provides:
// - TMC5160 SPI register protocol and transport abstraction
// - Trapezoidal ramp profile management
// - High-level motion control and switch-based homing

mod driver;
pub mod ramp;
pub mod tmc5160;

pub use driver::{CancelToken, Direction, MotorDriver};
pub use ramp::RampProfile;
pub use tmc5160::{
    BusHandle, BusTransport, MotorChannel, RampMode, RampStatus, Register, RpiTransport,
    Tmc5160Bus, Tmc5160Error, twos_complement,
};
