// Bus parameters, board pin map, motion timeouts, power-up register values
use std::time::Duration;

// SPI clock for the motor driver chips.
// 32-bit register values are broken into 4x 8-bit words, MSB first.
pub const SPI_CLOCK_HZ: u32 = 1_000_000;

// Polling interval for velocity-zero and switch-status waits
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

// Settle delay before polling for standstill during homing
pub const HOMING_SETTLE: Duration = Duration::from_millis(100);

// Deadlines for the blocking waits
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);
pub const HOMING_TIMEOUT: Duration = Duration::from_secs(30);

/// Chip-select and enable BCM pin numbers for one motor slot.
/// Both lines are active low.
#[derive(Debug, Clone, Copy)]
pub struct MotorPins {
    pub chip_select: u8,
    pub enable: u8,
}

/// Pin assignments for the two motor slots on the reference HAT,
/// indexed by motor channel.
pub const MOTOR_PINS: [MotorPins; 2] = [
    MotorPins {
        chip_select: 5,
        enable: 23,
    },
    MotorPins {
        chip_select: 6,
        enable: 24,
    },
];

// Power-up register values for the reference hardware
pub const GCONF_DEFAULT: u32 = 0x0000_000C;
pub const CHOPCONF_DEFAULT: u32 = 0x0001_00C3;
pub const IHOLD_IRUN_DEFAULT: u32 = 0x0008_0501;
pub const TPOWERDOWN_DEFAULT: u32 = 0x0000_000A;
pub const TPWMTHRS_DEFAULT: u32 = 0x0000_01F4;

/// Deadlines and poll cadence for the blocking motion waits.
#[derive(Debug, Clone, Copy)]
pub struct MotionTimeouts {
    pub poll_interval: Duration,
    pub stop_timeout: Duration,
    pub homing_timeout: Duration,
}

impl Default for MotionTimeouts {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            stop_timeout: STOP_TIMEOUT,
            homing_timeout: HOMING_TIMEOUT,
        }
    }
}
