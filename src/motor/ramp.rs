// Trapezoidal ramp profile for the TMC5160 ramp generator
//
// Eight parameters shape the velocity trapezoid: start velocity, two
// acceleration legs, cruise velocity, two deceleration legs, stop velocity.
// The in-memory profile is pushed to the device before every motion start so
// the ramp generator always runs the current values.

use super::tmc5160::{BusTransport, MotorChannel, Register, Result, Tmc5160Bus};

// Reference-hardware defaults. These are opaque tuning values; correctness is
// a calibration concern, so no bounds are applied beyond the register width.
const DEFAULT_VSTART: u32 = 1;
const DEFAULT_A1: u32 = 25_000;
const DEFAULT_V1: u32 = 250_000;
const DEFAULT_AMAX: u32 = 5_000;
const DEFAULT_VMAX: u32 = 1_000_000;
const DEFAULT_DMAX: u32 = 5_000;
const DEFAULT_D1: u32 = 50_000;
const DEFAULT_VSTOP: u32 = 10;

/// In-memory copy of the eight ramp generator parameters.
///
/// Exclusively owned by one motor driver per channel; the driver's setters
/// keep these fields and the device registers in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampProfile {
    pub vstart: u32,
    pub a1: u32,
    pub v1: u32,
    pub amax: u32,
    pub vmax: u32,
    pub dmax: u32,
    pub d1: u32,
    pub vstop: u32,
}

impl Default for RampProfile {
    fn default() -> Self {
        Self {
            vstart: DEFAULT_VSTART,
            a1: DEFAULT_A1,
            v1: DEFAULT_V1,
            amax: DEFAULT_AMAX,
            vmax: DEFAULT_VMAX,
            dmax: DEFAULT_DMAX,
            d1: DEFAULT_D1,
            vstop: DEFAULT_VSTOP,
        }
    }
}

impl RampProfile {
    /// The (register, value) pairs in device write order.
    pub fn entries(&self) -> [(Register, u32); 8] {
        [
            (Register::VStart, self.vstart),
            (Register::A1, self.a1),
            (Register::V1, self.v1),
            (Register::AMax, self.amax),
            (Register::VMax, self.vmax),
            (Register::DMax, self.dmax),
            (Register::D1, self.d1),
            (Register::VStop, self.vstop),
        ]
    }

    /// Push every parameter to its register, in the fixed order.
    pub fn write_all<T: BusTransport>(
        &self,
        bus: &mut Tmc5160Bus<T>,
        channel: MotorChannel,
    ) -> Result<()> {
        for (register, value) in self.entries() {
            bus.write_register(channel, register, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tmc5160::mock::MockTransport;
    use super::*;

    #[test]
    fn test_default_values() {
        let profile = RampProfile::default();
        assert_eq!(profile.vstart, 1);
        assert_eq!(profile.a1, 25_000);
        assert_eq!(profile.v1, 250_000);
        assert_eq!(profile.amax, 5_000);
        assert_eq!(profile.vmax, 1_000_000);
        assert_eq!(profile.dmax, 5_000);
        assert_eq!(profile.d1, 50_000);
        assert_eq!(profile.vstop, 10);
    }

    #[test]
    fn test_write_all_order() {
        let mut bus = Tmc5160Bus::new(MockTransport::new());
        let profile = RampProfile::default();
        profile.write_all(&mut bus, MotorChannel::M0).unwrap();

        let writes = bus.transport().writes();
        let expected = vec![
            (0x23, 1),         // VSTART
            (0x24, 25_000),    // A1
            (0x25, 250_000),   // V1
            (0x26, 5_000),     // AMAX
            (0x27, 1_000_000), // VMAX
            (0x28, 5_000),     // DMAX
            (0x2A, 50_000),    // D1
            (0x2B, 10),        // VSTOP
        ];
        assert_eq!(writes, expected);
    }

    #[test]
    fn test_write_all_reflects_current_fields() {
        let mut bus = Tmc5160Bus::new(MockTransport::new());
        let profile = RampProfile {
            vmax: 500_000,
            ..RampProfile::default()
        };
        profile.write_all(&mut bus, MotorChannel::M1).unwrap();

        let writes = bus.transport().writes();
        assert!(writes.contains(&(0x27, 500_000)));
    }
}
