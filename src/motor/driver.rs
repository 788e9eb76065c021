// High-level motion control for one TMC5160 motor channel
//
// Combines the register codec with the ramp profile to provide position
// moves, velocity moves, a blocking stop, and switch-based homing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::{
    CHOPCONF_DEFAULT, GCONF_DEFAULT, HOMING_SETTLE, IHOLD_IRUN_DEFAULT, MotionTimeouts,
    TPOWERDOWN_DEFAULT, TPWMTHRS_DEFAULT,
};

use super::ramp::RampProfile;
use super::tmc5160::{
    BusHandle, BusTransport, MotorChannel, RAMPSTAT_CLEAR_LATCH_L, RAMPSTAT_CLEAR_LATCH_R,
    RampMode, RampStatus, Register, Result, SWMODE_HOME_LEFT, SWMODE_HOME_RIGHT, Tmc5160Error,
    twos_complement,
};

/// Back-off distance used to drive clear of a switch the stage is resting on.
const HOME_BACKOFF_STEPS: i64 = 512_000;

/// Sweep target for the homing approach; large enough to cross the full
/// travel range so the switch always trips before the move completes.
const HOME_SWEEP_TARGET: i64 = -2_560_000;

/// Travel direction toward one of the two reference switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

impl TryFrom<u8> for Direction {
    type Error = Tmc5160Error;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Left),
            1 => Ok(Self::Right),
            _ => Err(Tmc5160Error::InvalidDirection { code }),
        }
    }
}

/// Clonable handle that aborts the blocking poll loops.
///
/// The driver itself is single-threaded; the token exists so a signal handler
/// or supervising thread can interrupt a stop or homing wait.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Motion controller for one motor channel.
///
/// Construction validates the channel, then applies the power-up register
/// defaults so the ramp generator starts in positioning mode at zero.
pub struct MotorDriver<T: BusTransport> {
    bus: BusHandle<T>,
    channel: MotorChannel,
    ramp: RampProfile,
    timeouts: MotionTimeouts,
    cancel: CancelToken,
}

impl<T: BusTransport> MotorDriver<T> {
    /// Create a driver for the given motor slot and apply default settings.
    ///
    /// # Errors
    /// Returns `Tmc5160Error::UnsupportedChannel` before touching the bus if
    /// the index has no pin assignment on this board.
    pub fn new(bus: BusHandle<T>, index: u8) -> Result<Self> {
        let channel = MotorChannel::try_from(index)?;
        let mut driver = Self {
            bus,
            channel,
            ramp: RampProfile::default(),
            timeouts: MotionTimeouts::default(),
            cancel: CancelToken::new(),
        };
        driver.default_settings()?;
        info!("motor m{} initialized with default settings", index);
        Ok(driver)
    }

    /// Override the deadlines for the blocking waits.
    pub fn with_timeouts(mut self, timeouts: MotionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Handle for aborting this driver's poll loops from elsewhere.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn channel(&self) -> MotorChannel {
        self.channel
    }

    /// Current in-memory ramp profile.
    pub fn ramp(&self) -> &RampProfile {
        &self.ramp
    }

    /// Drive the enable line; the motor holds and moves only while enabled.
    pub fn enable(&mut self) -> Result<()> {
        self.bus.borrow_mut().set_enable(self.channel, true)
    }

    /// Release the enable line, de-energizing the motor.
    pub fn disable(&mut self) -> Result<()> {
        self.bus.borrow_mut().set_enable(self.channel, false)
    }

    /// Power-up register values plus ramp defaults, ending in positioning
    /// mode with actual and target position both zero.
    fn default_settings(&mut self) -> Result<()> {
        self.write(Register::GConf, GCONF_DEFAULT)?;
        self.write(Register::ChopConf, CHOPCONF_DEFAULT)?;
        self.write(Register::IHoldIRun, IHOLD_IRUN_DEFAULT)?;
        self.write(Register::TPowerDown, TPOWERDOWN_DEFAULT)?;
        self.write(Register::TPwmThrs, TPWMTHRS_DEFAULT)?;

        self.reset_ramp_defaults()?;

        self.write(Register::RampMode, RampMode::Positioning as u32)?;
        self.write(Register::XActual, 0)?;
        self.write(Register::XTarget, 0)?;
        Ok(())
    }

    // Ramp parameter setters: each updates the in-memory field and writes the
    // register in the same call, so the two never diverge.

    pub fn set_vstart(&mut self, value: u32) -> Result<()> {
        self.ramp.vstart = value;
        self.write(Register::VStart, value)
    }

    pub fn set_a1(&mut self, value: u32) -> Result<()> {
        self.ramp.a1 = value;
        self.write(Register::A1, value)
    }

    pub fn set_v1(&mut self, value: u32) -> Result<()> {
        self.ramp.v1 = value;
        self.write(Register::V1, value)
    }

    pub fn set_amax(&mut self, value: u32) -> Result<()> {
        self.ramp.amax = value;
        self.write(Register::AMax, value)
    }

    pub fn set_vmax(&mut self, value: u32) -> Result<()> {
        self.ramp.vmax = value;
        self.write(Register::VMax, value)
    }

    pub fn set_dmax(&mut self, value: u32) -> Result<()> {
        self.ramp.dmax = value;
        self.write(Register::DMax, value)
    }

    pub fn set_d1(&mut self, value: u32) -> Result<()> {
        self.ramp.d1 = value;
        self.write(Register::D1, value)
    }

    pub fn set_vstop(&mut self, value: u32) -> Result<()> {
        self.ramp.vstop = value;
        self.write(Register::VStop, value)
    }

    /// Reset the ramp profile to the reference defaults and push all eight
    /// registers.
    pub fn reset_ramp_defaults(&mut self) -> Result<()> {
        self.ramp = RampProfile::default();
        self.write_ramp_params()
    }

    /// Re-push every current ramp parameter so any field changed since the
    /// last device write takes effect.
    pub fn write_ramp_params(&mut self) -> Result<()> {
        self.ramp.write_all(&mut self.bus.borrow_mut(), self.channel)
    }

    /// Start a move to an absolute position.
    ///
    /// Switches to positioning mode, pushes the ramp profile, clamps the
    /// target to the signed 32-bit range and writes it. Non-blocking: poll
    /// `get_position` or the status flags to observe completion.
    pub fn go_to(&mut self, position: i64) -> Result<()> {
        self.set_ramp_mode(RampMode::Positioning)?;
        self.write_ramp_params()?;

        let clamped = position.clamp(i64::from(i32::MIN), i64::from(i32::MAX));
        if clamped != position {
            warn!("position target {} clamped to {}", position, clamped);
        }

        self.write(Register::XTarget, clamped as i32 as u32)
    }

    /// Run at constant velocity toward the given direction.
    ///
    /// Optional overrides are written to VMAX/AMAX before the mode switch;
    /// they bypass the stored ramp profile, and `stop` restores the profile's
    /// VMAX afterwards.
    pub fn move_at_velocity(
        &mut self,
        direction: Direction,
        vmax: Option<u32>,
        amax: Option<u32>,
    ) -> Result<()> {
        if let Some(vmax) = vmax {
            self.write(Register::VMax, vmax)?;
        }
        if let Some(amax) = amax {
            self.write(Register::AMax, amax)?;
        }

        let mode = match direction {
            Direction::Left => RampMode::VelocityLeft,
            Direction::Right => RampMode::VelocityRight,
        };
        self.set_ramp_mode(mode)
    }

    /// Decelerate to standstill, then hold.
    ///
    /// Blocks polling the actual velocity until it reads zero, bounded by the
    /// configured stop timeout. Restores the profile's VMAX so a subsequent
    /// `go_to` is not capped at zero.
    pub fn stop(&mut self) -> Result<()> {
        self.move_at_velocity(Direction::Left, Some(0), None)?;
        self.poll_until("motor stop", self.timeouts.stop_timeout, |motor| {
            Ok(motor.get_velocity()? == 0)
        })?;
        self.set_ramp_mode(RampMode::Hold)?;
        self.set_vmax(self.ramp.vmax)
    }

    pub fn hold_mode(&mut self) -> Result<()> {
        self.set_ramp_mode(RampMode::Hold)
    }

    pub fn position_mode(&mut self) -> Result<()> {
        self.set_ramp_mode(RampMode::Positioning)
    }

    /// Actual position, converted from 32-bit two's complement.
    pub fn get_position(&mut self) -> Result<i32> {
        Ok(twos_complement(self.read(Register::XActual)?, 32))
    }

    /// Position latched at the moment a reference switch triggered.
    pub fn get_latched_position(&mut self) -> Result<i32> {
        Ok(twos_complement(self.read(Register::XLatch)?, 32))
    }

    /// Actual velocity, converted from 24-bit two's complement.
    pub fn get_velocity(&mut self) -> Result<i32> {
        Ok(twos_complement(self.read(Register::VActual)?, 24))
    }

    /// Fresh snapshot of the ramp and switch status flags.
    pub fn get_ramp_status(&mut self) -> Result<RampStatus> {
        Ok(RampStatus::from_bits(self.read(Register::RampStat)?))
    }

    /// Calibrate the zero reference against a limit switch.
    ///
    /// Enables the switch inputs for the requested side, drives off the
    /// switch if already resting on it, sweeps back until the ramp generator
    /// halts on the switch, then re-bases the coordinate origin from the
    /// latched position and parks at zero.
    pub fn calibrate_home(&mut self, direction: Direction) -> Result<()> {
        info!(
            "homing m{} against the {:?} switch",
            self.channel.index(),
            direction
        );

        let (switch_template, clear_mask, backoff) = match direction {
            Direction::Left => (SWMODE_HOME_LEFT, RAMPSTAT_CLEAR_LATCH_L, HOME_BACKOFF_STEPS),
            Direction::Right => (SWMODE_HOME_RIGHT, RAMPSTAT_CLEAR_LATCH_R, -HOME_BACKOFF_STEPS),
        };
        self.write(Register::SwMode, switch_template)?;

        // If the stage is already resting on the switch, drive clear of it
        // before the approach so the latch captures a real transition.
        if self.stop_switch_active(direction)? {
            self.go_to(backoff)?;
            self.poll_until(
                "homing switch release",
                self.timeouts.homing_timeout,
                |motor| Ok(!motor.stop_switch_active(direction)?),
            )?;
        }

        // Sweep back toward the switch; the ramp generator halts internally
        // when the switch trips, observed here as velocity reaching zero.
        self.go_to(HOME_SWEEP_TARGET)?;
        thread::sleep(HOMING_SETTLE);
        self.poll_until(
            "homing standstill",
            self.timeouts.homing_timeout,
            |motor| Ok(motor.get_velocity()? == 0),
        )?;

        self.set_ramp_mode(RampMode::Hold)?;

        // Re-base the origin from the latched switch position, not the live
        // position: the stage overshoots between latch and standstill.
        let diff = self.get_position()? - self.get_latched_position()?;
        self.write(Register::XActual, diff as u32)?;
        self.write(Register::RampStat, clear_mask)?;
        self.go_to(0)?;

        info!("homing complete, origin re-based at the switch");
        Ok(())
    }

    fn stop_switch_active(&mut self, direction: Direction) -> Result<bool> {
        let status = self.get_ramp_status()?;
        Ok(match direction {
            Direction::Left => status.status_stop_l,
            Direction::Right => status.status_stop_r,
        })
    }

    fn set_ramp_mode(&mut self, mode: RampMode) -> Result<()> {
        self.write(Register::RampMode, mode as u32)
    }

    fn write(&mut self, register: Register, value: u32) -> Result<()> {
        self.bus
            .borrow_mut()
            .write_register(self.channel, register, value)
            .map(|_| ())
    }

    fn read(&mut self, register: Register) -> Result<u32> {
        self.bus.borrow_mut().read_register(self.channel, register)
    }

    /// Poll `done` at the configured interval until it reports true, the
    /// token is cancelled, or the deadline expires.
    fn poll_until<F>(&mut self, operation: &'static str, timeout: Duration, mut done: F) -> Result<()>
    where
        F: FnMut(&mut Self) -> Result<bool>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if done(self)? {
                return Ok(());
            }
            if self.cancel.is_cancelled() {
                return Err(Tmc5160Error::Cancelled { operation });
            }
            if Instant::now() >= deadline {
                return Err(Tmc5160Error::Timeout { operation, timeout });
            }
            thread::sleep(self.timeouts.poll_interval);
        }
    }
}
