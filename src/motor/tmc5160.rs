// TMC5160 SPI register protocol implementation
//
// Datagram format: [address | write flag, value MSB, .., value LSB]
// Every transfer is exactly 5 bytes, framed by the channel's chip-select line.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use rppal::gpio::{Gpio, OutputPin};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use tracing::debug;

use crate::config::{MOTOR_PINS, SPI_CLOCK_HZ};

/// Length of every SPI datagram: one address byte plus a 32-bit value.
pub const FRAME_LEN: usize = 5;

/// Bit 7 of the address byte selects a register write.
pub const WRITE_FLAG: u8 = 0x80;
const ADDRESS_MASK: u8 = 0x7F;

/// Register addresses for the TMC5160
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    // Global configuration
    GConf = 0x00,
    IHoldIRun = 0x10, // hold/run current
    TPowerDown = 0x11,
    TPwmThrs = 0x13, // stealthChop upper velocity threshold

    // Ramp generator motion control
    RampMode = 0x20,
    XActual = 0x21, // actual position, signed 32-bit
    VActual = 0x22, // actual velocity, signed 24-bit, read-only
    VStart = 0x23,
    A1 = 0x24,
    V1 = 0x25,
    AMax = 0x26,
    VMax = 0x27,
    DMax = 0x28,
    D1 = 0x2A,
    VStop = 0x2B,
    XTarget = 0x2D, // target position, signed 32-bit

    // Ramp generator driver feature control
    SwMode = 0x34,   // reference switch configuration
    RampStat = 0x35, // ramp and switch status flags
    XLatch = 0x36,   // position latched on switch event, read-only

    // Chopper and driver configuration
    ChopConf = 0x6C,
}

impl Register {
    /// 7-bit register address (write flag clear).
    pub fn addr(self) -> u8 {
        self as u8
    }
}

/// Ramp generator operating modes (RAMPMODE register)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampMode {
    Positioning = 0,
    VelocityLeft = 1,
    VelocityRight = 2,
    Hold = 3,
}

// SW_MODE bits used by the homing switch templates
const SWMODE_STOP_L_ENABLE: u32 = 1 << 0;
const SWMODE_STOP_R_ENABLE: u32 = 1 << 1;
const SWMODE_LATCH_L_ACTIVE: u32 = 1 << 5;
const SWMODE_LATCH_R_ACTIVE: u32 = 1 << 7;
const SWMODE_EN_SOFTSTOP: u32 = 1 << 11;

/// SW_MODE template for homing against the left reference switch.
pub const SWMODE_HOME_LEFT: u32 =
    SWMODE_EN_SOFTSTOP | SWMODE_LATCH_L_ACTIVE | SWMODE_STOP_L_ENABLE;
/// SW_MODE template for homing against the right reference switch.
pub const SWMODE_HOME_RIGHT: u32 =
    SWMODE_EN_SOFTSTOP | SWMODE_LATCH_R_ACTIVE | SWMODE_STOP_R_ENABLE;

/// RAMP_STAT write masks that clear the left/right latch flag after homing.
pub const RAMPSTAT_CLEAR_LATCH_L: u32 = 1 << 2;
pub const RAMPSTAT_CLEAR_LATCH_R: u32 = 1 << 3;

/// Error types for TMC5160 communication and motion control
#[derive(Debug, thiserror::Error)]
pub enum Tmc5160Error {
    #[error("SPI bus error: {0}")]
    Spi(#[from] rppal::spi::Error),

    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("motor channel {index} is not available on this board")]
    UnsupportedChannel { index: u8 },

    #[error("invalid direction code {code}, expected 0 (left) or 1 (right)")]
    InvalidDirection { code: u8 },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },
}

pub type Result<T> = std::result::Result<T, Tmc5160Error>;

/// Motor slot on the board. Each channel owns one chip-select and one
/// enable line; the SPI bus itself is shared between channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorChannel {
    M0 = 0,
    M1 = 1,
}

impl MotorChannel {
    pub fn index(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MotorChannel {
    type Error = Tmc5160Error;

    fn try_from(index: u8) -> Result<Self> {
        match index {
            0 => Ok(Self::M0),
            1 => Ok(Self::M1),
            _ => Err(Tmc5160Error::UnsupportedChannel { index }),
        }
    }
}

/// Byte-transfer and control-line primitives the register codec is built on.
///
/// The production implementation is [`RpiTransport`]; tests substitute a mock
/// with a transaction log. Implementations only move bytes and toggle lines;
/// datagram framing and chip-select discipline live in [`Tmc5160Bus`].
pub trait BusTransport {
    /// Full-duplex exchange of one 5-byte datagram.
    fn transfer(&mut self, tx: &[u8; FRAME_LEN], rx: &mut [u8; FRAME_LEN]) -> Result<()>;

    /// Assert (`true`) or release the channel's chip-select line.
    fn set_chip_select(&mut self, channel: MotorChannel, selected: bool) -> Result<()>;

    /// Drive (`true`) or release the channel's enable line.
    fn set_enable(&mut self, channel: MotorChannel, driven: bool) -> Result<()>;
}

/// Raspberry Pi SPI + GPIO transport for the reference HAT.
///
/// Chip-select is handled through plain GPIO pins rather than the
/// controller's native slave-select, because both motor slots share SPI0.
pub struct RpiTransport {
    spi: Spi,
    lines: [ChannelLines; 2],
}

struct ChannelLines {
    chip_select: OutputPin,
    enable: OutputPin,
}

impl RpiTransport {
    /// Open SPI0 in mode 3 and claim both channels' control lines.
    /// Lines start released (high): motors disabled, nothing addressed.
    pub fn open() -> Result<Self> {
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, SPI_CLOCK_HZ, Mode::Mode3)?;
        let gpio = Gpio::new()?;

        let mut lines = Vec::with_capacity(2);
        for pins in MOTOR_PINS {
            lines.push(ChannelLines {
                chip_select: gpio.get(pins.chip_select)?.into_output_high(),
                enable: gpio.get(pins.enable)?.into_output_high(),
            });
        }
        let lines = match <[ChannelLines; 2]>::try_from(lines) {
            Ok(lines) => lines,
            Err(_) => unreachable!("MOTOR_PINS has exactly two entries"),
        };

        Ok(Self { spi, lines })
    }

    fn lines_mut(&mut self, channel: MotorChannel) -> &mut ChannelLines {
        &mut self.lines[channel.index() as usize]
    }
}

impl BusTransport for RpiTransport {
    fn transfer(&mut self, tx: &[u8; FRAME_LEN], rx: &mut [u8; FRAME_LEN]) -> Result<()> {
        self.spi.transfer(rx, tx)?;
        Ok(())
    }

    fn set_chip_select(&mut self, channel: MotorChannel, selected: bool) -> Result<()> {
        let pin = &mut self.lines_mut(channel).chip_select;
        // Active low
        if selected {
            pin.set_low();
        } else {
            pin.set_high();
        }
        Ok(())
    }

    fn set_enable(&mut self, channel: MotorChannel, driven: bool) -> Result<()> {
        let pin = &mut self.lines_mut(channel).enable;
        // Active low
        if driven {
            pin.set_low();
        } else {
            pin.set_high();
        }
        Ok(())
    }
}

/// Shared handle to the board's register bus.
///
/// The bus is a single shared resource; motor drivers for both channels hold
/// clones of this handle and frame their own transfers with their own
/// chip-select. Single-threaded by design, hence `Rc<RefCell<..>>`.
pub type BusHandle<T> = Rc<RefCell<Tmc5160Bus<T>>>;

/// Register codec over a byte transport.
///
/// Builds the 5-byte datagrams, frames each transfer with the channel's
/// chip-select, and reconstructs 32-bit values from responses. Transport
/// faults propagate unmodified; there are no retries.
pub struct Tmc5160Bus<T: BusTransport> {
    transport: T,
}

impl<T: BusTransport> Tmc5160Bus<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Wrap the bus in a shareable handle for the motor drivers.
    pub fn into_shared(self) -> BusHandle<T> {
        Rc::new(RefCell::new(self))
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// One chip-select-framed datagram exchange.
    ///
    /// The device requires chip-select to frame each transfer individually;
    /// batching several datagrams under one assertion is not permitted.
    fn exchange(&mut self, channel: MotorChannel, frame: &[u8; FRAME_LEN]) -> Result<[u8; FRAME_LEN]> {
        self.transport.set_chip_select(channel, true)?;
        let mut response = [0u8; FRAME_LEN];
        let result = self.transport.transfer(frame, &mut response);
        self.transport.set_chip_select(channel, false)?;
        result?;
        Ok(response)
    }

    /// Write a 32-bit value to a register. Returns the raw echoed datagram;
    /// callers normally discard it.
    pub fn write_register(
        &mut self,
        channel: MotorChannel,
        register: Register,
        value: u32,
    ) -> Result<[u8; FRAME_LEN]> {
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = register.addr() | WRITE_FLAG;
        frame[1..].copy_from_slice(&value.to_be_bytes());

        debug!(
            "write m{}: reg={:?}, value=0x{:08X}",
            channel.index(),
            register,
            value
        );
        self.exchange(channel, &frame)
    }

    /// Read a 32-bit register value.
    ///
    /// The chip pipelines reads: the first datagram selects the register and
    /// echoes stale data, the second (same address, zero payload) carries the
    /// value in its last four bytes.
    pub fn read_register(&mut self, channel: MotorChannel, register: Register) -> Result<u32> {
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = register.addr() & ADDRESS_MASK;

        self.exchange(channel, &frame)?;
        let response = self.exchange(channel, &frame)?;

        let mut raw = [0u8; 4];
        raw.copy_from_slice(&response[1..]);
        Ok(u32::from_be_bytes(raw))
    }

    /// Drive or release the channel's enable line (active low on the wire).
    pub fn set_enable(&mut self, channel: MotorChannel, driven: bool) -> Result<()> {
        self.transport.set_enable(channel, driven)
    }
}

/// Decoded RAMP_STAT flags, one snapshot per query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RampStatus {
    pub status_stop_l: bool,      // bit 0: left stop switch status
    pub status_stop_r: bool,      // bit 1: right stop switch status
    pub status_latch_l: bool,     // bit 2: left latch status
    pub status_latch_r: bool,     // bit 3: right latch status
    pub event_stop_l: bool,       // bit 4: left stop event
    pub event_stop_r: bool,       // bit 5: right stop event
    pub event_stop_sg: bool,      // bit 6: stallGuard stop event
    pub event_pos_reached: bool,  // bit 7: target position reached event
    pub velocity_reached: bool,   // bit 8: target velocity reached
    pub position_reached: bool,   // bit 9: target position reached
    pub vzero: bool,              // bit 10: actual velocity is zero
    pub t_zerowait_active: bool,  // bit 11: zero-wait period active
    pub second_move: bool,        // bit 12: positioning reversal pending
    pub status_sg: bool,          // bit 13: stallGuard status
}

impl RampStatus {
    /// Decode the 14 status flags from a raw RAMP_STAT value.
    pub fn from_bits(raw: u32) -> Self {
        let bit = |n: u32| raw & (1 << n) != 0;
        Self {
            status_stop_l: bit(0),
            status_stop_r: bit(1),
            status_latch_l: bit(2),
            status_latch_r: bit(3),
            event_stop_l: bit(4),
            event_stop_r: bit(5),
            event_stop_sg: bit(6),
            event_pos_reached: bit(7),
            velocity_reached: bit(8),
            position_reached: bit(9),
            vzero: bit(10),
            t_zerowait_active: bit(11),
            second_move: bit(12),
            status_sg: bit(13),
        }
    }
}

/// Reinterpret a raw register value as a signed integer of the given width.
///
/// XACTUAL/XTARGET/XLATCH are 32-bit two's complement, VACTUAL is 24-bit.
pub fn twos_complement(raw: u32, bits: u32) -> i32 {
    if raw & (1 << (bits - 1)) != 0 {
        (i64::from(raw) - (1i64 << bits)) as i32
    } else {
        raw as i32
    }
}

/// Mock transport for driver tests: an in-memory register file with a
/// transaction log, reproducing the chip's pipelined read behavior.
#[cfg(test)]
pub(crate) mod mock {
    use std::collections::{HashMap, VecDeque};

    use super::*;

    /// Payload returned for write echoes and the stale first read response.
    pub(crate) const STALE: u32 = 0xDEAD_BEEF;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum BusEvent {
        ChipSelect { channel: u8, selected: bool },
        Enable { channel: u8, driven: bool },
        Transfer { tx: [u8; FRAME_LEN] },
    }

    #[derive(Default)]
    pub(crate) struct MockTransport {
        regs: HashMap<u8, u32>,
        scripted: HashMap<u8, VecDeque<u32>>,
        pub(crate) log: Vec<BusEvent>,
        read_pending: Option<u8>,
    }

    impl MockTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Seed a register with a fixed readback value.
        pub(crate) fn set(&mut self, register: Register, value: u32) {
            self.regs.insert(register.addr(), value);
        }

        /// Queue a sequence of readback values for a register; once drained,
        /// reads fall back to the last value served.
        pub(crate) fn script(&mut self, register: Register, values: &[u32]) {
            self.scripted
                .entry(register.addr())
                .or_default()
                .extend(values.iter().copied());
        }

        /// All write transactions as (address, value), in order.
        pub(crate) fn writes(&self) -> Vec<(u8, u32)> {
            self.log
                .iter()
                .filter_map(|event| match event {
                    BusEvent::Transfer { tx } if tx[0] & WRITE_FLAG != 0 => {
                        let mut raw = [0u8; 4];
                        raw.copy_from_slice(&tx[1..]);
                        Some((tx[0] & ADDRESS_MASK, u32::from_be_bytes(raw)))
                    }
                    _ => None,
                })
                .collect()
        }

        pub(crate) fn transfer_count(&self) -> usize {
            self.log
                .iter()
                .filter(|event| matches!(event, BusEvent::Transfer { .. }))
                .count()
        }

        fn serve(&mut self, addr: u8) -> u32 {
            if let Some(queue) = self.scripted.get_mut(&addr) {
                if let Some(value) = queue.pop_front() {
                    self.regs.insert(addr, value);
                    return value;
                }
            }
            self.regs.get(&addr).copied().unwrap_or(0)
        }
    }

    impl BusTransport for MockTransport {
        fn transfer(&mut self, tx: &[u8; FRAME_LEN], rx: &mut [u8; FRAME_LEN]) -> Result<()> {
            self.log.push(BusEvent::Transfer { tx: *tx });

            let addr = tx[0] & ADDRESS_MASK;
            let value = if tx[0] & WRITE_FLAG != 0 {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&tx[1..]);
                self.regs.insert(addr, u32::from_be_bytes(raw));
                self.read_pending = None;
                STALE
            } else if self.read_pending == Some(addr) {
                // Second datagram of a read pair carries the real value
                self.read_pending = None;
                self.serve(addr)
            } else {
                self.read_pending = Some(addr);
                STALE
            };

            rx[0] = 0;
            rx[1..].copy_from_slice(&value.to_be_bytes());
            Ok(())
        }

        fn set_chip_select(&mut self, channel: MotorChannel, selected: bool) -> Result<()> {
            self.log.push(BusEvent::ChipSelect {
                channel: channel.index(),
                selected,
            });
            Ok(())
        }

        fn set_enable(&mut self, channel: MotorChannel, driven: bool) -> Result<()> {
            self.log.push(BusEvent::Enable {
                channel: channel.index(),
                driven,
            });
            Ok(())
        }
    }
}
