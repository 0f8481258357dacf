//! Host controller interface consumed by the card stack.
//!
//! The stack never touches controller registers itself: everything goes
//! through a [`Host`] implementation describing one controller slot.

use bitflags::bitflags;
use embedded_hal::blocking::delay::DelayMs;

use crate::command::Command;
use crate::error::Result;

/// Clock used while probing the card, before any negotiation
pub const FREQ_PROBING_KHZ: u32 = 400;
/// Default-speed clock every card supports
pub const FREQ_DEFAULT_KHZ: u32 = 20_000;
/// SD high-speed clock
pub const FREQ_HIGHSPEED_KHZ: u32 = 40_000;
/// MMC 26MHz-class clock
pub const FREQ_26M_KHZ: u32 = 26_000;
/// MMC 52MHz-class clock
pub const FREQ_52M_KHZ: u32 = 52_000;

bitflags! {
    /// Capability bits of a host slot
    pub struct HostFlags: u32 {
        const BUS_WIDTH_1 = 1 << 0;
        const BUS_WIDTH_4 = 1 << 1;
        const BUS_WIDTH_8 = 1 << 2;
        /// Slot is wired as an SPI bus rather than a native SD/MMC slot
        const SPI = 1 << 3;
        /// Slot supports DDR sampling
        const DDR = 1 << 4;
    }
}

/// Number of DATA lines between host and card
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum BusWidth {
    Width1,
    Width4,
    Width8,
}

impl BusWidth {
    /// log2 of the line count, as encoded in several switch commands
    pub fn log2(self) -> u8 {
        match self {
            BusWidth::Width1 => 0,
            BusWidth::Width4 => 2,
            BusWidth::Width8 => 3,
        }
    }

    pub fn lines(self) -> u8 {
        match self {
            BusWidth::Width1 => 1,
            BusWidth::Width4 => 4,
            BusWidth::Width8 => 8,
        }
    }
}

/// Capability descriptor of one host slot.
///
/// The card takes a copy at init time; the live [`Host`] must stay valid for
/// the card's whole lifetime.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub flags: HostFlags,
    pub slot: u8,
    /// Ceiling for the negotiated card clock
    pub max_freq_khz: u32,
    /// Supply voltage of the slot, millivolts
    pub io_voltage_mv: u32,
    /// Per-command timeout override; 0 keeps the driver default of 1000ms
    pub command_timeout_ms: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            flags: HostFlags::BUS_WIDTH_1 | HostFlags::BUS_WIDTH_4,
            slot: 0,
            max_freq_khz: FREQ_DEFAULT_KHZ,
            io_voltage_mv: 3300,
            command_timeout_ms: 0,
        }
    }
}

impl HostConfig {
    pub fn is_spi(&self) -> bool {
        self.flags.contains(HostFlags::SPI)
    }
}

/// One controller slot, as seen by the protocol stack.
///
/// `do_transaction` is the single suspension point of the stack: it blocks
/// until the command (and its data phase, if any) completes or times out,
/// honouring `cmd.timeout_ms`. For commands carrying [`CommandFlags::AUTO_STOP`]
/// the host issues STOP_TRANSMISSION (CMD12) itself after the data phase.
///
/// [`CommandFlags::AUTO_STOP`]: crate::command::CommandFlags::AUTO_STOP
pub trait Host: DelayMs<u32> {
    /// Bring up the controller slot
    fn init(&mut self) -> Result<()>;

    /// Release the controller slot
    fn deinit(&mut self) -> Result<()>;

    /// Execute one command, filling in `cmd.response` on success
    fn do_transaction(&mut self, slot: u8, cmd: &mut Command) -> Result<()>;

    /// Widest bus the slot is wired for
    fn get_bus_width(&self, slot: u8) -> BusWidth;

    fn set_bus_width(&mut self, slot: u8, width: BusWidth) -> Result<()>;

    fn set_bus_ddr_mode(&mut self, slot: u8, ddr: bool) -> Result<()>;

    fn set_card_clk(&mut self, slot: u8, freq_khz: u32) -> Result<()>;

    /// Allow the slot to latch SDIO interrupts
    fn io_int_enable(&mut self, slot: u8) -> Result<()>;

    /// Block until the card signals an SDIO interrupt
    fn io_int_wait(&mut self, slot: u8, timeout_ms: u32) -> Result<()>;
}
