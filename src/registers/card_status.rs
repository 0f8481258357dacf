//! R1 card status word, plus the one-byte SPI-mode R1 flags.

use bit_field::BitField;

/// SPI R1: card is still in the idle/init phase
pub const SPI_R1_IDLE_STATE: u8 = 1 << 0;
/// SPI R1: command not recognized
pub const SPI_R1_ILLEGAL_CMD: u8 = 1 << 2;

/// Any of the card-side error bits of the R1 status word
pub const R1_ERROR_MASK: u32 = 0xFDFF_E008;

/// Card state machine positions reported in R1 bits 9..12
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CurrentState {
    Idle = 0,
    Ready = 1,
    Ident = 2,
    Standby = 3,
    Transfer = 4,
    Data = 5,
    Receive = 6,
    Program = 7,
    Disconnect = 8,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CardStatus {
    pub val: u32,
}

impl CardStatus {
    /// The buffers are free; a data command may follow
    pub fn ready_for_data(&self) -> bool {
        self.val.get_bit(8)
    }

    /// Card expects an application command next
    pub fn app_cmd(&self) -> bool {
        self.val.get_bit(5)
    }

    /// A SWITCH command did not take effect
    pub fn switch_error(&self) -> bool {
        self.val.get_bit(7)
    }

    pub fn current_state(&self) -> u8 {
        self.val.get_bits(9..13) as u8
    }

    pub fn has_errors(&self) -> bool {
        self.val & R1_ERROR_MASK != 0
    }
}
