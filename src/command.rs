//! Per-call command value object handed to `Host::do_transaction`.

use bitflags::bitflags;

use crate::registers::card_status::CardStatus;

/// Driver default applied when neither host nor caller set a timeout
pub const DEFAULT_CMD_TIMEOUT_MS: u32 = 1000;

bitflags! {
    /// Command class, response format and special behaviors.
    ///
    /// The response bits describe the native-mode format (48/136 bit frame,
    /// CRC, opcode index, busy signalling); the `SPI_*` bits describe the
    /// same command's framing when the slot runs in SPI mode. A host picks
    /// whichever set matches its wiring.
    pub struct CommandFlags: u32 {
        /// Addressed command, no data
        const CMD_AC   = 0x0000_0010;
        /// Addressed command with a data phase
        const CMD_ADTC = 0x0000_0020;
        /// Broadcast, no response
        const CMD_BC   = 0x0000_0040;
        /// Broadcast with response
        const CMD_BCR  = 0x0000_0080;
        /// Data phase moves card-to-host
        const CMD_READ = 0x0000_0100;

        /// Card drives busy on DAT0 after the response
        const RSP_BUSY    = 0x0000_0001;
        /// 136-bit response frame
        const RSP_136     = 0x0000_0002;
        /// Response carries a CRC7
        const RSP_CRC     = 0x0000_0004;
        /// Response echoes the command index
        const RSP_IDX     = 0x0000_0008;
        const RSP_PRESENT = 0x0000_0200;

        const RSP_R0 = 0;
        const RSP_R1 = Self::RSP_PRESENT.bits | Self::RSP_CRC.bits | Self::RSP_IDX.bits;
        const RSP_R1B = Self::RSP_R1.bits | Self::RSP_BUSY.bits;
        const RSP_R2 = Self::RSP_PRESENT.bits | Self::RSP_136.bits | Self::RSP_CRC.bits;
        const RSP_R3 = Self::RSP_PRESENT.bits;
        const RSP_R4 = Self::RSP_PRESENT.bits;
        const RSP_R5 = Self::RSP_PRESENT.bits | Self::RSP_CRC.bits | Self::RSP_IDX.bits;
        const RSP_R6 = Self::RSP_R1.bits;
        const RSP_R7 = Self::RSP_R1.bits;

        /// SPI framing: R1 status byte
        const SPI_S1   = 0x0000_1000;
        /// SPI framing: second status byte
        const SPI_S2   = 0x0000_2000;
        /// SPI framing: 4 trailing payload bytes
        const SPI_B4   = 0x0000_4000;
        /// SPI framing: busy tokens follow
        const SPI_BUSY = 0x0000_8000;

        const SPI_R1 = Self::SPI_S1.bits;
        const SPI_R1B = Self::SPI_S1.bits | Self::SPI_BUSY.bits;
        const SPI_R2 = Self::SPI_S1.bits | Self::SPI_S2.bits;
        const SPI_R3 = Self::SPI_S1.bits | Self::SPI_B4.bits;
        const SPI_R4 = Self::SPI_S1.bits | Self::SPI_B4.bits;
        const SPI_R5 = Self::SPI_S1.bits | Self::SPI_S2.bits;
        const SPI_R7 = Self::SPI_S1.bits | Self::SPI_B4.bits;

        /// Host issues STOP_TRANSMISSION itself once the data phase ends
        const AUTO_STOP = 0x0001_0000;
    }
}

/// Data phase of an addressed-data command
pub enum DataBuffer<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

impl<'a> DataBuffer<'a> {
    pub fn len(&self) -> usize {
        match self {
            DataBuffer::Read(buf) => buf.len(),
            DataBuffer::Write(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One SD/MMC/SDIO command.
///
/// Built per call, passed to the host transaction function and read back;
/// never persisted.
pub struct Command<'a> {
    pub opcode: u8,
    pub arg: u32,
    pub flags: CommandFlags,
    /// Raw response words; `[0]` holds short responses right-justified,
    /// 136-bit responses fill all four words little-endian (bit 0 of the
    /// register = bit 0 of word 0)
    pub response: [u32; 4],
    pub data: Option<DataBuffer<'a>>,
    /// Transfer granularity of the data phase, bytes
    pub block_len: usize,
    /// Filled in by the command layer before the transaction
    pub timeout_ms: u32,
}

impl<'a> Command<'a> {
    pub fn new(opcode: u8, arg: u32, flags: CommandFlags) -> Self {
        Command { opcode, arg, flags, response: [0; 4], data: None, block_len: 0, timeout_ms: 0 }
    }

    pub fn with_data(mut self, data: DataBuffer<'a>, block_len: usize) -> Self {
        if let DataBuffer::Read(_) = data {
            self.flags |= CommandFlags::CMD_READ;
        }
        self.data = Some(data);
        self.block_len = block_len;
        self
    }

    /// Short-response card status (R1)
    pub fn r1(&self) -> CardStatus {
        CardStatus { val: self.response[0] }
    }

    /// OCR contents of an R3 response
    pub fn r3_ocr(&self) -> u32 {
        self.response[0]
    }

    /// Published RCA from an R6 response
    pub fn r6_rca(&self) -> u16 {
        (self.response[0] >> 16) as u16
    }

    /// Read-back data byte of an R5 (CMD52) response
    pub fn r5_data(&self) -> u8 {
        self.response[0] as u8
    }

    /// Response flags byte of an R5 (CMD52) response
    pub fn r5_flags(&self) -> u8 {
        (self.response[0] >> 8) as u8
    }
}
