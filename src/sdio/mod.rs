//! SDIO function register access: CMD52/CMD53 plus the CCCR plumbing
//! used during init.

pub mod cis;

use log::debug;

use crate::card::cmd::send_cmd;
use crate::card::{init::Init, Card};
use crate::command::{Command, CommandFlags, DataBuffer};
use crate::commands::{SD_IO_RW_DIRECT, SD_IO_RW_EXTENDED};
use crate::error::{Error, Result};
use crate::host::{BusWidth, Host, HostConfig, HostFlags};

// Card Common Control Registers, function 0 address space
pub const CCCR_FN_ENABLE: u32 = 0x02;
pub const CCCR_FN_READY: u32 = 0x03;
pub const CCCR_INT_ENABLE: u32 = 0x04;
pub const CCCR_CTL: u32 = 0x06;
pub const CCCR_BUS_WIDTH: u32 = 0x07;
pub const CCCR_CARD_CAP: u32 = 0x08;
pub const CCCR_CIS_PTR: u32 = 0x09;
pub const CCCR_HIGHSPEED: u32 = 0x13;

/// CCCR_CTL: reset the IO portion of the card
pub const CCCR_CTL_RES: u8 = 1 << 3;
/// CCCR_BUS_WIDTH: 4-bit transfers
const CCCR_BUS_WIDTH_4: u8 = 2;
/// CCCR_CARD_CAP: low-speed card
const CCCR_CARD_CAP_LSC: u8 = 1 << 6;
/// CCCR_CARD_CAP: low-speed card supporting 4-bit transfers
const CCCR_CARD_CAP_4BLS: u8 = 1 << 7;
/// CCCR_HIGHSPEED: card supports high speed
const CCCR_HIGHSPEED_SHS: u8 = 1 << 0;
/// CCCR_HIGHSPEED: enable high speed
const CCCR_HIGHSPEED_EHS: u8 = 1 << 1;

/// Function Basic Registers of function `n` start at `n * 0x100`
pub fn fbr_base(function: u8) -> u32 {
    (function as u32) << 8
}

// CMD52 argument layout
pub const ARG_CMD52_READ: u32 = 0;
pub const ARG_CMD52_WRITE: u32 = 1 << 31;
/// Read the register back in the same command (RAW)
pub const ARG_CMD52_EXCHANGE: u32 = 1 << 27;
const ARG_CMD52_FUNC_SHIFT: u32 = 28;
const ARG_CMD52_REG_SHIFT: u32 = 9;

// CMD53 argument layout
pub const ARG_CMD53_READ: u32 = 0;
pub const ARG_CMD53_WRITE: u32 = 1 << 31;
pub const ARG_CMD53_BLOCK_MODE: u32 = 1 << 27;
pub const ARG_CMD53_INCREMENT: u32 = 1 << 26;
const ARG_CMD53_FUNC_SHIFT: u32 = 28;
const ARG_CMD53_REG_SHIFT: u32 = 9;

/// Register addresses are 17 bits wide
const IO_REG_MASK: u32 = 0x1_FFFF;
/// Byte-mode CMD53 moves at most one block's worth
const IO_MAX_BYTE_TRANSFER: usize = 512;
/// Transfer granularity of block-mode CMD53
// TODO: take the per-function block size from the FBR instead of assuming 512
const IO_BLOCK_LEN: usize = 512;

/// CMD52: move one byte to or from a function register
pub(crate) fn io_rw_direct<H: Host>(
    host: &mut H,
    config: &HostConfig,
    function: u8,
    reg: u32,
    arg_flags: u32,
    byte: u8,
) -> Result<u8> {
    let mut arg = arg_flags;
    arg |= ((function & 0x7) as u32) << ARG_CMD52_FUNC_SHIFT;
    arg |= (reg & IO_REG_MASK) << ARG_CMD52_REG_SHIFT;
    arg |= byte as u32;
    let flags = CommandFlags::CMD_AC
        | if config.is_spi() { CommandFlags::SPI_R5 } else { CommandFlags::RSP_R5 };
    let mut cmd = Command::new(SD_IO_RW_DIRECT, arg, flags);
    send_cmd(host, config, &mut cmd)?;
    Ok(cmd.r5_data())
}

/// CMD53: move a span of bytes or blocks. Byte mode caps at 512 bytes,
/// with 512 itself encoded as a count of 0; block mode takes exact
/// multiples of the block length only.
pub(crate) fn io_rw_extended<H: Host>(
    host: &mut H,
    config: &HostConfig,
    function: u8,
    reg: u32,
    arg_flags: u32,
    data: DataBuffer,
) -> Result<()> {
    let datalen = data.len();
    let (count, block_len) = if arg_flags & ARG_CMD53_BLOCK_MODE != 0 {
        if datalen == 0 || datalen % IO_BLOCK_LEN != 0 {
            return Err(Error::InvalidSize);
        }
        (datalen / IO_BLOCK_LEN, IO_BLOCK_LEN)
    } else {
        if datalen == 0 || datalen > IO_MAX_BYTE_TRANSFER {
            return Err(Error::InvalidSize);
        }
        // 512 bytes ride as the special count of 0
        (if datalen == IO_MAX_BYTE_TRANSFER { 0 } else { datalen }, datalen)
    };
    let mut arg = arg_flags;
    arg |= ((function & 0x7) as u32) << ARG_CMD53_FUNC_SHIFT;
    arg |= (reg & IO_REG_MASK) << ARG_CMD53_REG_SHIFT;
    arg |= count as u32 & 0x1FF;
    let flags = CommandFlags::CMD_ADTC
        | if config.is_spi() { CommandFlags::SPI_R5 } else { CommandFlags::RSP_R5 };
    let mut cmd = Command::new(SD_IO_RW_EXTENDED, arg, flags).with_data(data, block_len);
    send_cmd(host, config, &mut cmd)
}

/// Reset the IO portion through the CCCR abort register
pub(crate) fn reset<H: Host>(host: &mut H, config: &HostConfig) -> Result<()> {
    io_rw_direct(host, config, 0, CCCR_CTL, ARG_CMD52_WRITE, CCCR_CTL_RES).map(|_| ())
}

/// Arm high-speed timing through the CCCR when the card advertises it
pub(crate) fn enable_hs_mode<H: Host>(host: &mut H, config: &HostConfig) -> Result<()> {
    let val = io_rw_direct(host, config, 0, CCCR_HIGHSPEED, ARG_CMD52_READ, 0)?;
    if val & CCCR_HIGHSPEED_SHS == 0 {
        return Err(Error::NotSupported);
    }
    let val = io_rw_direct(
        host,
        config,
        0,
        CCCR_HIGHSPEED,
        ARG_CMD52_WRITE | ARG_CMD52_EXCHANGE,
        val | CCCR_HIGHSPEED_EHS,
    )?;
    if val & CCCR_HIGHSPEED_EHS == 0 {
        return Err(Error::InvalidResponse);
    }
    Ok(())
}

impl<H: Host> Init<H> {
    /// Switch the IO portion to 4 DAT lines unless it is a low-speed card
    /// without 4-bit support
    pub(crate) fn set_io_bus_width(&mut self) -> Result<()> {
        if !self.config.flags.contains(HostFlags::BUS_WIDTH_4) {
            return Ok(());
        }
        let cap =
            io_rw_direct(&mut self.host, &self.config, 0, CCCR_CARD_CAP, ARG_CMD52_READ, 0)?;
        if cap & CCCR_CARD_CAP_LSC == 0 || cap & CCCR_CARD_CAP_4BLS != 0 {
            debug!("switching IO card to 4-line mode");
            io_rw_direct(
                &mut self.host,
                &self.config,
                0,
                CCCR_BUS_WIDTH,
                ARG_CMD52_WRITE,
                CCCR_BUS_WIDTH_4,
            )?;
            self.bus_width = BusWidth::Width4;
        }
        Ok(())
    }
}

impl<H: Host> Card<H> {
    fn check_io(&self) -> Result<()> {
        if !self.is_sdio() {
            return Err(Error::NotSupported);
        }
        Ok(())
    }

    /// CMD52 read of one function register
    pub fn io_read_byte(&mut self, function: u8, reg: u32) -> Result<u8> {
        self.check_io()?;
        io_rw_direct(&mut self.host, &self.config, function, reg, ARG_CMD52_READ, 0)
    }

    /// CMD52 write of one function register; the card echoes the register
    /// content after the write, which is returned for verification
    pub fn io_write_byte(&mut self, function: u8, reg: u32, byte: u8) -> Result<u8> {
        self.check_io()?;
        io_rw_direct(
            &mut self.host,
            &self.config,
            function,
            reg,
            ARG_CMD52_WRITE | ARG_CMD52_EXCHANGE,
            byte,
        )
    }

    /// CMD53 byte-mode read of an incrementing register span.
    ///
    /// The transport moves whole words; a length that is not a multiple of
    /// 4 is split into an aligned transfer plus a short tail.
    pub fn io_read_bytes(&mut self, function: u8, addr: u32, dst: &mut [u8]) -> Result<()> {
        self.check_io()?;
        let mut offset = 0;
        while offset < dst.len() {
            let remain = dst.len() - offset;
            let aligned = remain & !3;
            let chunk = if aligned > 0 { aligned.min(IO_MAX_BYTE_TRANSFER) } else { remain };
            io_rw_extended(
                &mut self.host,
                &self.config,
                function,
                addr + offset as u32,
                ARG_CMD53_READ | ARG_CMD53_INCREMENT,
                DataBuffer::Read(&mut dst[offset..offset + chunk]),
            )?;
            offset += chunk;
        }
        Ok(())
    }

    /// CMD53 byte-mode write of an incrementing register span; same
    /// alignment splitting as [`io_read_bytes`](Card::io_read_bytes)
    pub fn io_write_bytes(&mut self, function: u8, addr: u32, src: &[u8]) -> Result<()> {
        self.check_io()?;
        let mut offset = 0;
        while offset < src.len() {
            let remain = src.len() - offset;
            let aligned = remain & !3;
            let chunk = if aligned > 0 { aligned.min(IO_MAX_BYTE_TRANSFER) } else { remain };
            io_rw_extended(
                &mut self.host,
                &self.config,
                function,
                addr + offset as u32,
                ARG_CMD53_WRITE | ARG_CMD53_INCREMENT,
                DataBuffer::Write(&src[offset..offset + chunk]),
            )?;
            offset += chunk;
        }
        Ok(())
    }

    /// CMD53 block-mode read; `dst` must be an exact multiple of the block
    /// length
    pub fn io_read_blocks(&mut self, function: u8, addr: u32, dst: &mut [u8]) -> Result<()> {
        self.check_io()?;
        if dst.len() % 4 != 0 {
            return Err(Error::InvalidSize);
        }
        io_rw_extended(
            &mut self.host,
            &self.config,
            function,
            addr,
            ARG_CMD53_READ | ARG_CMD53_INCREMENT | ARG_CMD53_BLOCK_MODE,
            DataBuffer::Read(dst),
        )
    }

    /// CMD53 block-mode write; `src` must be an exact multiple of the
    /// block length
    pub fn io_write_blocks(&mut self, function: u8, addr: u32, src: &[u8]) -> Result<()> {
        self.check_io()?;
        if src.len() % 4 != 0 {
            return Err(Error::InvalidSize);
        }
        io_rw_extended(
            &mut self.host,
            &self.config,
            function,
            addr,
            ARG_CMD53_WRITE | ARG_CMD53_INCREMENT | ARG_CMD53_BLOCK_MODE,
            DataBuffer::Write(src),
        )
    }

    /// Let the host latch card interrupts
    pub fn io_int_enable(&mut self) -> Result<()> {
        self.check_io()?;
        self.host.io_int_enable(self.config.slot)
    }

    /// Block until the card raises an interrupt or the timeout passes
    pub fn io_int_wait(&mut self, timeout_ms: u32) -> Result<()> {
        self.check_io()?;
        self.host.io_int_wait(self.config.slot, timeout_ms)
    }
}
