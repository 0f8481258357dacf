//! Block-addressed sector I/O.

use log::debug;

use super::cmd;
use super::Card;
use crate::command::{Command, CommandFlags, DataBuffer};
use crate::commands::*;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::registers::card_status::CardStatus;

/// Bounce buffer for callers whose memory the transport cannot DMA from.
/// One sector, which bounds the stack cost; cards with larger sectors take
/// the error path instead of blowing the stack.
const SCRATCH_LEN: usize = 512;

#[repr(align(4))]
struct Scratch([u8; SCRATCH_LEN]);

impl<H: Host> Card<H> {
    /// Read `block_count` sectors starting at `start_block` into `dst`.
    ///
    /// Validates the range against the card capacity before touching the
    /// bus. Misaligned destination buffers are served block-by-block
    /// through an internal aligned scratch sector, the transport requires
    /// 4-byte-aligned memory.
    pub fn read_sectors(&mut self, dst: &mut [u8], start_block: u32, block_count: u32) -> Result<()> {
        let sector_size = self.io_sector_size(start_block, block_count)?;
        if dst.len() != (block_count as usize) * sector_size {
            return Err(Error::InvalidArg);
        }
        if block_count == 0 {
            return Ok(());
        }
        if dst.as_ptr() as usize % 4 == 0 {
            return self.read_sectors_dma(dst, start_block, block_count, sector_size);
        }
        if sector_size > SCRATCH_LEN {
            return Err(Error::NoMem);
        }
        let mut scratch = Scratch([0; SCRATCH_LEN]);
        for block in 0..block_count {
            self.read_sectors_dma(&mut scratch.0[..sector_size], start_block + block, 1, sector_size)?;
            let offset = block as usize * sector_size;
            dst[offset..offset + sector_size].copy_from_slice(&scratch.0[..sector_size]);
        }
        Ok(())
    }

    /// Write `block_count` sectors from `src` starting at `start_block`.
    ///
    /// Same range and alignment rules as [`read_sectors`](Card::read_sectors).
    pub fn write_sectors(&mut self, src: &[u8], start_block: u32, block_count: u32) -> Result<()> {
        let sector_size = self.io_sector_size(start_block, block_count)?;
        if src.len() != (block_count as usize) * sector_size {
            return Err(Error::InvalidArg);
        }
        if block_count == 0 {
            return Ok(());
        }
        if src.as_ptr() as usize % 4 == 0 {
            return self.write_sectors_dma(src, start_block, block_count, sector_size);
        }
        if sector_size > SCRATCH_LEN {
            return Err(Error::NoMem);
        }
        let mut scratch = Scratch([0; SCRATCH_LEN]);
        for block in 0..block_count {
            let offset = block as usize * sector_size;
            scratch.0[..sector_size].copy_from_slice(&src[offset..offset + sector_size]);
            self.write_sectors_dma(&scratch.0[..sector_size], start_block + block, 1, sector_size)?;
        }
        Ok(())
    }

    /// CMD13 wrapper: fetch the current card status word
    pub fn get_status(&mut self) -> Result<CardStatus> {
        cmd::send_status(&mut self.host, &self.config, self.rca)
    }

    /// Range-check a transfer and yield the sector size; rejects IO-only
    /// cards and out-of-capacity spans without any bus traffic
    fn io_sector_size(&self, start_block: u32, block_count: u32) -> Result<usize> {
        let csd = self.csd().ok_or(Error::NotSupported)?;
        match start_block.checked_add(block_count) {
            Some(end) if end <= csd.capacity => Ok(csd.sector_size as usize),
            _ => Err(Error::InvalidSize),
        }
    }

    fn read_sectors_dma(
        &mut self,
        dst: &mut [u8],
        start_block: u32,
        block_count: u32,
        sector_size: usize,
    ) -> Result<()> {
        let mut flags = CommandFlags::CMD_ADTC
            | if self.config.is_spi() { CommandFlags::SPI_R1 } else { CommandFlags::RSP_R1 };
        let opcode = if block_count == 1 {
            MMC_READ_BLOCK_SINGLE
        } else {
            flags |= CommandFlags::AUTO_STOP;
            MMC_READ_BLOCK_MULTIPLE
        };
        let arg = self.io_arg(start_block, sector_size);
        let mut command = Command::new(opcode, arg, flags)
            .with_data(DataBuffer::Read(dst), sector_size);
        cmd::send_cmd(&mut self.host, &self.config, &mut command)?;
        drop(command);
        self.wait_ready_after_data()
    }

    fn write_sectors_dma(
        &mut self,
        src: &[u8],
        start_block: u32,
        block_count: u32,
        sector_size: usize,
    ) -> Result<()> {
        let mut flags = CommandFlags::CMD_ADTC
            | if self.config.is_spi() { CommandFlags::SPI_R1 } else { CommandFlags::RSP_R1 };
        let opcode = if block_count == 1 {
            MMC_WRITE_BLOCK_SINGLE
        } else {
            flags |= CommandFlags::AUTO_STOP;
            MMC_WRITE_BLOCK_MULTIPLE
        };
        let arg = self.io_arg(start_block, sector_size);
        let mut command = Command::new(opcode, arg, flags)
            .with_data(DataBuffer::Write(src), sector_size);
        cmd::send_cmd(&mut self.host, &self.config, &mut command)?;
        drop(command);
        self.wait_ready_after_data()
    }

    /// SDSC cards address by byte, SDHC/SDXC and sector-mode MMC by block
    fn io_arg(&self, start_block: u32, sector_size: usize) -> u32 {
        if self.uses_block_addressing() {
            start_block
        } else {
            start_block * sector_size as u32
        }
    }

    /// Wait for the card to leave the programming state after a data
    /// phase. SPI slots have no status concept to poll
    fn wait_ready_after_data(&mut self) -> Result<()> {
        if self.config.is_spi() {
            return Ok(());
        }
        let result =
            cmd::wait_for_ready(&mut self.host, &self.config, self.rca, cmd::DATA_READY_TIMEOUT_MS);
        if let Err(err) = &result {
            debug!("card did not return to ready state: {:?}", err);
        }
        result
    }
}
