//! The central card object and its public face.

pub(crate) mod cmd;
pub(crate) mod init;
mod io;
mod mmc;
mod sd;

use core::fmt;

use crate::error::Result;
use crate::host::{BusWidth, Host, HostConfig};
use crate::registers::cid::Cid;
use crate::registers::csd::Csd;
use crate::registers::ext_csd::ExtCsd;
use crate::registers::ocr::OCR_SDHC_CAP;
use crate::registers::scr::Scr;

/// Identification and capability data of an SD memory card
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SdInfo {
    pub cid: Cid,
    pub csd: Csd,
    pub scr: Scr,
}

/// Identification and capability data of an MMC/eMMC device
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MmcInfo {
    pub cid: Cid,
    pub csd: Csd,
    pub ext_csd: ExtCsd,
}

/// SDIO function space summary
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IoInfo {
    pub num_functions: u8,
}

/// What kind of device answered on the bus, decided during init
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardKind {
    Sd(SdInfo),
    Mmc(MmcInfo),
    Io(IoInfo),
    SdCombo(SdInfo, IoInfo),
}

/// One initialized SD/MMC/SDIO device behind one host slot.
///
/// Allocated by [`Card::init`] only: a value of this type always represents
/// a fully negotiated card. The embedded host must stay valid for the
/// card's lifetime; the driver itself keeps no other state.
#[derive(Debug)]
pub struct Card<H: Host> {
    pub(crate) host: H,
    pub(crate) config: HostConfig,
    pub(crate) ocr: u32,
    pub(crate) rca: u16,
    /// Negotiated card clock ceiling
    pub(crate) max_freq_khz: u32,
    pub(crate) bus_width: BusWidth,
    pub(crate) is_ddr: bool,
    pub(crate) kind: CardKind,
}

impl<H: Host> Card<H> {
    pub fn kind(&self) -> &CardKind {
        &self.kind
    }

    pub fn ocr(&self) -> u32 {
        self.ocr
    }

    pub fn rca(&self) -> u16 {
        self.rca
    }

    pub fn max_freq_khz(&self) -> u32 {
        self.max_freq_khz
    }

    pub fn bus_width(&self) -> BusWidth {
        self.bus_width
    }

    pub fn is_ddr(&self) -> bool {
        self.is_ddr
    }

    pub fn is_mem(&self) -> bool {
        matches!(self.kind, CardKind::Sd(_) | CardKind::Mmc(_) | CardKind::SdCombo(..))
    }

    pub fn is_mmc(&self) -> bool {
        matches!(self.kind, CardKind::Mmc(_))
    }

    pub fn is_sdio(&self) -> bool {
        matches!(self.kind, CardKind::Io(_) | CardKind::SdCombo(..))
    }

    /// Block addressing (SDHC/SDXC or MMC sector mode) instead of byte
    pub fn uses_block_addressing(&self) -> bool {
        self.ocr & OCR_SDHC_CAP != 0
    }

    pub fn cid(&self) -> Option<&Cid> {
        match &self.kind {
            CardKind::Sd(sd) | CardKind::SdCombo(sd, _) => Some(&sd.cid),
            CardKind::Mmc(mmc) => Some(&mmc.cid),
            CardKind::Io(_) => None,
        }
    }

    pub fn csd(&self) -> Option<&Csd> {
        match &self.kind {
            CardKind::Sd(sd) | CardKind::SdCombo(sd, _) => Some(&sd.csd),
            CardKind::Mmc(mmc) => Some(&mmc.csd),
            CardKind::Io(_) => None,
        }
    }

    pub fn scr(&self) -> Option<&Scr> {
        match &self.kind {
            CardKind::Sd(sd) | CardKind::SdCombo(sd, _) => Some(&sd.scr),
            _ => None,
        }
    }

    pub fn ext_csd(&self) -> Option<&ExtCsd> {
        match &self.kind {
            CardKind::Mmc(mmc) => Some(&mmc.ext_csd),
            _ => None,
        }
    }

    pub fn num_io_functions(&self) -> u8 {
        match &self.kind {
            CardKind::Io(io) | CardKind::SdCombo(_, io) => io.num_functions,
            _ => 0,
        }
    }

    /// Sector size for block I/O, bytes; 0 for IO-only cards
    pub fn sector_size(&self) -> u32 {
        self.csd().map_or(0, |csd| csd.sector_size)
    }

    /// Capacity in sectors; 0 for IO-only cards
    pub fn capacity_blocks(&self) -> u32 {
        self.csd().map_or(0, |csd| csd.capacity)
    }

    /// Access the underlying host
    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Release the slot and hand the host back
    pub fn deinit(mut self) -> Result<H> {
        self.host.deinit()?;
        Ok(self.host)
    }

    /// Human-readable card summary
    pub fn print_info<W: fmt::Write>(&self, w: &mut W) -> fmt::Result {
        if let Some(cid) = self.cid() {
            writeln!(w, "Name: {}", cid.name_str())?;
        }
        let kind = match &self.kind {
            CardKind::Io(_) => "SDIO",
            CardKind::SdCombo(..) => "SD combo",
            CardKind::Mmc(_) => "MMC",
            CardKind::Sd(_) => {
                if self.uses_block_addressing() {
                    "SDHC/SDXC"
                } else {
                    "SDSC"
                }
            }
        };
        writeln!(w, "Type: {}", kind)?;
        if self.max_freq_khz < 1000 {
            writeln!(w, "Speed: {} kHz", self.max_freq_khz)?;
        } else {
            let ddr = if self.is_ddr { ", DDR" } else { "" };
            writeln!(w, "Speed: {} MHz{}", self.max_freq_khz / 1000, ddr)?;
        }
        if let Some(csd) = self.csd() {
            let mib = csd.capacity as u64 * csd.sector_size as u64 / (1024 * 1024);
            writeln!(w, "Size: {}MB", mib)?;
            writeln!(
                w,
                "CSD: ver={}, sector_size={}, capacity={} read_bl_len={}",
                csd.csd_ver, csd.sector_size, csd.capacity, csd.read_block_len
            )?;
        }
        if let Some(scr) = self.scr() {
            writeln!(w, "SCR: sd_spec={}, bus_width={}", scr.sd_spec, scr.bus_width)?;
        }
        Ok(())
    }
}
