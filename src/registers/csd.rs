//! Card-Specific Data register decoding, SD and MMC layouts.

use log::warn;

use super::bits;
use crate::error::{Error, Result};

// SD/MMC transfer rate unit codes (10K) list
pub const SD_MMC_TRANS_UNITS: [u32; 7] = [10, 100, 1_000, 10_000, 0, 0, 0];
// SD transfer multiplier factor codes (1/10) list
pub const SD_TRANS_MULTIPLIERS: [u32; 16] =
    [0, 10, 12, 13, 15, 20, 25, 30, 35, 40, 45, 50, 55, 60, 70, 80];
// MMC transfer multiplier factor codes (1/10) list
pub const MMC_TRANS_MULTIPLIERS: [u32; 16] =
    [0, 10, 12, 13, 15, 20, 26, 30, 35, 40, 45, 52, 55, 60, 70, 80];

/// CCC bit of the SWITCH command class
pub const CCC_SWITCH: u16 = 1 << 10;

/// Largest block count a byte-addressed card can express: one past
/// `u32::MAX` bytes, in sectors
fn byte_addressed_limit(sector_size: u32) -> u32 {
    u32::MAX / sector_size + 1
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Csd {
    /// Raw CSD_STRUCTURE field
    pub csd_ver: u8,
    /// MMC spec version field, MMC only
    pub mmc_ver: u8,
    /// Raw C_SIZE field, version 1.0 layouts
    pub c_size: u16,
    /// Card capacity in `sector_size` units
    pub capacity: u32,
    /// Sector size used for block addressing, bytes (READ_BL_LEN capped at 512)
    pub sector_size: u32,
    pub read_block_len: u8,
    /// Supported command class bitmap, SD only
    pub card_command_class: u16,
    /// Maximum transfer speed in transfer (default/HS) mode, Hz
    pub tr_speed: u32,
}

impl Csd {
    /// Decode an SD CSD from raw response words.
    ///
    /// SDSC (version 1.0) capacities are clamped so that capacity times
    /// sector size stays expressible as a byte count; cards are known to
    /// misreport the C_SIZE fields.
    pub fn decode_sd(resp: &[u32; 4]) -> Result<Csd> {
        let mut csd = Csd::default();
        csd.csd_ver = bits(resp, 126, 2) as u8;
        match csd.csd_ver {
            1 => {
                // Version 2.0: fixed 512-byte addressing, C_SIZE in 512KiB units
                csd.read_block_len = 9;
                csd.capacity = (bits(resp, 48, 22) + 1) * 1024;
            }
            0 => {
                csd.read_block_len = bits(resp, 80, 4) as u8;
                csd.c_size = bits(resp, 62, 12) as u16;
                let c_size_mult = bits(resp, 47, 3);
                csd.capacity = (csd.c_size as u32 + 1) << (c_size_mult + 2);
            }
            _ => {
                warn!("unknown SD CSD structure version {}", csd.csd_ver);
                return Err(Error::NotSupported);
            }
        }
        csd.card_command_class = bits(resp, 84, 12) as u16;
        let byte_addressed = csd.csd_ver == 0;
        finish_capacity(&mut csd, byte_addressed);
        let tran_speed = bits(resp, 96, 8);
        let unit = SD_MMC_TRANS_UNITS[(tran_speed & 0x7) as usize];
        let mult = SD_TRANS_MULTIPLIERS[(tran_speed >> 3 & 0xF) as usize];
        csd.tr_speed = unit * mult * 1000;
        Ok(csd)
    }

    /// Decode an MMC CSD. Capacity of EXT_CSD-sized cards (C_SIZE saturated)
    /// is corrected later from the EXT_CSD sector count.
    pub fn decode_mmc(resp: &[u32; 4]) -> Result<Csd> {
        let mut csd = Csd::default();
        csd.csd_ver = bits(resp, 126, 2) as u8;
        if csd.csd_ver < 1 || csd.csd_ver > 3 {
            warn!("unknown MMC CSD structure version {}", csd.csd_ver);
            return Err(Error::NotSupported);
        }
        csd.mmc_ver = bits(resp, 122, 4) as u8;
        csd.read_block_len = bits(resp, 80, 4) as u8;
        csd.c_size = bits(resp, 62, 12) as u16;
        let c_size_mult = bits(resp, 47, 3);
        csd.capacity = (csd.c_size as u32 + 1) << (c_size_mult + 2);
        csd.card_command_class = bits(resp, 84, 12) as u16;
        finish_capacity(&mut csd, true);
        let tran_speed = bits(resp, 96, 8);
        let unit = SD_MMC_TRANS_UNITS[(tran_speed & 0x7) as usize];
        let mult = MMC_TRANS_MULTIPLIERS[(tran_speed >> 3 & 0xF) as usize];
        csd.tr_speed = unit * mult * 1000;
        Ok(csd)
    }

    /// C_SIZE reads all-ones when the real size lives in EXT_CSD
    pub fn size_in_ext_csd(&self) -> bool {
        self.c_size == 0xFFF
    }
}

/// Convert the READ_BL_LEN-unit capacity to the addressing sector size and
/// apply the byte-address clamp for version 1.0 layouts.
fn finish_capacity(csd: &mut Csd, byte_addressed: bool) {
    let read_bl_size = 1u32 << csd.read_block_len;
    csd.sector_size = read_bl_size.min(512);
    if csd.sector_size < read_bl_size {
        csd.capacity *= read_bl_size / csd.sector_size;
    }
    if byte_addressed {
        let limit = byte_addressed_limit(csd.sector_size);
        if csd.capacity > limit {
            warn!("clamping capacity {} to {} sectors", csd.capacity, limit);
            csd.capacity = limit;
        }
    }
}
