//! MMC Extended CSD: 512-byte attribute block read with SEND_EXT_CSD.

/// Total register size, bytes
pub const EXT_CSD_SIZE: usize = 512;

// Writable byte indices, used with the SWITCH command
pub const EXT_CSD_BUS_WIDTH: u8 = 183;
pub const EXT_CSD_HS_TIMING: u8 = 185;
pub const EXT_CSD_POWER_CLASS: u8 = 187;

// Read-only byte indices
pub const EXT_CSD_REV: usize = 192;
pub const EXT_CSD_CARD_TYPE: usize = 196;
pub const EXT_CSD_PWR_CL_52_195: usize = 200;
pub const EXT_CSD_PWR_CL_26_195: usize = 201;
pub const EXT_CSD_PWR_CL_52_360: usize = 202;
pub const EXT_CSD_PWR_CL_26_360: usize = 203;
pub const EXT_CSD_SEC_COUNT: usize = 212;

// CARD_TYPE bits
pub const CARD_TYPE_F_26M: u8 = 1 << 0;
pub const CARD_TYPE_F_52M: u8 = 1 << 1;
pub const CARD_TYPE_F_52M_1_8V: u8 = 1 << 2;

// BUS_WIDTH values
pub const BUS_WIDTH_1: u8 = 0;
pub const BUS_WIDTH_4: u8 = 1;
pub const BUS_WIDTH_8: u8 = 2;
pub const BUS_WIDTH_4_DDR: u8 = 5;
pub const BUS_WIDTH_8_DDR: u8 = 6;

// HS_TIMING values
pub const HS_TIMING_HS: u8 = 1;

/// Attributes retained from the raw EXT_CSD block
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ExtCsd {
    pub rev: u8,
    /// Speed/voltage class bitmap (CARD_TYPE byte)
    pub card_type: u8,
    /// Capacity in 512-byte sectors for high-capacity cards
    pub sec_count: u32,
    /// Power class nibbles for 52/26MHz at 3.6V
    pub pwr_cl_52_360: u8,
    pub pwr_cl_26_360: u8,
}

impl ExtCsd {
    pub fn decode(raw: &[u8; EXT_CSD_SIZE]) -> ExtCsd {
        ExtCsd {
            rev: raw[EXT_CSD_REV],
            card_type: raw[EXT_CSD_CARD_TYPE],
            sec_count: u32::from_le_bytes([
                raw[EXT_CSD_SEC_COUNT],
                raw[EXT_CSD_SEC_COUNT + 1],
                raw[EXT_CSD_SEC_COUNT + 2],
                raw[EXT_CSD_SEC_COUNT + 3],
            ]),
            pwr_cl_52_360: raw[EXT_CSD_PWR_CL_52_360],
            pwr_cl_26_360: raw[EXT_CSD_PWR_CL_26_360],
        }
    }

    /// Power class nibble for the given frequency and bus width, per the
    /// PWR_CL encoding: low nibble up to 4 lines, high nibble for 8
    pub fn power_class(&self, freq_khz: u32, lines: u8) -> u8 {
        let byte = if freq_khz > 26_000 { self.pwr_cl_52_360 } else { self.pwr_cl_26_360 };
        if lines == 8 {
            byte >> 4
        } else {
            byte & 0xF
        }
    }
}
