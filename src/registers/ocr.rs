//! Operation Conditions Register bits.

use bit_field::BitField;

/// 2.7-3.6V window advertised by the host during negotiation
pub const OCR_VOLTAGE_MASK: u32 = 0x00FF_8000;
/// Card has finished power-up (valid once set)
pub const OCR_POWER_UP: u32 = 1 << 31;
/// SDHC/SDXC capacity class (CCS); block addressing when set
pub const OCR_SDHC_CAP: u32 = 1 << 30;
/// SDIO OCR: a memory card shares the package
pub const OCR_IO_MEM_PRESENT: u32 = 1 << 27;

/// MMC access-mode field
pub const MMC_OCR_ACCESS_MODE_MASK: u32 = 0x3 << 29;
/// MMC sector (block) addressing
pub const MMC_OCR_SECTOR_MODE: u32 = 0x2 << 29;

#[derive(Debug, Copy, Clone, Default)]
pub struct OcrRegister {
    pub val: u32,
}

impl OcrRegister {
    pub fn card_powered_up(&self) -> bool {
        self.val.get_bit(31)
    }

    pub fn card_capacity_status(&self) -> bool {
        self.val.get_bit(30)
    }

    /// SDIO OCR: number of functions behind the card
    pub fn io_num_functions(&self) -> u8 {
        self.val.get_bits(28..31) as u8
    }

    pub fn io_mem_present(&self) -> bool {
        self.val.get_bit(27)
    }
}
