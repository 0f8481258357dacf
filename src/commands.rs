//! Command opcodes of the SD/MMC/SDIO protocol.

// Common SD/MMC commands
pub const MMC_GO_IDLE_STATE: u8 = 0; // CMD0
pub const MMC_SEND_OP_COND: u8 = 1; // CMD1, MMC only
pub const MMC_ALL_SEND_CID: u8 = 2; // CMD2
pub const MMC_SET_RELATIVE_ADDR: u8 = 3; // CMD3, MMC: host assigns
pub const MMC_SWITCH: u8 = 6; // CMD6, MMC EXT_CSD write
pub const MMC_SELECT_CARD: u8 = 7; // CMD7
pub const MMC_SEND_EXT_CSD: u8 = 8; // CMD8, MMC only
pub const MMC_SEND_CSD: u8 = 9; // CMD9
pub const MMC_SEND_CID: u8 = 10; // CMD10
pub const MMC_STOP_TRANSMISSION: u8 = 12; // CMD12
pub const MMC_SEND_STATUS: u8 = 13; // CMD13
pub const MMC_SET_BLOCKLEN: u8 = 16; // CMD16
pub const MMC_READ_BLOCK_SINGLE: u8 = 17; // CMD17
pub const MMC_READ_BLOCK_MULTIPLE: u8 = 18; // CMD18
pub const MMC_WRITE_BLOCK_SINGLE: u8 = 24; // CMD24
pub const MMC_WRITE_BLOCK_MULTIPLE: u8 = 25; // CMD25
pub const MMC_APP_CMD: u8 = 55; // CMD55

// SD memory commands
pub const SD_SEND_RELATIVE_ADDR: u8 = 3; // CMD3, SD: card publishes
pub const SD_SWITCH_FUNC: u8 = 6; // CMD6
pub const SD_SEND_IF_COND: u8 = 8; // CMD8
pub const SD_READ_OCR: u8 = 58; // CMD58, SPI mode only
pub const SD_CRC_ON_OFF: u8 = 59; // CMD59, SPI mode only

// SD application commands, preceded by APP_CMD
pub const SD_APP_SET_BUS_WIDTH: u8 = 6; // ACMD6
pub const SD_APP_OP_COND: u8 = 41; // ACMD41
pub const SD_APP_SEND_SCR: u8 = 51; // ACMD51

// SDIO commands
pub const SD_IO_SEND_OP_COND: u8 = 5; // CMD5
pub const SD_IO_RW_DIRECT: u8 = 52; // CMD52
pub const SD_IO_RW_EXTENDED: u8 = 53; // CMD53
