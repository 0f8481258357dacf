//! Command layer: single-command issue plus typed per-command helpers.
//!
//! Nothing here retries; retry policy belongs to the specific init steps
//! that need it.

use log::{debug, trace};

use crate::command::{Command, CommandFlags, DataBuffer, DEFAULT_CMD_TIMEOUT_MS};
use crate::commands::*;
use crate::error::{Error, Result};
use crate::host::{Host, HostConfig};
use crate::registers::card_status::{CardStatus, SPI_R1_IDLE_STATE};
use crate::registers::ocr::{
    MMC_OCR_ACCESS_MODE_MASK, MMC_OCR_SECTOR_MODE, OCR_POWER_UP, OCR_VOLTAGE_MASK,
};
use crate::registers::switch_status::SwitchStatus;

/// SEND_OP_COND negotiation bounds
const SEND_OP_COND_MAX_RETRIES: u32 = 100;
const SEND_OP_COND_MAX_ERRORS: u32 = 3;
const SEND_OP_COND_DELAY_MS: u32 = 10;
/// Settling time between the CMD0 pair in SPI mode
const GO_IDLE_DELAY_MS: u32 = 20;
/// Budget for ready-for-data polling after a data phase
pub(crate) const DATA_READY_TIMEOUT_MS: u32 = 1000;

fn rca_arg(rca: u16) -> u32 {
    (rca as u32) << 16
}

/// Pick the response flags matching the slot's wiring
fn rsp(config: &HostConfig, native: CommandFlags, spi: CommandFlags) -> CommandFlags {
    if config.is_spi() {
        spi
    } else {
        native
    }
}

/// Fill in the timeout and run one command through the host.
///
/// A host-level `command_timeout_ms` overrides whatever the caller put in
/// the command; an unset timeout falls back to the driver default. On
/// success `cmd.response` holds the raw response words.
pub(crate) fn send_cmd<H: Host>(host: &mut H, config: &HostConfig, cmd: &mut Command) -> Result<()> {
    if config.command_timeout_ms != 0 {
        cmd.timeout_ms = config.command_timeout_ms;
    } else if cmd.timeout_ms == 0 {
        cmd.timeout_ms = DEFAULT_CMD_TIMEOUT_MS;
    }
    trace!("sending cmd slot={} op={} arg={:#010x}", config.slot, cmd.opcode, cmd.arg);
    let result = host.do_transaction(config.slot, cmd);
    match &result {
        Ok(()) => trace!("cmd response {:#010x}", cmd.response[0]),
        Err(err) => debug!("cmd op={} returned {:?}", cmd.opcode, err),
    }
    result
}

/// CMD55 + the application command proper.
///
/// In native mode the R1 response of APP_CMD must acknowledge application
/// command mode, otherwise the card does not implement ACMDs.
pub(crate) fn send_app_cmd<H: Host>(
    host: &mut H,
    config: &HostConfig,
    rca: u16,
    cmd: &mut Command,
) -> Result<()> {
    let mut app = Command::new(
        MMC_APP_CMD,
        rca_arg(rca),
        CommandFlags::CMD_AC | rsp(config, CommandFlags::RSP_R1, CommandFlags::SPI_R1),
    );
    send_cmd(host, config, &mut app)?;
    if !config.is_spi() && !app.r1().app_cmd() {
        return Err(Error::NotSupported);
    }
    send_cmd(host, config, cmd)
}

/// CMD0: reset the card to idle state.
///
/// To enter SPI mode CMD0 has to be sent twice with a settling delay: some
/// cards latch native SD mode on the first attempt, so its outcome is
/// ignored and only the second, R1-checked send counts.
pub(crate) fn go_idle_state<H: Host>(host: &mut H, config: &HostConfig) -> Result<()> {
    let mut cmd =
        Command::new(MMC_GO_IDLE_STATE, 0, CommandFlags::CMD_BC | CommandFlags::RSP_R0);
    let mut result = send_cmd(host, config, &mut cmd);
    if config.is_spi() {
        let _ = result;
        host.delay_ms(GO_IDLE_DELAY_MS);
        let mut retry = Command::new(
            MMC_GO_IDLE_STATE,
            0,
            CommandFlags::CMD_BC | CommandFlags::RSP_R0 | CommandFlags::SPI_R1,
        );
        result = send_cmd(host, config, &mut retry);
    }
    host.delay_ms(GO_IDLE_DELAY_MS);
    result
}

/// CMD8: voltage check plus SDv2 detection; echoes the check pattern
pub(crate) fn send_if_cond<H: Host>(host: &mut H, config: &HostConfig, ocr: u32) -> Result<()> {
    const PATTERN: u32 = 0xAA;
    let voltage_ok = (ocr & OCR_VOLTAGE_MASK != 0) as u32;
    let mut cmd = Command::new(
        SD_SEND_IF_COND,
        voltage_ok << 8 | PATTERN,
        CommandFlags::CMD_BCR | rsp(config, CommandFlags::RSP_R7, CommandFlags::SPI_R7),
    );
    send_cmd(host, config, &mut cmd)?;
    if cmd.response[0] & 0xFF != PATTERN {
        return Err(Error::InvalidResponse);
    }
    Ok(())
}

/// ACMD41 (SD) or CMD1 (MMC): negotiate operating conditions.
///
/// Polls until the card reports power-up done (native mode) or leaves the
/// idle state (SPI mode), bounded by the retry budget with an early abort
/// after a run of consecutive command errors. Returns the last OCR.
pub(crate) fn send_op_cond<H: Host>(
    host: &mut H,
    config: &HostConfig,
    rca: u16,
    is_mmc: bool,
    ocr: u32,
) -> Result<u32> {
    let mut err_run = 0;
    for _ in 0..SEND_OP_COND_MAX_RETRIES {
        let mut cmd;
        let result = if is_mmc {
            let arg = (ocr & !MMC_OCR_ACCESS_MODE_MASK) | MMC_OCR_SECTOR_MODE;
            cmd = Command::new(
                MMC_SEND_OP_COND,
                arg,
                CommandFlags::CMD_BCR | rsp(config, CommandFlags::RSP_R3, CommandFlags::SPI_R1),
            );
            send_cmd(host, config, &mut cmd)
        } else {
            cmd = Command::new(
                SD_APP_OP_COND,
                ocr,
                CommandFlags::CMD_BCR | rsp(config, CommandFlags::RSP_R3, CommandFlags::SPI_R1),
            );
            send_app_cmd(host, config, rca, &mut cmd)
        };
        match result {
            Ok(()) => err_run = 0,
            Err(err) => {
                err_run += 1;
                if err_run == SEND_OP_COND_MAX_ERRORS {
                    return Err(err);
                }
                continue;
            }
        }
        if config.is_spi() {
            if cmd.response[0] & SPI_R1_IDLE_STATE as u32 == 0 {
                return Ok(cmd.r3_ocr());
            }
        } else if cmd.r3_ocr() & OCR_POWER_UP != 0 || ocr == 0 {
            return Ok(cmd.r3_ocr());
        }
        host.delay_ms(SEND_OP_COND_DELAY_MS);
    }
    Err(Error::Timeout)
}

/// CMD5: SDIO operating conditions. `ocr == 0` probes without waiting
pub(crate) fn io_send_op_cond<H: Host>(
    host: &mut H,
    config: &HostConfig,
    ocr: u32,
) -> Result<u32> {
    for _ in 0..SEND_OP_COND_MAX_RETRIES {
        let mut cmd = Command::new(
            SD_IO_SEND_OP_COND,
            ocr,
            CommandFlags::CMD_BCR | rsp(config, CommandFlags::RSP_R4, CommandFlags::SPI_R4),
        );
        send_cmd(host, config, &mut cmd)?;
        if cmd.r3_ocr() & OCR_POWER_UP != 0 || ocr == 0 {
            return Ok(cmd.r3_ocr());
        }
        host.delay_ms(SEND_OP_COND_DELAY_MS);
    }
    Err(Error::Timeout)
}

/// CMD58: read OCR, SPI mode only
pub(crate) fn read_ocr<H: Host>(host: &mut H, config: &HostConfig) -> Result<u32> {
    let mut cmd = Command::new(SD_READ_OCR, 0, CommandFlags::CMD_BCR | CommandFlags::SPI_R3);
    send_cmd(host, config, &mut cmd)?;
    Ok(cmd.response[0])
}

/// CMD59: toggle CRC16 checking of data transfers, SPI mode only
pub(crate) fn crc_on_off<H: Host>(host: &mut H, config: &HostConfig, on: bool) -> Result<()> {
    let mut cmd =
        Command::new(SD_CRC_ON_OFF, on as u32, CommandFlags::CMD_AC | CommandFlags::SPI_R1);
    send_cmd(host, config, &mut cmd)
}

/// CMD2: all cards broadcast their raw CID
pub(crate) fn all_send_cid<H: Host>(host: &mut H, config: &HostConfig) -> Result<[u32; 4]> {
    let mut cmd = Command::new(MMC_ALL_SEND_CID, 0, CommandFlags::CMD_BCR | CommandFlags::RSP_R2);
    send_cmd(host, config, &mut cmd)?;
    Ok(cmd.response)
}

/// CMD10 in SPI mode: CID arrives as a 16-byte data block
pub(crate) fn send_cid_spi<H: Host>(host: &mut H, config: &HostConfig) -> Result<[u32; 4]> {
    let mut raw = [0u8; 16];
    let mut cmd = Command::new(
        MMC_SEND_CID,
        0,
        CommandFlags::CMD_ADTC | CommandFlags::SPI_R1,
    )
    .with_data(DataBuffer::Read(&mut raw), 16);
    send_cmd(host, config, &mut cmd)?;
    drop(cmd);
    Ok(words_from_register_bytes(&raw))
}

/// SD CMD3: the card publishes an RCA of its choosing
pub(crate) fn send_relative_addr<H: Host>(host: &mut H, config: &HostConfig) -> Result<u16> {
    let mut cmd =
        Command::new(SD_SEND_RELATIVE_ADDR, 0, CommandFlags::CMD_BCR | CommandFlags::RSP_R6);
    send_cmd(host, config, &mut cmd)?;
    Ok(cmd.r6_rca())
}

/// MMC CMD3: the host assigns the RCA
pub(crate) fn set_relative_addr<H: Host>(
    host: &mut H,
    config: &HostConfig,
    rca: u16,
) -> Result<()> {
    let mut cmd =
        Command::new(MMC_SET_RELATIVE_ADDR, rca_arg(rca), CommandFlags::CMD_AC | CommandFlags::RSP_R1);
    send_cmd(host, config, &mut cmd)
}

/// CMD9: fetch the raw CSD. An AC command with a 136-bit response in
/// native mode, a 16-byte data read in SPI mode
pub(crate) fn send_csd<H: Host>(host: &mut H, config: &HostConfig, rca: u16) -> Result<[u32; 4]> {
    if config.is_spi() {
        let mut raw = [0u8; 16];
        let mut cmd = Command::new(
            MMC_SEND_CSD,
            rca_arg(rca),
            CommandFlags::CMD_ADTC | CommandFlags::SPI_R1,
        )
        .with_data(DataBuffer::Read(&mut raw), 16);
        send_cmd(host, config, &mut cmd)?;
        drop(cmd);
        return Ok(words_from_register_bytes(&raw));
    }
    let mut cmd =
        Command::new(MMC_SEND_CSD, rca_arg(rca), CommandFlags::CMD_AC | CommandFlags::RSP_R2);
    send_cmd(host, config, &mut cmd)?;
    Ok(cmd.response)
}

/// CMD7: move the addressed card between standby and transfer state.
/// Deselecting (RCA 0) is a broadcast nobody answers
pub(crate) fn select_card<H: Host>(host: &mut H, config: &HostConfig, rca: u16) -> Result<()> {
    let flags = if rca == 0 { CommandFlags::RSP_R0 } else { CommandFlags::RSP_R1 };
    let mut cmd = Command::new(MMC_SELECT_CARD, rca_arg(rca), CommandFlags::CMD_AC | flags);
    send_cmd(host, config, &mut cmd)
}

/// CMD16: set the block length for following data transfers
pub(crate) fn set_blocklen<H: Host>(host: &mut H, config: &HostConfig, len: u32) -> Result<()> {
    let mut cmd = Command::new(
        MMC_SET_BLOCKLEN,
        len,
        CommandFlags::CMD_AC | rsp(config, CommandFlags::RSP_R1, CommandFlags::SPI_R1),
    );
    send_cmd(host, config, &mut cmd)
}

/// CMD13: read the card status word
pub(crate) fn send_status<H: Host>(host: &mut H, config: &HostConfig, rca: u16) -> Result<CardStatus> {
    let mut cmd = Command::new(
        MMC_SEND_STATUS,
        rca_arg(rca),
        CommandFlags::CMD_AC | rsp(config, CommandFlags::RSP_R1, CommandFlags::SPI_R2),
    );
    send_cmd(host, config, &mut cmd)?;
    Ok(cmd.r1())
}

/// ACMD51: read the 8-byte SCR
pub(crate) fn send_scr<H: Host>(host: &mut H, config: &HostConfig, rca: u16) -> Result<[u8; 8]> {
    let mut raw = [0u8; 8];
    let mut cmd = Command::new(
        SD_APP_SEND_SCR,
        0,
        CommandFlags::CMD_ADTC | rsp(config, CommandFlags::RSP_R1, CommandFlags::SPI_R1),
    )
    .with_data(DataBuffer::Read(&mut raw), 8);
    send_app_cmd(host, config, rca, &mut cmd)?;
    drop(cmd);
    Ok(raw)
}

/// ACMD6: set the SD card's bus width (0 = 1 line, 2 = 4 lines)
pub(crate) fn set_bus_width<H: Host>(host: &mut H, config: &HostConfig, rca: u16, width: u32) -> Result<()> {
    let mut cmd =
        Command::new(SD_APP_SET_BUS_WIDTH, width, CommandFlags::CMD_AC | CommandFlags::RSP_R1);
    send_app_cmd(host, config, rca, &mut cmd)
}

/// SD CMD6: query (mode 0) or switch (mode 1) a function group, returning
/// the 64-byte switch status
pub(crate) fn switch_func<H: Host>(
    host: &mut H,
    config: &HostConfig,
    mode: u32,
    group: u8,
    function: u8,
) -> Result<SwitchStatus> {
    let mut raw = [0u8; 64];
    // All other groups keep their current function (0xF = no change)
    let mut arg = mode << 31 | 0x00FF_FFFF;
    arg &= !(0xF << (4 * (group - 1)));
    arg |= (function as u32) << (4 * (group - 1));
    let mut cmd = Command::new(
        SD_SWITCH_FUNC,
        arg,
        CommandFlags::CMD_ADTC | rsp(config, CommandFlags::RSP_R1, CommandFlags::SPI_R1),
    )
    .with_data(DataBuffer::Read(&mut raw), 64);
    send_cmd(host, config, &mut cmd)?;
    drop(cmd);
    Ok(SwitchStatus::new(raw))
}

/// MMC CMD6: write one EXT_CSD byte (access mode 3), then wait out the
/// R1b busy phase via SEND_STATUS
pub(crate) fn mmc_switch<H: Host>(
    host: &mut H,
    config: &HostConfig,
    rca: u16,
    index: u8,
    value: u8,
) -> Result<()> {
    const ACCESS_WRITE_BYTE: u32 = 3;
    let arg = ACCESS_WRITE_BYTE << 24 | (index as u32) << 16 | (value as u32) << 8;
    let mut cmd = Command::new(
        MMC_SWITCH,
        arg,
        CommandFlags::CMD_AC | rsp(config, CommandFlags::RSP_R1B, CommandFlags::SPI_R1B),
    );
    send_cmd(host, config, &mut cmd)?;
    let status = send_status(host, config, rca)?;
    if !config.is_spi() && status.switch_error() {
        return Err(Error::NotSupported);
    }
    Ok(())
}

/// MMC CMD8: read the 512-byte EXT_CSD block
pub(crate) fn send_ext_csd<H: Host>(
    host: &mut H,
    config: &HostConfig,
    buf: &mut [u8; 512],
) -> Result<()> {
    let mut cmd = Command::new(
        MMC_SEND_EXT_CSD,
        0,
        CommandFlags::CMD_ADTC | rsp(config, CommandFlags::RSP_R1, CommandFlags::SPI_R1),
    )
    .with_data(DataBuffer::Read(buf), 512);
    send_cmd(host, config, &mut cmd)
}

/// Poll SEND_STATUS until the card reports ready-for-data, bounded by a
/// millisecond budget. SPI slots have no status to poll and pass trivially.
pub(crate) fn wait_for_ready<H: Host>(
    host: &mut H,
    config: &HostConfig,
    rca: u16,
    timeout_ms: u32,
) -> Result<()> {
    if config.is_spi() {
        return Ok(());
    }
    let mut elapsed = 0;
    loop {
        let status = send_status(host, config, rca)?;
        if status.ready_for_data() {
            return Ok(());
        }
        if elapsed >= timeout_ms {
            return Err(Error::Timeout);
        }
        elapsed += 1;
        if elapsed % 10 == 0 {
            trace!("waiting for card to become ready ({})", elapsed);
        }
        host.delay_ms(1);
    }
}

/// Repack a big-register data read (CID/CSD over SPI, MSB first) into
/// response word order: bit 0 of the register = bit 0 of word 0
fn words_from_register_bytes(raw: &[u8; 16]) -> [u32; 4] {
    [
        u32::from_be_bytes([raw[12], raw[13], raw[14], raw[15]]),
        u32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]]),
        u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
        u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
    ]
}
