//! Card initialization sequencer.
//!
//! A strictly ordered pipeline of steps, each gated on what the earlier
//! probes discovered. The first failing step aborts the whole sequence;
//! a [`Card`] value only comes into existence once every applicable step
//! has passed.

use log::{debug, warn};

use super::cmd;
use super::{Card, CardKind, IoInfo, MmcInfo, SdInfo};
use crate::error::{Error, Result};
use crate::host::{
    BusWidth, Host, HostConfig, HostFlags, FREQ_26M_KHZ, FREQ_52M_KHZ, FREQ_DEFAULT_KHZ,
    FREQ_HIGHSPEED_KHZ, FREQ_PROBING_KHZ,
};
use crate::registers::cid::{Cid, RawCid};
use crate::registers::csd::Csd;
use crate::registers::ext_csd::ExtCsd;
use crate::registers::ocr::{OcrRegister, OCR_SDHC_CAP, OCR_VOLTAGE_MASK};
use crate::registers::scr::Scr;
use crate::sdio;

/// RCA assigned to MMC cards; multi-card buses are not supported
const MMC_FIXED_RCA: u16 = 1;

/// Working state of an initialization in progress. Collapsed into a
/// [`Card`] by [`Init::finish`] once the pipeline has run to completion.
pub(crate) struct Init<H: Host> {
    pub(crate) host: H,
    pub(crate) config: HostConfig,
    pub(crate) ocr: u32,
    pub(crate) rca: u16,
    pub(crate) is_mem: bool,
    pub(crate) is_sdio: bool,
    pub(crate) is_mmc: bool,
    pub(crate) num_io_functions: u8,
    pub(crate) raw_cid: [u32; 4],
    pub(crate) cid: Option<Cid>,
    pub(crate) csd: Option<Csd>,
    pub(crate) scr: Option<Scr>,
    pub(crate) ext_csd: Option<ExtCsd>,
    pub(crate) max_freq_khz: u32,
    pub(crate) bus_width: BusWidth,
    pub(crate) is_ddr: bool,
}

impl<H: Host> Card<H> {
    /// Probe and bring up whatever card sits behind the slot.
    ///
    /// Runs the whole identification and negotiation pipeline; any step
    /// failure aborts immediately and nothing of the half-initialized
    /// state survives. Host settings already applied (clock, bus width)
    /// are not rolled back.
    pub fn init(host: H, config: HostConfig) -> Result<Card<H>> {
        let mut seq = Init::new(host, config);
        seq.fix_host_flags();
        let is_spi = seq.config.is_spi();

        // Reset SDIO state first: IO portions only react to CMD52 once,
        // CMD0 alone does not reset them
        seq.reset_io()?;
        cmd::go_idle_state(&mut seq.host, &seq.config)?;
        seq.probe_if_cond()?;
        seq.probe_io()?;

        let is_mem = seq.is_mem;
        if is_spi {
            seq.enable_spi_crc()?;
        }
        if is_mem {
            seq.negotiate_ocr()?;
        }

        let is_mmc = seq.is_mmc;
        let is_sdmem = is_mem && !is_mmc;

        if is_mem {
            seq.read_cid()?;
        }
        if !is_spi {
            seq.assign_rca()?;
        }
        if is_mem {
            seq.read_csd()?;
        }
        if is_mmc && !is_spi {
            seq.decode_mmc_cid()?;
        }
        // Standby to transfer state; SPI has no card-select concept
        if !is_spi {
            cmd::select_card(&mut seq.host, &seq.config, seq.rca)?;
        }
        if is_sdmem {
            seq.set_sd_blocklen()?;
            seq.read_scr()?;
            cmd::wait_for_ready(&mut seq.host, &seq.config, seq.rca, cmd::DATA_READY_TIMEOUT_MS)?;
        }
        if is_mmc {
            seq.read_ext_csd()?;
        }
        seq.enable_hs_mode()?;
        if !is_spi {
            if is_sdmem {
                seq.set_sd_bus_width()?;
            }
            if seq.is_sdio {
                seq.set_io_bus_width()?;
            }
            if is_mmc {
                seq.set_mmc_bus_width()?;
            }
            let width = seq.bus_width;
            seq.host.set_bus_width(seq.config.slot, width)?;
        }
        seq.switch_freq()?;
        if is_sdmem {
            seq.check_scr()?;
        }
        if is_mmc && !is_spi {
            seq.check_csd()?;
        }
        seq.finish()
    }
}

impl<H: Host> Init<H> {
    fn new(host: H, config: HostConfig) -> Self {
        let max_freq_khz = FREQ_DEFAULT_KHZ.min(config.max_freq_khz);
        Init {
            host,
            config,
            ocr: 0,
            rca: 0,
            is_mem: false,
            is_sdio: false,
            is_mmc: false,
            num_io_functions: 0,
            raw_cid: [0; 4],
            cid: None,
            csd: None,
            scr: None,
            ext_csd: None,
            max_freq_khz,
            bus_width: BusWidth::Width1,
            is_ddr: false,
        }
    }

    /// Reconcile the requested width flags with the slot's actual wiring
    fn fix_host_flags(&mut self) {
        let width_mask = HostFlags::BUS_WIDTH_1 | HostFlags::BUS_WIDTH_4 | HostFlags::BUS_WIDTH_8;
        let slot_width = self.host.get_bus_width(self.config.slot);
        let flags = self.config.flags;
        match slot_width {
            BusWidth::Width1 if flags.intersects(HostFlags::BUS_WIDTH_4 | HostFlags::BUS_WIDTH_8) => {
                self.config.flags = flags - width_mask | HostFlags::BUS_WIDTH_1;
            }
            BusWidth::Width4 if flags.contains(HostFlags::BUS_WIDTH_8) => {
                if !flags.contains(HostFlags::BUS_WIDTH_4) {
                    warn!("slot is wired for 4 lines but 4-line mode not enabled; using 1 line");
                    self.config.flags = flags - width_mask | HostFlags::BUS_WIDTH_1;
                } else {
                    self.config.flags = flags - width_mask | HostFlags::BUS_WIDTH_4;
                }
            }
            _ => {}
        }
    }

    /// CMD52 write of the RES bit; memory-only cards are allowed to balk
    fn reset_io(&mut self) -> Result<()> {
        let result = sdio::reset(&mut self.host, &self.config);
        match result {
            Err(Error::Timeout) => Ok(()),
            Err(Error::NotSupported) if self.config.is_spi() => Ok(()),
            other => other,
        }
    }

    /// CMD8 tells SDv2 cards the host can do SDHC; not answering is a
    /// legitimate outcome and marks the card as v1
    fn probe_if_cond(&mut self) -> Result<()> {
        let mut host_ocr = OCR_VOLTAGE_MASK;
        match cmd::send_if_cond(&mut self.host, &self.config, host_ocr) {
            Ok(()) => host_ocr |= OCR_SDHC_CAP,
            Err(Error::Timeout) => debug!("CMD8 timeout; not an SD v2 card"),
            Err(Error::NotSupported) if self.config.is_spi() => {
                debug!("CMD8 rejected; not an SD v2 card")
            }
            Err(err) => return Err(err),
        }
        self.ocr = host_ocr;
        Ok(())
    }

    /// CMD5 probes for IO function spaces; failure just means the card is
    /// memory-only
    fn probe_io(&mut self) -> Result<()> {
        match cmd::io_send_op_cond(&mut self.host, &self.config, 0) {
            Err(err) => {
                debug!("io_send_op_cond returned {:?}; not an IO card", err);
                self.is_sdio = false;
                self.is_mem = true;
            }
            Ok(_) => {
                self.is_sdio = true;
                // Voltage for the IO portion still needs negotiating
                let io_ocr =
                    cmd::io_send_op_cond(&mut self.host, &self.config, OCR_VOLTAGE_MASK)?;
                let io_ocr = OcrRegister { val: io_ocr };
                self.num_io_functions = io_ocr.io_num_functions();
                self.is_mem = io_ocr.io_mem_present();
                debug!(
                    "IO card: num_functions={} mem_present={}",
                    self.num_io_functions, self.is_mem
                );
            }
        }
        Ok(())
    }

    /// CRC16 on data is mandatory in native SD mode but opt-in over SPI
    fn enable_spi_crc(&mut self) -> Result<()> {
        cmd::crc_on_off(&mut self.host, &self.config, true)
    }

    /// ACMD41/CMD1 negotiation; an SD-path timeout on a native slot falls
    /// back to probing the card as MMC
    fn negotiate_ocr(&mut self) -> Result<()> {
        let is_spi = self.config.is_spi();
        if is_spi {
            // Mandatory voltage-range read before negotiation
            self.ocr = cmd::read_ocr(&mut self.host, &self.config)? | (self.ocr & OCR_SDHC_CAP);
        }
        let host_ocr = self.ocr;
        match cmd::send_op_cond(&mut self.host, &self.config, self.rca, false, host_ocr) {
            Ok(ocr) => self.ocr = ocr,
            Err(Error::Timeout) if !is_spi => {
                debug!("send_op_cond timed out, probing for MMC");
                self.is_mmc = true;
                self.ocr =
                    cmd::send_op_cond(&mut self.host, &self.config, self.rca, true, host_ocr)?;
            }
            Err(err) => return Err(err),
        }
        if is_spi {
            // Cards don't report the capacity class in ACMD41 over SPI;
            // fetch the settled OCR explicitly
            self.ocr = cmd::read_ocr(&mut self.host, &self.config)?;
        }
        debug!("host_ocr={:#010x} card_ocr={:#010x}", host_ocr, self.ocr);
        Ok(())
    }

    /// CMD2 broadcast in native mode (SD decodes now, MMC after the CSD);
    /// a CMD10 data read with immediate decode over SPI
    fn read_cid(&mut self) -> Result<()> {
        if self.config.is_spi() {
            let words = cmd::send_cid_spi(&mut self.host, &self.config)?;
            self.cid = Some(Cid::decode_sd(&RawCid { words }));
        } else {
            self.raw_cid = cmd::all_send_cid(&mut self.host, &self.config)?;
            if !self.is_mmc {
                self.cid = Some(Cid::decode_sd(&RawCid { words: self.raw_cid }));
            }
        }
        Ok(())
    }

    /// SD and SDIO cards pick their own RCA; MMC gets ours
    fn assign_rca(&mut self) -> Result<()> {
        if self.is_mmc {
            self.rca = MMC_FIXED_RCA;
            cmd::set_relative_addr(&mut self.host, &self.config, self.rca)
        } else {
            self.rca = cmd::send_relative_addr(&mut self.host, &self.config)?;
            debug!("card RCA {:#06x}", self.rca);
            Ok(())
        }
    }

    fn read_csd(&mut self) -> Result<()> {
        let resp = cmd::send_csd(&mut self.host, &self.config, self.rca)?;
        let csd = if self.is_mmc { Csd::decode_mmc(&resp)? } else { Csd::decode_sd(&resp)? };
        self.csd = Some(csd);
        Ok(())
    }

    /// MMC CID layout depends on the spec version the CSD just revealed
    fn decode_mmc_cid(&mut self) -> Result<()> {
        let mmc_ver = self.csd.ok_or(Error::InvalidResponse)?.mmc_ver;
        self.cid = Some(Cid::decode_mmc(&RawCid { words: self.raw_cid }, mmc_ver));
        Ok(())
    }

    /// SDSC cards may default to a block length other than the sector size
    fn set_sd_blocklen(&mut self) -> Result<()> {
        if self.ocr & OCR_SDHC_CAP == 0 {
            let sector_size = self.csd.ok_or(Error::InvalidResponse)?.sector_size;
            return cmd::set_blocklen(&mut self.host, &self.config, sector_size);
        }
        Ok(())
    }

    /// First command to use the DAT lines; errors here usually mean a
    /// wiring or pull-up problem
    fn read_scr(&mut self) -> Result<()> {
        let raw = cmd::send_scr(&mut self.host, &self.config, self.rca)?;
        self.scr = Some(Scr::decode(&raw)?);
        Ok(())
    }

    fn switch_freq(&mut self) -> Result<()> {
        if self.max_freq_khz > self.config.max_freq_khz {
            self.max_freq_khz = self.config.max_freq_khz;
        }
        // Highest supported frequency at or below the negotiated maximum
        let candidates =
            [FREQ_52M_KHZ, FREQ_HIGHSPEED_KHZ, FREQ_26M_KHZ, FREQ_DEFAULT_KHZ];
        let mut selected = FREQ_PROBING_KHZ;
        for &freq in candidates.iter() {
            if freq <= self.max_freq_khz {
                selected = freq;
                break;
            }
        }
        debug!("switching card clock to {} kHz", selected);
        if selected > FREQ_PROBING_KHZ {
            self.host.set_card_clk(self.config.slot, selected)?;
        }
        if self.is_ddr {
            if !self.config.flags.contains(HostFlags::DDR) {
                return Err(Error::NotSupported);
            }
            self.host.set_bus_ddr_mode(self.config.slot, true)?;
        }
        Ok(())
    }

    /// Try to move the card to high-speed timing, whichever way this kind
    /// of card spells it. A card that cannot is left at default speed;
    /// only real protocol failures abort.
    fn enable_hs_mode(&mut self) -> Result<()> {
        if self.config.max_freq_khz <= FREQ_DEFAULT_KHZ {
            // Host stays at default speed anyway, don't bother the card
            self.max_freq_khz = self.config.max_freq_khz;
            return Ok(());
        }
        let result = if self.is_mem && !self.is_mmc {
            self.sd_enable_hs_mode_and_check()
        } else if self.is_sdio {
            self.io_enable_hs_mode()
        } else {
            self.mmc_enable_hs_mode()
        };
        match result {
            Err(Error::NotSupported) => {
                debug!("card does not support high-speed mode");
                self.max_freq_khz = FREQ_DEFAULT_KHZ.min(self.config.max_freq_khz);
                Ok(())
            }
            other => other,
        }
    }

    /// Probe the CCCR high-speed register and set EHS when the card
    /// advertises SHS
    fn io_enable_hs_mode(&mut self) -> Result<()> {
        sdio::enable_hs_mode(&mut self.host, &self.config)?;
        self.max_freq_khz = FREQ_HIGHSPEED_KHZ.min(self.config.max_freq_khz);
        Ok(())
    }

    /// Re-read the SCR and require it to match what was decoded before the
    /// clock went up; a difference points at signal integrity trouble
    fn check_scr(&mut self) -> Result<()> {
        let raw = cmd::send_scr(&mut self.host, &self.config, self.rca)?;
        let scr = Scr::decode(&raw)?;
        if Some(scr) != self.scr {
            return Err(Error::InvalidResponse);
        }
        Ok(())
    }

    fn finish(self) -> Result<Card<H>> {
        let kind = if self.is_mem && self.is_mmc {
            CardKind::Mmc(MmcInfo {
                cid: self.cid.ok_or(Error::InvalidResponse)?,
                csd: self.csd.ok_or(Error::InvalidResponse)?,
                ext_csd: self.ext_csd.unwrap_or_default(),
            })
        } else if self.is_mem {
            let sd = SdInfo {
                cid: self.cid.ok_or(Error::InvalidResponse)?,
                csd: self.csd.ok_or(Error::InvalidResponse)?,
                scr: self.scr.ok_or(Error::InvalidResponse)?,
            };
            if self.is_sdio {
                CardKind::SdCombo(sd, IoInfo { num_functions: self.num_io_functions })
            } else {
                CardKind::Sd(sd)
            }
        } else if self.is_sdio {
            CardKind::Io(IoInfo { num_functions: self.num_io_functions })
        } else {
            return Err(Error::NoCard);
        };
        Ok(Card {
            host: self.host,
            config: self.config,
            ocr: self.ocr,
            rca: self.rca,
            max_freq_khz: self.max_freq_khz,
            bus_width: self.bus_width,
            is_ddr: self.is_ddr,
            kind,
        })
    }
}
