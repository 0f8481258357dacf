//! MMC/eMMC-specific initialization steps.

use log::{debug, warn};

use super::cmd;
use super::init::Init;
use crate::error::{Error, Result};
use crate::host::{BusWidth, Host, HostFlags, FREQ_26M_KHZ, FREQ_52M_KHZ};
use crate::registers::csd::Csd;
use crate::registers::ext_csd::{
    self, ExtCsd, CARD_TYPE_F_26M, CARD_TYPE_F_52M, CARD_TYPE_F_52M_1_8V, EXT_CSD_SIZE,
};

impl<H: Host> Init<H> {
    /// Read the 512-byte EXT_CSD; derive the frequency ceiling, DDR
    /// eligibility and the real capacity of high-capacity parts
    pub(crate) fn read_ext_csd(&mut self) -> Result<()> {
        let mut csd = self.csd.ok_or(Error::InvalidResponse)?;
        debug!("MMC version: {}", csd.mmc_ver);
        if csd.mmc_ver < 4 {
            // No EXT_CSD before MMC 4.0
            return Ok(());
        }
        let mut raw = [0u8; EXT_CSD_SIZE];
        cmd::send_ext_csd(&mut self.host, &self.config, &mut raw)?;
        let decoded = ExtCsd::decode(&raw);

        if decoded.card_type & CARD_TYPE_F_52M_1_8V != 0 {
            self.max_freq_khz = FREQ_52M_KHZ;
            if self.config.flags.contains(HostFlags::DDR)
                && self.config.flags.contains(HostFlags::BUS_WIDTH_4)
                && self.config.max_freq_khz >= FREQ_26M_KHZ
            {
                debug!("card and host support DDR mode");
                self.is_ddr = true;
            }
        } else if decoded.card_type & CARD_TYPE_F_52M != 0 {
            self.max_freq_khz = FREQ_52M_KHZ;
        } else if decoded.card_type & CARD_TYPE_F_26M != 0 {
            self.max_freq_khz = FREQ_26M_KHZ;
        } else {
            warn!("unknown CARD_TYPE {:#04x}", decoded.card_type);
        }
        self.max_freq_khz = self.max_freq_khz.min(self.config.max_freq_khz);

        if csd.size_in_ext_csd() && decoded.sec_count != 0 {
            csd.capacity = decoded.sec_count;
            self.csd = Some(csd);
        }
        self.ext_csd = Some(decoded);
        Ok(())
    }

    /// SWITCH to high-speed timing when the card advertised a 52MHz or
    /// 26MHz class above the default clock
    pub(crate) fn mmc_enable_hs_mode(&mut self) -> Result<()> {
        if self.ext_csd.is_none() {
            return Err(Error::NotSupported);
        }
        if self.max_freq_khz > FREQ_26M_KHZ {
            cmd::mmc_switch(
                &mut self.host,
                &self.config,
                self.rca,
                ext_csd::EXT_CSD_HS_TIMING,
                ext_csd::HS_TIMING_HS,
            )?;
        }
        Ok(())
    }

    /// SWITCH the power class for the chosen operating point, then the bus
    /// width (DDR variants when negotiated), widest the host allows first
    pub(crate) fn set_mmc_bus_width(&mut self) -> Result<()> {
        let ext = match self.ext_csd {
            Some(ext) => ext,
            // Pre-4.0 cards only do 1-bit transfers
            None => return Ok(()),
        };
        let width = if self.config.flags.contains(HostFlags::BUS_WIDTH_8) {
            BusWidth::Width8
        } else if self.config.flags.contains(HostFlags::BUS_WIDTH_4) {
            BusWidth::Width4
        } else {
            return Ok(());
        };
        let power_class = ext.power_class(self.max_freq_khz, width.lines());
        if power_class != 0 {
            cmd::mmc_switch(
                &mut self.host,
                &self.config,
                self.rca,
                ext_csd::EXT_CSD_POWER_CLASS,
                power_class,
            )?;
        }
        let value = match (width, self.is_ddr) {
            (BusWidth::Width8, true) => ext_csd::BUS_WIDTH_8_DDR,
            (BusWidth::Width8, false) => ext_csd::BUS_WIDTH_8,
            (BusWidth::Width4, true) => ext_csd::BUS_WIDTH_4_DDR,
            (BusWidth::Width4, false) => ext_csd::BUS_WIDTH_4,
            (BusWidth::Width1, _) => ext_csd::BUS_WIDTH_1,
        };
        cmd::mmc_switch(&mut self.host, &self.config, self.rca, ext_csd::EXT_CSD_BUS_WIDTH, value)?;
        self.bus_width = width;
        Ok(())
    }

    /// Deselect, re-read the CSD, reselect, and require it to match what
    /// was decoded before the clock went up
    pub(crate) fn check_csd(&mut self) -> Result<()> {
        let stored = self.csd.ok_or(Error::InvalidResponse)?;
        cmd::select_card(&mut self.host, &self.config, 0)?;
        let resp = cmd::send_csd(&mut self.host, &self.config, self.rca)?;
        let mut fresh = Csd::decode_mmc(&resp)?;
        cmd::select_card(&mut self.host, &self.config, self.rca)?;
        if fresh.size_in_ext_csd() {
            // Capacity was corrected from the EXT_CSD sector count
            fresh.capacity = stored.capacity;
        }
        if fresh != stored {
            return Err(Error::InvalidResponse);
        }
        Ok(())
    }
}
