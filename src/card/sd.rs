//! SD-memory-specific initialization steps.

use log::{debug, warn};

use super::cmd;
use super::init::Init;
use crate::error::{Error, Result};
use crate::host::{BusWidth, Host, HostFlags, FREQ_DEFAULT_KHZ, FREQ_HIGHSPEED_KHZ};
use crate::registers::csd::{Csd, CCC_SWITCH};
use crate::registers::scr;
use crate::registers::switch_status::ACCESS_MODE_HS;

/// High-speed timing runs the transfer clock at 50MHz
const HS_TR_SPEED: u32 = 50_000_000;

impl<H: Host> Init<H> {
    /// SWITCH_FUNC group 1: query support for the high-speed access mode,
    /// then select it
    fn sd_enable_hs_mode(&mut self) -> Result<()> {
        let scr = self.scr.ok_or(Error::InvalidResponse)?;
        let csd = self.csd.ok_or(Error::InvalidResponse)?;
        if scr.sd_spec < scr::SD_SPEC_VER_1_10 || csd.card_command_class & CCC_SWITCH == 0 {
            // Cards this old predate SWITCH_FUNC
            return Err(Error::NotSupported);
        }
        let status = cmd::switch_func(&mut self.host, &self.config, 0, 1, ACCESS_MODE_HS)?;
        if status.group_support(1) & (1 << ACCESS_MODE_HS) == 0 {
            return Err(Error::NotSupported);
        }
        let status = cmd::switch_func(&mut self.host, &self.config, 1, 1, ACCESS_MODE_HS)?;
        if status.group_selection(1) != ACCESS_MODE_HS {
            return Err(Error::NotSupported);
        }
        if status.group_busy(1, ACCESS_MODE_HS) {
            return Err(Error::Busy);
        }
        Ok(())
    }

    /// Switch to high speed and prove the card really made it: SEND_CSD is
    /// only legal in standby, so deselect, re-read, reselect, and require
    /// the transfer speed field to now read 50MHz
    pub(crate) fn sd_enable_hs_mode_and_check(&mut self) -> Result<()> {
        self.max_freq_khz = FREQ_DEFAULT_KHZ.min(self.config.max_freq_khz);
        self.sd_enable_hs_mode()?;
        if !self.config.is_spi() {
            cmd::select_card(&mut self.host, &self.config, 0)?;
        }
        let resp = cmd::send_csd(&mut self.host, &self.config, self.rca)?;
        let csd = Csd::decode_sd(&resp)?;
        if !self.config.is_spi() {
            cmd::select_card(&mut self.host, &self.config, self.rca)?;
        }
        if csd.tr_speed != HS_TR_SPEED {
            warn!("unexpected: after enabling HS mode, tr_speed={}", csd.tr_speed);
            return Err(Error::InvalidResponse);
        }
        self.csd = Some(csd);
        self.max_freq_khz = FREQ_HIGHSPEED_KHZ.min(self.config.max_freq_khz);
        Ok(())
    }

    /// ACMD6: widen the DAT bus when both sides can
    pub(crate) fn set_sd_bus_width(&mut self) -> Result<()> {
        let card_widths = self.scr.ok_or(Error::InvalidResponse)?.bus_width;
        if self.config.flags.contains(HostFlags::BUS_WIDTH_4)
            && card_widths & scr::BUS_WIDTH_4 != 0
        {
            debug!("switching SD card to 4-line mode");
            cmd::set_bus_width(&mut self.host, &self.config, self.rca, 2)?;
            self.bus_width = BusWidth::Width4;
        }
        Ok(())
    }
}
