//! Card Identification register decoding.
//!
//! SD cards use one fixed layout. MMC layouts differ by MMC spec version,
//! which is only known once the CSD has been read, so the raw words are
//! captured first and decoded later.

use super::bits;

/// Raw 128-bit CID as returned by ALL_SEND_CID, decode deferred
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RawCid {
    pub words: [u32; 4],
}

/// Decoded card identification
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Cid {
    pub mfg_id: u32,
    pub oem_id: u16,
    /// Product name, ASCII, unused tail zeroed
    pub name: [u8; 8],
    pub revision: u8,
    pub serial: u32,
    /// Manufacture date, raw MDT field
    pub date: u16,
}

impl Cid {
    /// SD layout: MID[127:120], OID[119:104], PNM[103:64] (5 chars),
    /// PRV[63:56], PSN[55:24], MDT[19:8]
    pub fn decode_sd(raw: &RawCid) -> Cid {
        let w = &raw.words;
        let mut name = [0u8; 8];
        for (i, ch) in name.iter_mut().take(5).enumerate() {
            *ch = bits(w, 96 - 8 * i, 8) as u8;
        }
        Cid {
            mfg_id: bits(w, 120, 8),
            oem_id: bits(w, 104, 16) as u16,
            name,
            revision: bits(w, 56, 8) as u8,
            serial: bits(w, 24, 32),
            date: bits(w, 8, 12) as u16,
        }
    }

    /// MMC layouts. Spec versions up to 1.4 carry a 24-bit manufacturer id
    /// and a 7-character name; later versions match the SD field split with
    /// a 6-character name.
    pub fn decode_mmc(raw: &RawCid, mmc_ver: u8) -> Cid {
        let w = &raw.words;
        let mut cid = Cid::default();
        if mmc_ver <= 1 {
            cid.mfg_id = bits(w, 104, 24);
            for (i, ch) in cid.name.iter_mut().take(7).enumerate() {
                *ch = bits(w, 96 - 8 * i, 8) as u8;
            }
            cid.revision = bits(w, 40, 8) as u8;
            cid.serial = bits(w, 16, 24);
            cid.date = bits(w, 8, 8) as u16;
        } else {
            cid.mfg_id = bits(w, 120, 8);
            cid.oem_id = bits(w, 104, 16) as u16;
            for (i, ch) in cid.name.iter_mut().take(6).enumerate() {
                *ch = bits(w, 96 - 8 * i, 8) as u8;
            }
            cid.revision = bits(w, 48, 8) as u8;
            cid.serial = bits(w, 16, 32);
            cid.date = bits(w, 8, 8) as u16;
        }
        cid
    }

    /// Product name as a printable str
    pub fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..end]).unwrap_or("")
    }
}
