//! SD Configuration Register decoding.

use super::bits;
use crate::error::{Error, Result};

/// SCR SD_SPEC value for physical layer 1.10, the first with SWITCH_FUNC
pub const SD_SPEC_VER_1_10: u8 = 1;
/// Bus-width capability bit: 4-bit transfers supported
pub const BUS_WIDTH_4: u8 = 1 << 2;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Scr {
    /// SD physical specification version code
    pub sd_spec: u8,
    /// DAT bus widths the card accepts, bit 0 = 1-bit, bit 2 = 4-bit
    pub bus_width: u8,
}

impl Scr {
    /// Decode the 64-bit SCR from the 8 bytes ACMD51 returns.
    ///
    /// The register arrives most-significant byte first; repack into the
    /// response word order before extracting fields.
    pub fn decode(raw: &[u8; 8]) -> Result<Scr> {
        let words = [
            u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
            u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
        ];
        if bits(&words, 60, 4) != 0 {
            return Err(Error::NotSupported);
        }
        Ok(Scr {
            sd_spec: bits(&words, 56, 4) as u8,
            bus_width: bits(&words, 48, 4) as u8,
        })
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn decode_typical_scr() {
        // SD spec 2.0, 1-bit and 4-bit widths
        let scr = Scr::decode(&hex!("02 35 80 00 00 00 00 00")).unwrap();
        assert_eq!(scr.sd_spec, 2);
        assert_eq!(scr.bus_width, 0x5);
        assert!(scr.bus_width & BUS_WIDTH_4 != 0);
        assert!(scr.sd_spec >= SD_SPEC_VER_1_10);
    }

    #[test]
    fn nonzero_structure_rejected() {
        assert!(Scr::decode(&hex!("12 00 00 00 00 00 00 00")).is_err());
    }
}
