//! Card Information Structure: a tag-length-value tuple stream describing
//! the card and its functions, discovered through the CCCR CIS pointer.

use core::fmt;

use super::{io_rw_direct, ARG_CMD52_READ, CCCR_CIS_PTR};
use crate::card::Card;
use crate::error::{Error, Result};
use crate::host::Host;

// Tuple codes
pub const CISTPL_NULL: u8 = 0x00;
pub const CISTPL_VERS_1: u8 = 0x15;
pub const CISTPL_MANFID: u8 = 0x20;
pub const CISTPL_FUNCID: u8 = 0x21;
pub const CISTPL_FUNCE: u8 = 0x22;
pub const CISTPL_END: u8 = 0xFF;

impl<H: Host> Card<H> {
    /// Copy the raw CIS tuple stream into `out`, up to and including the
    /// END tuple.
    ///
    /// The stream starts at the address in CCCR 0x09-0x0B. Scanning gives
    /// up after `search_limit` bytes (`InvalidSize`); a buffer too small
    /// for the tuples found so far reports `NoMem`. Returns the number of
    /// bytes written.
    pub fn io_get_cis_data(&mut self, out: &mut [u8], search_limit: usize) -> Result<usize> {
        self.check_cis_capable()?;
        let mut addr = 0u32;
        for i in 0..3 {
            let byte = io_rw_direct(
                &mut self.host,
                &self.config,
                0,
                CCCR_CIS_PTR + i,
                ARG_CMD52_READ,
                0,
            )?;
            addr |= (byte as u32) << (8 * i);
        }
        if addr == 0 || addr == 0x00FF_FFFF {
            return Err(Error::NotSupported);
        }
        let mut written = 0;
        let mut scanned = 0;
        loop {
            if scanned >= search_limit {
                return Err(Error::InvalidSize);
            }
            let code =
                io_rw_direct(&mut self.host, &self.config, 0, addr, ARG_CMD52_READ, 0)?;
            addr += 1;
            scanned += 1;
            if written >= out.len() {
                return Err(Error::NoMem);
            }
            out[written] = code;
            written += 1;
            match code {
                CISTPL_END => return Ok(written),
                CISTPL_NULL => continue,
                _ => {}
            }
            let link =
                io_rw_direct(&mut self.host, &self.config, 0, addr, ARG_CMD52_READ, 0)?;
            addr += 1;
            scanned += 1;
            if written + 1 + link as usize > out.len() {
                return Err(Error::NoMem);
            }
            out[written] = link;
            written += 1;
            for _ in 0..link {
                let byte =
                    io_rw_direct(&mut self.host, &self.config, 0, addr, ARG_CMD52_READ, 0)?;
                addr += 1;
                scanned += 1;
                out[written] = byte;
                written += 1;
            }
        }
    }

    fn check_cis_capable(&self) -> Result<()> {
        if !self.is_sdio() {
            return Err(Error::NotSupported);
        }
        Ok(())
    }
}

/// Render a CIS tuple stream (as produced by
/// [`Card::io_get_cis_data`]) in human-readable form.
pub fn print_cis_info<W: fmt::Write>(buf: &[u8], w: &mut W) -> fmt::Result {
    let mut pos = 0;
    while pos < buf.len() {
        let code = buf[pos];
        pos += 1;
        if code == CISTPL_END {
            break;
        }
        if code == CISTPL_NULL {
            continue;
        }
        if pos >= buf.len() {
            break;
        }
        let link = buf[pos] as usize;
        pos += 1;
        if pos + link > buf.len() {
            break;
        }
        let body = &buf[pos..pos + link];
        pos += link;
        match code {
            CISTPL_MANFID if link >= 4 => {
                let manf = u16::from_le_bytes([body[0], body[1]]);
                let card = u16::from_le_bytes([body[2], body[3]]);
                writeln!(w, "Manufacturer: MANF={:04X}, CARD={:04X}", manf, card)?;
            }
            CISTPL_VERS_1 if link >= 2 => {
                writeln!(w, "VERS_1: {}.{}", body[0], body[1])?;
                // Product info strings, NUL separated, 0xFF terminated
                for part in body[2..].split(|&b| b == 0) {
                    if part.first() == Some(&0xFF) {
                        break;
                    }
                    if let Ok(s) = core::str::from_utf8(part) {
                        if !s.is_empty() {
                            writeln!(w, "  info: {}", s)?;
                        }
                    }
                }
            }
            CISTPL_FUNCID if !body.is_empty() => {
                writeln!(w, "Function ID: {:#04x}", body[0])?;
            }
            CISTPL_FUNCE if link >= 4 && body[0] == 0 => {
                // Function 0 extension: max block size and transfer rate
                let blk_size = u16::from_le_bytes([body[1], body[2]]);
                writeln!(w, "Function extension: blk_size={} max_speed_code={:#04x}", blk_size, body[3])?;
            }
            _ => {
                write!(w, "Tuple {:#04x} len {}:", code, link)?;
                for byte in body {
                    write!(w, " {:02x}", byte)?;
                }
                writeln!(w)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_manfid_and_funce() {
        let stream = [
            CISTPL_MANFID, 4, 0x96, 0x02, 0x47, 0x43, // MANF=0x0296 CARD=0x4347
            CISTPL_FUNCID, 1, 0x0C,
            CISTPL_FUNCE, 4, 0x00, 0x00, 0x08, 0x32, // blk_size 2048
            CISTPL_END,
        ];
        let mut out = String::new();
        print_cis_info(&stream, &mut out).unwrap();
        assert!(out.contains("MANF=0296, CARD=4347"));
        assert!(out.contains("Function ID: 0x0c"));
        assert!(out.contains("blk_size=2048"));
    }

    #[test]
    fn unknown_tuple_hexdumped() {
        let stream = [0x91, 2, 0xAB, 0xCD, CISTPL_END];
        let mut out = String::new();
        print_cis_info(&stream, &mut out).unwrap();
        assert!(out.contains("Tuple 0x91 len 2: ab cd"));
    }
}
