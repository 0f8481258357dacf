//! Emulated cards for exercising the stack without hardware: a native-mode
//! SD memory card over a byte-addressable backing store, and an SDIO card
//! with a register space and CIS.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;
use sdmmc_card::{BusWidth, Command, DataBuffer, Error, Host, HostConfig, HostFlags};

pub const SECTOR: usize = 512;

/// Bus trace that outlives the host (init consumes it on failure)
pub type CmdLog = Rc<RefCell<Vec<u8>>>;

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Pack `value` into little-endian response words starting at bit `start`
pub fn put_bits(words: &mut [u32; 4], start: usize, len: usize, value: u32) {
    for i in 0..len {
        if value >> i & 1 != 0 {
            words[(start + i) / 32] |= 1 << ((start + i) % 32);
        }
    }
}

/// Scriptable SD memory card in native (non-SPI) mode
#[derive(Debug)]
pub struct MemCardHost {
    pub storage: Vec<u8>,
    pub capacity_blocks: u32,
    pub high_capacity: bool,
    pub support_hs: bool,
    /// Fail every command with this opcode
    pub fail_opcode: Option<(u8, Error)>,
    /// Opcodes in issue order, including failed ones
    pub cmd_log: CmdLog,
    pub bus_width_set: Option<BusWidth>,
    pub clock_khz_set: Option<u32>,
    app_cmd: bool,
    hs_enabled: bool,
    /// ACMD41 polls to swallow before reporting power-up
    op_cond_polls: u32,
    rca: u16,
    selected: bool,
}

impl MemCardHost {
    pub fn new(capacity_blocks: u32, high_capacity: bool) -> Self {
        MemCardHost {
            storage: vec![0; capacity_blocks as usize * SECTOR],
            capacity_blocks,
            high_capacity,
            support_hs: true,
            fail_opcode: None,
            cmd_log: Rc::new(RefCell::new(Vec::new())),
            bus_width_set: None,
            clock_khz_set: None,
            app_cmd: false,
            hs_enabled: false,
            op_cond_polls: 2,
            rca: 0x1234,
            selected: false,
        }
    }

    pub fn config(max_freq_khz: u32) -> HostConfig {
        HostConfig {
            flags: HostFlags::BUS_WIDTH_1 | HostFlags::BUS_WIDTH_4,
            max_freq_khz,
            ..HostConfig::default()
        }
    }

    fn cid_words(&self) -> [u32; 4] {
        let mut w = [0u32; 4];
        put_bits(&mut w, 120, 8, 0x27);
        put_bits(&mut w, 104, 16, 0x5048); // "PH"
        for (i, &b) in b"MOCK5".iter().enumerate() {
            put_bits(&mut w, 96 - 8 * i, 8, b as u32);
        }
        put_bits(&mut w, 56, 8, 0x10);
        put_bits(&mut w, 24, 32, 0x0000_4242);
        put_bits(&mut w, 8, 12, (20 << 4) | 3);
        w
    }

    fn csd_words(&self) -> [u32; 4] {
        let mut w = [0u32; 4];
        let tran_speed = if self.hs_enabled { 0x5A } else { 0x32 };
        put_bits(&mut w, 96, 8, tran_speed);
        put_bits(&mut w, 84, 12, 0x5B5); // command classes incl. SWITCH
        if self.high_capacity {
            put_bits(&mut w, 126, 2, 1);
            put_bits(&mut w, 48, 22, self.capacity_blocks / 1024 - 1);
        } else {
            put_bits(&mut w, 126, 2, 0);
            put_bits(&mut w, 80, 4, 9);
            // capacity = (c_size + 1) << (mult + 2), mult fixed at 7
            put_bits(&mut w, 62, 12, (self.capacity_blocks >> 9) - 1);
            put_bits(&mut w, 47, 3, 7);
        }
        w
    }

    fn scr_bytes(&self) -> [u8; 8] {
        [0x02, 0x35, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00]
    }

    fn switch_status(&self, arg: u32) -> [u8; 64] {
        let mut raw = [0u8; 64];
        if self.support_hs {
            raw[13] = 0x03; // group 1 supports functions 0 and 1
        } else {
            raw[13] = 0x01;
        }
        let set_mode = arg >> 31 != 0;
        let wanted = (arg & 0xF) as u8;
        if wanted == 1 && self.support_hs {
            raw[16] = 0x01;
        } else if set_mode {
            raw[16] = 0x0F; // function change refused
        }
        raw
    }

    fn ready_status(&self) -> u32 {
        (1 << 8) | (4 << 9) // ready-for-data, transfer state
    }

    fn block_index(&self, arg: u32) -> u32 {
        if self.high_capacity {
            arg
        } else {
            arg / SECTOR as u32
        }
    }

    fn data_transfer(&mut self, cmd: &mut Command) -> Result<(), Error> {
        let start = self.block_index(cmd.arg) as usize;
        match cmd.data.as_mut() {
            Some(DataBuffer::Read(buf)) => {
                let end = start * SECTOR + buf.len();
                if end > self.storage.len() {
                    return Err(Error::InvalidSize);
                }
                buf.copy_from_slice(&self.storage[start * SECTOR..end]);
            }
            Some(DataBuffer::Write(buf)) => {
                let end = start * SECTOR + buf.len();
                if end > self.storage.len() {
                    return Err(Error::InvalidSize);
                }
                self.storage[start * SECTOR..end].copy_from_slice(buf);
            }
            None => return Err(Error::InvalidArg),
        }
        cmd.response[0] = self.ready_status();
        Ok(())
    }
}

impl DelayMs<u32> for MemCardHost {
    fn delay_ms(&mut self, _ms: u32) {}
}

impl Host for MemCardHost {
    fn init(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn do_transaction(&mut self, _slot: u8, cmd: &mut Command) -> Result<(), Error> {
        self.cmd_log.borrow_mut().push(cmd.opcode);
        if let Some((opcode, err)) = self.fail_opcode {
            if opcode == cmd.opcode {
                return Err(err);
            }
        }
        let was_app_cmd = self.app_cmd;
        self.app_cmd = false;
        match (cmd.opcode, was_app_cmd) {
            (0, _) => {
                self.hs_enabled = false;
                self.selected = false;
            }
            (8, _) => cmd.response[0] = cmd.arg & 0xFFF,
            (5, _) => return Err(Error::Timeout), // no IO portion
            (55, _) => {
                self.app_cmd = true;
                cmd.response[0] = 1 << 5;
            }
            (41, true) => {
                let mut ocr = 0x00FF_8000;
                if self.op_cond_polls > 0 {
                    self.op_cond_polls -= 1;
                } else {
                    ocr |= 1 << 31;
                    if self.high_capacity {
                        ocr |= 1 << 30;
                    }
                }
                cmd.response[0] = ocr;
            }
            (2, _) => cmd.response = self.cid_words(),
            (3, _) => cmd.response[0] = (self.rca as u32) << 16,
            (9, _) => {
                if self.selected {
                    // SEND_CSD is only legal in standby
                    return Err(Error::InvalidResponse);
                }
                cmd.response = self.csd_words();
            }
            (7, _) => self.selected = cmd.arg >> 16 == self.rca as u32,
            (16, _) => cmd.response[0] = self.ready_status(),
            (51, true) => match cmd.data.as_mut() {
                Some(DataBuffer::Read(buf)) if buf.len() == 8 => {
                    buf.copy_from_slice(&self.scr_bytes());
                    cmd.response[0] = self.ready_status();
                }
                _ => return Err(Error::InvalidArg),
            },
            (6, true) => cmd.response[0] = self.ready_status(), // ACMD6 bus width
            (6, false) => {
                let status = self.switch_status(cmd.arg);
                if cmd.arg >> 31 != 0 && cmd.arg & 0xF == 1 && self.support_hs {
                    self.hs_enabled = true;
                }
                match cmd.data.as_mut() {
                    Some(DataBuffer::Read(buf)) if buf.len() == 64 => {
                        buf.copy_from_slice(&status);
                        cmd.response[0] = self.ready_status();
                    }
                    _ => return Err(Error::InvalidArg),
                }
            }
            (13, _) => cmd.response[0] = self.ready_status(),
            (17, _) | (18, _) | (24, _) | (25, _) => return self.data_transfer(cmd),
            (12, _) => cmd.response[0] = self.ready_status(),
            _ => return Err(Error::Timeout),
        }
        Ok(())
    }

    fn get_bus_width(&self, _slot: u8) -> BusWidth {
        BusWidth::Width4
    }

    fn set_bus_width(&mut self, _slot: u8, width: BusWidth) -> Result<(), Error> {
        self.bus_width_set = Some(width);
        Ok(())
    }

    fn set_bus_ddr_mode(&mut self, _slot: u8, _ddr: bool) -> Result<(), Error> {
        Ok(())
    }

    fn set_card_clk(&mut self, _slot: u8, freq_khz: u32) -> Result<(), Error> {
        self.clock_khz_set = Some(freq_khz);
        Ok(())
    }

    fn io_int_enable(&mut self, _slot: u8) -> Result<(), Error> {
        Ok(())
    }

    fn io_int_wait(&mut self, _slot: u8, _timeout_ms: u32) -> Result<(), Error> {
        Err(Error::Timeout)
    }
}

/// MMC 4.x high-capacity device: no CMD8/CMD5/ACMD path, CMD1 negotiation,
/// EXT_CSD-sized capacity, SWITCH-based high speed and bus width
pub struct MmcCardHost {
    pub storage: Vec<u8>,
    pub capacity_blocks: u32,
    pub cmd_log: CmdLog,
    pub bus_width_set: Option<BusWidth>,
    pub clock_khz_set: Option<u32>,
    pub ext_csd_bus_width: u8,
    pub hs_timing: u8,
    op_cond_polls: u32,
    rca: u16,
    selected: bool,
}

impl MmcCardHost {
    pub fn new(capacity_blocks: u32) -> Self {
        MmcCardHost {
            storage: vec![0; capacity_blocks as usize * SECTOR],
            capacity_blocks,
            cmd_log: Rc::new(RefCell::new(Vec::new())),
            bus_width_set: None,
            clock_khz_set: None,
            ext_csd_bus_width: 0,
            hs_timing: 0,
            op_cond_polls: 1,
            rca: 0,
            selected: false,
        }
    }

    fn cid_words(&self) -> [u32; 4] {
        let mut w = [0u32; 4];
        put_bits(&mut w, 120, 8, 0x15);
        put_bits(&mut w, 104, 16, 0x0100);
        for (i, &b) in b"MMCMK1".iter().enumerate() {
            put_bits(&mut w, 96 - 8 * i, 8, b as u32);
        }
        put_bits(&mut w, 16, 32, 0x0F0F_0F0F);
        w
    }

    fn csd_words(&self) -> [u32; 4] {
        let mut w = [0u32; 4];
        put_bits(&mut w, 126, 2, 3); // EXT_CSD layout
        put_bits(&mut w, 122, 4, 4); // MMC 4.x
        put_bits(&mut w, 96, 8, 0x32);
        put_bits(&mut w, 84, 12, 0x0F5);
        put_bits(&mut w, 80, 4, 9);
        put_bits(&mut w, 62, 12, 0xFFF); // size lives in EXT_CSD
        w
    }

    fn ext_csd(&self) -> [u8; 512] {
        let mut raw = [0u8; 512];
        raw[192] = 5; // EXT_CSD revision
        raw[196] = 0x03; // 26MHz and 52MHz classes
        raw[212..216].copy_from_slice(&self.capacity_blocks.to_le_bytes());
        raw
    }

    fn ready_status(&self) -> u32 {
        (1 << 8) | (4 << 9)
    }

    fn switch(&mut self, arg: u32) -> Result<(), Error> {
        let index = (arg >> 16 & 0xFF) as u8;
        let value = (arg >> 8 & 0xFF) as u8;
        match index {
            185 => self.hs_timing = value,
            183 => self.ext_csd_bus_width = value,
            187 => {} // power class
            _ => return Err(Error::NotSupported),
        }
        Ok(())
    }

    fn data_transfer(&mut self, cmd: &mut Command) -> Result<(), Error> {
        let start = cmd.arg as usize; // sector mode, block addressed
        match cmd.data.as_mut() {
            Some(DataBuffer::Read(buf)) => {
                let end = start * SECTOR + buf.len();
                if end > self.storage.len() {
                    return Err(Error::InvalidSize);
                }
                buf.copy_from_slice(&self.storage[start * SECTOR..end]);
            }
            Some(DataBuffer::Write(buf)) => {
                let end = start * SECTOR + buf.len();
                if end > self.storage.len() {
                    return Err(Error::InvalidSize);
                }
                self.storage[start * SECTOR..end].copy_from_slice(buf);
            }
            None => return Err(Error::InvalidArg),
        }
        cmd.response[0] = self.ready_status();
        Ok(())
    }
}

impl DelayMs<u32> for MmcCardHost {
    fn delay_ms(&mut self, _ms: u32) {}
}

impl Host for MmcCardHost {
    fn init(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn do_transaction(&mut self, _slot: u8, cmd: &mut Command) -> Result<(), Error> {
        self.cmd_log.borrow_mut().push(cmd.opcode);
        match cmd.opcode {
            0 => self.selected = false,
            8 if cmd.data.is_some() => match cmd.data.as_mut() {
                // SEND_EXT_CSD
                Some(DataBuffer::Read(buf)) if buf.len() == 512 => {
                    buf.copy_from_slice(&self.ext_csd());
                    cmd.response[0] = self.ready_status();
                }
                _ => return Err(Error::InvalidArg),
            },
            8 => return Err(Error::Timeout), // SEND_IF_COND, not an SD card
            5 => return Err(Error::Timeout),
            55 => return Err(Error::Timeout), // no application commands
            1 => {
                let mut ocr = 0x00FF_8000 | (0x2 << 29);
                if self.op_cond_polls > 0 {
                    self.op_cond_polls -= 1;
                } else {
                    ocr |= 1 << 31;
                }
                cmd.response[0] = ocr;
            }
            2 => cmd.response = self.cid_words(),
            3 => {
                self.rca = (cmd.arg >> 16) as u16;
                cmd.response[0] = self.ready_status();
            }
            9 => {
                if self.selected {
                    return Err(Error::InvalidResponse);
                }
                cmd.response = self.csd_words();
            }
            7 => self.selected = cmd.arg >> 16 == self.rca as u32,
            6 => {
                self.switch(cmd.arg)?;
                cmd.response[0] = self.ready_status();
            }
            13 => cmd.response[0] = self.ready_status(),
            17 | 18 | 24 | 25 => return self.data_transfer(cmd),
            12 => cmd.response[0] = self.ready_status(),
            _ => return Err(Error::Timeout),
        }
        Ok(())
    }

    fn get_bus_width(&self, _slot: u8) -> BusWidth {
        BusWidth::Width4
    }

    fn set_bus_width(&mut self, _slot: u8, width: BusWidth) -> Result<(), Error> {
        self.bus_width_set = Some(width);
        Ok(())
    }

    fn set_bus_ddr_mode(&mut self, _slot: u8, _ddr: bool) -> Result<(), Error> {
        Ok(())
    }

    fn set_card_clk(&mut self, _slot: u8, freq_khz: u32) -> Result<(), Error> {
        self.clock_khz_set = Some(freq_khz);
        Ok(())
    }

    fn io_int_enable(&mut self, _slot: u8) -> Result<(), Error> {
        Ok(())
    }

    fn io_int_wait(&mut self, _slot: u8, _timeout_ms: u32) -> Result<(), Error> {
        Err(Error::Timeout)
    }
}

/// SDIO-only card: CMD52/CMD53 against a flat register space with a CIS
pub struct IoCardHost {
    pub regs: Vec<u8>,
    pub cmd_log: CmdLog,
    /// (block_mode, byte length) of every CMD53 seen
    pub transfers: Rc<RefCell<Vec<(bool, usize)>>>,
    rca: u16,
}

pub const IO_CIS_BASE: u32 = 0x1000;

impl IoCardHost {
    pub fn new() -> Self {
        let mut regs = vec![0u8; 0x2_0000];
        // CIS pointer at CCCR 0x09-0x0B
        regs[0x09] = (IO_CIS_BASE & 0xFF) as u8;
        regs[0x0A] = (IO_CIS_BASE >> 8 & 0xFF) as u8;
        regs[0x0B] = (IO_CIS_BASE >> 16 & 0xFF) as u8;
        // High-speed supported (SHS)
        regs[0x13] = 0x01;
        let cis = [
            0x20u8, 4, 0x96, 0x02, 0x47, 0x43, // MANFID
            0x21, 1, 0x0C, // FUNCID
            0xFF, // END
        ];
        regs[IO_CIS_BASE as usize..IO_CIS_BASE as usize + cis.len()].copy_from_slice(&cis);
        IoCardHost {
            regs,
            cmd_log: Rc::new(RefCell::new(Vec::new())),
            transfers: Rc::new(RefCell::new(Vec::new())),
            rca: 0x0001,
        }
    }

    fn cmd52(&mut self, cmd: &mut Command) -> Result<(), Error> {
        let write = cmd.arg >> 31 != 0;
        let raw = cmd.arg >> 27 & 1 != 0;
        let reg = (cmd.arg >> 9 & 0x1_FFFF) as usize;
        let data = (cmd.arg & 0xFF) as u8;
        if write {
            self.regs[reg] = data;
            cmd.response[0] = if raw { self.regs[reg] as u32 } else { 0 };
        } else {
            cmd.response[0] = self.regs[reg] as u32;
        }
        Ok(())
    }

    fn cmd53(&mut self, cmd: &mut Command) -> Result<(), Error> {
        let write = cmd.arg >> 31 != 0;
        let block_mode = cmd.arg >> 27 & 1 != 0;
        let increment = cmd.arg >> 26 & 1 != 0;
        let reg = (cmd.arg >> 9 & 0x1_FFFF) as usize;
        let count = (cmd.arg & 0x1FF) as usize;
        let len = match cmd.data.as_ref() {
            Some(data) => data.len(),
            None => return Err(Error::InvalidArg),
        };
        // The argument count must be consistent with the buffer
        let expect = if block_mode {
            count * cmd.block_len
        } else if count == 0 {
            512
        } else {
            count
        };
        if expect != len || !increment {
            return Err(Error::InvalidArg);
        }
        self.transfers.borrow_mut().push((block_mode, len));
        match cmd.data.as_mut() {
            Some(DataBuffer::Read(buf)) => {
                buf.copy_from_slice(&self.regs[reg..reg + len]);
            }
            Some(DataBuffer::Write(buf)) => {
                self.regs[reg..reg + len].copy_from_slice(buf);
            }
            None => return Err(Error::InvalidArg),
        }
        Ok(())
    }
}

impl DelayMs<u32> for IoCardHost {
    fn delay_ms(&mut self, _ms: u32) {}
}

impl Host for IoCardHost {
    fn init(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn do_transaction(&mut self, _slot: u8, cmd: &mut Command) -> Result<(), Error> {
        self.cmd_log.borrow_mut().push(cmd.opcode);
        match cmd.opcode {
            0 => {}
            8 => return Err(Error::Timeout), // not a memory card
            5 => {
                // IO ready, one function, no memory portion
                cmd.response[0] = (1 << 31) | (1 << 28) | 0x00FF_8000;
            }
            3 => cmd.response[0] = (self.rca as u32) << 16,
            7 => {}
            52 => return self.cmd52(cmd),
            53 => return self.cmd53(cmd),
            _ => return Err(Error::Timeout),
        }
        Ok(())
    }

    fn get_bus_width(&self, _slot: u8) -> BusWidth {
        BusWidth::Width4
    }

    fn set_bus_width(&mut self, _slot: u8, _width: BusWidth) -> Result<(), Error> {
        Ok(())
    }

    fn set_bus_ddr_mode(&mut self, _slot: u8, _ddr: bool) -> Result<(), Error> {
        Ok(())
    }

    fn set_card_clk(&mut self, _slot: u8, _freq_khz: u32) -> Result<(), Error> {
        Ok(())
    }

    fn io_int_enable(&mut self, _slot: u8) -> Result<(), Error> {
        Ok(())
    }

    fn io_int_wait(&mut self, _slot: u8, _timeout_ms: u32) -> Result<(), Error> {
        Ok(())
    }
}
