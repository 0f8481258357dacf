//! MMC-specific pipeline behavior: CMD1 fallback, EXT_CSD capacity,
//! SWITCH-based high speed and bus width.

mod common;

use common::{MemCardHost, MmcCardHost, SECTOR};
use sdmmc_card::{BusWidth, Card, CardKind};

const CAPACITY: u32 = 4096;

fn mmc_card() -> Card<MmcCardHost> {
    Card::init(MmcCardHost::new(CAPACITY), MemCardHost::config(52_000)).unwrap()
}

#[test]
fn init_mmc_card() {
    let card = mmc_card();
    assert!(matches!(card.kind(), CardKind::Mmc(_)));
    assert!(card.is_mmc());
    assert!(card.is_mem());
    // MMC is assigned a fixed RCA of 1
    assert_eq!(card.rca(), 1);
    // Capacity comes from the EXT_CSD sector count, not the saturated CSD
    assert_eq!(card.capacity_blocks(), CAPACITY);
    assert!(card.uses_block_addressing());
    assert_eq!(card.cid().unwrap().name_str(), "MMCMK1");
    assert_eq!(card.ext_csd().unwrap().rev, 5);
}

#[test]
fn mmc_negotiates_52mhz_and_4bit_bus() {
    let card = mmc_card();
    assert_eq!(card.max_freq_khz(), 52_000);
    assert_eq!(card.bus_width(), BusWidth::Width4);
    let host = card.deinit().unwrap();
    assert_eq!(host.clock_khz_set, Some(52_000));
    assert_eq!(host.bus_width_set, Some(BusWidth::Width4));
    // HS_TIMING and BUS_WIDTH were switched through EXT_CSD
    assert_eq!(host.hs_timing, 1);
    assert_eq!(host.ext_csd_bus_width, 1);
}

#[test]
fn mmc_fallback_probes_cmd1_after_acmd41_fails() {
    let host = MmcCardHost::new(CAPACITY);
    let log = host.cmd_log.clone();
    let _card = Card::init(host, MemCardHost::config(52_000)).unwrap();
    let log = log.borrow();
    // The SD path was tried first (CMD55), then abandoned for CMD1
    assert!(log.contains(&55));
    assert!(log.contains(&1));
    assert!(log.iter().position(|&op| op == 1) > log.iter().position(|&op| op == 55));
}

#[test]
fn mmc_round_trip() {
    let mut card = mmc_card();
    let data: Vec<u8> = (0..2 * SECTOR).map(|i| (i * 7 % 251) as u8).collect();
    card.write_sectors(&data, 5, 2).unwrap();
    let mut readback = vec![0u8; data.len()];
    card.read_sectors(&mut readback, 5, 2).unwrap();
    assert_eq!(readback, data);
}
