use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use thiserror::Error;

/// Main clock rate in cycles per second. The cartridge RTC counts emulated
/// cycles, so game time is deterministic and stops while emulation is paused.
pub const CYCLES_PER_SECOND: u64 = 4_194_304;

/// Length of the RTC trailer appended to save bytes for timer cartridges:
/// five 4-byte registers, the same five for the latched copy, then an 8-byte
/// UNIX timestamp, all little-endian.
pub const RTC_SAVE_LEN: usize = 48;

const ROM_BANK_SIZE: usize = 0x4000;
const RAM_BANK_SIZE: usize = 0x2000;

#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("unsupported cartridge type {code:#04x}")]
    UnsupportedType { code: u8 },
    #[error("ROM image too short ({len} bytes)")]
    RomTooShort { len: usize },
}

/// Bank controller families this core implements.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MbcKind {
    None,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
}

/// Facts the core consumes from the cartridge header. Title and checksum
/// fields are left to frontends.
#[derive(Clone, Copy, Debug)]
pub struct RomInfo {
    pub cgb: bool,
    pub mbc: MbcKind,
    pub rom_banks: usize,
    pub ram_size: usize,
    pub has_battery: bool,
    pub has_timer: bool,
    pub has_rumble: bool,
}

impl RomInfo {
    pub fn parse(rom: &[u8]) -> Result<Self, CartridgeError> {
        if rom.len() < 0x150 {
            return Err(CartridgeError::RomTooShort { len: rom.len() });
        }
        let code = rom[0x147];
        let mbc = match code {
            0x00 | 0x08 | 0x09 => MbcKind::None,
            0x01..=0x03 => MbcKind::Mbc1,
            0x05 | 0x06 => MbcKind::Mbc2,
            0x0F..=0x13 => MbcKind::Mbc3,
            0x19..=0x1E => MbcKind::Mbc5,
            _ => return Err(CartridgeError::UnsupportedType { code }),
        };

        // MBC2 has 512x4-bit internal RAM regardless of the header RAM code.
        let ram_size = if mbc == MbcKind::Mbc2 {
            0x200
        } else {
            match rom[0x149] {
                0x00 => 0,
                0x01 => 0x800,
                0x02 => 0x2000,
                0x03 => 0x8000,
                0x04 => 0x20000,
                0x05 => 0x10000,
                other => {
                    warn!("unknown RAM size code {other:#04x}, assuming 8KB");
                    0x2000
                }
            }
        };

        Ok(Self {
            cgb: rom[0x143] & 0x80 != 0,
            mbc,
            rom_banks: rom.len().div_ceil(ROM_BANK_SIZE).max(1),
            ram_size,
            has_battery: matches!(code, 0x03 | 0x06 | 0x09 | 0x0F | 0x10 | 0x13 | 0x1B | 0x1E),
            has_timer: matches!(code, 0x0F | 0x10),
            has_rumble: matches!(code, 0x1C..=0x1E),
        })
    }
}

/// One set of MBC3 clock counters. Days run 0..=511; bit 8 lives in the
/// control byte next to the halt and day-overflow carry flags.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct RtcRegisters {
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub days: u16,
    pub halt: bool,
    pub carry: bool,
}

impl RtcRegisters {
    fn control_byte(&self) -> u8 {
        let mut v = ((self.days >> 8) & 0x01) as u8;
        if self.halt {
            v |= 0x40;
        }
        if self.carry {
            v |= 0x80;
        }
        v
    }

    fn set_control_byte(&mut self, val: u8) {
        self.days = (self.days & 0xFF) | (((val & 0x01) as u16) << 8);
        self.halt = val & 0x40 != 0;
        self.carry = val & 0x80 != 0;
    }
}

/// MBC3 real-time clock: live counters advanced by emulated cycles, plus a
/// snapshot frozen by the latch sequence. Exactly one of the two is visible
/// to reads at any moment, chosen by `latched`.
pub struct Rtc {
    regs: RtcRegisters,
    snapshot: RtcRegisters,
    latched: bool,
    subsecond_cycles: u64,
}

impl Rtc {
    pub fn new() -> Self {
        Self {
            regs: RtcRegisters::default(),
            snapshot: RtcRegisters::default(),
            latched: false,
            subsecond_cycles: 0,
        }
    }

    fn step(&mut self, cycles: u64) {
        if self.regs.halt {
            return;
        }
        let mut seconds = cycles / CYCLES_PER_SECOND;
        self.subsecond_cycles += cycles % CYCLES_PER_SECOND;
        if self.subsecond_cycles >= CYCLES_PER_SECOND {
            self.subsecond_cycles -= CYCLES_PER_SECOND;
            seconds += 1;
        }
        if seconds > 0 {
            self.advance_seconds(seconds);
        }
    }

    fn advance_seconds(&mut self, mut seconds: u64) {
        while seconds > 0 {
            let until_minute = self.seconds_until_minute_tick();
            if seconds < until_minute {
                self.regs.seconds = ((self.regs.seconds as u64 + seconds) & 0x3F) as u8;
                return;
            }
            seconds -= until_minute;
            self.regs.seconds = 0;
            self.minute_tick();
        }
    }

    // The 6-bit seconds register can hold 60..=63 after a direct write; such
    // values wrap to 0 without carrying into minutes.
    fn seconds_until_minute_tick(&self) -> u64 {
        let sec = self.regs.seconds as u64 & 0x3F;
        if sec <= 59 { 60 - sec } else { 64 - sec + 60 }
    }

    fn minute_tick(&mut self) {
        let carry = self.regs.minutes & 0x3F == 59;
        self.regs.minutes = (self.regs.minutes + 1) & 0x3F;
        if carry {
            self.regs.minutes = 0;
            self.hour_tick();
        }
    }

    fn hour_tick(&mut self) {
        let carry = self.regs.hours & 0x1F == 23;
        self.regs.hours = (self.regs.hours + 1) & 0x1F;
        if carry {
            self.regs.hours = 0;
            self.day_tick();
        }
    }

    fn day_tick(&mut self) {
        if self.regs.days >= 0x1FF {
            self.regs.days = 0;
            self.regs.carry = true;
        } else {
            self.regs.days += 1;
        }
    }

    /// Complete a 0x00-then-0x01 latch sequence: flips which register set is
    /// visible, snapshotting the live counters when latching.
    fn toggle_latch(&mut self) {
        self.latched = !self.latched;
        if self.latched {
            self.snapshot = self.regs;
        }
    }

    fn visible(&self) -> &RtcRegisters {
        if self.latched { &self.snapshot } else { &self.regs }
    }

    /// Read RTC register 0..=4 (S, M, H, DL, DH) with hardware bit masks.
    fn read_register(&self, index: u8) -> u8 {
        let regs = self.visible();
        match index {
            0 => regs.seconds & 0x3F,
            1 => regs.minutes & 0x3F,
            2 => regs.hours & 0x1F,
            3 => (regs.days & 0xFF) as u8,
            4 => regs.control_byte(),
            _ => 0xFF,
        }
    }

    /// Writes always target the live counters, visible or not.
    fn write_register(&mut self, index: u8, val: u8) {
        match index {
            0 => {
                self.regs.seconds = val & 0x3F;
                self.subsecond_cycles = 0;
            }
            1 => self.regs.minutes = val & 0x3F,
            2 => self.regs.hours = val & 0x1F,
            3 => self.regs.days = (self.regs.days & 0x100) | val as u16,
            4 => self.regs.set_control_byte(val),
            _ => {}
        }
    }

    fn save_block(&self, now: u64) -> [u8; RTC_SAVE_LEN] {
        fn put(regs: &RtcRegisters, out: &mut [u8]) {
            let words = [
                regs.seconds as u32,
                regs.minutes as u32,
                regs.hours as u32,
                (regs.days & 0xFF) as u32,
                regs.control_byte() as u32,
            ];
            for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
                chunk.copy_from_slice(&word.to_le_bytes());
            }
        }

        let mut out = [0u8; RTC_SAVE_LEN];
        put(&self.regs, &mut out[0..20]);
        put(&self.snapshot, &mut out[20..40]);
        out[40..48].copy_from_slice(&now.to_le_bytes());
        out
    }

    fn load_save_block(&mut self, block: &[u8], now: u64) {
        fn get(block: &[u8]) -> RtcRegisters {
            let word = |i: usize| {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(&block[i * 4..i * 4 + 4]);
                u32::from_le_bytes(bytes) as u8
            };
            let mut regs = RtcRegisters {
                seconds: word(0),
                minutes: word(1),
                hours: word(2),
                days: word(3) as u16,
                ..RtcRegisters::default()
            };
            regs.set_control_byte(word(4));
            regs
        }

        if block.len() < RTC_SAVE_LEN {
            return;
        }
        self.regs = get(&block[0..20]);
        self.snapshot = get(&block[20..40]);
        self.latched = false;
        self.subsecond_cycles = 0;

        let mut stamp = [0u8; 8];
        stamp.copy_from_slice(&block[40..48]);
        let saved_at = u64::from_le_bytes(stamp);
        if !self.regs.halt && now > saved_at {
            self.advance_seconds(now - saved_at);
        }
    }
}

impl Default for Rtc {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-variant banking state. A single read/write pair dispatches on
/// (variant, address), so unmatched combinations are compiler-checked.
enum MbcState {
    None,
    Mbc1 {
        rom_bank: u8,
        bank_hi: u8,
        ram_bank: u8,
        mode: bool,
        ram_enable: bool,
    },
    Mbc2 {
        rom_bank: u8,
        ram_enable: bool,
    },
    Mbc3 {
        rom_bank: u8,
        ram_select: u8,
        ram_enable: bool,
        latch_pending: bool,
        rtc: Option<Rtc>,
    },
    Mbc5 {
        rom_bank: u16,
        ram_bank: u8,
        ram_enable: bool,
        rumble: bool,
    },
}

pub struct Cartridge {
    rom: Vec<u8>,
    ram: Vec<u8>,
    info: RomInfo,
    mbc: MbcState,
}

impl Cartridge {
    pub fn new(rom: Vec<u8>) -> Result<Self, CartridgeError> {
        let info = RomInfo::parse(&rom)?;
        let mbc = match info.mbc {
            MbcKind::None => MbcState::None,
            MbcKind::Mbc1 => MbcState::Mbc1 {
                rom_bank: 1,
                bank_hi: 0,
                ram_bank: 0,
                mode: false,
                ram_enable: false,
            },
            MbcKind::Mbc2 => MbcState::Mbc2 {
                rom_bank: 1,
                ram_enable: false,
            },
            MbcKind::Mbc3 => MbcState::Mbc3 {
                rom_bank: 1,
                ram_select: 0,
                ram_enable: false,
                latch_pending: false,
                rtc: info.has_timer.then(Rtc::new),
            },
            MbcKind::Mbc5 => MbcState::Mbc5 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enable: false,
                rumble: false,
            },
        };
        debug!(
            "cartridge: {:?}, {} ROM banks, {} bytes RAM{}{}",
            info.mbc,
            info.rom_banks,
            info.ram_size,
            if info.has_battery { ", battery" } else { "" },
            if info.has_timer { ", timer" } else { "" },
        );
        Ok(Self {
            ram: vec![0; info.ram_size],
            rom,
            info,
            mbc,
        })
    }

    pub fn info(&self) -> &RomInfo {
        &self.info
    }

    pub fn has_battery(&self) -> bool {
        self.info.has_battery
    }

    /// Rumble motor line, driven by MBC5 RAM-bank writes on rumble carts.
    pub fn rumble_active(&self) -> bool {
        matches!(self.mbc, MbcState::Mbc5 { rumble: true, .. })
    }

    pub fn read(&self, addr: u16) -> u8 {
        match (&self.mbc, addr) {
            (MbcState::None, 0x0000..=0x7FFF) => {
                self.rom.get(addr as usize).copied().unwrap_or(0xFF)
            }
            (MbcState::None, 0xA000..=0xBFFF) => self.ram_byte(0, addr),

            (MbcState::Mbc1 { .. }, 0x0000..=0x3FFF) => self.rom_byte(0, addr),
            (MbcState::Mbc1 { rom_bank, bank_hi, .. }, 0x4000..=0x7FFF) => {
                self.rom_byte(((*bank_hi as usize) << 5) | *rom_bank as usize, addr)
            }
            (MbcState::Mbc1 { ram_enable: false, .. }, 0xA000..=0xBFFF) => 0xFF,
            (MbcState::Mbc1 { mode, ram_bank, .. }, 0xA000..=0xBFFF) => {
                self.ram_byte(if *mode { *ram_bank as usize } else { 0 }, addr)
            }

            (MbcState::Mbc2 { .. }, 0x0000..=0x3FFF) => self.rom_byte(0, addr),
            (MbcState::Mbc2 { rom_bank, .. }, 0x4000..=0x7FFF) => {
                self.rom_byte(*rom_bank as usize, addr)
            }
            (MbcState::Mbc2 { ram_enable: false, .. }, 0xA000..=0xBFFF) => 0xFF,
            (MbcState::Mbc2 { .. }, 0xA000..=0xBFFF) => {
                // 512 half-byte cells, mirrored across the window; the upper
                // nibble is not driven and reads as 1s.
                let cell = self.ram[addr as usize & 0x1FF];
                0xF0 | (cell & 0x0F)
            }

            (MbcState::Mbc3 { .. }, 0x0000..=0x3FFF) => self.rom_byte(0, addr),
            (MbcState::Mbc3 { rom_bank, .. }, 0x4000..=0x7FFF) => {
                self.rom_byte(*rom_bank as usize, addr)
            }
            (MbcState::Mbc3 { ram_enable: false, .. }, 0xA000..=0xBFFF) => 0xFF,
            (MbcState::Mbc3 { ram_select, rtc, .. }, 0xA000..=0xBFFF) => match *ram_select {
                0x00..=0x03 => self.ram_byte(*ram_select as usize, addr),
                0x08..=0x0C => rtc
                    .as_ref()
                    .map_or(0xFF, |r| r.read_register(*ram_select - 0x08)),
                _ => 0xFF,
            },

            (MbcState::Mbc5 { .. }, 0x0000..=0x3FFF) => self.rom_byte(0, addr),
            (MbcState::Mbc5 { rom_bank, .. }, 0x4000..=0x7FFF) => {
                self.rom_byte(*rom_bank as usize, addr)
            }
            (MbcState::Mbc5 { ram_enable: false, .. }, 0xA000..=0xBFFF) => 0xFF,
            (MbcState::Mbc5 { ram_bank, .. }, 0xA000..=0xBFFF) => {
                self.ram_byte(*ram_bank as usize, addr)
            }

            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        let rumble_cart = self.info.has_rumble;
        match (&mut self.mbc, addr) {
            (MbcState::None, _) => {}

            (MbcState::Mbc1 { ram_enable, .. }, 0x0000..=0x1FFF) => {
                *ram_enable = val & 0x0F == 0x0A;
            }
            (MbcState::Mbc1 { rom_bank, .. }, 0x2000..=0x3FFF) => {
                *rom_bank = (val & 0x1F).max(1);
            }
            (MbcState::Mbc1 { bank_hi, ram_bank, mode, .. }, 0x4000..=0x5FFF) => {
                // The banking mode decides which register this write feeds.
                if *mode {
                    *ram_bank = val & 0x03;
                } else {
                    *bank_hi = val & 0x03;
                }
            }
            (MbcState::Mbc1 { mode, .. }, 0x6000..=0x7FFF) => {
                *mode = val & 0x01 != 0;
            }
            (MbcState::Mbc1 { ram_enable: true, mode, ram_bank, .. }, 0xA000..=0xBFFF) => {
                let bank = if *mode { *ram_bank as usize } else { 0 };
                if let Some(idx) = ram_index(self.ram.len(), bank, addr) {
                    self.ram[idx] = val;
                }
            }
            (MbcState::Mbc1 { .. }, _) => {}

            (MbcState::Mbc2 { rom_bank, ram_enable }, 0x0000..=0x3FFF) => {
                // Address bit 8 picks the register: set selects the ROM bank,
                // clear the RAM gate.
                if addr & 0x0100 != 0 {
                    *rom_bank = (val & 0x0F).max(1);
                } else {
                    *ram_enable = val & 0x0F == 0x0A;
                }
            }
            (MbcState::Mbc2 { ram_enable: true, .. }, 0xA000..=0xBFFF) => {
                self.ram[addr as usize & 0x1FF] = val & 0x0F;
            }
            (MbcState::Mbc2 { .. }, _) => {}

            (MbcState::Mbc3 { ram_enable, .. }, 0x0000..=0x1FFF) => {
                *ram_enable = val & 0x0F == 0x0A;
            }
            (MbcState::Mbc3 { rom_bank, .. }, 0x2000..=0x3FFF) => {
                *rom_bank = (val & 0x7F).max(1);
            }
            (MbcState::Mbc3 { ram_select, .. }, 0x4000..=0x5FFF) => {
                *ram_select = val & 0x0F;
            }
            (MbcState::Mbc3 { latch_pending, rtc, .. }, 0x6000..=0x7FFF) => {
                if val == 0x00 {
                    *latch_pending = true;
                } else {
                    if val == 0x01
                        && *latch_pending
                        && let Some(rtc) = rtc.as_mut()
                    {
                        rtc.toggle_latch();
                    }
                    *latch_pending = false;
                }
            }
            (MbcState::Mbc3 { ram_enable: true, ram_select, rtc, .. }, 0xA000..=0xBFFF) => {
                match *ram_select {
                    0x00..=0x03 => {
                        if let Some(idx) =
                            ram_index(self.ram.len(), *ram_select as usize, addr)
                        {
                            self.ram[idx] = val;
                        }
                    }
                    0x08..=0x0C => {
                        if let Some(rtc) = rtc.as_mut() {
                            rtc.write_register(*ram_select - 0x08, val);
                        }
                    }
                    _ => {}
                }
            }
            (MbcState::Mbc3 { .. }, _) => {}

            (MbcState::Mbc5 { ram_enable, .. }, 0x0000..=0x1FFF) => {
                *ram_enable = val & 0x0F == 0x0A;
            }
            (MbcState::Mbc5 { rom_bank, .. }, 0x2000..=0x2FFF) => {
                *rom_bank = (*rom_bank & 0x100) | val as u16;
            }
            (MbcState::Mbc5 { rom_bank, .. }, 0x3000..=0x3FFF) => {
                *rom_bank = (*rom_bank & 0xFF) | (((val & 0x01) as u16) << 8);
            }
            (MbcState::Mbc5 { ram_bank, rumble, .. }, 0x4000..=0x5FFF) => {
                if rumble_cart {
                    *rumble = val & 0x08 != 0;
                    *ram_bank = val & 0x07;
                } else {
                    *ram_bank = val & 0x0F;
                }
            }
            (MbcState::Mbc5 { ram_enable: true, ram_bank, .. }, 0xA000..=0xBFFF) => {
                if let Some(idx) = ram_index(self.ram.len(), *ram_bank as usize, addr) {
                    self.ram[idx] = val;
                }
            }
            (MbcState::Mbc5 { .. }, _) => {}
        }
    }

    /// Advance the MBC3 clock by emulated cycles. No-op for other variants.
    pub fn step_rtc(&mut self, cycles: u64) {
        if let MbcState::Mbc3 { rtc: Some(rtc), .. } = &mut self.mbc {
            rtc.step(cycles);
        }
    }

    /// Battery-backed bytes: the RAM image, then the RTC trailer when the
    /// cartridge has a timer.
    pub fn save_bytes(&self) -> Vec<u8> {
        self.save_bytes_at(unix_now())
    }

    fn save_bytes_at(&self, now: u64) -> Vec<u8> {
        let mut out = self.ram.clone();
        if let MbcState::Mbc3 { rtc: Some(rtc), .. } = &self.mbc {
            out.extend_from_slice(&rtc.save_block(now));
        }
        out
    }

    /// Restore battery RAM and RTC state. Shape mismatches are logged and
    /// loaded best-effort; the RTC fast-forwards by the wall-clock seconds
    /// since the save was written.
    pub fn load_save_bytes(&mut self, bytes: &[u8]) {
        self.apply_save_bytes(bytes, unix_now());
    }

    fn apply_save_bytes(&mut self, bytes: &[u8], now: u64) {
        let expected =
            self.ram.len() + if self.info.has_timer { RTC_SAVE_LEN } else { 0 };
        if bytes.len() != expected {
            warn!(
                "save data is {} bytes, expected {}; loading best-effort",
                bytes.len(),
                expected
            );
        }
        let n = self.ram.len().min(bytes.len());
        let (ram_bytes, rest) = bytes.split_at(n);
        self.ram[..n].copy_from_slice(ram_bytes);
        if let MbcState::Mbc3 { rtc: Some(rtc), .. } = &mut self.mbc
            && rest.len() >= RTC_SAVE_LEN
        {
            rtc.load_save_block(&rest[..RTC_SAVE_LEN], now);
        }
    }

    fn rom_byte(&self, bank: usize, addr: u16) -> u8 {
        let bank = bank % self.info.rom_banks;
        self.rom
            .get(bank * ROM_BANK_SIZE + (addr as usize & 0x3FFF))
            .copied()
            .unwrap_or(0xFF)
    }

    fn ram_byte(&self, bank: usize, addr: u16) -> u8 {
        ram_index(self.ram.len(), bank, addr).map_or(0xFF, |idx| self.ram[idx])
    }
}

fn ram_index(ram_len: usize, bank: usize, addr: u16) -> Option<usize> {
    if ram_len == 0 {
        return None;
    }
    let banks = ram_len.div_ceil(RAM_BANK_SIZE).max(1);
    let idx = (bank % banks) * RAM_BANK_SIZE + (addr as usize - 0xA000);
    (idx < ram_len).then_some(idx)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
