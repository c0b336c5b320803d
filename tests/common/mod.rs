#![allow(dead_code)]

use dotboy::cpu::Bus;

/// Flat 64 KiB memory with scriptable machine lines, for driving the CPU
/// without the rest of the machine.
pub struct FlatBus {
    pub mem: Vec<u8>,
    pub button_held: bool,
    pub speed_armed: bool,
    pub speed_switches: u32,
    pub div_resets: u32,
}

impl FlatBus {
    pub fn new() -> Self {
        Self {
            mem: vec![0; 0x10000],
            button_held: false,
            speed_armed: false,
            speed_switches: 0,
            div_resets: 0,
        }
    }

    /// Bus with `program` loaded at 0x0100.
    pub fn with_program(program: &[u8]) -> Self {
        let mut bus = Self::new();
        bus.mem[0x0100..0x0100 + program.len()].copy_from_slice(program);
        bus
    }
}

impl Bus for FlatBus {
    fn read8(&mut self, addr: u16) -> u8 {
        self.mem[addr as usize]
    }

    fn write8(&mut self, addr: u16, val: u8) {
        self.mem[addr as usize] = val;
    }

    fn button_held(&self) -> bool {
        self.button_held
    }

    fn speed_switch_armed(&self) -> bool {
        self.speed_armed
    }

    fn perform_speed_switch(&mut self) {
        self.speed_armed = false;
        self.speed_switches += 1;
    }

    fn reset_div(&mut self) {
        self.div_resets += 1;
    }
}

/// Minimal valid ROM image: `banks` 16 KiB banks, cartridge type byte at
/// 0x147, RAM size code at 0x149. Each bank starts with its own index so
/// banking tests can tell them apart.
pub fn banked_rom(banks: usize, cart_type: u8, ram_code: u8) -> Vec<u8> {
    let mut rom = vec![0u8; banks * 0x4000];
    rom[0x147] = cart_type;
    rom[0x149] = ram_code;
    for bank in 1..banks {
        rom[bank * 0x4000] = bank as u8;
    }
    rom
}
