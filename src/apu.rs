/// APU register file, 0xFF10-0xFF3F. Registers and wave RAM hold their
/// written values and read back through the per-register OR masks; no sound
/// is synthesized.
pub struct Apu {
    regs: [u8; 0x17],
    wave_ram: [u8; 0x10],
    powered: bool,
}

/// Unimplemented bits read as 1. Index is addr - 0xFF10.
const READ_MASK: [u8; 0x17] = [
    0x80, 0x3F, 0x00, 0xFF, 0xBF, // NR10-NR14
    0xFF, 0x3F, 0x00, 0xFF, 0xBF, // unused, NR21-NR24
    0x7F, 0xFF, 0x9F, 0xFF, 0xBF, // NR30-NR34
    0xFF, 0xFF, 0x00, 0x00, 0xBF, // unused, NR41-NR44
    0x00, 0x00, 0x70, // NR50-NR52
];

impl Apu {
    pub fn new() -> Self {
        let mut apu = Self {
            regs: [0; 0x17],
            wave_ram: [0; 0x10],
            powered: true,
        };
        apu.apply_power_on();
        apu
    }

    /// Post-boot register values.
    fn apply_power_on(&mut self) {
        const POWER_ON: [u8; 0x17] = [
            0x80, 0xBF, 0xF3, 0xFF, 0xBF, 0xFF, 0x3F, 0x00, 0xFF, 0xBF, 0x7F, 0xFF, 0x9F, 0xFF,
            0xBF, 0xFF, 0xFF, 0x00, 0x00, 0xBF, 0x77, 0xF3, 0xF1,
        ];
        self.regs = POWER_ON;
        self.powered = true;
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF10..=0xFF26 => {
                let index = (addr - 0xFF10) as usize;
                self.regs[index] | READ_MASK[index]
            }
            0xFF30..=0xFF3F => self.wave_ram[(addr & 0x0F) as usize],
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF26 => {
                // NR52 bit 7 gates the whole block; powering off clears
                // every register, powering on leaves them cleared.
                let on = val & 0x80 != 0;
                if self.powered && !on {
                    self.regs = [0; 0x17];
                }
                self.powered = on;
                self.regs[0x16] = if on { 0x80 } else { 0x00 };
            }
            0xFF10..=0xFF25 => {
                if self.powered {
                    self.regs[(addr - 0xFF10) as usize] = val;
                }
            }
            // Wave RAM ignores the power gate.
            0xFF30..=0xFF3F => self.wave_ram[(addr & 0x0F) as usize] = val,
            _ => {}
        }
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_masks_force_unused_bits_high() {
        let mut apu = Apu::new();
        apu.write(0xFF11, 0x00);
        assert_eq!(apu.read(0xFF11), 0x3F);
        apu.write(0xFF13, 0x12); // write-only
        assert_eq!(apu.read(0xFF13), 0xFF);
        assert_eq!(apu.read(0xFF15), 0xFF); // unmapped hole
    }

    #[test]
    fn power_off_clears_and_locks_registers() {
        let mut apu = Apu::new();
        apu.write(0xFF12, 0xA8);
        apu.write(0xFF26, 0x00);
        assert_eq!(apu.read(0xFF12), 0x00);
        assert_eq!(apu.read(0xFF26), 0x70);
        apu.write(0xFF12, 0x55);
        assert_eq!(apu.read(0xFF12), 0x00);
        apu.write(0xFF26, 0x80);
        apu.write(0xFF12, 0x55);
        assert_eq!(apu.read(0xFF12), 0x55);
    }

    #[test]
    fn wave_ram_survives_power_off() {
        let mut apu = Apu::new();
        apu.write(0xFF30, 0x9C);
        apu.write(0xFF26, 0x00);
        apu.write(0xFF31, 0x42);
        assert_eq!(apu.read(0xFF30), 0x9C);
        assert_eq!(apu.read(0xFF31), 0x42);
    }
}
