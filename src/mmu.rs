use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::cpu::Bus;
use crate::hardware::Model;
use crate::joypad::{Button, Joypad};
use crate::ppu::Ppu;
use crate::serial::Serial;
use crate::timer::Timer;
use crate::watchpoints::WatchpointEngine;

/// Bus-level happenings the frontend wants to hear about.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BusEvent {
    LcdEnableChanged(bool),
    SerialStarted,
}

/// OAM DMA in flight: one byte per M-cycle, 160 bytes total.
struct OamDma {
    source: u16,
    index: u16,
    cycle_acc: u32,
}

/// CGB VRAM DMA (0xFF51-0xFF55). General-purpose transfers run to
/// completion immediately; HBlank-paced ones move one 0x10-byte block per
/// HBlank entered.
struct VramDma {
    source: u16,
    dest: u16,
    blocks: u8,
    active: bool,
    cancelled: bool,
}

impl VramDma {
    fn new() -> Self {
        Self {
            source: 0,
            dest: 0,
            blocks: 0,
            active: false,
            cancelled: false,
        }
    }
}

/// Full 16-bit address decode plus the interrupt, DMA and CGB bank plumbing
/// that lives between the CPU and the peripherals.
pub struct Mmu {
    model: Model,
    pub cart: Option<Cartridge>,
    pub ppu: Ppu,
    pub timer: Timer,
    pub serial: Serial,
    pub apu: Apu,
    pub joypad: Joypad,
    pub watchpoints: WatchpointEngine,
    wram: Box<[u8; 0x8000]>,
    hram: [u8; 0x7F],
    pub if_reg: u8,
    pub ie_reg: u8,
    svbk: u8,
    key1: u8,
    dma_reg: u8,
    oam_dma: Option<OamDma>,
    vram_dma: VramDma,
    /// Cycles the CPU loses to a general-purpose VRAM DMA.
    dma_stall: u32,
    events: Vec<BusEvent>,
}

impl Mmu {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            cart: None,
            ppu: Ppu::new(model.is_cgb()),
            timer: Timer::new(),
            serial: Serial::new(model.is_cgb()),
            apu: Apu::new(),
            joypad: Joypad::new(),
            watchpoints: WatchpointEngine::new(),
            wram: Box::new([0; 0x8000]),
            hram: [0; 0x7F],
            if_reg: 0x01,
            ie_reg: 0,
            svbk: 0,
            key1: 0,
            dma_reg: 0xFF,
            oam_dma: None,
            vram_dma: VramDma::new(),
            dma_stall: 0,
            events: Vec::new(),
        }
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn insert_cartridge(&mut self, cart: Cartridge) {
        self.cart = Some(cart);
    }

    pub fn press_button(&mut self, button: Button) {
        self.joypad.press(button, &mut self.if_reg);
    }

    pub fn release_button(&mut self, button: Button) {
        self.joypad.release(button);
    }

    pub fn take_events(&mut self) -> Vec<BusEvent> {
        std::mem::take(&mut self.events)
    }

    /// Stall cycles accumulated by general-purpose VRAM DMA since the last
    /// call.
    pub fn take_dma_stall(&mut self) -> u32 {
        std::mem::take(&mut self.dma_stall)
    }

    /// Advance every clocked peripheral. `cycles` is the CPU clock, `dots`
    /// the dot clock (half the CPU clock in double speed).
    pub fn substep(&mut self, cycles: u32, dots: u32) {
        self.oam_dma_step(cycles);
        if let Some(cart) = self.cart.as_mut() {
            cart.step_rtc(cycles as u64);
        }
        self.timer.step(cycles, &mut self.if_reg);
        self.serial.step(cycles, &mut self.if_reg);
        if self.ppu.step(dots, &mut self.if_reg) {
            self.hdma_hblank_step();
        }
    }

    fn effective_wram_bank(&self) -> usize {
        if self.model.is_cgb() {
            (self.svbk & 0x07).max(1) as usize
        } else {
            1
        }
    }

    fn read_wram(&self, addr: u16) -> u8 {
        match addr & 0x1FFF {
            offset @ 0x0000..=0x0FFF => self.wram[offset as usize],
            offset => self.wram[self.effective_wram_bank() * 0x1000 + (offset as usize - 0x1000)],
        }
    }

    fn write_wram(&mut self, addr: u16, val: u8) {
        let bank = self.effective_wram_bank();
        match addr & 0x1FFF {
            offset @ 0x0000..=0x0FFF => self.wram[offset as usize] = val,
            offset => self.wram[bank * 0x1000 + (offset as usize - 0x1000)] = val,
        }
    }

    /// Plain decode without watchpoint notes; the `Bus` impl wraps this.
    pub fn read_byte(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                self.cart.as_ref().map_or(0xFF, |c| c.read(addr))
            }
            0x8000..=0x9FFF => {
                if self.ppu.vram_accessible() {
                    self.ppu.read_vram(addr)
                } else {
                    0xFF
                }
            }
            0xC000..=0xDFFF => self.read_wram(addr),
            // Echo RAM mirrors 0xC000-0xDDFF.
            0xE000..=0xFDFF => self.read_wram(addr - 0x2000),
            0xFE00..=0xFE9F => {
                if self.ppu.oam_accessible() && self.oam_dma.is_none() {
                    self.ppu.read_oam(addr)
                } else {
                    0xFF
                }
            }
            0xFEA0..=0xFEFF => 0xFF,
            0xFF00..=0xFF7F => self.read_io(addr),
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
            0xFFFF => self.ie_reg,
        }
    }

    pub fn write_byte(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                if let Some(cart) = self.cart.as_mut() {
                    cart.write(addr, val);
                }
            }
            0x8000..=0x9FFF => {
                if self.ppu.vram_accessible() {
                    self.ppu.write_vram(addr, val);
                }
            }
            0xC000..=0xDFFF => self.write_wram(addr, val),
            0xE000..=0xFDFF => self.write_wram(addr - 0x2000, val),
            0xFE00..=0xFE9F => {
                if self.ppu.oam_accessible() && self.oam_dma.is_none() {
                    self.ppu.write_oam(addr, val);
                }
            }
            0xFEA0..=0xFEFF => {}
            0xFF00..=0xFF7F => self.write_io(addr, val),
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
            0xFFFF => self.ie_reg = val,
        }
    }

    fn read_io(&self, addr: u16) -> u8 {
        let cgb = self.model.is_cgb();
        match addr {
            0xFF00 => self.joypad.read(),
            0xFF01 | 0xFF02 => self.serial.read(addr),
            0xFF04..=0xFF07 => self.timer.read(addr),
            0xFF0F => 0xE0 | self.if_reg,
            0xFF10..=0xFF3F => self.apu.read(addr),
            0xFF46 => self.dma_reg,
            0xFF40..=0xFF45 | 0xFF47..=0xFF4B | 0xFF4F | 0xFF68..=0xFF6C => {
                self.ppu.read_reg(addr)
            }
            0xFF4D if cgb => 0x7E | (self.key1 & 0x81),
            0xFF55 if cgb => self.read_hdma5(),
            0xFF70 if cgb => 0xF8 | self.svbk,
            _ => 0xFF,
        }
    }

    fn write_io(&mut self, addr: u16, val: u8) {
        let cgb = self.model.is_cgb();
        match addr {
            0xFF00 => self.joypad.write(val),
            0xFF01 | 0xFF02 => {
                if self.serial.write(addr, val) {
                    self.events.push(BusEvent::SerialStarted);
                }
            }
            0xFF04..=0xFF07 => self.timer.write(addr, val, &mut self.if_reg),
            0xFF0F => self.if_reg = val & 0x1F,
            0xFF10..=0xFF3F => self.apu.write(addr, val),
            0xFF46 => self.start_oam_dma(val),
            0xFF40 => {
                let before = self.ppu.lcd_enabled();
                self.ppu.write_reg(addr, val, &mut self.if_reg);
                let after = self.ppu.lcd_enabled();
                if before != after {
                    self.events.push(BusEvent::LcdEnableChanged(after));
                }
            }
            0xFF41..=0xFF45 | 0xFF47..=0xFF4B | 0xFF4F | 0xFF68..=0xFF6C => {
                self.ppu.write_reg(addr, val, &mut self.if_reg);
            }
            0xFF4D if cgb => self.key1 = (self.key1 & 0x80) | (val & 0x01),
            0xFF51 if cgb => self.vram_dma.source = (self.vram_dma.source & 0x00FF) | ((val as u16) << 8),
            0xFF52 if cgb => self.vram_dma.source = (self.vram_dma.source & 0xFF00) | (val & 0xF0) as u16,
            0xFF53 if cgb => self.vram_dma.dest = (self.vram_dma.dest & 0x00FF) | ((val as u16) << 8),
            0xFF54 if cgb => self.vram_dma.dest = (self.vram_dma.dest & 0xFF00) | (val & 0xF0) as u16,
            0xFF55 if cgb => self.write_hdma5(val),
            0xFF70 if cgb => self.svbk = val & 0x07,
            _ => {}
        }
    }

    fn start_oam_dma(&mut self, val: u8) {
        self.dma_reg = val;
        let mut source = (val as u16) << 8;
        // Echo-region sources read the underlying WRAM.
        if source >= 0xE000 {
            source -= 0x2000;
        }
        self.oam_dma = Some(OamDma {
            source,
            index: 0,
            cycle_acc: 0,
        });
    }

    /// Reads DMA engines do themselves, bypassing PPU access gating.
    fn dma_read(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                self.cart.as_ref().map_or(0xFF, |c| c.read(addr))
            }
            0x8000..=0x9FFF => self.ppu.read_vram(addr),
            0xC000..=0xDFFF => self.read_wram(addr),
            _ => 0xFF,
        }
    }

    fn oam_dma_step(&mut self, cycles: u32) {
        let Some(mut dma) = self.oam_dma.take() else {
            return;
        };
        dma.cycle_acc += cycles;
        while dma.cycle_acc >= 4 && dma.index < 160 {
            dma.cycle_acc -= 4;
            let byte = self.dma_read(dma.source + dma.index);
            self.ppu.write_oam(0xFE00 + dma.index, byte);
            dma.index += 1;
        }
        if dma.index < 160 {
            self.oam_dma = Some(dma);
        }
    }

    fn sanitize_vram_dma(&self) -> (u16, u16) {
        let source = self.vram_dma.source & 0xFFF0;
        let dest = 0x8000 | (self.vram_dma.dest & 0x1FF0);
        (source, dest)
    }

    fn write_hdma5(&mut self, val: u8) {
        if self.vram_dma.active && val & 0x80 == 0 {
            // Pausing an HBlank transfer keeps the remaining length.
            self.vram_dma.active = false;
            self.vram_dma.cancelled = true;
            return;
        }
        self.vram_dma.blocks = (val & 0x7F) + 1;
        self.vram_dma.cancelled = false;
        if val & 0x80 != 0 {
            self.vram_dma.active = true;
        } else {
            self.run_general_dma();
        }
    }

    fn read_hdma5(&self) -> u8 {
        if self.vram_dma.active {
            (self.vram_dma.blocks - 1) & 0x7F
        } else if self.vram_dma.cancelled {
            0x80 | (self.vram_dma.blocks.wrapping_sub(1) & 0x7F)
        } else {
            0xFF
        }
    }

    fn copy_vram_dma_block(&mut self) {
        let (source, dest) = self.sanitize_vram_dma();
        for offset in 0..0x10u16 {
            let byte = self.dma_read(source.wrapping_add(offset));
            self.ppu.write_vram(dest.wrapping_add(offset), byte);
        }
        self.vram_dma.source = source.wrapping_add(0x10);
        self.vram_dma.dest = dest.wrapping_add(0x10);
        self.vram_dma.blocks -= 1;
        // Each block costs the CPU 8 M-cycles.
        self.dma_stall += 32;
    }

    fn run_general_dma(&mut self) {
        while self.vram_dma.blocks > 0 {
            self.copy_vram_dma_block();
        }
    }

    fn hdma_hblank_step(&mut self) {
        if !self.vram_dma.active {
            return;
        }
        self.copy_vram_dma_block();
        if self.vram_dma.blocks == 0 {
            self.vram_dma.active = false;
        }
    }
}

impl Bus for Mmu {
    fn read8(&mut self, addr: u16) -> u8 {
        let val = self.read_byte(addr);
        self.watchpoints.note_read(addr, val);
        val
    }

    fn write8(&mut self, addr: u16, val: u8) {
        self.watchpoints.note_write(addr, val);
        self.write_byte(addr, val);
    }

    fn button_held(&self) -> bool {
        self.joypad.button_held()
    }

    fn speed_switch_armed(&self) -> bool {
        self.model.is_cgb() && self.key1 & 0x01 != 0
    }

    fn perform_speed_switch(&mut self) {
        self.key1 = (self.key1 ^ 0x80) & 0x80;
    }

    fn reset_div(&mut self) {
        self.timer.reset_div(&mut self.if_reg);
    }
}
