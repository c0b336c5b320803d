use crate::cartridge::{Cartridge, CartridgeError};
use crate::cpu::{Cpu, CpuError, RegisterDump};
use crate::hardware::Model;
use crate::joypad::Button;
use crate::mmu::{BusEvent, Mmu};

/// Dots (and single-speed cycles) per complete frame: 154 lines of 456.
pub const CYCLES_PER_FRAME: u32 = 70224;

/// One whole machine: CPU plus the bus with everything behind it.
pub struct GameBoy {
    pub cpu: Cpu,
    pub mmu: Mmu,
}

impl GameBoy {
    pub fn new(model: Model) -> Self {
        let cpu = match model {
            Model::Dmg => Cpu::new(),
            Model::Cgb => Cpu::new_cgb(),
        };
        Self {
            cpu,
            mmu: Mmu::new(model),
        }
    }

    /// Build a machine for a ROM image. `forced` overrides the header's
    /// CGB flag when set.
    pub fn with_rom(rom: Vec<u8>, forced: Option<Model>) -> Result<Self, CartridgeError> {
        let cart = Cartridge::new(rom)?;
        let model = forced.unwrap_or(Model::for_cgb_flag(cart.info().cgb));
        let mut gb = Self::new(model);
        gb.mmu.insert_cartridge(cart);
        Ok(gb)
    }

    pub fn model(&self) -> Model {
        self.mmu.model()
    }

    /// Power-cycle everything except the cartridge (battery RAM and RTC
    /// survive, as they would in hardware).
    pub fn reset(&mut self) {
        let model = self.mmu.model();
        let cart = self.mmu.cart.take();
        *self = Self::new(model);
        self.mmu.cart = cart;
    }

    /// Run one CPU step, then bring every peripheral up to date. VRAM DMA
    /// stalls are charged here so the peripherals see them as elapsed time.
    pub fn step(&mut self) -> Result<u32, CpuError> {
        let mut cycles = self.cpu.step(&mut self.mmu)?;
        cycles += self.mmu.take_dma_stall();
        let dots = if self.cpu.double_speed {
            cycles / 2
        } else {
            cycles
        };
        self.mmu.substep(cycles, dots);
        Ok(cycles)
    }

    pub fn press_button(&mut self, button: Button) {
        self.mmu.press_button(button);
    }

    pub fn release_button(&mut self, button: Button) {
        self.mmu.release_button(button);
    }

    /// The frame published at the last VBlank, if a new one is waiting.
    pub fn take_frame(&mut self) -> Option<Vec<u32>> {
        self.mmu.ppu.take_frame()
    }

    pub fn take_events(&mut self) -> Vec<BusEvent> {
        self.mmu.take_events()
    }

    /// Bytes written to the serial port since the last call.
    pub fn take_serial_output(&mut self) -> Vec<u8> {
        self.mmu.serial.take_output()
    }

    pub fn has_battery(&self) -> bool {
        self.mmu.cart.as_ref().is_some_and(Cartridge::has_battery)
    }

    pub fn save_bytes(&self) -> Option<Vec<u8>> {
        self.mmu
            .cart
            .as_ref()
            .filter(|c| c.has_battery())
            .map(Cartridge::save_bytes)
    }

    pub fn load_save_bytes(&mut self, bytes: &[u8]) {
        if let Some(cart) = self.mmu.cart.as_mut() {
            cart.load_save_bytes(bytes);
        }
    }

    pub fn register_dump(&self) -> RegisterDump {
        self.cpu.dump()
    }
}
