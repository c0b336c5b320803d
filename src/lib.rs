//! Game Boy and Game Boy Color emulation core.
//!
//! [`gameboy::GameBoy`] couples the SM83 interpreter to the memory bus and
//! steps the whole machine one instruction at a time. [`emulator::Emulator`]
//! wraps a machine in a pausable run loop that paces to ~59.73 Hz and
//! reports frames, faults and bus events over a channel.

/// APU register file (no sound synthesis).
pub mod apu;
/// Cartridge header parsing, MBC banking and battery saves.
pub mod cartridge;
/// SM83 interpreter.
pub mod cpu;
/// Threaded run loop and its event channel.
pub mod emulator;
/// The assembled machine.
pub mod gameboy;
/// DMG/CGB model selection.
pub mod hardware;
/// Button matrix behind JOYP.
pub mod joypad;
/// Memory bus, interrupts and DMA engines.
pub mod mmu;
/// Scanline renderer.
pub mod ppu;
/// Link-cable serial port.
pub mod serial;
/// DIV/TIMA timer block.
pub mod timer;
/// Debug watchpoints.
pub mod watchpoints;
