use std::fmt;

use thiserror::Error;

// Flag bits in F. The low nibble always reads as zero.
const FLAG_Z: u8 = 0x80;
const FLAG_N: u8 = 0x40;
const FLAG_H: u8 = 0x20;
const FLAG_C: u8 = 0x10;

// Interrupt vectors, in service-priority order.
const VECTOR_VBLANK: u16 = 0x40;
const VECTOR_LCD: u16 = 0x48;
const VECTOR_TIMER: u16 = 0x50;
const VECTOR_SERIAL: u16 = 0x58;
const VECTOR_JOYPAD: u16 = 0x60;

const IF_ADDR: u16 = 0xFF0F;
const IE_ADDR: u16 = 0xFFFF;

/// What the CPU needs from the rest of the machine: byte access plus the
/// few machine lines STOP consults. `Mmu` implements this for real runs;
/// tests drive the CPU over a flat 64 KiB array.
pub trait Bus {
    fn read8(&mut self, addr: u16) -> u8;
    fn write8(&mut self, addr: u16, val: u8);

    /// True while any selected joypad line reads low.
    fn button_held(&self) -> bool {
        false
    }

    /// KEY1 bit 0: a CGB speed switch has been requested.
    fn speed_switch_armed(&self) -> bool {
        false
    }

    /// Complete an armed speed switch: clear the arm bit, flip KEY1 bit 7.
    fn perform_speed_switch(&mut self) {}

    /// STOP resets the whole internal divider.
    fn reset_div(&mut self) {}
}

/// Fatal execution errors. These stop emulation; they are reported with a
/// register dump and never retried.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CpuError {
    #[error("illegal opcode {opcode:#04x} at {pc:#06x}")]
    IllegalOpcode { opcode: u8, pc: u16 },
    #[error("invalid STOP at {pc:#06x}: speed switch armed with an interrupt pending and IME clear")]
    InvalidStop { pc: u16 },
}

/// Register snapshot attached to fault reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDump {
    pub af: u16,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub sp: u16,
    pub pc: u16,
    pub ime: bool,
}

impl fmt::Display for RegisterDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AF:{:04X} BC:{:04X} DE:{:04X} HL:{:04X} SP:{:04X} PC:{:04X} IME:{}",
            self.af,
            self.bc,
            self.de,
            self.hl,
            self.sp,
            self.pc,
            if self.ime { '1' } else { '0' },
        )
    }
}

pub struct Cpu {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub pc: u16,
    pub sp: u16,
    pub ime: bool,
    pub halted: bool,
    pub stopped: bool,
    pub double_speed: bool,
    halt_bug: bool,
    ime_enable_delay: u8,
    /// M-cycles consumed by the step in progress.
    m: u32,
}

impl Cpu {
    /// CPU in the DMG post-boot register state.
    pub fn new() -> Self {
        Self {
            a: 0x01,
            f: 0xB0,
            b: 0x00,
            c: 0x13,
            d: 0x00,
            e: 0xD8,
            h: 0x01,
            l: 0x4D,
            pc: 0x0100,
            sp: 0xFFFE,
            ime: false,
            halted: false,
            stopped: false,
            double_speed: false,
            halt_bug: false,
            ime_enable_delay: 0,
            m: 0,
        }
    }

    /// CPU in the CGB post-boot register state.
    pub fn new_cgb() -> Self {
        Self {
            a: 0x11,
            f: 0x80,
            b: 0x00,
            c: 0x00,
            d: 0x00,
            e: 0x08,
            h: 0x00,
            l: 0x7C,
            ..Self::new()
        }
    }

    pub fn af(&self) -> u16 {
        ((self.a as u16) << 8) | (self.f & 0xF0) as u16
    }

    pub fn set_af(&mut self, val: u16) {
        self.a = (val >> 8) as u8;
        self.f = val as u8 & 0xF0;
    }

    pub fn bc(&self) -> u16 {
        ((self.b as u16) << 8) | self.c as u16
    }

    pub fn set_bc(&mut self, val: u16) {
        self.b = (val >> 8) as u8;
        self.c = val as u8;
    }

    pub fn de(&self) -> u16 {
        ((self.d as u16) << 8) | self.e as u16
    }

    pub fn set_de(&mut self, val: u16) {
        self.d = (val >> 8) as u8;
        self.e = val as u8;
    }

    pub fn hl(&self) -> u16 {
        ((self.h as u16) << 8) | self.l as u16
    }

    pub fn set_hl(&mut self, val: u16) {
        self.h = (val >> 8) as u8;
        self.l = val as u8;
    }

    pub fn dump(&self) -> RegisterDump {
        RegisterDump {
            af: self.af(),
            bc: self.bc(),
            de: self.de(),
            hl: self.hl(),
            sp: self.sp,
            pc: self.pc,
            ime: self.ime,
        }
    }

    /// Execute one instruction (or service one interrupt) and return the
    /// cycle count consumed, always a multiple of 4.
    pub fn step(&mut self, bus: &mut impl Bus) -> Result<u32, CpuError> {
        self.m = 0;

        if self.stopped {
            if bus.button_held() || self.pending_interrupts(bus) & 0x10 != 0 {
                self.stopped = false;
            }
            self.m = 1;
            return Ok(self.m * 4);
        }

        if self.halted {
            let pending = self.pending_interrupts(bus);
            if pending == 0 {
                self.m = 1;
                return Ok(4);
            }
            self.halted = false;
            if self.ime {
                self.service_interrupt(bus, pending);
                return Ok(self.m * 4);
            }
            self.m = 1;
            return Ok(4);
        }

        if self.ime {
            let pending = self.pending_interrupts(bus);
            if pending != 0 {
                self.service_interrupt(bus, pending);
                return Ok(self.m * 4);
            }
        }

        let enable_after = self.ime_enable_delay == 1;
        let start_pc = self.pc;
        let opcode = if self.halt_bug {
            // The byte after HALT is fetched without advancing pc, so the
            // next step decodes it again.
            self.halt_bug = false;
            self.read8(bus, self.pc)
        } else {
            self.fetch8(bus)
        };

        if let Err(err) = self.execute(bus, opcode) {
            // Leave pc on the faulting instruction so the register dump
            // attached to the fault points at it.
            self.pc = start_pc;
            return Err(err);
        }

        if enable_after && self.ime_enable_delay > 0 {
            self.ime = true;
        }
        if self.ime_enable_delay > 0 {
            self.ime_enable_delay -= 1;
        }

        Ok(self.m * 4)
    }

    fn pending_interrupts(&mut self, bus: &mut impl Bus) -> u8 {
        (bus.read8(IF_ADDR) & bus.read8(IE_ADDR)) & 0x1F
    }

    fn next_interrupt(pending: u8) -> (u8, u16) {
        if pending & 0x01 != 0 {
            (0x01, VECTOR_VBLANK)
        } else if pending & 0x02 != 0 {
            (0x02, VECTOR_LCD)
        } else if pending & 0x04 != 0 {
            (0x04, VECTOR_TIMER)
        } else if pending & 0x08 != 0 {
            (0x08, VECTOR_SERIAL)
        } else {
            (0x10, VECTOR_JOYPAD)
        }
    }

    /// 20 cycles total: two idle M-cycles, two pushing pc, one loading the
    /// handler vector.
    fn service_interrupt(&mut self, bus: &mut impl Bus, pending: u8) {
        let (bit, vector) = Self::next_interrupt(pending);
        self.ime = false;
        self.ime_enable_delay = 0;
        let if_reg = bus.read8(IF_ADDR);
        bus.write8(IF_ADDR, if_reg & !bit);
        self.m += 2;
        self.push16(bus, self.pc);
        self.pc = vector;
        self.m += 1;
    }

    #[inline(always)]
    fn fetch8(&mut self, bus: &mut impl Bus) -> u8 {
        let val = bus.read8(self.pc);
        self.pc = self.pc.wrapping_add(1);
        self.m += 1;
        val
    }

    #[inline(always)]
    fn fetch16(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = self.fetch8(bus) as u16;
        let hi = self.fetch8(bus) as u16;
        (hi << 8) | lo
    }

    #[inline(always)]
    fn read8(&mut self, bus: &mut impl Bus, addr: u16) -> u8 {
        self.m += 1;
        bus.read8(addr)
    }

    #[inline(always)]
    fn write8(&mut self, bus: &mut impl Bus, addr: u16, val: u8) {
        self.m += 1;
        bus.write8(addr, val);
    }

    fn push16(&mut self, bus: &mut impl Bus, val: u16) {
        self.sp = self.sp.wrapping_sub(1);
        self.write8(bus, self.sp, (val >> 8) as u8);
        self.sp = self.sp.wrapping_sub(1);
        self.write8(bus, self.sp, val as u8);
    }

    fn pop16(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = self.read8(bus, self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        let hi = self.read8(bus, self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        (hi << 8) | lo
    }

    /// Operand source/destination index 0..=7: B,C,D,E,H,L,(HL),A.
    fn read_r(&mut self, bus: &mut impl Bus, index: u8) -> u8 {
        match index {
            0 => self.b,
            1 => self.c,
            2 => self.d,
            3 => self.e,
            4 => self.h,
            5 => self.l,
            6 => self.read8(bus, self.hl()),
            7 => self.a,
            _ => unreachable!(),
        }
    }

    fn write_r(&mut self, bus: &mut impl Bus, index: u8, val: u8) {
        match index {
            0 => self.b = val,
            1 => self.c = val,
            2 => self.d = val,
            3 => self.e = val,
            4 => self.h = val,
            5 => self.l = val,
            6 => {
                let addr = self.hl();
                self.write8(bus, addr, val);
            }
            7 => self.a = val,
            _ => unreachable!(),
        }
    }

    fn flag_c(&self) -> u8 {
        if self.f & FLAG_C != 0 { 1 } else { 0 }
    }

    fn inc_r(&mut self, bus: &mut impl Bus, index: u8) {
        let old = self.read_r(bus, index);
        let res = old.wrapping_add(1);
        self.f = (self.f & FLAG_C)
            | if res == 0 { FLAG_Z } else { 0 }
            | if (old & 0x0F) + 1 > 0x0F { FLAG_H } else { 0 };
        self.write_r(bus, index, res);
    }

    fn dec_r(&mut self, bus: &mut impl Bus, index: u8) {
        let old = self.read_r(bus, index);
        let res = old.wrapping_sub(1);
        self.f = (self.f & FLAG_C)
            | FLAG_N
            | if res == 0 { FLAG_Z } else { 0 }
            | if old & 0x0F == 0 { FLAG_H } else { 0 };
        self.write_r(bus, index, res);
    }

    fn add_a(&mut self, val: u8, carry_in: u8) {
        let (res1, carry1) = self.a.overflowing_add(val);
        let (res, carry2) = res1.overflowing_add(carry_in);
        self.f = if res == 0 { FLAG_Z } else { 0 }
            | if (self.a & 0x0F) + (val & 0x0F) + carry_in > 0x0F {
                FLAG_H
            } else {
                0
            }
            | if carry1 || carry2 { FLAG_C } else { 0 };
        self.a = res;
    }

    fn sub_a(&mut self, val: u8, carry_in: u8, keep_result: bool) {
        let (res1, borrow1) = self.a.overflowing_sub(val);
        let (res, borrow2) = res1.overflowing_sub(carry_in);
        self.f = FLAG_N
            | if res == 0 { FLAG_Z } else { 0 }
            | if (self.a & 0x0F) < (val & 0x0F) + carry_in {
                FLAG_H
            } else {
                0
            }
            | if borrow1 || borrow2 { FLAG_C } else { 0 };
        if keep_result {
            self.a = res;
        }
    }

    fn and_a(&mut self, val: u8) {
        self.a &= val;
        self.f = if self.a == 0 { FLAG_Z } else { 0 } | FLAG_H;
    }

    fn xor_a(&mut self, val: u8) {
        self.a ^= val;
        self.f = if self.a == 0 { FLAG_Z } else { 0 };
    }

    fn or_a(&mut self, val: u8) {
        self.a |= val;
        self.f = if self.a == 0 { FLAG_Z } else { 0 };
    }

    /// ALU group selector for opcode rows 0x80-0xBF and the d8 column.
    fn alu(&mut self, op: u8, val: u8) {
        match op {
            0 => self.add_a(val, 0),
            1 => self.add_a(val, self.flag_c()),
            2 => self.sub_a(val, 0, true),
            3 => self.sub_a(val, self.flag_c(), true),
            4 => self.and_a(val),
            5 => self.xor_a(val),
            6 => self.or_a(val),
            _ => self.sub_a(val, 0, false),
        }
    }

    fn add_hl(&mut self, val: u16) {
        let hl = self.hl();
        let res = hl.wrapping_add(val);
        self.f = (self.f & FLAG_Z)
            | if ((hl & 0x0FFF) + (val & 0x0FFF)) & 0x1000 != 0 {
                FLAG_H
            } else {
                0
            }
            | if (hl as u32 + val as u32) > 0xFFFF {
                FLAG_C
            } else {
                0
            };
        self.set_hl(res);
        self.m += 1;
    }

    /// ADD SP,e8 / LD HL,SP+e8: H and C come from the low byte, Z and N
    /// are always clear.
    fn sp_offset(&mut self, bus: &mut impl Bus) -> u16 {
        let val = self.fetch8(bus) as i8 as i16 as u16;
        let sp = self.sp;
        self.f = if ((sp & 0x0F) + (val & 0x0F)) > 0x0F {
            FLAG_H
        } else {
            0
        } | if ((sp & 0xFF) + (val & 0xFF)) > 0xFF {
            FLAG_C
        } else {
            0
        };
        sp.wrapping_add(val)
    }

    /// Condition code index 0..=3: NZ, Z, NC, C.
    fn condition(&self, index: u8) -> bool {
        match index {
            0 => self.f & FLAG_Z == 0,
            1 => self.f & FLAG_Z != 0,
            2 => self.f & FLAG_C == 0,
            _ => self.f & FLAG_C != 0,
        }
    }

    fn jr(&mut self, bus: &mut impl Bus, taken: bool) {
        let offset = self.fetch8(bus) as i8;
        if taken {
            self.pc = self.pc.wrapping_add(offset as u16);
            self.m += 1;
        }
    }

    fn jp(&mut self, bus: &mut impl Bus, taken: bool) {
        let addr = self.fetch16(bus);
        if taken {
            self.pc = addr;
            self.m += 1;
        }
    }

    fn call(&mut self, bus: &mut impl Bus, taken: bool) {
        let addr = self.fetch16(bus);
        if taken {
            self.m += 1;
            self.push16(bus, self.pc);
            self.pc = addr;
        }
    }

    fn ret_cc(&mut self, bus: &mut impl Bus, taken: bool) {
        self.m += 1;
        if taken {
            self.pc = self.pop16(bus);
            self.m += 1;
        }
    }

    fn daa(&mut self) {
        let mut correction = 0u8;
        let mut carry = false;
        if self.f & FLAG_H != 0 || (self.f & FLAG_N == 0 && self.a & 0x0F > 9) {
            correction |= 0x06;
        }
        if self.f & FLAG_C != 0 || (self.f & FLAG_N == 0 && self.a > 0x99) {
            correction |= 0x60;
            carry = true;
        }
        if self.f & FLAG_N == 0 {
            self.a = self.a.wrapping_add(correction);
        } else {
            self.a = self.a.wrapping_sub(correction);
        }
        self.f = if self.a == 0 { FLAG_Z } else { 0 }
            | (self.f & FLAG_N)
            | if carry { FLAG_C } else { 0 };
    }

    fn halt(&mut self, bus: &mut impl Bus) {
        let pending = self.pending_interrupts(bus);
        if !self.ime && pending != 0 && self.ime_enable_delay == 0 {
            self.halt_bug = true;
        } else {
            self.halted = true;
        }
    }

    /// STOP branches on the joypad lines, pending interrupts, and an armed
    /// KEY1 speed switch. A held button keeps the divider intact; every
    /// other branch resets it.
    fn stop(&mut self, bus: &mut impl Bus) -> Result<(), CpuError> {
        let pending = self.pending_interrupts(bus) != 0;
        if bus.button_held() {
            if !pending {
                self.halted = true;
            }
            return Ok(());
        }
        if bus.speed_switch_armed() {
            if pending {
                if !self.ime {
                    return Err(CpuError::InvalidStop {
                        pc: self.pc.wrapping_sub(1),
                    });
                }
                bus.reset_div();
                bus.perform_speed_switch();
                self.double_speed = !self.double_speed;
            } else {
                let _ = self.fetch8(bus);
                bus.reset_div();
                bus.perform_speed_switch();
                self.double_speed = !self.double_speed;
                self.halted = true;
            }
            return Ok(());
        }
        if !pending {
            let _ = self.fetch8(bus);
        }
        bus.reset_div();
        self.stopped = true;
        Ok(())
    }

    fn execute(&mut self, bus: &mut impl Bus, opcode: u8) -> Result<(), CpuError> {
        match opcode {
            0x00 => {}
            0x10 => self.stop(bus)?,
            0x76 => self.halt(bus),

            // 16-bit loads
            0x01 => {
                let val = self.fetch16(bus);
                self.set_bc(val);
            }
            0x11 => {
                let val = self.fetch16(bus);
                self.set_de(val);
            }
            0x21 => {
                let val = self.fetch16(bus);
                self.set_hl(val);
            }
            0x31 => self.sp = self.fetch16(bus),
            0x08 => {
                let addr = self.fetch16(bus);
                self.write8(bus, addr, self.sp as u8);
                self.write8(bus, addr.wrapping_add(1), (self.sp >> 8) as u8);
            }
            0xF9 => {
                self.sp = self.hl();
                self.m += 1;
            }

            // A <-> (rr) loads
            0x02 => self.write8(bus, self.bc(), self.a),
            0x12 => self.write8(bus, self.de(), self.a),
            0x22 => {
                let addr = self.hl();
                self.write8(bus, addr, self.a);
                self.set_hl(addr.wrapping_add(1));
            }
            0x32 => {
                let addr = self.hl();
                self.write8(bus, addr, self.a);
                self.set_hl(addr.wrapping_sub(1));
            }
            0x0A => self.a = self.read8(bus, self.bc()),
            0x1A => self.a = self.read8(bus, self.de()),
            0x2A => {
                let addr = self.hl();
                self.a = self.read8(bus, addr);
                self.set_hl(addr.wrapping_add(1));
            }
            0x3A => {
                let addr = self.hl();
                self.a = self.read8(bus, addr);
                self.set_hl(addr.wrapping_sub(1));
            }

            // 16-bit inc/dec
            0x03 => {
                let val = self.bc().wrapping_add(1);
                self.set_bc(val);
                self.m += 1;
            }
            0x13 => {
                let val = self.de().wrapping_add(1);
                self.set_de(val);
                self.m += 1;
            }
            0x23 => {
                let val = self.hl().wrapping_add(1);
                self.set_hl(val);
                self.m += 1;
            }
            0x33 => {
                self.sp = self.sp.wrapping_add(1);
                self.m += 1;
            }
            0x0B => {
                let val = self.bc().wrapping_sub(1);
                self.set_bc(val);
                self.m += 1;
            }
            0x1B => {
                let val = self.de().wrapping_sub(1);
                self.set_de(val);
                self.m += 1;
            }
            0x2B => {
                let val = self.hl().wrapping_sub(1);
                self.set_hl(val);
                self.m += 1;
            }
            0x3B => {
                self.sp = self.sp.wrapping_sub(1);
                self.m += 1;
            }

            // 8-bit inc/dec, including (HL)
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => {
                self.inc_r(bus, (opcode >> 3) & 0x07);
            }
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => {
                self.dec_r(bus, (opcode >> 3) & 0x07);
            }

            // LD r,d8
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E => {
                let val = self.fetch8(bus);
                self.write_r(bus, (opcode >> 3) & 0x07, val);
            }

            // Accumulator rotates always clear Z.
            0x07 => {
                let carry = self.a & 0x80 != 0;
                self.a = self.a.rotate_left(1);
                self.f = if carry { FLAG_C } else { 0 };
            }
            0x0F => {
                let carry = self.a & 0x01 != 0;
                self.a = self.a.rotate_right(1);
                self.f = if carry { FLAG_C } else { 0 };
            }
            0x17 => {
                let carry = self.a & 0x80 != 0;
                self.a = (self.a << 1) | self.flag_c();
                self.f = if carry { FLAG_C } else { 0 };
            }
            0x1F => {
                let carry = self.a & 0x01 != 0;
                self.a = (self.a >> 1) | (self.flag_c() << 7);
                self.f = if carry { FLAG_C } else { 0 };
            }

            // ADD HL,rr
            0x09 => self.add_hl(self.bc()),
            0x19 => self.add_hl(self.de()),
            0x29 => self.add_hl(self.hl()),
            0x39 => self.add_hl(self.sp),

            // Relative jumps
            0x18 => self.jr(bus, true),
            0x20 | 0x28 | 0x30 | 0x38 => {
                let taken = self.condition((opcode >> 3) & 0x03);
                self.jr(bus, taken);
            }

            0x27 => self.daa(),
            0x2F => {
                self.a ^= 0xFF;
                self.f = (self.f & (FLAG_Z | FLAG_C)) | FLAG_N | FLAG_H;
            }
            0x37 => self.f = (self.f & FLAG_Z) | FLAG_C,
            0x3F => self.f = (self.f & FLAG_Z) | ((self.f & FLAG_C) ^ FLAG_C),

            // LD r,r'
            0x40..=0x7F => {
                let val = self.read_r(bus, opcode & 0x07);
                self.write_r(bus, (opcode >> 3) & 0x07, val);
            }

            // ALU A,r
            0x80..=0xBF => {
                let val = self.read_r(bus, opcode & 0x07);
                self.alu((opcode >> 3) & 0x07, val);
            }

            // ALU A,d8
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let val = self.fetch8(bus);
                self.alu((opcode >> 3) & 0x07, val);
            }

            // Returns
            0xC0 | 0xC8 | 0xD0 | 0xD8 => {
                let taken = self.condition((opcode >> 3) & 0x03);
                self.ret_cc(bus, taken);
            }
            0xC9 => {
                self.pc = self.pop16(bus);
                self.m += 1;
            }
            0xD9 => {
                self.pc = self.pop16(bus);
                self.ime = true;
                self.m += 1;
            }

            // Absolute jumps and calls
            0xC3 => self.jp(bus, true),
            0xC2 | 0xCA | 0xD2 | 0xDA => {
                let taken = self.condition((opcode >> 3) & 0x03);
                self.jp(bus, taken);
            }
            0xE9 => self.pc = self.hl(),
            0xCD => self.call(bus, true),
            0xC4 | 0xCC | 0xD4 | 0xDC => {
                let taken = self.condition((opcode >> 3) & 0x03);
                self.call(bus, taken);
            }
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                self.m += 1;
                self.push16(bus, self.pc);
                self.pc = (opcode & 0x38) as u16;
            }

            // Stack ops
            0xC1 => {
                let val = self.pop16(bus);
                self.set_bc(val);
            }
            0xD1 => {
                let val = self.pop16(bus);
                self.set_de(val);
            }
            0xE1 => {
                let val = self.pop16(bus);
                self.set_hl(val);
            }
            0xF1 => {
                let val = self.pop16(bus);
                self.set_af(val);
            }
            0xC5 => {
                self.m += 1;
                let val = self.bc();
                self.push16(bus, val);
            }
            0xD5 => {
                self.m += 1;
                let val = self.de();
                self.push16(bus, val);
            }
            0xE5 => {
                self.m += 1;
                let val = self.hl();
                self.push16(bus, val);
            }
            0xF5 => {
                self.m += 1;
                let val = self.af();
                self.push16(bus, val);
            }

            0xCB => {
                let op = self.fetch8(bus);
                self.execute_cb(bus, op);
            }

            // High-page and absolute accumulator loads
            0xE0 => {
                let offset = self.fetch8(bus);
                self.write8(bus, 0xFF00 | offset as u16, self.a);
            }
            0xF0 => {
                let offset = self.fetch8(bus);
                self.a = self.read8(bus, 0xFF00 | offset as u16);
            }
            0xE2 => self.write8(bus, 0xFF00 | self.c as u16, self.a),
            0xF2 => self.a = self.read8(bus, 0xFF00 | self.c as u16),
            0xEA => {
                let addr = self.fetch16(bus);
                self.write8(bus, addr, self.a);
            }
            0xFA => {
                let addr = self.fetch16(bus);
                self.a = self.read8(bus, addr);
            }

            0xE8 => {
                self.sp = self.sp_offset(bus);
                self.m += 2;
            }
            0xF8 => {
                let val = self.sp_offset(bus);
                self.set_hl(val);
                self.m += 1;
            }

            0xF3 => {
                self.ime = false;
                self.ime_enable_delay = 0;
            }
            0xFB => self.ime_enable_delay = 2,

            0xD3 | 0xDB | 0xDD | 0xE3 | 0xE4 | 0xEB | 0xEC | 0xED | 0xF4 | 0xFC | 0xFD => {
                return Err(CpuError::IllegalOpcode {
                    opcode,
                    pc: self.pc.wrapping_sub(1),
                });
            }
        }
        Ok(())
    }

    fn execute_cb(&mut self, bus: &mut impl Bus, opcode: u8) {
        let r = opcode & 0x07;
        match opcode {
            // RLC
            0x00..=0x07 => {
                let val = self.read_r(bus, r);
                let res = val.rotate_left(1);
                self.write_r(bus, r, res);
                self.f = if res == 0 { FLAG_Z } else { 0 }
                    | if val & 0x80 != 0 { FLAG_C } else { 0 };
            }
            // RRC
            0x08..=0x0F => {
                let val = self.read_r(bus, r);
                let res = val.rotate_right(1);
                self.write_r(bus, r, res);
                self.f = if res == 0 { FLAG_Z } else { 0 }
                    | if val & 0x01 != 0 { FLAG_C } else { 0 };
            }
            // RL
            0x10..=0x17 => {
                let val = self.read_r(bus, r);
                let res = (val << 1) | self.flag_c();
                self.write_r(bus, r, res);
                self.f = if res == 0 { FLAG_Z } else { 0 }
                    | if val & 0x80 != 0 { FLAG_C } else { 0 };
            }
            // RR
            0x18..=0x1F => {
                let val = self.read_r(bus, r);
                let res = (val >> 1) | (self.flag_c() << 7);
                self.write_r(bus, r, res);
                self.f = if res == 0 { FLAG_Z } else { 0 }
                    | if val & 0x01 != 0 { FLAG_C } else { 0 };
            }
            // SLA
            0x20..=0x27 => {
                let val = self.read_r(bus, r);
                let res = val << 1;
                self.write_r(bus, r, res);
                self.f = if res == 0 { FLAG_Z } else { 0 }
                    | if val & 0x80 != 0 { FLAG_C } else { 0 };
            }
            // SRA keeps the sign bit.
            0x28..=0x2F => {
                let val = self.read_r(bus, r);
                let res = (val >> 1) | (val & 0x80);
                self.write_r(bus, r, res);
                self.f = if res == 0 { FLAG_Z } else { 0 }
                    | if val & 0x01 != 0 { FLAG_C } else { 0 };
            }
            // SWAP
            0x30..=0x37 => {
                let val = self.read_r(bus, r);
                let res = val.rotate_left(4);
                self.write_r(bus, r, res);
                self.f = if res == 0 { FLAG_Z } else { 0 };
            }
            // SRL
            0x38..=0x3F => {
                let val = self.read_r(bus, r);
                let res = val >> 1;
                self.write_r(bus, r, res);
                self.f = if res == 0 { FLAG_Z } else { 0 }
                    | if val & 0x01 != 0 { FLAG_C } else { 0 };
            }
            // BIT only reads; (HL) stays at 12 cycles.
            0x40..=0x7F => {
                let bit = (opcode >> 3) & 0x07;
                let val = self.read_r(bus, r);
                self.f = (self.f & FLAG_C)
                    | FLAG_H
                    | if val & (1 << bit) == 0 { FLAG_Z } else { 0 };
            }
            // RES
            0x80..=0xBF => {
                let bit = (opcode >> 3) & 0x07;
                let val = self.read_r(bus, r);
                self.write_r(bus, r, val & !(1 << bit));
            }
            // SET
            0xC0..=0xFF => {
                let bit = (opcode >> 3) & 0x07;
                let val = self.read_r(bus, r);
                self.write_r(bus, r, val | (1 << bit));
            }
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
