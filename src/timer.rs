/// DIV/TIMA/TMA/TAC block. A 16-bit divider counts every cycle; DIV is its
/// upper byte, so it ticks once per 256 cycles. TIMA increments on falling
/// edges of the TAC-selected divider bit, which yields the 1024/16/64/256
/// cycle periods.
pub struct Timer {
    div: u16,
    tima: u8,
    tma: u8,
    tac: u8,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            div: 0,
            tima: 0,
            tma: 0,
            tac: 0,
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF04 => (self.div >> 8) as u8,
            0xFF05 => self.tima,
            0xFF06 => self.tma,
            0xFF07 => 0xF8 | self.tac,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8, if_reg: &mut u8) {
        match addr {
            0xFF04 => self.reset_div(if_reg),
            0xFF05 => self.tima = val,
            0xFF06 => self.tma = val,
            0xFF07 => self.tac = val & 0x07,
            _ => {}
        }
    }

    pub fn step(&mut self, cycles: u32, if_reg: &mut u8) {
        for _ in 0..cycles {
            let prev = self.div;
            self.div = self.div.wrapping_add(1);
            self.check_edge(prev, self.div, if_reg);
        }
    }

    /// Any write to DIV zeroes the whole internal divider. Clearing a divider
    /// whose selected bit was high produces a falling edge, so TIMA may tick.
    pub fn reset_div(&mut self, if_reg: &mut u8) {
        let prev = self.div;
        self.div = 0;
        self.check_edge(prev, 0, if_reg);
    }

    fn timer_bit(&self) -> u16 {
        match self.tac & 0x03 {
            0 => 1 << 9,
            1 => 1 << 3,
            2 => 1 << 5,
            _ => 1 << 7,
        }
    }

    fn check_edge(&mut self, prev: u16, curr: u16, if_reg: &mut u8) {
        if self.tac & 0x04 == 0 {
            return;
        }
        let bit = self.timer_bit();
        if prev & bit != 0 && curr & bit == 0 {
            self.increment_tima(if_reg);
        }
    }

    fn increment_tima(&mut self, if_reg: &mut u8) {
        let (next, overflow) = self.tima.overflowing_add(1);
        if overflow {
            // Reload and interrupt happen together; the hardware's short
            // reload delay is deliberately not modeled.
            self.tima = self.tma;
            *if_reg |= 0x04;
        } else {
            self.tima = next;
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
