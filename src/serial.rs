/// Link-cable endpoint. The transfer exchanges a whole byte when it starts;
/// bits then shift into SB one clock at a time.
pub trait LinkPort {
    /// Hand the peer the outgoing byte and return its reply. A cable with
    /// nothing on the other end returns 0xFF.
    fn exchange(&mut self, out: u8) -> u8;
}

/// Unconnected link. In loopback mode the sent byte comes straight back,
/// which is what serial-driven test ROMs expect.
pub struct NullLinkPort {
    pub loopback: bool,
}

impl LinkPort for NullLinkPort {
    fn exchange(&mut self, out: u8) -> u8 {
        if self.loopback { out } else { 0xFF }
    }
}

/// Cycles per bit on the internal clock (8192 Hz).
const PERIOD_NORMAL: u32 = 512;
/// CGB fast clock, SC bit 1 (262144 Hz).
const PERIOD_FAST: u32 = 16;

/// SB/SC serial port. An internally clocked transfer shifts one bit per
/// period; an externally clocked one only moves on `external_clock_pulse`.
/// Completion clears SC bit 7 and requests the serial interrupt.
pub struct Serial {
    sb: u8,
    sc: u8,
    cgb: bool,
    bits_left: u8,
    incoming: u8,
    counter: u32,
    link: Box<dyn LinkPort + Send>,
    output: Vec<u8>,
}

impl Serial {
    pub fn new(cgb: bool) -> Self {
        Self {
            sb: 0,
            sc: 0,
            cgb,
            bits_left: 0,
            incoming: 0,
            counter: 0,
            link: Box::new(NullLinkPort { loopback: false }),
            output: Vec::new(),
        }
    }

    pub fn set_link(&mut self, link: Box<dyn LinkPort + Send>) {
        self.link = link;
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF01 => self.sb,
            0xFF02 => self.sc | if self.cgb { 0x7C } else { 0x7E },
            _ => 0xFF,
        }
    }

    /// Returns true when the write starts a new transfer.
    pub fn write(&mut self, addr: u16, val: u8) -> bool {
        match addr {
            0xFF01 => {
                self.sb = val;
                false
            }
            0xFF02 => {
                let started = val & 0x80 != 0 && self.sc & 0x80 == 0;
                self.sc = val & if self.cgb { 0x83 } else { 0x81 };
                if started {
                    self.begin_transfer();
                }
                started
            }
            _ => false,
        }
    }

    fn begin_transfer(&mut self) {
        self.bits_left = 8;
        self.counter = 0;
        self.output.push(self.sb);
        self.incoming = self.link.exchange(self.sb);
    }

    fn period(&self) -> u32 {
        if self.cgb && self.sc & 0x02 != 0 {
            PERIOD_FAST
        } else {
            PERIOD_NORMAL
        }
    }

    pub fn step(&mut self, cycles: u32, if_reg: &mut u8) {
        // Only the internal clock advances with time.
        if self.bits_left == 0 || self.sc & 0x01 == 0 {
            return;
        }
        self.counter += cycles;
        let period = self.period();
        while self.counter >= period && self.bits_left > 0 {
            self.counter -= period;
            self.shift_bit(if_reg);
        }
    }

    /// One externally supplied clock edge; a no-op unless an external-clock
    /// transfer is in flight.
    pub fn external_clock_pulse(&mut self, if_reg: &mut u8) {
        if self.bits_left > 0 && self.sc & 0x01 == 0 {
            self.shift_bit(if_reg);
        }
    }

    fn shift_bit(&mut self, if_reg: &mut u8) {
        self.sb = (self.sb << 1) | (self.incoming >> 7);
        self.incoming <<= 1;
        self.bits_left -= 1;
        if self.bits_left == 0 {
            self.sc &= 0x7F;
            *if_reg |= 0x08;
        }
    }

    /// Drain the bytes sent since the last call.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_transfer_completes_after_eight_periods() {
        let mut serial = Serial::new(false);
        serial.set_link(Box::new(NullLinkPort { loopback: true }));
        let mut if_reg = 0;
        serial.write(0xFF01, 0xA5);
        serial.write(0xFF02, 0x81);

        serial.step(512 * 7, &mut if_reg);
        assert_eq!(serial.read(0xFF02) & 0x80, 0x80);
        assert_eq!(if_reg, 0);

        serial.step(512, &mut if_reg);
        assert_eq!(serial.read(0xFF02) & 0x80, 0);
        assert_eq!(if_reg, 0x08);
        assert_eq!(serial.read(0xFF01), 0xA5); // loopback
        assert_eq!(serial.take_output(), vec![0xA5]);
    }

    #[test]
    fn disconnected_link_shifts_in_ff() {
        let mut serial = Serial::new(false);
        let mut if_reg = 0;
        serial.write(0xFF01, 0x3C);
        serial.write(0xFF02, 0x81);
        serial.step(512 * 8, &mut if_reg);
        assert_eq!(serial.read(0xFF01), 0xFF);
    }

    #[test]
    fn external_clock_waits_for_pulses() {
        let mut serial = Serial::new(false);
        let mut if_reg = 0;
        serial.write(0xFF01, 0x55);
        serial.write(0xFF02, 0x80);

        serial.step(512 * 100, &mut if_reg);
        assert_eq!(serial.read(0xFF02) & 0x80, 0x80);

        for _ in 0..8 {
            serial.external_clock_pulse(&mut if_reg);
        }
        assert_eq!(serial.read(0xFF02) & 0x80, 0);
        assert_eq!(if_reg, 0x08);
    }

    #[test]
    fn cgb_fast_clock_divides_period() {
        let mut serial = Serial::new(true);
        serial.set_link(Box::new(NullLinkPort { loopback: true }));
        let mut if_reg = 0;
        serial.write(0xFF01, 0x11);
        serial.write(0xFF02, 0x83);
        serial.step(16 * 8, &mut if_reg);
        assert_eq!(if_reg, 0x08);
    }
}
