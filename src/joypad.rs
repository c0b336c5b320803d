/// Button matrix behind the JOYP register (0xFF00).
///
/// Bits 4 and 5 select the direction and action rows (active low). The low
/// nibble mirrors the selected rows, 0 = pressed. A press that pulls a
/// selected line from high to low requests the joypad interrupt.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Button {
    Right,
    Left,
    Up,
    Down,
    A,
    B,
    Select,
    Start,
}

impl Button {
    /// (direction row, bit); actions live on the other row.
    fn line(self) -> (bool, u8) {
        match self {
            Button::Right => (true, 0x01),
            Button::Left => (true, 0x02),
            Button::Up => (true, 0x04),
            Button::Down => (true, 0x08),
            Button::A => (false, 0x01),
            Button::B => (false, 0x02),
            Button::Select => (false, 0x04),
            Button::Start => (false, 0x08),
        }
    }
}

pub struct Joypad {
    /// Row select bits as written (bit 4 clear = directions, bit 5 clear =
    /// actions).
    select: u8,
    /// Pressed-button masks, 1 = held.
    directions: u8,
    actions: u8,
}

impl Joypad {
    pub fn new() -> Self {
        Self {
            select: 0x30,
            directions: 0,
            actions: 0,
        }
    }

    pub fn read(&self) -> u8 {
        0xC0 | self.select | (self.lines() & 0x0F)
    }

    pub fn write(&mut self, val: u8) {
        self.select = val & 0x30;
    }

    /// Low nibble of JOYP for the current row selection, active low.
    fn lines(&self) -> u8 {
        let mut held = 0;
        if self.select & 0x10 == 0 {
            held |= self.directions;
        }
        if self.select & 0x20 == 0 {
            held |= self.actions;
        }
        !held
    }

    /// True while any selected line reads low; STOP polls this.
    pub fn button_held(&self) -> bool {
        self.lines() & 0x0F != 0x0F
    }

    pub fn press(&mut self, button: Button, if_reg: &mut u8) {
        let before = self.lines() & 0x0F;
        let (direction, bit) = button.line();
        if direction {
            self.directions |= bit;
        } else {
            self.actions |= bit;
        }
        let after = self.lines() & 0x0F;
        // Interrupt on a high-to-low transition of a selected line only.
        if before & !after != 0 {
            *if_reg |= 0x10;
        }
    }

    pub fn release(&mut self, button: Button) {
        let (direction, bit) = button.line();
        if direction {
            self.directions &= !bit;
        } else {
            self.actions &= !bit;
        }
    }
}

impl Default for Joypad {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_register_reads_all_high() {
        let joypad = Joypad::new();
        assert_eq!(joypad.read(), 0xFF);
    }

    #[test]
    fn selected_row_reports_presses_active_low() {
        let mut joypad = Joypad::new();
        let mut if_reg = 0;
        joypad.press(Button::Start, &mut if_reg);
        joypad.press(Button::Left, &mut if_reg);

        joypad.write(0x10); // actions
        assert_eq!(joypad.read() & 0x0F, 0x07); // Start = bit 3 low
        joypad.write(0x20); // directions
        assert_eq!(joypad.read() & 0x0F, 0x0D); // Left = bit 1 low
    }

    #[test]
    fn press_on_selected_row_requests_interrupt() {
        let mut joypad = Joypad::new();
        let mut if_reg = 0;
        joypad.write(0x20);
        joypad.press(Button::A, &mut if_reg); // action row not selected
        assert_eq!(if_reg, 0);
        joypad.press(Button::Down, &mut if_reg);
        assert_eq!(if_reg, 0x10);
    }

    #[test]
    fn held_press_does_not_retrigger() {
        let mut joypad = Joypad::new();
        let mut if_reg = 0;
        joypad.write(0x10);
        joypad.press(Button::B, &mut if_reg);
        assert_eq!(if_reg, 0x10);
        if_reg = 0;
        joypad.press(Button::B, &mut if_reg); // line already low
        assert_eq!(if_reg, 0);
    }

    #[test]
    fn button_held_tracks_selection() {
        let mut joypad = Joypad::new();
        let mut if_reg = 0;
        joypad.press(Button::Up, &mut if_reg);
        joypad.write(0x30);
        assert!(!joypad.button_held());
        joypad.write(0x20);
        assert!(joypad.button_held());
        joypad.release(Button::Up);
        assert!(!joypad.button_held());
    }
}
