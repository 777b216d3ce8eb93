//! Dual cascaded 8259-style interrupt controller: ports `0x20`/`0x21`
//! (master), `0xA0`/`0xA1` (slave), slave cascaded onto master line 2.
//! ICW/OCW decode loosely follows the real 8259's `icwstep` state
//! machine, trimmed to what the dispatcher's `doirq`/`next_intr`
//! contract actually exercises.

use core86_hal::{InterruptController, PortBus};

const SLAVE_CASCADE_LINE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IcwStep {
    Icw1,
    Icw2,
    Icw3,
    Icw4,
    Ready,
}

/// One 8-line 8259 unit: IRR (requested), ISR (in service), IMR (masked),
/// and the interrupt-vector offset loaded by ICW2.
#[derive(Debug, Clone, Copy, Default)]
struct Unit {
    irr: u8,
    isr: u8,
    imr: u8,
    icw2: u8,
    icw4_needed: bool,
    step: Option<IcwStep>,
}

impl Unit {
    fn new() -> Self {
        Self { imr: 0xFF, ..Self::default() }
    }

    fn write_command(&mut self, value: u8) {
        if value & 0x10 != 0 {
            // ICW1: bit 4 set marks the start of initialization.
            self.icw4_needed = value & 0x01 != 0;
            self.step = Some(IcwStep::Icw2);
            self.irr = 0;
            self.isr = 0;
            return;
        }

        match self.step {
            Some(IcwStep::Icw2 | IcwStep::Icw3 | IcwStep::Icw4) => {
                // Already mid-initialization: command-port writes other
                // than ICW1 don't occur here (those go through
                // `write_data` below), so treat as a stray OCW2/EOI.
                self.handle_ocw2(value);
            }
            _ => self.handle_ocw2(value),
        }
    }

    fn handle_ocw2(&mut self, value: u8) {
        // Non-specific EOI (0x20) clears the highest-priority in-service
        // bit. Specific EOI (0x60 | n) clears bit n. Everything else
        // (rotate-on-EOI variants, poll command) is accepted and ignored:
        // the dispatcher only needs EOI to unblock `next_intr`.
        if value == 0x20 {
            if let Some(bit) = highest_priority_bit(self.isr) {
                self.isr &= !(1 << bit);
            }
        } else if value & 0xE0 == 0x60 {
            let bit = value & 0x07;
            self.isr &= !(1 << bit);
        }
    }

    fn write_data(&mut self, value: u8) {
        match self.step {
            Some(IcwStep::Icw2) => {
                self.icw2 = value & 0xF8;
                self.step = Some(IcwStep::Icw3);
            }
            Some(IcwStep::Icw3) => {
                self.step = if self.icw4_needed { Some(IcwStep::Icw4) } else { Some(IcwStep::Ready) };
            }
            Some(IcwStep::Icw4) => {
                self.step = Some(IcwStep::Ready);
            }
            _ => {
                self.imr = value;
            }
        }
    }

    fn read_data(&self) -> u8 {
        self.imr
    }

    fn post(&mut self, line: u8) {
        self.irr |= 1 << (line & 0x07);
    }

    fn pending(&self) -> Option<u8> {
        highest_priority_bit(self.irr & !self.imr)
    }

    fn acknowledge(&mut self, line: u8) -> u8 {
        let bit = 1 << line;
        self.irr &= !bit;
        self.isr |= bit;
        (self.icw2 & 0xF8) + line
    }
}

fn highest_priority_bit(pending: u8) -> Option<u8> {
    if pending == 0 {
        None
    } else {
        Some(pending.trailing_zeros() as u8)
    }
}

/// The full master/slave pair, addressed at ports `0x20`/`0x21` and
/// `0xA0`/`0xA1`.
#[derive(Debug, Clone)]
pub struct Pic {
    master: Unit,
    slave: Unit,
}

impl Default for Pic {
    fn default() -> Self {
        Self::new()
    }
}

impl Pic {
    #[must_use]
    pub fn new() -> Self {
        let mut master = Unit::new();
        let mut slave = Unit::new();
        master.icw2 = 0x08; // BIOS-standard default master intoffset
        slave.icw2 = 0x70; // BIOS-standard default slave intoffset
        Self { master, slave }
    }

}

impl PortBus for Pic {
    /// Only `0x20`/`0x21`/`0xA0`/`0xA1` are claimed; every other port
    /// reads `0xFF` and ignores writes, leaving room for a composing
    /// `PortBus` to route the rest.
    fn out_byte(&mut self, port: u16, value: u8) {
        match port {
            0x20 => self.master.write_command(value),
            0x21 => self.master.write_data(value),
            0xA0 => self.slave.write_command(value),
            0xA1 => self.slave.write_data(value),
            _ => {}
        }
    }

    fn in_byte(&mut self, port: u16) -> u8 {
        match port {
            0x21 => self.master.read_data(),
            0xA1 => self.slave.read_data(),
            _ => 0xFF,
        }
    }
}

impl InterruptController for Pic {
    /// Posts IRQ `line` (0-7 on the master, 8-15 cascaded through the
    /// slave onto master line 2).
    fn doirq(&mut self, line: u8) {
        if line < 8 {
            log::trace!("pic: irq {line} posted on master");
            self.master.post(line);
        } else {
            log::trace!("pic: irq {line} posted on slave");
            self.slave.post(line - 8);
            self.master.post(SLAVE_CASCADE_LINE);
        }
    }

    /// Returns `(icw2 & 0xF8) + n` for the highest-priority unmasked IRR
    /// bit, cascading through the slave when the master's pending line
    /// is line 2.
    fn next_intr(&mut self) -> Option<u8> {
        let master_line = self.master.pending()?;
        if master_line == SLAVE_CASCADE_LINE {
            if let Some(slave_line) = self.slave.pending() {
                self.master.acknowledge(SLAVE_CASCADE_LINE);
                return Some(self.slave.acknowledge(slave_line));
            }
        }
        Some(self.master.acknowledge(master_line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmasked_irq_is_reported_with_vector_offset() {
        let mut pic = Pic::new();
        pic.out_byte(0x21, 0xFF & !0x01); // unmask IRQ0
        pic.doirq(0);
        assert_eq!(pic.next_intr(), Some(0x08));
    }

    #[test]
    fn masked_irq_is_not_reported() {
        let mut pic = Pic::new();
        pic.out_byte(0x21, 0xFF); // all masked
        pic.doirq(0);
        assert_eq!(pic.next_intr(), None);
    }

    #[test]
    fn slave_irq_cascades_through_master_line_two() {
        let mut pic = Pic::new();
        pic.out_byte(0x21, 0xFF & !(1 << 2)); // unmask master cascade line
        pic.out_byte(0xA1, 0x00); // unmask all slave lines
        pic.doirq(8); // slave IRQ0 == global IRQ8
        assert_eq!(pic.next_intr(), Some(0x70));
    }

    #[test]
    fn icw_sequence_reprograms_vector_offset() {
        let mut pic = Pic::new();
        pic.out_byte(0x20, 0x11); // ICW1, ICW4 needed
        pic.out_byte(0x21, 0x20); // ICW2: new offset 0x20
        pic.out_byte(0x21, 0x04); // ICW3 (ignored content)
        pic.out_byte(0x21, 0x01); // ICW4
        pic.out_byte(0x21, 0x00); // OCW1: unmask everything
        pic.doirq(0);
        assert_eq!(pic.next_intr(), Some(0x20));
    }
}
