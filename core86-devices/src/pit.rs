//! Programmable interval timer (ports `0x40`-`0x43`), supplementing the
//! "Programmable Timer" collaborator: the contract alone says nothing
//! about byte protocol, so this follows the BIOS-standard configuration
//! -- channel 0, mode 2 or 3, divisor producing the familiar 18.2 Hz
//! tick.
//!
//! This is a count-down model, not a cycle-accurate one: `tick()`
//! advances the counter by a host-chosen number of PIT clocks per
//! dispatcher outer iteration (this core does not attempt cycle-accurate
//! timing) and reports whether channel 0's output transitioned, which
//! the host wires to `doirq(0)`.

use core86_hal::PortBus;

const PIT_CLOCK_HZ: u32 = 1_193_182;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessMode {
    LowByte,
    HighByte,
    LowThenHigh { low_latched: Option<u8> },
}

#[derive(Debug, Clone, Copy)]
struct Channel {
    mode: u8,
    access: AccessMode,
    reload: u16,
    counter: u16,
    output_high: bool,
}

impl Channel {
    fn new() -> Self {
        // BIOS default: mode 2 (rate generator), divisor 0 == 65536,
        // giving the canonical ~18.2 Hz tick.
        Self {
            mode: 2,
            access: AccessMode::LowThenHigh { low_latched: None },
            reload: 0,
            counter: 0,
            output_high: true,
        }
    }

    fn write_data(&mut self, value: u8) {
        match self.access {
            AccessMode::LowByte => self.reload = u16::from(value),
            AccessMode::HighByte => self.reload = u16::from(value) << 8,
            AccessMode::LowThenHigh { low_latched: None } => {
                self.access = AccessMode::LowThenHigh { low_latched: Some(value) };
                return;
            }
            AccessMode::LowThenHigh { low_latched: Some(low) } => {
                self.reload = u16::from(low) | (u16::from(value) << 8);
                self.access = AccessMode::LowThenHigh { low_latched: None };
            }
        }
        self.counter = self.reload;
    }

    /// Advances the counter by `clocks` PIT clock pulses. Returns `true`
    /// once per reload-period boundary crossed (mode 2/3 behavior: the
    /// output pulses/toggles and the counter reloads).
    fn tick(&mut self, clocks: u32) -> bool {
        let mut fired = false;
        let mut remaining = clocks;
        while remaining > 0 {
            let counter = u32::from(self.counter);
            if remaining < counter {
                self.counter -= remaining as u16;
                remaining = 0;
            } else {
                remaining -= counter;
                self.counter = self.reload;
                self.output_high = !self.output_high;
                fired = true;
            }
        }
        fired
    }
}

/// Channel 0 drives IRQ0; channels 1/2 (legacy DRAM refresh and PC
/// speaker) are modeled only enough to accept port writes without
/// faulting.
#[derive(Debug, Clone)]
pub struct Pit {
    channels: [Channel; 3],
}

impl Default for Pit {
    fn default() -> Self {
        Self::new()
    }
}

impl Pit {
    #[must_use]
    pub fn new() -> Self {
        Self { channels: [Channel::new(), Channel::new(), Channel::new()] }
    }

    fn write_mode_command(&mut self, value: u8) {
        let channel = (value >> 6) & 0b11;
        if channel > 2 {
            return; // 0b11 is the read-back command; not modeled.
        }
        let access_bits = (value >> 4) & 0b11;
        let mode = (value >> 1) & 0b111;
        let chan = &mut self.channels[channel as usize];
        chan.mode = mode;
        chan.access = match access_bits {
            0b01 => AccessMode::LowByte,
            0b10 => AccessMode::HighByte,
            _ => AccessMode::LowThenHigh { low_latched: None },
        };
    }

    /// Advances channel 0 by `clocks` PIT clock pulses; returns `true`
    /// on a rising edge the host should post as `doirq(0)`.
    pub fn tick_channel0(&mut self, clocks: u32) -> bool {
        self.channels[0].tick(clocks)
    }

    #[must_use]
    pub const fn clock_hz() -> u32 {
        PIT_CLOCK_HZ
    }

    #[must_use]
    pub const fn channel0_output_high(&self) -> bool {
        self.channels[0].output_high
    }
}

impl PortBus for Pit {
    fn out_byte(&mut self, port: u16, value: u8) {
        match port {
            0x40..=0x42 => self.channels[(port - 0x40) as usize].write_data(value),
            0x43 => self.write_mode_command(value),
            _ => {}
        }
    }

    fn in_byte(&mut self, port: u16) -> u8 {
        match port {
            0x40..=0x42 => self.channels[(port - 0x40) as usize].counter.to_le_bytes()[0],
            _ => 0xFF,
        }
    }
}
