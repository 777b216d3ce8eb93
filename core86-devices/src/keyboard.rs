//! PS/2 keyboard controller (ports `0x60`/`0x64`) and the port-`0x92`
//! alternate A20 gate.
//!
//! Most kernel-side drivers for this controller drive a real device
//! with port writes; here `Ps2Controller` *is* the device, answering
//! the writes the dispatcher issues on the CPU's behalf.

use core86_hal::{A20Line, PortBus};
use hyperdrive::queues::ring::Ring;
use num_enum::{FromPrimitive, IntoPrimitive};
use thiserror::Error;

const SCANCODE_RING_SIZE: usize = 16;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardError {
    #[error("scan-code ring buffer is full")]
    RingFull,
}

/// Status byte bits (port `0x64` on read).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusByte(pub u8);

impl StatusByte {
    pub const OUTPUT_FULL: u8 = 1 << 0;
    pub const INPUT_FULL: u8 = 1 << 1;
    pub const SYSTEM_FLAG: u8 = 1 << 2;
    pub const COMMAND_DATA: u8 = 1 << 3;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
enum ControllerCommand {
    ReadCommandByte = 0x20,
    WriteCommandByte = 0x60,
    DisableSecondPort = 0xA7,
    EnableSecondPort = 0xA8,
    SelfTest = 0xAA,
    DisableFirstPort = 0xAD,
    EnableFirstPort = 0xAE,
    ReadOutputPort = 0xD0,
    WriteOutputPort = 0xD1,
    PulseReset = 0xFE,
    #[num_enum(catch_all)]
    Unknown(u8),
}

/// The PS/2 controller plus its attached keyboard's scan-code queue.
#[derive(Debug)]
pub struct Ps2Controller {
    command_byte: u8,
    output_port: u8,
    awaiting_data_for: Option<ControllerCommand>,
    scancodes: Ring<SCANCODE_RING_SIZE, u8>,
    a20: A20Line,
    reset_requested: bool,
}

impl Default for Ps2Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Ps2Controller {
    #[must_use]
    pub fn new() -> Self {
        Self {
            // Bit 0 (IRQ1 enable) set, translation and both ports enabled.
            command_byte: 0x01,
            output_port: 0x02, // bit 1 (A20) enabled by default.
            awaiting_data_for: None,
            scancodes: Ring::new(),
            a20: A20Line::new(true),
            reset_requested: false,
        }
    }

    #[must_use]
    pub fn a20(&self) -> &A20Line {
        &self.a20
    }

    /// Whether the last command byte written asked for a CPU reset
    /// (`0xFE`); `core86`'s dispatcher polls this and clears it after
    /// acting on it.
    #[must_use]
    pub fn take_reset_request(&mut self) -> bool {
        core::mem::take(&mut self.reset_requested)
    }

    pub fn push_scancode(&mut self, byte: u8) -> Result<(), KeyboardError> {
        self.scancodes.try_push(byte).map_err(|_| KeyboardError::RingFull)
    }

    #[must_use]
    pub fn irq1_enabled(&self) -> bool {
        self.command_byte & 0x01 != 0
    }

    #[must_use]
    pub fn status_byte(&self) -> u8 {
        let mut status = 0;
        if !self.scancodes.is_empty() {
            status |= StatusByte::OUTPUT_FULL;
        }
        if self.awaiting_data_for.is_some() {
            status |= StatusByte::COMMAND_DATA;
        }
        status |= StatusByte::SYSTEM_FLAG;
        status
    }

    /// Port `0x60` read: pops the next queued scan code.
    fn read_data(&mut self) -> u8 {
        self.scancodes.pop().unwrap_or(0)
    }

    /// Port `0x60` write: either keyboard-device data or the second
    /// byte of a two-byte controller command (`0x60`/`0xD1`).
    fn write_data(&mut self, value: u8) {
        match self.awaiting_data_for.take() {
            Some(ControllerCommand::WriteCommandByte) => self.command_byte = value,
            Some(ControllerCommand::WriteOutputPort) => {
                self.output_port = value;
                self.a20.set(value & 0x02 != 0);
            }
            _ => {
                // Data addressed directly to the keyboard device itself
                // (e.g. scancode-set select); acknowledged but otherwise
                // not modeled.
            }
        }
    }

    /// Port `0x64` write: controller command byte.
    fn write_command(&mut self, value: u8) {
        let command = ControllerCommand::from(value);
        match command {
            ControllerCommand::ReadCommandByte => {
                let _ = self.scancodes.try_push(self.command_byte);
            }
            ControllerCommand::WriteCommandByte => self.awaiting_data_for = Some(command),
            ControllerCommand::DisableFirstPort => self.command_byte |= 1 << 4,
            ControllerCommand::EnableFirstPort => self.command_byte &= !(1 << 4),
            ControllerCommand::DisableSecondPort => self.command_byte |= 1 << 5,
            ControllerCommand::EnableSecondPort => self.command_byte &= !(1 << 5),
            ControllerCommand::SelfTest => {
                let _ = self.scancodes.try_push(0x55);
            }
            ControllerCommand::ReadOutputPort => {
                let _ = self.scancodes.try_push(self.output_port);
            }
            ControllerCommand::WriteOutputPort => self.awaiting_data_for = Some(command),
            ControllerCommand::PulseReset => self.reset_requested = true,
            ControllerCommand::Unknown(byte) => log::trace!("ps2: unhandled command byte {byte:#04x}"),
        }
    }

    /// Port `0x64` read: status byte.
    fn read_status(&self) -> u8 {
        self.status_byte()
    }
}

impl PortBus for Ps2Controller {
    /// Only `0x60`/`0x64` are claimed; everything else reads `0xFF` and
    /// ignores writes.
    fn out_byte(&mut self, port: u16, value: u8) {
        match port {
            0x60 => self.write_data(value),
            0x64 => self.write_command(value),
            _ => {}
        }
    }

    fn in_byte(&mut self, port: u16) -> u8 {
        match port {
            0x60 => self.read_data(),
            0x64 => self.read_status(),
            _ => 0xFF,
        }
    }
}

/// Port `0x92`, bit 1: the alternate (fast) A20 gate wired directly to
/// the chipset rather than through the keyboard controller.
pub fn port92_write(a20: &A20Line, value: u8) {
    a20.set(value & 0x02 != 0);
}

#[must_use]
pub fn port92_read(a20: &A20Line) -> u8 {
    u8::from(a20.enabled()) << 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_test_queues_0x55() {
        let mut ctrl = Ps2Controller::new();
        ctrl.write_command(0xAA);
        assert_eq!(ctrl.read_data(), 0x55);
    }

    #[test]
    fn disable_then_enable_first_port_toggles_bit_four() {
        let mut ctrl = Ps2Controller::new();
        ctrl.write_command(0xAD);
        assert_ne!(ctrl.command_byte & (1 << 4), 0);
        ctrl.write_command(0xAE);
        assert_eq!(ctrl.command_byte & (1 << 4), 0);
    }

    #[test]
    fn write_output_port_drives_a20_line() {
        let mut ctrl = Ps2Controller::new();
        ctrl.write_command(0xD1);
        ctrl.write_data(0x00); // bit 1 clear -> A20 disabled
        assert!(!ctrl.a20().enabled());
        ctrl.write_command(0xD1);
        ctrl.write_data(0x02);
        assert!(ctrl.a20().enabled());
    }

    #[test]
    fn pulse_reset_sets_take_reset_request() {
        let mut ctrl = Ps2Controller::new();
        ctrl.write_command(0xFE);
        assert!(ctrl.take_reset_request());
        assert!(!ctrl.take_reset_request());
    }

    #[test]
    fn port92_mirrors_a20_line() {
        let a20 = A20Line::new(false);
        assert_eq!(port92_read(&a20), 0);
        port92_write(&a20, 0x02);
        assert!(a20.enabled());
    }
}
