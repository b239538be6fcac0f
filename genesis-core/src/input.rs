//! Controller ports (spec.md §3, §6): each owns a data byte, a control byte, and the
//! 3-button pad state a host frontend samples into.

use jgenesis_common::num::GetBit;

#[cfg_attr(feature = "bincode", derive(bincode::Encode, bincode::Decode))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JoypadState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub a: bool,
    pub b: bool,
    pub c: bool,
    pub start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum PinDirection {
    #[default]
    Input,
    Output,
}

impl PinDirection {
    fn from_ctrl_bit(bit: bool) -> Self {
        if bit { Self::Output } else { Self::Input }
    }

    fn to_ctrl_bit(self) -> bool {
        self == Self::Output
    }

    fn to_data_bit(self, sampled: bool, written: bool) -> bool {
        match self {
            Self::Input => sampled,
            Self::Output => written,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PinDirections {
    last_data_write: u8,
    th: PinDirection,
    tl: PinDirection,
    tr: PinDirection,
    right: PinDirection,
    left: PinDirection,
    down: PinDirection,
    up: PinDirection,
}

impl PinDirections {
    fn from_ctrl_byte(byte: u8, last_data_write: u8) -> Self {
        Self {
            last_data_write,
            th: PinDirection::from_ctrl_bit(byte.bit(6)),
            tl: PinDirection::from_ctrl_bit(byte.bit(5)),
            tr: PinDirection::from_ctrl_bit(byte.bit(4)),
            right: PinDirection::from_ctrl_bit(byte.bit(3)),
            left: PinDirection::from_ctrl_bit(byte.bit(2)),
            down: PinDirection::from_ctrl_bit(byte.bit(1)),
            up: PinDirection::from_ctrl_bit(byte.bit(0)),
        }
    }

    /// The 6-button-vector encoding depends on the TH bit the 68K last wrote (spec.md §3):
    /// TH=1 exposes direction + B/C, TH=0 exposes Start/A in their place.
    fn to_data_byte(self, pad: JoypadState) -> u8 {
        let th = self.th.to_data_bit(true, self.last_data_write.bit(6));
        let tl_sample = if th { !pad.c } else { !pad.start };
        let tr_sample = if th { !pad.b } else { !pad.a };
        let right_sample = th && !pad.right;
        let left_sample = th && !pad.left;
        let last = self.last_data_write;

        (last & 0x80)
            | (u8::from(th) << 6)
            | (u8::from(self.tl.to_data_bit(tl_sample, last.bit(5))) << 5)
            | (u8::from(self.tr.to_data_bit(tr_sample, last.bit(4))) << 4)
            | (u8::from(self.right.to_data_bit(right_sample, last.bit(3))) << 3)
            | (u8::from(self.left.to_data_bit(left_sample, last.bit(2))) << 2)
            | (u8::from(self.down.to_data_bit(!pad.down, last.bit(1))) << 1)
            | u8::from(self.up.to_data_bit(!pad.up, last.bit(0)))
    }

    fn to_ctrl_byte(self) -> u8 {
        (u8::from(self.th.to_ctrl_bit()) << 6)
            | (u8::from(self.tl.to_ctrl_bit()) << 5)
            | (u8::from(self.tr.to_ctrl_bit()) << 4)
            | (u8::from(self.right.to_ctrl_bit()) << 3)
            | (u8::from(self.left.to_ctrl_bit()) << 2)
            | (u8::from(self.down.to_ctrl_bit()) << 1)
            | u8::from(self.up.to_ctrl_bit())
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Controller {
    pad: JoypadState,
    pins: PinDirections,
}

impl Controller {
    pub(crate) fn set_pad(&mut self, pad: JoypadState) {
        self.pad = pad;
    }

    pub(crate) fn read_data(&self) -> u8 {
        self.pins.to_data_byte(self.pad)
    }

    pub(crate) fn write_data(&mut self, value: u8) {
        self.pins.last_data_write = value;
    }

    pub(crate) fn read_ctrl(&self) -> u8 {
        self.pins.to_ctrl_byte()
    }

    pub(crate) fn write_ctrl(&mut self, value: u8) {
        self.pins = PinDirections::from_ctrl_byte(value, self.pins.last_data_write);
    }
}

#[derive(Debug, Clone, Default)]
pub struct InputState {
    pub(crate) controller_a: Controller,
    pub(crate) controller_b: Controller,
}

impl InputState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pad_a(&mut self, pad: JoypadState) {
        self.controller_a.set_pad(pad);
    }

    pub fn set_pad_b(&mut self, pad: JoypadState) {
        self.controller_b.set_pad(pad);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn th_bit_selects_between_direction_and_start_a() {
        let mut controller = Controller::default();
        controller.set_pad(JoypadState { start: true, a: true, ..JoypadState::default() });

        controller.write_data(0x40); // TH=1
        let th1 = controller.read_data();
        assert!(th1.bit(6));

        controller.write_data(0x00); // TH=0
        let th0 = controller.read_data();
        assert!(!th0.bit(5), "TL low means Start pressed when TH=0");
        assert!(!th0.bit(4), "TR low means A pressed when TH=0");
    }
}
