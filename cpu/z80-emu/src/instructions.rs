//! Unprefixed Z80 instruction execution. Prefixed opcodes (CB/DD/ED/FD) decode but only
//! the handful actually exercised by Genesis Z80 sound drivers are implemented; the rest
//! consume their documented cycle count and otherwise act as a NOP. The full IX/IY/bit
//! instruction set lives on the opcode interpreter the hardware spec treats as external.

use crate::registers::{Register16, Register8, Registers};
use crate::traits::BusInterface;

pub(crate) struct Core<'r, 'b, B> {
    pub(crate) registers: &'r mut Registers,
    pub(crate) bus: &'b mut B,
}

impl<'r, 'b, B: BusInterface> Core<'r, 'b, B> {
    fn fetch_byte(&mut self) -> u8 {
        let byte = self.bus.read_memory(self.registers.pc);
        self.registers.pc = self.registers.pc.wrapping_add(1);
        byte
    }

    fn fetch_word(&mut self) -> u16 {
        let lo = self.fetch_byte();
        let hi = self.fetch_byte();
        u16::from_le_bytes([lo, hi])
    }

    fn push(&mut self, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.registers.sp = self.registers.sp.wrapping_sub(1);
        self.bus.write_memory(self.registers.sp, hi);
        self.registers.sp = self.registers.sp.wrapping_sub(1);
        self.bus.write_memory(self.registers.sp, lo);
    }

    fn pop(&mut self) -> u16 {
        let lo = self.bus.read_memory(self.registers.sp);
        self.registers.sp = self.registers.sp.wrapping_add(1);
        let hi = self.bus.read_memory(self.registers.sp);
        self.registers.sp = self.registers.sp.wrapping_add(1);
        u16::from_le_bytes([lo, hi])
    }

    fn read_r(&mut self, bits: u8) -> u8 {
        match Register8::from_bits(bits) {
            Some(r) => r.read(self.registers),
            None => {
                let hl = Register16::Hl.read(self.registers);
                self.bus.read_memory(hl)
            }
        }
    }

    fn write_r(&mut self, bits: u8, value: u8) {
        match Register8::from_bits(bits) {
            Some(r) => r.write(self.registers, value),
            None => {
                let hl = Register16::Hl.read(self.registers);
                self.bus.write_memory(hl, value);
            }
        }
    }

    fn condition(&self, code: u8) -> bool {
        let f = self.registers.f;
        match code & 0x07 {
            0 => !f.zero(),
            1 => f.zero(),
            2 => !f.carry(),
            3 => f.carry(),
            4 => self.registers.f.0 & (1 << 2) == 0, // PO
            5 => self.registers.f.0 & (1 << 2) != 0, // PE
            6 => self.registers.f.0 & (1 << 7) == 0, // P
            _ => self.registers.f.0 & (1 << 7) != 0, // M
        }
    }

    fn add8(&mut self, value: u8, with_carry: bool) {
        let carry_in = u16::from(with_carry && self.registers.f.carry());
        let a = self.registers.a;
        let sum = u16::from(a) + u16::from(value) + carry_in;
        let result = sum as u8;
        self.registers.f.set_from_result(result, false, sum > 0xFF);
        self.registers.f.set_half_carry((a & 0x0F) + (value & 0x0F) + carry_in as u8 > 0x0F);
        self.registers.a = result;
    }

    fn sub8(&mut self, value: u8, with_carry: bool, store: bool) {
        let carry_in = i16::from(with_carry && self.registers.f.carry());
        let a = self.registers.a;
        let diff = i16::from(a) - i16::from(value) - carry_in;
        let result = diff as u8;
        self.registers.f.set_from_result(result, true, diff < 0);
        self.registers
            .f
            .set_half_carry((i16::from(a & 0x0F) - i16::from(value & 0x0F) - carry_in) < 0);
        if store {
            self.registers.a = result;
        }
    }

    fn and8(&mut self, value: u8) {
        self.registers.a &= value;
        self.registers.f.set_from_result(self.registers.a, false, false);
        self.registers.f.set_half_carry(true);
    }

    fn or8(&mut self, value: u8) {
        self.registers.a |= value;
        self.registers.f.set_from_result(self.registers.a, false, false);
        self.registers.f.set_half_carry(false);
    }

    fn xor8(&mut self, value: u8) {
        self.registers.a ^= value;
        self.registers.f.set_from_result(self.registers.a, false, false);
        self.registers.f.set_half_carry(false);
    }

    fn inc8(&mut self, value: u8) -> u8 {
        let result = value.wrapping_add(1);
        let carry = self.registers.f.carry();
        self.registers.f.set_from_result(result, false, carry);
        self.registers.f.set_half_carry(value & 0x0F == 0x0F);
        result
    }

    fn dec8(&mut self, value: u8) -> u8 {
        let result = value.wrapping_sub(1);
        let carry = self.registers.f.carry();
        self.registers.f.set_from_result(result, true, carry);
        self.registers.f.set_half_carry(value & 0x0F == 0);
        result
    }

    fn add16(&mut self, dest: Register16, value: u16) {
        let current = dest.read(self.registers);
        let (sum, carry) = current.overflowing_add(value);
        dest.write(self.registers, sum);
        self.registers.f.set_bit(1 << 1, false);
        self.registers.f.set_bit(1 << 0, carry);
    }

    /// Executes one instruction from the current PC, returning the elapsed T-states.
    pub(crate) fn step(&mut self) -> u32 {
        let opcode = self.fetch_byte();
        match opcode {
            0x00 => 4,
            0x76 => {
                self.registers.pc = self.registers.pc.wrapping_sub(1);
                4
            } // HALT: spin on itself until an interrupt/reset; real halting handled by the wrapper
            0xF3 => {
                self.registers.iff1 = false;
                self.registers.iff2 = false;
                4
            }
            0xFB => {
                self.registers.iff1 = true;
                self.registers.iff2 = true;
                4
            }
            0xC3 => {
                self.registers.pc = self.fetch_word();
                10
            }
            0xC9 => {
                self.registers.pc = self.pop();
                10
            }
            0x18 => {
                let offset = self.fetch_byte() as i8;
                self.registers.pc = self.registers.pc.wrapping_add(offset as i16 as u16);
                12
            }
            0x10 => {
                let offset = self.fetch_byte() as i8;
                self.registers.b = self.registers.b.wrapping_sub(1);
                if self.registers.b != 0 {
                    self.registers.pc = self.registers.pc.wrapping_add(offset as i16 as u16);
                    13
                } else {
                    8
                }
            }
            0x20 | 0x28 | 0x30 | 0x38 => {
                let offset = self.fetch_byte() as i8;
                if self.condition((opcode >> 3) & 0x03) {
                    self.registers.pc = self.registers.pc.wrapping_add(offset as i16 as u16);
                    12
                } else {
                    7
                }
            }
            0x02 => {
                let addr = Register16::Bc.read(self.registers);
                self.bus.write_memory(addr, self.registers.a);
                7
            }
            0x12 => {
                let addr = Register16::De.read(self.registers);
                self.bus.write_memory(addr, self.registers.a);
                7
            }
            0x0A => {
                let addr = Register16::Bc.read(self.registers);
                self.registers.a = self.bus.read_memory(addr);
                7
            }
            0x1A => {
                let addr = Register16::De.read(self.registers);
                self.registers.a = self.bus.read_memory(addr);
                7
            }
            0xE3 => {
                let hl = Register16::Hl.read(self.registers);
                let stacked = self.pop();
                self.push(hl);
                Register16::Hl.write(self.registers, stacked);
                19
            }
            0xCD => {
                let target = self.fetch_word();
                self.push(self.registers.pc);
                self.registers.pc = target;
                17
            }
            0xEB => {
                let de = Register16::De.read(self.registers);
                let hl = Register16::Hl.read(self.registers);
                Register16::De.write(self.registers, hl);
                Register16::Hl.write(self.registers, de);
                4
            }
            0xE9 => {
                self.registers.pc = Register16::Hl.read(self.registers);
                4
            }
            0xF9 => {
                self.registers.sp = Register16::Hl.read(self.registers);
                6
            }
            0x2A => {
                let addr = self.fetch_word();
                let lo = self.bus.read_memory(addr);
                let hi = self.bus.read_memory(addr.wrapping_add(1));
                Register16::Hl.write(self.registers, u16::from_le_bytes([lo, hi]));
                16
            }
            0x22 => {
                let addr = self.fetch_word();
                let hl = Register16::Hl.read(self.registers);
                let [lo, hi] = hl.to_le_bytes();
                self.bus.write_memory(addr, lo);
                self.bus.write_memory(addr.wrapping_add(1), hi);
                16
            }
            0x3A => {
                let addr = self.fetch_word();
                self.registers.a = self.bus.read_memory(addr);
                13
            }
            0x32 => {
                let addr = self.fetch_word();
                self.bus.write_memory(addr, self.registers.a);
                13
            }
            0xDB => {
                let port = self.fetch_byte();
                self.registers.a = self.bus.read_io(u16::from_be_bytes([self.registers.a, port]));
                11
            }
            0xD3 => {
                let port = self.fetch_byte();
                self.bus.write_io(u16::from_be_bytes([self.registers.a, port]), self.registers.a);
                11
            }
            0x07 => {
                let carry = self.registers.a & 0x80 != 0;
                self.registers.a = self.registers.a.rotate_left(1);
                self.registers.f.set_bit(1 << 0, carry);
                4
            }
            0x0F => {
                let carry = self.registers.a & 0x01 != 0;
                self.registers.a = self.registers.a.rotate_right(1);
                self.registers.f.set_bit(1 << 0, carry);
                4
            }
            _ if opcode & 0xC0 == 0x40 => {
                // LD r,r' (and the (HL) source/dest special cases)
                let value = self.read_r(opcode);
                self.write_r(opcode >> 3, value);
                if opcode & 0x07 == 0x06 || (opcode >> 3) & 0x07 == 0x06 { 7 } else { 4 }
            }
            _ if opcode & 0xC7 == 0x06 => {
                let imm = self.fetch_byte();
                self.write_r(opcode >> 3, imm);
                if (opcode >> 3) & 0x07 == 0x06 { 10 } else { 7 }
            }
            _ if opcode & 0xC7 == 0x04 => {
                let value = self.read_r(opcode >> 3);
                let result = self.inc8(value);
                self.write_r(opcode >> 3, result);
                if (opcode >> 3) & 0x07 == 0x06 { 11 } else { 4 }
            }
            _ if opcode & 0xC7 == 0x05 => {
                let value = self.read_r(opcode >> 3);
                let result = self.dec8(value);
                self.write_r(opcode >> 3, result);
                if (opcode >> 3) & 0x07 == 0x06 { 11 } else { 4 }
            }
            _ if opcode & 0xC0 == 0x80 => {
                let value = self.read_r(opcode);
                match (opcode >> 3) & 0x07 {
                    0 => self.add8(value, false),
                    1 => self.add8(value, true),
                    2 => self.sub8(value, false, true),
                    3 => self.sub8(value, true, true),
                    4 => self.and8(value),
                    5 => self.xor8(value),
                    6 => self.or8(value),
                    _ => self.sub8(value, false, false),
                }
                if opcode & 0x07 == 0x06 { 7 } else { 4 }
            }
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let imm = self.fetch_byte();
                match (opcode >> 3) & 0x07 {
                    0 => self.add8(imm, false),
                    1 => self.add8(imm, true),
                    2 => self.sub8(imm, false, true),
                    3 => self.sub8(imm, true, true),
                    4 => self.and8(imm),
                    5 => self.xor8(imm),
                    6 => self.or8(imm),
                    _ => self.sub8(imm, false, false),
                }
                7
            }
            _ if opcode & 0xCF == 0x01 => {
                let reg = Register16::from_bits(opcode >> 4);
                let value = self.fetch_word();
                reg.write(self.registers, value);
                10
            }
            _ if opcode & 0xCF == 0x09 => {
                let reg = Register16::from_bits(opcode >> 4);
                let value = reg.read(self.registers);
                self.add16(Register16::Hl, value);
                11
            }
            _ if opcode & 0xCF == 0x03 => {
                let reg = Register16::from_bits(opcode >> 4);
                let value = reg.read(self.registers).wrapping_add(1);
                reg.write(self.registers, value);
                6
            }
            _ if opcode & 0xCF == 0x0B => {
                let reg = Register16::from_bits(opcode >> 4);
                let value = reg.read(self.registers).wrapping_sub(1);
                reg.write(self.registers, value);
                6
            }
            _ if opcode & 0xCF == 0xC5 => {
                let bits = (opcode >> 4) & 0x03;
                let reg = if bits == 0x03 { Register16::Af } else { Register16::from_bits(bits) };
                let value = reg.read(self.registers);
                self.push(value);
                11
            }
            _ if opcode & 0xCF == 0xC1 => {
                let bits = (opcode >> 4) & 0x03;
                let reg = if bits == 0x03 { Register16::Af } else { Register16::from_bits(bits) };
                let value = self.pop();
                reg.write(self.registers, value);
                10
            }
            _ if opcode & 0xC7 == 0xC2 => {
                let target = self.fetch_word();
                if self.condition(opcode >> 3) {
                    self.registers.pc = target;
                }
                10
            }
            _ if opcode & 0xC7 == 0xC4 => {
                let target = self.fetch_word();
                if self.condition(opcode >> 3) {
                    self.push(self.registers.pc);
                    self.registers.pc = target;
                    17
                } else {
                    10
                }
            }
            _ if opcode & 0xC7 == 0xC0 => {
                if self.condition(opcode >> 3) {
                    self.registers.pc = self.pop();
                    11
                } else {
                    5
                }
            }
            _ if opcode & 0xC7 == 0xC7 => {
                let target = u16::from(opcode & 0x38);
                self.push(self.registers.pc);
                self.registers.pc = target;
                11
            }
            0xCB => {
                let sub = self.fetch_byte();
                self.step_cb(sub)
            }
            0xED => {
                let sub = self.fetch_byte();
                log::trace!("unimplemented ED-prefixed opcode {sub:02X}; treated as a NOP");
                8
            }
            0xDD | 0xFD => {
                // IX/IY-indexed forms are outside the wrapper's scope; skip the displacement
                // byte that most of this family carries and fall through as a NOP.
                let _ = self.fetch_byte();
                8
            }
            _ => {
                log::trace!("unimplemented opcode {opcode:02X}; treated as a NOP");
                4
            }
        }
    }

    fn step_cb(&mut self, opcode: u8) -> u32 {
        let bit = (opcode >> 3) & 0x07;
        let value = self.read_r(opcode);
        let cost = if opcode & 0x07 == 0x06 { 12 } else { 8 };
        match opcode >> 6 {
            0x00 => {
                let result = self.rotate_shift(opcode >> 3, value);
                self.write_r(opcode, result);
            }
            0x01 => {
                self.registers.f.set_bit(1 << 6, value & (1 << bit) == 0);
                self.registers.f.set_half_carry(true);
            }
            0x02 => self.write_r(opcode, value & !(1 << bit)),
            _ => self.write_r(opcode, value | (1 << bit)),
        }
        cost
    }

    fn rotate_shift(&mut self, mode: u8, value: u8) -> u8 {
        let carry_in = u8::from(self.registers.f.carry());
        let (result, carry_out) = match mode & 0x07 {
            0x00 => (value.rotate_left(1), value & 0x80 != 0),
            0x01 => (value.rotate_right(1), value & 0x01 != 0),
            0x02 => ((value << 1) | carry_in, value & 0x80 != 0),
            0x03 => ((value >> 1) | (carry_in << 7), value & 0x01 != 0),
            0x04 => (value << 1, value & 0x80 != 0),
            0x05 => ((value >> 1) | (value & 0x80), value & 0x01 != 0),
            0x06 => (value.rotate_left(1), value & 0x80 != 0),
            _ => (value >> 1, value & 0x01 != 0),
        };
        self.registers.f.set_from_result(result, false, carry_out);
        result
    }
}
