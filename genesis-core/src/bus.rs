//! The 68K-side address-decoding fabric (spec.md §4.1): a table of wired ranges rather than
//! a hand-written `match` over address constants, so devices register their own footprint
//! instead of the bus knowing every device's layout.

use crate::memory::Memory;
use crate::vdp::Vdp;
use jgenesis_common::num::GetBit;
use std::ops::RangeInclusive;

/// Identifies which device a decoded address belongs to; the bus only stores this tag plus
/// a translated offset; the actual byte access is dispatched through [`MainBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum DeviceTag {
    #[default]
    Unmapped,
    Cartridge,
    Z80Bus,
    VersionPort,
    ControllerA,
    ControllerB,
    Z80BusRequest,
    Z80Reset,
    Vdp,
    WorkRam,
}

#[derive(Debug, Clone, Copy, Default)]
struct Wire {
    tag: DeviceTag,
    base: u32,
}

/// A 24-bit address space described by `wire_range`/`wire_point` calls at construction
/// time; later wiring of the same address overwrites earlier wiring (spec.md §4.1's
/// "idempotent overwrite" tie-break rule — no overlap detection is performed).
pub(crate) struct AddressTable {
    wires: Vec<Wire>,
}

impl AddressTable {
    const SIZE: usize = 1 << 24;

    fn new() -> Self {
        Self { wires: vec![Wire::default(); Self::SIZE] }
    }

    /// Maps every address in `range` to `(base + (a - range.start), tag)`.
    fn wire_range(&mut self, range: RangeInclusive<u32>, base: u32, tag: DeviceTag) {
        let start = *range.start();
        for addr in range {
            self.wires[addr as usize] = Wire { tag, base: base + (addr - start) };
        }
    }

    /// Maps a single address, used for mirror fan-outs and narrow control registers.
    fn wire_point(&mut self, addr: u32, dst: u32, tag: DeviceTag) {
        self.wires[addr as usize] = Wire { tag, base: dst };
    }

    fn lookup(&self, addr: u32) -> Wire {
        self.wires[(addr as usize) & (Self::SIZE - 1)]
    }
}

pub(crate) fn build_address_table() -> AddressTable {
    let mut table = AddressTable::new();

    table.wire_range(0x000000..=0x3FFFFF, 0, DeviceTag::Cartridge);
    table.wire_range(0xA00000..=0xA0FFFF, 0, DeviceTag::Z80Bus);
    table.wire_point(0xA10000, 0, DeviceTag::VersionPort);
    table.wire_point(0xA10001, 0, DeviceTag::VersionPort);
    table.wire_range(0xA10002..=0xA10013, 0, DeviceTag::ControllerA);
    table.wire_range(0xA10004..=0xA10019, 0, DeviceTag::ControllerB);
    table.wire_point(0xA11100, 0, DeviceTag::Z80BusRequest);
    table.wire_point(0xA11101, 0, DeviceTag::Z80BusRequest);
    table.wire_point(0xA11200, 0, DeviceTag::Z80Reset);
    table.wire_point(0xA11201, 0, DeviceTag::Z80Reset);
    table.wire_range(0xC00000..=0xC0001F, 0, DeviceTag::Vdp);

    // 64 KiB work RAM mirrored 32 times across E00000-FFFFFF.
    for mirror in 0..32u32 {
        let base = 0xE00000 + mirror * 0x10000;
        table.wire_range(base..=base + 0xFFFF, 0, DeviceTag::WorkRam);
    }

    table
}

pub struct MainBus<'a> {
    memory: &'a mut Memory,
    vdp: &'a mut Vdp,
    z80: &'a mut z80_emu::Z80,
    input: &'a mut crate::input::InputState,
    table: &'a AddressTable,
    bus_error: bool,
}

impl<'a> MainBus<'a> {
    pub(crate) fn new(
        memory: &'a mut Memory,
        vdp: &'a mut Vdp,
        z80: &'a mut z80_emu::Z80,
        input: &'a mut crate::input::InputState,
        table: &'a AddressTable,
    ) -> Self {
        Self { memory, vdp, z80, input, table, bus_error: false }
    }

    fn read_io_register(&self, address: u32) -> u8 {
        match address & 0x1F {
            0x00 | 0x01 => 0xA0,
            0x02 | 0x03 => self.input.controller_a.read_data(),
            0x04 | 0x05 => self.input.controller_b.read_data(),
            0x08 | 0x09 => self.input.controller_a.read_ctrl(),
            0x0A | 0x0B => self.input.controller_b.read_ctrl(),
            _ => 0xFF,
        }
    }

    fn write_io_register(&mut self, address: u32, value: u8) {
        match address & 0x1F {
            0x02 | 0x03 => self.input.controller_a.write_data(value),
            0x04 | 0x05 => self.input.controller_b.write_data(value),
            0x08 | 0x09 => self.input.controller_a.write_ctrl(value),
            0x0A | 0x0B => self.input.controller_b.write_ctrl(value),
            _ => {}
        }
    }

    fn read_vdp_byte(&mut self, offset: u32) -> u8 {
        match offset & 0x1F {
            0x00 | 0x02 => (self.vdp.read_data() >> 8) as u8,
            0x01 | 0x03 => self.vdp.read_data() as u8,
            0x04 | 0x06 => (self.vdp.read_status() >> 8) as u8,
            0x05 | 0x07 => self.vdp.read_status() as u8,
            0x08..=0x0F => (self.vdp.hv_counter() >> 8) as u8,
            _ => 0xFF,
        }
    }

    fn write_vdp_byte(&mut self, offset: u32, value: u8) {
        match offset & 0x1F {
            0x00..=0x03 => self.vdp.write_data(u16::from(value)),
            0x04..=0x07 => self.vdp.write_control(u16::from(value)),
            _ => {}
        }
    }

    fn read_z80_bus_byte(&mut self, address: u32) -> u8 {
        <Self as z80_emu::BusInterface>::read_memory(self, (address & 0x7FFF) as u16)
    }

    fn write_z80_bus_byte(&mut self, address: u32, value: u8) {
        <Self as z80_emu::BusInterface>::write_memory(self, (address & 0x7FFF) as u16, value);
    }
}

const ADDRESS_MASK: u32 = 0xFFFFFF;

impl<'a> m68000_emu::BusInterface for MainBus<'a> {
    fn read_byte(&mut self, address: u32) -> u8 {
        let address = address & ADDRESS_MASK;
        let wire = self.table.lookup(address);
        log::trace!("main bus byte read {address:06X} -> {:?}", wire.tag);
        match wire.tag {
            DeviceTag::Cartridge => self.memory.cartridge.read_byte(wire.base),
            DeviceTag::Z80Bus => self.read_z80_bus_byte(address),
            DeviceTag::VersionPort | DeviceTag::ControllerA | DeviceTag::ControllerB => {
                self.read_io_register(address)
            }
            DeviceTag::Z80BusRequest => u8::from(!self.z80.bus_request_acknowledged()),
            DeviceTag::Z80Reset => 0xFF,
            DeviceTag::Vdp => self.read_vdp_byte(address),
            DeviceTag::WorkRam => self.memory.work_ram[wire.base as usize & 0xFFFF],
            DeviceTag::Unmapped => {
                self.bus_error = true;
                0xFF
            }
        }
    }

    fn read_word(&mut self, address: u32) -> u16 {
        let address = address & ADDRESS_MASK;
        let wire = self.table.lookup(address);
        match wire.tag {
            DeviceTag::Cartridge => self.memory.cartridge.read_word(wire.base),
            DeviceTag::Vdp => match address & 0x1F {
                0x00..=0x03 => self.vdp.read_data(),
                0x04..=0x07 => self.vdp.read_status(),
                _ => u16::from(self.vdp.hv_counter()),
            },
            DeviceTag::WorkRam => {
                let addr = wire.base as usize & 0xFFFF;
                u16::from_be_bytes([
                    self.memory.work_ram[addr],
                    self.memory.work_ram[(addr + 1) & 0xFFFF],
                ])
            }
            DeviceTag::Z80BusRequest => u16::from(!self.z80.bus_request_acknowledged()),
            DeviceTag::Unmapped => {
                self.bus_error = true;
                0xFFFF
            }
            _ => {
                let byte = self.read_byte(address);
                u16::from_be_bytes([byte, byte])
            }
        }
    }

    fn write_byte(&mut self, address: u32, value: u8) {
        let address = address & ADDRESS_MASK;
        let wire = self.table.lookup(address);
        match wire.tag {
            DeviceTag::Cartridge => self.memory.cartridge.write_sram(wire.base, value),
            DeviceTag::Z80Bus => self.write_z80_bus_byte(address, value),
            DeviceTag::VersionPort | DeviceTag::ControllerA | DeviceTag::ControllerB => {
                self.write_io_register(address, value);
            }
            DeviceTag::Z80BusRequest => self.z80.set_bus_request(value.bit(0)),
            DeviceTag::Z80Reset => self.z80.set_reset(!value.bit(0)),
            DeviceTag::Vdp => self.write_vdp_byte(address, value),
            DeviceTag::WorkRam => self.memory.work_ram[wire.base as usize & 0xFFFF] = value,
            DeviceTag::Unmapped => self.bus_error = true,
        }
    }

    fn write_word(&mut self, address: u32, value: u16) {
        let address = address & ADDRESS_MASK;
        let wire = self.table.lookup(address);
        match wire.tag {
            DeviceTag::Z80Bus => self.write_z80_bus_byte(address, (value >> 8) as u8),
            DeviceTag::Vdp => match address & 0x1F {
                0x00..=0x03 => self.vdp.write_data(value),
                0x04..=0x07 => self.vdp.write_control(value),
                _ => {}
            },
            DeviceTag::WorkRam => {
                let addr = wire.base as usize & 0xFFFF;
                self.memory.work_ram[addr] = (value >> 8) as u8;
                self.memory.work_ram[(addr + 1) & 0xFFFF] = value as u8;
            }
            DeviceTag::Z80BusRequest => self.z80.set_bus_request(value.bit(8)),
            DeviceTag::Z80Reset => self.z80.set_reset(!value.bit(8)),
            DeviceTag::Unmapped => self.bus_error = true,
            DeviceTag::Cartridge | DeviceTag::VersionPort | DeviceTag::ControllerA
            | DeviceTag::ControllerB => self.write_byte(address, value as u8),
        }
    }

    fn interrupt_level(&self) -> u8 {
        self.vdp.m68k_interrupt_level()
    }

    fn acknowledge_interrupt(&mut self, _device: u8) {
        self.vdp.acknowledge_m68k_interrupt();
    }

    fn take_bus_error(&mut self) -> bool {
        std::mem::take(&mut self.bus_error)
    }
}

impl<'a> z80_emu::BusInterface for MainBus<'a> {
    fn read_memory(&mut self, address: u16) -> u8 {
        match address {
            0x0000..=0x3FFF => self.memory.sound_ram[(address & 0x1FFF) as usize],
            0x4000..=0x5FFF => 0xFF, // FM chip register/port reads (stubbed; out of scope)
            0x6000..=0x7EFF => 0xFF,
            0x7F00..=0x7F1F => self.read_vdp_byte(u32::from(address)),
            0x7F20..=0x7FFF => 0xFF,
            0x8000..=0xFFFF => {
                let m68k_addr = self.memory.z80_bank.map_to_68k_address(address);
                <Self as m68000_emu::BusInterface>::read_byte(self, m68k_addr)
            }
        }
    }

    fn write_memory(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x3FFF => self.memory.sound_ram[(address & 0x1FFF) as usize] = value,
            0x4000..=0x5FFF => {} // FM chip writes stubbed; audio generation is out of scope
            0x6000..=0x60FF => self.memory.z80_bank.write_bit(value.bit(0)),
            0x6100..=0x7EFF | 0x7F20..=0x7FFF => {}
            0x7F00..=0x7F1F => self.write_vdp_byte(u32::from(address), value),
            0x8000..=0xFFFF => {
                let m68k_addr = self.memory.z80_bank.map_to_68k_address(address);
                <Self as m68000_emu::BusInterface>::write_byte(self, m68k_addr, value);
            }
        }
    }

    fn read_io(&mut self, _address: u16) -> u8 {
        0xFF
    }

    fn write_io(&mut self, _address: u16, _value: u8) {}

    fn int(&self) -> z80_emu::traits::InterruptLine {
        self.vdp.z80_interrupt_line()
    }
}
