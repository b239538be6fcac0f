//! Top-level integration crate wiring the 68000, Z80, VDP, and memory map together into a
//! runnable Genesis/Mega Drive core (spec.md §3-§5). A frontend drives this by constructing a
//! [`GenesisEmulator`] from ROM bytes and calling [`GenesisEmulator::run_frame`] once per video
//! frame, feeding [`input::JoypadState`] in between.

mod bus;
mod input;
mod memory;
mod timing;
mod vdp;

pub use input::{InputState, JoypadState};
pub use jgenesis_common::frontend::Color;
pub use timing::{GenesisEmulatorConfig, GenesisTimingMode};

use bus::{build_address_table, AddressTable, MainBus};
use memory::{Cartridge, CartridgeLoadError, Memory};
use thiserror::Error;
use vdp::Vdp;

/// The master-clock cycles spent per scheduler iteration; the VDP's, 68K's, and Z80's own
/// clocks are derived from this by their respective divisors (spec.md §4.5): VDP /4, 68K /7,
/// Z80 /15. 420 is the least common multiple of the three, so every iteration advances all
/// three clocks by a whole number of their own ticks.
const MASTER_CYCLES_PER_ITERATION: i64 = 420;
const VDP_TICKS_PER_ITERATION: u32 = 105;
const M68K_TICKS_PER_ITERATION: u32 = 60;
const Z80_TICKS_PER_ITERATION: u32 = 28;

/// The only device that currently raises 68K interrupts; distinguishes the VDP's queue entry
/// from (a currently nonexistent) second source so `clear_interrupt`/`interrupt_request` don't
/// fight over the same device id as something else.
const VDP_INTERRUPT_DEVICE: u8 = 0;

#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("failed to load cartridge: {0}")]
    Cartridge(#[from] CartridgeLoadError),
}

/// Everything needed to run one Genesis instance: the 68K, the Z80, the VDP, the memory map,
/// and the controller ports (spec.md §3's "one cartridge, one pair of CPUs, one VDP" scope).
pub struct GenesisEmulator {
    memory: Memory,
    m68k: m68000_emu::M68000,
    z80: z80_emu::Z80,
    vdp: Vdp,
    input: InputState,
    address_table: AddressTable,
    timing_mode: GenesisTimingMode,
    config: GenesisEmulatorConfig,
}

impl GenesisEmulator {
    /// Builds a fresh emulator from cartridge ROM bytes and performs the equivalent of a
    /// power-on reset (spec.md §3's Lifecycle: reset reads the initial SSP/PC out of the
    /// cartridge's vector table at construction, same as real hardware).
    pub fn create(rom: Vec<u8>, config: GenesisEmulatorConfig) -> Result<Self, GenesisError> {
        let cartridge = Cartridge::from_rom_bytes(rom)?;
        let timing_mode = config.timing_mode_override.unwrap_or_default();

        let mut emulator = Self {
            memory: Memory::new(cartridge),
            m68k: m68000_emu::M68000::new(),
            z80: z80_emu::Z80::new(),
            vdp: Vdp::new(timing_mode),
            input: InputState::new(),
            address_table: build_address_table(),
            timing_mode,
            config,
        };
        emulator.reset();
        Ok(emulator)
    }

    /// Attaches a battery-backed SRAM window, seeding it from a previously saved image (or a
    /// zeroed vec of the desired length if there is none yet).
    pub fn attach_sram(&mut self, start: u32, initial: Vec<u8>) {
        self.memory.cartridge.attach_sram(start, initial);
    }

    /// Reloads the 68K's SSP/PC from the cartridge vector table (spec.md §3's Reset
    /// operation). The Z80 and VDP are untouched, matching what the console's own reset button
    /// actually rewires.
    pub fn reset(&mut self) {
        let mut bus = MainBus::new(&mut self.memory, &mut self.vdp, &mut self.z80, &mut self.input, &self.address_table);
        self.m68k.reset(&mut bus);
    }

    pub fn set_pad_a(&mut self, pad: JoypadState) {
        self.input.set_pad_a(pad);
    }

    pub fn set_pad_b(&mut self, pad: JoypadState) {
        self.input.set_pad_b(pad);
    }

    #[must_use]
    pub fn timing_mode(&self) -> GenesisTimingMode {
        self.timing_mode
    }

    #[must_use]
    pub fn frame_buffer(&self) -> &[Color] {
        self.vdp.frame_buffer()
    }

    #[must_use]
    pub fn screen_width(&self) -> u32 {
        self.vdp.screen_width()
    }

    #[must_use]
    pub fn screen_height(&self) -> u32 {
        self.vdp.screen_height()
    }

    pub fn debug_mut(&mut self) -> &mut m68000_emu::DebugState {
        self.m68k.debug_mut()
    }

    fn bus(&mut self) -> MainBus<'_> {
        MainBus::new(
            &mut self.memory,
            &mut self.vdp,
            &mut self.z80,
            &mut self.input,
            &self.address_table,
        )
    }

    /// Runs one video frame's worth of master clock (spec.md §4.5) and returns the rendered
    /// frame buffer. The VDP is always ticked before the 68K and Z80 within an iteration
    /// (spec.md §5's ordering guarantee: a DMA armed this iteration takes effect before either
    /// CPU's next instruction), and the Z80 is skipped entirely while a DMA transfer holds the
    /// bus, mirroring the 68K's own `external_disable` stall.
    pub fn run_frame(&mut self) -> &[Color] {
        let mut remaining = self.timing_mode.master_cycles_per_frame() as i64;

        while remaining > 0 {
            self.vdp.tick(VDP_TICKS_PER_ITERATION, &self.memory);

            let interrupt_level = self.vdp.m68k_interrupt_level();
            self.m68k.clear_interrupt(VDP_INTERRUPT_DEVICE);
            if interrupt_level > 0 {
                self.m68k.interrupt_request(VDP_INTERRUPT_DEVICE, interrupt_level);
            }

            let dma_active = self.vdp.dma_in_progress();
            self.m68k.set_disabled(dma_active);

            // The Z80 itself already absorbs ticks while BUSREQ/RESET hold it suspended
            // (z80_emu::Z80::clock); the scheduler only needs to additionally withhold the
            // bus while a DMA transfer is in progress.
            let z80_granted = self.config.force_z80_always_granted || !dma_active;

            {
                let mut bus = MainBus::new(&mut self.memory, &mut self.vdp, &mut self.z80, &mut self.input, &self.address_table);
                self.m68k.clock(M68K_TICKS_PER_ITERATION, &mut bus);
                if z80_granted {
                    self.z80.clock(Z80_TICKS_PER_ITERATION, &mut bus);
                    // The Z80 only has Zilog's fixed IM1 vector ($0038); unlike the 68K's
                    // autovectored interrupt, there is no level to latch, just an edge to
                    // notice (spec.md §4.4).
                    if z80_emu::BusInterface::int(&bus) == z80_emu::traits::InterruptLine::Low {
                        self.z80.maybe_interrupt(&mut bus, 0x0038);
                    }
                }
            }

            remaining -= MASTER_CYCLES_PER_ITERATION;
        }

        self.vdp.frame_buffer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jgenesis_common::num::GetBit;
    use m68000_emu::BusInterface;

    fn rom_with_vectors(ssp: u32, pc: u32) -> Vec<u8> {
        let mut rom = vec![0u8; 0x10000];
        rom[0..4].copy_from_slice(&ssp.to_be_bytes());
        rom[4..8].copy_from_slice(&pc.to_be_bytes());
        rom
    }

    fn register_select_word(register: u8, value: u8) -> u16 {
        0x8000 | (u16::from(register) << 8) | u16::from(value)
    }

    #[test]
    fn reset_loads_ssp_pc_and_sr_from_cartridge_vector_table() {
        let rom = rom_with_vectors(0x0100_0000, 0x0000_0400);
        let emulator =
            GenesisEmulator::create(rom, GenesisEmulatorConfig::default()).unwrap();

        assert_eq!(emulator.m68k.supervisor_stack_pointer(), 0x0100_0000);
        assert_eq!(emulator.m68k.pc(), 0x0000_0400);
        assert_eq!(emulator.m68k.status_register(), 0x2700);
    }

    #[test]
    fn work_ram_is_mirrored_thirty_two_times_across_e0_to_ff() {
        let rom = rom_with_vectors(0, 0);
        let mut emulator =
            GenesisEmulator::create(rom, GenesisEmulatorConfig::default()).unwrap();

        let mut bus = emulator.bus();
        bus.write_byte(0x00E0_0010, 0x5A);
        assert_eq!(bus.read_byte(0x00FF_0010), 0x5A);
    }

    #[test]
    fn vdp_register_program_then_status_read_reports_pal_mode() {
        let rom = rom_with_vectors(0, 0);
        let mut config = GenesisEmulatorConfig::default();
        config.timing_mode_override = Some(GenesisTimingMode::Pal);
        let mut emulator = GenesisEmulator::create(rom, config).unwrap();

        let mut bus = emulator.bus();
        // Select register 0, write 0x14 (two successive control-port word writes, each one
        // a complete register-select command per spec.md §6's two-byte register protocol).
        bus.write_word(0xC0_0004, register_select_word(0, 0x14));

        let status = bus.read_word(0xC0_0004);
        assert!(status.bit(0), "PAL status bit should be set in PAL timing mode");
    }

    #[test]
    fn vram_fill_dma_via_full_bus_matches_documented_byte_layout() {
        let rom = rom_with_vectors(0, 0);
        let mut emulator =
            GenesisEmulator::create(rom, GenesisEmulatorConfig::default()).unwrap();

        {
            let mut bus = emulator.bus();
            bus.write_word(0xC0_0004, register_select_word(1, 0x10)); // DMA enabled
            bus.write_word(0xC0_0004, register_select_word(15, 1)); // auto-increment 1
            bus.write_word(0xC0_0004, register_select_word(19, 16)); // length low byte
            bus.write_word(0xC0_0004, register_select_word(20, 0)); // length high byte
            bus.write_word(0xC0_0004, register_select_word(23, 0x80)); // arm VRAM fill

            // Destination $0000, VRAM write, DMA arm (code bit 5 set by the second word).
            bus.write_word(0xC0_0004, 0x4000);
            bus.write_word(0xC0_0004, 0x0080);
            bus.write_word(0xC0_0000, 0xABCD);
        }

        // Drain the DMA: one word was already consumed arming it, fifteen remain.
        for _ in 0..20 {
            emulator.vdp.tick(1, &emulator.memory);
        }
        assert!(!emulator.vdp.dma_in_progress());

        let read_word_at = |emulator: &mut GenesisEmulator, address: u16| -> u16 {
            let mut bus = emulator.bus();
            bus.write_word(0xC0_0004, address);
            bus.write_word(0xC0_0004, 0x0000);
            bus.read_word(0xC0_0000)
        };

        assert_eq!(read_word_at(&mut emulator, 0x0000), 0xCDAB);
        for address in (2u16..16).step_by(2) {
            assert_eq!(
                read_word_at(&mut emulator, address),
                0xABAB,
                "fill byte at {address:#06x} should be 0xAB"
            );
        }
    }

    #[test]
    fn hblank_interrupt_fires_once_across_three_scanlines() {
        let rom = rom_with_vectors(0, 0);
        let mut emulator =
            GenesisEmulator::create(rom, GenesisEmulatorConfig::default()).unwrap();

        {
            let mut bus = emulator.bus();
            bus.write_word(0xC0_0004, register_select_word(0, 0x10)); // IE1 enabled
            bus.write_word(0xC0_0004, register_select_word(10, 2)); // interval = 2
        }

        let ticks_per_scanline = u32::from(emulator.timing_mode.overscan_width());
        let mut interrupts = 0;
        for _ in 0..(3 * ticks_per_scanline) {
            emulator.vdp.tick(1, &emulator.memory);
            if emulator.vdp.m68k_interrupt_level() == 4 {
                emulator.vdp.acknowledge_m68k_interrupt();
                interrupts += 1;
            }
        }

        assert_eq!(interrupts, 1);
    }

    #[test]
    fn run_frame_produces_a_full_frame_buffer_without_panicking() {
        let rom = rom_with_vectors(0x0100_0000, 0x0000_0400);
        let mut emulator =
            GenesisEmulator::create(rom, GenesisEmulatorConfig::default()).unwrap();

        let buffer = emulator.run_frame();
        // The backing buffer is a fixed 320x240 canvas; screen_width()/screen_height()
        // describe how much of it the current video mode actually uses.
        assert_eq!(buffer.len(), 320 * 240);
        assert!(
            (emulator.screen_width() * emulator.screen_height()) as usize <= buffer.len()
        );
    }
}
