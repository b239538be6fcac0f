//! The Video Display Processor (spec.md §4.3): command/data ports, the three-mode DMA
//! engine, the beam-driven scanline renderer, and the H/V interrupt generators. Composed
//! with [`crate::memory::Memory`] for DMA reads and exposes interrupt lines to both CPUs.

use crate::memory::Memory;
use crate::timing::GenesisTimingMode;
use jgenesis_common::frontend::Color;
use jgenesis_common::num::GetBit;
use z80_emu::traits::InterruptLine;

const VRAM_LEN: usize = 64 * 1024;
const CRAM_LEN: usize = 128;
const VSRAM_LEN: usize = 80;
const MAX_SPRITES: usize = 80;

/// Per-channel 3-bit intensity table for the Genesis's 8-level luminance mode (spec.md §6).
const GENESIS_LUMINANCE: [u8; 8] = [0, 52, 87, 116, 144, 172, 206, 255];
/// Master-System-compatible 4-level table selected when mode register 1's PALSEL bit is clear;
/// only the even luminance steps are reachable, matching the coarser DAC the 4-level mode implies.
const MASTER_SYSTEM_LUMINANCE: [u8; 8] = [0, 0, 85, 85, 170, 170, 255, 255];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlLatch {
    First,
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortLocation {
    Vram,
    Cram,
    Vsram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortMode {
    Read,
    Write,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DmaMode {
    MemToVram,
    VramFill,
    VramCopy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HScrollMode {
    FullScreen,
    Cell,
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VScrollMode {
    FullScreen,
    TwoCell,
}

/// Spec.md §3's "25 8-bit mode registers" plus the decoded fields a renderer actually wants;
/// the raw bytes are kept only for registers whose write sets multiple derived fields at once.
#[derive(Debug, Clone)]
struct Registers {
    h_interrupt_enabled: bool,
    palsel: bool,
    display_enabled: bool,
    v_interrupt_enabled: bool,
    dma_enabled: bool,
    cell_30: bool,
    scroll_a_addr: u16,
    window_addr: u16,
    scroll_b_addr: u16,
    sprite_table_addr: u16,
    bg_palette: u8,
    bg_color_id: u8,
    h_interrupt_interval: u16,
    v_scroll_mode: VScrollMode,
    h_scroll_mode: HScrollMode,
    cell_40: bool,
    h_scroll_table_addr: u16,
    auto_increment: u16,
    v_scroll_size: u16,
    h_scroll_size: u16,
    window_right_half: bool,
    window_x: u16,
    window_bottom_half: bool,
    window_y: u16,
    dma_length: u16,
    dma_source: u32,
    dma_mode: DmaMode,
}

impl Registers {
    fn new() -> Self {
        Self {
            h_interrupt_enabled: false,
            palsel: true,
            display_enabled: false,
            v_interrupt_enabled: false,
            dma_enabled: false,
            cell_30: false,
            scroll_a_addr: 0,
            window_addr: 0,
            scroll_b_addr: 0,
            sprite_table_addr: 0,
            bg_palette: 0,
            bg_color_id: 0,
            h_interrupt_interval: 0,
            v_scroll_mode: VScrollMode::FullScreen,
            h_scroll_mode: HScrollMode::FullScreen,
            cell_40: false,
            h_scroll_table_addr: 0,
            auto_increment: 0,
            v_scroll_size: 32,
            h_scroll_size: 32,
            window_right_half: false,
            window_x: 0,
            window_bottom_half: false,
            window_y: 0,
            dma_length: 0,
            dma_source: 0,
            dma_mode: DmaMode::MemToVram,
        }
    }

    fn write(&mut self, register: u8, value: u8) {
        match register {
            0 => {
                self.h_interrupt_enabled = value.bit(4);
                self.palsel = value.bit(2);
            }
            1 => {
                self.display_enabled = value.bit(6);
                self.v_interrupt_enabled = value.bit(5);
                self.dma_enabled = value.bit(4);
                self.cell_30 = value.bit(3);
            }
            2 => self.scroll_a_addr = u16::from(value & 0x38) << 10,
            3 => self.window_addr = u16::from(value & 0x3E) << 10,
            4 => self.scroll_b_addr = u16::from(value & 0x07) << 13,
            5 => self.sprite_table_addr = u16::from(value & 0x7F) << 9,
            7 => {
                self.bg_palette = (value >> 4) & 0x03;
                self.bg_color_id = value & 0x0F;
            }
            10 => self.h_interrupt_interval = value.into(),
            11 => {
                self.v_scroll_mode =
                    if value.bit(2) { VScrollMode::TwoCell } else { VScrollMode::FullScreen };
                self.h_scroll_mode = match value & 0x03 {
                    0x02 => HScrollMode::Cell,
                    0x03 => HScrollMode::Line,
                    _ => HScrollMode::FullScreen,
                };
            }
            12 => {
                self.cell_40 = value.bit(7) || value.bit(0);
            }
            13 => self.h_scroll_table_addr = u16::from(value & 0x3F) << 10,
            15 => self.auto_increment = value.into(),
            16 => {
                self.v_scroll_size = scroll_size_cells(value >> 4);
                self.h_scroll_size = scroll_size_cells(value);
            }
            17 => {
                self.window_right_half = value.bit(7);
                self.window_x = u16::from(value & 0x1F) << 1;
            }
            18 => {
                self.window_bottom_half = value.bit(7);
                self.window_y = u16::from(value & 0x1F);
            }
            19 => self.dma_length = (self.dma_length & 0xFF00) | u16::from(value),
            20 => self.dma_length = (self.dma_length & 0x00FF) | (u16::from(value) << 8),
            21 => self.dma_source = (self.dma_source & 0xFFFF_FE00) | (u32::from(value) << 1),
            22 => self.dma_source = (self.dma_source & 0xFFFE_01FF) | (u32::from(value) << 9),
            23 => {
                self.dma_source = (self.dma_source & 0x0001_FFFF) | (u32::from(value & 0x3F) << 17);
                self.dma_mode = match value & 0xC0 {
                    0x80 => DmaMode::VramFill,
                    0xC0 => DmaMode::VramCopy,
                    _ => DmaMode::MemToVram,
                };
            }
            _ => {}
        }
    }

    fn screen_width(&self) -> u16 {
        if self.cell_40 { 320 } else { 256 }
    }

    fn active_scanlines(&self) -> u16 {
        if self.cell_30 { 240 } else { 224 }
    }

    fn dma_length_or_max(&self) -> u32 {
        if self.dma_length == 0 { 65536 } else { self.dma_length.into() }
    }
}

fn scroll_size_cells(bits: u8) -> u16 {
    match bits & 0x03 {
        0x01 => 64,
        0x03 => 128,
        _ => 32,
    }
}

/// Per spec.md §3's DMA state: length counter, source address, type tag, activity and
/// fill-arming flags.
#[derive(Debug, Clone)]
struct DmaState {
    active: bool,
    mode: DmaMode,
    length: u32,
    source: u32,
    fill_word: u16,
    fill_waiting_for_data: bool,
}

impl DmaState {
    fn new() -> Self {
        Self {
            active: false,
            mode: DmaMode::MemToVram,
            length: 0,
            source: 0,
            fill_word: 0,
            fill_waiting_for_data: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Sprite {
    v_position: u16,
    h_position: u16,
    h_size_cells: u8,
    v_size_cells: u8,
    link: u8,
    priority: bool,
    palette: u8,
    vertical_flip: bool,
    horizontal_flip: bool,
    pattern_generator: u16,
}

fn read_sprite(vram: &[u8], table_addr: u16, index: u16) -> Sprite {
    let addr = table_addr.wrapping_add(8 * index) as usize;
    let b = |i: usize| vram[(addr + i) & 0xFFFF];
    let v_position = u16::from_be_bytes([b(0), b(1)]) & 0x03FF;
    let size_byte = b(2);
    let link = b(3);
    let attr = u16::from_be_bytes([b(4), b(5)]);
    let h_position = u16::from_be_bytes([b(6), b(7)]) & 0x01FF;

    Sprite {
        v_position,
        h_position,
        h_size_cells: ((size_byte >> 2) & 0x03) + 1,
        v_size_cells: (size_byte & 0x03) + 1,
        link,
        priority: attr.bit(15),
        palette: ((attr >> 13) & 0x03) as u8,
        vertical_flip: attr.bit(12),
        horizontal_flip: attr.bit(11),
        pattern_generator: attr & 0x07FF,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VdpTickEffect {
    None,
    FrameComplete,
}

pub struct Vdp {
    vram: Box<[u8; VRAM_LEN]>,
    cram: [u8; CRAM_LEN],
    vsram: [u8; VSRAM_LEN],

    registers: Registers,
    dma: DmaState,

    control_latch: ControlLatch,
    code: u8,
    port_location: PortLocation,
    port_mode: PortMode,
    data_address: u16,
    latched_high_bits: u16,

    beam_h: u16,
    beam_v: u16,
    h_interrupt_counter: u16,
    v_interrupt_pending: bool,
    h_interrupt_pending: bool,
    sprite_overflow: bool,
    sprite_collision: bool,
    odd_frame: bool,

    /// Frame-start snapshot of resolved CRAM colours, rebuilt at beam (0, 0) (spec.md §4.3).
    color_cache: [Color; 64],
    /// Frame-start snapshot of the sprite-attribute table, followed through link pointers.
    sprite_cache: Vec<Sprite>,

    timing_mode: GenesisTimingMode,
    frame_buffer: Vec<Color>,
}

impl Vdp {
    #[must_use]
    pub fn new(timing_mode: GenesisTimingMode) -> Self {
        Self {
            vram: Box::new([0; VRAM_LEN]),
            cram: [0; CRAM_LEN],
            vsram: [0; VSRAM_LEN],
            registers: Registers::new(),
            dma: DmaState::new(),
            control_latch: ControlLatch::First,
            code: 0,
            port_location: PortLocation::Vram,
            port_mode: PortMode::Write,
            data_address: 0,
            latched_high_bits: 0,
            beam_h: 0,
            beam_v: 0,
            h_interrupt_counter: 0,
            v_interrupt_pending: false,
            h_interrupt_pending: false,
            sprite_overflow: false,
            sprite_collision: false,
            odd_frame: false,
            color_cache: [Color::default(); 64],
            sprite_cache: Vec::with_capacity(MAX_SPRITES),
            timing_mode,
            frame_buffer: vec![Color::default(); 320 * 240],
        }
    }

    fn update_port_decode(&mut self) {
        let (location, mode) = match self.code & 0x0F {
            0x01 => (PortLocation::Vram, PortMode::Write),
            0x03 => (PortLocation::Cram, PortMode::Write),
            0x05 => (PortLocation::Vsram, PortMode::Write),
            0x00 => (PortLocation::Vram, PortMode::Read),
            0x08 => (PortLocation::Cram, PortMode::Read),
            0x04 => (PortLocation::Vsram, PortMode::Read),
            _ => (PortLocation::Vram, PortMode::Invalid),
        };
        self.port_location = location;
        self.port_mode = mode;
    }

    /// Writes to the control port (spec.md §4.3): either a single-byte register-select write
    /// or one half of a two-word command latch.
    pub fn write_control(&mut self, value: u16) {
        match self.control_latch {
            ControlLatch::First => {
                self.code = (self.code & 0xFC) | ((value >> 14) & 0x03) as u8;
                self.update_port_decode();

                if value & 0xE000 == 0x8000 {
                    let register = ((value >> 8) & 0x1F) as u8;
                    self.registers.write(register, value as u8);
                } else {
                    self.data_address = self.latched_high_bits | (value & 0x3FFF);
                    self.control_latch = ControlLatch::Second;
                }
            }
            ControlLatch::Second => {
                let high_bits = value << 14;
                self.latched_high_bits = high_bits;
                self.data_address = (self.data_address & 0x3FFF) | high_bits;
                self.control_latch = ControlLatch::First;
                self.code = (((value >> 2) & 0x3C) as u8) | (self.code & 0x03);
                self.update_port_decode();

                if self.code.bit(5) && self.registers.dma_enabled {
                    match self.registers.dma_mode {
                        DmaMode::VramFill => {
                            self.dma.fill_waiting_for_data = true;
                        }
                        mode => {
                            self.dma.active = true;
                            self.dma.mode = mode;
                            self.dma.length = self.registers.dma_length_or_max();
                            self.dma.source = self.registers.dma_source;
                        }
                    }
                }
            }
        }
    }

    pub fn write_data(&mut self, value: u16) {
        self.control_latch = ControlLatch::First;

        if self.dma.fill_waiting_for_data {
            self.dma.fill_waiting_for_data = false;
            self.dma.fill_word = value;
            self.dma.mode = DmaMode::VramFill;
            self.dma.length = self.registers.dma_length_or_max();

            // The low byte is written once, at arm time, to the destination address; every
            // subsequent DMA tick writes the high byte instead (spec.md §4.3's VRAM FILL
            // description and §8 scenario 4). That initial write counts against the length.
            let [_, lsb] = value.to_be_bytes();
            self.vram[self.data_address as usize] = lsb;
            self.advance_data_address();
            self.dma.length = self.dma.length.saturating_sub(1);
            self.dma.active = self.dma.length > 0;
            return;
        }

        if self.port_mode != PortMode::Write {
            return;
        }

        match self.port_location {
            PortLocation::Vram => self.write_vram_word(self.data_address, value),
            PortLocation::Cram => self.write_cram_word(self.data_address, value),
            PortLocation::Vsram => self.write_vsram_word(self.data_address, value),
        }
        self.advance_data_address();
    }

    pub fn read_data(&mut self) -> u16 {
        self.control_latch = ControlLatch::First;

        if self.port_mode != PortMode::Read {
            return 0xFFFF;
        }

        let value = match self.port_location {
            PortLocation::Vram => {
                let addr = (self.data_address & !0x01) as usize;
                u16::from_be_bytes([self.vram[addr], self.vram[(addr + 1) & 0xFFFF]])
            }
            PortLocation::Cram => {
                let addr = (self.data_address as usize) & 0x7F;
                u16::from_be_bytes([self.cram[addr], self.cram[(addr + 1) & 0x7F]])
            }
            PortLocation::Vsram => {
                let addr = (self.data_address as usize) % VSRAM_LEN;
                u16::from_be_bytes([self.vsram[addr], self.vsram[(addr + 1) % VSRAM_LEN]])
            }
        };
        self.advance_data_address();
        value
    }

    /// Status byte bits per spec.md §6: VINT pending, sprite overflow/collision, odd frame,
    /// VBlank, HBlank, DMA busy, PAL. Reading clears the control-port write-pending flag.
    pub fn read_status(&mut self) -> u16 {
        let status = (u16::from(self.v_interrupt_pending) << 7)
            | (u16::from(self.sprite_overflow) << 6)
            | (u16::from(self.sprite_collision) << 5)
            | (u16::from(self.odd_frame) << 4)
            | (u16::from(self.in_vblank()) << 3)
            | (u16::from(self.in_hblank()) << 2)
            | (u16::from(self.dma.active) << 1)
            | u16::from(self.timing_mode == GenesisTimingMode::Pal);

        self.sprite_overflow = false;
        self.sprite_collision = false;
        self.control_latch = ControlLatch::First;

        status
    }

    #[must_use]
    pub fn hv_counter(&self) -> u16 {
        u16::from_be_bytes([self.beam_v as u8, self.beam_h as u8])
    }

    fn write_vram_word(&mut self, address: u16, value: u16) {
        let [msb, lsb] = value.to_be_bytes();
        self.vram[address as usize] = msb;
        self.vram[(address ^ 0x01) as usize] = lsb;
    }

    fn write_cram_word(&mut self, address: u16, value: u16) {
        let addr = (address as usize) & 0x7F;
        let [msb, lsb] = value.to_be_bytes();
        self.cram[addr] = msb;
        self.cram[(addr + 1) & 0x7F] = lsb;
    }

    fn write_vsram_word(&mut self, address: u16, value: u16) {
        let addr = (address as usize) % VSRAM_LEN;
        let [msb, lsb] = value.to_be_bytes();
        self.vsram[addr] = msb;
        self.vsram[(addr + 1) % VSRAM_LEN] = lsb;
    }

    fn advance_data_address(&mut self) {
        self.data_address = self.data_address.wrapping_add(self.registers.auto_increment);
    }

    fn in_vblank(&self) -> bool {
        self.beam_v >= self.registers.active_scanlines()
    }

    fn in_hblank(&self) -> bool {
        self.beam_h >= self.registers.screen_width()
    }

    #[must_use]
    pub fn dma_in_progress(&self) -> bool {
        self.dma.active
    }

    pub fn m68k_interrupt_level(&self) -> u8 {
        if self.v_interrupt_pending && self.registers.v_interrupt_enabled {
            6
        } else if self.h_interrupt_pending && self.registers.h_interrupt_enabled {
            4
        } else {
            0
        }
    }

    pub fn acknowledge_m68k_interrupt(&mut self) {
        match self.m68k_interrupt_level() {
            6 => self.v_interrupt_pending = false,
            4 => self.h_interrupt_pending = false,
            _ => {}
        }
    }

    /// The Z80's interrupt line is asserted for the duration of the first VBlank scanline
    /// (spec.md §4.3).
    #[must_use]
    pub fn z80_interrupt_line(&self) -> InterruptLine {
        if self.beam_v == self.registers.active_scanlines() {
            InterruptLine::Low
        } else {
            InterruptLine::High
        }
    }

    #[must_use]
    pub fn frame_buffer(&self) -> &[Color] {
        &self.frame_buffer
    }

    #[must_use]
    pub fn screen_width(&self) -> u32 {
        self.registers.screen_width().into()
    }

    #[must_use]
    pub fn screen_height(&self) -> u32 {
        self.registers.active_scanlines().into()
    }

    /// Advances the beam by `ticks` pixels (spec.md §4.3, §4.5). `memory` is consulted for
    /// MEM→VRAM DMA source reads; the 68K bus observes memory at the moment each DMA step
    /// runs, never at the moment DMA was armed (spec.md §5's ordering guarantee).
    pub fn tick(&mut self, ticks: u32, memory: &Memory) -> VdpTickEffect {
        let mut effect = VdpTickEffect::None;
        for _ in 0..ticks {
            if self.dma.active {
                self.run_dma_step(memory);
            }
            if self.step_pixel() == VdpTickEffect::FrameComplete {
                effect = VdpTickEffect::FrameComplete;
            }
        }
        effect
    }

    /// One DMA micro-step: exactly one word transferred regardless of beam position, since
    /// the scheduler already dispenses many more ticks per call while blanking (spec.md §4.3's
    /// "many per tick during blanking" falls out of HBlank/VBlank simply consuming more ticks
    /// per frame than active display does).
    fn run_dma_step(&mut self, memory: &Memory) {
        match self.dma.mode {
            DmaMode::MemToVram => {
                // `dma.source` is already a byte address: register 21's write assembled it
                // pre-shifted from the hardware's word-indexed register (spec.md §4.3).
                let word = memory.read_word_for_dma(self.dma.source);
                match self.port_location {
                    // `write_vram_word` already places the high/low bytes at
                    // `address`/`address ^ 1`, which is the hardware odd-address swap; no
                    // separate pre-swap here (matches the CPU-side `write_data` path).
                    PortLocation::Vram => self.write_vram_word(self.data_address, word),
                    PortLocation::Cram => self.write_cram_word(self.data_address, word),
                    PortLocation::Vsram => self.write_vsram_word(self.data_address, word),
                }
                self.dma.source = self.dma.source.wrapping_add(2);
                self.advance_data_address();
            }
            DmaMode::VramFill => {
                let [msb, _] = self.dma.fill_word.to_be_bytes();
                self.vram[self.data_address as usize] = msb;
                self.advance_data_address();
            }
            DmaMode::VramCopy => {
                // VRAM copy treats the source as a raw 16-bit VRAM word index rather than a
                // byte address, so undo the byte-scaling applied at register-write time
                // (spec.md §4.3). Each step copies both bytes of the word, source `^1` paired
                // with destination `^1`, matching the aligned-word transfer the fill/MEM→VRAM
                // paths also perform.
                let src = (self.dma.source >> 1) as u16;
                let low = self.vram[src as usize];
                let high = self.vram[(src ^ 0x01) as usize];
                self.vram[self.data_address as usize] = low;
                self.vram[(self.data_address ^ 0x01) as usize] = high;
                self.dma.source = self.dma.source.wrapping_add(2);
                self.advance_data_address();
            }
        }

        self.dma.length -= 1;
        if self.dma.length == 0 {
            self.dma.active = false;
            self.registers.dma_source = self.dma.source;
            self.registers.dma_length = 0;
        }
    }

    fn step_pixel(&mut self) -> VdpTickEffect {
        let mut effect = VdpTickEffect::None;

        if self.beam_h == 0 && self.beam_v < self.registers.active_scanlines() {
            self.render_scanline(self.beam_v);
        }
        if self.beam_h == 0 && self.beam_v == 0 {
            self.rebuild_color_cache();
            self.rebuild_sprite_cache();
        }

        let overscan_width = self.timing_mode.overscan_width();
        let overscan_height = self.timing_mode.overscan_height();

        self.beam_h += 1;
        if self.beam_h >= overscan_width {
            self.beam_h = 0;

            if self.beam_v == self.registers.active_scanlines() {
                self.v_interrupt_pending = true;
            }

            if self.h_interrupt_counter == 0 {
                self.h_interrupt_counter = self.registers.h_interrupt_interval;
                self.h_interrupt_pending = true;
            } else {
                self.h_interrupt_counter -= 1;
            }

            self.beam_v += 1;
            if self.beam_v >= overscan_height {
                self.beam_v = 0;
                self.odd_frame = !self.odd_frame;
                effect = VdpTickEffect::FrameComplete;
            }
        }

        effect
    }

    fn rebuild_color_cache(&mut self) {
        let table = if self.registers.palsel { GENESIS_LUMINANCE } else { MASTER_SYSTEM_LUMINANCE };
        for (i, entry) in self.color_cache.iter_mut().enumerate() {
            let addr = 2 * i;
            let word = u16::from_be_bytes([self.cram[addr], self.cram[addr + 1]]);
            let r = ((word >> 1) & 0x07) as usize;
            let g = ((word >> 5) & 0x07) as usize;
            let b = ((word >> 9) & 0x07) as usize;
            *entry = Color::rgb(table[r], table[g], table[b]);
        }
    }

    fn rebuild_sprite_cache(&mut self) {
        self.sprite_cache.clear();
        let table_len = if self.registers.cell_40 { 80 } else { 64 };

        let mut index: u16 = 0;
        let mut visited = 0;
        loop {
            let sprite = read_sprite(self.vram.as_slice(), self.registers.sprite_table_addr, index);
            self.sprite_cache.push(sprite);
            visited += 1;

            index = u16::from(sprite.link);
            if index == 0 || index >= table_len || visited >= MAX_SPRITES {
                break;
            }
        }

        self.sprite_cache.sort_by_key(|s| (s.v_position, s.h_position, !s.priority));
    }

    fn render_scanline(&mut self, scanline: u16) {
        let screen_width = self.registers.screen_width();

        if !self.registers.display_enabled {
            let bg = self.color_cache[((self.registers.bg_palette << 4) | self.registers.bg_color_id) as usize];
            for pixel in 0..screen_width {
                self.put_pixel(scanline, pixel, bg);
            }
            return;
        }

        let sprites_on_line = self.sprites_on_scanline(scanline);
        let h_scroll = self.read_h_scroll_row(scanline);

        for pixel in 0..screen_width {
            let h_cell = pixel / 8;
            let v_scroll = self.read_v_scroll_col(h_cell);

            let in_window = self.is_in_window(scanline, pixel);

            let (a_priority, a_palette, a_color_id) = if in_window {
                self.sample_plane(self.registers.window_addr, self.window_width_cells(), scanline, pixel, 0, 0)
            } else {
                self.sample_plane(
                    self.registers.scroll_a_addr,
                    self.registers.h_scroll_size,
                    scanline,
                    pixel,
                    h_scroll.0,
                    v_scroll.0,
                )
            };
            let (b_priority, b_palette, b_color_id) = self.sample_plane(
                self.registers.scroll_b_addr,
                self.registers.h_scroll_size,
                scanline,
                pixel,
                h_scroll.1,
                v_scroll.1,
            );
            let sprite_pixel = self.sample_sprite(&sprites_on_line, scanline, pixel);

            let color = self.compose_pixel(
                (a_priority, a_palette, a_color_id),
                (b_priority, b_palette, b_color_id),
                sprite_pixel,
            );
            self.put_pixel(scanline, pixel, color);
        }
    }

    fn window_width_cells(&self) -> u16 {
        if self.registers.cell_40 { 64 } else { 32 }
    }

    fn is_in_window(&self, scanline: u16, pixel: u16) -> bool {
        let in_x = if self.registers.window_right_half {
            pixel >= self.registers.window_x
        } else {
            self.registers.window_x > 0 && pixel < self.registers.window_x
        };
        let in_y = if self.registers.window_bottom_half {
            scanline / 8 >= self.registers.window_y
        } else {
            self.registers.window_y > 0 && scanline / 8 < self.registers.window_y
        };
        in_x || in_y
    }

    /// Horizontal scroll values for this row, per the mode register 3 HS bits (spec.md §4.3).
    fn read_h_scroll_row(&self, scanline: u16) -> (u16, u16) {
        let addr = match self.registers.h_scroll_mode {
            HScrollMode::FullScreen => self.registers.h_scroll_table_addr,
            HScrollMode::Cell => self.registers.h_scroll_table_addr.wrapping_add(32 * (scanline / 8)),
            HScrollMode::Line => self.registers.h_scroll_table_addr.wrapping_add(4 * scanline),
        };
        let a = self.vram_word(addr) & 0x03FF;
        let b = self.vram_word(addr.wrapping_add(2)) & 0x03FF;
        (a, b)
    }

    /// Vertical scroll values for this column, per the mode register 3 VS bit.
    fn read_v_scroll_col(&self, h_cell: u16) -> (u16, u16) {
        let addr = match self.registers.v_scroll_mode {
            VScrollMode::FullScreen => 0,
            VScrollMode::TwoCell => 4 * (h_cell / 2),
        } as usize;
        let a = u16::from_be_bytes([self.vsram[addr % VSRAM_LEN], self.vsram[(addr + 1) % VSRAM_LEN]]);
        let b = u16::from_be_bytes([
            self.vsram[(addr + 2) % VSRAM_LEN],
            self.vsram[(addr + 3) % VSRAM_LEN],
        ]);
        (a & 0x03FF, b & 0x03FF)
    }

    fn vram_word(&self, address: u16) -> u16 {
        u16::from_be_bytes([self.vram[address as usize], self.vram[(address.wrapping_add(1)) as usize]])
    }

    /// Samples a tilemap plane at `(scanline, pixel)` after applying scroll. Returns
    /// (priority, palette, color id); color id 0 means transparent.
    fn sample_plane(
        &self,
        base_addr: u16,
        width_cells: u16,
        scanline: u16,
        pixel: u16,
        h_scroll: u16,
        v_scroll: u16,
    ) -> (bool, u8, u8) {
        let scrolled_row = scanline.wrapping_add(v_scroll);
        let v_cell = scrolled_row / 8;
        let scrolled_col = pixel.wrapping_sub(h_scroll);
        let h_cell = (scrolled_col / 8) & (width_cells.wrapping_sub(1));

        let row_addr = base_addr.wrapping_add(2 * v_cell.wrapping_mul(width_cells));
        let nt_addr = row_addr.wrapping_add(2 * h_cell);
        let word = self.vram_word(nt_addr);

        let priority = word.bit(15);
        let palette = ((word >> 13) & 0x03) as u8;
        let v_flip = word.bit(12);
        let h_flip = word.bit(11);
        let pattern = word & 0x07FF;

        let cell_row = if v_flip { 7 - (scrolled_row % 8) } else { scrolled_row % 8 };
        let cell_col = if h_flip { 7 - (scrolled_col % 8) } else { scrolled_col % 8 };
        let color_id = self.read_pattern_pixel(pattern, cell_row, cell_col);

        (priority, palette, color_id)
    }

    fn read_pattern_pixel(&self, pattern: u16, row: u16, col: u16) -> u8 {
        let addr = (32 * u32::from(pattern) + 4 * u32::from(row) + u32::from(col >> 1)) as usize;
        let byte = self.vram[addr & 0xFFFF];
        if col & 0x01 == 0 { byte >> 4 } else { byte & 0x0F }
    }

    fn sprites_on_scanline(&self, scanline: u16) -> Vec<Sprite> {
        let max_sprites = if self.registers.cell_40 { 20 } else { 16 };
        let sprite_top = 128u16;

        let mut on_line = Vec::new();
        for sprite in &self.sprite_cache {
            let height = 8 * u16::from(sprite.v_size_cells);
            let top = sprite.v_position;
            let bottom = top + height;
            let line = sprite_top + scanline;
            if (top..bottom).contains(&line) {
                on_line.push(*sprite);
                if on_line.len() >= max_sprites {
                    break;
                }
            }
        }
        on_line
    }

    fn sample_sprite(&mut self, sprites: &[Sprite], scanline: u16, pixel: u16) -> Option<(bool, u8, u8)> {
        let sprite_left = 128u16;
        let sprite_pixel = sprite_left + pixel;
        let mut found = None;

        for sprite in sprites {
            let width = 8 * u16::from(sprite.h_size_cells);
            let left = sprite.h_position;
            if !(left..left + width).contains(&sprite_pixel) {
                continue;
            }

            let row_in_sprite = (sprite_left + scanline) - sprite.v_position;
            let row_in_sprite =
                if sprite.vertical_flip { 8 * u16::from(sprite.v_size_cells) - 1 - row_in_sprite } else { row_in_sprite };
            let col_in_sprite = sprite_pixel - left;
            let col_in_sprite =
                if sprite.horizontal_flip { width - 1 - col_in_sprite } else { col_in_sprite };

            let cell_index = (col_in_sprite / 8) * u16::from(sprite.v_size_cells) + row_in_sprite / 8;
            let pattern = sprite.pattern_generator.wrapping_add(cell_index);
            let color_id = self.read_pattern_pixel(pattern, row_in_sprite % 8, col_in_sprite % 8);
            if color_id == 0 {
                continue;
            }

            if found.is_some() {
                self.sprite_collision = true;
                break;
            }
            found = Some((sprite.priority, sprite.palette, color_id));
        }

        found
    }

    /// Composites one pixel per spec.md §4.3's fixed order: background, plane B, plane A,
    /// sprite, then each layer's priority variant overwriting the previous, highest priority
    /// last.
    fn compose_pixel(
        &self,
        plane_a: (bool, u8, u8),
        plane_b: (bool, u8, u8),
        sprite: Option<(bool, u8, u8)>,
    ) -> Color {
        let bg = self.color_cache[((self.registers.bg_palette << 4) | self.registers.bg_color_id) as usize];
        let mut result = bg;

        let (a_priority, a_palette, a_color) = plane_a;
        let (b_priority, b_palette, b_color) = plane_b;

        if b_color != 0 && !b_priority {
            result = self.color_cache[((b_palette << 4) | b_color) as usize];
        }
        if a_color != 0 && !a_priority {
            result = self.color_cache[((a_palette << 4) | a_color) as usize];
        }
        if let Some((s_priority, s_palette, s_color)) = sprite {
            if s_color != 0 && !s_priority {
                result = self.color_cache[((s_palette << 4) | s_color) as usize];
            }
        }
        if b_color != 0 && b_priority {
            result = self.color_cache[((b_palette << 4) | b_color) as usize];
        }
        if a_color != 0 && a_priority {
            result = self.color_cache[((a_palette << 4) | a_color) as usize];
        }
        if let Some((s_priority, s_palette, s_color)) = sprite {
            if s_color != 0 && s_priority {
                result = self.color_cache[((s_palette << 4) | s_color) as usize];
            }
        }

        result
    }

    fn put_pixel(&mut self, row: u16, col: u16, color: Color) {
        let width = self.registers.screen_width() as usize;
        let idx = row as usize * width + col as usize;
        if idx < self.frame_buffer.len() {
            self.frame_buffer[idx] = color;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select_register(vdp: &mut Vdp, register: u8, value: u8) {
        vdp.write_control(0x8000 | (u16::from(register) << 8) | u16::from(value));
    }

    #[test]
    fn register_program_sets_pal_status_bit() {
        let mut vdp = Vdp::new(GenesisTimingMode::Pal);
        // Two byte writes 0x80 then 0x14 select register 0 and write 0x14 (spec.md §8 scenario 3).
        select_register(&mut vdp, 0, 0x14);

        let status = vdp.read_status();
        assert_eq!(status & 0x01, 1, "PAL bit should be set for PAL timing");
    }

    #[test]
    fn control_write_pending_flag_alternates_and_clears_on_status_read() {
        let mut vdp = Vdp::new(GenesisTimingMode::Ntsc);
        vdp.write_control(0x4000); // first word of a command (not a register select)
        assert_eq!(vdp.control_latch, ControlLatch::Second);

        vdp.read_status();
        assert_eq!(vdp.control_latch, ControlLatch::First);
    }

    #[test]
    fn vram_write_then_read_round_trips() {
        let mut vdp = Vdp::new(GenesisTimingMode::Ntsc);
        select_register(&mut vdp, 15, 2); // auto-increment by 2

        vdp.write_control(0x4000); // address 0, code low bits select VRAM write
        vdp.write_control(0x0000); // second word: no DMA, code high bits clear
        vdp.write_data(0xABCD);

        vdp.write_control(0x0000); // address 0, code low bits select VRAM read
        vdp.write_control(0x0000);
        let value = vdp.read_data();
        assert_eq!(value, 0xABCD);
    }

    #[test]
    fn vram_fill_dma_writes_high_byte_repeatedly() {
        let mut vdp = Vdp::new(GenesisTimingMode::Ntsc);
        let memory = Memory::new(crate::memory::test_support::empty_cartridge());

        select_register(&mut vdp, 1, 0x10); // DMA enabled
        select_register(&mut vdp, 15, 1); // auto increment 1
        select_register(&mut vdp, 19, 16); // DMA length low = 16
        select_register(&mut vdp, 20, 0); // DMA length high = 0
        select_register(&mut vdp, 23, 0x80); // DMA mode = VRAM fill

        vdp.write_control(0x4000); // address 0, first word (code low bits = VRAM write)
        vdp.write_control(0x0080); // second word: code bit 5 set (DMA) plus VRAM write code

        vdp.write_data(0xABCD); // arms the fill and performs the first ordinary write

        while vdp.dma_in_progress() {
            vdp.tick(1, &memory);
        }

        assert_eq!(vdp.vram[0x0000], 0xCD);
        for addr in 0x0001..=0x000F {
            assert_eq!(vdp.vram[addr], 0xAB, "byte {addr:04X} should hold the fill MSB");
        }
    }

    #[test]
    fn vram_copy_dma_copies_both_bytes_per_step() {
        let mut vdp = Vdp::new(GenesisTimingMode::Ntsc);
        let memory = Memory::new(crate::memory::test_support::empty_cartridge());

        vdp.vram[0x0010] = 0x12;
        vdp.vram[0x0011] = 0x34;

        select_register(&mut vdp, 1, 0x10); // DMA enabled
        select_register(&mut vdp, 15, 2); // auto increment 2
        select_register(&mut vdp, 19, 1); // DMA length low = 1 (one word-sized step)
        select_register(&mut vdp, 20, 0); // DMA length high = 0
        select_register(&mut vdp, 21, 0x10); // source register -> VRAM source address 0x10
        select_register(&mut vdp, 22, 0);
        select_register(&mut vdp, 23, 0xC0); // DMA mode = VRAM copy

        vdp.write_control(0x4100); // address 0x0100, first word (code low bits = VRAM write)
        vdp.write_control(0x0080); // second word: code bit 5 set (DMA) plus VRAM write code

        while vdp.dma_in_progress() {
            vdp.tick(1, &memory);
        }

        assert_eq!(vdp.vram[0x0100], 0x12, "low byte of the source word should be copied");
        assert_eq!(vdp.vram[0x0101], 0x34, "high byte of the source word should also be copied");
    }

    #[test]
    fn hblank_interrupt_fires_once_per_programmed_interval() {
        let mut vdp = Vdp::new(GenesisTimingMode::Ntsc);
        let memory = Memory::new(crate::memory::test_support::empty_cartridge());
        select_register(&mut vdp, 0, 0x10); // IE1 enabled
        select_register(&mut vdp, 10, 2); // H interrupt every 2 lines
        vdp.h_interrupt_counter = 2;

        let mut fires = 0;
        for _ in 0..3 {
            for _ in 0..vdp.timing_mode.overscan_width() {
                vdp.tick(1, &memory);
            }
            if vdp.h_interrupt_pending {
                fires += 1;
                vdp.h_interrupt_pending = false;
            }
        }
        assert_eq!(fires, 1, "exactly one level-4 interrupt should fire across three scanlines");
    }
}
