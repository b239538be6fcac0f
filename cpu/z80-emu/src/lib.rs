//! A coarse-timed Zilog Z80 interpreter wrapped in the bus-request/reset arbitration a
//! Genesis sound subsystem drives it through (spec.md §4.4): the 68000 side can halt the
//! Z80 and hold it in reset without the Z80 core itself knowing anything about that bus.

mod instructions;
mod registers;
pub mod traits;

pub use traits::BusInterface;

use crate::instructions::Core;
use crate::registers::Registers;

#[derive(Debug, Clone)]
pub struct Z80 {
    registers: Registers,
    /// Set by a BUSREQ write with a nonzero value; cleared when the 68000 releases it.
    bus_requested: bool,
    /// Set while RESET is held low; the Z80 does not execute and its registers hold their
    /// last state until release, at which point `reset()` is applied.
    reset_asserted: bool,
    current_ticks: i64,
}

impl Default for Z80 {
    fn default() -> Self {
        Self::new()
    }
}

impl Z80 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registers: Registers::new(),
            bus_requested: false,
            reset_asserted: true,
            current_ticks: 0,
        }
    }

    /// Reinitializes registers the way a hardware RESET does: PC/SP/I/R cleared, IFF1/IFF2
    /// disabled, SP at the top of the 64K address space.
    pub fn reset(&mut self) {
        self.registers = Registers::new();
        self.current_ticks = 0;
    }

    /// Whether the Z80 is halted because BUSREQ is asserted or RESET is held.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.bus_requested || self.reset_asserted
    }

    pub fn set_bus_request(&mut self, requested: bool) {
        self.bus_requested = requested;
    }

    #[must_use]
    pub fn bus_request_acknowledged(&self) -> bool {
        self.bus_requested
    }

    /// Raising edge (asserted -> not asserted) reinitializes registers, mirroring the
    /// real part's behavior of coming out of reset into a known state.
    pub fn set_reset(&mut self, asserted: bool) {
        let was_asserted = self.reset_asserted;
        self.reset_asserted = asserted;
        if was_asserted && !asserted {
            self.reset();
        }
    }

    #[must_use]
    pub fn pc(&self) -> u16 {
        self.registers.pc
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.registers.pc = pc;
    }

    #[must_use]
    pub fn sp(&self) -> u16 {
        self.registers.sp
    }

    #[must_use]
    pub fn interrupts_enabled(&self) -> bool {
        self.registers.iff1
    }

    /// Delivers a maskable interrupt if IFF1 is set; the sound driver's interrupt handler
    /// address is supplied by the caller since this core only implements interrupt mode 1's
    /// fixed-vector behavior, the mode the 68000-driven handshake actually uses.
    pub fn maybe_interrupt<B: BusInterface>(&mut self, bus: &mut B, handler: u16) -> bool {
        if self.is_suspended() || !self.registers.iff1 {
            return false;
        }
        self.registers.iff1 = false;
        self.registers.iff2 = false;
        let pc = self.registers.pc;
        self.registers.sp = self.registers.sp.wrapping_sub(1);
        bus.write_memory(self.registers.sp, (pc >> 8) as u8);
        self.registers.sp = self.registers.sp.wrapping_sub(1);
        bus.write_memory(self.registers.sp, pc as u8);
        self.registers.pc = handler;
        self.current_ticks += 13;
        true
    }

    /// Subtracts `ticks` from the tick credit and runs instructions while it is negative and
    /// the Z80 is not suspended. Ticks spent while suspended are simply absorbed, matching
    /// the real chip holding its internal clock during BUSREQ/RESET.
    pub fn clock<B: BusInterface>(&mut self, ticks: u32, bus: &mut B) {
        self.current_ticks -= i64::from(ticks);

        while self.current_ticks < 0 {
            if self.is_suspended() {
                self.current_ticks = 0;
                break;
            }

            let mut core = Core { registers: &mut self.registers, bus };
            let spent = core.step();
            self.current_ticks += i64::from(spent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::InMemoryBus;

    #[test]
    fn starts_held_in_reset() {
        let z80 = Z80::new();
        assert!(z80.is_suspended());
    }

    #[test]
    fn releasing_reset_allows_execution() {
        let mut z80 = Z80::new();
        let mut bus = InMemoryBus::new();
        bus.memory[0] = 0x3E; // LD A,n
        bus.memory[1] = 0x42;

        z80.set_reset(false);
        z80.clock(7, &mut bus);

        assert_eq!(z80.pc(), 2);
    }

    #[test]
    fn busreq_suspends_execution_without_losing_state() {
        let mut z80 = Z80::new();
        let mut bus = InMemoryBus::new();
        bus.memory[0] = 0x00; // NOP

        z80.set_reset(false);
        z80.set_bus_request(true);
        z80.clock(100, &mut bus);

        assert_eq!(z80.pc(), 0, "no instructions fetched while BUSREQ is asserted");
    }

    #[test]
    fn ld_a_n_then_add_b_sets_carry_on_overflow() {
        let mut z80 = Z80::new();
        let mut bus = InMemoryBus::new();
        // LD A,$FF ; LD B,$02 ; ADD A,B
        bus.memory[0] = 0x3E;
        bus.memory[1] = 0xFF;
        bus.memory[2] = 0x06;
        bus.memory[3] = 0x02;
        bus.memory[4] = 0x80;

        z80.set_reset(false);
        z80.clock(7 + 7 + 4, &mut bus);

        assert_eq!(z80.registers.a, 0x01);
        assert!(z80.registers.f.carry());
    }

    #[test]
    fn call_then_ret_round_trips_pc_and_stack() {
        let mut z80 = Z80::new();
        let mut bus = InMemoryBus::new();
        bus.memory[0] = 0xCD; // CALL $0010
        bus.memory[1] = 0x10;
        bus.memory[2] = 0x00;
        bus.memory[0x10] = 0xC9; // RET

        z80.set_reset(false);
        let sp_before = z80.sp();
        z80.clock(17, &mut bus);
        assert_eq!(z80.pc(), 0x0010);

        z80.clock(10, &mut bus);
        assert_eq!(z80.pc(), 0x0003);
        assert_eq!(z80.sp(), sp_before);
    }

    #[test]
    fn djnz_loops_until_counter_reaches_zero() {
        let mut z80 = Z80::new();
        let mut bus = InMemoryBus::new();
        // LD B,$03 ; DJNZ -2 (spin on itself)
        bus.memory[0] = 0x06;
        bus.memory[1] = 0x03;
        bus.memory[2] = 0x10;
        bus.memory[3] = 0xFE;

        z80.set_reset(false);
        z80.clock(7, &mut bus);
        z80.clock(13 * 2 + 8, &mut bus);

        assert_eq!(z80.registers.b, 0);
        assert_eq!(z80.pc(), 4);
    }

    #[test]
    fn maybe_interrupt_pushes_return_address_and_jumps_to_handler() {
        let mut z80 = Z80::new();
        let mut bus = InMemoryBus::new();
        z80.set_reset(false);
        z80.registers.iff1 = true;
        z80.set_pc(0x1234);

        let taken = z80.maybe_interrupt(&mut bus, 0x0038);
        assert!(taken);
        assert_eq!(z80.pc(), 0x0038);
        assert!(!z80.interrupts_enabled());
    }
}
