//! A coarse-timed Motorola 68000 interpreter.
//!
//! The interpreter decodes every 16-bit opcode once, at construction time, into a
//! 65,536-entry routine cache (see [`decode`]) rather than re-decoding on every fetch.
//! Timing is a per-instruction tick budget, not a cycle-exact bus-phase model: see
//! [`M68000::clock`].

mod addressing;
mod condition;
mod decode;
mod exception;
mod instructions;
mod interrupt;
mod registers;
#[cfg(test)]
mod tests;

pub mod traits;

pub use exception::Vector;
pub use interrupt::PendingInterrupt;
pub use traits::BusInterface;

use crate::addressing::InstructionExecutor;
use crate::exception::Fault;
use crate::interrupt::InterruptController;
use crate::registers::Registers;
use std::collections::BTreeSet;

/// Execution state per spec.md §3's invariant: while halted, no instructions are fetched,
/// and only an external reset clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Normal,
    Stopped,
    Halted,
}

#[derive(Debug, Default, Clone)]
pub struct DebugState {
    pub breakpoints: BTreeSet<u32>,
    pub trace_log_enabled: bool,
    pub paused: bool,
}

#[derive(Debug, Clone)]
pub struct M68000 {
    registers: Registers,
    run_state: RunState,
    interrupts: InterruptController,
    /// Signed tick credit; driven negative by `clock`, consumed by executed instructions.
    current_ticks: i64,
    /// True while the VDP (or another external agent) holds the bus, e.g. during a
    /// memory-to-VRAM DMA transfer. The interpreter still consumes ticks but fetches nothing.
    external_disable: bool,
    in_exception_handler: bool,
    last_opcode: u16,
    debug: DebugState,
}

impl Default for M68000 {
    fn default() -> Self {
        Self::new()
    }
}

impl M68000 {
    #[must_use]
    pub fn new() -> Self {
        decode::table();

        Self {
            registers: Registers::new(),
            run_state: RunState::Normal,
            interrupts: InterruptController::new(),
            current_ticks: 0,
            external_disable: false,
            in_exception_handler: false,
            last_opcode: 0,
            debug: DebugState::default(),
        }
    }

    pub fn debug_mut(&mut self) -> &mut DebugState {
        &mut self.debug
    }

    #[must_use]
    pub fn debug(&self) -> &DebugState {
        &self.debug
    }

    #[must_use]
    pub fn last_opcode(&self) -> u16 {
        self.last_opcode
    }

    /// Reload SSP/PC from the vector table at `$000000`/`$000004`, set SR to
    /// supervisor + maximum interrupt mask, and clear halt/stop and pending interrupts.
    pub fn reset<B: BusInterface>(&mut self, bus: &mut B) {
        self.registers = Registers::new();
        self.registers.ssp = bus.read_long_word(0x0000_0000);
        self.registers.pc = bus.read_long_word(0x0000_0004);
        self.registers.supervisor_mode = true;
        self.registers.interrupt_mask = 7;
        self.registers.trace_enabled = false;
        self.run_state = RunState::Normal;
        self.interrupts.clear();
        self.current_ticks = 0;
        self.in_exception_handler = false;
    }

    pub fn interrupt_request(&mut self, device: u8, level: u8) {
        self.interrupts.push(PendingInterrupt { device, level: level.clamp(1, 7) });
    }

    pub fn clear_interrupt(&mut self, device: u8) {
        self.interrupts.clear_device(device);
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        self.external_disable = disabled;
    }

    #[must_use]
    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    #[must_use]
    pub fn data_registers(&self) -> [u32; 8] {
        self.registers.data
    }

    pub fn set_data_registers(&mut self, data: [u32; 8]) {
        self.registers.data = data;
    }

    #[must_use]
    pub fn address_registers(&self) -> [u32; 7] {
        self.registers.address
    }

    #[must_use]
    pub fn pc(&self) -> u32 {
        self.registers.pc
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.registers.pc = pc;
    }

    #[must_use]
    pub fn status_register(&self) -> u16 {
        self.registers.status_register()
    }

    pub fn set_status_register(&mut self, sr: u16) {
        self.registers.set_status_register(sr);
    }

    #[must_use]
    pub fn supervisor_stack_pointer(&self) -> u32 {
        self.registers.ssp
    }

    pub fn set_supervisor_stack_pointer(&mut self, value: u32) {
        self.registers.ssp = value;
    }

    #[must_use]
    pub fn user_stack_pointer(&self) -> u32 {
        self.registers.usp
    }

    /// Subtracts `ticks` from the tick credit, then runs instructions while the credit is
    /// negative. Interrupts are serviced on instruction boundaries only; there is no
    /// preemption mid-instruction (spec.md §5's suspension-point guarantee).
    pub fn clock<B: BusInterface>(&mut self, ticks: u32, bus: &mut B) {
        self.current_ticks -= i64::from(ticks);

        while self.current_ticks < 0 {
            if self.debug.paused {
                self.current_ticks = 0;
                break;
            }

            let ticks_before_interrupt = self.current_ticks;
            self.service_pending_interrupt(bus);
            if self.current_ticks != ticks_before_interrupt && self.current_ticks >= 0 {
                break;
            }

            if self.run_state == RunState::Halted {
                // Only an external reset exits HALT; stall until one arrives.
                self.current_ticks = 0;
                break;
            }

            if self.external_disable {
                self.current_ticks += 1;
                continue;
            }

            if self.run_state == RunState::Stopped {
                self.current_ticks += 4;
                continue;
            }

            if self.debug.breakpoints.contains(&self.registers.pc) {
                self.debug.paused = true;
                self.current_ticks = 0;
                break;
            }

            let spent = self.execute_one(bus);
            self.current_ticks += i64::from(spent);
        }
    }

    fn service_pending_interrupt<B: BusInterface>(&mut self, bus: &mut B) {
        let Some(pending) = self.interrupts.peek_highest() else { return };

        let takes = pending.level == 7 || pending.level > self.registers.interrupt_mask;
        if !takes {
            return;
        }

        if self.run_state == RunState::Stopped {
            self.run_state = RunState::Normal;
        }

        self.interrupts.pop_highest();
        bus.acknowledge_interrupt(pending.device);

        let vector = exception::Vector::autovector(pending.level);
        let mut executor = InstructionExecutor::new(&mut self.registers, bus);
        executor.enter_interrupt(pending.level, vector);

        // Exception-entry overhead, same order of magnitude as a bus/address fault; charged
        // here (rather than returned from `execute_one`) since interrupt service happens
        // before any instruction fetch in this iteration.
        self.current_ticks += 44;
    }

    fn execute_one<B: BusInterface>(&mut self, bus: &mut B) -> u32 {
        let pc_at_fetch = self.registers.pc;
        if pc_at_fetch % 2 != 0 {
            let fault_info = (pc_at_fetch, true, self.last_opcode);
            return self.handle_fault(bus, exception::Vector::AddressError.number(), Some(fault_info));
        }
        let opcode = bus.read_word(pc_at_fetch);
        if bus.take_bus_error() {
            let fault_info = (pc_at_fetch, true, self.last_opcode);
            return self.handle_fault(bus, exception::Vector::BusError.number(), Some(fault_info));
        }
        self.last_opcode = opcode;
        self.registers.pc = pc_at_fetch.wrapping_add(2);

        let instruction = decode::table().lookup(opcode);

        let mut executor = InstructionExecutor::new(&mut self.registers, bus);
        let was_tracing = executor.registers.trace_enabled;
        let result = instructions::execute(&mut executor, instruction);

        match result {
            Ok(ticks) => {
                if was_tracing {
                    let mut executor = InstructionExecutor::new(&mut self.registers, bus);
                    executor.process_exception(exception::Vector::Trace.number(), None);
                }
                ticks
            }
            Err(fault @ Fault::Exception(_)) => self.handle_fault(bus, fault.vector(), None),
            Err(Fault::BusFault { vector, address, read }) => {
                let fault_info = (address, read, self.last_opcode);
                self.handle_fault(bus, vector, Some(fault_info))
            }
            Err(Fault::Stopped) => {
                self.run_state = RunState::Stopped;
                4
            }
        }
    }

    fn handle_fault<B: BusInterface>(
        &mut self,
        bus: &mut B,
        vector: u32,
        fault_info: Option<(u32, bool, u16)>,
    ) -> u32 {
        if self.in_exception_handler {
            log::warn!("Double fault while dispatching vector {vector}; halting 68000");
            self.run_state = RunState::Halted;
            return 34;
        }

        // Privilege violation is always caught before an instruction consumes any extension
        // words, so the only outstanding PC advance is the 2 bytes from the opcode fetch
        // itself; rewind it so the pushed return address points at the faulting instruction.
        if vector == exception::Vector::PrivilegeViolation.number() {
            self.registers.pc = self.registers.pc.wrapping_sub(2);
        }

        self.in_exception_handler = true;
        let mut executor = InstructionExecutor::new(&mut self.registers, bus);
        executor.process_exception(vector, fault_info);
        self.in_exception_handler = false;
        if fault_info.is_some() { 58 } else { 50 }
    }
}
