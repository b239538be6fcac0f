//! Instruction execution: `execute` dispatches a decoded [`Instruction`] against an
//! [`InstructionExecutor`], returning the elapsed cycle count or a [`Fault`] to unwind into
//! exception processing (spec.md §4.2).

use crate::addressing::{AddressingMode, InstructionExecutor, ResolvedAddress};
use crate::condition::{set_condition_codes, set_logical_flags, CcrMask, OpClass};
use crate::decode::{BitSource, ExgMode, Instruction, ShiftDirection, ShiftMode, ShiftOperand};
use crate::exception::{Fault, Vector};
use crate::registers::Size;
use crate::traits::BusInterface;

type Res = Result<u32, Fault>;

pub(crate) fn execute<B: BusInterface>(
    executor: &mut InstructionExecutor<'_, '_, B>,
    instruction: Instruction,
) -> Res {
    match instruction {
        Instruction::Illegal => Err(Vector::IllegalInstruction.into()),
        Instruction::Nop => Ok(4),
        Instruction::Reset => {
            executor.bus.acknowledge_interrupt(0xFF);
            Ok(132)
        }
        Instruction::Stop => {
            let sr = executor.fetch_extension_word()?;
            require_supervisor(executor)?;
            executor.registers.set_status_register(sr);
            Err(Fault::Stopped)
        }
        Instruction::Rte => exec_rte(executor),
        Instruction::Rtr => exec_rtr(executor),
        Instruction::Rts => {
            executor.registers.pc = executor.pop_long()?;
            Ok(16)
        }
        Instruction::Trapv => {
            if executor.registers.ccr().overflow {
                Err(Vector::TrapV.into())
            } else {
                Ok(4)
            }
        }
        Instruction::Trap(n) => Err(Vector::Trap(n).into()),
        Instruction::Chk { mode, register } => exec_chk(executor, mode, register),

        Instruction::Move { size, src, dst } => exec_move(executor, size, src, dst),
        Instruction::Movea { size, src, register } => {
            let value = executor.read_operand(src, size)?;
            executor.registers.write_address(register, size.sign_extend(value));
            Ok(4)
        }
        Instruction::Moveq { register, value } => {
            let value = value as i32 as u32;
            executor.registers.data[register as usize] = value;
            set_logical_flags(executor.registers.ccr_mut(), value, Size::Long);
            Ok(4)
        }
        Instruction::MoveToCcr { src } => {
            let value = executor.read_operand(src, Size::Word)?;
            executor.registers.set_status_register(
                (executor.registers.status_register() & 0xFF00) | (value as u16 & 0x00FF),
            );
            Ok(12)
        }
        Instruction::MoveToSr { src } => {
            require_supervisor(executor)?;
            let value = executor.read_operand(src, Size::Word)?;
            executor.registers.set_status_register(value as u16);
            Ok(12)
        }
        Instruction::MoveFromSr { dst } => {
            let sr = executor.registers.status_register();
            executor.write_operand(dst, Size::Word, u32::from(sr))?;
            Ok(8)
        }
        Instruction::MoveUspToA { register } => {
            require_supervisor(executor)?;
            executor.registers.write_address(register, executor.registers.usp);
            Ok(4)
        }
        Instruction::MoveAToUsp { register } => {
            require_supervisor(executor)?;
            executor.registers.usp = executor.registers.read_address(register);
            Ok(4)
        }
        Instruction::Movem { size, mode, to_memory } => exec_movem(executor, size, mode, to_memory),
        Instruction::Movep { size, data_register, address_register, to_memory } => {
            exec_movep(executor, size, data_register, address_register, to_memory)
        }
        Instruction::Lea { mode, register } => {
            let ResolvedAddress::Memory(addr) = executor.resolve(mode, Size::Long)? else {
                return Err(Vector::IllegalInstruction.into());
            };
            executor.registers.write_address(register, addr);
            Ok(4)
        }
        Instruction::Pea { mode } => {
            let ResolvedAddress::Memory(addr) = executor.resolve(mode, Size::Long)? else {
                return Err(Vector::IllegalInstruction.into());
            };
            executor.push_long(addr)?;
            Ok(12)
        }
        Instruction::Clr { size, mode } => {
            executor.write_operand(mode, size, 0)?;
            set_logical_flags(executor.registers.ccr_mut(), 0, size);
            Ok(if size == Size::Long { 12 } else { 8 })
        }
        Instruction::Exg { mode, rx, ry } => {
            exec_exg(executor, mode, rx, ry);
            Ok(6)
        }
        Instruction::Ext { size, register } => {
            let current = executor.registers.data[register as usize];
            let extended = match size {
                Size::Word => (current as u8 as i8 as i16 as u16) as u32,
                _ => (current as u16 as i16 as i32) as u32,
            };
            let mask = if size == Size::Word { 0xFFFF_0000 } else { 0 };
            executor.registers.data[register as usize] = (current & mask) | (extended & !mask);
            set_logical_flags(executor.registers.ccr_mut(), extended, size);
            Ok(4)
        }
        Instruction::Swap { register } => {
            let value = executor.registers.data[register as usize];
            let swapped = value.rotate_left(16);
            executor.registers.data[register as usize] = swapped;
            set_logical_flags(executor.registers.ccr_mut(), swapped, Size::Long);
            Ok(4)
        }
        Instruction::Link { register } => {
            let addr = executor.registers.read_address(register);
            executor.push_long(addr)?;
            let sp = executor.registers.a7();
            executor.registers.write_address(register, sp);
            let displacement = executor.fetch_extension_word()? as i16;
            executor.registers.set_a7(sp.wrapping_add(displacement as i32 as u32));
            Ok(16)
        }
        Instruction::Unlk { register } => {
            let addr = executor.registers.read_address(register);
            executor.registers.set_a7(addr);
            let restored = executor.pop_long()?;
            executor.registers.write_address(register, restored);
            Ok(12)
        }

        Instruction::Add { size, mode, register, to_memory } => {
            exec_add_sub(executor, size, mode, register, to_memory, OpClass::Addition)
        }
        Instruction::Addi { size, mode } => exec_immediate_arith(executor, size, mode, OpClass::Addition),
        Instruction::Addq { size, mode, value } => exec_quick_arith(executor, size, mode, value, OpClass::Addition),
        Instruction::Adda { size, mode, register } => exec_address_arith(executor, size, mode, register, OpClass::Addition),
        Instruction::Addx { size, rx, ry, address_mode } => exec_extended_arith(executor, size, rx, ry, address_mode, OpClass::Addition),
        Instruction::Sub { size, mode, register, to_memory } => {
            exec_add_sub(executor, size, mode, register, to_memory, OpClass::Subtraction)
        }
        Instruction::Subi { size, mode } => exec_immediate_arith(executor, size, mode, OpClass::Subtraction),
        Instruction::Subq { size, mode, value } => exec_quick_arith(executor, size, mode, value, OpClass::Subtraction),
        Instruction::Suba { size, mode, register } => exec_address_arith(executor, size, mode, register, OpClass::Subtraction),
        Instruction::Subx { size, rx, ry, address_mode } => exec_extended_arith(executor, size, rx, ry, address_mode, OpClass::Subtraction),
        Instruction::Neg { size, mode } => {
            let value = executor.read_operand(mode, size)?;
            let result = 0u32.wrapping_sub(value);
            executor.write_operand(mode, size, result)?;
            set_condition_codes(executor.registers.ccr_mut(), value, 0, result, size, OpClass::Subtraction, CcrMask::ALL);
            Ok(6)
        }
        Instruction::Negx { size, mode } => {
            let extend = u32::from(executor.registers.ccr().extend);
            let value = executor.read_operand(mode, size)?;
            let result = 0u32.wrapping_sub(value).wrapping_sub(extend);
            executor.write_operand(mode, size, result)?;
            set_condition_codes(executor.registers.ccr_mut(), value, 0, result, size, OpClass::Subtraction, CcrMask::ALL);
            Ok(6)
        }
        Instruction::Cmp { size, mode, register } => {
            let src = executor.read_operand(mode, size)?;
            let dest = executor.registers.read_data_sized(register, size);
            let result = dest.wrapping_sub(src);
            set_condition_codes(executor.registers.ccr_mut(), src, dest, result, size, OpClass::Subtraction, CcrMask::NZVC);
            Ok(4)
        }
        Instruction::Cmpi { size, mode } => {
            let src = executor.read_operand(AddressingMode::Immediate, size)?;
            let dest = executor.read_operand(mode, size)?;
            let result = dest.wrapping_sub(src);
            set_condition_codes(executor.registers.ccr_mut(), src, dest, result, size, OpClass::Subtraction, CcrMask::NZVC);
            Ok(8)
        }
        Instruction::Cmpa { size, mode, register } => {
            let src = size.sign_extend(executor.read_operand(mode, size)?);
            let dest = executor.registers.read_address(register);
            let result = dest.wrapping_sub(src);
            set_condition_codes(executor.registers.ccr_mut(), src, dest, result, Size::Long, OpClass::Subtraction, CcrMask::NZVC);
            Ok(6)
        }
        Instruction::Cmpm { size, rx, ry } => {
            let src = executor.read_operand(AddressingMode::AddressIndirectPostincrement(ry), size)?;
            let dest = executor.read_operand(AddressingMode::AddressIndirectPostincrement(rx), size)?;
            let result = dest.wrapping_sub(src);
            set_condition_codes(executor.registers.ccr_mut(), src, dest, result, size, OpClass::Subtraction, CcrMask::NZVC);
            Ok(12)
        }
        Instruction::Tst { size, mode } => {
            let value = executor.read_operand(mode, size)?;
            set_logical_flags(executor.registers.ccr_mut(), value, size);
            Ok(4)
        }
        Instruction::Tas { mode } => {
            let value = executor.read_operand(mode, Size::Byte)?;
            set_logical_flags(executor.registers.ccr_mut(), value, Size::Byte);
            executor.write_operand(mode, Size::Byte, value | 0x80)?;
            Ok(if mode.is_data_register() { 4 } else { 14 })
        }
        Instruction::Mulu { mode, register } => {
            let src = executor.read_operand(mode, Size::Word)? as u16;
            let dest = executor.registers.data[register as usize] as u16;
            let result = u32::from(src) * u32::from(dest);
            executor.registers.data[register as usize] = result;
            set_logical_flags(executor.registers.ccr_mut(), result, Size::Long);
            Ok(70)
        }
        Instruction::Muls { mode, register } => {
            let src = executor.read_operand(mode, Size::Word)? as u16 as i16;
            let dest = executor.registers.data[register as usize] as u16 as i16;
            let result = (i32::from(src) * i32::from(dest)) as u32;
            executor.registers.data[register as usize] = result;
            set_logical_flags(executor.registers.ccr_mut(), result, Size::Long);
            Ok(70)
        }
        Instruction::Divu { mode, register } => exec_divu(executor, mode, register),
        Instruction::Divs { mode, register } => exec_divs(executor, mode, register),

        Instruction::And { size, mode, register, to_memory } => exec_logical(executor, size, mode, register, to_memory, LogicalOp::And),
        Instruction::Andi { size, mode } => exec_immediate_logical(executor, size, mode, LogicalOp::And),
        Instruction::AndiToCcr => exec_logical_to_ccr(executor, LogicalOp::And),
        Instruction::AndiToSr => exec_logical_to_sr(executor, LogicalOp::And),
        Instruction::Or { size, mode, register, to_memory } => exec_logical(executor, size, mode, register, to_memory, LogicalOp::Or),
        Instruction::Ori { size, mode } => exec_immediate_logical(executor, size, mode, LogicalOp::Or),
        Instruction::OriToCcr => exec_logical_to_ccr(executor, LogicalOp::Or),
        Instruction::OriToSr => exec_logical_to_sr(executor, LogicalOp::Or),
        Instruction::Eor { size, mode, register } => exec_logical(executor, size, mode, register, true, LogicalOp::Eor),
        Instruction::Eori { size, mode } => exec_immediate_logical(executor, size, mode, LogicalOp::Eor),
        Instruction::EoriToCcr => exec_logical_to_ccr(executor, LogicalOp::Eor),
        Instruction::EoriToSr => exec_logical_to_sr(executor, LogicalOp::Eor),
        Instruction::Not { size, mode } => {
            let value = executor.read_operand(mode, size)?;
            let result = !value;
            executor.write_operand(mode, size, result)?;
            set_logical_flags(executor.registers.ccr_mut(), result, size);
            Ok(6)
        }

        Instruction::Btst { mode, bit_source } => exec_bit_op(executor, mode, bit_source, BitOp::Test),
        Instruction::Bchg { mode, bit_source } => exec_bit_op(executor, mode, bit_source, BitOp::Change),
        Instruction::Bclr { mode, bit_source } => exec_bit_op(executor, mode, bit_source, BitOp::Clear),
        Instruction::Bset { mode, bit_source } => exec_bit_op(executor, mode, bit_source, BitOp::Set),

        Instruction::Shift { size, mode, direction, operand } => exec_shift(executor, size, mode, direction, operand),

        Instruction::Bcc { condition, displacement } => exec_bcc(executor, condition, displacement),
        Instruction::Bra { displacement } => {
            executor.registers.pc = branch_target(executor, displacement)?;
            Ok(10)
        }
        Instruction::Bsr { displacement } => {
            let target = branch_target(executor, displacement)?;
            executor.push_long(executor.registers.pc)?;
            executor.registers.pc = target;
            Ok(18)
        }
        Instruction::Dbcc { condition, register } => exec_dbcc(executor, condition, register),
        Instruction::Scc { condition, mode } => {
            let value = if condition_true(executor, condition) { 0xFF } else { 0x00 };
            executor.write_operand(mode, Size::Byte, value)?;
            Ok(if mode.is_data_register() { 4 } else { 8 })
        }

        Instruction::Jmp { mode } => {
            let ResolvedAddress::Memory(addr) = executor.resolve(mode, Size::Long)? else {
                return Err(Vector::IllegalInstruction.into());
            };
            executor.registers.pc = addr;
            Ok(8)
        }
        Instruction::Jsr { mode } => {
            let ResolvedAddress::Memory(addr) = executor.resolve(mode, Size::Long)? else {
                return Err(Vector::IllegalInstruction.into());
            };
            executor.push_long(executor.registers.pc)?;
            executor.registers.pc = addr;
            Ok(16)
        }
    }
}

fn require_supervisor<B: BusInterface>(executor: &mut InstructionExecutor<'_, '_, B>) -> Result<(), Fault> {
    if executor.registers.supervisor_mode {
        Ok(())
    } else {
        Err(Vector::PrivilegeViolation.into())
    }
}

fn exec_rte<B: BusInterface>(executor: &mut InstructionExecutor<'_, '_, B>) -> Res {
    require_supervisor(executor)?;
    let sr = executor.pop_word()?;
    let pc = executor.pop_long()?;
    executor.registers.set_status_register(sr);
    executor.registers.pc = pc;
    Ok(20)
}

fn exec_rtr<B: BusInterface>(executor: &mut InstructionExecutor<'_, '_, B>) -> Res {
    let ccr = executor.pop_word()?;
    let pc = executor.pop_long()?;
    let sr = (executor.registers.status_register() & 0xFF00) | (ccr & 0x00FF);
    executor.registers.set_status_register(sr);
    executor.registers.pc = pc;
    Ok(20)
}

fn exec_chk<B: BusInterface>(executor: &mut InstructionExecutor<'_, '_, B>, mode: AddressingMode, register: u8) -> Res {
    let bound = executor.read_operand(mode, Size::Word)? as u16 as i16;
    let value = executor.registers.data[register as usize] as u16 as i16;
    if value < 0 || value > bound {
        return Err(Vector::Chk.into());
    }
    Ok(10)
}

fn exec_move<B: BusInterface>(
    executor: &mut InstructionExecutor<'_, '_, B>,
    size: Size,
    src: AddressingMode,
    dst: AddressingMode,
) -> Res {
    let value = executor.read_operand(src, size)?;
    executor.write_operand(dst, size, value)?;
    set_logical_flags(executor.registers.ccr_mut(), value, size);
    Ok(4)
}

fn exec_movem<B: BusInterface>(
    executor: &mut InstructionExecutor<'_, '_, B>,
    size: Size,
    mode: AddressingMode,
    to_memory: bool,
) -> Res {
    let list = executor.fetch_extension_word()?;
    let step = size.bytes();

    if to_memory {
        let ResolvedAddress::Memory(mut addr) = executor.resolve(mode, size)? else {
            return Err(Vector::IllegalInstruction.into());
        };
        let predecrement = matches!(mode, AddressingMode::AddressIndirectPredecrement(_));
        for i in 0..16u32 {
            let bit = if predecrement { 15 - i } else { i };
            if list & (1 << bit) == 0 {
                continue;
            }
            let value = register_value(executor, i);
            match size {
                Size::Long => executor.write_bus_long(addr, value)?,
                _ => executor.write_bus_word(addr, value as u16)?,
            }
            addr = if predecrement { addr.wrapping_sub(step) } else { addr.wrapping_add(step) };
        }
        if predecrement {
            if let AddressingMode::AddressIndirectPredecrement(r) = mode {
                executor.registers.write_address(r, addr);
            }
        }
    } else {
        let ResolvedAddress::Memory(mut addr) = executor.resolve(mode, size)? else {
            return Err(Vector::IllegalInstruction.into());
        };
        for i in 0..16u32 {
            if list & (1 << i) == 0 {
                continue;
            }
            let raw = match size {
                Size::Long => executor.read_bus_long(addr)?,
                _ => size.sign_extend(u32::from(executor.read_bus_word(addr)?)),
            };
            set_register_value(executor, i, raw);
            addr = addr.wrapping_add(step);
        }
        if let AddressingMode::AddressIndirectPostincrement(r) = mode {
            executor.registers.write_address(r, addr);
        }
    }
    Ok(12)
}

fn register_value<B: BusInterface>(executor: &InstructionExecutor<'_, '_, B>, index: u32) -> u32 {
    if index < 8 {
        executor.registers.data[index as usize]
    } else {
        executor.registers.read_address((index - 8) as u8)
    }
}

fn set_register_value<B: BusInterface>(executor: &mut InstructionExecutor<'_, '_, B>, index: u32, value: u32) {
    if index < 8 {
        executor.registers.data[index as usize] = value;
    } else {
        executor.registers.write_address((index - 8) as u8, value);
    }
}

fn exec_movep<B: BusInterface>(
    executor: &mut InstructionExecutor<'_, '_, B>,
    size: Size,
    data_register: u8,
    address_register: u8,
    to_memory: bool,
) -> Res {
    let displacement = executor.fetch_extension_word()? as i16;
    let base = executor.registers.read_address(address_register).wrapping_add(displacement as i32 as u32);
    let count = if size == Size::Long { 4 } else { 2 };

    if to_memory {
        let value = executor.registers.data[data_register as usize];
        for i in 0..count {
            let shift = 8 * (count - 1 - i);
            let byte = (value >> shift) as u8;
            executor.bus.write_byte(base.wrapping_add(2 * i), byte);
        }
    } else {
        let mut value = 0u32;
        for i in 0..count {
            let byte = u32::from(executor.bus.read_byte(base.wrapping_add(2 * i)));
            value = (value << 8) | byte;
        }
        let slot = &mut executor.registers.data[data_register as usize];
        *slot = if size == Size::Long { value } else { (*slot & 0xFFFF_0000) | value };
    }
    Ok(if size == Size::Long { 24 } else { 16 })
}

fn exec_exg<B: BusInterface>(executor: &mut InstructionExecutor<'_, '_, B>, mode: ExgMode, rx: u8, ry: u8) {
    match mode {
        ExgMode::DataData => executor.registers.data.swap(rx as usize, ry as usize),
        ExgMode::AddressAddress => {
            let x = executor.registers.read_address(rx);
            let y = executor.registers.read_address(ry);
            executor.registers.write_address(rx, y);
            executor.registers.write_address(ry, x);
        }
        ExgMode::DataAddress => {
            let x = executor.registers.data[rx as usize];
            let y = executor.registers.read_address(ry);
            executor.registers.data[rx as usize] = y;
            executor.registers.write_address(ry, x);
        }
    }
}

fn exec_add_sub<B: BusInterface>(
    executor: &mut InstructionExecutor<'_, '_, B>,
    size: Size,
    mode: AddressingMode,
    register: u8,
    to_memory: bool,
    class: OpClass,
) -> Res {
    if to_memory {
        let src = executor.registers.read_data_sized(register, size);
        let dest = executor.read_operand(mode, size)?;
        let result = apply_class(class, dest, src);
        executor.write_operand(mode, size, result)?;
        set_condition_codes(executor.registers.ccr_mut(), src, dest, result, size, class, CcrMask::ALL);
    } else {
        let src = executor.read_operand(mode, size)?;
        let dest = executor.registers.read_data_sized(register, size);
        let result = apply_class(class, dest, src);
        executor.registers.write_data_sized(register, size, result);
        set_condition_codes(executor.registers.ccr_mut(), src, dest, result, size, class, CcrMask::ALL);
    }
    Ok(if size == Size::Long { 8 } else { 4 })
}

fn apply_class(class: OpClass, dest: u32, src: u32) -> u32 {
    match class {
        OpClass::Addition => dest.wrapping_add(src),
        OpClass::Subtraction => dest.wrapping_sub(src),
        OpClass::Other => dest,
    }
}

fn exec_immediate_arith<B: BusInterface>(
    executor: &mut InstructionExecutor<'_, '_, B>,
    size: Size,
    mode: AddressingMode,
    class: OpClass,
) -> Res {
    let src = executor.read_operand(AddressingMode::Immediate, size)?;
    let dest = executor.read_operand(mode, size)?;
    let result = apply_class(class, dest, src);
    executor.write_operand(mode, size, result)?;
    set_condition_codes(executor.registers.ccr_mut(), src, dest, result, size, class, CcrMask::ALL);
    Ok(8)
}

fn exec_quick_arith<B: BusInterface>(
    executor: &mut InstructionExecutor<'_, '_, B>,
    size: Size,
    mode: AddressingMode,
    value: u8,
    class: OpClass,
) -> Res {
    let src = u32::from(value);
    if mode.is_address_register() {
        let dest = executor.registers.read_address(mode_register_index(mode));
        let result = apply_class(class, dest, src);
        executor.registers.write_address(mode_register_index(mode), result);
        return Ok(8);
    }
    let dest = executor.read_operand(mode, size)?;
    let result = apply_class(class, dest, src);
    executor.write_operand(mode, size, result)?;
    set_condition_codes(executor.registers.ccr_mut(), src, dest, result, size, class, CcrMask::ALL);
    Ok(if size == Size::Long { 8 } else { 4 })
}

fn mode_register_index(mode: AddressingMode) -> u8 {
    match mode {
        AddressingMode::AddressDirect(r) => r,
        _ => 0,
    }
}

fn exec_address_arith<B: BusInterface>(
    executor: &mut InstructionExecutor<'_, '_, B>,
    size: Size,
    mode: AddressingMode,
    register: u8,
    class: OpClass,
) -> Res {
    let src = size.sign_extend(executor.read_operand(mode, size)?);
    let dest = executor.registers.read_address(register);
    let result = apply_class(class, dest, src);
    executor.registers.write_address(register, result);
    Ok(8)
}

fn exec_extended_arith<B: BusInterface>(
    executor: &mut InstructionExecutor<'_, '_, B>,
    size: Size,
    rx: u8,
    ry: u8,
    address_mode: bool,
    class: OpClass,
) -> Res {
    let extend = u32::from(executor.registers.ccr().extend);
    let (src, dest, resolved) = if address_mode {
        let src_addr = AddressingMode::AddressIndirectPredecrement(ry);
        let dst_addr = AddressingMode::AddressIndirectPredecrement(rx);
        let src = executor.read_operand(src_addr, size)?;
        let resolved = executor.resolve(dst_addr, size)?;
        let dest = executor.read_sized(resolved, size)?;
        (src, dest, resolved)
    } else {
        let src = executor.registers.read_data_sized(ry, size);
        let dest = executor.registers.read_data_sized(rx, size);
        (src, dest, ResolvedAddress::Data(rx))
    };
    let result = match class {
        OpClass::Addition => dest.wrapping_add(src).wrapping_add(extend),
        OpClass::Subtraction => dest.wrapping_sub(src).wrapping_sub(extend),
        OpClass::Other => dest,
    };
    executor.write_sized(resolved, size, result)?;
    let mut mask = CcrMask::ALL;
    if size.truncate(result) != 0 {
        mask.z = false;
    }
    set_condition_codes(executor.registers.ccr_mut(), src, dest, result, size, class, mask);
    Ok(if size == Size::Long { 8 } else { 4 })
}

fn exec_divu<B: BusInterface>(executor: &mut InstructionExecutor<'_, '_, B>, mode: AddressingMode, register: u8) -> Res {
    let divisor = executor.read_operand(mode, Size::Word)? as u16;
    if divisor == 0 {
        return Err(Vector::ZeroDivide.into());
    }
    let dividend = executor.registers.data[register as usize];
    let quotient = dividend / u32::from(divisor);
    if quotient > u32::from(u16::MAX) {
        executor.registers.ccr_mut().overflow = true;
        return Ok(10);
    }
    let remainder = dividend % u32::from(divisor);
    executor.registers.data[register as usize] = (remainder << 16) | (quotient & 0xFFFF);
    let ccr = executor.registers.ccr_mut();
    ccr.overflow = false;
    ccr.carry = false;
    ccr.negative = quotient & 0x8000 != 0;
    ccr.zero = quotient == 0;
    Ok(140)
}

fn exec_divs<B: BusInterface>(executor: &mut InstructionExecutor<'_, '_, B>, mode: AddressingMode, register: u8) -> Res {
    let divisor = executor.read_operand(mode, Size::Word)? as u16 as i16;
    if divisor == 0 {
        return Err(Vector::ZeroDivide.into());
    }
    let dividend = executor.registers.data[register as usize] as i32;
    let quotient = dividend / i32::from(divisor);
    if quotient > i32::from(i16::MAX) || quotient < i32::from(i16::MIN) {
        executor.registers.ccr_mut().overflow = true;
        return Ok(10);
    }
    let remainder = dividend % i32::from(divisor);
    executor.registers.data[register as usize] =
        ((remainder as u16 as u32) << 16) | (quotient as u16 as u32);
    let ccr = executor.registers.ccr_mut();
    ccr.overflow = false;
    ccr.carry = false;
    ccr.negative = quotient < 0;
    ccr.zero = quotient == 0;
    Ok(158)
}

#[derive(Clone, Copy)]
enum LogicalOp { And, Or, Eor }

fn apply_logical(op: LogicalOp, a: u32, b: u32) -> u32 {
    match op {
        LogicalOp::And => a & b,
        LogicalOp::Or => a | b,
        LogicalOp::Eor => a ^ b,
    }
}

fn exec_logical<B: BusInterface>(
    executor: &mut InstructionExecutor<'_, '_, B>,
    size: Size,
    mode: AddressingMode,
    register: u8,
    to_memory: bool,
    op: LogicalOp,
) -> Res {
    if to_memory {
        let src = executor.registers.read_data_sized(register, size);
        let dest = executor.read_operand(mode, size)?;
        let result = apply_logical(op, src, dest);
        executor.write_operand(mode, size, result)?;
        set_logical_flags(executor.registers.ccr_mut(), result, size);
    } else {
        let src = executor.read_operand(mode, size)?;
        let dest = executor.registers.read_data_sized(register, size);
        let result = apply_logical(op, src, dest);
        executor.registers.write_data_sized(register, size, result);
        set_logical_flags(executor.registers.ccr_mut(), result, size);
    }
    Ok(if size == Size::Long { 8 } else { 4 })
}

fn exec_immediate_logical<B: BusInterface>(
    executor: &mut InstructionExecutor<'_, '_, B>,
    size: Size,
    mode: AddressingMode,
    op: LogicalOp,
) -> Res {
    let src = executor.read_operand(AddressingMode::Immediate, size)?;
    let dest = executor.read_operand(mode, size)?;
    let result = apply_logical(op, src, dest);
    executor.write_operand(mode, size, result)?;
    set_logical_flags(executor.registers.ccr_mut(), result, size);
    Ok(8)
}

fn exec_logical_to_ccr<B: BusInterface>(executor: &mut InstructionExecutor<'_, '_, B>, op: LogicalOp) -> Res {
    let value = u32::from(executor.fetch_extension_word()? & 0x00FF);
    let ccr = u32::from(u8::from(executor.registers.ccr()));
    let result = apply_logical(op, value, ccr) as u8;
    executor.registers.ccr = result.into();
    Ok(20)
}

fn exec_logical_to_sr<B: BusInterface>(executor: &mut InstructionExecutor<'_, '_, B>, op: LogicalOp) -> Res {
    require_supervisor(executor)?;
    let value = u32::from(executor.fetch_extension_word()?);
    let sr = u32::from(executor.registers.status_register());
    let result = apply_logical(op, value, sr) as u16;
    executor.registers.set_status_register(result);
    Ok(20)
}

#[derive(Clone, Copy)]
enum BitOp { Test, Change, Clear, Set }

fn exec_bit_op<B: BusInterface>(
    executor: &mut InstructionExecutor<'_, '_, B>,
    mode: AddressingMode,
    bit_source: BitSource,
    op: BitOp,
) -> Res {
    let bit_number = match bit_source {
        BitSource::DataRegister(r) => executor.registers.data[r as usize],
        BitSource::Immediate(_) => u32::from(executor.fetch_extension_word()? as u8),
    };
    let size = if mode.is_data_register() { Size::Long } else { Size::Byte };
    let width = if size == Size::Long { 32 } else { 8 };
    let bit = bit_number % width;

    let value = executor.read_operand(mode, size)?;
    executor.registers.ccr_mut().zero = value & (1 << bit) == 0;

    let result = match op {
        BitOp::Test => return Ok(if mode.is_data_register() { 6 } else { 4 }),
        BitOp::Change => value ^ (1 << bit),
        BitOp::Clear => value & !(1 << bit),
        BitOp::Set => value | (1 << bit),
    };
    executor.write_operand(mode, size, result)?;
    Ok(if mode.is_data_register() { 8 } else { 8 })
}

fn exec_shift<B: BusInterface>(
    executor: &mut InstructionExecutor<'_, '_, B>,
    size: Size,
    mode: ShiftMode,
    direction: ShiftDirection,
    operand: ShiftOperand,
) -> Res {
    match operand {
        ShiftOperand::Memory(ea_mode) => {
            let value = executor.read_operand(ea_mode, Size::Word)?;
            let (result, carry) = shift_once(mode, direction, Size::Word, value, executor.registers.ccr().extend);
            executor.write_operand(ea_mode, Size::Word, result)?;
            apply_shift_flags(executor, mode, result, carry, Size::Word, 1);
            Ok(8)
        }
        ShiftOperand::Register { count, is_immediate, shift_register } => {
            let count = if is_immediate {
                u32::from(count)
            } else {
                executor.registers.data[shift_register as usize] % 64
            };
            let data_register = shift_register;
            let mut value = executor.registers.read_data_sized(data_register, size);
            let mut carry = executor.registers.ccr().extend;
            for _ in 0..count {
                let (next, c) = shift_once(mode, direction, size, value, carry);
                value = next;
                carry = c;
            }
            executor.registers.write_data_sized(data_register, size, value);
            apply_shift_flags(executor, mode, value, carry, size, count);
            Ok(6 + 2 * count)
        }
    }
}

fn shift_once(mode: ShiftMode, direction: ShiftDirection, size: Size, value: u32, extend: bool) -> (u32, bool) {
    let bits = size.bytes() * 8;
    let sign_mask = 1u32 << (bits - 1);
    let value = size.truncate(value);
    match (mode, direction) {
        (ShiftMode::Logical, ShiftDirection::Left) | (ShiftMode::Arithmetic, ShiftDirection::Left) => {
            let carry = value & sign_mask != 0;
            (size.truncate(value << 1), carry)
        }
        (ShiftMode::Logical, ShiftDirection::Right) => {
            let carry = value & 1 != 0;
            (value >> 1, carry)
        }
        (ShiftMode::Arithmetic, ShiftDirection::Right) => {
            let carry = value & 1 != 0;
            let sign = value & sign_mask;
            (size.truncate((value >> 1) | sign), carry)
        }
        (ShiftMode::Rotate, ShiftDirection::Left) => {
            let carry = value & sign_mask != 0;
            (size.truncate((value << 1) | u32::from(carry)), carry)
        }
        (ShiftMode::Rotate, ShiftDirection::Right) => {
            let carry = value & 1 != 0;
            (size.truncate((value >> 1) | (u32::from(carry) * sign_mask)), carry)
        }
        (ShiftMode::RotateExtend, ShiftDirection::Left) => {
            let carry = value & sign_mask != 0;
            (size.truncate((value << 1) | u32::from(extend)), carry)
        }
        (ShiftMode::RotateExtend, ShiftDirection::Right) => {
            let carry = value & 1 != 0;
            (size.truncate((value >> 1) | (u32::from(extend) * sign_mask)), carry)
        }
    }
}

fn apply_shift_flags<B: BusInterface>(
    executor: &mut InstructionExecutor<'_, '_, B>,
    mode: ShiftMode,
    result: u32,
    carry: bool,
    size: Size,
    count: u32,
) {
    let ccr = executor.registers.ccr_mut();
    if count == 0 {
        ccr.carry = false;
        ccr.negative = size.sign_bit(result);
        ccr.zero = size.truncate(result) == 0;
        return;
    }
    ccr.carry = carry;
    if matches!(mode, ShiftMode::Rotate) {
        // Rotate (non-extend) leaves X unaffected.
    } else {
        ccr.extend = carry;
    }
    ccr.negative = size.sign_bit(result);
    ccr.zero = size.truncate(result) == 0;
    ccr.overflow = false;
}

fn condition_true<B: BusInterface>(executor: &InstructionExecutor<'_, '_, B>, condition: u8) -> bool {
    let ccr = executor.registers.ccr();
    match condition {
        0x0 => true,
        0x1 => false,
        0x2 => !ccr.carry && !ccr.zero,
        0x3 => ccr.carry || ccr.zero,
        0x4 => !ccr.carry,
        0x5 => ccr.carry,
        0x6 => !ccr.zero,
        0x7 => ccr.zero,
        0x8 => !ccr.overflow,
        0x9 => ccr.overflow,
        0xA => !ccr.negative,
        0xB => ccr.negative,
        0xC => ccr.negative == ccr.overflow,
        0xD => ccr.negative != ccr.overflow,
        0xE => !ccr.zero && (ccr.negative == ccr.overflow),
        0xF => ccr.zero || (ccr.negative != ccr.overflow),
        _ => unreachable!("condition is a 4-bit field"),
    }
}

fn branch_target<B: BusInterface>(
    executor: &mut InstructionExecutor<'_, '_, B>,
    displacement: i32,
) -> Result<u32, Fault> {
    let opcode_address = executor.registers.pc.wrapping_sub(2);
    if displacement == 0 {
        let extension = executor.fetch_extension_word()? as i16;
        Ok(opcode_address.wrapping_add(2).wrapping_add(extension as i32 as u32))
    } else if displacement == -1 {
        let hi = executor.fetch_extension_word()?;
        let lo = executor.fetch_extension_word()?;
        let extension = (u32::from(hi) << 16) | u32::from(lo);
        Ok(opcode_address.wrapping_add(2).wrapping_add(extension))
    } else {
        Ok(opcode_address.wrapping_add(2).wrapping_add(displacement as u32))
    }
}

fn exec_bcc<B: BusInterface>(executor: &mut InstructionExecutor<'_, '_, B>, condition: u8, displacement: i32) -> Res {
    let target = branch_target(executor, displacement)?;
    if condition_true(executor, condition) {
        executor.registers.pc = target;
        Ok(10)
    } else {
        Ok(8)
    }
}

fn exec_dbcc<B: BusInterface>(executor: &mut InstructionExecutor<'_, '_, B>, condition: u8, register: u8) -> Res {
    // The branch reference point is the extension word's own address, i.e. the PC as it
    // stands right now, before `fetch_extension_word` advances past it.
    let extension_address = executor.registers.pc;
    let displacement = executor.fetch_extension_word()? as i16;
    if condition_true(executor, condition) {
        return Ok(12);
    }
    let counter = executor.registers.data[register as usize] as u16;
    let decremented = counter.wrapping_sub(1);
    executor.registers.data[register as usize] =
        (executor.registers.data[register as usize] & 0xFFFF_0000) | u32::from(decremented);
    if decremented == 0xFFFF {
        Ok(14)
    } else {
        executor.registers.pc = extension_address.wrapping_add(displacement as i32 as u32);
        Ok(10)
    }
}
