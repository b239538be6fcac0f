use crate::traits::{BusInterface, InMemoryBus};
use crate::M68000;

fn new_cpu() -> (M68000, InMemoryBus) {
    (M68000::new(), InMemoryBus::new())
}

#[test]
fn reset_loads_ssp_and_pc_from_vector_table() {
    let (mut cpu, mut bus) = new_cpu();
    bus.write_long_word(0x0000_0000, 0x0100_0000);
    bus.write_long_word(0x0000_0004, 0x0000_0400);

    cpu.reset(&mut bus);

    assert_eq!(cpu.supervisor_stack_pointer(), 0x0100_0000);
    assert_eq!(cpu.pc(), 0x0000_0400);
    assert_eq!(cpu.status_register(), 0x2700);
}

#[test]
fn work_ram_mirror_is_modeled_by_the_bus_consumer_not_this_crate() {
    // Mirroring is a genesis-core bus concern (spec.md §4.1); this crate only needs the
    // BusInterface contract to route through whatever mirroring the caller wires up.
    let (_, mut bus) = new_cpu();
    bus.write_byte(0x00E0_0010, 0x5A);
    assert_eq!(bus.read_byte(0x00E0_0010), 0x5A);
}

#[test]
fn privilege_violation_on_move_to_sr_in_user_mode() {
    let (mut cpu, mut bus) = new_cpu();
    bus.write_long_word(0, 0x0100_0000);
    bus.write_long_word(4, 0x0000_0400);
    cpu.reset(&mut bus);

    // MOVE.W #$2000,SR
    bus.write_word(0x0000_0400, 0x46FC);
    bus.write_word(0x0000_0402, 0x2000);
    // Supervisor-mode handler for vector 8 (privilege violation).
    bus.write_long_word(8 * 4, 0x0000_1000);

    cpu.set_status_register(0x0000);
    cpu.set_pc(0x0000_0400);

    cpu.clock(4, &mut bus);

    assert_eq!(cpu.pc(), 0x0000_1000);
    assert!(cpu.status_register() & 0x2000 != 0, "handler entry sets S");
}

#[test]
fn bcc_zero_displacement_reads_a_following_word() {
    let (mut cpu, mut bus) = new_cpu();
    bus.write_long_word(0, 0x0100_0000);
    bus.write_long_word(4, 0x0000_0400);
    cpu.reset(&mut bus);

    // BRA.W with byte displacement 0 and word extension +0x0010.
    bus.write_word(0x0000_0400, 0x6000);
    bus.write_word(0x0000_0402, 0x0010);

    cpu.clock(10, &mut bus);

    assert_eq!(cpu.pc(), 0x0000_0400 + 2 + 0x0010);
}

#[test]
fn dbcc_branches_once_then_falls_through_on_wraparound() {
    let (mut cpu, mut bus) = new_cpu();
    bus.write_long_word(0, 0x0100_0000);
    bus.write_long_word(4, 0x0000_0400);
    cpu.reset(&mut bus);

    // DBT D0 (condition "true" never branches, loops forever for testing fallthrough
    // we instead use DBRA which is condition "false" - always decrements and branches).
    // DBRA D0, -2 (loop back to self).
    bus.write_word(0x0000_0400, 0x51C8);
    bus.write_word(0x0000_0402, 0xFFFE);

    let mut data = cpu.data_registers();
    data[0] = 1;
    cpu.set_data_registers(data);
    cpu.set_pc(0x0000_0400);

    // First iteration: counter 1 -> 0, branches back.
    cpu.clock(10, &mut bus);
    assert_eq!(cpu.pc(), 0x0000_0400);
    assert_eq!(cpu.data_registers()[0] as u16, 0);

    // Second iteration: counter 0 -> 0xFFFF, falls through past the extension word.
    cpu.clock(10, &mut bus);
    assert_eq!(cpu.pc(), 0x0000_0404);
    assert_eq!(cpu.data_registers()[0] as u16, 0xFFFF);
}

#[test]
fn interrupt_level_seven_is_always_taken() {
    let (mut cpu, mut bus) = new_cpu();
    bus.write_long_word(0, 0x0100_0000);
    bus.write_long_word(4, 0x0000_0400);
    cpu.reset(&mut bus);
    cpu.set_pc(0x0000_0400);
    bus.write_word(0x0000_0400, 0x4E71); // NOP
    bus.write_long_word(31 * 4, 0x0000_2000); // autovector(7) == 31

    cpu.interrupt_request(0, 7);
    cpu.clock(4, &mut bus);

    assert_eq!(cpu.pc(), 0x0000_2000);
}

#[test]
fn movem_predecrement_then_postincrement_round_trips_registers() {
    let (mut cpu, mut bus) = new_cpu();
    bus.write_long_word(0, 0x0100_0000);
    bus.write_long_word(4, 0x0000_0400);
    cpu.reset(&mut bus);

    let mut data = cpu.data_registers();
    data[0] = 0x1111_1111;
    data[1] = 0x2222_2222;
    cpu.set_data_registers(data);

    // MOVEM.L D0-D1,-(A7)
    bus.write_word(0x0000_0400, 0x48E7);
    bus.write_word(0x0000_0402, 0xC000);
    // Clobber D0/D1, then MOVEM.L (A7)+,D0-D1
    bus.write_word(0x0000_0404, 0x7000); // MOVEQ #0,D0
    bus.write_word(0x0000_0406, 0x4CDF);
    bus.write_word(0x0000_0408, 0x0003);

    cpu.set_pc(0x0000_0400);
    let sp_before = cpu.supervisor_stack_pointer();

    // 12 (movem out) + 4 (moveq) + 12 (movem in) ticks: enough for exactly these three
    // instructions and no further fetch into the zeroed memory beyond them.
    cpu.clock(28, &mut bus);

    assert_eq!(cpu.data_registers()[0], 0x1111_1111);
    assert_eq!(cpu.data_registers()[1], 0x2222_2222);
    assert_eq!(cpu.supervisor_stack_pointer(), sp_before);
}

#[test]
fn address_error_pushes_extended_frame_with_opcode_address_and_status_word() {
    let (mut cpu, mut bus) = new_cpu();
    bus.write_long_word(0, 0x0100_0000);
    bus.write_long_word(4, 0x0000_0400);
    cpu.reset(&mut bus);
    cpu.set_pc(0x0000_0400);

    // MOVEA.L #$1001,A0 then JMP (A0): A0 lands on an odd address, so the jump itself
    // succeeds but the subsequent opcode fetch at that address faults with an address error.
    bus.write_word(0x0000_0400, 0x207C); // MOVEA.L #imm,A0
    bus.write_long_word(0x0000_0402, 0x0000_1001);
    bus.write_word(0x0000_0406, 0x4ED0); // JMP (A0)
    bus.write_long_word(3 * 4, 0x0000_2000); // vector 3 == AddressError

    cpu.clock(60, &mut bus);

    assert_eq!(cpu.pc(), 0x0000_2000, "handler should be entered");

    let sp = cpu.supervisor_stack_pointer();
    let status_word = bus.read_word(sp);
    let address = bus.read_long_word(sp + 2);
    let opcode = bus.read_word(sp + 6);
    let pc_in_frame = bus.read_long_word(sp + 10);

    assert_eq!(address, 0x0000_1001, "faulting address is the odd fetch address");
    assert_eq!(opcode, 0x4ED0, "faulting opcode is the JMP that produced the bad PC");
    assert_eq!(status_word & 0x0010, 0x0010, "read access sets the RW bit");
    assert_eq!(status_word & 0x0007, 0x0005, "function code fixed at supervisor data");
    assert_eq!(pc_in_frame, 0x0000_1001, "frame's PC is the faulting fetch address");
}

#[test]
fn clear_interrupt_removes_only_that_devices_pending_request() {
    let (mut cpu, mut bus) = new_cpu();
    bus.write_long_word(0, 0x0100_0000);
    bus.write_long_word(4, 0x0000_0400);
    cpu.reset(&mut bus);
    cpu.set_pc(0x0000_0400);
    bus.write_word(0x0000_0400, 0x4E71); // NOP

    cpu.set_status_register(0x2300); // supervisor mode, interrupt mask 3: level 6 qualifies
    cpu.interrupt_request(3, 4);
    cpu.interrupt_request(5, 6);
    cpu.clear_interrupt(3);
    bus.write_long_word((24 + 6) * 4, 0x0000_3000); // autovector(6) * 4

    cpu.clock(4, &mut bus);

    assert_eq!(cpu.pc(), 0x0000_3000, "only device 5's level-6 request should fire");
}
