//! End-to-end scenarios driving the privileged core through its executor-facing surface.

use bedrock::Arena;
use regolith_core::board::{Board, Config, MTIME_ADDRESS, UART0_ADDRESS};
use regolith_core::hart::{
    csr, AccessError, AccessType, Address, Exception, TrapCause, FENCE_VMA_LOWER,
};
use regolith_core::loader::Image;
use regolith_core::{PrivilegeLevel, Xlen};

const MSTATUS_MIE: u64 = 1 << 3;
const MSTATUS_TVM: u64 = 1 << 20;

fn board(xlen: Xlen) -> (Arena, Board<Arena>) {
    let mut allocator = Arena::new();
    let board = Board::new(
        &mut allocator,
        Config {
            xlen,
            ..Config::default()
        },
    );
    (allocator, board)
}

#[test]
fn ecall_from_user_mode() {
    let (mut allocator, board) = board(Xlen::Rv32);
    let hart = board.hart();
    hart.write_csr(&mut allocator, csr::MTVEC, 0x1000).unwrap();
    hart.set_privilege_mode(&mut allocator, PrivilegeLevel::User);

    let next_pc = hart.enter_trap(
        &mut allocator,
        TrapCause::Exception(Exception::EnvironmentCall),
        0x200,
    );

    assert_eq!(0x1000, next_pc);
    assert_eq!(PrivilegeLevel::Machine, hart.privilege_mode(&allocator));
    assert_eq!(8, hart.read_csr(&mut allocator, csr::MCAUSE).unwrap());
    assert_eq!(0x200, hart.read_csr(&mut allocator, csr::MEPC).unwrap());
    // MPP records the trapped-from privilege (U = 0).
    let mstatus = hart.read_csr(&mut allocator, csr::MSTATUS).unwrap();
    assert_eq!(0, (mstatus >> 11) & 0b11);
}

#[test]
fn delegated_page_fault() {
    let (mut allocator, board) = board(Xlen::Rv32);
    let hart = board.hart();
    hart.write_csr(&mut allocator, csr::MEDELEG, 1 << 13).unwrap();
    hart.write_csr(&mut allocator, csr::STVEC, 0x2000).unwrap();
    // Sv32 with an empty root table at 0x10000: every lookup misses.
    hart.write_csr(&mut allocator, csr::SATP, (1 << 31) | 0x10)
        .unwrap();
    hart.set_privilege_mode(&mut allocator, PrivilegeLevel::Supervisor);

    let va = 0x0000_5000u64;
    let mut buf = [0u8; 4];
    let err = hart
        .read(&mut allocator, Address::mem(va, AccessType::read()), &mut buf)
        .unwrap_err();
    assert_eq!(AccessError::Trap, err);
    let taken = hart.trap(&allocator).taken().unwrap();
    assert_eq!(Exception::LoadPageFault, taken);

    let next_pc = hart.enter_trap(&mut allocator, TrapCause::Exception(taken), 0x100);

    assert_eq!(0x2000, next_pc);
    assert_eq!(PrivilegeLevel::Supervisor, hart.privilege_mode(&allocator));
    assert_eq!(13, hart.read_csr(&mut allocator, csr::SCAUSE).unwrap());
    assert_eq!(0x100, hart.read_csr(&mut allocator, csr::SEPC).unwrap());
    assert_eq!(va, hart.read_csr(&mut allocator, csr::STVAL).unwrap());
    // SPP records S.
    let sstatus = hart.read_csr(&mut allocator, csr::SSTATUS).unwrap();
    assert_ne!(0, sstatus & (1 << 8));
}

#[test]
fn tvm_intercepts_satp_and_sfence() {
    let (mut allocator, board) = board(Xlen::Rv32);
    let hart = board.hart();
    hart.write_csr(&mut allocator, csr::MSTATUS, MSTATUS_TVM)
        .unwrap();
    hart.set_privilege_mode(&mut allocator, PrivilegeLevel::Supervisor);
    hart.registers_mut(&mut allocator).set_pc(0x400);

    let err = hart.write_csr(&mut allocator, csr::SATP, 1).unwrap_err();
    assert_eq!(AccessError::Trap, err);
    assert_eq!(
        Some(Exception::IllegalInstruction),
        hart.trap(&allocator).taken()
    );
    assert_eq!(0x400, hart.trap(&allocator).fault_data());

    // SFENCE.VMA is intercepted the same way.
    let err = hart
        .write(&mut allocator, Address::fence(FENCE_VMA_LOWER), &[])
        .unwrap_err();
    assert_eq!(AccessError::Trap, err);
}

#[test]
fn vectored_machine_timer_interrupt() {
    let (mut allocator, board) = board(Xlen::Rv32);
    let hart = board.hart();
    hart.write_csr(&mut allocator, csr::MTVEC, 0x1000 | 1).unwrap();
    hart.write_csr(&mut allocator, csr::MSTATUS, MSTATUS_MIE)
        .unwrap();
    hart.write_csr(&mut allocator, csr::MIE, 1 << 7).unwrap();
    hart.write_csr(&mut allocator, csr::MIP, 1 << 7).unwrap();

    let pending = hart.trap(&allocator).pending_interrupt().unwrap();
    assert_eq!(7, pending);

    hart.registers_mut(&mut allocator).set_next_pc(0x88);
    let next_pc = hart.enter_trap(&mut allocator, TrapCause::Interrupt(pending), 0x84);

    assert_eq!(0x101C, next_pc);
    assert_eq!(0x88, hart.read_csr(&mut allocator, csr::MEPC).unwrap());
    assert_eq!(None, hart.trap(&allocator).pending_interrupt());
}

#[test]
fn tohost_exit_rv32() {
    let (mut allocator, board) = board(Xlen::Rv32);
    let hart = board.hart();
    let tohost = 0xF000_1000u64;

    hart.write(
        &mut allocator,
        Address::mem(tohost, AccessType::write()),
        &1u32.to_le_bytes(),
    )
    .unwrap();
    assert_eq!(None, board.exit_status(&allocator));
    hart.write(
        &mut allocator,
        Address::mem(tohost + 4, AccessType::write()),
        &0u32.to_le_bytes(),
    )
    .unwrap();
    assert_eq!(Some(1), board.exit_status(&allocator));
}

#[test]
fn tohost_exit_rv64() {
    let (mut allocator, board) = board(Xlen::Rv64);
    let hart = board.hart();
    hart.write(
        &mut allocator,
        Address::mem(0xF000_1000, AccessType::write()),
        &3u64.to_le_bytes(),
    )
    .unwrap();
    assert_eq!(Some(3), board.exit_status(&allocator));
}

#[test]
fn fromhost_acknowledge() {
    let (mut allocator, board) = board(Xlen::Rv64);
    let hart = board.hart();
    hart.write(
        &mut allocator,
        Address::mem(0xF000_1040, AccessType::write()),
        &0xABCDu64.to_le_bytes(),
    )
    .unwrap();
    let mut buf = [0u8; 8];
    hart.read(
        &mut allocator,
        Address::mem(0xF000_1000, AccessType::read()),
        &mut buf,
    )
    .unwrap();
    assert_eq!(0xABCD, u64::from_le_bytes(buf));
}

#[test]
fn debug_writes_do_not_reach_host_protocol() {
    let (mut allocator, board) = board(Xlen::Rv64);
    let hart = board.hart();
    hart.write(
        &mut allocator,
        Address::mem(0xF000_1000, AccessType::write().debug()),
        &1u64.to_le_bytes(),
    )
    .unwrap();
    assert_eq!(None, board.exit_status(&allocator));
    // The raw bytes still land, as an image load would expect.
    let mut buf = [0u8; 8];
    hart.read(
        &mut allocator,
        Address::mem(0xF000_1000, AccessType::read().debug()),
        &mut buf,
    )
    .unwrap();
    assert_eq!(1, u64::from_le_bytes(buf));

    // Debug stores to the UART stay silent and must not trap either.
    hart.write(
        &mut allocator,
        Address::mem(UART0_ADDRESS, AccessType::write().debug()),
        b"\n",
    )
    .unwrap();
    assert_eq!(None, hart.trap(&allocator).taken());
}

#[test]
fn mtime_follows_instruction_count() {
    let (mut allocator, board) = board(Xlen::Rv32);
    let hart = board.hart();
    hart.counters_mut(&mut allocator).set_icount(0x345 << 12);
    let mut buf = [0u8; 8];
    hart.read(
        &mut allocator,
        Address::mem(MTIME_ADDRESS, AccessType::read()),
        &mut buf,
    )
    .unwrap();
    assert_eq!(0x345, u64::from_le_bytes(buf));
}

/// Builds a minimal RV32 executable: one loadable segment of four bytes at 0x8000_0000 and a
/// `.tohost` section at 0x8000_1000.
fn elf32_image() -> Vec<u8> {
    let mut bytes = Vec::new();
    // ELF header.
    bytes.extend_from_slice(&[0x7F, b'E', b'L', b'F', 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    bytes.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    bytes.extend_from_slice(&243u16.to_le_bytes()); // EM_RISCV
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(&0x8000_0000u32.to_le_bytes()); // e_entry
    bytes.extend_from_slice(&52u32.to_le_bytes()); // e_phoff
    bytes.extend_from_slice(&108u32.to_le_bytes()); // e_shoff
    bytes.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    bytes.extend_from_slice(&52u16.to_le_bytes()); // e_ehsize
    bytes.extend_from_slice(&32u16.to_le_bytes()); // e_phentsize
    bytes.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
    bytes.extend_from_slice(&40u16.to_le_bytes()); // e_shentsize
    bytes.extend_from_slice(&3u16.to_le_bytes()); // e_shnum
    bytes.extend_from_slice(&2u16.to_le_bytes()); // e_shstrndx
    assert_eq!(52, bytes.len());
    // Program header: PT_LOAD, 4 bytes at file offset 84 -> vaddr 0x8000_0000.
    for word in [1u32, 84, 0x8000_0000, 0x8000_0000, 4, 4, 7, 4] {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    assert_eq!(84, bytes.len());
    bytes.extend_from_slice(&[0x13, 0x05, 0x10, 0x00]); // li a0, 1
    // Section-header string table at offset 88.
    bytes.extend_from_slice(b"\0.tohost\0.shstrtab\0");
    assert_eq!(107, bytes.len());
    bytes.push(0);
    // Section headers at offset 108: null, .tohost, .shstrtab.
    for word in [0u32; 10] {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    for word in [1u32, 1, 0, 0x8000_1000, 84, 8, 0, 0, 0, 0] {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    for word in [9u32, 3, 0, 0, 88, 19, 0, 0, 0, 0] {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    bytes
}

#[test]
fn image_load_and_tohost_discovery() {
    let bytes = elf32_image();
    let image = Image::parse(&bytes).unwrap();
    assert_eq!(0x8000_0000, image.entry());
    assert_eq!(Some(0x8000_1000), image.tohost());

    let mut allocator = Arena::new();
    let board = Board::new(&mut allocator, Config::for_image(Xlen::Rv32, &image));
    board.load_image(&mut allocator, &image).unwrap();

    let hart = board.hart();
    assert_eq!(0x8000_0000, hart.registers(&allocator).pc());
    let mut buf = [0u8; 4];
    hart.read(
        &mut allocator,
        Address::mem(0x8000_0000, AccessType::read().physical()),
        &mut buf,
    )
    .unwrap();
    assert_eq!([0x13, 0x05, 0x10, 0x00], buf);

    // The host windows moved to the image's .tohost address.
    hart.write(
        &mut allocator,
        Address::mem(0x8000_1000, AccessType::write()),
        &1u32.to_le_bytes(),
    )
    .unwrap();
    hart.write(
        &mut allocator,
        Address::mem(0x8000_1004, AccessType::write()),
        &0u32.to_le_bytes(),
    )
    .unwrap();
    assert_eq!(Some(1), board.exit_status(&allocator));
}

#[test]
fn image_parse_rejects_garbage() {
    assert!(Image::parse(&[0x7F]).is_err());
    assert!(Image::parse(b"not an elf file at all").is_err());
}
