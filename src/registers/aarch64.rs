use crate::registers::{Arch, Pod, ProviderRegister, RegisterInfo};
use std::mem::{offset_of, size_of};

/// arm64 general-purpose thread state, laid out like Darwin's
/// `arm_thread_state64_t`.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Arm64ThreadState64 {
    pub x: [u64; 29],
    pub fp: u64,
    pub lr: u64,
    pub sp: u64,
    pub pc: u64,
    pub cpsr: u32,
    pub pad: u32,
}

/// arm64 NEON state (`arm_neon_state64_t`), opaque.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct Arm64NeonState64 {
    pub words: [u32; 132],
}

impl Default for Arm64NeonState64 {
    fn default() -> Self {
        Self { words: [0; 132] }
    }
}

/// arm64 exception state (`arm_exception_state64_t`).
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Arm64ExceptionState64 {
    pub far: u64,
    pub esr: u32,
    pub exception: u32,
}

const _: () = assert!(size_of::<Arm64ThreadState64>() == 272);
const _: () = assert!(size_of::<Arm64NeonState64>() == 528);
const _: () = assert!(size_of::<Arm64ExceptionState64>() == 16);

unsafe impl Pod for Arm64ThreadState64 {}
unsafe impl Pod for Arm64NeonState64 {}
unsafe impl Pod for Arm64ExceptionState64 {}

/// Registers that can be requested from an arm64 cursor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Arm64Register {
    X0,
    X1,
    X2,
    X3,
    X4,
    X5,
    X6,
    X7,
    X8,
    X9,
    X10,
    X11,
    X12,
    X13,
    X14,
    X15,
    X16,
    X17,
    X18,
    X19,
    X20,
    X21,
    X22,
    X23,
    X24,
    X25,
    X26,
    X27,
    X28,
    Fp,
    Lr,
    Sp,
    Pc,
    Cpsr,
}

impl Arm64Register {
    pub const ALL: [Arm64Register; 34] = [
        Arm64Register::X0,
        Arm64Register::X1,
        Arm64Register::X2,
        Arm64Register::X3,
        Arm64Register::X4,
        Arm64Register::X5,
        Arm64Register::X6,
        Arm64Register::X7,
        Arm64Register::X8,
        Arm64Register::X9,
        Arm64Register::X10,
        Arm64Register::X11,
        Arm64Register::X12,
        Arm64Register::X13,
        Arm64Register::X14,
        Arm64Register::X15,
        Arm64Register::X16,
        Arm64Register::X17,
        Arm64Register::X18,
        Arm64Register::X19,
        Arm64Register::X20,
        Arm64Register::X21,
        Arm64Register::X22,
        Arm64Register::X23,
        Arm64Register::X24,
        Arm64Register::X25,
        Arm64Register::X26,
        Arm64Register::X27,
        Arm64Register::X28,
        Arm64Register::Fp,
        Arm64Register::Lr,
        Arm64Register::Sp,
        Arm64Register::Pc,
        Arm64Register::Cpsr,
    ];
}

type S = Arm64ThreadState64;

const fn x(register: Arm64Register, name: &'static str, n: u16) -> RegisterInfo<Arm64Register> {
    RegisterInfo::provided(register, name, offset_of!(S, x) + n as usize * 8, ProviderRegister::dwarf(n))
}

static ARM64_REGISTERS: [RegisterInfo<Arm64Register>; 34] = [
    x(Arm64Register::X0, "x0", 0),
    x(Arm64Register::X1, "x1", 1),
    x(Arm64Register::X2, "x2", 2),
    x(Arm64Register::X3, "x3", 3),
    x(Arm64Register::X4, "x4", 4),
    x(Arm64Register::X5, "x5", 5),
    x(Arm64Register::X6, "x6", 6),
    x(Arm64Register::X7, "x7", 7),
    x(Arm64Register::X8, "x8", 8),
    x(Arm64Register::X9, "x9", 9),
    x(Arm64Register::X10, "x10", 10),
    x(Arm64Register::X11, "x11", 11),
    x(Arm64Register::X12, "x12", 12),
    x(Arm64Register::X13, "x13", 13),
    x(Arm64Register::X14, "x14", 14),
    x(Arm64Register::X15, "x15", 15),
    x(Arm64Register::X16, "x16", 16),
    x(Arm64Register::X17, "x17", 17),
    x(Arm64Register::X18, "x18", 18),
    x(Arm64Register::X19, "x19", 19),
    x(Arm64Register::X20, "x20", 20),
    x(Arm64Register::X21, "x21", 21),
    x(Arm64Register::X22, "x22", 22),
    x(Arm64Register::X23, "x23", 23),
    x(Arm64Register::X24, "x24", 24),
    x(Arm64Register::X25, "x25", 25),
    x(Arm64Register::X26, "x26", 26),
    x(Arm64Register::X27, "x27", 27),
    x(Arm64Register::X28, "x28", 28),
    RegisterInfo::provided(Arm64Register::Fp, "fp", offset_of!(S, fp), ProviderRegister::dwarf(29)),
    RegisterInfo::provided(Arm64Register::Lr, "lr", offset_of!(S, lr), ProviderRegister::dwarf(30)),
    RegisterInfo::provided(Arm64Register::Sp, "sp", offset_of!(S, sp), ProviderRegister::dwarf(31)),
    RegisterInfo::provided(Arm64Register::Pc, "pc", offset_of!(S, pc), ProviderRegister::IP),
    RegisterInfo::snapshot(Arm64Register::Cpsr, "cpsr", offset_of!(S, cpsr), 4),
];

#[derive(Debug, Copy, Clone)]
pub struct Arm64;

impl Arch for Arm64 {
    type Register = Arm64Register;
    type ThreadState = Arm64ThreadState64;
    type FloatState = Arm64NeonState64;
    type ExceptionState = Arm64ExceptionState64;

    const NAME: &'static str = "arm64";
    const PROGRAM_COUNTER: Arm64Register = Arm64Register::Pc;
    const STACK_POINTER: Arm64Register = Arm64Register::Sp;
    const FRAME_POINTER: Arm64Register = Arm64Register::Fp;
    const REGISTERS: &'static [RegisterInfo<Arm64Register>] = &ARM64_REGISTERS;

    // ARM_THREAD_STATE64, ARM_NEON_STATE64, ARM_EXCEPTION_STATE64
    const MACH_FLAVORS: [u32; 3] = [6, 17, 7];

    #[inline]
    fn index(register: Arm64Register) -> usize {
        register as usize
    }
}
