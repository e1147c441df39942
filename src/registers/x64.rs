use crate::registers::{Arch, Pod, ProviderRegister, RegisterInfo};
use std::mem::{offset_of, size_of};

/// x86-64 general-purpose thread state, laid out like Darwin's
/// `x86_thread_state64_t`.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct X86ThreadState64 {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
    pub cs: u64,
    pub fs: u64,
    pub gs: u64,
}

/// x86-64 floating point state (`x86_float_state64_t`).
///
/// Kept as an opaque word array: the legacy FXSAVE image starts at byte 8.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct X86FloatState64 {
    pub words: [u32; 131],
}

impl Default for X86FloatState64 {
    fn default() -> Self {
        Self { words: [0; 131] }
    }
}

/// x86-64 exception state (`x86_exception_state64_t`).
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct X86ExceptionState64 {
    pub trapno: u16,
    pub cpu: u16,
    pub err: u32,
    pub faultvaddr: u64,
}

const _: () = assert!(size_of::<X86ThreadState64>() == 168);
const _: () = assert!(size_of::<X86FloatState64>() == 524);
const _: () = assert!(size_of::<X86ExceptionState64>() == 16);

unsafe impl Pod for X86ThreadState64 {}
unsafe impl Pod for X86FloatState64 {}
unsafe impl Pod for X86ExceptionState64 {}

/// Registers that can be requested from an x86-64 cursor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum X86Register {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rdi,
    Rsi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Rip,
    Rflags,
    Cs,
    Fs,
    Gs,
}

impl X86Register {
    pub const ALL: [X86Register; 21] = [
        X86Register::Rax,
        X86Register::Rbx,
        X86Register::Rcx,
        X86Register::Rdx,
        X86Register::Rdi,
        X86Register::Rsi,
        X86Register::Rbp,
        X86Register::Rsp,
        X86Register::R8,
        X86Register::R9,
        X86Register::R10,
        X86Register::R11,
        X86Register::R12,
        X86Register::R13,
        X86Register::R14,
        X86Register::R15,
        X86Register::Rip,
        X86Register::Rflags,
        X86Register::Cs,
        X86Register::Fs,
        X86Register::Gs,
    ];
}

type S = X86ThreadState64;

// Provider numbers are the SysV DWARF numbers (rax=0, rdx=1, rcx=2, rbx=3, ...).
static X86_REGISTERS: [RegisterInfo<X86Register>; 21] = [
    RegisterInfo::provided(X86Register::Rax, "rax", offset_of!(S, rax), ProviderRegister::dwarf(0)),
    RegisterInfo::provided(X86Register::Rbx, "rbx", offset_of!(S, rbx), ProviderRegister::dwarf(3)),
    RegisterInfo::provided(X86Register::Rcx, "rcx", offset_of!(S, rcx), ProviderRegister::dwarf(2)),
    RegisterInfo::provided(X86Register::Rdx, "rdx", offset_of!(S, rdx), ProviderRegister::dwarf(1)),
    RegisterInfo::provided(X86Register::Rdi, "rdi", offset_of!(S, rdi), ProviderRegister::dwarf(5)),
    RegisterInfo::provided(X86Register::Rsi, "rsi", offset_of!(S, rsi), ProviderRegister::dwarf(4)),
    RegisterInfo::provided(X86Register::Rbp, "rbp", offset_of!(S, rbp), ProviderRegister::dwarf(6)),
    RegisterInfo::provided(X86Register::Rsp, "rsp", offset_of!(S, rsp), ProviderRegister::dwarf(7)),
    RegisterInfo::provided(X86Register::R8, "r8", offset_of!(S, r8), ProviderRegister::dwarf(8)),
    RegisterInfo::provided(X86Register::R9, "r9", offset_of!(S, r9), ProviderRegister::dwarf(9)),
    RegisterInfo::provided(X86Register::R10, "r10", offset_of!(S, r10), ProviderRegister::dwarf(10)),
    RegisterInfo::provided(X86Register::R11, "r11", offset_of!(S, r11), ProviderRegister::dwarf(11)),
    RegisterInfo::provided(X86Register::R12, "r12", offset_of!(S, r12), ProviderRegister::dwarf(12)),
    RegisterInfo::provided(X86Register::R13, "r13", offset_of!(S, r13), ProviderRegister::dwarf(13)),
    RegisterInfo::provided(X86Register::R14, "r14", offset_of!(S, r14), ProviderRegister::dwarf(14)),
    RegisterInfo::provided(X86Register::R15, "r15", offset_of!(S, r15), ProviderRegister::dwarf(15)),
    RegisterInfo::provided(X86Register::Rip, "rip", offset_of!(S, rip), ProviderRegister::IP),
    RegisterInfo::snapshot(X86Register::Rflags, "rflags", offset_of!(S, rflags), 8),
    RegisterInfo::snapshot(X86Register::Cs, "cs", offset_of!(S, cs), 8),
    RegisterInfo::snapshot(X86Register::Fs, "fs", offset_of!(S, fs), 8),
    RegisterInfo::snapshot(X86Register::Gs, "gs", offset_of!(S, gs), 8),
];

#[derive(Debug, Copy, Clone)]
pub struct X86_64;

impl Arch for X86_64 {
    type Register = X86Register;
    type ThreadState = X86ThreadState64;
    type FloatState = X86FloatState64;
    type ExceptionState = X86ExceptionState64;

    const NAME: &'static str = "x86_64";
    const PROGRAM_COUNTER: X86Register = X86Register::Rip;
    const STACK_POINTER: X86Register = X86Register::Rsp;
    const FRAME_POINTER: X86Register = X86Register::Rbp;
    const REGISTERS: &'static [RegisterInfo<X86Register>] = &X86_REGISTERS;

    // x86_THREAD_STATE64, x86_FLOAT_STATE64, x86_EXCEPTION_STATE64
    const MACH_FLAVORS: [u32; 3] = [4, 5, 6];

    #[inline]
    fn index(register: X86Register) -> usize {
        register as usize
    }
}
