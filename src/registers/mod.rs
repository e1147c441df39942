use byteorder::{ByteOrder, NativeEndian};
use std::fmt;

mod aarch64;
mod x64;

pub use aarch64::*;
pub use x64::*;

/// The architecture this crate was compiled for.
#[cfg(target_arch = "x86_64")]
pub type NativeArch = X86_64;

/// The architecture this crate was compiled for.
#[cfg(target_arch = "aarch64")]
pub type NativeArch = Arm64;

/// Register numbering understood by an [UnwindProvider].
///
/// Non-negative values are DWARF register numbers. The two negative values
/// name the instruction and stack pointer independently of the architecture,
/// the same way libunwind's `UNW_REG_IP`/`UNW_REG_SP` do.
///
/// [UnwindProvider]: crate::UnwindProvider
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ProviderRegister(pub i32);

impl ProviderRegister {
    pub const IP: Self = Self(-1);
    pub const SP: Self = Self(-2);

    #[inline]
    pub const fn dwarf(n: u16) -> Self {
        Self(n as i32)
    }
}

/// One row of an architecture's register table.
#[derive(Debug, Copy, Clone)]
pub struct RegisterInfo<R> {
    pub register: R,
    pub name: &'static str,
    /// Byte offset of the register inside the general-purpose thread state.
    pub offset: usize,
    /// Width of the register inside the thread state, in bytes (4 or 8).
    pub size: usize,
    /// How the unwind provider names this register, or `None` when the
    /// provider has no concept of it and the snapshot is the only source.
    pub provider: Option<ProviderRegister>,
}

impl<R> RegisterInfo<R> {
    pub(crate) const fn provided(register: R, name: &'static str, offset: usize, provider: ProviderRegister) -> Self {
        Self {
            register,
            name,
            offset,
            size: 8,
            provider: Some(provider),
        }
    }

    pub(crate) const fn snapshot(register: R, name: &'static str, offset: usize, size: usize) -> Self {
        Self {
            register,
            name,
            offset,
            size,
            provider: None,
        }
    }

    /// Read this register out of a raw general-purpose thread state.
    #[inline]
    pub fn read<S: Pod>(&self, state: &S) -> u64 {
        let bytes = &as_bytes(state)[self.offset..self.offset + self.size];
        match self.size {
            4 => NativeEndian::read_u32(bytes) as u64,
            _ => NativeEndian::read_u64(bytes),
        }
    }

    /// Overwrite this register inside a raw general-purpose thread state.
    #[inline]
    pub fn write<S: Pod>(&self, state: &mut S, value: u64) {
        let bytes = &mut as_bytes_mut(state)[self.offset..self.offset + self.size];
        match self.size {
            4 => NativeEndian::write_u32(bytes, value as u32),
            _ => NativeEndian::write_u64(bytes, value),
        }
    }
}

/// Plain-old-data marker for the `#[repr(C)]` thread-state layouts.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, contain no padding bytes, and be valid
/// for every bit pattern.
pub unsafe trait Pod: Copy + 'static {}

#[inline]
pub(crate) fn as_bytes<T: Pod>(v: &T) -> &[u8] {
    // SAFETY: `Pod` guarantees a padding-free plain-data layout.
    unsafe { std::slice::from_raw_parts(v as *const T as *const u8, std::mem::size_of::<T>()) }
}

#[inline]
pub(crate) fn as_bytes_mut<T: Pod>(v: &mut T) -> &mut [u8] {
    // SAFETY: `Pod` guarantees every bit pattern is a valid `T`.
    unsafe { std::slice::from_raw_parts_mut(v as *mut T as *mut u8, std::mem::size_of::<T>()) }
}

/// An architecture: its native thread-state layouts and its register table.
///
/// The state types mirror the kernel's thread-state structures bit for bit,
/// so a snapshot fetched from the OS can be used without reinterpretation.
pub trait Arch: Copy + fmt::Debug + 'static {
    type Register: Copy + Eq + fmt::Debug + 'static;
    type ThreadState: Pod + Default + fmt::Debug;
    type FloatState: Pod + Default;
    type ExceptionState: Pod + Default + fmt::Debug;

    const NAME: &'static str;
    const PROGRAM_COUNTER: Self::Register;
    const STACK_POINTER: Self::Register;
    const FRAME_POINTER: Self::Register;

    /// Every supported register, in discriminant order.
    const REGISTERS: &'static [RegisterInfo<Self::Register>];

    /// Mach `thread_state_flavor_t` values for the general, float and
    /// exception states, in that order.
    const MACH_FLAVORS: [u32; 3];

    /// Position of `register` inside [Arch::REGISTERS].
    fn index(register: Self::Register) -> usize;

    #[inline]
    fn info(register: Self::Register) -> &'static RegisterInfo<Self::Register> {
        &Self::REGISTERS[Self::index(register)]
    }

    #[inline]
    fn pc(state: &Self::ThreadState) -> u64 {
        Self::info(Self::PROGRAM_COUNTER).read(state)
    }

    #[inline]
    fn set_pc(state: &mut Self::ThreadState, value: u64) {
        Self::info(Self::PROGRAM_COUNTER).write(state, value)
    }

    #[inline]
    fn sp(state: &Self::ThreadState) -> u64 {
        Self::info(Self::STACK_POINTER).read(state)
    }

    #[inline]
    fn set_sp(state: &mut Self::ThreadState, value: u64) {
        Self::info(Self::STACK_POINTER).write(state, value)
    }

    #[inline]
    fn fp(state: &Self::ThreadState) -> u64 {
        Self::info(Self::FRAME_POINTER).read(state)
    }

    #[inline]
    fn set_fp(state: &mut Self::ThreadState, value: u64) {
        Self::info(Self::FRAME_POINTER).write(state, value)
    }

    /// Find the register a provider calls `provider`.
    fn from_provider(provider: ProviderRegister) -> Option<Self::Register> {
        match provider {
            ProviderRegister::IP => Some(Self::PROGRAM_COUNTER),
            ProviderRegister::SP => Some(Self::STACK_POINTER),
            _ => Self::REGISTERS
                .iter()
                .find(|info| info.provider == Some(provider))
                .map(|info| info.register),
        }
    }
}

/// Return the human-readable name of `register`.
#[inline]
pub fn register_name<A: Arch>(register: A::Register) -> &'static str {
    A::info(register).name
}

extern "C" {
    /// Capture the calling thread's general-purpose registers.
    ///
    /// The implementation lives in `src/registers/x64.S`; the program counter
    /// and stack pointer describe the caller as it will be right after the
    /// call returns.
    #[cfg(target_arch = "x86_64")]
    #[link_name = "crash_unwind_capture_x86_64"]
    pub fn capture_registers(state: *mut X86ThreadState64);

    /// Capture the calling thread's general-purpose registers.
    ///
    /// The implementation lives in `src/registers/aarch64.S`.
    #[cfg(target_arch = "aarch64")]
    #[link_name = "crash_unwind_capture_aarch64"]
    pub fn capture_registers(state: *mut Arm64ThreadState64);
}
