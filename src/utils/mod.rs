use byteorder::{ByteOrder, NativeEndian};

mod access_check;

pub use access_check::PipeReader;

/// Size of a machine word (and of every general-purpose register) in bytes.
pub const WORD_SIZE: u64 = 8;

/// A read of foreign memory failed instead of trapping.
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("memory at {address:#x} is not readable")]
pub struct MemoryFault {
    pub address: u64,
}

/// A fault-tolerant memory read primitive.
///
/// Implementations must turn any invalid access into a [MemoryFault] rather
/// than a hardware trap, and must be async-signal-safe.
pub trait MemoryReader {
    fn read(&self, address: u64, dst: &mut [u8]) -> Result<(), MemoryFault>;

    /// Read one native-endian machine word.
    #[inline]
    fn read_word(&self, address: u64) -> Result<u64, MemoryFault> {
        let mut buffer = [0u8; WORD_SIZE as usize];
        self.read(address, &mut buffer)?;
        Ok(NativeEndian::read_u64(&buffer))
    }
}

impl<M: MemoryReader + ?Sized> MemoryReader for &M {
    #[inline]
    fn read(&self, address: u64, dst: &mut [u8]) -> Result<(), MemoryFault> {
        (**self).read(address, dst)
    }
}

/// Serves reads from a captured copy of memory that lived at `base`.
///
/// Anything outside `[base, base + bytes.len())` faults.
#[derive(Debug, Copy, Clone)]
pub struct SliceMemory<'a> {
    base: u64,
    bytes: &'a [u8],
}

impl<'a> SliceMemory<'a> {
    #[inline]
    pub fn new(base: u64, bytes: &'a [u8]) -> Self {
        Self { base, bytes }
    }

    #[inline]
    pub fn base(&self) -> u64 {
        self.base
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.base + self.bytes.len() as u64
    }
}

impl MemoryReader for SliceMemory<'_> {
    fn read(&self, address: u64, dst: &mut [u8]) -> Result<(), MemoryFault> {
        let fault = MemoryFault { address };
        let start = address.checked_sub(self.base).ok_or(fault)? as usize;
        let end = start.checked_add(dst.len()).ok_or(fault)?;
        let src = self.bytes.get(start..end).ok_or(fault)?;
        dst.copy_from_slice(src);
        Ok(())
    }
}
