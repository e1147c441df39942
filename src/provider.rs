use crate::registers::{Arch, ProviderRegister};
use crate::utils::{MemoryReader, WORD_SIZE};
use byteorder::{ByteOrder, NativeEndian};

/// Outcome of one successful provider step.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Step {
    /// The provider moved to the caller's frame.
    More,
    /// The provider has nothing more to offer. If the program counter did
    /// not change, the provider lost track rather than reaching the end.
    Done,
}

/// Errors reported by an [UnwindProvider].
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("no frame")]
    NoFrame,

    #[error("bad register")]
    BadRegister,

    #[error("bad frame")]
    BadFrame,

    #[error("provider error {0}")]
    Other(i32),
}

/// The primary frame-by-frame unwinder driven by [UnwindCursor].
///
/// Implementations must be async-signal-safe: no allocation and no locks in
/// any of these methods.
///
/// [UnwindCursor]: crate::UnwindCursor
pub trait UnwindProvider<A: Arch> {
    /// (Re)seed the walk from a general-purpose register state.
    fn init(&mut self, state: &A::ThreadState) -> Result<(), ProviderError>;

    /// Move to the caller's frame.
    fn step(&mut self) -> Result<Step, ProviderError>;

    /// Read a register of the current frame.
    fn register(&self, register: ProviderRegister) -> Result<u64, ProviderError>;
}

impl<A: Arch, P: UnwindProvider<A> + ?Sized> UnwindProvider<A> for &mut P {
    #[inline]
    fn init(&mut self, state: &A::ThreadState) -> Result<(), ProviderError> {
        (**self).init(state)
    }

    #[inline]
    fn step(&mut self) -> Result<Step, ProviderError> {
        (**self).step()
    }

    #[inline]
    fn register(&self, register: ProviderRegister) -> Result<u64, ProviderError> {
        (**self).register(register)
    }
}

/// Walks the chain of frame records built by function prologues that keep a
/// frame pointer: `[fp]` holds the caller's frame pointer and
/// `[fp + 8]` the return address.
///
/// A zero frame pointer or return address terminates the chain. A frame
/// record that cannot be read yields [Step::Done] without touching the
/// program counter, so the cursor treats it as a lost track and scans.
///
/// The highest record followed so far survives [UnwindProvider::init]. A
/// reseeded walk that leads back to a record at or below it stops with
/// [Step::Done] instead of replaying frames already reported. Use a fresh
/// unwinder for every walk.
#[derive(Debug)]
pub struct FramePointerUnwinder<A: Arch, M> {
    memory: M,
    state: A::ThreadState,
    floor: u64,
}

impl<A: Arch, M: MemoryReader> FramePointerUnwinder<A, M> {
    #[inline]
    pub fn new(memory: M) -> Self {
        Self {
            memory,
            state: A::ThreadState::default(),
            floor: 0,
        }
    }

    /// The register state of the current frame.
    #[inline]
    pub fn state(&self) -> &A::ThreadState {
        &self.state
    }
}

impl<A: Arch, M: MemoryReader> UnwindProvider<A> for FramePointerUnwinder<A, M> {
    #[inline]
    fn init(&mut self, state: &A::ThreadState) -> Result<(), ProviderError> {
        self.state = *state;
        Ok(())
    }

    fn step(&mut self) -> Result<Step, ProviderError> {
        let fp = A::fp(&self.state);
        if fp == 0 {
            return Err(ProviderError::NoFrame);
        }
        if fp <= self.floor {
            debug_log!("frame record {:#x} already followed", fp);
            return Ok(Step::Done);
        }
        let mut record = [0u8; 2 * WORD_SIZE as usize];
        if self.memory.read(fp, &mut record).is_err() {
            return Ok(Step::Done);
        }
        let caller_fp = NativeEndian::read_u64(&record[..8]);
        let return_address = NativeEndian::read_u64(&record[8..]);
        if return_address == 0 {
            return Err(ProviderError::NoFrame);
        }
        // Stacks grow down: the caller's record must sit above ours.
        if caller_fp != 0 && caller_fp <= fp {
            return Err(ProviderError::BadFrame);
        }
        let sp = fp.checked_add(2 * WORD_SIZE).ok_or(ProviderError::BadFrame)?;
        A::set_pc(&mut self.state, return_address);
        A::set_sp(&mut self.state, sp);
        A::set_fp(&mut self.state, caller_fp);
        self.floor = fp;
        Ok(Step::More)
    }

    fn register(&self, register: ProviderRegister) -> Result<u64, ProviderError> {
        let register = A::from_provider(register).ok_or(ProviderError::BadRegister)?;
        Ok(A::info(register).read(&self.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{X86ThreadState64, X86_64};
    use crate::utils::SliceMemory;

    const BASE: u64 = 0x7ff0_0000_1000;

    fn stack(words: &[u64]) -> Vec<u8> {
        let mut bytes = vec![0u8; words.len() * 8];
        for (n, word) in words.iter().enumerate() {
            NativeEndian::write_u64(&mut bytes[n * 8..], *word);
        }
        bytes
    }

    fn seeded(memory: SliceMemory<'_>, rip: u64, rbp: u64) -> FramePointerUnwinder<X86_64, SliceMemory<'_>> {
        let mut unwinder = FramePointerUnwinder::<X86_64, _>::new(memory);
        let state = X86ThreadState64 {
            rip,
            rbp,
            rsp: BASE,
            rbx: 0x77,
            ..Default::default()
        };
        unwinder.init(&state).unwrap();
        unwinder
    }

    #[test]
    fn test_walk_frame_chain() {
        // Two records: at BASE+0x10 and at BASE+0x30, then the terminator.
        let mut words = vec![0u64; 10];
        words[2] = BASE + 0x30;
        words[3] = 0x1_0000_2000;
        words[6] = 0;
        words[7] = 0x1_0000_3000;
        let bytes = stack(&words);
        let mut unwinder = seeded(SliceMemory::new(BASE, &bytes), 0x1_0000_1000, BASE + 0x10);

        assert_eq!(unwinder.step(), Ok(Step::More));
        assert_eq!(unwinder.register(ProviderRegister::IP), Ok(0x1_0000_2000));
        assert_eq!(unwinder.register(ProviderRegister::SP), Ok(BASE + 0x20));
        assert_eq!(unwinder.register(ProviderRegister::dwarf(6)), Ok(BASE + 0x30));
        assert_eq!(unwinder.register(ProviderRegister::dwarf(3)), Ok(0x77));

        assert_eq!(unwinder.step(), Ok(Step::More));
        assert_eq!(unwinder.register(ProviderRegister::IP), Ok(0x1_0000_3000));
        assert_eq!(unwinder.step(), Err(ProviderError::NoFrame));
    }

    #[test]
    fn test_unreadable_record_keeps_pc() {
        let bytes = stack(&[0; 4]);
        let mut unwinder = seeded(SliceMemory::new(BASE, &bytes), 0x1_0000_1000, 0x10);
        assert_eq!(unwinder.step(), Ok(Step::Done));
        assert_eq!(unwinder.register(ProviderRegister::IP), Ok(0x1_0000_1000));
    }

    #[test]
    fn test_bad_chain() {
        // Caller record below the current one.
        let bytes = stack(&[0, 0, BASE, 0x1_0000_2000]);
        let mut unwinder = seeded(SliceMemory::new(BASE, &bytes), 0x1_0000_1000, BASE + 0x10);
        assert_eq!(unwinder.step(), Err(ProviderError::BadFrame));

        // Zero return address.
        let bytes = stack(&[0, 0, BASE + 0x30, 0]);
        let mut unwinder = seeded(SliceMemory::new(BASE, &bytes), 0x1_0000_1000, BASE + 0x10);
        assert_eq!(unwinder.step(), Err(ProviderError::NoFrame));

        let mut unwinder = seeded(SliceMemory::new(BASE, &bytes), 0x1_0000_1000, 0);
        assert_eq!(unwinder.step(), Err(ProviderError::NoFrame));
    }

    #[test]
    fn test_reseed_does_not_replay_chain() {
        let mut words = vec![0u64; 8];
        words[2] = BASE + 0x30;
        words[3] = 0x1_0000_2000;
        words[7] = 0x1_0000_3000;
        let bytes = stack(&words);
        let mut unwinder = seeded(SliceMemory::new(BASE, &bytes), 0x1_0000_1000, BASE + 0x10);
        assert_eq!(unwinder.step(), Ok(Step::More));

        // Back to the first record with a different pc.
        let state = X86ThreadState64 {
            rip: 0x1_0000_4000,
            rbp: BASE + 0x10,
            rsp: BASE,
            ..Default::default()
        };
        unwinder.init(&state).unwrap();
        assert_eq!(unwinder.step(), Ok(Step::Done));
        assert_eq!(unwinder.register(ProviderRegister::IP), Ok(0x1_0000_4000));

        // A record above the floor is still followed.
        let state = X86ThreadState64 {
            rip: 0x1_0000_4000,
            rbp: BASE + 0x30,
            ..Default::default()
        };
        unwinder.init(&state).unwrap();
        assert_eq!(unwinder.step(), Ok(Step::More));
        assert_eq!(unwinder.register(ProviderRegister::IP), Ok(0x1_0000_3000));
    }

    #[test]
    fn test_unknown_register() {
        let unwinder = FramePointerUnwinder::<X86_64, _>::new(SliceMemory::new(0, &[]));
        assert_eq!(unwinder.register(ProviderRegister::dwarf(17)), Err(ProviderError::BadRegister));
    }
}
