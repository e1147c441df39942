use crate::registers::{as_bytes_mut, Arch, NativeArch};
use crate::{Error, Result};
use std::fmt;
use std::mem;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub use macos::*;

/// The three register sets a thread-state provider can be asked for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StateFlavor {
    General,
    Float,
    Exception,
}

impl fmt::Display for StateFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StateFlavor::General => "general-purpose",
            StateFlavor::Float => "floating-point",
            StateFlavor::Exception => "exception",
        })
    }
}

/// Why a thread's state could not be acquired.
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("status {0}")]
    Status(i32),

    #[error("expected {expected} bytes, got {actual}")]
    Size { expected: usize, actual: usize },
}

/// Fetches raw register state from a live, suspended thread.
pub trait ThreadStateProvider<A: Arch> {
    type Thread: Copy;

    /// Copy the `flavor` state of `thread` into `dst`, returning the number
    /// of bytes written or a platform status code.
    fn thread_state(&self, thread: Self::Thread, flavor: StateFlavor, dst: &mut [u8]) -> std::result::Result<usize, i32>;
}

/// A snapshot of one thread's registers, laid out like the platform's
/// native thread-state structures.
#[derive(Copy, Clone)]
pub struct ThreadContext<A: Arch> {
    pub thread: A::ThreadState,
    pub float: A::FloatState,
    pub exception: A::ExceptionState,
    pub signal_mask: libc::sigset_t,
}

impl<A: Arch> ThreadContext<A> {
    /// Adopt an already captured general-purpose state. The float and
    /// exception states are zeroed and the signal mask is empty.
    pub fn new(thread: A::ThreadState) -> Self {
        Self {
            thread,
            float: A::FloatState::default(),
            exception: A::ExceptionState::default(),
            signal_mask: empty_sigset(),
        }
    }

    /// Build a context from a live thread, querying `provider` once per
    /// state flavor.
    ///
    /// Every flavor must come back with exactly the size of the matching
    /// structure; anything else fails the whole acquisition.
    pub fn from_thread<P>(provider: &P, thread: P::Thread) -> Result<Self>
    where
        P: ThreadStateProvider<A> + ?Sized,
    {
        let mut context = Self::new(A::ThreadState::default());
        fetch::<A, P>(provider, thread, StateFlavor::General, as_bytes_mut(&mut context.thread))?;
        fetch::<A, P>(provider, thread, StateFlavor::Float, as_bytes_mut(&mut context.float))?;
        fetch::<A, P>(provider, thread, StateFlavor::Exception, as_bytes_mut(&mut context.exception))?;
        debug_log!(
            "acquired {} thread state: pc={:#x} sp={:#x}",
            A::NAME,
            A::pc(&context.thread),
            A::sp(&context.thread)
        );
        Ok(context)
    }

    #[inline]
    pub fn pc(&self) -> u64 {
        A::pc(&self.thread)
    }

    #[inline]
    pub fn sp(&self) -> u64 {
        A::sp(&self.thread)
    }

    #[inline]
    pub fn fp(&self) -> u64 {
        A::fp(&self.thread)
    }
}

impl ThreadContext<NativeArch> {
    /// Capture the calling thread's own registers.
    ///
    /// Always inlined, so the captured program counter lies in the function
    /// calling `current` and frame 0 of a walk is that function.
    #[inline(always)]
    pub fn current() -> Self {
        let mut thread = <NativeArch as Arch>::ThreadState::default();
        unsafe { crate::registers::capture_registers(&mut thread as _) };
        Self::new(thread)
    }
}

impl<A: Arch> fmt::Debug for ThreadContext<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadContext")
            .field("arch", &A::NAME)
            .field("thread", &self.thread)
            .field("exception", &self.exception)
            .finish_non_exhaustive()
    }
}

fn fetch<A, P>(provider: &P, thread: P::Thread, flavor: StateFlavor, dst: &mut [u8]) -> Result<()>
where
    A: Arch,
    P: ThreadStateProvider<A> + ?Sized,
{
    let expected = dst.len();
    match provider.thread_state(thread, flavor, dst) {
        Err(status) => Err(Error::ThreadState {
            flavor,
            reason: StateError::Status(status),
        }),
        Ok(actual) if actual != expected => Err(Error::ThreadState {
            flavor,
            reason: StateError::Size { expected, actual },
        }),
        Ok(_) => Ok(()),
    }
}

fn empty_sigset() -> libc::sigset_t {
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{as_bytes, X86ExceptionState64, X86ThreadState64, X86_64};

    struct Fixed {
        thread: X86ThreadState64,
        exception: X86ExceptionState64,
    }

    impl ThreadStateProvider<X86_64> for Fixed {
        type Thread = u32;

        fn thread_state(&self, _thread: u32, flavor: StateFlavor, dst: &mut [u8]) -> std::result::Result<usize, i32> {
            let src = match flavor {
                StateFlavor::General => as_bytes(&self.thread),
                StateFlavor::Float => &[0u8; 524][..],
                StateFlavor::Exception => as_bytes(&self.exception),
            };
            dst.copy_from_slice(src);
            Ok(src.len())
        }
    }

    #[test]
    fn test_from_thread() {
        let provider = Fixed {
            thread: X86ThreadState64 {
                rip: 0x1_0000_1234,
                rsp: 0x7fff_0000,
                rbp: 0x7fff_0040,
                ..Default::default()
            },
            exception: X86ExceptionState64 {
                trapno: 14,
                faultvaddr: 0x10,
                ..Default::default()
            },
        };
        let context = ThreadContext::<X86_64>::from_thread(&provider, 7).unwrap();
        assert_eq!(context.thread, provider.thread);
        assert_eq!(context.exception, provider.exception);
        assert_eq!(context.pc(), 0x1_0000_1234);
        assert_eq!(context.fp(), 0x7fff_0040);
        assert_eq!(unsafe { libc::sigismember(&context.signal_mask, libc::SIGSEGV) }, 0);
    }

    #[test]
    fn test_flavor_display() {
        assert_eq!(StateFlavor::Float.to_string(), "floating-point");
        let err = Error::ThreadState {
            flavor: StateFlavor::Exception,
            reason: StateError::Size { expected: 16, actual: 8 },
        };
        assert_eq!(
            err.to_string(),
            "failed to read exception thread state: expected 16 bytes, got 8"
        );
    }

    #[test]
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    fn test_current() {
        let context = ThreadContext::<NativeArch>::current();
        assert_ne!(context.pc(), 0);
        let local = 0u64;
        let here = &local as *const u64 as u64;
        // Both live on this thread's stack.
        assert!(context.sp().abs_diff(here) < 1 << 20);
    }
}
