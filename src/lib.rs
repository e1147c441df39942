//! This crate walks the stack of a thread that may be in an arbitrary,
//! possibly corrupted state: a crashed or suspended thread, or the thread
//! handling an asynchronous signal. Walking never allocates, never takes a
//! lock and only calls async-signal-safe functions.
//!
//! Frames come from an [UnwindProvider] (a frame-pointer walker ships with
//! the crate). When the provider loses track, [UnwindCursor] searches the raw
//! stack for the next word that points into a loaded image and carries on
//! from there.
//!
//! Simple usage:
//! ```
//! fn main() {
//!     // Populate the image list before any signal handler may need it.
//!     crash_unwind::loaded_images();
//!
//!     let mut pcs = vec![];
//!     let _ = crash_unwind::trace(|pc| {
//!         pcs.push(pc);
//!         true
//!     });
//!
//!     for pc in pcs {
//!         println!("{:#x}:", pc);
//!         backtrace::resolve(pc as _, |s| {
//!             println!("    {:?}", s.name());
//!         });
//!     }
//! }
//! ```
//!
//! Walking a suspended thread by hand:
//! ```ignore
//! let images = crash_unwind::loaded_images();
//! let reader = PipeReader::new()?;
//! let mut cursor = UnwindCursor::from_thread(
//!     &MachThreadStates,
//!     thread,
//!     FramePointerUnwinder::new(&reader),
//!     images,
//!     &reader,
//!     CursorConfig::default(),
//! )?;
//! while cursor.advance().is_ok() {
//!     println!("{:#x}", cursor.register(NativeArch::PROGRAM_COUNTER)?);
//! }
//! ```

#[cfg(not(all(
    any(target_arch = "x86_64", target_arch = "aarch64"),
    any(target_os = "linux", target_os = "macos")
)))]
compile_error!("crash-unwind supports x86_64 and aarch64 on Linux and macOS only");

// Log records are only emitted with the `log` feature: most loggers are not
// async-signal-safe.
macro_rules! debug_log {
    ($($arg:tt)+) => {{
        #[cfg(feature = "log")]
        log::trace!($($arg)+);
    }};
}

mod context;
mod cursor;
mod dyld;
mod image;
mod provider;
mod registers;
mod utils;

pub use context::{StateError, StateFlavor, ThreadContext, ThreadStateProvider};
#[cfg(target_os = "macos")]
pub use context::MachThreadStates;
pub use cursor::{scan_for_frame, CursorConfig, FrameIndex, ScanFallback, ScanHit, UnwindCursor, DEFAULT_SEARCH_WORDS};
pub use dyld::{loaded_images, register_loaded_images};
#[cfg(target_os = "macos")]
pub use dyld::set_image_tracking;
pub use image::{looks_valid, AsyncImageList, Image, ImageEntry, ImageList, Images, ReadMarker, StaticImages};
pub use provider::{FramePointerUnwinder, ProviderError, Step, UnwindProvider};
pub use registers::{
    register_name, Arch, Arm64, Arm64ExceptionState64, Arm64NeonState64, Arm64Register, Arm64ThreadState64,
    NativeArch, Pod, ProviderRegister, RegisterInfo, X86ExceptionState64, X86FloatState64, X86Register,
    X86ThreadState64, X86_64,
};
pub use utils::{MemoryFault, MemoryReader, PipeReader, SliceMemory, WORD_SIZE};

/// A result type that wraps [Error].
pub type Result<T> = std::result::Result<T, Error>;

/// Error definition.
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The walk reached the end of the stack.
    #[error("no more frames")]
    NoMoreFrames,

    #[error("unsupported register")]
    UnsupportedRegister,

    /// A frame was structurally inconsistent.
    #[error("bad frame")]
    BadFrame,

    #[error("failed to read {flavor} thread state: {reason}")]
    ThreadState { flavor: StateFlavor, reason: StateError },

    #[error("unwind provider error {0}")]
    Provider(i32),

    #[error("invalid ucontext")]
    InvalidUcontext,

    #[error("failed to create pipe: errno {0}")]
    Pipe(i32),
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NoFrame => Error::NoMoreFrames,
            ProviderError::BadRegister => Error::UnsupportedRegister,
            ProviderError::BadFrame => Error::BadFrame,
            ProviderError::Other(code) => Error::Provider(code),
        }
    }
}

/// Inspects the current call-stack, passing the program counter of every
/// active frame into the closure provided.
///
/// The closure's return value is an indication of whether the backtrace should
/// continue. A return value of `false` will terminate the backtrace and return
/// immediately.
///
/// Frames are found by following frame pointers, with a stack scan wherever
/// the chain breaks; the first call of [loaded_images] allocates, so make it
/// early when tracing from a signal handler.
#[inline(never)]
pub fn trace<F>(f: F) -> Result<bool>
where
    F: FnMut(u64) -> bool,
{
    let context = ThreadContext::<NativeArch>::current();
    // Frame 0 is `trace` itself.
    walk(context, 1, f)
}

/// Inspects the call-stack from `ucontext`, passing the program counter of
/// every active frame into the closure provided. The first frame is the
/// interrupted instruction.
///
/// # Safety
///
/// `ucontext` must be null or point to the `ucontext_t` passed to an
/// `SA_SIGINFO` signal handler.
pub unsafe fn trace_from_ucontext<F>(ucontext: *mut libc::c_void, f: F) -> Result<bool>
where
    F: FnMut(u64) -> bool,
{
    let context = ThreadContext::<NativeArch>::from_ucontext(ucontext)?;
    walk(context, 0, f)
}

fn walk<F>(context: ThreadContext<NativeArch>, skip: u32, mut f: F) -> Result<bool>
where
    F: FnMut(u64) -> bool,
{
    let reader = PipeReader::new().map_err(|err| Error::Pipe(err.raw_os_error().unwrap_or(0)))?;
    let provider = FramePointerUnwinder::<NativeArch, _>::new(&reader);
    let mut cursor = UnwindCursor::new(context, provider, loaded_images(), &reader)?;
    loop {
        match cursor.advance() {
            Ok(()) => {}
            Err(Error::NoMoreFrames) => return Ok(true),
            Err(err) => return Err(err),
        }
        if let FrameIndex::Frame(n) = cursor.frame() {
            if n < skip {
                continue;
            }
        }
        if !f(cursor.register(NativeArch::PROGRAM_COUNTER)?) {
            return Ok(false);
        }
    }
}
