use crate::context::{ThreadContext, ThreadStateProvider};
use crate::image::ImageList;
use crate::provider::{Step, UnwindProvider};
use crate::registers::{Arch, ProviderRegister};
use crate::utils::MemoryReader;
use crate::{Error, Result};

mod scan;

pub use scan::{scan_for_frame, ScanHit, DEFAULT_SEARCH_WORDS};

/// What the cursor does when the provider stops without moving.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScanFallback {
    /// Search up to `search_words` stack words for a return address.
    Enabled { search_words: u32 },
    /// Treat the stop as the end of the stack.
    Disabled,
}

impl Default for ScanFallback {
    fn default() -> Self {
        ScanFallback::Enabled {
            search_words: DEFAULT_SEARCH_WORDS,
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CursorConfig {
    pub scan: ScanFallback,
}

/// Position of a cursor in the stack.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameIndex {
    /// Initialized, but [UnwindCursor::advance] was never called.
    Uninitialized,
    /// Frame 0 is the frame the snapshot was taken in.
    Frame(u32),
}

/// Walks one thread's stack one frame at a time.
///
/// Frames come from an [UnwindProvider]. When the provider reports it is
/// done but the program counter did not change, the provider has lost
/// track: the cursor then searches the stack for the next plausible return
/// address and restarts the provider from there.
///
/// Every method is async-signal-safe as long as the provider, the image
/// list and the memory reader are.
pub struct UnwindCursor<'a, A: Arch, P, L: ?Sized, M> {
    context: ThreadContext<A>,
    provider: P,
    images: &'a L,
    memory: M,
    config: CursorConfig,
    frame: FrameIndex,
    last_unwind_address: u64,
    watermark: u64,
    last_valid_frame: u64,
    end_of_stack: bool,
}

impl<'a, A, P, L, M> UnwindCursor<'a, A, P, L, M>
where
    A: Arch,
    P: UnwindProvider<A>,
    L: ImageList + ?Sized,
    M: MemoryReader,
{
    /// Start a walk over an already captured context.
    pub fn new(context: ThreadContext<A>, provider: P, images: &'a L, memory: M) -> Result<Self> {
        Self::with_config(context, provider, images, memory, CursorConfig::default())
    }

    pub fn with_config(
        context: ThreadContext<A>,
        mut provider: P,
        images: &'a L,
        memory: M,
        config: CursorConfig,
    ) -> Result<Self> {
        provider.init(&context.thread)?;
        Ok(Self {
            last_valid_frame: context.pc(),
            watermark: context.sp(),
            context,
            provider,
            images,
            memory,
            config,
            frame: FrameIndex::Uninitialized,
            last_unwind_address: 0,
            end_of_stack: false,
        })
    }

    /// Start a walk over a live thread, whose state is fetched once through
    /// `states`.
    pub fn from_thread<S>(
        states: &S,
        thread: S::Thread,
        provider: P,
        images: &'a L,
        memory: M,
        config: CursorConfig,
    ) -> Result<Self>
    where
        S: ThreadStateProvider<A> + ?Sized,
    {
        let context = ThreadContext::from_thread(states, thread)?;
        Self::with_config(context, provider, images, memory, config)
    }

    /// Move to the next (older) frame.
    ///
    /// The first call only moves onto frame 0. [Error::NoMoreFrames] marks
    /// the normal end of the walk; any other error means the stack cannot be
    /// trusted past the current frame.
    pub fn advance(&mut self) -> Result<()> {
        if self.end_of_stack {
            return Err(Error::NoMoreFrames);
        }
        let n = match self.frame {
            FrameIndex::Uninitialized => {
                self.frame = FrameIndex::Frame(0);
                return Ok(());
            }
            FrameIndex::Frame(n) => n,
        };

        self.last_unwind_address = self.provider.register(ProviderRegister::IP)?;
        let step = self.provider.step();
        self.frame = FrameIndex::Frame(n + 1);
        match step? {
            Step::More => {
                self.last_valid_frame = self.provider.register(ProviderRegister::IP)?;
                if let Ok(sp) = self.provider.register(ProviderRegister::SP) {
                    self.watermark = self.watermark.max(sp);
                }
                Ok(())
            }
            Step::Done => {
                let pc = self.provider.register(ProviderRegister::IP)?;
                if pc == self.last_unwind_address {
                    self.try_scan()
                } else {
                    self.last_valid_frame = pc;
                    self.end_of_stack = true;
                    Ok(())
                }
            }
        }
    }

    fn try_scan(&mut self) -> Result<()> {
        let search_words = match self.config.scan {
            ScanFallback::Enabled { search_words } => search_words,
            ScanFallback::Disabled => 0,
        };
        debug_log!(
            "provider stuck at {:#x}, scanning from {:#x}",
            self.last_unwind_address,
            self.watermark
        );
        let hit = match scan_for_frame(&self.memory, self.images, self.watermark, search_words) {
            Ok(hit) => hit,
            Err(Error::NoMoreFrames) => {
                self.end_of_stack = true;
                return Err(Error::NoMoreFrames);
            }
            Err(err) => return Err(err),
        };
        self.last_valid_frame = hit.ip;
        self.watermark = hit.stack_pointer;

        let mut thread = self.context.thread;
        A::set_pc(&mut thread, hit.ip);
        self.provider.init(&thread)?;
        Ok(())
    }

    /// Read a register of the current frame.
    ///
    /// Frame 0 exposes every register. Later frames only know their program
    /// counter; everything else is [Error::UnsupportedRegister].
    pub fn register(&self, register: A::Register) -> Result<u64> {
        if self.frame == FrameIndex::Frame(0) {
            let info = A::info(register);
            return match info.provider {
                Some(provider_register) => Ok(self.provider.register(provider_register)?),
                None => Ok(info.read(&self.context.thread)),
            };
        }
        if register == A::PROGRAM_COUNTER {
            Ok(self.last_valid_frame)
        } else {
            Err(Error::UnsupportedRegister)
        }
    }

    /// Floating point registers are never available.
    #[inline]
    pub fn float_register(&self, _index: usize) -> Result<f64> {
        Err(Error::UnsupportedRegister)
    }

    #[inline]
    pub fn register_name(register: A::Register) -> &'static str {
        crate::registers::register_name::<A>(register)
    }

    #[inline]
    pub fn frame(&self) -> FrameIndex {
        self.frame
    }

    #[inline]
    pub fn is_end_of_stack(&self) -> bool {
        self.end_of_stack
    }

    /// Program counter of the most recent frame, however it was found.
    #[inline]
    pub fn last_valid_frame(&self) -> u64 {
        self.last_valid_frame
    }

    /// Where the next stack scan starts.
    #[inline]
    pub fn stack_watermark(&self) -> u64 {
        self.watermark
    }

    #[inline]
    pub fn context(&self) -> &ThreadContext<A> {
        &self.context
    }
}
