use crate::context::{StateFlavor, ThreadContext, ThreadStateProvider};
use crate::registers::{Arch, NativeArch};
use crate::{Error, Result};
use mach2::kern_return::KERN_SUCCESS;
use mach2::mach_types::thread_act_t;
use mach2::message::mach_msg_type_number_t;
use mach2::thread_act::thread_get_state;
use std::mem::size_of;

/// Darwin's `__darwin_mcontext64`: the three states back to back.
#[repr(C)]
struct MachineContext<A: Arch> {
    exception: A::ExceptionState,
    thread: A::ThreadState,
    float: A::FloatState,
}

impl ThreadContext<NativeArch> {
    /// Adopt the `ucontext_t` the kernel hands to an `SA_SIGINFO` handler.
    ///
    /// # Safety
    ///
    /// `ucontext` must be null or point to a valid `ucontext_t`.
    pub unsafe fn from_ucontext(ucontext: *const libc::c_void) -> Result<Self> {
        let ucontext = ucontext as *const libc::ucontext_t;
        if ucontext.is_null() {
            return Err(Error::InvalidUcontext);
        }
        let mcontext = (*ucontext).uc_mcontext as *const MachineContext<NativeArch>;
        if mcontext.is_null() {
            return Err(Error::InvalidUcontext);
        }
        let mut context = Self::new((*mcontext).thread);
        context.float = (*mcontext).float;
        context.exception = (*mcontext).exception;
        context.signal_mask = (*ucontext).uc_sigmask;
        Ok(context)
    }
}

/// Reads thread state of (suspended) threads of this task through
/// `thread_get_state`.
#[derive(Debug, Default, Copy, Clone)]
pub struct MachThreadStates;

impl ThreadStateProvider<NativeArch> for MachThreadStates {
    type Thread = thread_act_t;

    fn thread_state(&self, thread: thread_act_t, flavor: StateFlavor, dst: &mut [u8]) -> std::result::Result<usize, i32> {
        let flavor = match flavor {
            StateFlavor::General => NativeArch::MACH_FLAVORS[0],
            StateFlavor::Float => NativeArch::MACH_FLAVORS[1],
            StateFlavor::Exception => NativeArch::MACH_FLAVORS[2],
        };
        // Counted in `natural_t` units.
        let mut count = (dst.len() / size_of::<u32>()) as mach_msg_type_number_t;
        let status = unsafe { thread_get_state(thread, flavor as _, dst.as_mut_ptr() as _, &mut count) };
        if status != KERN_SUCCESS {
            return Err(status);
        }
        Ok(count as usize * size_of::<u32>())
    }
}
