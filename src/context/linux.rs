use crate::context::ThreadContext;
use crate::{Error, Result};

#[cfg(target_arch = "x86_64")]
impl ThreadContext<crate::registers::X86_64> {
    /// Adopt the `ucontext_t` the kernel hands to an `SA_SIGINFO` handler.
    ///
    /// # Safety
    ///
    /// `ucontext` must be null or point to a valid `ucontext_t`.
    pub unsafe fn from_ucontext(ucontext: *const libc::c_void) -> Result<Self> {
        use crate::registers::{as_bytes_mut, X86ThreadState64};
        use std::ptr;

        let ucontext = ucontext as *const libc::ucontext_t;
        if ucontext.is_null() {
            return Err(Error::InvalidUcontext);
        }
        let mcontext = &(*ucontext).uc_mcontext;
        let reg = |n: libc::c_int| mcontext.gregs[n as usize] as u64;
        let csgsfs = reg(libc::REG_CSGSFS);
        let mut context = Self::new(X86ThreadState64 {
            rax: reg(libc::REG_RAX),
            rbx: reg(libc::REG_RBX),
            rcx: reg(libc::REG_RCX),
            rdx: reg(libc::REG_RDX),
            rdi: reg(libc::REG_RDI),
            rsi: reg(libc::REG_RSI),
            rbp: reg(libc::REG_RBP),
            rsp: reg(libc::REG_RSP),
            r8: reg(libc::REG_R8),
            r9: reg(libc::REG_R9),
            r10: reg(libc::REG_R10),
            r11: reg(libc::REG_R11),
            r12: reg(libc::REG_R12),
            r13: reg(libc::REG_R13),
            r14: reg(libc::REG_R14),
            r15: reg(libc::REG_R15),
            rip: reg(libc::REG_RIP),
            rflags: reg(libc::REG_EFL),
            // cs, gs and fs packed into one word, 16 bits each.
            cs: csgsfs & 0xffff,
            gs: (csgsfs >> 16) & 0xffff,
            fs: (csgsfs >> 32) & 0xffff,
        });
        context.exception.trapno = reg(libc::REG_TRAPNO) as u16;
        context.exception.err = reg(libc::REG_ERR) as u32;
        context.exception.faultvaddr = reg(libc::REG_CR2);

        // The FXSAVE image follows two reserved words in the float state.
        if !mcontext.fpregs.is_null() {
            let dst = &mut as_bytes_mut(&mut context.float)[8..8 + FXSAVE_SIZE];
            ptr::copy_nonoverlapping(mcontext.fpregs as *const u8, dst.as_mut_ptr(), FXSAVE_SIZE);
        }
        context.signal_mask = (*ucontext).uc_sigmask;
        Ok(context)
    }
}

#[cfg(target_arch = "x86_64")]
const FXSAVE_SIZE: usize = 512;

#[cfg(target_arch = "aarch64")]
impl ThreadContext<crate::registers::Arm64> {
    /// Adopt the `ucontext_t` the kernel hands to an `SA_SIGINFO` handler.
    ///
    /// Only the general-purpose state and the fault address are taken over.
    ///
    /// # Safety
    ///
    /// `ucontext` must be null or point to a valid `ucontext_t`.
    pub unsafe fn from_ucontext(ucontext: *const libc::c_void) -> Result<Self> {
        use crate::registers::Arm64ThreadState64;

        let ucontext = ucontext as *const libc::ucontext_t;
        if ucontext.is_null() {
            return Err(Error::InvalidUcontext);
        }
        let mcontext = &(*ucontext).uc_mcontext;
        let mut thread = Arm64ThreadState64::default();
        thread.x.copy_from_slice(&mcontext.regs[..29]);
        thread.fp = mcontext.regs[29];
        thread.lr = mcontext.regs[30];
        thread.sp = mcontext.sp;
        thread.pc = mcontext.pc;
        thread.cpsr = mcontext.pstate as u32;
        let mut context = Self::new(thread);
        context.exception.far = mcontext.fault_address;
        context.signal_mask = (*ucontext).uc_sigmask;
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use crate::context::ThreadContext;
    use crate::registers::NativeArch;
    use crate::Error;
    use std::ptr;

    #[test]
    fn test_null_ucontext() {
        let result = unsafe { ThreadContext::<NativeArch>::from_ucontext(ptr::null()) };
        assert_eq!(result.err(), Some(Error::InvalidUcontext));
    }

    #[test]
    #[cfg(target_arch = "x86_64")]
    fn test_from_ucontext_registers() {
        let mut uc: libc::ucontext_t = unsafe { std::mem::zeroed() };
        uc.uc_mcontext.gregs[libc::REG_RIP as usize] = 0x1_0000_4321;
        uc.uc_mcontext.gregs[libc::REG_RSP as usize] = 0x7ffd_0000;
        uc.uc_mcontext.gregs[libc::REG_R8 as usize] = 8;
        uc.uc_mcontext.gregs[libc::REG_CSGSFS as usize] = 0x0000_002b_0000_0033;
        uc.uc_mcontext.gregs[libc::REG_CR2 as usize] = 0xdead;
        let context = unsafe { ThreadContext::from_ucontext(&uc as *const _ as *const libc::c_void) }.unwrap();
        assert_eq!(context.thread.rip, 0x1_0000_4321);
        assert_eq!(context.thread.rsp, 0x7ffd_0000);
        assert_eq!(context.thread.r8, 8);
        assert_eq!(context.thread.cs, 0x33);
        assert_eq!(context.thread.gs, 0);
        assert_eq!(context.thread.fs, 0x2b);
        assert_eq!(context.exception.faultvaddr, 0xdead);
    }
}
