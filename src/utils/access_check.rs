use crate::utils::{MemoryFault, MemoryReader};
use std::io;
use std::mem::MaybeUninit;

/// Largest chunk moved through the pipe at once; below `PIPE_BUF`, so
/// writes are atomic.
const CHUNK_SIZE: usize = 512;

/// Reads arbitrary addresses of the current process without risking a
/// `SIGSEGV`.
///
/// The kernel is asked to copy the memory into a pipe with `write(2)`. If
/// the address is not mapped the call fails with `EFAULT` instead of
/// trapping, and the copied bytes are read straight back out. `pipe`,
/// `read` and `write` are all async-signal-safe, so a `PipeReader` may be
/// created and used inside a signal handler.
///
/// A reader must not be shared between threads walking at the same time.
#[derive(Debug)]
pub struct PipeReader {
    fds: [libc::c_int; 2],
}

impl PipeReader {
    pub fn new() -> io::Result<Self> {
        unsafe {
            let mut fds = MaybeUninit::<[libc::c_int; 2]>::uninit();
            if create_pipe(fds.as_mut_ptr() as *mut libc::c_int) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { fds: fds.assume_init() })
        }
    }

    /// Check whether the word at `address` is readable.
    #[inline]
    pub fn can_access(&self, address: u64) -> bool {
        self.read_word(address).is_ok()
    }

    fn drain(&self) -> bool {
        let mut buffer = [0u8; CHUNK_SIZE];
        loop {
            let size = unsafe { libc::read(self.fds[0], buffer.as_mut_ptr() as _, buffer.len() as _) };
            if size > 0 {
                continue;
            }
            if size == 0 {
                return true;
            }
            match errno() {
                libc::EINTR => continue,
                libc::EAGAIN => return true,
                _ => return false,
            }
        }
    }

    fn copy_chunk(&self, address: u64, dst: &mut [u8]) -> bool {
        let written = loop {
            let size = unsafe { libc::write(self.fds[1], address as usize as *const libc::c_void, dst.len() as _) };
            if size == -1 {
                match errno() {
                    libc::EINTR => continue,
                    _ => return false,
                }
            }
            break size as usize;
        };
        let mut filled = 0;
        while filled < written {
            let size = unsafe {
                libc::read(
                    self.fds[0],
                    dst[filled..].as_mut_ptr() as _,
                    (written - filled) as _,
                )
            };
            if size == -1 {
                match errno() {
                    libc::EINTR => continue,
                    _ => return false,
                }
            }
            if size == 0 {
                return false;
            }
            filled += size as usize;
        }
        written == dst.len()
    }
}

impl MemoryReader for PipeReader {
    fn read(&self, address: u64, dst: &mut [u8]) -> Result<(), MemoryFault> {
        // Leftovers of an earlier partial copy would shift every later read.
        if !self.drain() {
            return Err(MemoryFault { address });
        }
        let mut offset = 0;
        for chunk in dst.chunks_mut(CHUNK_SIZE) {
            let at = address.checked_add(offset).ok_or(MemoryFault { address })?;
            if !self.copy_chunk(at, chunk) {
                return Err(MemoryFault { address: at });
            }
            offset += chunk.len() as u64;
        }
        Ok(())
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fds[0]);
            libc::close(self.fds[1]);
        }
    }
}

#[inline]
#[cfg(target_os = "linux")]
unsafe fn create_pipe(fds: *mut libc::c_int) -> libc::c_int {
    libc::pipe2(fds, libc::O_CLOEXEC | libc::O_NONBLOCK)
}

#[cfg(target_os = "macos")]
unsafe fn create_pipe(fds: *mut libc::c_int) -> libc::c_int {
    let res = libc::pipe(fds);
    if res != 0 {
        return res;
    }
    let fds = fds as *mut [libc::c_int; 2];
    for n in 0..2 {
        let mut flags = libc::fcntl((*fds)[n], libc::F_GETFD);
        flags |= libc::FD_CLOEXEC;
        if libc::fcntl((*fds)[n], libc::F_SETFD, flags) != 0 {
            return -1;
        }
        let mut flags = libc::fcntl((*fds)[n], libc::F_GETFL);
        flags |= libc::O_NONBLOCK;
        if libc::fcntl((*fds)[n], libc::F_SETFL, flags) != 0 {
            return -1;
        }
    }
    0
}

#[inline]
#[cfg(target_os = "linux")]
fn errno() -> libc::c_int {
    unsafe { *libc::__errno_location() }
}

#[inline]
#[cfg(target_os = "macos")]
fn errno() -> libc::c_int {
    unsafe { *libc::__error() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_access() {
        let reader = PipeReader::new().unwrap();
        let v1 = 1;
        let v2 = Box::new(1);
        assert!(reader.can_access(&v1 as *const i32 as u64));
        assert!(reader.can_access(v2.as_ref() as *const i32 as u64));
        assert!(!reader.can_access(0));
        assert!(!reader.can_access(u64::MAX - 16));
    }

    #[test]
    fn test_read_round_trips_values() {
        let reader = PipeReader::new().unwrap();
        let value = 0x0123_4567_89ab_cdefu64;
        assert_eq!(reader.read_word(&value as *const u64 as u64), Ok(value));

        let bytes: Vec<u8> = (0..2000).map(|n| n as u8).collect();
        let mut copy = vec![0u8; bytes.len()];
        reader.read(bytes.as_ptr() as u64, &mut copy).unwrap();
        assert_eq!(bytes, copy);
    }

    #[test]
    fn test_fault_then_read() {
        let reader = PipeReader::new().unwrap();
        assert_eq!(reader.read_word(8), Err(MemoryFault { address: 8 }));
        let value = 42u64;
        assert_eq!(reader.read_word(&value as *const u64 as u64), Ok(42));
    }
}
