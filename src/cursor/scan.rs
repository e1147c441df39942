use crate::image::{looks_valid, ImageList};
use crate::utils::{MemoryReader, WORD_SIZE};
use crate::{Error, Result};

/// Number of stack words searched for a return address when the unwind
/// provider loses track.
pub const DEFAULT_SEARCH_WORDS: u32 = 500;

/// A plausible return address found on the stack.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScanHit {
    /// The word that looked like a return address.
    pub ip: u64,
    /// One word past the slot `ip` was read from.
    pub stack_pointer: u64,
}

/// Search `search_words` stack words upwards from `start` for the first one
/// pointing into a loaded image.
///
/// Running out of budget or hitting unreadable memory both mean the stack
/// is exhausted and yield [Error::NoMoreFrames].
pub fn scan_for_frame<M, L>(memory: &M, images: &L, start: u64, search_words: u32) -> Result<ScanHit>
where
    M: MemoryReader + ?Sized,
    L: ImageList + ?Sized,
{
    for n in 0..u64::from(search_words) {
        let location = start.checked_add(n * WORD_SIZE).ok_or(Error::BadFrame)?;
        let word = match memory.read_word(location) {
            Ok(word) => word,
            Err(_fault) => {
                debug_log!("stack scan stopped at unreadable {:#x}", _fault.address);
                return Err(Error::NoMoreFrames);
            }
        };
        if looks_valid(images, word) {
            let stack_pointer = location.checked_add(WORD_SIZE).ok_or(Error::BadFrame)?;
            debug_log!("stack scan found {:#x} at {:#x}", word, location);
            return Ok(ScanHit { ip: word, stack_pointer });
        }
    }
    Err(Error::NoMoreFrames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Image, StaticImages};
    use crate::utils::SliceMemory;
    use byteorder::{ByteOrder, NativeEndian};

    const STACK: u64 = 0x7ffe_0000_0000;
    const TEXT: Image = Image {
        base: 0x1_0000_0000,
        text_size: 0x1000,
    };

    fn stack(words: &[u64]) -> Vec<u8> {
        let mut bytes = vec![0u8; words.len() * 8];
        for (n, word) in words.iter().enumerate() {
            NativeEndian::write_u64(&mut bytes[n * 8..], *word);
        }
        bytes
    }

    #[test]
    fn test_no_hit_is_end_of_stack() {
        // Small values, pointers outside the image, and a high non-image word.
        let words: Vec<u64> = (0..DEFAULT_SEARCH_WORDS as u64)
            .map(|n| match n % 3 {
                0 => n,
                1 => STACK + n * 8,
                _ => 0x2_0000_0000 + n,
            })
            .collect();
        let bytes = stack(&words);
        let memory = SliceMemory::new(STACK, &bytes);
        let images = [TEXT];
        let images = StaticImages::new(&images);
        for window in [0, 1, 7, 250, DEFAULT_SEARCH_WORDS] {
            assert_eq!(scan_for_frame(&memory, &images, STACK, window), Err(Error::NoMoreFrames));
        }
    }

    #[test]
    fn test_first_hit_wins() {
        let images = [TEXT];
        let images = StaticImages::new(&images);
        for k in [0usize, 1, 42, 498] {
            let mut words = vec![0x10u64; 500];
            words[k] = TEXT.base + 0x10;
            words[k + 1] = TEXT.base + 0x20;
            let bytes = stack(&words);
            let memory = SliceMemory::new(STACK, &bytes);
            let hit = scan_for_frame(&memory, &images, STACK, DEFAULT_SEARCH_WORDS).unwrap();
            assert_eq!(hit.ip, TEXT.base + 0x10);
            assert_eq!(hit.stack_pointer, STACK + (k as u64 + 1) * 8);
        }
    }

    #[test]
    fn test_budget_is_respected() {
        let images = [TEXT];
        let images = StaticImages::new(&images);
        let mut words = vec![0u64; 10];
        words[5] = TEXT.base;
        let bytes = stack(&words);
        let memory = SliceMemory::new(STACK, &bytes);
        assert_eq!(scan_for_frame(&memory, &images, STACK, 5), Err(Error::NoMoreFrames));
        assert!(scan_for_frame(&memory, &images, STACK, 6).is_ok());
    }

    #[test]
    fn test_read_fault_is_end_of_stack() {
        let images = [TEXT];
        let images = StaticImages::new(&images);
        let bytes = stack(&[0, 0]);
        let memory = SliceMemory::new(STACK, &bytes);
        assert_eq!(scan_for_frame(&memory, &images, STACK, 100), Err(Error::NoMoreFrames));
        assert_eq!(scan_for_frame(&memory, &images, u64::MAX - 7, 3), Err(Error::NoMoreFrames));
    }

    #[test]
    fn test_address_overflow() {
        struct Zeroes;
        impl MemoryReader for Zeroes {
            fn read(&self, _address: u64, dst: &mut [u8]) -> std::result::Result<(), crate::utils::MemoryFault> {
                dst.fill(0);
                Ok(())
            }
        }
        let images = StaticImages::new(&[]);
        assert_eq!(scan_for_frame(&Zeroes, &images, u64::MAX - 15, 4), Err(Error::BadFrame));
    }
}
