use std::mem::size_of;

mod async_list;
pub use async_list::{AsyncImageList, ImageEntry};

/// The bottom 4GB of a 64-bit address space is never mapped on macOS
/// (`__PAGEZERO`), nor used by position-independent executables on Linux.
const UNMAPPED_LOW_MASK: u64 = 0xFFFF_FFFF_0000_0000;

/// The executable text range of one loaded image: `[base, base + text_size]`.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Image {
    pub base: u64,
    pub text_size: u64,
}

impl Image {
    #[inline]
    pub fn new(base: u64, text_size: u64) -> Self {
        Self { base, text_size }
    }

    /// Determine whether the target address is in this image's text range.
    /// Both ends are inclusive.
    #[inline]
    pub fn contains(&self, target: u64) -> bool {
        self.base <= target && target <= self.base.saturating_add(self.text_size)
    }
}

impl AsRef<Image> for Image {
    #[inline]
    fn as_ref(&self) -> &Image {
        self
    }
}

/// A concurrently readable list of loaded images.
///
/// Readers bracket every traversal with [begin_read] and [end_read]; while
/// that marker is held the list must keep every reachable entry alive and
/// fully initialized. The unwinder only ever reads.
///
/// [begin_read]: ImageList::begin_read
/// [end_read]: ImageList::end_read
pub trait ImageList {
    type Entry: AsRef<Image>;

    fn begin_read(&self);

    fn end_read(&self);

    /// Returns the entry after `previous`, or the first entry for `None`.
    fn next<'a>(&'a self, previous: Option<&'a Self::Entry>) -> Option<&'a Self::Entry>;
}

impl<L: ImageList + ?Sized> ImageList for &L {
    type Entry = L::Entry;

    #[inline]
    fn begin_read(&self) {
        (**self).begin_read()
    }

    #[inline]
    fn end_read(&self) {
        (**self).end_read()
    }

    #[inline]
    fn next<'a>(&'a self, previous: Option<&'a Self::Entry>) -> Option<&'a Self::Entry> {
        (**self).next(previous)
    }
}

/// Holds an image list's reading marker for as long as it lives.
pub struct ReadMarker<'a, L: ImageList + ?Sized> {
    list: &'a L,
}

impl<'a, L: ImageList + ?Sized> ReadMarker<'a, L> {
    #[inline]
    pub fn new(list: &'a L) -> Self {
        list.begin_read();
        Self { list }
    }

    /// Iterate the images reachable while the marker is held.
    #[inline]
    pub fn images(&self) -> Images<'_, L> {
        Images {
            list: self.list,
            current: None,
            started: false,
        }
    }
}

impl<L: ImageList + ?Sized> Drop for ReadMarker<'_, L> {
    #[inline]
    fn drop(&mut self) {
        self.list.end_read();
    }
}

pub struct Images<'a, L: ImageList + ?Sized> {
    list: &'a L,
    current: Option<&'a L::Entry>,
    started: bool,
}

impl<'a, L: ImageList + ?Sized> Iterator for Images<'a, L> {
    type Item = &'a Image;

    #[inline]
    fn next(&mut self) -> Option<&'a Image> {
        if self.started && self.current.is_none() {
            return None;
        }
        self.started = true;
        self.current = self.list.next(self.current);
        self.current.map(|entry| entry.as_ref())
    }
}

/// Decide whether `address` plausibly points into loaded code.
///
/// This is a heuristic: stack garbage that happens to fall inside some text
/// range is accepted too. It never blocks and never allocates.
pub fn looks_valid<L: ImageList + ?Sized>(images: &L, address: u64) -> bool {
    if address & UNMAPPED_LOW_MASK == 0 {
        return false;
    }
    let marker = ReadMarker::new(images);
    let found = marker.images().any(|image| image.contains(address));
    found
}

/// An [ImageList] over a borrowed, immutable slice of images.
///
/// Useful for image sets captured ahead of time, where no writer exists.
#[derive(Debug, Copy, Clone)]
pub struct StaticImages<'a> {
    images: &'a [Image],
}

impl<'a> StaticImages<'a> {
    #[inline]
    pub fn new(images: &'a [Image]) -> Self {
        Self { images }
    }
}

impl ImageList for StaticImages<'_> {
    type Entry = Image;

    #[inline]
    fn begin_read(&self) {}

    #[inline]
    fn end_read(&self) {}

    fn next<'a>(&'a self, previous: Option<&'a Image>) -> Option<&'a Image> {
        let index = match previous {
            None => 0,
            Some(previous) => {
                let offset = (previous as *const Image as usize).wrapping_sub(self.images.as_ptr() as usize);
                offset / size_of::<Image>() + 1
            }
        };
        self.images.get(index)
    }
}
