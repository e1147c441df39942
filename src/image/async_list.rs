use crate::image::{Image, ImageList, ReadMarker};
use std::hint::spin_loop;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

/// One node of an [AsyncImageList].
#[derive(Debug)]
pub struct ImageEntry {
    image: Image,
    // Only touched with the write lock held.
    prev: AtomicPtr<ImageEntry>,
    next: AtomicPtr<ImageEntry>,
}

impl AsRef<Image> for ImageEntry {
    #[inline]
    fn as_ref(&self) -> &Image {
        &self.image
    }
}

/// A linked list of images that can be read without locks.
///
/// Writers (`append`, `remove`) serialize on a spin lock, allocate and free,
/// and therefore must never run inside a signal handler. Readers only bump an
/// atomic reader count and follow atomically published `next` pointers,
/// which makes [ImageList::begin_read], [ImageList::next] and
/// [ImageList::end_read] async-signal-safe. An unlinked entry is freed only
/// once no reader holds a marker.
#[derive(Debug)]
pub struct AsyncImageList {
    write_lock: AtomicBool,
    head: AtomicPtr<ImageEntry>,
    tail: AtomicPtr<ImageEntry>,
    readers: AtomicUsize,
}

unsafe impl Send for AsyncImageList {}
unsafe impl Sync for AsyncImageList {}

struct WriteGuard<'a>(&'a AtomicBool);

impl Drop for WriteGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AsyncImageList {
    pub const fn new() -> Self {
        Self {
            write_lock: AtomicBool::new(false),
            head: AtomicPtr::new(ptr::null_mut()),
            tail: AtomicPtr::new(ptr::null_mut()),
            readers: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> WriteGuard<'_> {
        while self
            .write_lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
        WriteGuard(&self.write_lock)
    }

    /// Append `image` to the end of the list.
    pub fn append(&self, image: Image) {
        let entry = Box::into_raw(Box::new(ImageEntry {
            image,
            prev: AtomicPtr::new(ptr::null_mut()),
            next: AtomicPtr::new(ptr::null_mut()),
        }));
        let _guard = self.lock();
        let tail = self.tail.load(Ordering::Relaxed);
        if tail.is_null() {
            self.tail.store(entry, Ordering::Relaxed);
            self.head.store(entry, Ordering::SeqCst);
        } else {
            unsafe {
                (*entry).prev.store(tail, Ordering::Relaxed);
                // Publishing the fully initialized entry makes it visible to readers.
                (*tail).next.store(entry, Ordering::SeqCst);
            }
            self.tail.store(entry, Ordering::Relaxed);
        }
    }

    /// Remove the first image whose base address is `base`.
    ///
    /// Blocks (spinning) until no reader holds a marker. Returns whether an
    /// image was removed.
    pub fn remove(&self, base: u64) -> bool {
        let _guard = self.lock();
        let mut item = self.head.load(Ordering::SeqCst);
        unsafe {
            while !item.is_null() && (*item).image.base != base {
                item = (*item).next.load(Ordering::SeqCst);
            }
            if item.is_null() {
                return false;
            }
            let prev = (*item).prev.load(Ordering::Relaxed);
            let next = (*item).next.load(Ordering::SeqCst);

            // After this store the entry is unreachable for new traversals.
            if prev.is_null() {
                self.head.store(next, Ordering::SeqCst);
            } else {
                (*prev).next.store(next, Ordering::SeqCst);
            }
            if next.is_null() {
                self.tail.store(prev, Ordering::Relaxed);
            } else {
                (*next).prev.store(prev, Ordering::Relaxed);
            }

            while self.readers.load(Ordering::SeqCst) > 0 {
                spin_loop();
            }
            drop(Box::from_raw(item));
        }
        true
    }

    /// Number of images currently in the list.
    pub fn len(&self) -> usize {
        ReadMarker::new(self).images().count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::SeqCst).is_null()
    }

    /// Whether an image with this base address is already present.
    pub fn contains_base(&self, base: u64) -> bool {
        ReadMarker::new(self).images().any(|image| image.base == base)
    }
}

impl Default for AsyncImageList {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageList for AsyncImageList {
    type Entry = ImageEntry;

    #[inline]
    fn begin_read(&self) {
        self.readers.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    fn end_read(&self) {
        self.readers.fetch_sub(1, Ordering::SeqCst);
    }

    #[inline]
    fn next<'a>(&'a self, previous: Option<&'a ImageEntry>) -> Option<&'a ImageEntry> {
        let next = match previous {
            None => self.head.load(Ordering::SeqCst),
            Some(entry) => entry.next.load(Ordering::SeqCst),
        };
        // SAFETY: entries reachable under a read marker are not freed.
        unsafe { next.as_ref() }
    }
}

impl Drop for AsyncImageList {
    fn drop(&mut self) {
        let mut item = *self.head.get_mut();
        while !item.is_null() {
            let entry = unsafe { Box::from_raw(item) };
            item = entry.next.load(Ordering::Relaxed);
        }
    }
}
