use crate::image::AsyncImageList;
use lazy_static::lazy_static;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::*;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub use macos::*;

lazy_static! {
    static ref LOADED_IMAGES: AsyncImageList = {
        let list = AsyncImageList::new();
        register_loaded_images(&list);
        list
    };
}

/// Returns the process-wide list of loaded images, discovering them on the
/// first call.
///
/// The first call allocates and is not async-signal-safe: call it once
/// before installing any signal handler that walks stacks.
#[inline]
pub fn loaded_images() -> &'static AsyncImageList {
    &LOADED_IMAGES
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::looks_valid;

    #[test]
    fn test_loaded_images_cover_own_code() {
        let images = loaded_images();
        assert!(!images.is_empty());
        let pc = test_loaded_images_cover_own_code as usize as u64;
        assert!(looks_valid(images, pc));
    }

    #[test]
    fn test_register_skips_known_images() {
        let list = AsyncImageList::new();
        let first = register_loaded_images(&list);
        assert!(first > 0);
        assert_eq!(register_loaded_images(&list), 0);
        assert_eq!(list.len(), first);
    }
}
