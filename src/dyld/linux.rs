use crate::image::{AsyncImageList, Image};
use smallvec::SmallVec;
use std::slice;

const MAX_OBJECTS_LEN: usize = 128;
const PF_X: u32 = 1;

/// Append the executable segment of every object currently loaded by the
/// dynamic linker, skipping base addresses already present in `list`.
/// Returns how many images were added.
///
/// The dynamic linker has no load notifications: call this again with
/// [loaded_images](super::loaded_images) after `dlopen` so later walks can
/// scan into the new object.
///
/// Not async-signal-safe.
pub fn register_loaded_images(list: &AsyncImageList) -> usize {
    let mut found: SmallVec<[Image; MAX_OBJECTS_LEN]> = SmallVec::new();
    unsafe {
        libc::dl_iterate_phdr(Some(callback), &mut found as *mut _ as *mut libc::c_void);
    }
    let mut added = 0;
    for image in found {
        if !list.contains_base(image.base) {
            list.append(image);
            added += 1;
        }
    }
    added
}

extern "C" fn callback(info: *mut libc::dl_phdr_info, _size: libc::size_t, data: *mut libc::c_void) -> libc::c_int {
    unsafe {
        let data = &mut *(data as *mut SmallVec<[Image; MAX_OBJECTS_LEN]>);
        if (*info).dlpi_phnum == 0 {
            return 0;
        }
        let hdrs = slice::from_raw_parts((*info).dlpi_phdr, (*info).dlpi_phnum as usize);
        for hdr in hdrs {
            if hdr.p_type == libc::PT_LOAD && hdr.p_flags & PF_X != 0 {
                data.push(Image::new((*info).dlpi_addr + hdr.p_vaddr, hdr.p_memsz));
            }
        }
        0
    }
}
