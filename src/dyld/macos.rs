use crate::image::{AsyncImageList, Image};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

const MAX_OBJECTS_LEN: usize = 512;
const MH_MAGIC_64: u32 = 0xfeed_facf;
const LC_SEGMENT_64: u32 = 0x19;

#[repr(C)]
#[allow(dead_code)]
struct MachHeader64 {
    magic: u32,
    cputype: i32,
    cpusubtype: i32,
    filetype: u32,
    ncmds: u32,
    sizeofcmds: u32,
    flags: u32,
    reserved: u32,
}

#[repr(C)]
struct LoadCommand {
    cmd: u32,
    cmdsize: u32,
}

#[repr(C)]
#[allow(dead_code)]
struct SegmentCommand64 {
    cmd: u32,
    cmdsize: u32,
    segname: [u8; 16],
    vmaddr: u64,
    vmsize: u64,
    fileoff: u64,
    filesize: u64,
    maxprot: i32,
    initprot: i32,
    nsects: u32,
    flags: u32,
}

extern "C" {
    fn _dyld_image_count() -> u32;
    fn _dyld_get_image_header(index: u32) -> *const MachHeader64;
    fn _dyld_get_image_vmaddr_slide(index: u32) -> isize;
    fn _dyld_register_func_for_add_image(func: extern "C" fn(*const MachHeader64, isize));
    fn _dyld_register_func_for_remove_image(func: extern "C" fn(*const MachHeader64, isize));
}

static TRACKING: AtomicBool = AtomicBool::new(false);
static INSTALL_CALLBACKS: Once = Once::new();

/// Keep [loaded_images](super::loaded_images) current as dyld loads and
/// unloads images.
///
/// The callbacks are installed on the first `true` and stay installed:
/// dyld cannot unregister them. While tracking is off new images are
/// ignored, but unloaded images are still removed so the list never points
/// at unmapped text.
///
/// Not async-signal-safe.
pub fn set_image_tracking(enabled: bool) {
    TRACKING.store(enabled, Ordering::SeqCst);
    if enabled {
        // Populate the list before dyld starts calling back.
        let _ = super::loaded_images();
        INSTALL_CALLBACKS.call_once(|| unsafe {
            _dyld_register_func_for_add_image(image_added);
            _dyld_register_func_for_remove_image(image_removed);
        });
    }
}

extern "C" fn image_added(header: *const MachHeader64, slide: isize) {
    if header.is_null() || !TRACKING.load(Ordering::SeqCst) {
        return;
    }
    if let Some(image) = unsafe { text_segment(header, slide) } {
        let list = super::loaded_images();
        if !list.contains_base(image.base) {
            debug_log!("tracking image at {:#x}", image.base);
            list.append(image);
        }
    }
}

extern "C" fn image_removed(header: *const MachHeader64, slide: isize) {
    if header.is_null() {
        return;
    }
    let base = match unsafe { text_segment(header, slide) } {
        Some(image) => image.base,
        None => header as u64,
    };
    if super::loaded_images().remove(base) {
        debug_log!("dropped image at {:#x}", base);
    }
}

/// Append the `__TEXT` segment of every image dyld currently has loaded,
/// skipping base addresses already present in `list`. Returns how many
/// images were added.
///
/// Not async-signal-safe.
pub fn register_loaded_images(list: &AsyncImageList) -> usize {
    let mut found: SmallVec<[Image; MAX_OBJECTS_LEN]> = SmallVec::new();
    unsafe {
        for index in 0.._dyld_image_count() {
            let header = _dyld_get_image_header(index);
            if header.is_null() {
                continue;
            }
            let slide = _dyld_get_image_vmaddr_slide(index);
            if let Some(image) = text_segment(header, slide) {
                found.push(image);
            }
        }
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

/// The image's base is its mach header, which starts the `__TEXT` segment.
unsafe fn text_segment(header: *const MachHeader64, slide: isize) -> Option<Image> {
    if (*header).magic != MH_MAGIC_64 {
        return None;
    }
    let mut cmd = header.add(1) as *const LoadCommand;
    for _ in 0..(*header).ncmds {
        if (*cmd).cmd == LC_SEGMENT_64 {
            let segment = &*(cmd as *const SegmentCommand64);
            if segment.segname.starts_with(b"__TEXT\0") {
                let base = (segment.vmaddr as i64).wrapping_add(slide as i64) as u64;
                return Some(Image::new(base, segment.vmsize));
            }
        }
        cmd = (cmd as *const u8).add((*cmd).cmdsize as usize) as *const LoadCommand;
    }
    None
}
