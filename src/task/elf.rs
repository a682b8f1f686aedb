//! Minimal ELF32 image loader used by `exec` (§4.D, §4.E).
//!
//! The VFS is an out-of-scope external collaborator (§1); this module
//! depends on a `FileSource` trait rather than a concrete filesystem, the
//! way SPEC_FULL.md's ambient stack calls for a `FileBackedMapping`-style
//! seam at the VMA boundary. Ported in shape from `original_source`'s
//! `elf_load`/`struct Elf32_Layout` (entry point + prepared stack), which
//! that codebase treats as out-of-scope (`// TODO ... elf_load`) but which
//! SPEC_FULL.md brings into scope as the mechanism `exec` actually drives.

use crate::error::{Errno, KResult};
use crate::memory::vma::VmaFlags;
use crate::task::process::Process;
use alloc::string::String;
use alloc::vec::Vec;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ET_EXEC: u16 = 2;
const PT_LOAD: u32 = 1;

/// Top of the user stack for a freshly-exec'd image. Fixed per this
/// crate's simplified address-space layout (no ASLR — out of scope, see
/// SPEC_FULL.md's Non-goals on capability/security hardening).
const USER_STACK_TOP: u32 = crate::config::USER_ADDR_MAX - crate::config::PAGE_SIZE;
const USER_STACK_SIZE: u32 = 8 * crate::config::PAGE_SIZE;

/// The handful of facts a loaded image hands back to the ELF entry
/// trampoline (mirrors `original_source`'s `struct Elf32_Layout`).
#[derive(Debug, Clone, Copy)]
pub struct ElfLayout {
    pub entry: u32,
    pub stack: u32,
}

/// External collaborator seam to the VFS (§1): `exec` needs file bytes,
/// not a filesystem.
pub trait FileSource {
    fn read_whole(&self, path: &str) -> KResult<Vec<u8>>;
}

static mut FILE_SOURCE: Option<&'static dyn FileSource> = None;

/// Register the VFS-backed `FileSource` implementation. Called once by
/// the out-of-scope filesystem bring-up.
pub fn set_file_source(source: &'static dyn FileSource) {
    unsafe {
        FILE_SOURCE = Some(source);
    }
}

/// Build a `&str` from a NUL-terminated path pointer placed in a trap
/// frame parameter slot (§4.D's user-thread ELF entry convention).
///
/// # Safety
/// `ptr` must point at a valid NUL-terminated, UTF-8 byte sequence.
pub unsafe fn path_from_raw(ptr: *const u8) -> String {
    let mut len = 0usize;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    let bytes = core::slice::from_raw_parts(ptr, len);
    core::str::from_utf8(bytes).unwrap_or("???").into()
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct Elf32Header {
    ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u32,
    e_phoff: u32,
    e_shoff: u32,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct Elf32ProgramHeader {
    p_type: u32,
    p_offset: u32,
    p_vaddr: u32,
    p_paddr: u32,
    p_filesz: u32,
    p_memsz: u32,
    p_flags: u32,
    p_align: u32,
}

fn read_header(bytes: &[u8]) -> KResult<Elf32Header> {
    if bytes.len() < core::mem::size_of::<Elf32Header>() {
        return Err(Errno::Inval);
    }
    let mut header = Elf32Header::default();
    let header_bytes = unsafe {
        core::slice::from_raw_parts_mut(
            &mut header as *mut _ as *mut u8,
            core::mem::size_of::<Elf32Header>(),
        )
    };
    header_bytes.copy_from_slice(&bytes[..header_bytes.len()]);

    if header.ident[0..4] != ELF_MAGIC || header.e_type != ET_EXEC {
        return Err(Errno::Inval);
    }
    Ok(header)
}

fn program_headers(bytes: &[u8], header: &Elf32Header) -> KResult<Vec<Elf32ProgramHeader>> {
    let phentsize = header.e_phentsize as usize;
    let mut out = Vec::with_capacity(header.e_phnum as usize);
    for i in 0..header.e_phnum as usize {
        let off = header.e_phoff as usize + i * phentsize;
        if off + core::mem::size_of::<Elf32ProgramHeader>() > bytes.len() {
            return Err(Errno::Inval);
        }
        let mut ph = Elf32ProgramHeader::default();
        let ph_bytes = unsafe {
            core::slice::from_raw_parts_mut(
                &mut ph as *mut _ as *mut u8,
                core::mem::size_of::<Elf32ProgramHeader>(),
            )
        };
        ph_bytes.copy_from_slice(&bytes[off..off + ph_bytes.len()]);
        out.push(ph);
    }
    Ok(out)
}

/// Load the ELF image at `path` into `process`'s address space: resets
/// the VMA list to the image's `PT_LOAD` segments plus a fresh user
/// stack, resets `mm.brk`/`mm.end_brk`/`mm.free_area_cache` to the
/// image's data end and the mmap base, per §4.E's `execve` reset list.
pub fn load_into(process: &mut Process, path: &str) -> KResult<ElfLayout> {
    let source = unsafe { FILE_SOURCE }.ok_or(Errno::Inval)?;
    let bytes = source.read_whole(path)?;
    let header = read_header(&bytes)?;
    let phdrs = program_headers(&bytes, &header)?;

    let mm = &mut process.mm;
    mm.vmas.clear();
    let mut image_end = 0u32;

    for ph in phdrs.iter().filter(|p| p.p_type == PT_LOAD) {
        let start = crate::config::page_align_down(ph.p_vaddr);
        let end = crate::config::page_align_up(ph.p_vaddr + ph.p_memsz);
        let mut flags = VmaFlags::PRIVATE | VmaFlags::READ;
        if ph.p_flags & 0x2 != 0 {
            flags |= VmaFlags::WRITE;
        }
        if ph.p_flags & 0x1 != 0 {
            flags |= VmaFlags::EXEC;
        }

        let mut vaddr = start;
        while vaddr < end {
            let frame = crate::memory::physical::alloc_frame().ok_or(Errno::NoMem)?;
            crate::memory::virtual_mem::map_page(
                mm.pd,
                crate::memory::address::VirtAddr::new(vaddr),
                frame,
                crate::memory::virtual_mem::PTE_PRESENT
                    | crate::memory::virtual_mem::PTE_WRITABLE
                    | crate::memory::virtual_mem::PTE_USER,
            );
            vaddr += crate::config::PAGE_SIZE;
        }

        let file_off = ph.p_offset as usize;
        let file_len = ph.p_filesz as usize;
        if file_off + file_len <= bytes.len() {
            unsafe {
                crate::task::useraccess::copy_to_user(ph.p_vaddr, &bytes[file_off..file_off + file_len]);
            }
        }

        mm.vmas.push(crate::memory::vma::Vma {
            vm_start: start,
            vm_end: end,
            flags,
            file: None,
        });
        image_end = image_end.max(end);
    }
    mm.vmas.sort_by_key(|v| v.vm_start);

    mm.end_brk = image_end;
    mm.brk = image_end;
    mm.free_area_cache = crate::config::MMAP_BASE;

    let stack_start = USER_STACK_TOP - USER_STACK_SIZE;
    let mut vaddr = stack_start;
    while vaddr < USER_STACK_TOP {
        let frame = crate::memory::physical::alloc_frame().ok_or(Errno::NoMem)?;
        crate::memory::virtual_mem::map_page(
            mm.pd,
            crate::memory::address::VirtAddr::new(vaddr),
            frame,
            crate::memory::virtual_mem::PTE_PRESENT
                | crate::memory::virtual_mem::PTE_WRITABLE
                | crate::memory::virtual_mem::PTE_USER,
        );
        vaddr += crate::config::PAGE_SIZE;
    }
    mm.vmas.push(crate::memory::vma::Vma {
        vm_start: stack_start,
        vm_end: USER_STACK_TOP,
        flags: VmaFlags::PRIVATE | VmaFlags::READ | VmaFlags::WRITE,
        file: None,
    });
    mm.vmas.sort_by_key(|v| v.vm_start);

    Ok(ElfLayout {
        entry: header.e_entry,
        stack: USER_STACK_TOP,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_minimal_elf(entry: u32, segment_vaddr: u32, segment_data: &[u8]) -> Vec<u8> {
        let ehsize = core::mem::size_of::<Elf32Header>();
        let phsize = core::mem::size_of::<Elf32ProgramHeader>();
        let phoff = ehsize as u32;
        let data_off = phoff + phsize as u32;

        let mut header = Elf32Header {
            e_type: ET_EXEC,
            e_entry: entry,
            e_phoff: phoff,
            e_ehsize: ehsize as u16,
            e_phentsize: phsize as u16,
            e_phnum: 1,
            ..Default::default()
        };
        header.ident[0..4].copy_from_slice(&ELF_MAGIC);

        let ph = Elf32ProgramHeader {
            p_type: PT_LOAD,
            p_offset: data_off,
            p_vaddr: segment_vaddr,
            p_filesz: segment_data.len() as u32,
            p_memsz: segment_data.len() as u32,
            p_flags: 0x5, // R+X
            ..Default::default()
        };

        let mut bytes = Vec::new();
        bytes.extend_from_slice(unsafe {
            core::slice::from_raw_parts(&header as *const _ as *const u8, ehsize)
        });
        bytes.extend_from_slice(unsafe {
            core::slice::from_raw_parts(&ph as *const _ as *const u8, phsize)
        });
        bytes.extend_from_slice(segment_data);
        bytes
    }

    #[test]
    fn rejects_non_elf_magic() {
        assert_eq!(read_header(&[0u8; 64]), Err(Errno::Inval));
    }

    #[test]
    fn parses_minimal_image_header_and_segment() {
        let bytes = build_minimal_elf(0x0804_8000, 0x0804_8000, b"\x90\x90\xC3");
        let header = read_header(&bytes).unwrap();
        assert_eq!(header.e_entry, 0x0804_8000);
        let phdrs = program_headers(&bytes, &header).unwrap();
        assert_eq!(phdrs.len(), 1);
        assert_eq!(phdrs[0].p_type, PT_LOAD);
        assert_eq!(phdrs[0].p_vaddr, 0x0804_8000);
    }
}
