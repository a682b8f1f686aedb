//! `execve` (§4.D, §4.E): replaces the calling thread's address space with
//! a freshly loaded ELF image in place, rather than spawning a new thread —
//! unlike `create_user_thread`'s first-run ELF load, `exec` runs on a
//! thread that is already executing and must resume directly at the new
//! image's entry point.
//!
//! Grounded in `original_source`'s `sys_execve`, which reuses the calling
//! `task_struct` and only resets its `mm`/`sighand` fields, and in
//! [`crate::task::elf::load_into`], already built for the
//! `create_user_thread` path and reused here unchanged.

use crate::error::{Errno, KResult};
use crate::signal::{Handler, SignalSet};
use crate::task::elf;
use crate::task::table;

/// Load `path` into the address space of the process owning `tid` and
/// redirect that thread's saved registers to the image's entry point and
/// stack. Per §4.E: any handler slot pointing at now-unmapped user code
/// (`Handler::User`) resets to `Handler::Default`, clearing only the
/// pending bits for signals that had one — the blocked mask is untouched.
pub fn do_execve(tid: u32, path: &str) -> KResult<()> {
    let thread = table::lookup_thread(tid).ok_or(Errno::Srch)?;
    let process = thread.lock().process.clone();

    let (layout, cleared) = {
        let mut p = process.lock();
        let layout = elf::load_into(&mut p, path)?;
        let mut cleared = SignalSet::EMPTY;
        for (i, slot) in p.sighand.iter_mut().enumerate() {
            if matches!(slot.handler, Handler::User(_)) {
                cleared.insert((i + 1) as u32);
                slot.handler = Handler::Default;
            }
        }
        (layout, cleared)
    };

    let mut t = thread.lock();
    t.pending = SignalSet(t.pending.0 & !cleared.0);
    t.user_regs.eip = layout.entry;
    t.user_regs.useresp = layout.stack;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::address::PhysAddr;
    use alloc::boxed::Box;
    use crate::memory::vma::Mm;
    use crate::signal::{SigAction, SIGUSR1};
    use crate::task::elf::FileSource;

    extern "C" fn noop_entry() {}

    fn blank_mm() -> Mm {
        Mm::new(PhysAddr::new(0x1000), 0x0804_8000)
    }

    struct StaticImage(&'static [u8]);
    impl FileSource for StaticImage {
        fn read_whole(&self, _path: &str) -> KResult<alloc::vec::Vec<u8>> {
            Ok(self.0.to_vec())
        }
    }

    fn build_minimal_elf(entry: u32, segment_vaddr: u32) -> alloc::vec::Vec<u8> {
        // Mirrors elf::tests::build_minimal_elf; duplicated locally since
        // that helper is private to its own module.
        #[repr(C)]
        #[derive(Default)]
        struct Header {
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
        #[derive(Default)]
        struct Phdr {
            p_type: u32,
            p_offset: u32,
            p_vaddr: u32,
            p_paddr: u32,
            p_filesz: u32,
            p_memsz: u32,
            p_flags: u32,
            p_align: u32,
        }
        let ehsize = core::mem::size_of::<Header>();
        let phsize = core::mem::size_of::<Phdr>();
        let mut header = Header {
            e_type: 2,
            e_entry: entry,
            e_phoff: ehsize as u32,
            e_ehsize: ehsize as u16,
            e_phentsize: phsize as u16,
            e_phnum: 1,
            ..Default::default()
        };
        header.ident[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
        let data = [0x90u8, 0x90, 0xC3];
        let ph = Phdr {
            p_type: 1,
            p_offset: (ehsize + phsize) as u32,
            p_vaddr: segment_vaddr,
            p_filesz: data.len() as u32,
            p_memsz: data.len() as u32,
            p_flags: 0x5,
            ..Default::default()
        };
        let mut bytes = alloc::vec::Vec::new();
        bytes.extend_from_slice(unsafe {
            core::slice::from_raw_parts(&header as *const _ as *const u8, ehsize)
        });
        bytes.extend_from_slice(unsafe {
            core::slice::from_raw_parts(&ph as *const _ as *const u8, phsize)
        });
        bytes.extend_from_slice(&data);
        bytes
    }

    #[test]
    fn do_execve_of_unknown_thread_is_srch() {
        assert_eq!(do_execve(999_999, "/bin/x"), Err(Errno::Srch));
    }

    #[test]
    fn do_execve_resets_user_handlers_but_keeps_blocked_mask() {
        let bytes = build_minimal_elf(0x0804_8000, 0x0804_8000);
        let leaked: &'static [u8] = Box::leak(bytes.into_boxed_slice());
        let source: &'static mut StaticImage = Box::leak(Box::new(StaticImage(leaked)));
        let source: &'static StaticImage = source;
        elf::set_file_source(source);

        let process = table::create_process("exec-test", blank_mm(), None);
        {
            let mut p = process.lock();
            p.sighand[(SIGUSR1 - 1) as usize] = SigAction {
                handler: Handler::User(0x9999),
                mask: SignalSet::EMPTY,
                flags: 0,
            };
        }
        let thread = table::create_kernel_thread(process.clone(), 1, noop_entry);
        let tid = thread.lock().tid;
        thread.lock().blocked = SignalSet::single(crate::signal::SIGTERM);
        thread.lock().pending.insert(SIGUSR1);

        do_execve(tid, "/bin/whatever").unwrap();

        assert_eq!(process.lock().sighand[(SIGUSR1 - 1) as usize].handler, Handler::Default);
        assert!(!thread.lock().pending.contains(SIGUSR1));
        assert!(thread.lock().blocked.contains(crate::signal::SIGTERM));
        assert_eq!(thread.lock().user_regs.eip, 0x0804_8000);
    }
}
