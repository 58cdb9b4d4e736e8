//! Executable memory for emitted code.
//!
//! Pages are mapped read-write, filled, then flipped to read-execute; they
//! are unmapped when the owning routine drops its last reference.

#[cfg(unix)]
pub struct ExecutableMemory {
    base: *mut u8,
    len: usize,
}

#[cfg(unix)]
unsafe impl Send for ExecutableMemory {}
#[cfg(unix)]
unsafe impl Sync for ExecutableMemory {}

#[cfg(unix)]
impl ExecutableMemory {
    pub fn new(code: &[u8]) -> Option<ExecutableMemory> {
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let len = code.len().div_ceil(page).max(1) * page;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return None;
        }

        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), base as *mut u8, code.len());
            if libc::mprotect(base, len, libc::PROT_READ | libc::PROT_EXEC) != 0 {
                libc::munmap(base, len);
                return None;
            }
        }

        Some(ExecutableMemory {
            base: base as *mut u8,
            len,
        })
    }

    pub fn entry(&self) -> *const u8 {
        self.base
    }
}

#[cfg(unix)]
impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.len);
        }
    }
}

#[cfg(not(unix))]
pub struct ExecutableMemory;

#[cfg(not(unix))]
impl ExecutableMemory {
    pub fn new(_code: &[u8]) -> Option<ExecutableMemory> {
        None
    }

    pub fn entry(&self) -> *const u8 {
        std::ptr::null()
    }
}
