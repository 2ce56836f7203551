//! Executable memory regions for finished code buffers.
//!
//! A region is allocated read-write, the code bytes are copied in, and the
//! protection is flipped to read-execute before the entry pointer is handed
//! out. The instruction cache is flushed on platforms that need it. Dropping
//! the region unmaps it; any entry pointers derived from it are dead.

use tracing::debug;

#[derive(Debug)]
pub enum ExecError {
    EmptyCode,
    Region(String),
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecError::EmptyCode => write!(f, "cannot create executable region for empty code"),
            ExecError::Region(message) => write!(f, "executable region: {message}"),
        }
    }
}

impl std::error::Error for ExecError {}

pub type ExecResult<T> = Result<T, ExecError>;

pub struct ExecutableMemory {
    ptr: *mut u8,
    len: usize,
}

impl ExecutableMemory {
    pub fn from_code(code: &[u8]) -> ExecResult<Self> {
        if code.is_empty() {
            return Err(ExecError::EmptyCode);
        }
        let len = code.len();
        let ptr = alloc_region(len)?;
        write_code(ptr, code);
        finalize_region(ptr, len)?;
        debug!(len, "finalized executable region");
        Ok(Self { ptr, len })
    }

    pub fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pointer to a recorded offset inside the region, for the
    /// post-generation patch primitives.
    pub fn ptr_at(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset <= self.len, "offset past end of region");
        unsafe { self.ptr.add(offset) }
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        let _ = free_region(self.ptr, self.len);
    }
}

// The region is written once before being made executable; patching after
// that goes through patch::* which re-opens write access where required.
unsafe impl Send for ExecutableMemory {}

fn write_code(ptr: *mut u8, code: &[u8]) {
    #[cfg(target_os = "macos")]
    unsafe {
        let use_write_protect = pthread_jit_write_protect_supported_np() != 0;
        if use_write_protect {
            pthread_jit_write_protect_np(0);
        }
        std::ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len());
        if use_write_protect {
            pthread_jit_write_protect_np(1);
        }
    }

    #[cfg(not(target_os = "macos"))]
    unsafe {
        std::ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len());
    }
}

/// Flush the instruction cache for a patched or freshly written range.
///
/// x86_64 keeps instruction and data caches coherent, so this only has to do
/// real work on Windows (which requires the call regardless) and on ports to
/// architectures with incoherent caches.
pub(crate) fn flush_instruction_cache(ptr: *mut u8, len: usize) {
    #[cfg(target_os = "windows")]
    unsafe {
        use windows_sys::Win32::System::Diagnostics::Debug::FlushInstructionCache;
        use windows_sys::Win32::System::Threading::GetCurrentProcess;

        FlushInstructionCache(GetCurrentProcess(), ptr as *const _, len);
    }

    #[cfg(not(target_os = "windows"))]
    {
        let _ = (ptr, len);
    }
}

#[cfg(target_os = "windows")]
fn alloc_region(len: usize) -> ExecResult<*mut u8> {
    use windows_sys::Win32::System::Memory::{
        MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE, VirtualAlloc,
    };

    let ptr = unsafe {
        VirtualAlloc(
            std::ptr::null_mut(),
            len,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        ) as *mut u8
    };
    if ptr.is_null() {
        return Err(ExecError::Region(format!(
            "VirtualAlloc failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(ptr)
}

#[cfg(target_os = "windows")]
fn finalize_region(ptr: *mut u8, len: usize) -> ExecResult<()> {
    use windows_sys::Win32::System::Memory::{PAGE_EXECUTE_READ, VirtualProtect};

    let mut old_protect = 0u32;
    let ok = unsafe { VirtualProtect(ptr as *mut _, len, PAGE_EXECUTE_READ, &mut old_protect) };
    if ok == 0 {
        return Err(ExecError::Region(format!(
            "VirtualProtect(PAGE_EXECUTE_READ) failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    flush_instruction_cache(ptr, len);
    Ok(())
}

#[cfg(target_os = "windows")]
fn free_region(ptr: *mut u8, _len: usize) -> ExecResult<()> {
    use windows_sys::Win32::System::Memory::{MEM_RELEASE, VirtualFree};

    if ptr.is_null() {
        return Ok(());
    }
    let ok = unsafe { VirtualFree(ptr as *mut _, 0, MEM_RELEASE) };
    if ok == 0 {
        return Err(ExecError::Region(format!(
            "VirtualFree failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "macos")))]
fn alloc_region(len: usize) -> ExecResult<*mut u8> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_ANON | libc::MAP_PRIVATE,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(ExecError::Region(format!(
            "mmap failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(ptr as *mut u8)
}

#[cfg(all(unix, not(target_os = "macos")))]
fn finalize_region(ptr: *mut u8, len: usize) -> ExecResult<()> {
    let rc = unsafe { libc::mprotect(ptr as *mut _, len, libc::PROT_READ | libc::PROT_EXEC) };
    if rc != 0 {
        return Err(ExecError::Region(format!(
            "mprotect(PROT_READ|PROT_EXEC) failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(target_os = "macos")]
fn alloc_region(len: usize) -> ExecResult<*mut u8> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_JIT,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(ExecError::Region(format!(
            "mmap(MAP_JIT) failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(ptr as *mut u8)
}

#[cfg(target_os = "macos")]
fn finalize_region(_ptr: *mut u8, _len: usize) -> ExecResult<()> {
    Ok(())
}

#[cfg(unix)]
fn free_region(ptr: *mut u8, len: usize) -> ExecResult<()> {
    if ptr.is_null() {
        return Ok(());
    }
    let rc = unsafe { libc::munmap(ptr as *mut _, len) };
    if rc != 0 {
        return Err(ExecError::Region(format!(
            "munmap failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(target_os = "macos")]
unsafe extern "C" {
    fn pthread_jit_write_protect_supported_np() -> libc::c_int;
    fn pthread_jit_write_protect_np(enabled: libc::c_int);
}

/// Re-open write access to a finalized region around a patch, then restore
/// execute protection. Only the patch primitives use this.
pub(crate) fn with_writable_region<F: FnOnce()>(ptr: *mut u8, len: usize, patch: F) {
    #[cfg(target_os = "macos")]
    unsafe {
        let use_write_protect = pthread_jit_write_protect_supported_np() != 0;
        if use_write_protect {
            pthread_jit_write_protect_np(0);
        }
        patch();
        if use_write_protect {
            pthread_jit_write_protect_np(1);
        }
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        let page = 4096usize;
        let base = (ptr as usize) & !(page - 1);
        let span = (ptr as usize + len).next_multiple_of(page) - base;
        unsafe {
            libc::mprotect(
                base as *mut _,
                span,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            );
        }
        patch();
        unsafe {
            libc::mprotect(base as *mut _, span, libc::PROT_READ | libc::PROT_EXEC);
        }
    }

    #[cfg(target_os = "windows")]
    {
        use windows_sys::Win32::System::Memory::{
            PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE, VirtualProtect,
        };

        let mut old_protect = 0u32;
        unsafe {
            VirtualProtect(ptr as *mut _, len, PAGE_EXECUTE_READWRITE, &mut old_protect);
        }
        patch();
        let mut old_protect = 0u32;
        unsafe {
            VirtualProtect(ptr as *mut _, len, PAGE_EXECUTE_READ, &mut old_protect);
        }
    }

    #[cfg(not(any(unix, target_os = "windows")))]
    {
        let _ = (ptr, len);
        patch();
    }
}

#[cfg(not(any(unix, target_os = "windows")))]
fn alloc_region(_len: usize) -> ExecResult<*mut u8> {
    Err(ExecError::Region(
        "executable memory allocation not implemented for this platform".to_string(),
    ))
}

#[cfg(not(any(unix, target_os = "windows")))]
fn finalize_region(_ptr: *mut u8, _len: usize) -> ExecResult<()> {
    Ok(())
}

#[cfg(not(any(unix, target_os = "windows")))]
fn free_region(_ptr: *mut u8, _len: usize) -> ExecResult<()> {
    Ok(())
}
