//! Executable memory for generated kernels.
//!
//! Pages are mapped read-write, filled, then flipped to read-execute; the
//! mapping is torn down when the owning cache entry drops.

use crate::error::{EngineError, Result};

/// A finalized, executable code buffer
#[derive(Debug)]
pub struct ExecBuf {
    ptr: *mut u8,
    len: usize,
}

// The buffer is immutable once mapped read-execute
unsafe impl Send for ExecBuf {}
unsafe impl Sync for ExecBuf {}

impl ExecBuf {
    /// Copy `code` into a fresh executable mapping
    #[cfg(unix)]
    pub fn new(code: &[u8]) -> Result<ExecBuf> {
        if code.is_empty() {
            return Err(EngineError::CodegenError("empty code buffer".to_string()));
        }
        let page = page_size();
        let len = code.len().div_ceil(page) * page;
        unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(EngineError::CodegenError(
                    "mmap of code buffer failed".to_string(),
                ));
            }
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr as *mut u8, code.len());
            if libc::mprotect(ptr, len, libc::PROT_READ | libc::PROT_EXEC) != 0 {
                libc::munmap(ptr, len);
                return Err(EngineError::CodegenError(
                    "mprotect of code buffer failed".to_string(),
                ));
            }
            Ok(ExecBuf {
                ptr: ptr as *mut u8,
                len,
            })
        }
    }

    #[cfg(not(unix))]
    pub fn new(_code: &[u8]) -> Result<ExecBuf> {
        Err(EngineError::CodegenError(
            "executable memory is unsupported on this platform".to_string(),
        ))
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }
}

impl Drop for ExecBuf {
    fn drop(&mut self) {
        #[cfg(unix)]
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

#[cfg(unix)]
fn page_size() -> usize {
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz <= 0 { 4096 } else { sz as usize }
}

#[cfg(all(test, unix, target_arch = "x86_64"))]
mod tests {
    use super::*;

    #[test]
    fn test_executes_trivial_code() {
        // mov eax, 42; ret
        let code = [0xb8, 0x2a, 0x00, 0x00, 0x00, 0xc3];
        let buf = ExecBuf::new(&code).unwrap();
        let f: extern "sysv64" fn() -> i32 = unsafe { std::mem::transmute(buf.as_ptr()) };
        assert_eq!(f(), 42);
    }

    #[test]
    fn test_empty_code_rejected() {
        assert!(ExecBuf::new(&[]).is_err());
    }
}
