//! 原始内存块
//!
//! 所有 buffer 的存储都来自这里：通过 `System` 分配未初始化内存，
//! 由本模块清零，`Drop` 时归还。
//!
//! # 实时安全
//!
//! 分配/释放只发生在配置路径（allocate / deallocate / adopt）。
//! 读写路径只通过 `as_ptr()` 访问已存在的内存，绝不分配。
//!
//! 可选 `lock_memory()` 调用 mlock 将块锁定在物理内存中，
//! 防止实时线程访问时发生 page fault。

use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

/// 分配对齐（与平台 malloc 默认对齐一致）
pub const BLOCK_ALIGN: usize = 16;

/// 独占所有权的清零内存块
///
/// - 不可复制；move 转移所有权
/// - 长度为 0 的块不分配内存
pub struct Block {
    ptr: NonNull<u8>,
    len: usize,
    memory_locked: AtomicBool,
}

// Block 与 Box<[u8]> 的线程语义相同
unsafe impl Send for Block {}
unsafe impl Sync for Block {}

impl Block {
    /// 分配 `len` 字节并清零
    pub fn zeroed(len: usize) -> Result<Self> {
        if len == 0 {
            return Ok(Self::empty());
        }

        let layout = Layout::from_size_align(len, BLOCK_ALIGN).map_err(|_| Error::Overflow)?;

        // 先取未初始化内存，再由我们自己清零
        let raw = unsafe { System.alloc(layout) };
        let ptr = NonNull::new(raw).ok_or(Error::OutOfMemory { bytes: len })?;
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, len) };

        Ok(Self {
            ptr,
            len,
            memory_locked: AtomicBool::new(false),
        })
    }

    /// 空块
    pub fn empty() -> Self {
        Self {
            ptr: NonNull::dangling(),
            len: 0,
            memory_locked: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 原始指针
    ///
    /// Ring buffer 在 `&self` 下通过它读写各自独占的区域；
    /// 调用方负责保证不与 `as_slice`/`as_mut_slice` 的引用同时存在。
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// 锁定块内存，防止被换页
    ///
    /// 返回是否成功锁定
    pub fn lock_memory(&self) -> bool {
        if self.memory_locked.load(Ordering::Acquire) {
            return true;
        }
        if self.len == 0 {
            return false;
        }

        if platform::mlock(self.ptr.as_ptr(), self.len) {
            self.memory_locked.store(true, Ordering::Release);
            log::debug!("Block memory locked: {} bytes", self.len);
            true
        } else {
            log::warn!(
                "Failed to lock block memory ({} bytes): {}",
                self.len,
                std::io::Error::last_os_error()
            );
            false
        }
    }

    /// 解锁块内存
    pub fn unlock_memory(&self) {
        if !self.memory_locked.swap(false, Ordering::AcqRel) {
            return;
        }

        platform::munlock(self.ptr.as_ptr(), self.len);
        log::debug!("Block memory unlocked: {} bytes", self.len);
    }

    /// 内存是否已锁定
    pub fn is_memory_locked(&self) -> bool {
        self.memory_locked.load(Ordering::Acquire)
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("len", &self.len)
            .field("memory_locked", &self.is_memory_locked())
            .finish()
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }

        self.unlock_memory();

        // zeroed() 已验证过同一 layout
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.len, BLOCK_ALIGN);
            System.dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

#[cfg(unix)]
mod platform {
    #[inline]
    pub fn mlock(ptr: *mut u8, len: usize) -> bool {
        unsafe { libc::mlock(ptr as *const libc::c_void, len) == 0 }
    }

    #[inline]
    pub fn munlock(ptr: *mut u8, len: usize) {
        unsafe {
            libc::munlock(ptr as *const libc::c_void, len);
        }
    }
}

#[cfg(not(unix))]
mod platform {
    #[inline]
    pub fn mlock(_ptr: *mut u8, _len: usize) -> bool {
        false
    }

    #[inline]
    pub fn munlock(_ptr: *mut u8, _len: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed() {
        let block = Block::zeroed(1024).unwrap();
        assert_eq!(block.len(), 1024);
        assert!(block.as_slice().iter().all(|&b| b == 0));
        assert_eq!(block.as_ptr() as usize % BLOCK_ALIGN, 0);
    }

    #[test]
    fn test_empty() {
        let block = Block::zeroed(0).unwrap();
        assert!(block.is_empty());
        assert!(block.as_slice().is_empty());
        assert!(!block.lock_memory());
    }

    #[test]
    fn test_write_through_slice() {
        let mut block = Block::zeroed(8).unwrap();
        block.as_mut_slice().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(block.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_too_large() {
        // Layout 拒绝超过 isize::MAX 的尺寸
        assert!(Block::zeroed(usize::MAX).is_err());
    }

    #[test]
    fn test_lock_unlock() {
        let block = Block::zeroed(4096).unwrap();
        // mlock 可能因 RLIMIT_MEMLOCK 失败，这里只验证状态一致
        if block.lock_memory() {
            assert!(block.is_memory_locked());
            block.unlock_memory();
        }
        assert!(!block.is_memory_locked());
    }
}
