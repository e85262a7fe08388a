//! Lock-free SPSC 字节环形缓冲区
//!
//! 设计目标：
//! - 零锁：生产者和消费者完全无锁操作
//! - 零分配：所有内存在 allocate 时预分配
//! - 缓存友好：读写偏移各自独占一个 cache line
//! - 内存锁定：可选 mlock 防止 page fault
//!
//! 偏移量保存在 `[0, capacity)` 内，保留一个字节区分满与空：
//! 可读 + 可写 == capacity − 1。

use std::sync::atomic::{AtomicUsize, Ordering};

use bytemuck::Pod;
use crossbeam_utils::CachePadded;

use super::round_capacity;
use crate::alloc::Block;
use crate::error::Result;

/// SPSC 字节环形缓冲区
///
/// 通过 `Arc` 在生产者和消费者线程间共享。
/// `read`/`peek`/`advance_read` 只能由消费者调用，
/// `write`/`advance_write` 只能由生产者调用。
#[derive(Debug, Default)]
pub struct ByteRingBuffer {
    storage: Block,
    capacity: usize,
    mask: usize,

    write_pos: CachePadded<AtomicUsize>,
    read_pos: CachePadded<AtomicUsize>,
}

impl ByteRingBuffer {
    /// 创建空的 ring（容量 0，读写均返回 0）
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建并分配（容量向上取整到 2 的幂）
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut ring = Self::new();
        ring.allocate(capacity)?;
        Ok(ring)
    }

    /// 分配存储，丢弃旧内容
    pub fn allocate(&mut self, capacity: usize) -> Result<()> {
        let capacity = round_capacity(capacity)?;
        self.storage = Block::zeroed(capacity)?;
        self.capacity = capacity;
        self.mask = capacity - 1;
        self.reset();

        log::debug!("Byte ring allocated: {} bytes", capacity);
        Ok(())
    }

    /// 释放存储
    pub fn deallocate(&mut self) {
        if self.capacity == 0 {
            return;
        }

        self.storage = Block::empty();
        self.capacity = 0;
        self.mask = 0;
        self.reset();
        log::debug!("Byte ring deallocated");
    }

    /// 清空（两端偏移归零）
    pub fn reset(&mut self) {
        *self.write_pos.get_mut() = 0;
        *self.read_pos.get_mut() = 0;
    }

    /// 锁定存储内存，防止被换页
    pub fn lock_memory(&self) -> bool {
        self.storage.lock_memory()
    }

    pub fn is_memory_locked(&self) -> bool {
        self.storage.is_memory_locked()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 当前可读字节数
    #[inline]
    pub fn bytes_available_to_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        self.readable(write, read)
    }

    /// 当前可写字节数
    #[inline]
    pub fn bytes_available_to_write(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        self.writable(write, read)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes_available_to_read() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.bytes_available_to_write() == 0
    }

    // ===== 消费者 =====

    /// 读取到 `dst`，返回读取的字节数
    ///
    /// `allow_partial` 为 false 时，不足 `dst.len()` 则不读取并返回 0
    #[inline]
    pub fn read(&self, dst: &mut [u8], allow_partial: bool) -> usize {
        let read = self.read_pos.load(Ordering::Acquire);
        let count = self.copy_out(read, dst, allow_partial);
        if count > 0 {
            self.read_pos
                .store((read + count) & self.mask, Ordering::Release);
        }
        count
    }

    /// 同 `read`，但不移动读偏移
    #[inline]
    pub fn peek(&self, dst: &mut [u8], allow_partial: bool) -> usize {
        let read = self.read_pos.load(Ordering::Acquire);
        self.copy_out(read, dst, allow_partial)
    }

    /// 读偏移前移 `count` 字节（不超过可读字节数）
    #[inline]
    pub fn advance_read(&self, count: usize) -> usize {
        let read = self.read_pos.load(Ordering::Acquire);
        let write = self.write_pos.load(Ordering::Acquire);
        let count = count.min(self.readable(write, read));
        self.read_pos
            .store((read + count) & self.mask, Ordering::Release);
        count
    }

    /// 可读数据所在的一到两段连续区域
    ///
    /// 第二段只在数据跨越末尾时非空。
    ///
    /// # Safety
    ///
    /// 只能由消费者调用，返回的切片必须在下一次 `read`/`advance_read`
    /// 之前丢弃；之后生产者可能覆盖这些字节。
    pub unsafe fn read_vector(&self) -> (&[u8], &[u8]) {
        let read = self.read_pos.load(Ordering::Acquire);
        let write = self.write_pos.load(Ordering::Acquire);
        let count = self.readable(write, read);
        let first = count.min(self.capacity - read);

        let base = self.storage.as_ptr();
        (
            std::slice::from_raw_parts(base.add(read), first),
            std::slice::from_raw_parts(base, count - first),
        )
    }

    /// 读取一个完整的 `T`，不足则返回 None
    pub fn read_value<T: Pod>(&self) -> Option<T> {
        let mut value = T::zeroed();
        let size = std::mem::size_of::<T>();
        (self.read(bytemuck::bytes_of_mut(&mut value), false) == size).then_some(value)
    }

    /// 同 `read_value`，但不移动读偏移
    pub fn peek_value<T: Pod>(&self) -> Option<T> {
        let mut value = T::zeroed();
        let size = std::mem::size_of::<T>();
        (self.peek(bytemuck::bytes_of_mut(&mut value), false) == size).then_some(value)
    }

    // ===== 生产者 =====

    /// 写入 `src`，返回写入的字节数
    ///
    /// `allow_partial` 为 false 时，空间不足 `src.len()` 则不写入并返回 0
    #[inline]
    pub fn write(&self, src: &[u8], allow_partial: bool) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        let space = self.writable(write, read);

        if space == 0 || src.is_empty() || (space < src.len() && !allow_partial) {
            return 0;
        }

        let count = space.min(src.len());
        let first = count.min(self.capacity - write);

        // SAFETY: [write, write + count) 是生产者独占的可写区间
        unsafe {
            let base = self.storage.as_ptr();
            std::ptr::copy_nonoverlapping(src.as_ptr(), base.add(write), first);
            std::ptr::copy_nonoverlapping(src.as_ptr().add(first), base, count - first);
        }

        self.write_pos
            .store((write + count) & self.mask, Ordering::Release);
        count
    }

    /// 写偏移前移 `count` 字节（不超过可写字节数）
    #[inline]
    pub fn advance_write(&self, count: usize) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        let count = count.min(self.writable(write, read));
        self.write_pos
            .store((write + count) & self.mask, Ordering::Release);
        count
    }

    /// 可写空间所在的一到两段连续区域
    ///
    /// # Safety
    ///
    /// 只能由生产者调用，返回的切片必须在下一次 `write`/`advance_write`
    /// 之前丢弃；之后消费者可能读取这些字节。
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn write_vector(&self) -> (&mut [u8], &mut [u8]) {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        let count = self.writable(write, read);
        let first = count.min(self.capacity - write);

        let base = self.storage.as_ptr();
        (
            std::slice::from_raw_parts_mut(base.add(write), first),
            std::slice::from_raw_parts_mut(base, count - first),
        )
    }

    /// 写入一个完整的 `T`，空间不足则返回 false
    pub fn write_value<T: Pod>(&self, value: &T) -> bool {
        let bytes = bytemuck::bytes_of(value);
        self.write(bytes, false) == bytes.len()
    }

    // ===== 内部 =====

    #[inline]
    fn readable(&self, write: usize, read: usize) -> usize {
        write.wrapping_sub(read) & self.mask
    }

    #[inline]
    fn writable(&self, write: usize, read: usize) -> usize {
        self.capacity.saturating_sub(1) - self.readable(write, read)
    }

    fn copy_out(&self, read: usize, dst: &mut [u8], allow_partial: bool) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let available = self.readable(write, read);

        if available == 0 || dst.is_empty() || (available < dst.len() && !allow_partial) {
            return 0;
        }

        let count = available.min(dst.len());
        let first = count.min(self.capacity - read);

        // SAFETY: [read, read + count) 是已发布、消费者独占的可读区间
        unsafe {
            let base = self.storage.as_ptr();
            std::ptr::copy_nonoverlapping(base.add(read), dst.as_mut_ptr(), first);
            std::ptr::copy_nonoverlapping(base, dst.as_mut_ptr().add(first), count - first);
        }
        count
    }
}
