//! 平面（每声道一个 plane）样本存储
//!
//! `AudioRingBuffer` 与 `TimestampedRingBuffer` 共用。
//! 一次分配，plane `i` 起始于 `i × capacity × bytes_per_frame`：
//!
//! ```text
//! [ ch0: capacity × bpf ][ ch1: capacity × bpf ] ...
//! ```
//!
//! 所有访问都以 ring 帧位置为单位，超过容量的位置按 mask 回绕。
//! 并发约束由调用方保证：生产者只写可写区间，消费者只读可读区间。

use crate::alloc::Block;
use crate::audio::{BufferList, StreamDescription};
use crate::error::{Error, Result};

use super::round_capacity;

#[derive(Debug, Default)]
pub(crate) struct PlanarStore {
    format: StreamDescription,
    block: Block,
    capacity: usize,
    mask: usize,
}

impl PlanarStore {
    /// 分配可容纳 `requested`（向上取整到 2 的幂）帧的存储，内容清零
    pub fn allocate(format: StreamDescription, requested: usize) -> Result<Self> {
        if format.is_interleaved() {
            return Err(Error::InvalidFormat("interleaved formats are not supported"));
        }
        if format.bytes_per_frame == 0 {
            return Err(Error::InvalidFormat("bytes_per_frame == 0"));
        }
        if format.channel_stream_count() == 0 {
            return Err(Error::InvalidFormat("channels_per_frame == 0"));
        }

        let capacity = round_capacity(requested)?;
        let total = capacity
            .checked_mul(format.bytes_per_frame as usize)
            .and_then(|plane| plane.checked_mul(format.channel_stream_count() as usize))
            .ok_or(Error::Overflow)?;
        let block = Block::zeroed(total)?;

        log::debug!(
            "Planar store allocated: {} ch × {} frames × {} bytes",
            format.channel_stream_count(),
            capacity,
            format.bytes_per_frame
        );

        Ok(Self {
            format,
            block,
            capacity,
            mask: capacity - 1,
        })
    }

    #[inline]
    pub fn format(&self) -> &StreamDescription {
        &self.format
    }

    /// 帧容量
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn mask(&self) -> usize {
        self.mask
    }

    #[inline]
    pub fn block(&self) -> &Block {
        &self.block
    }

    #[inline]
    fn channels(&self) -> usize {
        self.format.channel_stream_count() as usize
    }

    #[inline]
    fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_frame as usize
    }

    #[inline]
    fn plane_bytes(&self) -> usize {
        self.capacity * self.bytes_per_frame()
    }

    /// buffer list 的 stream 数和帧大小是否与本存储一致
    pub fn accepts(&self, list: &BufferList) -> bool {
        list.is_allocated()
            && list.number_buffers() == self.channels()
            && list.format().bytes_per_frame == self.format.bytes_per_frame
    }

    /// 将 `src` 中从 `src_frame` 开始的 `frames` 帧复制到 ring 位置 `ring_frame`
    ///
    /// 每个 plane 的复制量受源 stream 有效字节数限制
    pub fn store(&self, src: &BufferList, src_frame: usize, ring_frame: usize, frames: usize) {
        let bpf = self.bytes_per_frame();
        let offset = src_frame * bpf;

        for channel in 0..self.channels() {
            let Some(bytes) = src.stream(channel) else {
                continue;
            };
            if offset >= bytes.len() {
                continue;
            }

            let len = (frames * bpf).min(bytes.len() - offset).min(self.plane_bytes());
            self.copy_in(channel, ring_frame, &bytes[offset..offset + len]);
        }
    }

    /// 将 ring 位置 `ring_frame` 起的 `frames` 帧复制到 `dst` 的 `dst_frame` 处
    ///
    /// 不修改 `dst` 的帧长度
    pub fn fetch(&self, dst: &mut BufferList, dst_frame: usize, ring_frame: usize, frames: usize) {
        let bpf = self.bytes_per_frame();
        let offset = dst_frame * bpf;

        for channel in 0..self.channels() {
            let Some(bytes) = dst.stream_mut(channel) else {
                continue;
            };
            if offset >= bytes.len() {
                continue;
            }

            let len = (frames * bpf).min(bytes.len() - offset).min(self.plane_bytes());
            self.copy_out(channel, ring_frame, &mut bytes[offset..offset + len]);
        }
    }

    /// 将 ring 位置 `ring_frame` 起的 `frames` 帧清零
    pub fn zero(&self, ring_frame: usize, frames: usize) {
        let bpf = self.bytes_per_frame();
        let plane = self.plane_bytes();
        let len = (frames * bpf).min(plane);
        let start = (ring_frame & self.mask) * bpf;
        let first = len.min(plane - start);

        for channel in 0..self.channels() {
            // SAFETY: start + first <= plane 且 len - first <= start，均在本 plane 内
            unsafe {
                let base = self.block.as_ptr().add(channel * plane);
                std::ptr::write_bytes(base.add(start), 0, first);
                std::ptr::write_bytes(base, 0, len - first);
            }
        }
    }

    /// 将 `dst` 中从 `dst_frame` 开始的 `frames` 帧清零
    pub fn zero_list(&self, dst: &mut BufferList, dst_frame: usize, frames: usize) {
        let bpf = self.bytes_per_frame();
        let offset = dst_frame * bpf;

        for channel in 0..self.channels() {
            if let Some(bytes) = dst.stream_mut(channel) {
                let end = (offset + frames * bpf).min(bytes.len());
                if offset < end {
                    bytes[offset..end].fill(0);
                }
            }
        }
    }

    /// 所有 plane 清零（需要独占访问）
    pub fn clear(&mut self) {
        self.block.as_mut_slice().fill(0);
    }

    fn copy_in(&self, channel: usize, ring_frame: usize, src: &[u8]) {
        let plane = self.plane_bytes();
        let start = (ring_frame & self.mask) * self.bytes_per_frame();
        let first = src.len().min(plane - start);

        // SAFETY: src.len() <= plane；两段都落在 channel 对应的 plane 内，
        // 且位于生产者独占的区间
        unsafe {
            let base = self.block.as_ptr().add(channel * plane);
            std::ptr::copy_nonoverlapping(src.as_ptr(), base.add(start), first);
            std::ptr::copy_nonoverlapping(src.as_ptr().add(first), base, src.len() - first);
        }
    }

    fn copy_out(&self, channel: usize, ring_frame: usize, dst: &mut [u8]) {
        let plane = self.plane_bytes();
        let start = (ring_frame & self.mask) * self.bytes_per_frame();
        let first = dst.len().min(plane - start);

        // SAFETY: 同 copy_in，区间属于消费者
        unsafe {
            let base = self.block.as_ptr().add(channel * plane);
            std::ptr::copy_nonoverlapping(base.add(start), dst.as_mut_ptr(), first);
            std::ptr::copy_nonoverlapping(base, dst.as_mut_ptr().add(first), dst.len() - first);
        }
    }
}
