//! 帧容量固定的 PCM buffer list
//!
//! 与 Core Audio 的 AudioBufferList 形状一致：N 个 stream，
//! 每个 stream 记录 (交织声道数, 有效字节数)，样本数据在同一块内存里按 stream 连续排列：
//!
//! ```text
//! [ stream 0: capacity × bpf ][ stream 1: capacity × bpf ] ...
//! ```
//!
//! 它是 ring buffer 与外部代码之间的传输容器。
//! 所有原地操作（插入、裁剪、补静音）都遵守容量上限，返回实际改变的帧数。

use bytemuck::Pod;

use super::format::StreamDescription;
use crate::alloc::Block;
use crate::error::{Error, Result};

/// 单个 stream 的描述
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AudioBuffer {
    /// 此 stream 中交织的声道数
    pub number_channels: u32,
    /// 有效数据字节数
    pub data_byte_size: u32,
}

/// PCM buffer list
///
/// 独占所有权：构造时分配，drop 时释放，不可复制。
/// `std::mem::take` 可以取走内容并留下空对象。
#[derive(Debug, Default)]
pub struct BufferList {
    format: StreamDescription,
    frame_capacity: usize,
    frame_length: usize,
    buffers: Vec<AudioBuffer>,
    data: Option<Block>,
}

impl BufferList {
    /// 创建空的 buffer list
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建并分配
    pub fn with_capacity(format: StreamDescription, frame_capacity: usize) -> Result<Self> {
        let mut list = Self::new();
        list.allocate(format, frame_capacity)?;
        Ok(list)
    }

    // ===== 存储管理 =====

    /// 分配可容纳 `frame_capacity` 帧的存储，内容清零，长度为 0
    pub fn allocate(&mut self, format: StreamDescription, frame_capacity: usize) -> Result<()> {
        let plane_bytes = Self::plane_bytes(&format, frame_capacity)?;
        let stream_count = format.channel_stream_count() as usize;
        let total = plane_bytes.checked_mul(stream_count).ok_or(Error::Overflow)?;

        let mut buffers = Vec::new();
        buffers
            .try_reserve_exact(stream_count)
            .map_err(|_| Error::OutOfMemory {
                bytes: stream_count * std::mem::size_of::<AudioBuffer>(),
            })?;
        let block = Block::zeroed(total)?;

        buffers.resize(
            stream_count,
            AudioBuffer {
                number_channels: format.interleaved_channel_count(),
                data_byte_size: 0,
            },
        );

        self.format = format;
        self.frame_capacity = frame_capacity;
        self.frame_length = 0;
        self.buffers = buffers;
        self.data = Some(block);

        log::debug!(
            "Buffer list allocated: {} stream(s) × {} frames ({} bytes)",
            stream_count,
            frame_capacity,
            total
        );
        Ok(())
    }

    /// 释放存储，格式、容量、长度归零
    ///
    /// 返回是否有存储被释放
    pub fn deallocate(&mut self) -> bool {
        if self.data.is_none() {
            return false;
        }

        *self = Self::default();
        true
    }

    /// 接管外部提供的存储
    ///
    /// `block` 必须能容纳 `channel_stream_count × frame_capacity × bytes_per_frame` 字节
    pub fn adopt(
        &mut self,
        block: Block,
        format: StreamDescription,
        frame_capacity: usize,
        frame_length: usize,
    ) -> Result<()> {
        if frame_length > frame_capacity {
            return Err(Error::Overflow);
        }

        let plane_bytes = Self::plane_bytes(&format, frame_capacity)?;
        let stream_count = format.channel_stream_count() as usize;
        let required = plane_bytes.checked_mul(stream_count).ok_or(Error::Overflow)?;
        if block.len() < required {
            return Err(Error::InvalidFormat("adopted block is smaller than the format requires"));
        }

        self.format = format;
        self.frame_capacity = frame_capacity;
        self.buffers = vec![
            AudioBuffer {
                number_channels: format.interleaved_channel_count(),
                data_byte_size: 0,
            };
            stream_count
        ];
        self.data = Some(block);
        self.set_frame_length(frame_length);

        log::debug!("Buffer list adopted {} bytes", required);
        Ok(())
    }

    /// 交出存储所有权，自身变为空
    pub fn relinquish(&mut self) -> Option<Block> {
        let block = self.data.take();
        *self = Self::default();
        block
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.data.is_some()
    }

    #[inline]
    pub fn format(&self) -> &StreamDescription {
        &self.format
    }

    #[inline]
    pub fn frame_capacity(&self) -> usize {
        self.frame_capacity
    }

    #[inline]
    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frame_length == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.frame_length == self.frame_capacity
    }

    /// 设置有效帧数，同时更新每个 stream 的有效字节数
    pub fn set_frame_length(&mut self, frame_length: usize) -> bool {
        if self.data.is_none() || frame_length > self.frame_capacity {
            return false;
        }

        self.frame_length = frame_length;
        let byte_size = self.format.frame_count_to_byte_size(frame_length) as u32;
        for buffer in &mut self.buffers {
            buffer.data_byte_size = byte_size;
        }
        true
    }

    /// 等价于 `set_frame_length(frame_capacity)`
    #[inline]
    pub fn reset(&mut self) -> bool {
        self.set_frame_length(self.frame_capacity)
    }

    /// 等价于 `set_frame_length(0)`
    #[inline]
    pub fn clear(&mut self) -> bool {
        self.set_frame_length(0)
    }

    /// 根据各 stream 的有效字节数推断帧长度
    ///
    /// 外部代码直接填充 stream 并调用 `set_data_byte_size` 后使用
    pub fn infer_frame_length(&mut self) -> Result<usize> {
        if self.data.is_none() {
            return Err(Error::InvalidFormat("buffer list is not allocated"));
        }

        let byte_size = self.buffers.first().map_or(0, |b| b.data_byte_size);
        if self.buffers.iter().any(|b| b.data_byte_size != byte_size) {
            return Err(Error::Inconsistent);
        }

        let frame_length = self.format.byte_size_to_frame_count(byte_size as usize)?;
        if frame_length > self.frame_capacity {
            return Err(Error::Overflow);
        }

        self.frame_length = frame_length;
        Ok(frame_length)
    }

    // ===== Stream 访问 =====

    #[inline]
    pub fn number_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// 每个 stream 的描述
    #[inline]
    pub fn buffers(&self) -> &[AudioBuffer] {
        &self.buffers
    }

    /// 每个 stream 的容量字节数
    #[inline]
    pub fn stream_capacity_bytes(&self) -> usize {
        self.format.frame_count_to_byte_size(self.frame_capacity)
    }

    /// 直接设置某个 stream 的有效字节数（不改变 frame_length）
    pub fn set_data_byte_size(&mut self, stream: usize, byte_size: u32) -> bool {
        let capacity = self.stream_capacity_bytes();
        match self.buffers.get_mut(stream) {
            Some(buffer) if byte_size as usize <= capacity => {
                buffer.data_byte_size = byte_size;
                true
            }
            _ => false,
        }
    }

    /// stream 的有效数据
    pub fn stream(&self, stream: usize) -> Option<&[u8]> {
        let valid = self.buffers.get(stream)?.data_byte_size as usize;
        let range = self.plane_range(stream);
        self.data
            .as_ref()
            .map(|block| &block.as_slice()[range.start..range.start + valid])
    }

    /// stream 的完整容量区域（可写）
    pub fn stream_mut(&mut self, stream: usize) -> Option<&mut [u8]> {
        if stream >= self.buffers.len() {
            return None;
        }
        let range = self.plane_range(stream);
        self.data
            .as_mut()
            .map(move |block| &mut block.as_mut_slice()[range])
    }

    /// 从 stream 起始处写入样本，返回写入的样本数（受容量限制）
    ///
    /// 不改变 frame_length
    pub fn write_samples<T: Pod>(&mut self, stream: usize, samples: &[T]) -> usize {
        let Some(dst) = self.stream_mut(stream) else {
            return 0;
        };

        let sample_size = std::mem::size_of::<T>();
        if sample_size == 0 {
            return 0;
        }
        let count = samples.len().min(dst.len() / sample_size);
        let bytes: &[u8] = bytemuck::cast_slice(&samples[..count]);
        dst[..bytes.len()].copy_from_slice(bytes);
        count
    }

    /// stream 的有效数据按 `T` 解释
    pub fn samples<T: Pod>(&self, stream: usize) -> Vec<T> {
        match self.stream(stream) {
            Some(bytes) => bytemuck::pod_collect_to_vec(bytes),
            None => Vec::new(),
        }
    }

    // ===== 原地编辑 =====

    /// 从 `src[read_offset..]` 复制最多 `frame_count` 帧，插入到 `write_offset`
    ///
    /// `write_offset` 之后的原有数据整体后移。返回实际插入的帧数
    pub fn insert_from_buffer(
        &mut self,
        src: &BufferList,
        read_offset: usize,
        frame_count: usize,
        write_offset: usize,
    ) -> usize {
        if self.format != src.format {
            return 0;
        }
        if read_offset > src.frame_length
            || write_offset > self.frame_length
            || frame_count == 0
            || src.frame_length == 0
        {
            return 0;
        }

        let frames_to_insert = (self.frame_capacity - self.frame_length)
            .min(frame_count)
            .min(src.frame_length - read_offset);
        if frames_to_insert == 0 {
            return 0;
        }

        let bpf = self.format.bytes_per_frame as usize;
        let plane_bytes = self.stream_capacity_bytes();
        let src_plane_bytes = src.stream_capacity_bytes();
        let frames_to_move = self.frame_length - write_offset;

        let (Some(dst_block), Some(src_block)) = (self.data.as_mut(), src.data.as_ref()) else {
            return 0;
        };
        let dst = dst_block.as_mut_slice();
        let src_data = src_block.as_slice();

        for stream in 0..self.buffers.len() {
            let base = stream * plane_bytes;

            if frames_to_move > 0 {
                let from = base + write_offset * bpf;
                dst.copy_within(from..from + frames_to_move * bpf, from + frames_to_insert * bpf);
            }

            let to = base + write_offset * bpf;
            let from = stream * src_plane_bytes + read_offset * bpf;
            let len = frames_to_insert * bpf;
            dst[to..to + len].copy_from_slice(&src_data[from..from + len]);
        }

        self.set_frame_length(self.frame_length + frames_to_insert);
        frames_to_insert
    }

    /// 删除从 `offset` 开始的最多 `frame_count` 帧，后续数据前移
    ///
    /// 返回实际删除的帧数
    pub fn trim_at_offset(&mut self, offset: usize, frame_count: usize) -> usize {
        if offset > self.frame_length || frame_count == 0 {
            return 0;
        }

        let frames_to_trim = frame_count.min(self.frame_length - offset);
        if frames_to_trim == 0 {
            return 0;
        }

        let bpf = self.format.bytes_per_frame as usize;
        let plane_bytes = self.stream_capacity_bytes();
        let frames_to_move = self.frame_length - (offset + frames_to_trim);

        if frames_to_move > 0 {
            if let Some(block) = self.data.as_mut() {
                let data = block.as_mut_slice();
                for stream in 0..self.buffers.len() {
                    let base = stream * plane_bytes;
                    let from = base + (offset + frames_to_trim) * bpf;
                    data.copy_within(from..from + frames_to_move * bpf, base + offset * bpf);
                }
            }
        }

        self.set_frame_length(self.frame_length - frames_to_trim);
        frames_to_trim
    }

    /// 在 `offset` 处插入最多 `frame_count` 帧静音，后续数据后移
    ///
    /// 静音即全零字节：只对 signed integer 和 IEEE-754 float 成立。
    /// unsigned integer 的静音是中点值（取决于位深），因此拒绝并返回 0。
    pub fn insert_silence(&mut self, offset: usize, frame_count: usize) -> usize {
        if !(self.format.is_float() || self.format.is_signed_integer()) {
            return 0;
        }
        if offset > self.frame_length || frame_count == 0 {
            return 0;
        }

        let frames_to_zero = (self.frame_capacity - self.frame_length).min(frame_count);
        if frames_to_zero == 0 {
            return 0;
        }

        let bpf = self.format.bytes_per_frame as usize;
        let plane_bytes = self.stream_capacity_bytes();
        let frames_to_move = self.frame_length - offset;

        let Some(block) = self.data.as_mut() else {
            return 0;
        };
        let data = block.as_mut_slice();

        for stream in 0..self.buffers.len() {
            let base = stream * plane_bytes;
            let at = base + offset * bpf;

            if frames_to_move > 0 {
                data.copy_within(at..at + frames_to_move * bpf, at + frames_to_zero * bpf);
            }
            data[at..at + frames_to_zero * bpf].fill(0);
        }

        self.set_frame_length(self.frame_length + frames_to_zero);
        frames_to_zero
    }

    // ===== 内部 =====

    /// 每个 stream 的字节数，拒绝 bpf 为 0 或超出 32-bit 范围
    fn plane_bytes(format: &StreamDescription, frame_capacity: usize) -> Result<usize> {
        if format.bytes_per_frame == 0 {
            return Err(Error::InvalidFormat("bytes_per_frame == 0"));
        }
        if frame_capacity > (u32::MAX / format.bytes_per_frame) as usize {
            return Err(Error::Overflow);
        }
        Ok(format.frame_count_to_byte_size(frame_capacity))
    }

    #[inline]
    fn plane_range(&self, stream: usize) -> std::ops::Range<usize> {
        let plane_bytes = self.stream_capacity_bytes();
        stream * plane_bytes..(stream + 1) * plane_bytes
    }
}
