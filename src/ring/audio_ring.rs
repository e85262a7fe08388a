//! Lock-free SPSC 平面 PCM 环形缓冲区
//!
//! 与 [`ByteRingBuffer`](super::ByteRingBuffer) 相同的骨架，单位是帧，
//! 存储按声道分 plane。只接受非交织格式。
//!
//! 读写以 [`BufferList`] 为载体：其 stream 数必须等于声道数，
//! 帧大小必须一致，否则传输 0 帧。

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use super::planar::PlanarStore;
use crate::audio::{BufferList, StreamDescription};
use crate::error::Result;

/// SPSC 平面 PCM 环形缓冲区
#[derive(Debug, Default)]
pub struct AudioRingBuffer {
    store: PlanarStore,
    write_pos: CachePadded<AtomicUsize>,
    read_pos: CachePadded<AtomicUsize>,
}

impl AudioRingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建并分配（帧容量向上取整到 2 的幂）
    pub fn with_capacity(format: StreamDescription, capacity_frames: usize) -> Result<Self> {
        let mut ring = Self::new();
        ring.allocate(format, capacity_frames)?;
        Ok(ring)
    }

    /// 分配存储，丢弃旧内容
    ///
    /// 交织格式返回 `InvalidFormat`
    pub fn allocate(&mut self, format: StreamDescription, capacity_frames: usize) -> Result<()> {
        self.store = PlanarStore::allocate(format, capacity_frames)?;
        self.reset();
        Ok(())
    }

    pub fn deallocate(&mut self) {
        if self.store.capacity() == 0 {
            return;
        }

        self.store = PlanarStore::default();
        self.reset();
        log::debug!("Audio ring deallocated");
    }

    /// 两端偏移归零
    pub fn reset(&mut self) {
        *self.write_pos.get_mut() = 0;
        *self.read_pos.get_mut() = 0;
    }

    pub fn lock_memory(&self) -> bool {
        self.store.block().lock_memory()
    }

    pub fn is_memory_locked(&self) -> bool {
        self.store.block().is_memory_locked()
    }

    #[inline]
    pub fn format(&self) -> &StreamDescription {
        self.store.format()
    }

    /// 帧容量
    #[inline]
    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    #[inline]
    pub fn frames_available_to_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        self.readable(write, read)
    }

    #[inline]
    pub fn frames_available_to_write(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        self.writable(write, read)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames_available_to_read() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.frames_available_to_write() == 0
    }

    /// 从 `src` 开头写入最多 `frame_count` 帧（生产者调用）
    ///
    /// 返回写入的帧数。`allow_partial` 为 false 时空间不足则写入 0 帧
    #[inline]
    pub fn write(&self, src: &BufferList, frame_count: usize, allow_partial: bool) -> usize {
        if frame_count == 0 || !self.store.accepts(src) {
            return 0;
        }

        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        let space = self.writable(write, read);

        if space == 0 || (space < frame_count && !allow_partial) {
            return 0;
        }

        let count = space.min(frame_count);
        self.store.store(src, 0, write, count);

        self.write_pos
            .store((write + count) & self.store.mask(), Ordering::Release);
        count
    }

    /// 读取最多 `frame_count` 帧到 `dst` 开头（消费者调用）
    ///
    /// 成功时 `dst` 的帧长度被设为读取的帧数
    #[inline]
    pub fn read(&self, dst: &mut BufferList, frame_count: usize, allow_partial: bool) -> usize {
        if !self.store.accepts(dst) {
            return 0;
        }

        if frame_count > dst.frame_capacity() && !allow_partial {
            return 0;
        }
        let frame_count = frame_count.min(dst.frame_capacity());
        if frame_count == 0 {
            return 0;
        }

        let read = self.read_pos.load(Ordering::Acquire);
        let write = self.write_pos.load(Ordering::Acquire);
        let available = self.readable(write, read);

        if available == 0 || (available < frame_count && !allow_partial) {
            return 0;
        }

        let count = available.min(frame_count);
        self.store.fetch(dst, 0, read, count);
        dst.set_frame_length(count);

        self.read_pos
            .store((read + count) & self.store.mask(), Ordering::Release);
        count
    }

    /// 读偏移前移（丢弃数据），返回实际前移的帧数
    pub fn advance_read(&self, frame_count: usize) -> usize {
        let read = self.read_pos.load(Ordering::Acquire);
        let write = self.write_pos.load(Ordering::Acquire);
        let count = frame_count.min(self.readable(write, read));
        self.read_pos
            .store((read + count) & self.store.mask(), Ordering::Release);
        count
    }

    #[inline]
    fn readable(&self, write: usize, read: usize) -> usize {
        write.wrapping_sub(read) & self.store.mask()
    }

    #[inline]
    fn writable(&self, write: usize, read: usize) -> usize {
        self.store.capacity().saturating_sub(1) - self.readable(write, read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{CommonPcmFormat, SampleLayout};
    use crate::error::Error;
    use std::sync::Arc;

    fn stereo_f32() -> StreamDescription {
        StreamDescription::new(CommonPcmFormat::Float32, 44100.0, 2, SampleLayout::NonInterleaved)
    }

    fn source(left: &[f32], right: &[f32]) -> BufferList {
        let mut list = BufferList::with_capacity(stereo_f32(), left.len()).unwrap();
        list.write_samples(0, left);
        list.write_samples(1, right);
        list.set_frame_length(left.len());
        list
    }

    #[test]
    fn test_audio_ring_stereo_float() {
        let ring = AudioRingBuffer::with_capacity(stereo_f32(), 5).unwrap();
        assert_eq!(ring.capacity(), 8);

        let src = source(&[1.0, 2.0, 3.0], &[10.0, 20.0, 30.0]);
        assert_eq!(ring.write(&src, 3, true), 3);

        let mut dst = BufferList::with_capacity(stereo_f32(), 2).unwrap();
        assert_eq!(ring.read(&mut dst, 2, true), 2);
        assert_eq!(dst.frame_length(), 2);
        assert_eq!(dst.buffers()[1].data_byte_size, 8);
        assert_eq!(dst.samples::<f32>(0), vec![1.0, 2.0]);
        assert_eq!(dst.samples::<f32>(1), vec![10.0, 20.0]);

        assert_eq!(ring.frames_available_to_read(), 1);
    }

    #[test]
    fn test_audio_ring_rejects_interleaved() {
        let format = StreamDescription::new(CommonPcmFormat::Float32, 44100.0, 2, SampleLayout::Interleaved);
        assert!(matches!(
            AudioRingBuffer::with_capacity(format, 8),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_audio_ring_mismatched_list() {
        let ring = AudioRingBuffer::with_capacity(stereo_f32(), 8).unwrap();

        let mono = StreamDescription::new(CommonPcmFormat::Float32, 44100.0, 1, SampleLayout::NonInterleaved);
        let mut list = BufferList::with_capacity(mono, 4).unwrap();
        list.reset();
        assert_eq!(ring.write(&list, 4, true), 0);
        assert_eq!(ring.read(&mut list, 4, true), 0);

        let wide = StreamDescription::new(CommonPcmFormat::Float64, 44100.0, 2, SampleLayout::NonInterleaved);
        let list = BufferList::with_capacity(wide, 4).unwrap();
        assert_eq!(ring.write(&list, 4, true), 0);
    }

    #[test]
    fn test_audio_ring_wrap_and_partial() {
        let ring = AudioRingBuffer::with_capacity(stereo_f32(), 4).unwrap();
        let mut dst = BufferList::with_capacity(stereo_f32(), 4).unwrap();

        assert_eq!(ring.write(&source(&[1.0, 2.0, 3.0], &[-1.0, -2.0, -3.0]), 3, true), 3);
        assert!(ring.is_full());
        assert_eq!(ring.advance_read(2), 2);

        // 可写 2 帧，不允许部分写入时拒绝 3 帧
        let src = source(&[4.0, 5.0, 6.0], &[-4.0, -5.0, -6.0]);
        assert_eq!(ring.write(&src, 3, false), 0);
        assert_eq!(ring.write(&src, 3, true), 2);

        assert_eq!(ring.read(&mut dst, 4, false), 0);
        assert_eq!(ring.read(&mut dst, 4, true), 3);
        assert_eq!(dst.samples::<f32>(0), vec![3.0, 4.0, 5.0]);
        assert_eq!(dst.samples::<f32>(1), vec![-3.0, -4.0, -5.0]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_audio_ring_read_limited_by_destination() {
        let ring = AudioRingBuffer::with_capacity(stereo_f32(), 8).unwrap();
        ring.write(&source(&[1.0, 2.0, 3.0, 4.0], &[0.0; 4]), 4, true);

        let mut dst = BufferList::with_capacity(stereo_f32(), 3).unwrap();

        // 目标容量不足时，整体读取不做任何传输
        assert_eq!(ring.read(&mut dst, 10, false), 0);
        assert_eq!(dst.frame_length(), 0);
        assert_eq!(ring.frames_available_to_read(), 4);

        assert_eq!(ring.read(&mut dst, 10, true), 3);
        assert_eq!(ring.frames_available_to_read(), 1);
    }

    #[test]
    fn test_audio_ring_reset() {
        let mut ring = AudioRingBuffer::with_capacity(stereo_f32(), 8).unwrap();
        ring.write(&source(&[1.0], &[1.0]), 1, true);
        ring.reset();
        assert!(ring.is_empty());
        assert_eq!(ring.frames_available_to_write(), 7);

        ring.deallocate();
        assert_eq!(ring.capacity(), 0);
        assert_eq!(ring.write(&source(&[1.0], &[1.0]), 1, true), 0);
    }

    #[test]
    fn test_audio_ring_spsc_threads() {
        const TOTAL: usize = 50_000;
        let format = StreamDescription::new(CommonPcmFormat::Int32, 48000.0, 2, SampleLayout::NonInterleaved);
        let ring = Arc::new(AudioRingBuffer::with_capacity(format, 64).unwrap());

        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                let mut src = BufferList::with_capacity(format, 16).unwrap();
                let mut next = 0usize;
                while next < TOTAL {
                    let len = 16.min(TOTAL - next);
                    let left: Vec<i32> = (next..next + len).map(|i| i as i32).collect();
                    let right: Vec<i32> = left.iter().map(|v| -v).collect();
                    src.write_samples(0, &left);
                    src.write_samples(1, &right);
                    src.set_frame_length(len);
                    next += ring.write(&src, len, true);
                }
            })
        };

        let mut dst = BufferList::with_capacity(format, 24).unwrap();
        let mut received = 0usize;
        while received < TOTAL {
            let n = ring.read(&mut dst, 24, true);
            let left = dst.samples::<i32>(0);
            let right = dst.samples::<i32>(1);
            for i in 0..n {
                assert_eq!(left[i], (received + i) as i32);
                assert_eq!(right[i], -((received + i) as i32));
            }
            received += n;
        }

        producer.join().unwrap();
    }
}
