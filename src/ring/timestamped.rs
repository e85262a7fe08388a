//! 以 sample time 寻址的平面 PCM 环形缓冲区
//!
//! 生产者按外部时间轴的 sample time 写入，消费者按 sample time 读取任意区间。
//! 保留窗口 `[t0, t1)` 满足 `t1 − t0 ≤ capacity`，时间 `t` 的帧位于 ring 槽 `t mod capacity`。
//!
//! # Time-bounds 队列
//!
//! 窗口通过一个小型 sequence lock 发布，读取端绝不加锁：
//!
//! - 写入端把新窗口写进槽 `next mod Q`，再以 release 存入该槽的 update counter，
//!   最后递增全局 publish counter
//! - 读取端读 publish counter `c`，读槽 `c mod Q`，若槽的 update counter 仍等于 `c`
//!   则快照有效；否则重试，最多 8 次后返回 `TornRead`

use std::sync::atomic::{fence, AtomicI64, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use super::planar::PlanarStore;
use crate::audio::{BufferList, StreamDescription};
use crate::error::{Error, Result};

/// 队列槽数（2 的幂）
const TIME_BOUNDS_QUEUE_SIZE: usize = 32;
const TIME_BOUNDS_QUEUE_MASK: usize = TIME_BOUNDS_QUEUE_SIZE - 1;

/// 读取端最大尝试次数
const TIME_BOUNDS_READ_ATTEMPTS: usize = 8;

#[derive(Debug, Default)]
struct TimeBounds {
    start: AtomicI64,
    end: AtomicI64,
    update_counter: AtomicU64,
}

/// 以 sample time 寻址的 SPSC 平面 PCM 环形缓冲区
#[derive(Debug)]
pub struct TimestampedRingBuffer {
    store: PlanarStore,
    time_bounds: Box<[TimeBounds; TIME_BOUNDS_QUEUE_SIZE]>,
    publish_counter: CachePadded<AtomicU64>,
}

impl Default for TimestampedRingBuffer {
    fn default() -> Self {
        Self {
            store: PlanarStore::default(),
            time_bounds: Box::new(std::array::from_fn(|_| TimeBounds::default())),
            publish_counter: CachePadded::new(AtomicU64::new(0)),
        }
    }
}

impl TimestampedRingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(format: StreamDescription, capacity_frames: usize) -> Result<Self> {
        let mut ring = Self::new();
        ring.allocate(format, capacity_frames)?;
        Ok(ring)
    }

    /// 分配存储并清空窗口；交织格式返回 `InvalidFormat`
    pub fn allocate(&mut self, format: StreamDescription, capacity_frames: usize) -> Result<()> {
        self.store = PlanarStore::allocate(format, capacity_frames)?;
        self.reset_time_bounds();
        Ok(())
    }

    pub fn deallocate(&mut self) {
        if self.store.capacity() == 0 {
            return;
        }

        self.store = PlanarStore::default();
        self.reset_time_bounds();
        log::debug!("Timestamped ring deallocated");
    }

    /// 清空窗口与样本数据
    pub fn reset(&mut self) {
        self.store.clear();
        self.reset_time_bounds();
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

    #[inline]
    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    /// 当前保留窗口 `(t0, t1)`
    pub fn time_bounds(&self) -> Result<(i64, i64)> {
        for _ in 0..TIME_BOUNDS_READ_ATTEMPTS {
            let counter = self.publish_counter.load(Ordering::Acquire);
            let slot = &self.time_bounds[counter as usize & TIME_BOUNDS_QUEUE_MASK];

            let start = slot.start.load(Ordering::Relaxed);
            let end = slot.end.load(Ordering::Relaxed);
            fence(Ordering::Acquire);

            if slot.update_counter.load(Ordering::Acquire) == counter {
                return Ok((start, end));
            }
        }

        Err(Error::TornRead)
    }

    /// 写入 `src` 开头的 `frame_count` 帧，时间从 `start` 开始（生产者调用）
    ///
    /// - `start` 早于当前 `t1`：视为回退，窗口重置为 `[start, start)`
    /// - 写入会越过容量：`t0` 前移到 `end − capacity`
    /// - `start` 晚于当前 `t1`：中间的空隙清零
    ///
    /// `start + frame_count` 超出 `i64` 时返回 `Overflow`
    pub fn write(&self, src: &BufferList, frame_count: usize, start: i64) -> Result<()> {
        if frame_count == 0 {
            return Ok(());
        }

        let capacity = self.capacity();
        if frame_count > capacity {
            return Err(Error::FrameCountExceedsCapacity {
                frames: frame_count,
                capacity,
            });
        }
        if !self.store.accepts(src) {
            return Err(Error::InvalidFormat("buffer list does not match ring format"));
        }

        let end = start.checked_add(frame_count as i64).ok_or(Error::Overflow)?;
        let (mut cur_start, mut cur_end) = self.latest_time_bounds();

        if start < cur_end {
            cur_start = start;
            cur_end = start;
            self.set_time_bounds(cur_start, cur_end);
        } else if i128::from(end) - i128::from(cur_start) > capacity as i128 {
            cur_start = end - capacity as i64;
            cur_end = cur_end.max(cur_start);
            self.set_time_bounds(cur_start, cur_end);
        }

        if start > cur_end {
            self.store
                .zero(cur_end as usize, (start - cur_end) as usize);
        }

        self.store.store(src, 0, start as usize, frame_count);
        self.set_time_bounds(cur_start, end);
        Ok(())
    }

    /// 读取从 `start` 开始的 `frame_count` 帧到 `dst` 开头（消费者调用）
    ///
    /// 窗口外的帧以静音填充，`dst` 的帧长度总是被设为 `frame_count`
    pub fn read(&self, dst: &mut BufferList, frame_count: usize, start: i64) -> Result<()> {
        if frame_count == 0 {
            return Ok(());
        }
        if !self.store.accepts(dst) {
            return Err(Error::InvalidFormat("buffer list does not match ring format"));
        }
        if frame_count > dst.frame_capacity() {
            return Err(Error::FrameCountExceedsCapacity {
                frames: frame_count,
                capacity: dst.frame_capacity(),
            });
        }

        let start = start.max(0);
        let end = start.checked_add(frame_count as i64).ok_or(Error::Overflow)?;
        let (t0, t1) = self.time_bounds()?;

        let read_start = start.max(t0);
        let read_end = end.min(t1);

        if start > t1 || end < t0 || read_start >= read_end {
            self.store.zero_list(dst, 0, frame_count);
        } else {
            let prefix = (read_start - start) as usize;
            let valid = (read_end - read_start) as usize;

            self.store.zero_list(dst, 0, prefix);
            self.store.fetch(dst, prefix, read_start as usize, valid);
            self.store
                .zero_list(dst, prefix + valid, frame_count - prefix - valid);
        }

        dst.set_frame_length(frame_count);
        Ok(())
    }

    /// 写入端读取自己最后发布的窗口（单写者，不会撕裂）
    fn latest_time_bounds(&self) -> (i64, i64) {
        let counter = self.publish_counter.load(Ordering::Relaxed);
        let slot = &self.time_bounds[counter as usize & TIME_BOUNDS_QUEUE_MASK];
        (
            slot.start.load(Ordering::Relaxed),
            slot.end.load(Ordering::Relaxed),
        )
    }

    fn set_time_bounds(&self, start: i64, end: i64) {
        let next = self.publish_counter.load(Ordering::Relaxed) + 1;
        let slot = &self.time_bounds[next as usize & TIME_BOUNDS_QUEUE_MASK];

        slot.start.store(start, Ordering::Relaxed);
        slot.end.store(end, Ordering::Relaxed);
        slot.update_counter.store(next, Ordering::Release);

        self.publish_counter.fetch_add(1, Ordering::Release);
    }

    fn reset_time_bounds(&mut self) {
        for slot in self.time_bounds.iter_mut() {
            *slot.start.get_mut() = 0;
            *slot.end.get_mut() = 0;
            *slot.update_counter.get_mut() = 0;
        }
        *self.publish_counter.get_mut() = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{CommonPcmFormat, SampleLayout};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn mono_i16() -> StreamDescription {
        StreamDescription::new(CommonPcmFormat::Int16, 44100.0, 1, SampleLayout::NonInterleaved)
    }

    fn samples(values: &[i16]) -> BufferList {
        let mut list = BufferList::with_capacity(mono_i16(), values.len()).unwrap();
        list.write_samples(0, values);
        list.set_frame_length(values.len());
        list
    }

    fn read(ring: &TimestampedRingBuffer, frames: usize, start: i64) -> Vec<i16> {
        let mut dst = BufferList::with_capacity(mono_i16(), frames).unwrap();
        ring.read(&mut dst, frames, start).unwrap();
        assert_eq!(dst.frame_length(), frames);
        dst.samples(0)
    }

    #[test]
    fn test_initial_bounds() {
        let ring = TimestampedRingBuffer::with_capacity(mono_i16(), 16).unwrap();
        assert_eq!(ring.time_bounds(), Ok((0, 0)));
        assert_eq!(read(&ring, 4, 0), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_gap_fill() {
        let ring = TimestampedRingBuffer::with_capacity(mono_i16(), 16).unwrap();

        ring.write(&samples(&[1, 2, 3, 4]), 4, 0).unwrap();
        ring.write(&samples(&[9, 9, 9, 9]), 4, 8).unwrap();

        assert_eq!(ring.time_bounds(), Ok((0, 12)));
        assert_eq!(read(&ring, 12, 0), vec![1, 2, 3, 4, 0, 0, 0, 0, 9, 9, 9, 9]);
    }

    #[test]
    fn test_rewind() {
        let ring = TimestampedRingBuffer::with_capacity(mono_i16(), 16).unwrap();
        ring.write(&samples(&[1, 2, 3, 4]), 4, 0).unwrap();
        ring.write(&samples(&[9, 9, 9, 9]), 4, 8).unwrap();

        ring.write(&samples(&[5, 5]), 2, 0).unwrap();

        assert_eq!(ring.time_bounds(), Ok((0, 2)));
        assert_eq!(read(&ring, 4, 0), vec![5, 5, 0, 0]);
    }

    #[test]
    fn test_overwrite() {
        let ring = TimestampedRingBuffer::with_capacity(mono_i16(), 8).unwrap();

        ring.write(&samples(&[1, 2, 3, 4, 5, 6, 7, 8]), 8, 0).unwrap();
        ring.write(&samples(&[101, 102, 103, 104]), 4, 8).unwrap();

        assert_eq!(ring.time_bounds(), Ok((4, 12)));
        assert_eq!(read(&ring, 8, 4), vec![5, 6, 7, 8, 101, 102, 103, 104]);
    }

    #[test]
    fn test_read_outside_window() {
        let ring = TimestampedRingBuffer::with_capacity(mono_i16(), 8).unwrap();
        ring.write(&samples(&[1, 2, 3, 4]), 4, 100).unwrap();
        assert_eq!(ring.time_bounds(), Ok((96, 104)));

        // 窗口之前、之后
        assert_eq!(read(&ring, 2, 10), vec![0, 0]);
        assert_eq!(read(&ring, 2, 200), vec![0, 0]);

        // 跨越窗口两端
        assert_eq!(read(&ring, 4, 102), vec![3, 4, 0, 0]);

        // 负的起始时间被钳制到 0
        assert_eq!(read(&ring, 2, -50), vec![0, 0]);
    }

    #[test]
    fn test_far_jump_forward() {
        let ring = TimestampedRingBuffer::with_capacity(mono_i16(), 8).unwrap();
        ring.write(&samples(&[1, 2, 3, 4]), 4, 0).unwrap();
        ring.write(&samples(&[7, 7]), 2, 1000).unwrap();

        assert_eq!(ring.time_bounds(), Ok((994, 1002)));
        assert_eq!(read(&ring, 8, 994), vec![0, 0, 0, 0, 0, 0, 7, 7]);
    }

    #[test]
    fn test_write_wraps_storage() {
        let ring = TimestampedRingBuffer::with_capacity(mono_i16(), 8).unwrap();
        ring.write(&samples(&[1, 2, 3, 4, 5, 6]), 6, 0).unwrap();
        ring.write(&samples(&[7, 8, 9, 10]), 4, 6).unwrap();

        assert_eq!(ring.time_bounds(), Ok((2, 10)));
        assert_eq!(read(&ring, 8, 2), vec![3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(read(&ring, 4, 8), vec![9, 10, 0, 0]);
    }

    #[test]
    fn test_far_apart_sample_times() {
        const FAR: i64 = (1 << 62) + (1 << 61);
        let ring = TimestampedRingBuffer::with_capacity(mono_i16(), 8).unwrap();

        ring.write(&samples(&[1, 2]), 2, -FAR).unwrap();
        assert_eq!(ring.time_bounds(), Ok((-FAR, -FAR + 2)));

        ring.write(&samples(&[3, 4]), 2, FAR).unwrap();
        assert_eq!(ring.time_bounds(), Ok((FAR - 6, FAR + 2)));
        assert_eq!(read(&ring, 8, FAR - 6), vec![0, 0, 0, 0, 0, 0, 3, 4]);
    }

    #[test]
    fn test_sample_time_overflow() {
        let ring = TimestampedRingBuffer::with_capacity(mono_i16(), 8).unwrap();
        ring.write(&samples(&[1, 2]), 2, 0).unwrap();

        assert_eq!(ring.write(&samples(&[5, 5, 5]), 3, i64::MAX - 1), Err(Error::Overflow));
        assert_eq!(ring.time_bounds(), Ok((0, 2)));

        let mut dst = BufferList::with_capacity(mono_i16(), 4).unwrap();
        assert_eq!(ring.read(&mut dst, 4, i64::MAX - 2), Err(Error::Overflow));
    }

    #[test]
    fn test_torn_time_bounds() {
        let ring = TimestampedRingBuffer::with_capacity(mono_i16(), 8).unwrap();
        ring.write(&samples(&[1, 2]), 2, 0).unwrap();

        // 槽计数与发布计数不一致，读取端放弃
        let counter = ring.publish_counter.load(Ordering::Relaxed);
        let slot = &ring.time_bounds[counter as usize & TIME_BOUNDS_QUEUE_MASK];
        slot.update_counter.store(counter + 1, Ordering::Release);
        assert_eq!(ring.time_bounds(), Err(Error::TornRead));

        let mut dst = BufferList::with_capacity(mono_i16(), 2).unwrap();
        assert_eq!(ring.read(&mut dst, 2, 0), Err(Error::TornRead));

        // 下一次发布覆盖新的槽
        ring.write(&samples(&[3]), 1, 2).unwrap();
        assert_eq!(ring.time_bounds(), Ok((0, 3)));
    }

    #[test]
    fn test_write_errors() {
        let ring = TimestampedRingBuffer::with_capacity(mono_i16(), 4).unwrap();

        assert_eq!(
            ring.write(&samples(&[0; 5]), 5, 0),
            Err(Error::FrameCountExceedsCapacity {
                frames: 5,
                capacity: 4
            })
        );
        assert_eq!(ring.write(&samples(&[]), 0, 0), Ok(()));

        let stereo = StreamDescription::new(CommonPcmFormat::Int16, 44100.0, 2, SampleLayout::NonInterleaved);
        let list = BufferList::with_capacity(stereo, 4).unwrap();
        assert!(matches!(ring.write(&list, 2, 0), Err(Error::InvalidFormat(_))));

        let mut small = BufferList::with_capacity(mono_i16(), 2).unwrap();
        assert!(ring.read(&mut small, 3, 0).is_err());
    }

    #[test]
    fn test_reset() {
        let mut ring = TimestampedRingBuffer::with_capacity(mono_i16(), 8).unwrap();
        ring.write(&samples(&[1, 2, 3]), 3, 5).unwrap();
        ring.reset();
        assert_eq!(ring.time_bounds(), Ok((0, 0)));

        ring.write(&samples(&[4]), 1, 1).unwrap();
        assert_eq!(read(&ring, 3, 0), vec![0, 4, 0]);
    }

    #[test]
    fn test_bounds_monotonic_across_threads() {
        let ring = Arc::new(TimestampedRingBuffer::with_capacity(mono_i16(), 256).unwrap());
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let ring = Arc::clone(&ring);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut last = (0i64, 0i64);
                let mut dst = BufferList::with_capacity(mono_i16(), 32).unwrap();
                while !done.load(Ordering::Acquire) {
                    let Ok(bounds) = ring.time_bounds() else {
                        continue;
                    };
                    assert!(bounds.0 >= last.0 && bounds.1 >= last.1);
                    assert!(bounds.1 - bounds.0 <= 256);
                    last = bounds;
                    ring.read(&mut dst, 32, bounds.1 - 32).ok();
                }
            })
        };

        let chunk = samples(&[3; 32]);
        for i in 0..2000i64 {
            ring.write(&chunk, 32, i * 32).unwrap();
        }
        done.store(true, Ordering::Release);
        reader.join().unwrap();

        assert_eq!(ring.time_bounds(), Ok((2000 * 32 - 256, 2000 * 32)));
    }
}
