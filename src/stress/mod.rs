//! 生产者/消费者压力测试
//!
//! 一个生产者线程以随机块大小写入确定性的 ramp，消费者（调用线程）以随机块大小读取
//! 并逐帧校验。任何丢帧、重复或错位都会表现为校验失败。
//!
//! 核心设计：两端都不阻塞，满/空时用 `Backoff` 自旋退避，
//! 统计信息通过 [`TransferStats`] 旁路收集。

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::audio::{BufferList, CommonPcmFormat, SampleLayout, StatsReport, StreamDescription, TransferStats};
use crate::error::{Error, Result};
use crate::ring::{AudioRingBuffer, ByteRingBuffer, TimestampedRingBuffer};

/// 被测 ring 的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingKind {
    /// 字节 ring，传输交织帧
    Byte,
    /// 平面 PCM ring
    Audio,
    /// 以 sample time 寻址的平面 PCM ring
    Timestamped,
}

impl fmt::Display for RingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Byte => "byte",
            Self::Audio => "audio",
            Self::Timestamped => "timestamped",
        };
        f.write_str(name)
    }
}

/// 压力测试配置
#[derive(Clone, Debug)]
pub struct StressConfig {
    pub ring: RingKind,
    /// 请求的帧容量（ring 会向上取整到 2 的幂）
    pub capacity_frames: usize,
    pub channels: u32,
    pub format: CommonPcmFormat,
    pub sample_rate: f64,
    pub duration: Duration,
    /// 单次读写的最大帧数，必须小于 `capacity_frames`
    pub max_chunk_frames: usize,
    /// 是否 mlock ring 存储
    pub lock_memory: bool,
    /// 随机块大小的种子
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            ring: RingKind::Audio,
            capacity_frames: 4096,
            channels: 2,
            format: CommonPcmFormat::Float32,
            sample_rate: 48000.0,
            duration: Duration::from_secs(2),
            max_chunk_frames: 512,
            lock_memory: false,
            seed: 0x5EED,
        }
    }
}

impl StressConfig {
    /// 被测 ring 使用的流格式
    ///
    /// 字节 ring 传输交织帧，其余为非交织
    pub fn stream_format(&self) -> StreamDescription {
        let layout = match self.ring {
            RingKind::Byte => SampleLayout::Interleaved,
            RingKind::Audio | RingKind::Timestamped => SampleLayout::NonInterleaved,
        };
        StreamDescription::new(self.format, self.sample_rate, self.channels, layout)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(Error::InvalidFormat("channel count == 0"));
        }
        if self.max_chunk_frames == 0 || self.max_chunk_frames >= self.capacity_frames {
            return Err(Error::FrameCountExceedsCapacity {
                frames: self.max_chunk_frames,
                capacity: self.capacity_frames,
            });
        }
        Ok(())
    }
}

/// 压力测试结果
#[derive(Debug, Clone)]
pub struct StressReport {
    pub ring: RingKind,
    /// 实际帧容量
    pub capacity: usize,
    pub format: StreamDescription,
    pub stats: StatsReport,
    /// 消费者校验过的帧数
    pub frames_verified: u64,
    /// 校验失败的 (帧, plane) 数
    pub mismatches: u64,
}

impl StressReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches == 0
    }
}

impl fmt::Display for StressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Stress run: {} ring, {} frames", self.ring, self.capacity)?;
        writeln!(f, "Format: {}", self.format)?;
        writeln!(f)?;
        write!(f, "{}", self.stats)?;
        writeln!(f)?;
        writeln!(f, "Verified frames: {}", self.frames_verified)?;
        writeln!(f, "Mismatches: {}", self.mismatches)?;
        Ok(())
    }
}

/// 运行压力测试，直到 `config.duration` 到期或 `stop` 被置位
pub fn run(config: &StressConfig, stop: &AtomicBool) -> Result<StressReport> {
    config.validate()?;
    let format = config.stream_format();

    log::info!(
        "Stress run: {} ring, {} frames requested, max chunk {}, {:?}",
        config.ring,
        config.capacity_frames,
        config.max_chunk_frames,
        config.duration
    );

    let stats = TransferStats::new();
    let deadline = Instant::now() + config.duration;
    let session = Session {
        config,
        format,
        stats: &stats,
        stop,
        deadline,
    };

    let outcome = match config.ring {
        RingKind::Byte => session.run_byte()?,
        RingKind::Audio => session.run_audio()?,
        RingKind::Timestamped => session.run_timestamped()?,
    };

    let report = StressReport {
        ring: config.ring,
        capacity: outcome.capacity,
        format,
        stats: stats.report(),
        frames_verified: outcome.frames_verified,
        mismatches: outcome.mismatches,
    };

    if report.stats.torn_reads > 0 {
        log::warn!("{} torn time-bounds reads during stress run", report.stats.torn_reads);
    }
    if !report.is_clean() {
        log::warn!("{} mismatched frames during stress run", report.mismatches);
    }
    log::info!("Stress run finished: {} frames verified", report.frames_verified);

    Ok(report)
}

struct Outcome {
    capacity: usize,
    frames_verified: u64,
    mismatches: u64,
}

struct Session<'a> {
    config: &'a StressConfig,
    format: StreamDescription,
    stats: &'a TransferStats,
    stop: &'a AtomicBool,
    deadline: Instant,
}

impl Session<'_> {
    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed) || Instant::now() >= self.deadline
    }

    fn producer_rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.config.seed)
    }

    fn consumer_rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.config.seed.wrapping_add(1))
    }

    fn chunk(&self, rng: &mut StdRng) -> usize {
        rng.gen_range(1..=self.config.max_chunk_frames)
    }

    fn run_byte(&self) -> Result<Outcome> {
        let frame_bytes = self.format.bytes_per_frame as usize;
        let capacity_bytes = self
            .config
            .capacity_frames
            .checked_mul(frame_bytes)
            .ok_or(Error::Overflow)?;
        let ring = ByteRingBuffer::with_capacity(capacity_bytes)?;
        if self.config.lock_memory {
            ring.lock_memory();
        }

        let mut src = vec![0u8; self.config.max_chunk_frames * frame_bytes];
        let mut dst = vec![0u8; self.config.max_chunk_frames * frame_bytes];
        let producer_done = AtomicBool::new(false);

        let (frames_verified, mismatches) = thread::scope(|s| {
            let producer = s.spawn(|| {
                let mut rng = self.producer_rng();
                let backoff = Backoff::new();
                let mut next = 0u64;

                while !self.should_stop() {
                    let chunk = self.chunk(&mut rng);
                    let bytes = &mut src[..chunk * frame_bytes];
                    fill_ramp(bytes, next, frame_bytes, 0);

                    // 只写整帧
                    let written = ring.write(bytes, false) / frame_bytes;
                    self.stats.record_write(chunk, written);
                    next += written as u64;

                    if written == 0 {
                        backoff.snooze();
                    } else {
                        backoff.reset();
                    }
                }
                producer_done.store(true, Ordering::Release);
            });

            let mut rng = self.consumer_rng();
            let backoff = Backoff::new();
            let mut next = 0u64;
            let mut mismatches = 0u64;

            loop {
                let done = producer_done.load(Ordering::Acquire);
                let backlog = ring.bytes_available_to_read() / frame_bytes;
                if done && backlog == 0 {
                    break;
                }

                let chunk = self.chunk(&mut rng);
                let read = ring.read(&mut dst[..chunk * frame_bytes], true) / frame_bytes;
                self.stats.record_read(chunk, read, backlog);

                if read == 0 {
                    backoff.snooze();
                    continue;
                }
                backoff.reset();

                mismatches += verify_ramp(&dst[..read * frame_bytes], next, frame_bytes, 0);
                next += read as u64;
            }

            join(producer);
            (next, mismatches)
        });

        Ok(Outcome {
            capacity: ring.capacity() / frame_bytes,
            frames_verified,
            mismatches,
        })
    }

    fn run_audio(&self) -> Result<Outcome> {
        let ring = AudioRingBuffer::with_capacity(self.format, self.config.capacity_frames)?;
        if self.config.lock_memory {
            ring.lock_memory();
        }

        let mut src = BufferList::with_capacity(self.format, self.config.max_chunk_frames)?;
        let mut dst = BufferList::with_capacity(self.format, self.config.max_chunk_frames)?;
        let producer_done = AtomicBool::new(false);

        let (frames_verified, mismatches) = thread::scope(|s| {
            let producer = s.spawn(|| {
                let mut rng = self.producer_rng();
                let backoff = Backoff::new();
                let mut next = 0u64;

                while !self.should_stop() {
                    let chunk = self.chunk(&mut rng);
                    fill_list(&mut src, next, chunk);

                    let written = ring.write(&src, chunk, true);
                    self.stats.record_write(chunk, written);
                    next += written as u64;

                    if written == 0 {
                        backoff.snooze();
                    } else {
                        backoff.reset();
                    }
                }
                producer_done.store(true, Ordering::Release);
            });

            let mut rng = self.consumer_rng();
            let backoff = Backoff::new();
            let mut next = 0u64;
            let mut mismatches = 0u64;

            loop {
                let done = producer_done.load(Ordering::Acquire);
                let backlog = ring.frames_available_to_read();
                if done && backlog == 0 {
                    break;
                }

                let chunk = self.chunk(&mut rng);
                let read = ring.read(&mut dst, chunk, true);
                self.stats.record_read(chunk, read, backlog);

                if read == 0 {
                    backoff.snooze();
                    continue;
                }
                backoff.reset();

                mismatches += verify_list(&dst, next, read);
                next += read as u64;
            }

            join(producer);
            (next, mismatches)
        });

        Ok(Outcome {
            capacity: ring.capacity(),
            frames_verified,
            mismatches,
        })
    }

    /// 生产者按 sample time 连续写入；消费者位置通过 `consumer_pos` 反馈，
    /// 生产者永远不覆盖尚未读取的帧
    fn run_timestamped(&self) -> Result<Outcome> {
        let ring = TimestampedRingBuffer::with_capacity(self.format, self.config.capacity_frames)?;
        if self.config.lock_memory {
            ring.lock_memory();
        }

        let mut src = BufferList::with_capacity(self.format, self.config.max_chunk_frames)?;
        let mut dst = BufferList::with_capacity(self.format, self.config.max_chunk_frames)?;
        let producer_done = AtomicBool::new(false);
        let consumer_pos = AtomicI64::new(0);
        let capacity = ring.capacity() as i64;

        let (frames_verified, mismatches) = thread::scope(|s| {
            let producer = s.spawn(|| {
                let mut rng = self.producer_rng();
                let backoff = Backoff::new();
                let mut next = 0i64;

                while !self.should_stop() {
                    let chunk = self.chunk(&mut rng);
                    if next + chunk as i64 - consumer_pos.load(Ordering::Acquire) > capacity {
                        self.stats.record_write(chunk, 0);
                        backoff.snooze();
                        continue;
                    }
                    backoff.reset();

                    fill_list(&mut src, next as u64, chunk);
                    if let Err(e) = ring.write(&src, chunk, next) {
                        log::error!("Timestamped write failed: {}", e);
                        break;
                    }
                    self.stats.record_write(chunk, chunk);
                    next += chunk as i64;
                }
                producer_done.store(true, Ordering::Release);
            });

            let mut rng = self.consumer_rng();
            let backoff = Backoff::new();
            let mut pos = 0i64;
            let mut mismatches = 0u64;

            loop {
                let done = producer_done.load(Ordering::Acquire);
                let (t0, t1) = match ring.time_bounds() {
                    Ok(bounds) => bounds,
                    Err(_) => {
                        self.stats.record_torn_read();
                        backoff.snooze();
                        continue;
                    }
                };

                if pos < t0 {
                    // 被生产者套圈：跳过的帧全部计为失败
                    mismatches += (t0 - pos) as u64;
                    pos = t0;
                    consumer_pos.store(pos, Ordering::Release);
                }

                let backlog = (t1 - pos).max(0) as usize;
                if backlog == 0 {
                    if done {
                        break;
                    }
                    backoff.snooze();
                    continue;
                }

                let chunk = self.chunk(&mut rng);
                let frames = chunk.min(backlog);
                match ring.read(&mut dst, frames, pos) {
                    Ok(()) => {}
                    Err(Error::TornRead) => {
                        self.stats.record_torn_read();
                        backoff.snooze();
                        continue;
                    }
                    Err(e) => {
                        log::error!("Timestamped read failed: {}", e);
                        break;
                    }
                }
                backoff.reset();
                self.stats.record_read(chunk, frames, backlog);

                mismatches += verify_list(&dst, pos as u64, frames);
                pos += frames as i64;
                consumer_pos.store(pos, Ordering::Release);
            }

            join(producer);
            (pos as u64, mismatches)
        });

        Ok(Outcome {
            capacity: ring.capacity(),
            frames_verified,
            mismatches,
        })
    }
}

fn join<T>(handle: ScopedJoinHandle<'_, T>) -> T {
    match handle.join() {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

// ===== Ramp =====

/// 帧 `frame`、plane `plane` 中第 `byte` 个字节的期望值
#[inline]
fn ramp(frame: u64, plane: usize, byte: usize) -> u8 {
    (frame ^ (frame >> 8))
        .wrapping_mul(31)
        .wrapping_add(plane as u64 * 7 + byte as u64) as u8
}

fn fill_ramp(bytes: &mut [u8], first_frame: u64, frame_bytes: usize, plane: usize) {
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = ramp(first_frame + (i / frame_bytes) as u64, plane, i % frame_bytes);
    }
}

/// 返回不匹配的帧数
fn verify_ramp(bytes: &[u8], first_frame: u64, frame_bytes: usize, plane: usize) -> u64 {
    bytes
        .chunks(frame_bytes)
        .enumerate()
        .filter(|(k, frame)| {
            frame
                .iter()
                .enumerate()
                .any(|(j, &b)| b != ramp(first_frame + *k as u64, plane, j))
        })
        .count() as u64
}

fn fill_list(list: &mut BufferList, first_frame: u64, frames: usize) {
    let frame_bytes = list.format().bytes_per_frame as usize;
    for plane in 0..list.number_buffers() {
        if let Some(bytes) = list.stream_mut(plane) {
            fill_ramp(&mut bytes[..frames * frame_bytes], first_frame, frame_bytes, plane);
        }
    }
    list.set_frame_length(frames);
}

fn verify_list(list: &BufferList, first_frame: u64, frames: usize) -> u64 {
    let frame_bytes = list.format().bytes_per_frame as usize;
    (0..list.number_buffers())
        .map(|plane| match list.stream(plane) {
            Some(bytes) if bytes.len() >= frames * frame_bytes => {
                verify_ramp(&bytes[..frames * frame_bytes], first_frame, frame_bytes, plane)
            }
            _ => frames as u64,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(ring: RingKind, format: CommonPcmFormat) -> StressConfig {
        StressConfig {
            ring,
            capacity_frames: 256,
            channels: 2,
            format,
            duration: Duration::from_millis(200),
            max_chunk_frames: 48,
            ..StressConfig::default()
        }
    }

    #[test]
    fn test_ramp_detects_shift() {
        let mut bytes = vec![0u8; 8 * 4];
        fill_ramp(&mut bytes, 100, 4, 0);
        assert_eq!(verify_ramp(&bytes, 100, 4, 0), 0);
        assert_eq!(verify_ramp(&bytes, 101, 4, 0), 8);
        assert_eq!(verify_ramp(&bytes, 100, 4, 1), 8);
    }

    #[test]
    fn test_validate() {
        let stop = AtomicBool::new(false);

        let config = StressConfig {
            max_chunk_frames: 256,
            ..quick(RingKind::Audio, CommonPcmFormat::Float32)
        };
        assert!(matches!(
            run(&config, &stop),
            Err(Error::FrameCountExceedsCapacity { .. })
        ));

        let config = StressConfig {
            channels: 0,
            ..quick(RingKind::Audio, CommonPcmFormat::Float32)
        };
        assert!(run(&config, &stop).is_err());
    }

    #[test]
    fn test_stream_format() {
        let config = quick(RingKind::Byte, CommonPcmFormat::Int16);
        let format = config.stream_format();
        assert!(format.is_interleaved());
        assert_eq!(format.bytes_per_frame, 4);

        let config = quick(RingKind::Timestamped, CommonPcmFormat::Int16);
        assert!(config.stream_format().is_non_interleaved());
    }

    #[test]
    fn test_byte_ring_stress() {
        let stop = AtomicBool::new(false);
        let report = run(&quick(RingKind::Byte, CommonPcmFormat::Int16), &stop).unwrap();

        assert!(report.is_clean(), "{}", report);
        assert!(report.frames_verified > 0);
        assert_eq!(report.frames_verified, report.stats.frames_written);
        assert_eq!(report.stats.frames_read, report.stats.frames_written);
    }

    #[test]
    fn test_audio_ring_stress() {
        let stop = AtomicBool::new(false);
        let report = run(&quick(RingKind::Audio, CommonPcmFormat::Float32), &stop).unwrap();

        assert!(report.is_clean(), "{}", report);
        assert_eq!(report.capacity, 256);
        assert_eq!(report.frames_verified, report.stats.frames_written);
    }

    #[test]
    fn test_timestamped_ring_stress() {
        let stop = AtomicBool::new(false);
        let report = run(&quick(RingKind::Timestamped, CommonPcmFormat::Int32), &stop).unwrap();

        assert!(report.is_clean(), "{}", report);
        assert!(report.frames_verified > 0);
        assert_eq!(report.frames_verified, report.stats.frames_written);
    }

    #[test]
    fn test_stop_flag() {
        let stop = AtomicBool::new(true);
        let config = StressConfig {
            duration: Duration::from_secs(60),
            ..quick(RingKind::Audio, CommonPcmFormat::Float64)
        };

        let started = Instant::now();
        let report = run(&config, &stop).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.frames_verified, 0);
    }
}
