//! 传输统计
//!
//! 实时路径不返回错误，也不记录日志；满/空/撕裂读通过这里的计数器旁路上报。
//! 所有操作都是 lock-free 的 relaxed 原子计数。

use std::sync::atomic::{AtomicU64, Ordering};

use super::timestamp::{mach_ticks_to_ns, now_ticks};

/// 生产者/消费者传输统计
pub struct TransferStats {
    started_ticks: AtomicU64,

    frames_written: AtomicU64,
    frames_read: AtomicU64,

    /// 写入少于请求（overrun）
    short_writes: AtomicU64,
    /// 读取少于请求（underrun）
    short_reads: AtomicU64,

    torn_reads: AtomicU64,

    // 读端观察到的最大积压
    max_backlog: AtomicU64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            started_ticks: AtomicU64::new(now_ticks()),
            frames_written: AtomicU64::new(0),
            frames_read: AtomicU64::new(0),
            short_writes: AtomicU64::new(0),
            short_reads: AtomicU64::new(0),
            torn_reads: AtomicU64::new(0),
            max_backlog: AtomicU64::new(0),
        }
    }

    /// 记录一次写入：请求 `requested` 帧，实际写入 `written` 帧
    #[inline]
    pub fn record_write(&self, requested: usize, written: usize) {
        self.frames_written
            .fetch_add(written as u64, Ordering::Relaxed);
        if written < requested {
            self.short_writes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// 记录一次读取，`backlog` 为读取前可读的帧数
    #[inline]
    pub fn record_read(&self, requested: usize, read: usize, backlog: usize) {
        self.frames_read.fetch_add(read as u64, Ordering::Relaxed);
        if read < requested {
            self.short_reads.fetch_add(1, Ordering::Relaxed);
        }
        self.max_backlog
            .fetch_max(backlog as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_torn_read(&self) {
        self.torn_reads.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn torn_reads(&self) -> u64 {
        self.torn_reads.load(Ordering::Relaxed)
    }

    /// 生成报告
    pub fn report(&self) -> StatsReport {
        let started = self.started_ticks.load(Ordering::Relaxed);
        let elapsed_ns = mach_ticks_to_ns(now_ticks().saturating_sub(started));

        StatsReport {
            elapsed_ns,
            frames_written: self.frames_written.load(Ordering::Relaxed),
            frames_read: self.frames_read.load(Ordering::Relaxed),
            short_writes: self.short_writes.load(Ordering::Relaxed),
            short_reads: self.short_reads.load(Ordering::Relaxed),
            torn_reads: self.torn_reads.load(Ordering::Relaxed),
            max_backlog: self.max_backlog.load(Ordering::Relaxed),
        }
    }

    /// 重置统计并重新开始计时
    pub fn reset(&self) {
        self.started_ticks.store(now_ticks(), Ordering::Relaxed);
        self.frames_written.store(0, Ordering::Relaxed);
        self.frames_read.store(0, Ordering::Relaxed);
        self.short_writes.store(0, Ordering::Relaxed);
        self.short_reads.store(0, Ordering::Relaxed);
        self.torn_reads.store(0, Ordering::Relaxed);
        self.max_backlog.store(0, Ordering::Relaxed);
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 统计报告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsReport {
    pub elapsed_ns: u64,
    pub frames_written: u64,
    pub frames_read: u64,
    pub short_writes: u64,
    pub short_reads: u64,
    pub torn_reads: u64,
    pub max_backlog: u64,
}

impl StatsReport {
    /// 读端吞吐（帧/秒）
    pub fn read_rate(&self) -> f64 {
        if self.elapsed_ns == 0 {
            return 0.0;
        }
        self.frames_read as f64 * 1_000_000_000.0 / self.elapsed_ns as f64
    }
}

impl std::fmt::Display for StatsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Transfer Statistics")?;
        writeln!(f, "===================")?;
        writeln!(
            f,
            "Elapsed: {:.2} ms",
            self.elapsed_ns as f64 / 1_000_000.0
        )?;
        writeln!(f)?;

        writeln!(f, "Frames:")?;
        writeln!(f, "  Written: {}", self.frames_written)?;
        writeln!(f, "  Read:    {}", self.frames_read)?;
        writeln!(f, "  Rate:    {:.0} frames/s", self.read_rate())?;
        writeln!(f)?;

        writeln!(f, "Ring Buffer Backlog:")?;
        writeln!(f, "  Max: {} frames", self.max_backlog)?;
        writeln!(f)?;

        writeln!(f, "Short writes (overruns): {}", self.short_writes)?;
        writeln!(f, "Short reads (underruns): {}", self.short_reads)?;
        writeln!(f, "Torn bounds reads: {}", self.torn_reads)?;

        Ok(())
    }
}
