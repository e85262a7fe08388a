//! 音频时间戳与 host 时间
//!
//! `AudioTimeStamp` 携带多种时间表示，各自有独立的有效标志。
//! host 时间单位为 mach ticks；非 macOS 平台上 ticks 即纳秒。

use std::cmp::Ordering;
use std::sync::OnceLock;

/// sample time 有效
pub const TIMESTAMP_SAMPLE_TIME_VALID: u32 = 1 << 0;
/// host time 有效
pub const TIMESTAMP_HOST_TIME_VALID: u32 = 1 << 1;
/// rate scalar 有效
pub const TIMESTAMP_RATE_SCALAR_VALID: u32 = 1 << 2;
/// word clock time 有效
pub const TIMESTAMP_WORD_CLOCK_TIME_VALID: u32 = 1 << 3;
/// sample time 与 host time 均有效
pub const TIMESTAMP_SAMPLE_HOST_TIME_VALID: u32 =
    TIMESTAMP_SAMPLE_TIME_VALID | TIMESTAMP_HOST_TIME_VALID;

/// 音频时间戳
///
/// 比较规则：按 sample → host → word clock 的顺序，
/// 取双方都有效的第一个字段比较；没有共同有效字段时既不相等也不可比较。
#[derive(Clone, Copy, Debug, Default)]
pub struct AudioTimeStamp {
    pub sample_time: f64,
    pub host_time: u64,
    pub rate_scalar: f64,
    pub word_clock_time: u64,
    pub flags: u32,
}

impl AudioTimeStamp {
    pub fn from_sample_time(sample_time: f64) -> Self {
        Self {
            sample_time,
            flags: TIMESTAMP_SAMPLE_TIME_VALID,
            ..Self::default()
        }
    }

    pub fn from_host_time(host_time: u64) -> Self {
        Self {
            host_time,
            flags: TIMESTAMP_HOST_TIME_VALID,
            ..Self::default()
        }
    }

    pub fn from_sample_and_host_time(sample_time: f64, host_time: u64) -> Self {
        Self {
            sample_time,
            host_time,
            flags: TIMESTAMP_SAMPLE_HOST_TIME_VALID,
            ..Self::default()
        }
    }

    pub fn from_sample_host_and_rate(sample_time: f64, host_time: u64, rate_scalar: f64) -> Self {
        Self {
            sample_time,
            host_time,
            rate_scalar,
            flags: TIMESTAMP_SAMPLE_HOST_TIME_VALID | TIMESTAMP_RATE_SCALAR_VALID,
            ..Self::default()
        }
    }

    /// 当前 host 时间
    pub fn now() -> Self {
        Self::from_host_time(now_ticks())
    }

    #[inline]
    pub fn sample_time_is_valid(&self) -> bool {
        self.flags & TIMESTAMP_SAMPLE_TIME_VALID != 0
    }

    #[inline]
    pub fn host_time_is_valid(&self) -> bool {
        self.flags & TIMESTAMP_HOST_TIME_VALID != 0
    }

    #[inline]
    pub fn rate_scalar_is_valid(&self) -> bool {
        self.flags & TIMESTAMP_RATE_SCALAR_VALID != 0
    }

    #[inline]
    pub fn word_clock_time_is_valid(&self) -> bool {
        self.flags & TIMESTAMP_WORD_CLOCK_TIME_VALID != 0
    }

    /// host 时间换算成纳秒
    pub fn host_time_ns(&self) -> Option<u64> {
        self.host_time_is_valid()
            .then(|| mach_ticks_to_ns(self.host_time))
    }

    /// 清除所有字段和标志
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl PartialEq for AudioTimeStamp {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for AudioTimeStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.sample_time_is_valid() && other.sample_time_is_valid() {
            self.sample_time.partial_cmp(&other.sample_time)
        } else if self.host_time_is_valid() && other.host_time_is_valid() {
            Some(self.host_time.cmp(&other.host_time))
        } else if self.word_clock_time_is_valid() && other.word_clock_time_is_valid() {
            Some(self.word_clock_time.cmp(&other.word_clock_time))
        } else {
            None
        }
    }
}

// ===== Host 时间 =====

#[cfg(target_os = "macos")]
mod mach {
    #[repr(C)]
    pub struct mach_timebase_info_t {
        pub numer: u32,
        pub denom: u32,
    }

    extern "C" {
        pub fn mach_absolute_time() -> u64;
        pub fn mach_timebase_info(info: *mut mach_timebase_info_t) -> i32;
    }
}

/// Mach timebase（全局缓存，只初始化一次）
static TIMEBASE: OnceLock<TimebaseInfo> = OnceLock::new();

#[derive(Clone, Copy)]
struct TimebaseInfo {
    numer: u32,
    denom: u32,
}

impl TimebaseInfo {
    #[cfg(target_os = "macos")]
    fn get() -> Self {
        *TIMEBASE.get_or_init(|| {
            let mut info = mach::mach_timebase_info_t { numer: 0, denom: 0 };
            let status = unsafe { mach::mach_timebase_info(&mut info) };
            if status != 0 || info.numer == 0 || info.denom == 0 {
                log::warn!("mach_timebase_info failed ({}), assuming 1/1", status);
                return TimebaseInfo { numer: 1, denom: 1 };
            }
            TimebaseInfo {
                numer: info.numer,
                denom: info.denom,
            }
        })
    }

    #[cfg(not(target_os = "macos"))]
    fn get() -> Self {
        *TIMEBASE.get_or_init(|| TimebaseInfo { numer: 1, denom: 1 })
    }
}

/// mach ticks → 纳秒
///
/// Intel Mac 上 timebase 通常是 1/1，Apple Silicon 上通常是 125/3
#[inline]
pub fn mach_ticks_to_ns(ticks: u64) -> u64 {
    let info = TimebaseInfo::get();
    (ticks as u128 * info.numer as u128 / info.denom as u128) as u64
}

/// 纳秒 → mach ticks
#[inline]
pub fn ns_to_mach_ticks(ns: u64) -> u64 {
    let info = TimebaseInfo::get();
    (ns as u128 * info.denom as u128 / info.numer as u128) as u64
}

/// 当前时间（mach ticks）
#[cfg(target_os = "macos")]
#[inline]
pub fn now_ticks() -> u64 {
    unsafe { mach::mach_absolute_time() }
}

/// 当前时间（进程内单调纳秒）
#[cfg(not(target_os = "macos"))]
#[inline]
pub fn now_ticks() -> u64 {
    use std::time::Instant;
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// 当前时间（纳秒）
#[inline]
pub fn now_ns() -> u64 {
    mach_ticks_to_ns(now_ticks())
}

#[cfg(target_os = "macos")]
mod platform {
    use super::AudioTimeStamp;

    impl From<coreaudio_sys::AudioTimeStamp> for AudioTimeStamp {
        fn from(ts: coreaudio_sys::AudioTimeStamp) -> Self {
            Self {
                sample_time: ts.mSampleTime,
                host_time: ts.mHostTime,
                rate_scalar: ts.mRateScalar,
                word_clock_time: ts.mWordClockTime,
                flags: ts.mFlags,
            }
        }
    }
}
