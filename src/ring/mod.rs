//! Lock-free 单生产者单消费者环形缓冲区
//!
//! - [`ByteRingBuffer`]: 字节流
//! - [`AudioRingBuffer`]: 按帧计数的平面 PCM
//! - [`TimestampedRingBuffer`]: 以 sample time 寻址的平面 PCM
//!
//! 容量总是 2 的幂，偏移量用 mask 取模。读写路径不加锁、不分配、不记录日志。

mod audio_ring;
mod byte_ring;
mod planar;
mod timestamped;

pub use audio_ring::AudioRingBuffer;
pub use byte_ring::ByteRingBuffer;
pub use timestamped::TimestampedRingBuffer;

use crate::error::{Error, Result};

/// 最小容量
pub const MIN_CAPACITY: usize = 2;

/// 最大容量（2^31）
pub const MAX_CAPACITY: usize = 1 << 31;

/// 将请求容量向上取整到 2 的幂
///
/// 请求必须在 `[MIN_CAPACITY, MAX_CAPACITY]` 内
pub fn round_capacity(requested: usize) -> Result<usize> {
    if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&requested) {
        return Err(Error::CapacityOutOfRange { requested });
    }
    Ok(requested.next_power_of_two())
}
