//! 统一错误类型
//!
//! 只有配置路径（分配、格式推导、长度推断）会返回错误；
//! 实时路径的满/空状态通过返回的帧数/字节数表达，不是错误。

use thiserror::Error;

/// pcm-rings 的错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// 分配器无法提供所需内存
    #[error("Out of memory: failed to allocate {bytes} bytes")]
    OutOfMemory { bytes: usize },

    /// 格式与操作不兼容（bytes_per_frame 为 0、交织格式用于平面 ring 等）
    #[error("Invalid format: {0}")]
    InvalidFormat(&'static str),

    /// buffer list 各 stream 的有效字节数不一致
    #[error("Inconsistent buffer list: per-stream byte sizes differ")]
    Inconsistent,

    /// 帧数/字节数运算越界（超过 32-bit 范围或声明的容量）
    #[error("Frame or byte count overflow")]
    Overflow,

    /// 只对 linear PCM 有意义的格式变换被用于非 PCM 格式
    #[error("Format is not linear PCM")]
    NotPcm,

    /// time-bounds 队列的 sequence-lock 读取重试耗尽
    #[error("Torn read: time bounds changed during every retry")]
    TornRead,

    /// Ring 容量超出 [2, 2^31]
    #[error("Capacity {requested} out of range [2, 2147483648]")]
    CapacityOutOfRange { requested: usize },

    /// 单次写入的帧数大于 ring 容量
    #[error("Frame count {frames} exceeds ring capacity {capacity}")]
    FrameCountExceedsCapacity { frames: usize, capacity: usize },
}

/// pcm-rings 的 Result 别名
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// 重试是否可能成功
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TornRead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient() {
        assert!(Error::TornRead.is_transient());
        assert!(!Error::Overflow.is_transient());
        assert!(!Error::OutOfMemory { bytes: 16 }.is_transient());
    }

    #[test]
    fn test_display() {
        let e = Error::CapacityOutOfRange { requested: 1 };
        assert_eq!(e.to_string(), "Capacity 1 out of range [2, 2147483648]");

        let e = Error::InvalidFormat("bytes_per_frame == 0");
        assert_eq!(e.to_string(), "Invalid format: bytes_per_frame == 0");
    }
}
