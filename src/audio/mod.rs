//! 音频值类型与容器
//!
//! 包含：
//! - Format: 流格式描述（StreamDescription）
//! - Buffer List: 帧容量固定的 PCM 容器
//! - Timestamp: 音频时间戳与 host 时间
//! - Stats: 传输统计

pub mod buffer_list;
pub mod format;
pub mod stats;
pub mod timestamp;

pub use buffer_list::{AudioBuffer, BufferList};
pub use format::{CommonPcmFormat, SampleLayout, StreamDescription};
pub use stats::{StatsReport, TransferStats};
pub use timestamp::AudioTimeStamp;
