//! pcm-rings
//!
//! Lock-free SPSC ring buffers and frame-bounded buffer lists for real-time PCM audio.
//!
//! - [`audio`]: 流格式描述、buffer list、时间戳、传输统计
//! - [`ring`]: 字节 ring、平面 PCM ring、以 sample time 寻址的 ring
//! - [`stress`]: 多线程压力测试驱动
//!
//! 只有配置路径（分配、格式推导）返回 [`Error`]；读写路径不阻塞、不分配，
//! 满/空通过返回的帧数或字节数表达。

pub mod alloc;
pub mod audio;
pub mod error;
pub mod ring;
pub mod stress;

pub use audio::{AudioTimeStamp, BufferList, CommonPcmFormat, SampleLayout, StreamDescription};
pub use error::{Error, Result};
pub use ring::{AudioRingBuffer, ByteRingBuffer, TimestampedRingBuffer};
