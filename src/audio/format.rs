//! 音频流格式描述
//!
//! `StreamDescription` 与 Core Audio 的 AudioStreamBasicDescription 字段一一对应，
//! 所有 buffer 运算都以 `bytes_per_frame` 为准：
//! - 交织：一个 stream，每帧 `channels × sample_size` 字节
//! - 非交织（平面）：每声道一个 stream，每帧 `sample_size` 字节

use std::fmt;

use crate::error::{Error, Result};

/// 'lpcm'
pub const FORMAT_LINEAR_PCM: u32 = 0x6C70636D;
/// 'alac'
pub const FORMAT_APPLE_LOSSLESS: u32 = 0x616C6163;

pub const FLAG_IS_FLOAT: u32 = 1 << 0;
pub const FLAG_IS_BIG_ENDIAN: u32 = 1 << 1;
pub const FLAG_IS_SIGNED_INTEGER: u32 = 1 << 2;
pub const FLAG_IS_PACKED: u32 = 1 << 3;
pub const FLAG_IS_ALIGNED_HIGH: u32 = 1 << 4;
pub const FLAG_IS_NON_INTERLEAVED: u32 = 1 << 5;
pub const FLAG_IS_NON_MIXABLE: u32 = 1 << 6;

/// 本机字节序对应的 flag（little-endian 上为 0）
pub const FLAGS_NATIVE_ENDIAN: u32 = if cfg!(target_endian = "big") {
    FLAG_IS_BIG_ENDIAN
} else {
    0
};

const SAMPLE_FRACTION_SHIFT: u32 = 7;
const SAMPLE_FRACTION_MASK: u32 = 0x3F << SAMPLE_FRACTION_SHIFT;

// Apple Lossless 源位深 flag
const ALAC_16_BIT_SOURCE: u32 = 1;
const ALAC_20_BIT_SOURCE: u32 = 2;
const ALAC_24_BIT_SOURCE: u32 = 3;
const ALAC_32_BIT_SOURCE: u32 = 4;

/// 样本布局
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleLayout {
    /// 交织：LRLRLR...，所有样本在 buffers[0]
    Interleaved,
    /// 非交织：每声道独立 buffer，buffers[0]=L, buffers[1]=R
    NonInterleaved,
}

impl Default for SampleLayout {
    fn default() -> Self {
        Self::Interleaved
    }
}

/// 常用 PCM 格式（均为本机字节序）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommonPcmFormat {
    Float32,
    Float64,
    Int16,
    Int32,
}

impl CommonPcmFormat {
    pub const ALL: [CommonPcmFormat; 4] = [
        CommonPcmFormat::Float32,
        CommonPcmFormat::Float64,
        CommonPcmFormat::Int16,
        CommonPcmFormat::Int32,
    ];

    /// 每样本位数
    #[inline]
    pub fn bits_per_sample(&self) -> u32 {
        match self {
            Self::Float32 | Self::Int32 => 32,
            Self::Float64 => 64,
            Self::Int16 => 16,
        }
    }

    #[inline]
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

/// 音频流格式
///
/// 相等性按字节比较所有字段（`sample_rate` 比较位模式）。
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamDescription {
    pub sample_rate: f64,
    pub format_id: u32,
    pub format_flags: u32,
    pub bytes_per_packet: u32,
    pub frames_per_packet: u32,
    pub bytes_per_frame: u32,
    pub channels_per_frame: u32,
    pub bits_per_channel: u32,
    pub reserved: u32,
}

impl PartialEq for StreamDescription {
    fn eq(&self, other: &Self) -> bool {
        self.sample_rate.to_bits() == other.sample_rate.to_bits()
            && self.format_id == other.format_id
            && self.format_flags == other.format_flags
            && self.bytes_per_packet == other.bytes_per_packet
            && self.frames_per_packet == other.frames_per_packet
            && self.bytes_per_frame == other.bytes_per_frame
            && self.channels_per_frame == other.channels_per_frame
            && self.bits_per_channel == other.bits_per_channel
            && self.reserved == other.reserved
    }
}

impl Eq for StreamDescription {}

impl StreamDescription {
    /// 创建常用 PCM 格式
    pub fn new(
        format: CommonPcmFormat,
        sample_rate: f64,
        channels: u32,
        layout: SampleLayout,
    ) -> Self {
        let bits = format.bits_per_sample();
        Self::linear_pcm(
            sample_rate,
            channels,
            bits,
            bits,
            format.is_float(),
            cfg!(target_endian = "big"),
            layout == SampleLayout::NonInterleaved,
        )
    }

    /// 按给定参数填充 linear PCM 格式
    ///
    /// `valid_bits < total_bits` 时样本高位对齐（aligned high），否则为 packed
    pub fn linear_pcm(
        sample_rate: f64,
        channels: u32,
        valid_bits: u32,
        total_bits: u32,
        is_float: bool,
        is_big_endian: bool,
        is_non_interleaved: bool,
    ) -> Self {
        let mut flags = if is_float {
            FLAG_IS_FLOAT
        } else {
            FLAG_IS_SIGNED_INTEGER
        };
        if is_big_endian {
            flags |= FLAG_IS_BIG_ENDIAN;
        }
        if valid_bits == total_bits {
            flags |= FLAG_IS_PACKED;
        } else {
            flags |= FLAG_IS_ALIGNED_HIGH;
        }
        if is_non_interleaved {
            flags |= FLAG_IS_NON_INTERLEAVED;
        }

        let bytes_per_frame = if is_non_interleaved {
            total_bits / 8
        } else {
            channels * (total_bits / 8)
        };

        Self {
            sample_rate,
            format_id: FORMAT_LINEAR_PCM,
            format_flags: flags,
            bytes_per_packet: bytes_per_frame,
            frames_per_packet: 1,
            bytes_per_frame,
            channels_per_frame: channels,
            bits_per_channel: valid_bits,
            reserved: 0,
        }
    }

    /// 重置为全零
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    // ===== 格式信息 =====

    #[inline]
    pub fn is_interleaved(&self) -> bool {
        self.format_flags & FLAG_IS_NON_INTERLEAVED == 0
    }

    #[inline]
    pub fn is_non_interleaved(&self) -> bool {
        !self.is_interleaved()
    }

    #[inline]
    pub fn layout(&self) -> SampleLayout {
        if self.is_interleaved() {
            SampleLayout::Interleaved
        } else {
            SampleLayout::NonInterleaved
        }
    }

    /// 每个 stream 中交织的声道数
    #[inline]
    pub fn interleaved_channel_count(&self) -> u32 {
        if self.is_interleaved() {
            self.channels_per_frame
        } else {
            1
        }
    }

    /// stream（buffer）个数
    #[inline]
    pub fn channel_stream_count(&self) -> u32 {
        if self.is_interleaved() {
            1
        } else {
            self.channels_per_frame
        }
    }

    #[inline]
    pub fn channel_count(&self) -> u32 {
        self.channels_per_frame
    }

    #[inline]
    pub fn is_pcm(&self) -> bool {
        self.format_id == FORMAT_LINEAR_PCM
    }

    #[inline]
    pub fn is_big_endian(&self) -> bool {
        self.format_flags & FLAG_IS_BIG_ENDIAN == FLAG_IS_BIG_ENDIAN
    }

    #[inline]
    pub fn is_little_endian(&self) -> bool {
        !self.is_big_endian()
    }

    #[inline]
    pub fn is_native_endian(&self) -> bool {
        self.format_flags & FLAG_IS_BIG_ENDIAN == FLAGS_NATIVE_ENDIAN
    }

    #[inline]
    pub fn is_float(&self) -> bool {
        self.is_pcm() && self.format_flags & FLAG_IS_FLOAT == FLAG_IS_FLOAT
    }

    #[inline]
    pub fn is_signed_integer(&self) -> bool {
        self.is_pcm() && self.format_flags & FLAG_IS_SIGNED_INTEGER == FLAG_IS_SIGNED_INTEGER
    }

    #[inline]
    pub fn is_packed(&self) -> bool {
        self.format_flags & FLAG_IS_PACKED == FLAG_IS_PACKED
    }

    #[inline]
    pub fn is_aligned_high(&self) -> bool {
        self.format_flags & FLAG_IS_ALIGNED_HIGH == FLAG_IS_ALIGNED_HIGH
    }

    /// 仅用于 HAL stream 格式
    #[inline]
    pub fn is_non_mixable(&self) -> bool {
        self.format_flags & FLAG_IS_NON_MIXABLE == FLAG_IS_NON_MIXABLE
    }

    #[inline]
    pub fn is_mixable(&self) -> bool {
        self.is_pcm() && !self.is_non_mixable()
    }

    /// 每样本字节数
    pub fn sample_word_size(&self) -> Result<u32> {
        let interleaved_channels = self.interleaved_channel_count();
        if interleaved_channels == 0 {
            return Err(Error::InvalidFormat("interleaved channel count == 0"));
        }
        Ok(self.bytes_per_frame / interleaved_channels)
    }

    /// `frames × bytes_per_frame`
    #[inline]
    pub fn frame_count_to_byte_size(&self, frames: usize) -> usize {
        frames * self.bytes_per_frame as usize
    }

    /// `bytes / bytes_per_frame`
    #[inline]
    pub fn byte_size_to_frame_count(&self, bytes: usize) -> Result<usize> {
        if self.bytes_per_frame == 0 {
            return Err(Error::InvalidFormat("bytes_per_frame == 0"));
        }
        Ok(bytes / self.bytes_per_frame as usize)
    }

    // ===== 格式变换 =====

    /// 等价的非交织格式（仅 PCM）
    pub fn non_interleaved_equivalent(&self) -> Result<Self> {
        if !self.is_pcm() {
            return Err(Error::NotPcm);
        }

        let mut format = *self;
        if self.is_interleaved() {
            if self.channels_per_frame == 0 {
                return Err(Error::InvalidFormat("channels_per_frame == 0"));
            }
            format.format_flags |= FLAG_IS_NON_INTERLEAVED;
            format.bytes_per_packet /= self.channels_per_frame;
            format.bytes_per_frame /= self.channels_per_frame;
        }
        Ok(format)
    }

    /// 等价的交织格式（仅 PCM）
    pub fn interleaved_equivalent(&self) -> Result<Self> {
        if !self.is_pcm() {
            return Err(Error::NotPcm);
        }

        let mut format = *self;
        if !self.is_interleaved() {
            format.format_flags &= !FLAG_IS_NON_INTERLEAVED;
            format.bytes_per_packet = self
                .bytes_per_packet
                .checked_mul(self.channels_per_frame)
                .ok_or(Error::Overflow)?;
            format.bytes_per_frame = self
                .bytes_per_frame
                .checked_mul(self.channels_per_frame)
                .ok_or(Error::Overflow)?;
        }
        Ok(format)
    }

    /// 标准格式：本机字节序、32-bit float、packed、非交织（仅 PCM）
    pub fn standard_equivalent(&self) -> Result<Self> {
        if !self.is_pcm() {
            return Err(Error::NotPcm);
        }

        Ok(Self::linear_pcm(
            self.sample_rate,
            self.channels_per_frame,
            32,
            32,
            true,
            cfg!(target_endian = "big"),
            true,
        ))
    }

    fn four_char_code(&self) -> String {
        self.format_id
            .to_be_bytes()
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect()
    }
}

impl fmt::Display for StreamDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ch, {:.2} Hz, '{}' (0x{:08x}) ",
            self.channels_per_frame,
            self.sample_rate,
            self.four_char_code(),
            self.format_flags
        )?;

        if self.format_id == FORMAT_LINEAR_PCM {
            let fractional_bits = (self.format_flags & SAMPLE_FRACTION_MASK) >> SAMPLE_FRACTION_SHIFT;
            if fractional_bits > 0 {
                write!(
                    f,
                    "{}.{}-bit",
                    self.bits_per_channel.saturating_sub(fractional_bits),
                    fractional_bits
                )?;
            } else {
                write!(f, "{}-bit", self.bits_per_channel)?;
            }

            let interleaved_channels = self.interleaved_channel_count();
            let sample_size = if self.bytes_per_frame > 0 && interleaved_channels > 0 {
                self.bytes_per_frame / interleaved_channels
            } else {
                0
            };

            if sample_size > 1 {
                f.write_str(if self.is_big_endian() {
                    " big-endian"
                } else {
                    " little-endian"
                })?;
            }

            let is_integer = self.format_flags & FLAG_IS_FLOAT == 0;
            if is_integer {
                f.write_str(if self.format_flags & FLAG_IS_SIGNED_INTEGER != 0 {
                    " signed"
                } else {
                    " unsigned"
                })?;
            }
            f.write_str(if is_integer { " integer" } else { " float" })?;

            let unpadded = sample_size > 0 && (sample_size << 3) != self.bits_per_channel;
            if unpadded {
                if self.is_packed() {
                    write!(f, ", packed in {} bytes", sample_size)?;
                } else {
                    write!(f, ", unpacked in {} bytes", sample_size)?;
                }
            }

            if unpadded || (self.bits_per_channel & 7) != 0 {
                f.write_str(if self.is_aligned_high() {
                    " high-aligned"
                } else {
                    " low-aligned"
                })?;
            }

            if !self.is_interleaved() {
                f.write_str(", deinterleaved")?;
            }
        } else if self.format_id == FORMAT_APPLE_LOSSLESS {
            let source_bit_depth = match self.format_flags {
                ALAC_16_BIT_SOURCE => 16,
                ALAC_20_BIT_SOURCE => 20,
                ALAC_24_BIT_SOURCE => 24,
                ALAC_32_BIT_SOURCE => 32,
                _ => 0,
            };
            if source_bit_depth != 0 {
                write!(f, "from {}-bit source, ", source_bit_depth)?;
            } else {
                f.write_str("from UNKNOWN source bit depth, ")?;
            }
            write!(f, " {} frames/packet", self.frames_per_packet)?;
        } else {
            write!(
                f,
                "{} bits/channel, {} bytes/packet, {} frames/packet, {} bytes/frame",
                self.bits_per_channel, self.bytes_per_packet, self.frames_per_packet, self.bytes_per_frame
            )?;
        }

        Ok(())
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use super::StreamDescription;
    use coreaudio_sys::AudioStreamBasicDescription;

    impl From<AudioStreamBasicDescription> for StreamDescription {
        fn from(asbd: AudioStreamBasicDescription) -> Self {
            Self {
                sample_rate: asbd.mSampleRate,
                format_id: asbd.mFormatID,
                format_flags: asbd.mFormatFlags,
                bytes_per_packet: asbd.mBytesPerPacket,
                frames_per_packet: asbd.mFramesPerPacket,
                bytes_per_frame: asbd.mBytesPerFrame,
                channels_per_frame: asbd.mChannelsPerFrame,
                bits_per_channel: asbd.mBitsPerChannel,
                reserved: asbd.mReserved,
            }
        }
    }

    impl From<StreamDescription> for AudioStreamBasicDescription {
        fn from(format: StreamDescription) -> Self {
            Self {
                mSampleRate: format.sample_rate,
                mFormatID: format.format_id,
                mFormatFlags: format.format_flags,
                mBytesPerPacket: format.bytes_per_packet,
                mFramesPerPacket: format.frames_per_packet,
                mBytesPerFrame: format.bytes_per_frame,
                mChannelsPerFrame: format.channels_per_frame,
                mBitsPerChannel: format.bits_per_channel,
                mReserved: format.reserved,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float32_planar() {
        let format = StreamDescription::new(CommonPcmFormat::Float32, 44100.0, 2, SampleLayout::NonInterleaved);

        assert!(format.is_pcm());
        assert!(format.is_float());
        assert!(!format.is_signed_integer());
        assert!(format.is_packed());
        assert!(format.is_native_endian());
        assert!(format.is_non_interleaved());
        assert_eq!(format.sample_rate, 44100.0);
        assert_eq!(format.channel_count(), 2);
        assert_eq!(format.channel_stream_count(), 2);
        assert_eq!(format.interleaved_channel_count(), 1);
        assert_eq!(format.bytes_per_frame, 4);
        assert_eq!(format.sample_word_size(), Ok(4));
    }

    #[test]
    fn test_int16_interleaved() {
        let format = StreamDescription::new(CommonPcmFormat::Int16, 48000.0, 2, SampleLayout::Interleaved);

        assert!(format.is_signed_integer());
        assert!(format.is_interleaved());
        assert_eq!(format.layout(), SampleLayout::Interleaved);
        assert_eq!(format.channel_stream_count(), 1);
        assert_eq!(format.interleaved_channel_count(), 2);
        assert_eq!(format.bytes_per_frame, 4);
        assert_eq!(format.bytes_per_packet, 4);
        assert_eq!(format.bits_per_channel, 16);
        assert_eq!(format.sample_word_size(), Ok(2));
        assert_eq!(format.frame_count_to_byte_size(10), 40);
        assert_eq!(format.byte_size_to_frame_count(41), Ok(10));
    }

    #[test]
    fn test_zero_bytes_per_frame() {
        let format = StreamDescription::default();
        assert_eq!(
            format.byte_size_to_frame_count(16),
            Err(Error::InvalidFormat("bytes_per_frame == 0"))
        );
        assert!(format.sample_word_size().is_err());
    }

    #[test]
    fn test_equivalents_roundtrip() {
        for pcm in CommonPcmFormat::ALL {
            for channels in 1..=8 {
                let interleaved = StreamDescription::new(pcm, 44100.0, channels, SampleLayout::Interleaved);
                let planar = StreamDescription::new(pcm, 44100.0, channels, SampleLayout::NonInterleaved);

                let to_planar = interleaved.non_interleaved_equivalent().unwrap();
                assert_eq!(to_planar, planar);
                assert_eq!(to_planar.interleaved_equivalent().unwrap(), interleaved);

                let to_interleaved = planar.interleaved_equivalent().unwrap();
                assert_eq!(to_interleaved, interleaved);
                assert_eq!(to_interleaved.non_interleaved_equivalent().unwrap(), planar);
            }
        }
    }

    #[test]
    fn test_standard_equivalent() {
        let format = StreamDescription::new(CommonPcmFormat::Int16, 96000.0, 6, SampleLayout::Interleaved);
        let standard = format.standard_equivalent().unwrap();
        assert_eq!(
            standard,
            StreamDescription::new(CommonPcmFormat::Float32, 96000.0, 6, SampleLayout::NonInterleaved)
        );
    }

    #[test]
    fn test_interleaved_equivalent_overflow() {
        let mut format = StreamDescription::new(CommonPcmFormat::Float32, 44100.0, 2, SampleLayout::NonInterleaved);
        format.channels_per_frame = u32::MAX;
        assert_eq!(format.interleaved_equivalent(), Err(Error::Overflow));

        format.channels_per_frame = 1 << 20;
        let wide = format.interleaved_equivalent().unwrap();
        assert_eq!(wide.bytes_per_frame, 4 << 20);
    }

    #[test]
    fn test_not_pcm() {
        let format = StreamDescription {
            sample_rate: 44100.0,
            format_id: FORMAT_APPLE_LOSSLESS,
            format_flags: ALAC_24_BIT_SOURCE,
            frames_per_packet: 4096,
            channels_per_frame: 2,
            ..Default::default()
        };
        assert_eq!(format.non_interleaved_equivalent(), Err(Error::NotPcm));
        assert_eq!(format.interleaved_equivalent(), Err(Error::NotPcm));
        assert_eq!(format.standard_equivalent(), Err(Error::NotPcm));
        assert!(!format.is_float());
        assert!(!format.is_mixable());
    }

    #[test]
    fn test_equality_is_bitwise() {
        let a = StreamDescription::new(CommonPcmFormat::Float32, 44100.0, 2, SampleLayout::Interleaved);
        let mut b = a;
        assert_eq!(a, b);

        b.reserved = 1;
        assert_ne!(a, b);

        let mut c = a;
        c.sample_rate = -0.0;
        let mut d = a;
        d.sample_rate = 0.0;
        assert_ne!(c, d);

        let mut e = a;
        e.sample_rate = f64::NAN;
        let f = e;
        assert_eq!(e, f);
    }

    #[test]
    fn test_reset() {
        let mut format = StreamDescription::new(CommonPcmFormat::Float64, 44100.0, 2, SampleLayout::Interleaved);
        format.reset();
        assert_eq!(format, StreamDescription::default());
    }

    #[test]
    #[cfg(target_endian = "little")]
    fn test_display_pcm() {
        let format = StreamDescription::new(CommonPcmFormat::Float32, 44100.0, 2, SampleLayout::NonInterleaved);
        assert_eq!(
            format.to_string(),
            "2 ch, 44100.00 Hz, 'lpcm' (0x00000029) 32-bit little-endian float, deinterleaved"
        );

        let format = StreamDescription::new(CommonPcmFormat::Int16, 48000.0, 2, SampleLayout::Interleaved);
        assert_eq!(
            format.to_string(),
            "2 ch, 48000.00 Hz, 'lpcm' (0x0000000c) 16-bit little-endian signed integer"
        );

        // 24-bit 有效位放在 32-bit 容器里
        let format = StreamDescription::linear_pcm(96000.0, 1, 24, 32, false, false, false);
        assert_eq!(
            format.to_string(),
            "1 ch, 96000.00 Hz, 'lpcm' (0x00000014) 24-bit little-endian signed integer, unpacked in 4 bytes high-aligned"
        );
    }

    #[test]
    fn test_display_other() {
        let alac = StreamDescription {
            sample_rate: 44100.0,
            format_id: FORMAT_APPLE_LOSSLESS,
            format_flags: ALAC_16_BIT_SOURCE,
            frames_per_packet: 4096,
            channels_per_frame: 2,
            ..Default::default()
        };
        assert_eq!(
            alac.to_string(),
            "2 ch, 44100.00 Hz, 'alac' (0x00000001) from 16-bit source,  4096 frames/packet"
        );

        let other = StreamDescription {
            sample_rate: 8000.0,
            format_id: u32::from_be_bytes(*b"ulaw"),
            bits_per_channel: 8,
            bytes_per_packet: 1,
            frames_per_packet: 1,
            bytes_per_frame: 1,
            channels_per_frame: 1,
            ..Default::default()
        };
        assert_eq!(
            other.to_string(),
            "1 ch, 8000.00 Hz, 'ulaw' (0x00000000) 8 bits/channel, 1 bytes/packet, 1 frames/packet, 1 bytes/frame"
        );
    }
}
