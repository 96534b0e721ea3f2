//! 音频采样格式定义.
//!
//! 编解码器框架中 PCM 帧的采样类型与排列方式:
//! 交错 (Interleaved) 为 LRLR..., 平面 (Planar) 为每个声道独立存储.

use std::fmt;

/// 音频采样格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SampleFormat {
    /// 未指定
    None,
    /// 有符号 16 位整数, 交错
    S16,
    /// 有符号 32 位整数, 交错 (24 位有效精度左对齐)
    S32,
    /// 32 位浮点, 交错, 满幅为 ±1.0
    F32,
    /// 有符号 16 位整数, 平面
    S16p,
    /// 有符号 32 位整数, 平面
    S32p,
    /// 32 位浮点, 平面
    F32p,
}

impl SampleFormat {
    /// 每个采样点占用的字节数
    pub const fn bytes_per_sample(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::S16 | Self::S16p => 2,
            Self::S32 | Self::S32p | Self::F32 | Self::F32p => 4,
        }
    }

    /// 是否为平面格式
    pub const fn is_planar(&self) -> bool {
        matches!(self, Self::S16p | Self::S32p | Self::F32p)
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::S16 => "s16",
            Self::S32 => "s32",
            Self::F32 => "flt",
            Self::S16p => "s16p",
            Self::S32p => "s32p",
            Self::F32p => "fltp",
        };
        write!(f, "{name}")
    }
}
