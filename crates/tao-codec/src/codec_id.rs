//! 编解码器标识符.
//!
//! 为每种编解码算法分配唯一标识, 注册表按标识查找编解码器.

use std::fmt;
use tao_core::MediaType;

/// 编解码器标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodecId {
    /// 未知编解码器
    None,
    /// LC3 (Low Complexity Communication Codec, 蓝牙 LE Audio)
    Lc3,
}

impl CodecId {
    /// 获取编解码器对应的媒体类型
    pub const fn media_type(&self) -> MediaType {
        match self {
            Self::None => MediaType::Data,
            Self::Lc3 => MediaType::Audio,
        }
    }

    /// 获取编解码器的人类可读名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lc3 => "lc3",
        }
    }

    /// 按名称查找编解码器 (不区分大小写)
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::Lc3]
            .into_iter()
            .find(|id| id.name().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
