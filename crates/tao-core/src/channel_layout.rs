//! 音频声道布局定义.
//!
//! LC3 各声道独立编码, 布局只决定声道数与交错顺序.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// 声道位掩码, 每个位代表一个扬声器位置
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelMask: u32 {
        /// 前方左声道
        const FRONT_LEFT   = 1 << 0;
        /// 前方右声道
        const FRONT_RIGHT  = 1 << 1;
        /// 前方中央声道
        const FRONT_CENTER = 1 << 2;
    }
}

/// 声道布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelLayout {
    /// 声道数量
    pub channels: u32,
    /// 声道位掩码, 非标准布局为空
    pub mask: ChannelMask,
}

impl ChannelLayout {
    /// 单声道
    pub const MONO: Self = Self {
        channels: 1,
        mask: ChannelMask::FRONT_CENTER,
    };

    /// 立体声 (左右)
    pub const STEREO: Self = Self {
        channels: 2,
        mask: ChannelMask::FRONT_LEFT.union(ChannelMask::FRONT_RIGHT),
    };

    /// 根据声道数创建默认布局
    pub fn from_channels(channels: u32) -> Self {
        match channels {
            1 => Self::MONO,
            2 => Self::STEREO,
            n => Self {
                channels: n,
                mask: ChannelMask::empty(),
            },
        }
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::MONO => write!(f, "mono"),
            Self::STEREO => write!(f, "stereo"),
            _ => write!(f, "{}ch", self.channels),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_按声道数创建布局() {
        assert_eq!(ChannelLayout::from_channels(1), ChannelLayout::MONO);
        assert_eq!(ChannelLayout::from_channels(2).to_string(), "stereo");
        let quad = ChannelLayout::from_channels(4);
        assert_eq!(quad.channels, 4);
        assert!(quad.mask.is_empty());
        assert_eq!(quad.to_string(), "4ch");
    }
}
