//! 统一错误类型定义.
//!
//! 帧编解码核心与编解码器框架共用, 通过 `?` 逐层传播.

use thiserror::Error;

/// Tao LC3 统一错误类型
#[derive(Debug, Error)]
pub enum TaoError {
    /// 无效参数 (帧时长、采样率、帧字节数等配置不合法)
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 不支持的采样格式或参数组合
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 编解码器状态错误
    #[error("编解码器错误: {0}")]
    Codec(String),

    /// 码流数据无效
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 数据不足, 需要更多输入
    #[error("数据不足, 需要更多输入")]
    NeedMoreData,

    /// 已到达流末尾
    #[error("已到达流末尾")]
    Eof,

    /// 注册表中没有对应的编解码器
    #[error("未找到编解码器: {0}")]
    CodecNotFound(String),
}

impl TaoError {
    /// 是否为流控信号 (需要更多输入或已结束), 而非真正的错误
    pub fn is_flow_control(&self) -> bool {
        matches!(self, Self::NeedMoreData | Self::Eof)
    }
}

/// Tao LC3 统一 Result 类型
pub type TaoResult<T> = Result<T, TaoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_错误信息() {
        let err = TaoError::InvalidData("LC3: 带宽索引 7 越界".into());
        assert_eq!(err.to_string(), "无效数据: LC3: 带宽索引 7 越界");
        assert!(!err.is_flow_control());
        assert!(TaoError::Eof.is_flow_control());
        assert!(TaoError::NeedMoreData.is_flow_control());
    }
}
