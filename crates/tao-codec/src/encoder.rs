//! 编码器 trait 定义.

use tao_core::TaoResult;

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::frame::Frame;
use crate::packet::Packet;

/// 编码器 trait
///
/// 注册表中的工厂函数返回 `Box<dyn Encoder>`. 送入的采样按编码帧长缓存,
/// 每凑满一帧产生一个数据包, 所以一次 `send_frame()` 之后应循环
/// `receive_packet()` 直到 `NeedMoreData`. 送入 `None` 时补齐并输出最后一帧,
/// 取完后返回 `Eof`.
pub trait Encoder: Send {
    /// 获取编码器标识
    fn codec_id(&self) -> CodecId;

    /// 获取编码器名称
    fn name(&self) -> &str;

    /// 使用参数配置编码器, 决定采样率、声道数、帧时长与帧字节数
    fn open(&mut self, params: &CodecParameters) -> TaoResult<()>;

    /// 每个数据包对应的每声道采样数, 打开前为 0
    fn frame_size(&self) -> usize {
        0
    }

    /// 编解码算法延迟 (采样), 解码输出相对输入滞后这么多
    fn delay(&self) -> usize {
        0
    }

    /// 送入一帧原始数据, `None` 表示刷新
    fn send_frame(&mut self, frame: Option<&Frame>) -> TaoResult<()>;

    /// 取出一个压缩数据包
    fn receive_packet(&mut self) -> TaoResult<Packet>;

    /// 清空缓存的采样与数据包并重置跨帧状态
    fn flush(&mut self);
}
