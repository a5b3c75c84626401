//! 解码器 trait 定义.
//!
//! 所有解码器实现必须实现 `Decoder` trait.

use vp8dec_core::Vp8Result;

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::frame::Frame;
use crate::packet::Packet;

/// 解码器 trait
///
/// 解码流程:
/// 1. 调用 `send_packet()` 送入压缩数据
/// 2. 调用 `receive_frame()` 取出解码后的帧
/// 3. 重复以上步骤直到所有数据处理完毕
/// 4. 送入空包 (flush) 后, `receive_frame()` 取尽缓存帧并返回 `Eof`
pub trait Decoder: Send {
    /// 获取解码器标识
    fn codec_id(&self) -> CodecId;

    /// 获取解码器名称
    fn name(&self) -> &str;

    /// 使用参数配置解码器
    ///
    /// 默认实现为空操作, 允许不需要额外配置的解码器跳过此步骤.
    fn open(&mut self, _params: &CodecParameters) -> Vp8Result<()> {
        Ok(())
    }

    /// 送入一个压缩数据包进行解码
    ///
    /// # 返回
    /// - `Ok(())`: 数据包已接受 (不可见帧或被丢弃策略跳过的帧不会产生输出)
    /// - `Err(Vp8Error::InvalidData)`: 码流损坏, 当前帧作废
    /// - `Err(Vp8Error::MissingReference)`: 尚未收到关键帧
    fn send_packet(&mut self, packet: &Packet) -> Vp8Result<()>;

    /// 从解码器取出一帧解码数据
    ///
    /// # 返回
    /// - `Ok(frame)`: 成功取出一帧
    /// - `Err(Vp8Error::NeedMoreData)`: 需要送入更多数据包
    /// - `Err(Vp8Error::Eof)`: 已 flush 且所有帧已取出
    fn receive_frame(&mut self) -> Vp8Result<Frame>;

    /// 刷新解码器, 清空内部状态
    ///
    /// 用于 seek 后重置, 之后必须从关键帧重新开始.
    fn flush(&mut self);
}
