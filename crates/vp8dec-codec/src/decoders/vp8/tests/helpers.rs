use std::sync::Once;

use crate::frame::VideoFrame;

use super::super::Vp8Decoder;
use super::super::frame_buffer::{FrameBuffer, FrameLayout};
use super::super::stream_writer::{FrameSpec, StreamWriter};

static INIT_LOG: Once = Once::new();

/// 初始化测试日志 (RUST_LOG 控制级别)
pub fn init_logging() {
    INIT_LOG.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// 用同一个写入器依次写出多帧
pub fn write_stream(specs: &[FrameSpec]) -> Vec<Vec<u8>> {
    let mut writer = StreamWriter::new();
    specs.iter().map(|spec| writer.write_frame(spec)).collect()
}

/// 解码全部帧, 任一帧出错即失败
pub fn decode_stream(specs: &[FrameSpec]) -> Vec<Option<VideoFrame>> {
    init_logging();
    let mut dec = Vp8Decoder::new();
    write_stream(specs)
        .iter()
        .enumerate()
        .map(|(i, data)| {
            dec.decode_frame(data)
                .unwrap_or_else(|e| panic!("第 {} 帧解码失败: {}", i, e))
        })
        .collect()
}

/// 解码单个可显示帧
pub fn decode_one(spec: &FrameSpec) -> VideoFrame {
    decode_stream(std::slice::from_ref(spec))
        .pop()
        .flatten()
        .expect("应输出一帧")
}

/// 断言平面所有像素等于 `value`
pub fn assert_plane_filled(frame: &VideoFrame, plane: usize, value: u8, what: &str) {
    let data = &frame.data[plane];
    assert!(
        data.iter().all(|&p| p == value),
        "{}: 平面 {} 应全部为 {}, 实际前 16 个像素 {:?}",
        what,
        plane,
        value,
        &data[..data.len().min(16)]
    );
}

/// 亮度平面在 (x, y) 处的像素
pub fn luma_at(frame: &VideoFrame, x: usize, y: usize) -> u8 {
    frame.data[0][y * frame.linesize[0] + x]
}

/// 按函数 `f(plane, x, y)` 填充对齐区域并扩展边框
pub fn buffer_from_fn(width: u32, height: u32, f: impl Fn(usize, usize, usize) -> u8) -> FrameBuffer {
    let layout = FrameLayout::new(width, height);
    let mut buffer = FrameBuffer::try_new(&layout).expect("分配测试缓冲失败");
    for index in 0..3 {
        let plane = buffer.plane_mut(index);
        let (w, h, stride) = (plane.width(), plane.height(), plane.stride());
        let origin = plane.origin();
        let data = plane.data_mut();
        for y in 0..h {
            for x in 0..w {
                data[origin + y * stride + x] = f(index, x, y);
            }
        }
    }
    buffer.extend_borders();
    buffer
}
