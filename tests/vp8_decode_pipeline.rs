//! VP8 解码端到端测试: 合成码流经注册表创建的解码器, 走 Packet -> Frame 流程.

use vp8dec::codec::decoders::vp8::stream_writer::{
    FrameSpec, IntraPred, MacroblockSpec, Motion, Reference, Residual, StreamWriter,
};
use vp8dec::codec::decoders::vp8::{Discard, Vp8Decoder, Vp8DecoderConfig};
use vp8dec::codec::{CodecId, CodecParameters, Decoder, Packet, PictureType, VideoFrame};
use vp8dec::core::{Rational, Vp8Error};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn write_stream(specs: &[FrameSpec]) -> Vec<Vec<u8>> {
    let mut writer = StreamWriter::new();
    specs.iter().map(|spec| writer.write_frame(spec)).collect()
}

fn open_decoder() -> Box<dyn Decoder> {
    let registry = vp8dec::default_codec_registry();
    let mut decoder = registry
        .create_decoder(CodecId::Vp8)
        .expect("注册表中应有 vp8 解码器");
    decoder
        .open(&CodecParameters::video_hint(CodecId::Vp8, 0, 0))
        .expect("打开解码器失败");
    decoder
}

/// 送入全部数据包并在末尾 flush, 收集所有输出帧
fn decode_all(decoder: &mut dyn Decoder, packets: &[Vec<u8>], time_base: Rational) -> Vec<VideoFrame> {
    let mut frames = Vec::new();
    for (pts, data) in packets.iter().enumerate() {
        let packet = Packet::from_data(data.clone()).with_pts(pts as i64, time_base);
        decoder
            .send_packet(&packet)
            .unwrap_or_else(|e| panic!("第 {} 个数据包解码失败: {}", pts, e));
        while let Ok(frame) = decoder.receive_frame() {
            frames.extend(frame.into_video());
        }
    }
    decoder.send_packet(&Packet::empty()).expect("flush 包");
    loop {
        match decoder.receive_frame() {
            Ok(frame) => frames.extend(frame.into_video()),
            Err(Vp8Error::Eof) => break,
            Err(e) => panic!("flush 后应返回 Eof, 实际: {}", e),
        }
    }
    frames
}

fn dc_with(value: i16) -> MacroblockSpec {
    MacroblockSpec::intra(IntraPred::Dc, IntraPred::Dc).with_residual(Residual::y2_dc(value))
}

fn sample_stream() -> Vec<FrameSpec> {
    vec![
        FrameSpec {
            macroblocks: vec![dc_with(100), dc_with(100)],
            ..FrameSpec::keyframe(30, 18)
        },
        FrameSpec::inter(),
        FrameSpec {
            show_frame: false,
            refresh_golden: true,
            refresh_last: false,
            macroblocks: vec![dc_with(50)],
            ..FrameSpec::inter()
        },
        FrameSpec {
            macroblocks: vec![
                MacroblockSpec::inter(Reference::Golden, Motion::Zero),
                MacroblockSpec::inter(Reference::Last, Motion::New(-64, 0)),
            ],
            ..FrameSpec::inter()
        },
    ]
}

#[test]
fn test_vp8_registry_解码流程() {
    init_logging();
    let packets = write_stream(&sample_stream());
    let mut decoder = open_decoder();
    assert_eq!(decoder.name(), "vp8");

    let time_base = Rational::new(1, 30);
    let frames = decode_all(decoder.as_mut(), &packets, time_base);

    assert_eq!(frames.len(), 3, "不可见帧不输出");
    let pts: Vec<i64> = frames.iter().map(|f| f.pts).collect();
    assert_eq!(pts, vec![0, 1, 3]);
    assert!(frames.iter().all(|f| f.time_base == time_base));
    assert!((frames[2].timestamp().to_seconds() - 0.1).abs() < 1e-9, "pts 3 @ 1/30 应为 0.1 秒");

    let key = &frames[0];
    assert!(key.is_keyframe);
    assert_eq!(key.picture_type, PictureType::I);
    assert_eq!((key.width, key.height), (30, 18));
    assert_eq!(key.linesize, vec![30, 15, 15]);
    assert_eq!(key.data[1].len(), 15 * 9);
    assert_eq!(key.pixel(0, 0, 0), Some(141));
    assert_eq!(key.pixel(0, 29, 0), Some(154));

    assert_eq!(frames[1].picture_type, PictureType::P);
    assert_eq!(frames[1].data, key.data, "零运动无残差复制上一帧");

    // 左宏块取 golden (134), 右宏块向左移动 16 像素取上一帧的左宏块 (141)
    let last = &frames[2];
    assert_eq!(last.pixel(0, 5, 5), Some(134));
    assert_eq!(last.pixel(0, 20, 5), Some(141));
}

#[test]
fn test_vp8_损坏数据包后恢复() {
    init_logging();
    let packets = write_stream(&sample_stream());
    let mut decoder = open_decoder();

    let corrupt = Packet::from_data(vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    let err = decoder.send_packet(&corrupt).expect_err("起始码错误应失败");
    assert!(err.is_corrupt_input(), "实际: {}", err);

    let err = decoder
        .send_packet(&Packet::from_data(packets[1].clone()))
        .expect_err("关键帧之前的帧间帧");
    assert!(matches!(err, Vp8Error::MissingReference(_)));
    assert!(!err.is_corrupt_input());

    decoder
        .send_packet(&Packet::from_data(packets[0].clone()))
        .expect("关键帧应正常解码");
    let frame = decoder.receive_frame().expect("应输出关键帧");
    assert!(frame.into_video().is_some_and(|f| f.is_keyframe));
}

#[test]
fn test_vp8_flush_后从关键帧重新开始() {
    init_logging();
    let packets = write_stream(&sample_stream());
    let mut decoder = open_decoder();
    decoder
        .send_packet(&Packet::from_data(packets[0].clone()))
        .expect("关键帧");
    decoder.flush();
    assert!(matches!(decoder.receive_frame(), Err(Vp8Error::NeedMoreData)), "flush 丢弃待输出帧");
    assert!(matches!(
        decoder.send_packet(&Packet::from_data(packets[1].clone())),
        Err(Vp8Error::MissingReference(_))
    ));
}

#[test]
fn test_vp8_丢帧策略() {
    init_logging();
    let packets = write_stream(&sample_stream());
    let mut decoder = Vp8Decoder::new();
    decoder.set_config(Vp8DecoderConfig {
        skip_frame: Discard::NonKey,
        ..Vp8DecoderConfig::default()
    });

    let outputs: Vec<bool> = packets
        .iter()
        .map(|data| {
            decoder
                .decode_frame(data)
                .unwrap_or_else(|e| panic!("解码失败: {}", e))
                .is_some()
        })
        .collect();
    assert_eq!(outputs, vec![true, false, false, false], "只输出关键帧");
    assert!(decoder.references().is_complete());
}
