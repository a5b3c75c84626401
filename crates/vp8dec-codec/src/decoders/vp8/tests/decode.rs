//! 帧级解码: 用写入器构造码流, 检查重建像素与跨帧状态.

use vp8dec_core::{Rational, Vp8Error, Vp8Result};

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::frame::{Frame, PictureType};
use crate::packet::Packet;

use super::super::stream_writer::{
    FilterDeltaSpec, FrameSpec, IntraPred, LumaPred, MacroblockSpec, Motion, Prediction,
    Reference, Residual, SegmentData, SegmentationSpec, SplitLayout, SubblockPred,
};
use super::super::{
    Discard, FrameAllocator, FrameBuffer, FrameLayout, Vp8Decoder, Vp8DecoderConfig,
};
use super::helpers::{assert_plane_filled, decode_one, decode_stream, init_logging, luma_at, write_stream};

fn dc_with(value: i16) -> MacroblockSpec {
    MacroblockSpec::intra(IntraPred::Dc, IntraPred::Dc).with_residual(Residual::y2_dc(value))
}

fn subblocks(mode: SubblockPred) -> MacroblockSpec {
    MacroblockSpec {
        prediction: Prediction::Intra {
            luma: LumaPred::Subblocks([mode; 16]),
            chroma: IntraPred::Dc,
        },
        segment: 0,
        residual: None,
    }
}

fn keyframe_with(width: u16, height: u16, macroblocks: Vec<MacroblockSpec>) -> FrameSpec {
    FrameSpec {
        macroblocks,
        ..FrameSpec::keyframe(width, height)
    }
}

fn inter_with(macroblocks: Vec<MacroblockSpec>) -> FrameSpec {
    FrameSpec {
        macroblocks,
        ..FrameSpec::inter()
    }
}

fn luma_row(frame: &crate::frame::VideoFrame, y: usize) -> &[u8] {
    let stride = frame.linesize[0];
    &frame.data[0][y * stride..(y + 1) * stride]
}

/// 左宏块 141, 右宏块 154 的 32x16 关键帧
fn two_step_keyframe(filter_level: u8) -> FrameSpec {
    FrameSpec {
        filter_level,
        ..keyframe_with(32, 16, vec![dc_with(100), dc_with(100)])
    }
}

// ============================================================
// 关键帧
// ============================================================

#[test]
fn test_keyframe_全部_dc_预测() {
    let frame = decode_one(&FrameSpec::keyframe(16, 16));
    assert_eq!((frame.width, frame.height), (16, 16));
    assert!(frame.is_keyframe);
    assert_eq!(frame.picture_type, PictureType::I);
    for plane in 0..3 {
        assert_plane_filled(&frame, plane, 128, "无残差关键帧");
    }
}

#[test]
fn test_keyframe_y2_直流残差() {
    let frame = decode_one(&keyframe_with(16, 16, vec![dc_with(100)]));
    assert_plane_filled(&frame, 0, 141, "800 -> 100 -> 13");
    assert_plane_filled(&frame, 1, 128, "色度无残差");

    let frame = decode_one(&keyframe_with(16, 16, vec![dc_with(50)]));
    assert_plane_filled(&frame, 0, 134, "400 -> 50 -> 6");
}

#[test]
fn test_keyframe_边缘常数() {
    let cases = [
        (subblocks(SubblockPred::Ve), 127),
        (subblocks(SubblockPred::He), 129),
        (MacroblockSpec::intra(IntraPred::V, IntraPred::Dc), 127),
        (MacroblockSpec::intra(IntraPred::H, IntraPred::Dc), 129),
        (MacroblockSpec::intra(IntraPred::Tm, IntraPred::Dc), 129),
    ];
    for (mb, expected) in cases {
        let frame = decode_one(&keyframe_with(16, 16, vec![mb.clone()]));
        assert_plane_filled(&frame, 0, expected, &format!("{:?}", mb.prediction));
    }
}

#[test]
fn test_keyframe_奇数尺寸裁剪() {
    let frame = decode_one(&FrameSpec::keyframe(20, 12));
    assert_eq!((frame.width, frame.height), (20, 12));
    assert_eq!(frame.linesize, vec![20, 10, 10]);
    assert_eq!(frame.data[0].len(), 20 * 12);
    assert_eq!(frame.data[1].len(), 10 * 6);
    assert_eq!(frame.pixel(0, 19, 11), Some(128));
    assert_eq!(frame.pixel(0, 20, 0), None);
}

#[test]
fn test_dc_预测使用左侧宏块() {
    let frame = decode_one(&two_step_keyframe(0));
    for y in 0..16 {
        let row = luma_row(&frame, y);
        assert!(row[..16].iter().all(|&p| p == 141));
        assert!(row[16..].iter().all(|&p| p == 154), "第 {} 行右宏块", y);
    }
}

#[test]
fn test_环路滤波宏块边() {
    let frame = decode_one(&two_step_keyframe(40));
    for y in 0..16 {
        let row = luma_row(&frame, y);
        assert_eq!(&row[12..20], &[141, 143, 145, 146, 149, 150, 152, 154], "第 {} 行", y);
    }
    assert_plane_filled(&frame, 1, 128, "平坦色度不受滤波影响");
}

#[test]
fn test_skip_loop_filter_all() {
    init_logging();
    let data = write_stream(&[two_step_keyframe(40)]);
    let mut dec = Vp8Decoder::new();
    dec.set_config(Vp8DecoderConfig {
        skip_loop_filter: Discard::All,
        ..Vp8DecoderConfig::default()
    });
    let frame = dec.decode_frame(&data[0]).unwrap().expect("应输出一帧");
    let unfiltered = decode_one(&two_step_keyframe(0));
    assert_eq!(frame.data, unfiltered.data, "跳过滤波等同于滤波级别 0");
}

#[test]
fn test_多分区与单分区一致() {
    let mbs = vec![dc_with(100), dc_with(-40), dc_with(60), dc_with(10)];
    let single = decode_one(&keyframe_with(16, 64, mbs.clone()));
    let multi = decode_one(&FrameSpec {
        log2_partitions: 2,
        ..keyframe_with(16, 64, mbs)
    });
    assert_eq!(luma_at(&single, 0, 0), 141);
    assert_eq!(single.data, multi.data);
}

#[test]
fn test_分段量化与分段图保持() {
    let segmentation = SegmentationSpec {
        update_map: true,
        data: Some(SegmentData {
            absolute: true,
            quant: [0, 127, 0, 0],
            filter_level: [0; 4],
        }),
        tree_probs: [128; 3],
    };
    let key = FrameSpec {
        segmentation: Some(segmentation),
        ..keyframe_with(
            32,
            16,
            vec![
                MacroblockSpec::intra(IntraPred::Dc, IntraPred::Dc),
                dc_with(1).with_segment(1),
            ],
        )
    };
    // 不更新分段图, 右宏块沿用段 1
    let inter = FrameSpec {
        segmentation: Some(SegmentationSpec {
            update_map: false,
            data: None,
            tree_probs: [255; 3],
        }),
        ..inter_with(vec![
            MacroblockSpec::intra(IntraPred::Dc, IntraPred::Dc),
            dc_with(1),
        ])
    };

    let frames = decode_stream(&[key, inter]);
    for frame in frames.iter().map(|f| f.as_ref().expect("应输出")) {
        assert_eq!(luma_at(frame, 0, 0), 128);
        assert_eq!(luma_at(frame, 20, 5), 133, "314 -> 39 -> 5");
    }
}

#[test]
fn test_关键帧重置滤波增量() {
    let first = FrameSpec {
        filter_level: 20,
        filter_deltas: Some(FilterDeltaSpec {
            update: Some(([-20, 0, 0, 0], [0; 4])),
        }),
        ..keyframe_with(32, 16, vec![dc_with(100), dc_with(100)])
    };
    let second = FrameSpec {
        filter_level: 20,
        filter_deltas: Some(FilterDeltaSpec { update: None }),
        ..keyframe_with(32, 16, vec![dc_with(100), dc_with(100)])
    };

    let frames = decode_stream(&[first.clone(), second.clone()]);
    let unfiltered = frames[0].as_ref().expect("应输出");
    assert_eq!(luma_at(unfiltered, 15, 0), 141, "增量把级别降到 0");

    let after = frames[1].as_ref().expect("应输出");
    assert_eq!(luma_at(after, 15, 0), 146, "增量已被关键帧清零");

    init_logging();
    let data = write_stream(&[first, second]);
    let mut fresh = Vp8Decoder::new();
    let alone = fresh.decode_frame(&data[1]).unwrap().expect("应输出");
    assert_eq!(after.data, alone.data);
}

// ============================================================
// 帧间帧
// ============================================================

#[test]
fn test_帧间零运动复制上一帧() {
    let frames = decode_stream(&[
        keyframe_with(16, 16, vec![dc_with(100)]),
        FrameSpec::inter(),
        inter_with(vec![MacroblockSpec::inter(Reference::Last, Motion::Zero)
            .with_residual(Residual::y2_dc(50))]),
    ]);
    let second = frames[1].as_ref().expect("应输出");
    assert!(!second.is_keyframe);
    assert_eq!(second.picture_type, PictureType::P);
    assert_plane_filled(second, 0, 141, "零运动无残差");
    assert_plane_filled(frames[2].as_ref().expect("应输出"), 0, 147, "141 + 6");
}

#[test]
fn test_new_运动矢量整像素() {
    let frames = decode_stream(&[
        two_step_keyframe(0),
        inter_with(vec![
            MacroblockSpec::inter(Reference::Last, Motion::New(64, 0)),
            MacroblockSpec::inter(Reference::Last, Motion::Zero),
        ]),
    ]);
    let frame = frames[1].as_ref().expect("应输出");
    assert_plane_filled(frame, 0, 154, "左宏块取右侧 16 像素处");
    assert_plane_filled(frame, 2, 128, "色度");
}

#[test]
fn test_split_quarters() {
    // 参考帧按宏块取值: (0,0)=141 (1,0)=154 (0,1)=147 (1,1)=151
    let key = keyframe_with(
        32,
        32,
        vec![
            dc_with(100),
            dc_with(100),
            dc_with(50),
            MacroblockSpec::intra(IntraPred::Dc, IntraPred::Dc),
        ],
    );
    let split = Motion::Split(
        SplitLayout::Quarters,
        vec![(64, 0), (0, 64), (64, 64), (0, 0)],
    );
    let frames = decode_stream(&[
        key,
        inter_with(vec![
            MacroblockSpec::inter(Reference::Last, split),
            MacroblockSpec::inter(Reference::Last, Motion::Zero),
            MacroblockSpec::inter(Reference::Last, Motion::Zero),
            MacroblockSpec::inter(Reference::Last, Motion::Zero),
        ]),
    ]);

    let reference = frames[0].as_ref().expect("应输出关键帧");
    for (x, y, expected) in [(0, 0, 141), (16, 0, 154), (0, 16, 147), (16, 16, 151)] {
        assert_eq!(luma_at(reference, x, y), expected, "参考帧宏块 ({}, {})", x / 16, y / 16);
    }

    let frame = frames[1].as_ref().expect("应输出");
    // (分区左上角, 期望值): 水平 16 / 垂直 16 / 对角 16 / 零运动
    for (qx, qy, expected) in [(0, 0, 154), (8, 0, 147), (0, 8, 151), (8, 8, 141)] {
        for y in qy..qy + 8 {
            let row = luma_row(frame, y);
            assert!(
                row[qx..qx + 8].iter().all(|&p| p == expected),
                "分区 ({}, {}) 第 {} 行应为 {}, 实际 {:?}",
                qx,
                qy,
                y,
                expected,
                &row[qx..qx + 8]
            );
        }
    }
    assert_eq!(luma_at(frame, 20, 4), 154, "零运动宏块保持参考值");
    assert_eq!(luma_at(frame, 20, 20), 151);
    assert_plane_filled(frame, 1, 128, "色度");
}

#[test]
fn test_profile_3_平坦帧运动补偿() {
    let key = FrameSpec {
        profile: 3,
        ..keyframe_with(16, 16, vec![dc_with(100)])
    };
    let inter = FrameSpec {
        profile: 3,
        ..inter_with(vec![MacroblockSpec::inter(Reference::Last, Motion::New(6, -2))])
    };
    let frames = decode_stream(&[key, inter]);
    let frame = frames[1].as_ref().expect("应输出");
    assert_plane_filled(frame, 0, 141, "双线性插值平坦区域");
    assert_plane_filled(frame, 1, 128, "整像素色度");
}

#[test]
fn test_golden_altref_交换() {
    let frames = decode_stream(&[
        FrameSpec::keyframe(16, 16),
        FrameSpec {
            refresh_golden: true,
            refresh_last: false,
            ..inter_with(vec![dc_with(100)])
        },
        FrameSpec {
            refresh_altref: true,
            refresh_last: false,
            ..inter_with(vec![dc_with(50)])
        },
        FrameSpec {
            copy_to_golden: 2,
            copy_to_altref: 2,
            refresh_last: false,
            ..FrameSpec::inter()
        },
        inter_with(vec![MacroblockSpec::inter(Reference::Golden, Motion::Zero)]),
        inter_with(vec![MacroblockSpec::inter(Reference::AltRef, Motion::Zero)]),
    ]);
    let luma: Vec<u8> = frames
        .iter()
        .map(|f| luma_at(f.as_ref().expect("应输出"), 7, 7))
        .collect();
    assert_eq!(luma, vec![128, 141, 134, 128, 134, 141]);
}

#[test]
fn test_不可见帧仍更新参考() {
    let frames = decode_stream(&[
        FrameSpec::keyframe(16, 16),
        FrameSpec {
            show_frame: false,
            ..inter_with(vec![dc_with(100)])
        },
        FrameSpec::inter(),
    ]);
    assert!(frames[1].is_none());
    assert_plane_filled(frames[2].as_ref().expect("应输出"), 0, 141, "沿用不可见帧");
}

#[test]
fn test_概率更新回滚() {
    let frames = decode_stream(&[
        FrameSpec::keyframe(16, 16),
        FrameSpec {
            refresh_entropy: false,
            token_updates: vec![(1, 0, 0, 0, 1), (2, 1, 0, 1, 200)],
            ..inter_with(vec![dc_with(100)])
        },
        inter_with(vec![dc_with(50)]),
    ]);
    assert_plane_filled(frames[1].as_ref().expect("应输出"), 0, 141, "使用更新后的概率");
    assert_plane_filled(frames[2].as_ref().expect("应输出"), 0, 134, "概率已恢复");
}

// ============================================================
// 错误与状态
// ============================================================

#[test]
fn test_关键帧之前的帧间帧() {
    init_logging();
    let data = write_stream(&[FrameSpec::inter()]);
    let mut dec = Vp8Decoder::new();
    let err = dec.decode_frame(&data[0]).unwrap_err();
    assert!(matches!(err, Vp8Error::MissingReference(_)), "实际: {}", err);
    assert!(dec.layout().is_none());
}

#[test]
fn test_损坏帧不影响后续解码() {
    init_logging();
    let data = write_stream(&[keyframe_with(16, 16, vec![dc_with(100)]), FrameSpec::inter()]);
    let mut dec = Vp8Decoder::new();
    dec.decode_frame(&data[0]).unwrap();
    let roles = dec.references();

    let truncated = &data[1][..2];
    assert!(dec.decode_frame(truncated).unwrap_err().is_corrupt_input());
    assert_eq!(dec.references(), roles);

    let frame = dec.decode_frame(&data[1]).unwrap().expect("应输出");
    assert_plane_filled(&frame, 0, 141, "损坏帧之后");
}

#[test]
fn test_skip_frame_all() {
    init_logging();
    let data = write_stream(&[FrameSpec::keyframe(16, 16), FrameSpec::inter()]);
    let mut dec = Vp8Decoder::new();
    dec.set_config(Vp8DecoderConfig {
        skip_frame: Discard::All,
        ..Vp8DecoderConfig::default()
    });
    assert!(dec.decode_frame(&data[0]).unwrap().is_none());
    assert!(!dec.references().is_complete(), "丢弃的关键帧不建立参考");
    assert!(matches!(
        dec.decode_frame(&data[1]),
        Err(Vp8Error::MissingReference(_))
    ));
}

#[test]
fn test_skip_frame_nonkey() {
    init_logging();
    let data = write_stream(&[
        FrameSpec::keyframe(16, 16),
        inter_with(vec![dc_with(100)]),
        FrameSpec::inter(),
    ]);
    let mut dec = Vp8Decoder::new();
    dec.set_config(Vp8DecoderConfig {
        skip_frame: Discard::NonKey,
        ..Vp8DecoderConfig::default()
    });
    assert!(dec.decode_frame(&data[0]).unwrap().is_some(), "关键帧不受 NonKey 影响");
    assert!(dec.decode_frame(&data[1]).unwrap().is_none());

    dec.set_config(Vp8DecoderConfig::default());
    let frame = dec.decode_frame(&data[2]).unwrap().expect("应输出");
    assert_plane_filled(&frame, 0, 128, "被丢弃的帧没有成为上一帧");
}

#[test]
fn test_skip_frame_nonref() {
    init_logging();
    let data = write_stream(&[
        FrameSpec::keyframe(16, 16),
        FrameSpec {
            refresh_last: false,
            ..inter_with(vec![dc_with(100)])
        },
        inter_with(vec![dc_with(50)]),
    ]);
    let mut dec = Vp8Decoder::new();
    dec.set_config(Vp8DecoderConfig {
        skip_frame: Discard::NonRef,
        ..Vp8DecoderConfig::default()
    });
    dec.decode_frame(&data[0]).unwrap();
    assert!(dec.decode_frame(&data[1]).unwrap().is_none(), "不被参考的帧");
    let frame = dec.decode_frame(&data[2]).unwrap().expect("被参考的帧照常解码");
    assert_plane_filled(&frame, 0, 134, "帧内宏块");
}

/// 宽度超过上限时分配失败
struct LimitedAllocator {
    max_width: u32,
}

impl FrameAllocator for LimitedAllocator {
    fn allocate(&mut self, layout: &FrameLayout) -> Vp8Result<FrameBuffer> {
        if layout.width > self.max_width {
            return Err(Vp8Error::OutOfMemory(format!("宽度 {}", layout.width)));
        }
        FrameBuffer::try_new(layout)
    }
}

/// 总是返回 16x16 缓冲
struct FixedAllocator;

impl FrameAllocator for FixedAllocator {
    fn allocate(&mut self, _layout: &FrameLayout) -> Vp8Result<FrameBuffer> {
        FrameBuffer::try_new(&FrameLayout::new(16, 16))
    }
}

#[test]
fn test_分配失败保持状态() {
    init_logging();
    let stream = write_stream(&[keyframe_with(16, 16, vec![dc_with(100)]), FrameSpec::inter()]);
    let wide = write_stream(&[FrameSpec::keyframe(32, 16)]);

    let mut dec = Vp8Decoder::new();
    dec.set_allocator(Box::new(LimitedAllocator { max_width: 16 }));
    dec.decode_frame(&stream[0]).unwrap();
    let roles = dec.references();

    let err = dec.decode_frame(&wide[0]).unwrap_err();
    assert!(matches!(err, Vp8Error::OutOfMemory(_)), "实际: {}", err);
    assert_eq!(dec.layout(), Some(FrameLayout::new(16, 16)));
    assert_eq!(dec.references(), roles);

    let frame = dec.decode_frame(&stream[1]).unwrap().expect("应输出");
    assert_eq!(frame.width, 16);
    assert_plane_filled(&frame, 0, 141, "分配失败之后");
}

#[test]
fn test_分配器返回错误尺寸() {
    init_logging();
    let wide = write_stream(&[FrameSpec::keyframe(32, 16)]);
    let mut dec = Vp8Decoder::new();
    dec.set_allocator(Box::new(FixedAllocator));
    let err = dec.decode_frame(&wide[0]).unwrap_err();
    assert!(matches!(err, Vp8Error::InvalidArgument(_)), "实际: {}", err);
    assert!(dec.layout().is_none());
}

#[test]
fn test_参考槽位() {
    init_logging();
    let data = write_stream(&[
        keyframe_with(16, 16, vec![dc_with(100)]),
        FrameSpec {
            refresh_golden: true,
            ..inter_with(vec![dc_with(50)])
        },
    ]);
    let mut dec = Vp8Decoder::new();
    for packet in &data {
        dec.decode_frame(packet).unwrap();
    }
    let roles = dec.references();
    assert!(roles.is_complete());
    assert_eq!(roles.previous, roles.golden);
    assert_ne!(roles.previous, roles.altref);

    let golden = roles.golden.and_then(|slot| dec.reference_slot(slot)).expect("golden 槽位");
    assert_eq!(golden.plane(0).row(3)[3], 134);
    let altref = roles.altref.and_then(|slot| dec.reference_slot(slot)).expect("altref 槽位");
    assert_eq!(altref.plane(0).row(3)[3], 141);
}

// ============================================================
// Decoder trait
// ============================================================

#[test]
fn test_decoder_trait_收发流程() {
    init_logging();
    let data = write_stream(&[keyframe_with(16, 16, vec![dc_with(100)]), FrameSpec::inter()]);
    let mut dec = Vp8Decoder::create().unwrap();
    assert_eq!(dec.codec_id(), CodecId::Vp8);
    assert_eq!(dec.name(), "vp8");

    let early = dec.send_packet(&Packet::from_data(data[0].clone()));
    assert!(matches!(early, Err(Vp8Error::InvalidArgument(_))), "未打开时拒绝数据");

    assert!(dec.open(&CodecParameters::video_hint(CodecId::None, 16, 16)).is_err());
    dec.open(&CodecParameters::video_hint(CodecId::Vp8, 16, 16)).unwrap();

    let time_base = Rational::new(1, 30);
    let mut packet = Packet::from_data(data[0].clone()).with_pts(5, time_base);
    packet.duration = 1;
    dec.send_packet(&packet).unwrap();

    let Frame::Video(frame) = dec.receive_frame().unwrap();
    assert_eq!(frame.pts, 5);
    assert_eq!(frame.time_base, time_base);
    assert_eq!(frame.duration, 1);
    assert_plane_filled(&frame, 0, 141, "关键帧");
    assert!(matches!(dec.receive_frame(), Err(Vp8Error::NeedMoreData)));

    dec.send_packet(&Packet::empty()).unwrap();
    assert!(matches!(dec.receive_frame(), Err(Vp8Error::Eof)));

    // flush 清空参考帧, 之后必须从关键帧开始
    dec.flush();
    let err = dec.send_packet(&Packet::from_data(data[1].clone())).unwrap_err();
    assert!(matches!(err, Vp8Error::MissingReference(_)), "实际: {}", err);
    dec.send_packet(&Packet::from_data(data[0].clone())).unwrap();
    assert!(dec.receive_frame().is_ok());
}
