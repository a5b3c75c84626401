use vp8dec_core::Vp8Error;
use vp8dec_core::color::ColorSpace;

use super::super::header::{
    FilterType, PersistentState, ProbabilityContext, parse_frame_header, parse_frame_tag,
};
use super::super::stream_writer::{
    FilterDeltaSpec, FrameSpec, SegmentData, SegmentationSpec, StreamWriter,
};
use super::super::tables::{DEFAULT_COEFF_PROBS, DEFAULT_YMODE_PROBS};

fn keyframe_bytes(spec: &FrameSpec) -> Vec<u8> {
    StreamWriter::new().write_frame(spec)
}

fn assert_invalid_data(data: &[u8], what: &str) {
    match parse_frame_tag(data) {
        Err(Vp8Error::InvalidData(_)) => {}
        other => panic!("{}: 期望 InvalidData, 实际 {:?}", what, other),
    }
}

// ============================================================
// 帧标签
// ============================================================

#[test]
fn test_frame_tag_关键帧尺寸() {
    let data = keyframe_bytes(&FrameSpec::keyframe(176, 144));
    let tag = parse_frame_tag(&data).expect("帧标签应有效");
    assert!(tag.keyframe);
    assert!(tag.show_frame);
    assert_eq!(tag.profile, 0);
    assert_eq!((tag.width, tag.height), (176, 144));
    assert_eq!(tag.header_len(), 10);
    assert!(tag.first_part_size > 0 && tag.first_part_size <= data.len() - 10);
}

#[test]
fn test_frame_tag_缩放位只记录不影响尺寸() {
    let spec = FrameSpec {
        horizontal_scale: 2,
        vertical_scale: 1,
        ..FrameSpec::keyframe(64, 48)
    };
    let tag = parse_frame_tag(&keyframe_bytes(&spec)).expect("帧标签应有效");
    assert_eq!((tag.width, tag.height), (64, 48));
    assert_eq!((tag.horizontal_scale, tag.vertical_scale), (2, 1));
}

#[test]
fn test_frame_tag_profile_插值选择() {
    for (profile, bilinear, full_pixel) in [(0, false, false), (1, true, false), (3, true, true)] {
        let spec = FrameSpec {
            profile,
            ..FrameSpec::keyframe(16, 16)
        };
        let tag = parse_frame_tag(&keyframe_bytes(&spec)).expect("帧标签应有效");
        assert_eq!(tag.profile, profile);
        assert_eq!(tag.uses_bilinear(), bilinear, "profile {}", profile);
        assert_eq!(tag.full_pixel_chroma(), full_pixel, "profile {}", profile);
    }
}

#[test]
fn test_frame_tag_截断与损坏() {
    assert_invalid_data(&[0x00, 0x01], "不足 3 字节");

    let data = keyframe_bytes(&FrameSpec::keyframe(16, 16));
    assert_invalid_data(&data[..8], "关键帧不足 10 字节");

    let mut bad = data.clone();
    bad[3] = 0x9c;
    assert_invalid_data(&bad, "起始码错误");

    assert_invalid_data(&data[..12], "第一分区超出数据长度");

    let zero = keyframe_bytes(&FrameSpec::keyframe(0, 16));
    assert_invalid_data(&zero, "宽度为 0");
}

#[test]
fn test_frame_tag_未知profile() {
    // 帧间帧, profile 5, 可显示, 第一分区大小 0
    let data = [0x01 | (5 << 1) | 0x10, 0, 0];
    match parse_frame_tag(&data) {
        Err(Vp8Error::Unsupported(_)) => {}
        other => panic!("期望 Unsupported, 实际 {:?}", other),
    }
}

// ============================================================
// 压缩帧头
// ============================================================

#[test]
fn test_frame_header_分段与滤波参数() {
    let spec = FrameSpec {
        segmentation: Some(SegmentationSpec {
            update_map: true,
            data: Some(SegmentData {
                absolute: true,
                quant: [10, 20, -30, 0],
                filter_level: [1, -2, 3, 63],
            }),
            tree_probs: [200, 255, 100],
        }),
        simple_filter: true,
        filter_level: 33,
        sharpness: 5,
        filter_deltas: Some(FilterDeltaSpec {
            update: Some(([1, 2, -3, 4], [-5, 6, 7, -8])),
        }),
        q_index: 60,
        q_deltas: [1, -2, 3, -4, 5],
        ..FrameSpec::keyframe(32, 32)
    };
    let data = keyframe_bytes(&spec);
    let tag = parse_frame_tag(&data).expect("帧标签应有效");
    let mut state = PersistentState::default();
    let (header, _) = parse_frame_header(&data, tag, &mut state).expect("帧头应有效");

    let seg = &state.segmentation;
    assert!(seg.enabled && seg.update_map && seg.update_data && seg.absolute_values);
    assert_eq!(seg.quant, [10, 20, -30, 0]);
    assert_eq!(seg.filter_level, [1, -2, 3, 63]);
    assert_eq!(seg.tree_probs, [200, 255, 100], "未给出的树概率取 255");

    assert_eq!(header.filter_type, FilterType::Simple);
    assert_eq!((header.filter_level, header.sharpness), (33, 5));
    assert!(state.lf_deltas.enabled);
    assert_eq!(state.lf_deltas.ref_frame, [1, 2, -3, 4]);
    assert_eq!(state.lf_deltas.mode, [-5, 6, 7, -8]);

    let q = header.quant;
    assert_eq!(q.y_ac, 60);
    assert_eq!(
        [q.y_dc_delta, q.y2_dc_delta, q.y2_ac_delta, q.uv_dc_delta, q.uv_ac_delta],
        [1, -2, 3, -4, 5]
    );
    assert_eq!(header.color_space, ColorSpace::Bt470bg);
}

#[test]
fn test_frame_header_保留色彩空间() {
    let spec = FrameSpec {
        color_space_bit: true,
        ..FrameSpec::keyframe(16, 16)
    };
    let data = keyframe_bytes(&spec);
    let tag = parse_frame_tag(&data).expect("帧标签应有效");
    let (header, _) =
        parse_frame_header(&data, tag, &mut PersistentState::default()).expect("帧头应有效");
    assert_eq!(header.color_space, ColorSpace::Reserved);
}

#[test]
fn test_frame_header_分区表() {
    let spec = FrameSpec {
        log2_partitions: 2,
        ..FrameSpec::keyframe(16, 64)
    };
    let data = keyframe_bytes(&spec);
    let tag = parse_frame_tag(&data).expect("帧标签应有效");
    let (header, _) =
        parse_frame_header(&data, tag, &mut PersistentState::default()).expect("帧头应有效");

    let first_end = 10 + tag.first_part_size;
    assert_eq!(header.partitions.len(), 4);
    assert_eq!(header.partitions[0].start, first_end + 9, "分区数据紧跟 3 个大小字段");
    for pair in header.partitions.windows(2) {
        assert_eq!(pair[0].end, pair[1].start, "分区应首尾相接");
    }
    assert_eq!(header.partitions[3].end, data.len(), "最后一个分区延伸到数据末尾");
}

#[test]
fn test_frame_header_分区表损坏() {
    let spec = FrameSpec {
        log2_partitions: 3,
        ..FrameSpec::keyframe(16, 16)
    };
    let data = keyframe_bytes(&spec);
    let tag = parse_frame_tag(&data).expect("帧标签应有效");
    let first_end = 10 + tag.first_part_size;

    let truncated = &data[..first_end + 5];
    let tag = parse_frame_tag(truncated).expect("截断发生在第一分区之后");
    match parse_frame_header(truncated, tag, &mut PersistentState::default()) {
        Err(Vp8Error::InvalidData(msg)) => assert!(msg.contains("分区表被截断"), "{}", msg),
        other => panic!("期望分区表截断错误, 实际 {:?}", other.map(|_| ())),
    }

    let spec = FrameSpec {
        log2_partitions: 1,
        ..FrameSpec::keyframe(16, 16)
    };
    let mut data = keyframe_bytes(&spec);
    let tag = parse_frame_tag(&data).expect("帧标签应有效");
    let first_end = 10 + tag.first_part_size;
    data[first_end..first_end + 3].copy_from_slice(&[0xff, 0xff, 0xff]);
    match parse_frame_header(&data, tag, &mut PersistentState::default()) {
        Err(Vp8Error::InvalidData(msg)) => assert!(msg.contains("超出数据范围"), "{}", msg),
        other => panic!("期望分区越界错误, 实际 {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_frame_header_不刷新熵时保存快照() {
    let spec = FrameSpec {
        refresh_entropy: false,
        token_updates: vec![(0, 1, 0, 0, 77), (2, 3, 1, 4, 9)],
        ..FrameSpec::keyframe(16, 16)
    };
    let data = keyframe_bytes(&spec);
    let tag = parse_frame_tag(&data).expect("帧标签应有效");
    let mut state = PersistentState::default();
    state.probs.ymode = [1, 1, 1, 1];
    let (header, _) = parse_frame_header(&data, tag, &mut state).expect("帧头应有效");

    assert_eq!(state.probs.token[0][1][0][0], 77);
    assert_eq!(state.probs.token[2][3][1][4], 9);
    assert_eq!(state.probs.ymode, DEFAULT_YMODE_PROBS, "关键帧复位持久概率");
    let saved = header.saved_probs.expect("应保存概率快照");
    assert_eq!(saved, ProbabilityContext::default(), "快照取自复位之后、更新之前");
    assert_eq!(saved.token, DEFAULT_COEFF_PROBS);
}

#[test]
fn test_frame_header_帧间帧字段() {
    let mut writer = StreamWriter::new();
    let key = writer.write_frame(&FrameSpec::keyframe(32, 32));
    let inter_spec = FrameSpec {
        refresh_golden: false,
        copy_to_golden: 2,
        refresh_altref: true,
        sign_bias_altref: true,
        refresh_last: false,
        prob_intra: 50,
        prob_last: 60,
        prob_golden: 70,
        skip_prob: None,
        ymode_probs: Some([1, 2, 3, 4]),
        uv_mode_probs: Some([5, 6, 7]),
        mv_updates: vec![(0, 3, 0), (1, 5, 60)],
        ..FrameSpec::inter()
    };
    let inter = writer.write_frame(&inter_spec);

    let mut state = PersistentState::default();
    let tag = parse_frame_tag(&key).expect("关键帧标签");
    parse_frame_header(&key, tag, &mut state).expect("关键帧头");

    let tag = parse_frame_tag(&inter).expect("帧间帧标签");
    assert!(!tag.keyframe);
    assert_eq!(tag.header_len(), 3);
    let (header, _) = parse_frame_header(&inter, tag, &mut state).expect("帧间帧头");

    assert!(!header.refresh_golden && header.refresh_altref);
    assert_eq!((header.copy_to_golden, header.copy_to_altref), (2, 0));
    assert_eq!(header.sign_bias, [false, false, false, true]);
    assert!(!header.refresh_last);
    assert!(!header.skip_enabled);
    assert_eq!(
        (header.prob_intra, header.prob_last, header.prob_golden),
        (50, 60, 70)
    );
    assert_eq!(state.probs.ymode, [1, 2, 3, 4]);
    assert_eq!(state.probs.uv_mode, [5, 6, 7]);
    assert_eq!(state.probs.mv[0][3], 1, "7 位值 0 映射为概率 1");
    assert_eq!(state.probs.mv[1][5], 120);
}
