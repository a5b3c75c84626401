use super::super::frame_buffer::FrameBuffer;
use super::super::inter::{InterParams, McFilter, average_chroma_mv, predict_macroblock};
use super::super::modes::{MacroblockInfo, MbMode, MotionVector, Partitioning};
use super::super::references::RefFrame;

use super::helpers::buffer_from_fn;

fn new_mb(mv: MotionVector) -> MacroblockInfo {
    let mut mb = MacroblockInfo {
        mode: MbMode::New,
        ref_frame: RefFrame::Previous,
        mv,
        ..MacroblockInfo::default()
    };
    mb.bmv[0] = mv;
    mb
}

fn predict(reference: &FrameBuffer, mv: MotionVector, filter: McFilter) -> FrameBuffer {
    let mut dst = buffer_from_fn(32, 16, |_, _, _| 0);
    let params = InterParams {
        filter,
        full_pixel_chroma: false,
    };
    predict_macroblock(&mut dst, reference, &new_mb(mv), 0, 0, params);
    dst
}

/// 亮度为水平斜坡 4x + 10, 色度为常数 80
fn ramp() -> FrameBuffer {
    buffer_from_fn(32, 16, |plane, x, _| if plane == 0 { (4 * x + 10) as u8 } else { 80 })
}

#[test]
fn test_bilinear_半像素斜坡() {
    let reference = ramp();
    let dst = predict(&reference, MotionVector::new(2, 0), McFilter::Bilinear);
    for y in 0..16 {
        for x in 0..16 {
            assert_eq!(dst.plane(0).row(y)[x], (4 * x + 12) as u8, "({}, {})", x, y);
        }
    }
    for plane in 1..3 {
        assert!(dst.plane(plane).row(3)[..8].iter().all(|&p| p == 80), "常数色度不变");
    }
}

#[test]
fn test_sixtap_半像素斜坡() {
    let reference = ramp();
    let dst = predict(&reference, MotionVector::new(2, 0), McFilter::SixTap);
    for y in 0..16 {
        for x in 2..16 {
            assert_eq!(dst.plane(0).row(y)[x], (4 * x + 12) as u8, "({}, {})", x, y);
        }
    }
    assert!(dst.plane(1).row(7)[..8].iter().all(|&p| p == 80));
}

#[test]
fn test_整像素运动矢量() {
    let reference = buffer_from_fn(32, 16, |_, x, y| (x + 8 * y) as u8);
    for filter in [McFilter::SixTap, McFilter::Bilinear] {
        let dst = predict(&reference, MotionVector::new(8, 4), filter);
        let luma = dst.plane(0);
        for y in 0..16 {
            let src_y = (y + 1).min(15);
            for x in 0..16 {
                assert_eq!(luma.row(y)[x], (x + 2 + 8 * src_y) as u8, "{:?} ({}, {})", filter, x, y);
            }
        }
    }
}

#[test]
fn test_average_chroma_mv_舍入() {
    let mut mb = MacroblockInfo {
        mode: MbMode::Split,
        partitioning: Partitioning::Each4x4,
        ..MacroblockInfo::default()
    };
    mb.bmv = [MotionVector::new(3, -5); 16];
    assert_eq!(average_chroma_mv(&mb, 0, 0, false), MotionVector::new(3, -5));
    assert_eq!(average_chroma_mv(&mb, 1, 1, true), MotionVector::new(0, -8));

    // 左上 2x2 子块: 0, 1, 4, 5
    mb.bmv[0] = MotionVector::new(1, -1);
    mb.bmv[1] = MotionVector::new(1, -1);
    mb.bmv[4] = MotionVector::new(1, -1);
    mb.bmv[5] = MotionVector::new(0, 0);
    assert_eq!(average_chroma_mv(&mb, 0, 0, false), MotionVector::new(1, -1));
}
