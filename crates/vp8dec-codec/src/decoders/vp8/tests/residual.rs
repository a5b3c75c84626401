use super::super::header::QuantIndices;
use super::super::modes::{MacroblockInfo, MbMode};
use super::super::quant::Dequant;
use super::super::range_coder::RangeDecoder;
use super::super::residual::{
    CoeffContext, MacroblockCoeffs, decode_macroblock_coeffs, inverse_wht,
};
use super::super::stream_writer::{BoolEncoder, write_block};
use super::super::tables::DEFAULT_COEFF_PROBS;

/// 平面类型: 带 DC 的亮度 / 色度
const PLANE_Y_WITH_DC: usize = 3;
const PLANE_CHROMA: usize = 2;

#[test]
fn test_inverse_wht_仅直流() {
    let mut input = [0i16; 16];
    input[0] = 80;
    assert_eq!(inverse_wht(&input), [10; 16]);
}

#[test]
fn test_inverse_wht_水平分量() {
    let mut input = [0i16; 16];
    input[0] = 16;
    input[1] = 16;
    let out = inverse_wht(&input);
    for row in out.chunks(4) {
        assert_eq!(row, &[4, 4, 0, 0]);
    }
}

/// 按解码顺序写出一个 4x4 帧内宏块 (无 Y2) 的全部块, 上下文均从 0 开始
fn write_bpred_macroblock(luma0: &[i16; 16]) -> Vec<u8> {
    let probs = &DEFAULT_COEFF_PROBS;
    let empty = [0i16; 16];
    let mut enc = BoolEncoder::new();
    let nz = write_block(&mut enc, &probs[PLANE_Y_WITH_DC], 0, 0, luma0);
    let flag = usize::from(nz);
    for block in 1..16 {
        // 块 1 的左邻与块 4 的上邻是块 0
        let ctx = if block == 1 || block == 4 { flag } else { 0 };
        write_block(&mut enc, &probs[PLANE_Y_WITH_DC], ctx, 0, &empty);
    }
    for _ in 0..8 {
        write_block(&mut enc, &probs[PLANE_CHROMA], 0, 0, &empty);
    }
    enc.finish()
}

fn decode_bpred(data: &[u8]) -> (MacroblockInfo, MacroblockCoeffs) {
    let mut rd = RangeDecoder::new(data);
    let mut mb = MacroblockInfo {
        mode: MbMode::Intra4x4,
        ..MacroblockInfo::default()
    };
    let mut ctx = CoeffContext::try_new(1).expect("分配上下文");
    let mut coeffs = MacroblockCoeffs::default();
    let dequant = Dequant::from_index(0, &QuantIndices::default());
    decode_macroblock_coeffs(
        &mut rd,
        &DEFAULT_COEFF_PROBS,
        &dequant,
        &mut mb,
        &mut ctx,
        0,
        &mut coeffs,
    );
    (mb, coeffs)
}

#[test]
fn test_decode_coeffs_各类token() {
    let mut levels = [0i16; 16];
    levels[0] = 3;
    levels[1] = -1;
    levels[4] = 2;
    levels[5] = 100;
    levels[10] = -20;
    levels[15] = 5;

    let (mb, coeffs) = decode_bpred(&write_bpred_macroblock(&levels));
    assert!(!mb.skip, "含非零系数的宏块不应标记跳过");
    let expected: [i16; 16] = std::array::from_fn(|i| levels[i] * 4);
    assert_eq!(coeffs.blocks[0], expected, "系数应按光栅位置乘量化步长 4");
    assert!(coeffs.blocks[1..].iter().all(|b| *b == [0; 16]));
}

#[test]
fn test_decode_coeffs_全零宏块标记跳过() {
    let (mb, coeffs) = decode_bpred(&write_bpred_macroblock(&[0; 16]));
    assert!(mb.skip, "解码出零个系数时改标记为跳过");
    assert!(coeffs.blocks.iter().all(|b| *b == [0; 16]));
}

#[test]
fn test_decode_coeffs_跳过宏块不读码流() {
    let mut rd = RangeDecoder::new(&[0xff; 8]);
    let mut mb = MacroblockInfo {
        skip: true,
        ..MacroblockInfo::default()
    };
    let mut ctx = CoeffContext::try_new(1).expect("分配上下文");
    let mut coeffs = MacroblockCoeffs::default();
    coeffs.blocks[3][0] = 99;
    let dequant = Dequant::from_index(0, &QuantIndices::default());
    decode_macroblock_coeffs(
        &mut rd,
        &DEFAULT_COEFF_PROBS,
        &dequant,
        &mut mb,
        &mut ctx,
        0,
        &mut coeffs,
    );
    assert!(coeffs.blocks.iter().all(|b| *b == [0; 16]), "跳过宏块的系数应清零");
    assert!(rd.read_flag(), "跳过宏块不应消耗码流");
}
