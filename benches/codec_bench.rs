//! vp8dec 性能基准测试.
//!
//! 码流由合成写入器生成: 系数密集的关键帧主要衡量熵解码,
//! 带运动矢量的帧间帧衡量运动补偿与环路滤波.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use vp8dec::codec::decoders::vp8::Vp8Decoder;
use vp8dec::codec::decoders::vp8::stream_writer::{
    FrameSpec, IntraPred, LumaPred, MacroblockSpec, Motion, Prediction, Reference, Residual,
    StreamWriter, SubblockPred,
};

const WIDTH: u16 = 640;
const HEIGHT: u16 = 480;
const MB_COUNT: usize = (WIDTH as usize / 16) * (HEIGHT as usize / 16);

/// 简单线性同余序列, 保证每次生成相同码流
struct Lcg(u32);

impl Lcg {
    fn next(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        self.0 >> 16
    }

    fn coeff(&mut self) -> i16 {
        match self.next() % 8 {
            0..=3 => 0,
            4 | 5 => (self.next() % 5) as i16 - 2,
            _ => (self.next() % 61) as i16 - 30,
        }
    }
}

const SUBBLOCK_MODES: [SubblockPred; 10] = [
    SubblockPred::Dc,
    SubblockPred::Tm,
    SubblockPred::Ve,
    SubblockPred::He,
    SubblockPred::Ld,
    SubblockPred::Rd,
    SubblockPred::Vr,
    SubblockPred::Vl,
    SubblockPred::Hd,
    SubblockPred::Hu,
];

fn dense_residual(rng: &mut Lcg) -> Residual {
    let mut residual = Residual::default();
    for block in residual.blocks.iter_mut() {
        for c in block.iter_mut() {
            *c = rng.coeff();
        }
    }
    residual
}

fn dense_keyframe(rng: &mut Lcg) -> FrameSpec {
    let macroblocks = (0..MB_COUNT)
        .map(|_| {
            let modes: [SubblockPred; 16] =
                std::array::from_fn(|_| SUBBLOCK_MODES[rng.next() as usize % 10]);
            MacroblockSpec {
                prediction: Prediction::Intra {
                    luma: LumaPred::Subblocks(modes),
                    chroma: IntraPred::Tm,
                },
                segment: 0,
                residual: Some(dense_residual(rng)),
            }
        })
        .collect();
    FrameSpec {
        q_index: 40,
        filter_level: 24,
        log2_partitions: 2,
        macroblocks,
        ..FrameSpec::keyframe(WIDTH, HEIGHT)
    }
}

fn motion_interframe(rng: &mut Lcg) -> FrameSpec {
    let macroblocks = (0..MB_COUNT)
        .map(|i| {
            let motion = match i % 4 {
                0 => Motion::Zero,
                1 => Motion::Nearest,
                _ => Motion::New((rng.next() % 65) as i16 - 32, (rng.next() % 65) as i16 - 32),
            };
            let mb = MacroblockSpec::inter(Reference::Last, motion);
            if i % 3 == 0 {
                mb.with_residual(Residual::y2_dc((rng.next() % 41) as i16 - 20))
            } else {
                mb
            }
        })
        .collect();
    FrameSpec {
        q_index: 40,
        filter_level: 24,
        macroblocks,
        ..FrameSpec::inter()
    }
}

fn bench_keyframe_decode(c: &mut Criterion) {
    let mut rng = Lcg(1);
    let packet = StreamWriter::new().write_frame(&dense_keyframe(&mut rng));

    c.bench_function("vp8_keyframe_dense_640x480", |b| {
        b.iter(|| {
            let mut decoder = Vp8Decoder::new();
            let frame = decoder.decode_frame(black_box(&packet)).unwrap();
            black_box(frame);
        });
    });
}

fn bench_interframe_decode(c: &mut Criterion) {
    let mut rng = Lcg(7);
    let mut writer = StreamWriter::new();
    let keyframe = writer.write_frame(&dense_keyframe(&mut rng));
    let interframe = writer.write_frame(&motion_interframe(&mut rng));

    c.bench_function("vp8_interframe_motion_640x480", |b| {
        let mut decoder = Vp8Decoder::new();
        decoder.decode_frame(&keyframe).unwrap();
        b.iter(|| {
            // refresh_last 使每次都以上一次的输出为参考, 解码量不变
            let frame = decoder.decode_frame(black_box(&interframe)).unwrap();
            black_box(frame);
        });
    });
}

criterion_group!(benches, bench_keyframe_decode, bench_interframe_decode);
criterion_main!(benches);
