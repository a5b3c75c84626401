//! 4x4 逆 DCT 与残差叠加.

/// cos(pi/8) * sqrt(2) - 1, Q16
const COS_PI8_SQRT2_MINUS1: i32 = 20091;
/// sin(pi/8) * sqrt(2), Q16
const SIN_PI8_SQRT2: i32 = 35468;

#[inline]
fn mul_cos(x: i32) -> i32 {
    x + ((x * COS_PI8_SQRT2_MINUS1) >> 16)
}

#[inline]
fn mul_sin(x: i32) -> i32 {
    (x * SIN_PI8_SQRT2) >> 16
}

#[inline]
fn clamp_pixel(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// 逆 DCT, 先列后行, 中间结果按 16 位存储
pub(super) fn inverse_dct(input: &[i16; 16]) -> [i16; 16] {
    let mut tmp = [0i16; 16];
    for i in 0..4 {
        let ip = |k: usize| i32::from(input[i + 4 * k]);
        let a1 = ip(0) + ip(2);
        let b1 = ip(0) - ip(2);
        let c1 = mul_sin(ip(1)) - mul_cos(ip(3));
        let d1 = mul_cos(ip(1)) + mul_sin(ip(3));
        tmp[i] = (a1 + d1) as i16;
        tmp[i + 12] = (a1 - d1) as i16;
        tmp[i + 4] = (b1 + c1) as i16;
        tmp[i + 8] = (b1 - c1) as i16;
    }

    let mut out = [0i16; 16];
    for i in 0..4 {
        let ip = |k: usize| i32::from(tmp[4 * i + k]);
        let a1 = ip(0) + ip(2);
        let b1 = ip(0) - ip(2);
        let c1 = mul_sin(ip(1)) - mul_cos(ip(3));
        let d1 = mul_cos(ip(1)) + mul_sin(ip(3));
        out[4 * i] = ((a1 + d1 + 4) >> 3) as i16;
        out[4 * i + 3] = ((a1 - d1 + 4) >> 3) as i16;
        out[4 * i + 1] = ((b1 + c1 + 4) >> 3) as i16;
        out[4 * i + 2] = ((b1 - c1 + 4) >> 3) as i16;
    }
    out
}

/// 将一个块的残差叠加到 `dst[pos..]` 处的 4x4 预测值上
///
/// 全零块不做任何事; 只有 DC 的块走快速路径, 结果与完整变换一致.
pub(super) fn add_residual(coeffs: &[i16; 16], dst: &mut [u8], pos: usize, stride: usize) {
    if coeffs[1..].iter().all(|&c| c == 0) {
        if coeffs[0] == 0 {
            return;
        }
        let dc = (i32::from(coeffs[0]) + 4) >> 3;
        for y in 0..4 {
            let row = &mut dst[pos + y * stride..pos + y * stride + 4];
            for p in row.iter_mut() {
                *p = clamp_pixel(i32::from(*p) + dc);
            }
        }
        return;
    }

    let residual = inverse_dct(coeffs);
    for y in 0..4 {
        let row = &mut dst[pos + y * stride..pos + y * stride + 4];
        for (x, p) in row.iter_mut().enumerate() {
            *p = clamp_pixel(i32::from(*p) + i32::from(residual[y * 4 + x]));
        }
    }
}
