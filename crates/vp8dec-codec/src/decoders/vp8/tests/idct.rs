use super::super::idct::{add_residual, inverse_dct};

#[test]
fn test_inverse_dct_仅直流() {
    let mut input = [0i16; 16];
    input[0] = 80;
    assert_eq!(inverse_dct(&input), [10; 16]);

    input[0] = -37;
    assert_eq!(inverse_dct(&input), [-5; 16], "负数按算术右移向下取整");
}

#[test]
fn test_inverse_dct_水平交流分量() {
    let mut input = [0i16; 16];
    input[1] = 64;
    let out = inverse_dct(&input);
    for row in out.chunks(4) {
        assert_eq!(row, &[10, 4, -4, -10]);
    }
}

#[test]
fn test_add_residual_零块不修改() {
    let mut dst = [7u8; 4 * 8];
    add_residual(&[0; 16], &mut dst, 0, 8);
    assert_eq!(dst, [7u8; 32]);
}

#[test]
fn test_add_residual_直流快速路径与钳位() {
    let mut coeffs = [0i16; 16];
    coeffs[0] = 80;

    let stride = 6;
    let mut dst = [100u8; 6 * 5];
    add_residual(&coeffs, &mut dst, stride + 1, stride);
    for y in 0..5 {
        for x in 0..6 {
            let inside = (1..5).contains(&y) && (1..5).contains(&x);
            let expected = if inside { 110 } else { 100 };
            assert_eq!(dst[y * stride + x], expected, "({}, {})", x, y);
        }
    }

    let mut bright = [250u8; 16];
    add_residual(&coeffs, &mut bright, 0, 4);
    assert_eq!(bright, [255u8; 16], "结果钳位到 255");
}

#[test]
fn test_add_residual_直流路径与完整变换一致() {
    for dc in [-300i16, -37, -4, 3, 5, 1000] {
        let mut coeffs = [0i16; 16];
        coeffs[0] = dc;
        let residual = inverse_dct(&coeffs);

        let mut dst = [128u8; 16];
        add_residual(&coeffs, &mut dst, 0, 4);
        for (i, &p) in dst.iter().enumerate() {
            let expected = (128 + i32::from(residual[i])).clamp(0, 255) as u8;
            assert_eq!(p, expected, "DC {} 位置 {}", dc, i);
        }
    }
}
