//! 频带能量估计.

use super::{FrameDuration, SampleRate, num_bands, tables};

/// 计算各频带平均能量, 返回近奈奎斯特标志
///
/// 最高几个频带的能量超过其余频带 30 倍时置位, 此时编码端关闭 TNS 与 LTPF.
pub fn compute(dt: FrameDuration, sr: SampleRate, x: &[f32], e: &mut [f32]) -> bool {
    let lim = tables::band_limits(dt, sr);
    let nb = num_bands(dt, sr);

    for b in 0..nb {
        let band = &x[lim[b]..lim[b + 1]];
        let sum: f32 = band.iter().map(|v| v * v).sum();
        e[b] = sum / band.len() as f32;
    }

    let tail = match dt {
        FrameDuration::Ms10 => 2,
        _ => 4,
    };
    let low: f32 = e[..nb - tail].iter().sum();
    let high: f32 = e[nb - tail..nb].iter().sum();
    high > 30.0 * low
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lc3::num_coeffs;

    #[test]
    fn test_平坦频谱() {
        let (dt, sr) = (FrameDuration::Ms10, SampleRate::Hz16000);
        let x = vec![2.0f32; num_coeffs(dt, sr)];
        let mut e = [0.0f32; 64];
        let nn = compute(dt, sr, &x, &mut e);
        assert!(!nn);
        assert!(e.iter().all(|&v| (v - 4.0).abs() < 1e-5));
    }

    #[test]
    fn test_近奈奎斯特标志() {
        let (dt, sr) = (FrameDuration::Ms10, SampleRate::Hz48000);
        let ne = num_coeffs(dt, sr);
        let mut x = vec![0.01f32; ne];
        let lim = tables::band_limits(dt, sr);
        for v in &mut x[lim[62]..] {
            *v = 1000.0;
        }
        let mut e = [0.0f32; 64];
        assert!(compute(dt, sr, &x, &mut e));
    }
}
