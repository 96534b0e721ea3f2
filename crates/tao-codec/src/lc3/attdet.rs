//! 瞬态 (攻击) 检测.
//!
//! 仅在 32/48 kHz 且码率落在指定区间时启用. 信号先抽取到 16 kHz 并高通,
//! 再按 40 个采样分块比较能量.

use super::{FrameDuration, SampleRate, num_samples};

/// 检测器状态
#[derive(Debug, Clone, Default)]
pub struct AttackDetector {
    /// 抽取后信号的最后 2 个采样
    hist: [f32; 2],
    /// 上一块能量
    en1: f32,
    /// 上一块的平滑峰值能量
    an1: f32,
    /// 上一帧检测到攻击的块位置 (1 起, 0 为无)
    p_att: usize,
}

impl AttackDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 给定配置与帧字节数时是否启用
    pub fn enabled(dt: FrameDuration, sr_pcm: SampleRate, nbytes: usize) -> bool {
        match (dt, sr_pcm) {
            (FrameDuration::Ms7p5, SampleRate::Hz32000) => (61..=149).contains(&nbytes),
            (FrameDuration::Ms7p5, SampleRate::Hz48000) => (75..=149).contains(&nbytes),
            (FrameDuration::Ms10, SampleRate::Hz32000) => nbytes >= 81,
            (FrameDuration::Ms10, SampleRate::Hz48000) => nbytes >= 100,
            _ => false,
        }
    }

    /// 处理一帧 PCM 采样, 返回是否检测到攻击
    pub fn run(&mut self, dt: FrameDuration, sr_pcm: SampleRate, nbytes: usize, x: &[f32]) -> bool {
        if !Self::enabled(dt, sr_pcm, nbytes) {
            return false;
        }

        let nblk = dt.quarters();
        let factor = num_samples(dt, sr_pcm) / (nblk * 40);

        let mut p_att = 0;
        for blk in 0..nblk {
            let mut e = 0.0f32;
            for i in 0..40 {
                let base = (blk * 40 + i) * factor;
                let xd: f32 = x[base..base + factor].iter().sum();
                let xf = 0.375 * xd - 0.5 * self.hist[1] + 0.125 * self.hist[0];
                self.hist = [self.hist[1], xd];
                e += xf * xf;
            }

            let a = (0.25 * self.an1).max(self.en1);
            self.en1 = e;
            self.an1 = a;
            if e > 8.5 * a {
                p_att = blk + 1;
            }
        }

        let att = self.p_att > nblk / 2 || p_att > 0;
        self.p_att = p_att;
        att
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_启用条件() {
        assert!(!AttackDetector::enabled(FrameDuration::Ms10, SampleRate::Hz16000, 200));
        assert!(AttackDetector::enabled(FrameDuration::Ms10, SampleRate::Hz48000, 100));
        assert!(!AttackDetector::enabled(FrameDuration::Ms10, SampleRate::Hz48000, 99));
        assert!(AttackDetector::enabled(FrameDuration::Ms7p5, SampleRate::Hz32000, 61));
        assert!(!AttackDetector::enabled(FrameDuration::Ms7p5, SampleRate::Hz32000, 150));
    }

    #[test]
    fn test_检测到攻击() {
        let (dt, sr) = (FrameDuration::Ms10, SampleRate::Hz48000);
        let n = num_samples(dt, sr);
        let mut det = AttackDetector::new();

        let quiet: Vec<f32> = (0..n).map(|i| 10.0 * (i as f32 * 0.7).sin()).collect();
        // 首帧相对于全零初始状态总会触发
        det.run(dt, sr, 120, &quiet);
        assert!(!det.run(dt, sr, 120, &quiet));
        assert!(!det.run(dt, sr, 120, &quiet));

        let mut burst = quiet.clone();
        for (i, v) in burst[n / 2..].iter_mut().enumerate() {
            *v = 20000.0 * if i % 2 == 0 { 1.0 } else { -1.0 };
        }
        assert!(det.run(dt, sr, 120, &burst));
    }

    #[test]
    fn test_静音无攻击() {
        let (dt, sr) = (FrameDuration::Ms10, SampleRate::Hz32000);
        let n = num_samples(dt, sr);
        let mut det = AttackDetector::new();
        let silence = vec![0.0f32; n];
        for _ in 0..3 {
            assert!(!det.run(dt, sr, 100, &silence));
        }
    }
}
