//! 丢帧隐藏.
//!
//! 复用最后一帧正常解码的频谱, 用伪随机序列翻转系数符号, 并随连续丢帧数逐级衰减.

/// 隐藏状态
#[derive(Debug, Clone)]
pub struct Plc {
    /// 连续丢帧数, 0 为正常解码
    count: u32,
    /// 伪随机种子
    seed: u16,
    /// 累积衰减系数
    alpha: f32,
}

impl Default for Plc {
    fn default() -> Self {
        Self::new()
    }
}

impl Plc {
    pub fn new() -> Self {
        Self {
            count: 0,
            seed: 24607,
            alpha: 1.0,
        }
    }

    /// 正常解码一帧后调用, 结束隐藏
    pub fn suspend(&mut self) {
        self.count = 1;
        self.alpha = 1.0;
    }

    /// 连续丢帧数
    pub fn lost_frames(&self) -> u32 {
        self.count.saturating_sub(1)
    }

    /// 当前累积衰减系数
    pub fn attenuation(&self) -> f32 {
        self.alpha
    }

    /// 由上一帧频谱 `x` 合成隐藏频谱 `y`
    pub fn synthesize(&mut self, x: &[f32], y: &mut [f32]) {
        self.alpha *= match self.count {
            0..4 => 1.0,
            4..8 => 0.9,
            _ => 0.85,
        };

        let alpha = self.alpha;
        for (yi, &xi) in y.iter_mut().zip(x) {
            self.seed = self.seed.wrapping_mul(12821).wrapping_add(16831);
            *yi = alpha * if self.seed & 0x8000 != 0 { -xi } else { xi };
        }

        self.count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_衰减阶梯() {
        let mut plc = Plc::new();
        plc.suspend();
        let x = [1.0f32; 16];
        let mut y = [0.0f32; 16];

        let mut alphas = Vec::new();
        for _ in 0..10 {
            plc.synthesize(&x, &mut y);
            alphas.push(plc.attenuation());
        }
        // 前 3 帧不衰减, 之后每帧乘 0.9, 第 8 帧起乘 0.85
        assert_eq!(&alphas[..3], &[1.0, 1.0, 1.0]);
        assert!((alphas[3] - 0.9).abs() < 1e-6);
        assert!((alphas[6] - 0.9f32.powi(4)).abs() < 1e-6);
        assert!((alphas[7] - 0.9f32.powi(4) * 0.85).abs() < 1e-6);
        assert!(alphas.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(plc.lost_frames(), 10);
    }

    #[test]
    fn test_符号随机化保持幅度() {
        let mut plc = Plc::new();
        plc.suspend();
        let x: Vec<f32> = (1..=64).map(|i| i as f32).collect();
        let mut y = vec![0.0f32; 64];
        plc.synthesize(&x, &mut y);
        assert!(x.iter().zip(&y).all(|(a, b)| a.abs() == b.abs()));
        assert!(y.iter().any(|&v| v < 0.0));
        assert!(y.iter().any(|&v| v > 0.0));
    }

    #[test]
    fn test_恢复后重置() {
        let mut plc = Plc::new();
        plc.suspend();
        let x = [1.0f32; 4];
        let mut y = [0.0f32; 4];
        for _ in 0..6 {
            plc.synthesize(&x, &mut y);
        }
        assert!(plc.attenuation() < 1.0);
        plc.suspend();
        assert_eq!(plc.attenuation(), 1.0);
        assert_eq!(plc.lost_frames(), 0);
    }
}
