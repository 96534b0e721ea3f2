//! 混合基复数 FFT.
//!
//! 支持长度 5·3^a·2^b, 先做一级基 5 蝶形, 再依次做基 3 与基 2 级.
//! 采用 Stockham 自排序结构, 在两块缓冲区间交替, 无需位反转.

use std::f64::consts::PI;
use std::ops::{Add, Mul, Sub};

use tao_core::{TaoError, TaoResult};

/// 复数
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Complex {
    pub re: f32,
    pub im: f32,
}

impl Complex {
    pub const fn new(re: f32, im: f32) -> Self {
        Self { re, im }
    }

    /// e^{-i·theta}
    fn expi_neg(theta: f64) -> Self {
        Self::new(theta.cos() as f32, -theta.sin() as f32)
    }

    /// 乘以 -i
    #[inline]
    fn mul_neg_i(self) -> Self {
        Self::new(self.im, -self.re)
    }

    #[inline]
    fn scale(self, k: f32) -> Self {
        Self::new(self.re * k, self.im * k)
    }
}

impl Add for Complex {
    type Output = Self;
    #[inline]
    fn add(self, o: Self) -> Self {
        Self::new(self.re + o.re, self.im + o.im)
    }
}

impl Sub for Complex {
    type Output = Self;
    #[inline]
    fn sub(self, o: Self) -> Self {
        Self::new(self.re - o.re, self.im - o.im)
    }
}

impl Mul for Complex {
    type Output = Self;
    #[inline]
    fn mul(self, o: Self) -> Self {
        Self::new(
            self.re * o.re - self.im * o.im,
            self.re * o.im + self.im * o.re,
        )
    }
}

enum Stage {
    /// 基 3, `m` 为输入子变换长度, 旋转因子 [W^t, W^2t], t < 3m
    Radix3 { m: usize, tw: Vec<[Complex; 2]> },
    /// 基 2, 旋转因子 W^t, t < m
    Radix2 { m: usize, tw: Vec<Complex> },
}

/// FFT 计划
pub struct Fft {
    n: usize,
    stages: Vec<Stage>,
}

impl Fft {
    /// 创建长度为 `n` 的 FFT 计划
    pub fn new(n: usize) -> TaoResult<Self> {
        if n == 0 || n % 5 != 0 {
            return Err(TaoError::InvalidArgument(format!(
                "FFT: 长度 {} 不是 5·3^a·2^b",
                n
            )));
        }
        let mut rest = n / 5;
        let mut radices = Vec::new();
        while rest % 3 == 0 {
            radices.push(3);
            rest /= 3;
        }
        while rest % 2 == 0 {
            radices.push(2);
            rest /= 2;
        }
        if rest != 1 {
            return Err(TaoError::InvalidArgument(format!(
                "FFT: 长度 {} 不是 5·3^a·2^b",
                n
            )));
        }

        let mut m = 5;
        let stages = radices
            .into_iter()
            .map(|r| {
                let step = 2.0 * PI / (r * m) as f64;
                let stage = if r == 3 {
                    Stage::Radix3 {
                        m,
                        tw: (0..3 * m)
                            .map(|t| {
                                [
                                    Complex::expi_neg(step * t as f64),
                                    Complex::expi_neg(step * 2.0 * t as f64),
                                ]
                            })
                            .collect(),
                    }
                } else {
                    Stage::Radix2 {
                        m,
                        tw: (0..m).map(|t| Complex::expi_neg(step * t as f64)).collect(),
                    }
                };
                m *= r;
                stage
            })
            .collect();

        Ok(Self { n, stages })
    }

    /// 变换长度
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// 原位正变换, `scratch` 至少与输入等长
    pub fn forward(&self, x: &mut [Complex], scratch: &mut [Complex]) {
        let n = self.n;
        let (x, scratch) = (&mut x[..n], &mut scratch[..n]);

        fft5(x, scratch);
        let mut in_scratch = true;
        for stage in &self.stages {
            if in_scratch {
                stage.run(scratch, x);
            } else {
                stage.run(x, scratch);
            }
            in_scratch = !in_scratch;
        }
        if in_scratch {
            x.copy_from_slice(scratch);
        }
    }
}

const COS1: f32 = 0.309_017;
const COS2: f32 = -0.809_017;
const SIN1: f32 = 0.951_056_5;
const SIN2: f32 = 0.587_785_24;

/// 基 5 首级: y[5i + q] = Σ_k x[i + k·n/5]·W5^{kq}
fn fft5(x: &[Complex], y: &mut [Complex]) {
    let n5 = x.len() / 5;
    for i in 0..n5 {
        let x0 = x[i];
        let (x1, x2, x3, x4) = (x[i + n5], x[i + 2 * n5], x[i + 3 * n5], x[i + 4 * n5]);

        let s14 = x1 + x4;
        let s23 = x2 + x3;
        let d14 = x1 - x4;
        let d23 = x2 - x3;

        let a1 = x0 + s14.scale(COS1) + s23.scale(COS2);
        let b1 = (d14.scale(SIN1) + d23.scale(SIN2)).mul_neg_i();
        let a2 = x0 + s14.scale(COS2) + s23.scale(COS1);
        let b2 = (d14.scale(SIN2) - d23.scale(SIN1)).mul_neg_i();

        let y = &mut y[5 * i..5 * i + 5];
        y[0] = x0 + s14 + s23;
        y[1] = a1 + b1;
        y[2] = a2 + b2;
        y[3] = a2 - b2;
        y[4] = a1 - b1;
    }
}

impl Stage {
    /// 合并 r 个长度为 m 的子变换, 子变换 s 位于输入的 s·n/r 处
    fn run(&self, x: &[Complex], y: &mut [Complex]) {
        match self {
            Stage::Radix3 { m, tw } => {
                let m = *m;
                let nb = x.len() / (3 * m);
                for i in 0..nb {
                    for j in 0..m {
                        let x0 = x[i * m + j];
                        let x1 = x[(nb + i) * m + j];
                        let x2 = x[(2 * nb + i) * m + j];
                        for q in 0..3 {
                            let t = q * m + j;
                            y[i * 3 * m + t] = x0 + x1 * tw[t][0] + x2 * tw[t][1];
                        }
                    }
                }
            }
            Stage::Radix2 { m, tw } => {
                let m = *m;
                let nb = x.len() / (2 * m);
                for i in 0..nb {
                    for j in 0..m {
                        let x0 = x[i * m + j];
                        let x1 = x[(nb + i) * m + j] * tw[j];
                        y[i * 2 * m + j] = x0 + x1;
                        y[i * 2 * m + m + j] = x0 - x1;
                    }
                }
            }
        }
    }
}
