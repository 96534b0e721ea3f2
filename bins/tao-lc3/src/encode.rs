//! PCM 文件编码为 .lc3 码流.

use std::fs::{self, File};
use std::io::{BufWriter, Write};

use anyhow::{Context, Result, ensure};
use tao::codec::lc3::{self, FrameEncoder, Lc3Config, PcmFormat};
use tao::lc3bin::{self, Lc3BinHeader};
use tracing::{debug, info};

use crate::EncodeArgs;

/// 编码结果统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeSummary {
    pub frames: usize,
    pub samples: usize,
    pub frame_bytes: usize,
}

/// 解析编码参数: (采样率, 帧时长, 每声道帧字节数)
fn resolve_params(args: &EncodeArgs) -> Result<(u32, u32, usize)> {
    if let Some(name) = &args.preset {
        let preset = lc3::find_preset(name).with_context(|| format!("未知预设 '{}'", name))?;
        return Ok((preset.sample_rate, preset.duration_us, preset.frame_bytes));
    }
    let frame_bytes = match args.frame_bytes {
        Some(n) => n,
        None => lc3::frame_bytes(args.duration_us, args.bitrate / args.channels.max(1) as u32)?,
    };
    Ok((args.sample_rate, args.duration_us, frame_bytes))
}

/// 编码整个文件
///
/// 尾部补零以覆盖算法延迟, 解码端据此丢弃开头的延迟采样.
pub fn encode_file(args: &EncodeArgs) -> Result<EncodeSummary> {
    ensure!(args.channels > 0, "声道数不能为 0");
    let (sample_rate, duration_us, frame_bytes) = resolve_params(args)?;
    lc3::check_frame_bytes(frame_bytes)?;

    let config = Lc3Config::new(duration_us, sample_rate, 0)?;
    let fmt = PcmFormat::from(args.pcm_format);
    let channels = args.channels as usize;
    let block = fmt.bytes_per_sample() * channels;

    let mut pcm = fs::read(&args.input)
        .with_context(|| format!("读取输入文件失败, path={}", args.input.display()))?;
    let samples = pcm.len() / block;
    let ns = config.ns_pcm();
    let frames = (samples + config.delay()).div_ceil(ns);
    pcm.resize(frames * ns * block, 0);

    debug!(
        "编码参数: {} Hz, {} 声道, 帧长 {} us, 每声道 {} 字节, 延迟 {} 采样",
        sample_rate,
        channels,
        duration_us,
        frame_bytes,
        config.delay()
    );

    let header = Lc3BinHeader {
        sample_rate,
        bitrate: lc3::resolve_bitrate(duration_us, frame_bytes)? * channels as u32,
        channels: args.channels,
        duration_us,
        nsamples: u32::try_from(samples).context("输入过长")?,
    };

    let file = File::create(&args.output)
        .with_context(|| format!("创建输出文件失败, path={}", args.output.display()))?;
    let mut out = BufWriter::new(file);
    header.write_to(&mut out)?;

    let mut encoders = (0..channels)
        .map(|_| FrameEncoder::new(config))
        .collect::<Result<Vec<_>, _>>()?;
    let mut payload = Vec::with_capacity(frame_bytes * channels);
    for chunk in pcm.chunks_exact(ns * block) {
        payload.clear();
        for (ch, enc) in encoders.iter_mut().enumerate() {
            payload.extend(enc.encode_pcm(fmt, chunk, ch, channels, frame_bytes)?);
        }
        lc3bin::write_frame(&mut out, &payload)?;
    }
    out.flush()?;

    info!(
        "已编码 {} -> {}: {} 帧",
        args.input.display(),
        args.output.display(),
        frames
    );
    Ok(EncodeSummary {
        frames,
        samples,
        frame_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PcmArg;
    use std::path::PathBuf;

    fn args(preset: Option<&str>) -> EncodeArgs {
        EncodeArgs {
            input: PathBuf::from("in.pcm"),
            output: PathBuf::from("out.lc3"),
            preset: preset.map(str::to_string),
            sample_rate: 16000,
            channels: 2,
            duration_us: 10000,
            bitrate: 64000,
            frame_bytes: None,
            pcm_format: PcmArg::S16,
        }
    }

    #[test]
    fn test_参数解析() {
        assert_eq!(resolve_params(&args(None)).unwrap(), (16000, 10000, 40));
        assert_eq!(
            resolve_params(&args(Some("48_1"))).unwrap(),
            (48000, 7500, 75)
        );
        assert!(resolve_params(&args(Some("99_9"))).is_err());

        let mut fixed = args(None);
        fixed.frame_bytes = Some(57);
        assert_eq!(resolve_params(&fixed).unwrap().2, 57);
    }
}
