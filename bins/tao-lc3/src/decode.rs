//! .lc3 码流解码为 PCM 文件.

use std::fs::{self, File};
use std::io::BufReader;

use anyhow::{Context, Result, ensure};
use tao::codec::lc3::{DecodeStatus, FrameDecoder, Lc3Config, PcmFormat};
use tao::lc3bin::{self, Lc3BinHeader};
use tracing::{debug, info, warn};

use crate::DecodeArgs;

/// 解码结果统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeSummary {
    pub frames: usize,
    pub concealed: usize,
    pub samples: usize,
}

/// 第 `index` 帧 (从 0 开始) 是否按丢帧处理
fn is_dropped(index: usize, interval: Option<u32>) -> bool {
    match interval {
        Some(n) if n > 0 => (index + 1) % n as usize == 0,
        _ => false,
    }
}

/// 解码整个文件
///
/// 丢弃开头的算法延迟, 输出长度以文件头记录的采样数为准.
pub fn decode_file(args: &DecodeArgs) -> Result<DecodeSummary> {
    let file = File::open(&args.input)
        .with_context(|| format!("打开输入文件失败, path={}", args.input.display()))?;
    let mut reader = BufReader::new(file);
    let header = Lc3BinHeader::read_from(&mut reader)?;

    let config = Lc3Config::new(header.duration_us, header.sample_rate, 0)?;
    let fmt = PcmFormat::from(args.pcm_format);
    let channels = header.channels as usize;
    let block = fmt.bytes_per_sample() * channels;
    let ns = config.ns_pcm();

    debug!(
        "码流参数: {} Hz, {} 声道, 帧长 {} us, 码率 {} bps, {} 采样",
        header.sample_rate, channels, header.duration_us, header.bitrate, header.nsamples
    );

    let mut decoders = (0..channels)
        .map(|_| FrameDecoder::new(config))
        .collect::<Result<Vec<_>, _>>()?;

    let mut pcm = Vec::new();
    let mut frame_pcm = vec![0u8; ns * block];
    let mut frames = 0;
    let mut concealed = 0;
    while let Some(frame) = lc3bin::read_frame(&mut reader)? {
        ensure!(
            frame.len() % channels == 0,
            "第 {} 帧长度 {} 不能按 {} 声道均分",
            frames,
            frame.len(),
            channels
        );
        let per_channel = frame.len() / channels;
        let dropped = is_dropped(frames, args.drop_interval);

        let mut frame_concealed = dropped;
        for (ch, dec) in decoders.iter_mut().enumerate() {
            let data = (!dropped).then(|| &frame[ch * per_channel..(ch + 1) * per_channel]);
            let status = dec.decode_pcm(data, fmt, &mut frame_pcm, ch, channels)?;
            frame_concealed |= status == DecodeStatus::Concealed;
        }
        if frame_concealed {
            if !dropped {
                warn!("第 {} 帧损坏, 已隐藏", frames);
            }
            concealed += 1;
        }

        pcm.extend_from_slice(&frame_pcm);
        frames += 1;
    }

    let start = (config.delay() * block).min(pcm.len());
    let mut end = pcm.len();
    if header.nsamples > 0 {
        end = end.min(start + header.nsamples as usize * block);
    }
    let output = &pcm[start..end];
    fs::write(&args.output, output)
        .with_context(|| format!("写入输出文件失败, path={}", args.output.display()))?;

    info!(
        "已解码 {} -> {}: {} 帧, 隐藏 {} 帧",
        args.input.display(),
        args.output.display(),
        frames,
        concealed
    );
    Ok(DecodeSummary {
        frames,
        concealed,
        samples: output.len() / block,
    })
}
