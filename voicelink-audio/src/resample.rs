use anyhow::Context;
use rubato::Resampler;

fn sinc_params() -> rubato::SincInterpolationParameters {
    // Short filter: runs per chunk in realtime.
    rubato::SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: rubato::SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: rubato::WindowFunction::BlackmanHarris2,
    }
}

/// Chunked resampler for continuous streams.
///
/// Input of any length is buffered until a full chunk is available, so filter
/// state carries across device callbacks instead of restarting per buffer.
pub struct StreamResampler {
    inner: Option<rubato::SincFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(
        input_sample_rate_hz: u32,
        target_sample_rate_hz: u32,
        chunk_frames: usize,
    ) -> anyhow::Result<Self> {
        let inner = if input_sample_rate_hz == target_sample_rate_hz {
            None
        } else {
            Some(
                rubato::SincFixedIn::<f32>::new(
                    target_sample_rate_hz as f64 / input_sample_rate_hz as f64,
                    2.0,
                    sinc_params(),
                    chunk_frames.max(1),
                    1,
                )
                .context("create stream resampler")?,
            )
        };
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    pub fn push(&mut self, samples: &[f32]) -> anyhow::Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(samples.to_vec());
        };

        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        loop {
            let need = resampler.input_frames_next();
            if self.pending.len() < need {
                break;
            }
            let input = vec![self.pending.drain(..need).collect::<Vec<f32>>()];
            let res = resampler.process(&input, None).context("resample chunk")?;
            if let Some(ch) = res.into_iter().next() {
                out.extend(ch);
            }
        }
        Ok(out)
    }
}

pub fn f32_to_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

pub fn i16_to_f32(s: i16) -> f32 {
    s as f32 / i16::MAX as f32
}

/// Average interleaved channels into one.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
