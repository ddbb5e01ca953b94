use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use std::sync::{Arc, Mutex};

/// Enough history for a few FFT windows at the largest supported size.
const RING_CAPACITY: usize = 1 << 15;

/// Live audio input: a cpal stream downmixing to mono into a shared ring.
/// The render thread copies the newest window out once per frame.
pub struct AudioCapture {
    samples: Arc<Mutex<Vec<f32>>>,
    sample_rate: f32,
    _stream: cpal::Stream,
}

impl AudioCapture {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .context("no audio input device available")?;
        let config = device
            .default_input_config()
            .context("failed to query the default input config")?;

        let sample_rate = config.sample_rate().0 as f32;
        let channels = config.channels().max(1) as usize;
        log::info!(
            "Audio input: {} @ {}Hz, {} channel(s)",
            device.name().unwrap_or_else(|_| "unknown".into()),
            config.sample_rate().0,
            channels
        );

        let samples = Arc::new(Mutex::new(Vec::with_capacity(RING_CAPACITY)));
        let shared = Arc::clone(&samples);
        let stream_config: cpal::StreamConfig = config.clone().into();

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&device, &stream_config, channels, shared)?
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &stream_config, channels, shared)?
            }
            cpal::SampleFormat::U16 => {
                build_stream::<u16>(&device, &stream_config, channels, shared)?
            }
            other => anyhow::bail!("unsupported input sample format: {:?}", other),
        };
        stream.play().context("failed to start the input stream")?;

        Ok(Self {
            samples,
            sample_rate,
            _stream: stream,
        })
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Copy the newest `out.len()` samples, zero-padding the front while the
    /// ring is still filling up.
    pub fn latest_window(&self, out: &mut [f32]) {
        let ring = self.samples.lock().unwrap();
        out.fill(0.0);
        let n = ring.len().min(out.len());
        let start = out.len() - n;
        out[start..].copy_from_slice(&ring[ring.len() - n..]);
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    shared: Arc<Mutex<Vec<f32>>>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mut ring = shared.lock().unwrap();
            for frame in data.chunks(channels) {
                let mono: f32 =
                    frame.iter().map(|&s| f32::from_sample(s)).sum::<f32>() / channels as f32;
                ring.push(mono);
            }
            let excess = ring.len().saturating_sub(RING_CAPACITY);
            if excess > 0 {
                ring.drain(..excess);
            }
        },
        |err| log::error!("audio input stream error: {}", err),
        None,
    )?;
    Ok(stream)
}
