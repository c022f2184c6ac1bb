use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use tracing::{debug, info, warn};

use pulseloop_domain::TempoError;

use crate::rolling::{AudioWindow, RollingAudioBuffer};

/// How often pending capture bytes are moved into the analysis window.
pub const DEFAULT_PULL_INTERVAL_MS: u64 = 3000;

#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// Exact device name to prefer; empty means pick automatically.
    pub preferred_source: String,
    /// Capacity of the ring between the audio callback and the pull tick.
    pub ring_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            preferred_source: String::new(),
            ring_capacity: 1 << 18,
        }
    }
}

/// Consumer side of the callback ring. Separate from the device stream so
/// the drain path can be exercised without hardware.
pub struct CapturePipe {
    pending: HeapConsumer<u8>,
    scratch: Vec<u8>,
}

impl CapturePipe {
    pub fn new(pending: HeapConsumer<u8>) -> Self {
        Self {
            pending,
            scratch: vec![0u8; 65_536],
        }
    }

    /// Moves everything captured since the last pull into the rolling
    /// window. Returns a fresh snapshot when any new audio arrived.
    pub fn drain_into(&mut self, buffer: &mut RollingAudioBuffer) -> Option<AudioWindow> {
        let mut snapshot = None;
        loop {
            let drained = self.pending.pop_slice(&mut self.scratch);
            if drained == 0 {
                break;
            }
            snapshot = Some(buffer.append(&self.scratch[..drained]));
        }
        snapshot
    }
}

/// Live capture stream. The audio callback quantizes incoming samples to the
/// 8-bit mono stream the analyzer expects and parks them in an SPSC ring;
/// `drain_into` moves them onward on the caller's pull tick, so the callback
/// never waits on the analysis side.
pub struct CaptureStream {
    _stream: cpal::Stream,
    pipe: CapturePipe,
    sample_rate: u32,
}

impl CaptureStream {
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = pick_device(&host, &config.preferred_source)?;
        let device_name = device.name().unwrap_or_else(|_| "<unnamed>".into());
        let default_config = device
            .default_input_config()
            .with_context(|| format!("query capture format of {device_name:?}"))?;
        let sample_format = default_config.sample_format();
        let stream_config: cpal::StreamConfig = default_config.into();
        let sample_rate = stream_config.sample_rate.0;
        info!(device = %device_name, sample_rate, ?sample_format, "opening capture stream");

        let ring = HeapRb::<u8>::new(config.ring_capacity);
        let (producer, pending) = ring.split();
        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, producer),
            SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, producer),
            SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, producer),
            SampleFormat::U8 => build_stream::<u8>(&device, &stream_config, producer),
            other => {
                return Err(TempoError::capture(format!(
                    "unsupported capture format {other:?} on {device_name:?}"
                ))
                .into())
            }
        }?;
        stream.play().context("start capture stream")?;

        Ok(Self {
            _stream: stream,
            pipe: CapturePipe::new(pending),
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn drain_into(&mut self, buffer: &mut RollingAudioBuffer) -> Option<AudioWindow> {
        self.pipe.drain_into(buffer)
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: HeapProducer<u8>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // A full ring drops the newest bytes; the window only needs
                // the recent past anyway.
                for frame in data.chunks(channels) {
                    let _ = producer.push(sample_to_byte(downmix_frame(frame)));
                }
            },
            |err| warn!(%err, "capture stream error"),
            None,
        )
        .context("build capture input stream")?;
    Ok(stream)
}

/// Averages one interleaved frame down to a single centered float.
fn downmix_frame<T>(frame: &[T]) -> f32
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut mixed = 0.0f32;
    for &sample in frame {
        mixed += f32::from_sample(sample);
    }
    mixed / frame.len().max(1) as f32
}

fn sample_to_byte(sample: f32) -> u8 {
    ((sample.clamp(-1.0, 1.0) + 1.0) * 127.5) as u8
}

fn pick_device(host: &cpal::Host, preferred: &str) -> Result<cpal::Device> {
    let mut monitor = None;
    if let Ok(devices) = host.input_devices() {
        for device in devices {
            let Ok(name) = device.name() else { continue };
            if !preferred.is_empty() && name == preferred {
                return Ok(device);
            }
            // Loopback monitors carry what the machine is playing, which is
            // what we want to listen to.
            if monitor.is_none() && name.ends_with(".monitor") {
                monitor = Some(device);
            }
        }
    }
    if let Some(device) = monitor {
        debug!(
            device = %device.name().unwrap_or_default(),
            "preferred source not found; using first monitor"
        );
        return Ok(device);
    }
    host.default_input_device()
        .ok_or_else(|| TempoError::capture("no capture device available").into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_quantization_covers_full_range() {
        assert_eq!(sample_to_byte(-1.0), 0);
        assert_eq!(sample_to_byte(0.0), 127);
        assert_eq!(sample_to_byte(1.0), 255);
        // Out-of-range input is clamped, not wrapped.
        assert_eq!(sample_to_byte(4.2), 255);
        assert_eq!(sample_to_byte(-4.2), 0);
    }

    #[test]
    fn downmix_averages_a_stereo_frame() {
        assert_eq!(downmix_frame(&[0.5f32, -0.5]), 0.0);
        assert_eq!(downmix_frame(&[0.5f32, 0.5]), 0.5);
        assert_eq!(downmix_frame::<f32>(&[]), 0.0);
    }

    #[test]
    fn downmix_accepts_every_wired_sample_format() {
        // One call per format handled in `CaptureStream::open`; the
        // conversion comes from cpal's Sample/FromSample machinery.
        assert!(downmix_frame(&[i16::MAX, i16::MAX]) > 0.99);
        assert!(downmix_frame(&[32_768u16]).abs() < 1e-3);
        assert!(downmix_frame(&[128u8]).abs() < 1e-2);
        assert!(downmix_frame(&[-1.0f32]) < -0.99);
    }

    #[test]
    fn pipe_drains_ring_contents_into_the_window() {
        let ring = HeapRb::<u8>::new(64);
        let (mut producer, pending) = ring.split();
        let mut pipe = CapturePipe::new(pending);
        let mut buffer = RollingAudioBuffer::new(16);

        producer.push_slice(&[1, 2, 3, 4]);
        let window = pipe.drain_into(&mut buffer).unwrap();
        assert_eq!(window.bytes(), &[1, 2, 3, 4]);

        // Nothing new arrived since the last pull.
        assert!(pipe.drain_into(&mut buffer).is_none());

        // Later pulls extend the same rolling window.
        producer.push_slice(&[5, 6]);
        let window = pipe.drain_into(&mut buffer).unwrap();
        assert_eq!(window.bytes(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn default_ring_holds_several_pull_intervals() {
        let config = CaptureConfig::default();
        // 3 s of 44.1 kHz bytes per pull; the ring must not wrap within one.
        assert!(config.ring_capacity > 44_100 * 3);
    }
}
