//! CPAL-backed microphone and speaker.
//!
//! Streams are built and dropped on dedicated worker threads because CPAL
//! streams are not `Send` on every platform. Hardware runs at its native rate
//! and channel count; conversion to and from the wire format happens on the
//! worker threads, never inside the device callbacks.

use std::sync::mpsc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream};
use voicelink_core::types::{PcmFrame, SAMPLE_RATE_HZ};

use crate::capture::{CaptureDevice, CaptureProducer};
use crate::queue::RawHandoff;
use crate::error::DeviceError;
use crate::playback::PcmSink;
use crate::resample::{StreamResampler, downmix_to_mono, f32_to_i16, i16_to_f32};

const FRAME_SAMPLES: usize = (SAMPLE_RATE_HZ as usize / 1000) * 20;
const WORKER_STARTUP_TIMEOUT: Duration = Duration::from_secs(2);
const RAW_QUEUE_CHUNKS: usize = 64;
const OUTPUT_QUEUE_CHUNKS: usize = 4;

enum WorkerMsg {
    Ready { sample_rate_hz: u32, channels: usize },
    Error(String),
}

pub fn list_input_device_names() -> Vec<String> {
    let host = cpal::default_host();
    let mut out = Vec::new();
    if let Ok(devices) = host.input_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                out.push(name);
            }
        }
    }
    out.sort();
    out.dedup();
    out
}

fn find_input_device(name: Option<&str>) -> Result<Device, DeviceError> {
    let host = cpal::default_host();
    if let Some(needle) = name.map(str::trim).filter(|s| !s.is_empty()) {
        if let Ok(devices) = host.input_devices() {
            for dev in devices {
                if dev.name().is_ok_and(|n| n == needle) {
                    log::info!("Using input device: {needle}");
                    return Ok(dev);
                }
            }
        }
        log::warn!("Preferred input device not found, falling back to default: {needle}");
    }
    host.default_input_device()
        .ok_or(DeviceError::NoInputDevice)
}

fn find_output_device(name: Option<&str>) -> Result<Device, DeviceError> {
    let host = cpal::default_host();
    if let Some(needle) = name.map(str::trim).filter(|s| !s.is_empty()) {
        if let Ok(devices) = host.output_devices() {
            for dev in devices {
                if dev.name().is_ok_and(|n| n == needle) {
                    log::info!("Using output device: {needle}");
                    return Ok(dev);
                }
            }
        }
        log::warn!("Preferred output device not found, falling back to default: {needle}");
    }
    host.default_output_device()
        .ok_or(DeviceError::NoOutputDevice)
}

fn wait_ready(rx: &mpsc::Receiver<WorkerMsg>) -> Result<(u32, usize), DeviceError> {
    match rx.recv_timeout(WORKER_STARTUP_TIMEOUT) {
        Ok(WorkerMsg::Ready {
            sample_rate_hz,
            channels,
        }) => Ok((sample_rate_hz, channels)),
        Ok(WorkerMsg::Error(e)) => Err(DeviceError::Worker(e)),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(DeviceError::WorkerTimeout),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(DeviceError::Channel),
    }
}

pub struct CpalInput {
    device_name: Option<String>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    worker_handle: Option<std::thread::JoinHandle<()>>,
}

impl CpalInput {
    pub fn open_named(device_name: Option<&str>) -> Self {
        Self {
            device_name: device_name.map(str::to_string),
            shutdown_tx: None,
            worker_handle: None,
        }
    }
}

impl CaptureDevice for CpalInput {
    fn start(&mut self, producer: CaptureProducer) -> Result<(), DeviceError> {
        let device = find_input_device(self.device_name.as_deref())?;
        let default_cfg = device.default_input_config()?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (worker_tx, worker_rx) = mpsc::channel::<WorkerMsg>();

        let worker_handle = std::thread::Builder::new()
            .name("voicelink-capture".into())
            .spawn(move || {
                let sample_rate_hz = default_cfg.sample_rate().0;
                let channels = default_cfg.channels() as usize;
                let config: cpal::StreamConfig = default_cfg.config();
                let (raw, raw_rx) =
                    producer.raw_handoff(RAW_QUEUE_CHUNKS, sample_rate_hz, channels);

                let stream = match default_cfg.sample_format() {
                    SampleFormat::I16 => build_input_stream::<i16>(&device, &config, raw),
                    SampleFormat::U16 => build_input_stream::<u16>(&device, &config, raw),
                    SampleFormat::I32 => build_input_stream::<i32>(&device, &config, raw),
                    SampleFormat::F64 => build_input_stream::<f64>(&device, &config, raw),
                    _ => build_input_stream::<f32>(&device, &config, raw),
                };

                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        let msg = format!("build input stream: {e}");
                        let _ = worker_tx.send(WorkerMsg::Error(msg));
                        log::error!("Input stream build failed: {e}");
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = worker_tx.send(WorkerMsg::Error(format!("play input stream: {e}")));
                    log::error!("Input stream play failed: {e}");
                    return;
                }

                let resampler = match StreamResampler::new(sample_rate_hz, SAMPLE_RATE_HZ, 1024) {
                    Ok(r) => r,
                    Err(e) => {
                        let _ = worker_tx.send(WorkerMsg::Error(format!("create resampler: {e}")));
                        return;
                    }
                };

                let _ = worker_tx.send(WorkerMsg::Ready {
                    sample_rate_hz,
                    channels,
                });

                run_capture_converter(raw_rx, shutdown_rx, channels, resampler, producer);
                drop(stream);
            })
            .map_err(|e| DeviceError::Worker(format!("spawn capture worker: {e}")))?;

        let (rate, channels) = wait_ready(&worker_rx)?;
        log::info!("Input device running at {rate} Hz, {channels} channel(s)");

        self.shutdown_tx = Some(shutdown_tx);
        self.worker_handle = Some(worker_handle);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(h) = self.worker_handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_input_stream<T>(
    device: &Device,
    config: &cpal::StreamConfig,
    raw: RawHandoff,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: Sample + SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let cb = move |data: &[T], _: &cpal::InputCallbackInfo| {
        // Copy and hand off only. Downmix and conversion happen on the worker thread.
        raw.push(data.iter().map(|&s| s.to_sample::<f32>()).collect());
    };

    device.build_input_stream(
        config,
        cb,
        |err| {
            log::error!("Input stream error: {err}");
        },
        None,
    )
}

fn run_capture_converter(
    raw_rx: crossbeam_channel::Receiver<Vec<f32>>,
    shutdown_rx: mpsc::Receiver<()>,
    channels: usize,
    mut resampler: StreamResampler,
    producer: CaptureProducer,
) {
    let mut pending: Vec<i16> = Vec::with_capacity(FRAME_SAMPLES * 2);

    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => return,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        let chunk = match raw_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(c) => c,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
        };

        let mono = downmix_to_mono(&chunk, channels);
        let resampled = match resampler.push(&mono) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Capture resample failed, chunk dropped: {e}");
                continue;
            }
        };
        pending.extend(resampled.into_iter().map(f32_to_i16));

        while pending.len() >= FRAME_SAMPLES {
            let frame: Vec<i16> = pending.drain(..FRAME_SAMPLES).collect();
            // Overflow is counted by the queue and reported by the consumer.
            let _ = producer.push(PcmFrame::new(frame));
        }
    }
}

/// Speaker with a blocking `write`: frames are converted to the device format
/// and queued for the output callback, blocking while that queue is full.
pub struct CpalOutput {
    chunk_tx: Option<crossbeam_channel::Sender<Vec<f32>>>,
    resampler: StreamResampler,
    shutdown_tx: Option<mpsc::Sender<()>>,
    worker_handle: Option<std::thread::JoinHandle<()>>,
}

impl CpalOutput {
    pub fn open_named(device_name: Option<&str>) -> Result<Self, DeviceError> {
        let device = find_output_device(device_name)?;
        let default_cfg = device.default_output_config()?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (worker_tx, worker_rx) = mpsc::channel::<WorkerMsg>();
        let (chunk_tx, chunk_rx) = crossbeam_channel::bounded::<Vec<f32>>(OUTPUT_QUEUE_CHUNKS);

        let worker_handle = std::thread::Builder::new()
            .name("voicelink-output".into())
            .spawn(move || {
                let sample_rate_hz = default_cfg.sample_rate().0;
                let channels = default_cfg.channels() as usize;
                let config: cpal::StreamConfig = default_cfg.config();

                let stream = match default_cfg.sample_format() {
                    SampleFormat::I16 => {
                        build_output_stream::<i16>(&device, &config, channels, chunk_rx)
                    }
                    SampleFormat::U16 => {
                        build_output_stream::<u16>(&device, &config, channels, chunk_rx)
                    }
                    SampleFormat::I32 => {
                        build_output_stream::<i32>(&device, &config, channels, chunk_rx)
                    }
                    SampleFormat::F64 => {
                        build_output_stream::<f64>(&device, &config, channels, chunk_rx)
                    }
                    _ => build_output_stream::<f32>(&device, &config, channels, chunk_rx),
                };

                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        let msg = format!("build output stream: {e}");
                        let _ = worker_tx.send(WorkerMsg::Error(msg));
                        log::error!("Output stream build failed: {e}");
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = worker_tx.send(WorkerMsg::Error(format!("play output stream: {e}")));
                    log::error!("Output stream play failed: {e}");
                    return;
                }

                let _ = worker_tx.send(WorkerMsg::Ready {
                    sample_rate_hz,
                    channels,
                });

                // Park until told to stop; the stream lives on this thread.
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| DeviceError::Worker(format!("spawn output worker: {e}")))?;

        let (rate, channels) = wait_ready(&worker_rx)?;
        log::info!("Output device running at {rate} Hz, {channels} channel(s)");

        Ok(Self {
            chunk_tx: Some(chunk_tx),
            resampler: StreamResampler::new(SAMPLE_RATE_HZ, rate, FRAME_SAMPLES)?,
            shutdown_tx: Some(shutdown_tx),
            worker_handle: Some(worker_handle),
        })
    }
}

impl PcmSink for CpalOutput {
    fn write(&mut self, frame: &PcmFrame) -> Result<(), DeviceError> {
        let samples: Vec<f32> = frame.samples().iter().map(|&s| i16_to_f32(s)).collect();
        let out = self.resampler.push(&samples)?;
        if out.is_empty() {
            return Ok(());
        }
        let tx = self
            .chunk_tx
            .as_ref()
            .ok_or_else(|| DeviceError::Write("output stream closed".into()))?;
        tx.send(out)
            .map_err(|_| DeviceError::Write("output stream closed".into()))
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.chunk_tx = None;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(h) = self.worker_handle.take() {
            let _ = h.join();
        }
    }
}

fn build_output_stream<T>(
    device: &Device,
    config: &cpal::StreamConfig,
    channels: usize,
    chunk_rx: crossbeam_channel::Receiver<Vec<f32>>,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: Sample + SizedSample + FromSample<f32> + Send + 'static,
{
    let mut current: Vec<f32> = Vec::new();
    let mut pos = 0usize;
    let channels = channels.max(1);

    let cb = move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        for frame in data.chunks_mut(channels) {
            if pos >= current.len() {
                // Never block here: an empty queue plays silence.
                match chunk_rx.try_recv() {
                    Ok(next) => {
                        current = next;
                        pos = 0;
                    }
                    Err(_) => {
                        current.clear();
                        pos = 0;
                    }
                }
            }
            let v = current.get(pos).copied().unwrap_or(0.0);
            if pos < current.len() {
                pos += 1;
            }
            for out in frame.iter_mut() {
                *out = T::from_sample(v);
            }
        }
    };

    device.build_output_stream(
        config,
        cb,
        |err| {
            log::error!("Output stream error: {err}");
        },
        None,
    )
}
