//! Audio device output using cpal
//!
//! The cpal stream is not `Send`, so a dedicated thread opens the device,
//! builds the stream around a shared mixer and keeps it alive until the
//! output is dropped. Control calls only touch the mixer.

use super::output::{AudioOutput, SharedMixer};
use super::types::{SourceId, SourceSpec};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use mwl_common::{Error, Result};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

const PREFERRED_SAMPLE_RATE: u32 = 44100;

pub struct CpalOutput {
    mixer: SharedMixer,
    shutdown: Mutex<Option<mpsc::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CpalOutput {
    /// Open the default output device and start rendering
    pub fn open() -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<SharedMixer>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("mwl-audio".to_string())
            .spawn(move || {
                let stream = match start_stream() {
                    Ok((stream, mixer)) => {
                        let _ = ready_tx.send(Ok(mixer));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Blocks until a shutdown message or the sender is dropped
                let _ = shutdown_rx.recv();
                if let Err(e) = stream.pause() {
                    warn!("Failed to pause audio stream: {}", e);
                }
                debug!("Audio stream closed");
            })
            .map_err(|e| Error::AudioUnsupported(format!("audio thread: {}", e)))?;

        let mixer = ready_rx
            .recv()
            .map_err(|_| Error::AudioUnsupported("audio thread exited".to_string()))??;

        Ok(Self {
            mixer,
            shutdown: Mutex::new(Some(shutdown_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }
}

fn start_stream() -> Result<(Stream, SharedMixer)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::AudioUnsupported("no default output device".to_string()))?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let (config, sample_format) = best_config(&device)?;
    info!(
        "Using audio device {} ({} Hz, {} channels, {:?})",
        name, config.sample_rate.0, config.channels, sample_format
    );

    let mixer = SharedMixer::new(config.sample_rate.0);
    let stream = match sample_format {
        SampleFormat::F32 => build_stream_f32(&device, &config, mixer.clone())?,
        SampleFormat::I16 => build_stream_i16(&device, &config, mixer.clone())?,
        other => {
            return Err(Error::AudioUnsupported(format!(
                "unsupported sample format: {:?}",
                other
            )))
        }
    };
    stream
        .play()
        .map_err(|e| Error::AudioUnsupported(format!("failed to start stream: {}", e)))?;
    Ok((stream, mixer))
}

/// Prefer 44.1kHz stereo f32, else the device default
fn best_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
    let mut supported = device
        .supported_output_configs()
        .map_err(|e| Error::AudioUnsupported(format!("failed to get device configs: {}", e)))?;

    let preferred = supported.find(|c| {
        c.channels() == 2
            && c.min_sample_rate().0 <= PREFERRED_SAMPLE_RATE
            && c.max_sample_rate().0 >= PREFERRED_SAMPLE_RATE
            && c.sample_format() == SampleFormat::F32
    });
    if let Some(config) = preferred {
        let format = config.sample_format();
        let config = config
            .with_sample_rate(cpal::SampleRate(PREFERRED_SAMPLE_RATE))
            .config();
        return Ok((config, format));
    }

    let config = device
        .default_output_config()
        .map_err(|e| Error::AudioUnsupported(format!("failed to get default config: {}", e)))?;
    Ok((config.config(), config.sample_format()))
}

fn build_stream_f32(device: &Device, config: &StreamConfig, mixer: SharedMixer) -> Result<Stream> {
    let channels = config.channels as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                mixer.lock().fill(data, channels);
            },
            |err| error!("Audio stream error: {}", err),
            None,
        )
        .map_err(|e| Error::AudioUnsupported(format!("failed to build stream: {}", e)))
}

fn build_stream_i16(device: &Device, config: &StreamConfig, mixer: SharedMixer) -> Result<Stream> {
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                mixer.lock().fill(&mut scratch, channels);
                for (out, sample) in data.iter_mut().zip(&scratch) {
                    *out = (sample * i16::MAX as f32) as i16;
                }
            },
            |err| error!("Audio stream error: {}", err),
            None,
        )
        .map_err(|e| Error::AudioUnsupported(format!("failed to build stream: {}", e)))
}

impl AudioOutput for CpalOutput {
    fn is_supported(&self) -> bool {
        true
    }

    fn current_time(&self) -> f64 {
        self.mixer.lock().current_time()
    }

    fn start_source(&self, spec: SourceSpec) -> Result<SourceId> {
        Ok(self.mixer.lock().add(spec))
    }

    fn stop_source_at(&self, id: SourceId, at: f64) {
        self.mixer.lock().stop_at(id, at);
    }

    fn is_active(&self, id: SourceId) -> bool {
        self.mixer.lock().is_active(id)
    }

    fn active_sources(&self) -> usize {
        self.mixer.lock().active_count()
    }

    fn release(&self) {
        self.mixer.lock().clear();
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.mixer.lock().clear();
        if let Some(tx) = self.shutdown.lock().ok().and_then(|mut s| s.take()) {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.lock().ok().and_then(|mut t| t.take()) {
            let _ = handle.join();
        }
    }
}
