//! Guidance track fetching and decoding
//!
//! `HttpTrackLoader` fetches over HTTP(S) with reqwest, or reads `file://`
//! URLs and plain paths from disk, then decodes with symphonia on the
//! blocking pool. Every failure surfaces as `Error::AudioLoad`, which the
//! session treats as a cue to continue visual-only.

use super::types::TrackBuffer;
use async_trait::async_trait;
use mwl_common::{Error, Result};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

/// Source of decoded guidance tracks
#[async_trait]
pub trait TrackLoader: Send + Sync {
    async fn load(&self, url: &str) -> Result<TrackBuffer>;
}

/// Loader for `http(s)://` and `file://` URLs and local paths
#[derive(Clone, Default)]
pub struct HttpTrackLoader {
    client: reqwest::Client,
}

impl HttpTrackLoader {
    pub fn new() -> Self {
        Self::default()
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if url.starts_with("http://") || url.starts_with("https://") {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| Error::AudioLoad(format!("fetch {}: {}", url, e)))?
                .error_for_status()
                .map_err(|e| Error::AudioLoad(format!("fetch {}: {}", url, e)))?;
            let bytes = response
                .bytes()
                .await
                .map_err(|e| Error::AudioLoad(format!("read {}: {}", url, e)))?;
            return Ok(bytes.to_vec());
        }

        let path = url.strip_prefix("file://").unwrap_or(url);
        tokio::fs::read(path)
            .await
            .map_err(|e| Error::AudioLoad(format!("read {}: {}", path, e)))
    }
}

#[async_trait]
impl TrackLoader for HttpTrackLoader {
    async fn load(&self, url: &str) -> Result<TrackBuffer> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::AudioLoad("empty track url".to_string()));
        }

        let bytes = self.fetch(url).await?;
        debug!("Fetched {} bytes from {}", bytes.len(), url);

        let extension = extension_hint(url);
        let buffer = tokio::task::spawn_blocking(move || decode_bytes(bytes, extension.as_deref()))
            .await
            .map_err(|e| Error::AudioLoad(format!("decode task failed: {}", e)))??;

        info!(
            "Loaded guidance track {} ({:.1}s @ {} Hz)",
            url,
            buffer.duration_secs(),
            buffer.sample_rate()
        );
        Ok(buffer)
    }
}

/// Loader serving pre-decoded tracks from memory
///
/// Unknown URLs fail like an unreachable remote would.
#[derive(Clone, Default)]
pub struct StaticTrackLoader {
    tracks: HashMap<String, Arc<TrackBuffer>>,
}

impl StaticTrackLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_track(mut self, url: impl Into<String>, track: TrackBuffer) -> Self {
        self.tracks.insert(url.into(), Arc::new(track));
        self
    }
}

#[async_trait]
impl TrackLoader for StaticTrackLoader {
    async fn load(&self, url: &str) -> Result<TrackBuffer> {
        self.tracks
            .get(url)
            .map(|t| t.as_ref().clone())
            .ok_or_else(|| Error::AudioLoad(format!("no track at {}", url)))
    }
}

/// File extension of the URL path, ignoring any query string
fn extension_hint(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Decode a whole encoded file into a stereo buffer
pub fn decode_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<TrackBuffer> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::AudioLoad(format!("unrecognized audio format: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::AudioLoad("no audio track found".to_string()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::AudioLoad("sample rate not found".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::AudioLoad(format!("unsupported codec: {}", e)))?;

    let mut samples = Vec::new();
    let mut channels = 0;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                warn!("Error reading packet: {}", e);
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                channels = spec.channels.count();
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping undecodable packet: {}", e);
            }
            Err(e) => return Err(Error::AudioLoad(format!("decode failed: {}", e))),
        }
    }

    if samples.is_empty() {
        return Err(Error::AudioLoad("track decoded to no samples".to_string()));
    }

    Ok(TrackBuffer::from_interleaved(samples, sample_rate, channels))
}
