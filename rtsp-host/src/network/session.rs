//! Session contract between the controller and a streaming protocol client
//!
//! A session owns the transport, negotiates the stream and then reports
//! everything it sees through `SessionEvent`s until the peer hangs up, an
//! error occurs or the stop flag is raised.

use super::{Credentials, Transport};
use crate::codec::{MIME_AAC, MIME_H264, MIME_H265, MIME_PCM};
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
}

impl VideoCodec {
    pub fn mime(self) -> &'static str {
        match self {
            VideoCodec::H264 => MIME_H264,
            VideoCodec::H265 => MIME_H265,
        }
    }
}

/// Codec configuration units advertised by the stream description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSets {
    /// H.265 only
    pub vps: Option<Vec<u8>>,
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
}

impl ParameterSets {
    /// VPS (if any), SPS and PPS back to back, ready to feed a decoder
    pub fn priming_bytes(&self) -> Vec<u8> {
        let vps = self.vps.as_deref().unwrap_or_default();
        let mut bytes = Vec::with_capacity(vps.len() + self.sps.len() + self.pps.len());
        bytes.extend_from_slice(vps);
        bytes.extend_from_slice(&self.sps);
        bytes.extend_from_slice(&self.pps);
        bytes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoTrack {
    pub codec: VideoCodec,
    pub parameter_sets: Option<ParameterSets>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Aac,
    /// 16-bit big-endian linear PCM
    L16,
}

impl AudioCodec {
    pub fn mime(self) -> &'static str {
        match self {
            AudioCodec::Aac => MIME_AAC,
            AudioCodec::L16 => MIME_PCM,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    pub codec: AudioCodec,
    pub sample_rate_hz: u32,
    pub channel_count: u32,
    /// Codec specific data (AudioSpecificConfig for AAC)
    pub codec_config: Option<Vec<u8>>,
}

/// What the session negotiated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInfo {
    /// Stream start time in milliseconds, when the server reports one
    pub time_ms: Option<i64>,
    pub video: Option<VideoTrack>,
    pub audio: Option<AudioTrack>,
}

/// A received access unit; `offset..offset + length` of `data` is payload
#[derive(Debug, Clone)]
pub struct StreamUnit {
    pub data: Arc<Vec<u8>>,
    pub offset: usize,
    pub length: usize,
    pub timestamp_us: i64,
}

impl StreamUnit {
    pub fn from_vec(data: Vec<u8>, timestamp_us: i64) -> Self {
        let length = data.len();
        Self {
            data: Arc::new(data),
            offset: 0,
            length,
            timestamp_us,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connecting,
    Connected(StreamInfo),
    Disconnected,
    /// Server rejected the credentials
    Unauthorized,
    /// Server answered 204 No Content to an archive request
    ArchiveUnavailable,
    /// Any other rejection, with the server's reason
    Failed(String),
    /// The socket broke in a way that needs a fresh controller
    SocketFailure(String),
    Video(StreamUnit),
    Audio(StreamUnit),
}

/// What to ask the server for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    /// Credential-free URL
    pub url: String,
    pub credentials: Option<Credentials>,
    pub request_video: bool,
    pub request_audio: bool,
}

pub trait Session {
    /// Run until the peer closes, an I/O error occurs or `stopped` is raised.
    /// A clean end returns `Ok`; a broken transport returns the I/O error.
    fn execute(
        &mut self,
        stopped: &AtomicBool,
        on_event: &mut dyn FnMut(SessionEvent),
    ) -> io::Result<()>;
}

/// Builds a session over a freshly connected transport
pub trait SessionFactory: Send + Sync {
    fn create(&self, transport: Box<dyn Transport>, request: SessionRequest) -> Box<dyn Session>;
}

impl<F> SessionFactory for F
where
    F: Fn(Box<dyn Transport>, SessionRequest) -> Box<dyn Session> + Send + Sync,
{
    fn create(&self, transport: Box<dyn Transport>, request: SessionRequest) -> Box<dyn Session> {
        self(transport, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priming_bytes_concatenate_in_order() {
        let sets = ParameterSets {
            vps: Some(vec![0x40]),
            sps: vec![0x67, 0x01],
            pps: vec![0x68],
        };
        assert_eq!(sets.priming_bytes(), vec![0x40, 0x67, 0x01, 0x68]);

        let sets = ParameterSets {
            vps: None,
            sps: vec![0xAA],
            pps: vec![0xBB],
        };
        assert_eq!(sets.priming_bytes(), vec![0xAA, 0xBB]);
    }

    #[test]
    fn codec_mimes() {
        assert_eq!(VideoCodec::H264.mime(), "video/avc");
        assert_eq!(VideoCodec::H265.mime(), "video/hevc");
        assert_eq!(AudioCodec::Aac.mime(), "audio/mp4a-latm");
        assert_eq!(AudioCodec::L16.mime(), "audio/raw");
    }
}
