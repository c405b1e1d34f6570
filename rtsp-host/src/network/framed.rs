//! Length-prefixed H.264 session
//!
//! Wire format per packet: `[pts u64 BE][size u32 BE][payload]`. The top two
//! bits of the pts field are flags (config packet, keyframe); the rest is the
//! presentation time in microseconds. The stream is H.264 Annex B with
//! parameter sets sent in-band.

use super::{
    Session, SessionEvent, SessionFactory, SessionRequest, StreamInfo, StreamUnit, Transport,
    VideoCodec, VideoTrack,
};
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

const HEADER_SIZE: usize = 12;
const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;
const MAX_CONSECUTIVE_TIMEOUTS: u32 = 10;
const PTS_FLAG_CONFIG: u64 = 1 << 63;
const PTS_FLAG_KEYFRAME: u64 = 1 << 62;
const PTS_MASK: u64 = PTS_FLAG_KEYFRAME - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub pts_us: i64,
    pub config: bool,
    pub keyframe: bool,
    pub size: usize,
}

impl PacketHeader {
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut pts = [0u8; 8];
        pts.copy_from_slice(&bytes[0..8]);
        let mut size = [0u8; 4];
        size.copy_from_slice(&bytes[8..12]);
        let pts_flags = u64::from_be_bytes(pts);
        Self {
            pts_us: (pts_flags & PTS_MASK) as i64,
            config: pts_flags & PTS_FLAG_CONFIG != 0,
            keyframe: pts_flags & PTS_FLAG_KEYFRAME != 0,
            size: u32::from_be_bytes(size) as usize,
        }
    }
}

pub struct FramedSession {
    transport: Box<dyn Transport>,
    request: SessionRequest,
}

impl FramedSession {
    pub fn new(transport: Box<dyn Transport>, request: SessionRequest) -> Self {
        Self { transport, request }
    }

    /// Factory for `SessionController::builder`
    pub fn factory() -> impl SessionFactory {
        |transport: Box<dyn Transport>, request: SessionRequest| -> Box<dyn Session> {
            Box::new(FramedSession::new(transport, request))
        }
    }
}

impl Session for FramedSession {
    fn execute(
        &mut self,
        stopped: &AtomicBool,
        on_event: &mut dyn FnMut(SessionEvent),
    ) -> io::Result<()> {
        on_event(SessionEvent::Connecting);
        log_verbose!("NET", "Receiving framed stream from {}", self.request.url);

        let mut connected = false;
        let mut total = 0u64;
        let mut packets = 0u64;
        let mut consecutive_timeouts = 0;
        let mut header_buf = [0u8; HEADER_SIZE];
        let start = Instant::now();
        let mut last_log = Instant::now();

        while !stopped.load(Ordering::SeqCst) {
            match self.transport.read_exact(&mut header_buf) {
                Ok(()) => consecutive_timeouts = 0,
                Err(e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    consecutive_timeouts += 1;
                    if consecutive_timeouts > MAX_CONSECUTIVE_TIMEOUTS {
                        log_verbose!("NET", "No data after {} timeouts", consecutive_timeouts);
                        return Err(e);
                    }
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    log_verbose!("NET", "Server closed connection");
                    on_event(SessionEvent::Disconnected);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }

            let header = PacketHeader::parse(&header_buf);
            if header.size > MAX_PACKET_SIZE {
                log_verbose!("NET", "ERROR: Invalid packet size: {} bytes", header.size);
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("packet of {} bytes", header.size),
                ));
            }

            let mut body = vec![0u8; header.size];
            self.transport.read_exact(&mut body)?;

            if !connected {
                connected = true;
                on_event(SessionEvent::Connected(StreamInfo {
                    time_ms: None,
                    video: Some(VideoTrack {
                        codec: VideoCodec::H264,
                        parameter_sets: None,
                    }),
                    audio: None,
                }));
            }

            packets += 1;
            total += (HEADER_SIZE + header.size) as u64;
            if packets % 100 == 0 {
                log_debug!(
                    "NET",
                    "Packet #{}: {} bytes, config={}, keyframe={}",
                    packets,
                    header.size,
                    header.config,
                    header.keyframe
                );
            }
            if self.request.request_video {
                on_event(SessionEvent::Video(StreamUnit::from_vec(body, header.pts_us)));
            }

            if last_log.elapsed().as_secs() >= 10 {
                let elapsed = start.elapsed().as_secs_f64();
                log_verbose!(
                    "NET",
                    "{} packets, {:.1} KB/s",
                    packets,
                    total as f64 / 1024.0 / elapsed
                );
                last_log = Instant::now();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn packet(pts_flags: u64, payload: &[u8]) -> Vec<u8> {
        let mut bytes = pts_flags.to_be_bytes().to_vec();
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    fn request() -> SessionRequest {
        SessionRequest {
            url: "tcp://127.0.0.1:27183/".into(),
            credentials: None,
            request_video: true,
            request_audio: false,
        }
    }

    fn run(bytes: Vec<u8>) -> (io::Result<()>, Vec<SessionEvent>) {
        let mut session = FramedSession::new(Box::new(Cursor::new(bytes)), request());
        let mut events = Vec::new();
        let stopped = AtomicBool::new(false);
        let result = session.execute(&stopped, &mut |event| events.push(event));
        (result, events)
    }

    #[test]
    fn header_flags_and_pts() {
        let mut raw = [0u8; HEADER_SIZE];
        raw[..8].copy_from_slice(&(PTS_FLAG_KEYFRAME | 33_000).to_be_bytes());
        raw[8..].copy_from_slice(&512u32.to_be_bytes());
        let header = PacketHeader::parse(&raw);
        assert_eq!(header.pts_us, 33_000);
        assert!(header.keyframe);
        assert!(!header.config);
        assert_eq!(header.size, 512);
    }

    #[test]
    fn emits_connected_then_units_then_disconnected() {
        let mut bytes = packet(PTS_FLAG_CONFIG, &[0, 0, 0, 1, 0x67]);
        bytes.extend(packet(PTS_FLAG_KEYFRAME | 40_000, &[0, 0, 0, 1, 0x65, 0x88]));
        let (result, events) = run(bytes);
        assert!(result.is_ok());

        assert!(matches!(events[0], SessionEvent::Connecting));
        match &events[1] {
            SessionEvent::Connected(info) => {
                assert_eq!(info.video.as_ref().unwrap().codec, VideoCodec::H264);
                assert!(info.audio.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
        match &events[3] {
            SessionEvent::Video(unit) => {
                assert_eq!(unit.timestamp_us, 40_000);
                assert_eq!(unit.length, 6);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(events[4], SessionEvent::Disconnected));
    }

    #[test]
    fn oversized_packet_is_invalid_data() {
        let mut bytes = 0u64.to_be_bytes().to_vec();
        bytes.extend_from_slice(&(MAX_PACKET_SIZE as u32 + 1).to_be_bytes());
        let (result, _) = run(bytes);
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_body_is_an_error() {
        let mut bytes = packet(0, &[1, 2, 3, 4]);
        bytes.truncate(HEADER_SIZE + 2);
        let (result, events) = run(bytes);
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::Video(_))));
    }

    #[test]
    fn stop_flag_ends_session() {
        let mut session = FramedSession::new(Box::new(Cursor::new(packet(0, &[1]))), request());
        let stopped = AtomicBool::new(true);
        let mut count = 0;
        assert!(session.execute(&stopped, &mut |_| count += 1).is_ok());
        assert_eq!(count, 1);
    }
}
