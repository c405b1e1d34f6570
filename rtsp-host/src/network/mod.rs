//! Network module - stream URL resolution, transports and the session controller

mod controller;
mod framed;
mod session;
mod transport;
mod url;

pub use controller::{
    priming_frame, ControllerError, ControllerState, RestartAction, SessionController,
    SessionControllerBuilder,
};
pub use framed::{FramedSession, PacketHeader};
pub use session::{
    AudioCodec, AudioTrack, ParameterSets, Session, SessionEvent, SessionFactory, SessionRequest,
    StreamInfo, StreamUnit, VideoCodec, VideoTrack,
};
pub use transport::{classify, is_read_timeout, Connection, Connector, FaultClass, TcpConnector, Transport};
pub use url::{Credentials, StreamTarget, UrlError};
