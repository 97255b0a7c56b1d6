use std::fmt;
use std::io;
use std::sync::mpsc::SendError;

use rmp_serde::decode::Error as MsgPackError;
use serde_json::Error as JSONError;
use url::ParseError;
use ws::Error as WSError;

use crate::messages::{self, Reason};

use super::{ErrorType, Message, ID};

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug)]
pub enum ErrorKind {
    WSError(WSError),
    URLError(ParseError),
    HandshakeError(Reason),
    UnexpectedMessage(&'static str), // Used when a peer receives another message before Welcome or Hello
    ThreadError(SendError<messages::Message>),
    ConnectionLost,
    Closing(String),
    JSONError(JSONError),
    MsgPackError(MsgPackError),
    MalformedData,
    InvalidMessageType(Message),
    InvalidState(&'static str),
    Timeout,
    ErrorReason(ErrorType, ID, Reason),
    /// Transport-level I/O failure (raw-socket reads/writes, TCP accept, ...).
    Io(io::Error),
    /// Handshake bytes did not match either transport's expected framing.
    BadHandshake(String),
    /// A peer sent a structurally valid message that violated protocol order
    /// (e.g. AUTHENTICATE before CHALLENGE, a message before HELLO/WELCOME).
    ProtocolViolation(String),
    /// WAMP-CRA signature check failed, or no credentials were found for the
    /// supplied authid.
    AuthFailed(String),
    /// An application-level error surfaced through the call/invocation path.
    AppError(Reason),
    /// A pending call or invocation was cancelled, e.g. because its session
    /// closed while the call was outstanding.
    Canceled,
    /// An integer value fell outside the signed 64-bit range the value model
    /// supports.
    NumericRange,
}
impl Error {
    pub fn new(kind: ErrorKind) -> Error {
        Error { kind }
    }

    fn get_description(&self) -> String {
        format!("WAMP Error: {}", self.kind.description())
    }

    #[inline]
    pub fn get_kind(self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get_description())
    }
}

impl ErrorKind {
    pub fn description(&self) -> String {
        match *self {
            ErrorKind::WSError(ref e) => e.to_string(),
            ErrorKind::URLError(ref e) => e.to_string(),
            ErrorKind::HandshakeError(ref r) => r.to_string(),
            ErrorKind::ThreadError(ref e) => e.to_string(),
            ErrorKind::JSONError(ref e) => e.to_string(),
            ErrorKind::MsgPackError(ref e) => e.to_string(),
            ErrorKind::ErrorReason(_, _, ref s) => s.to_string(),
            ErrorKind::Closing(ref s) => s.clone(),
            ErrorKind::UnexpectedMessage(s) | ErrorKind::InvalidState(s) => s.to_string(),
            ErrorKind::ConnectionLost => "Connection Lost".to_string(),
            ErrorKind::MalformedData => "Malformed Data".to_string(),
            ErrorKind::Timeout => "Connection timed out".to_string(),
            ErrorKind::InvalidMessageType(ref t) => format!("Invalid Message Type: {:?}", t),
            ErrorKind::Io(ref e) => e.to_string(),
            ErrorKind::BadHandshake(ref s) => format!("Bad handshake: {}", s),
            ErrorKind::ProtocolViolation(ref s) => format!("Protocol violation: {}", s),
            ErrorKind::AuthFailed(ref s) => format!("Authentication failed: {}", s),
            ErrorKind::AppError(ref r) => r.to_string(),
            ErrorKind::Canceled => "Call canceled".to_string(),
            ErrorKind::NumericRange => "Integer out of supported range".to_string(),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::new(ErrorKind::Io(e))
    }
}
