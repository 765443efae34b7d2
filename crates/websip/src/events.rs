//! Events the user agent reports to its owner

use crate::incoming::IncomingCall;
use crate::message::IncomingMessage;
use bytesstr::BytesStr;
use sip_types::Code;
use sip_ua::cause::{Cause, Originator};

/// User-agent level event stream.
///
/// Call-level progress is reported by the call objects themselves while
/// they are driven; this channel carries everything that is not bound
/// to one live call object.
pub enum UaEvent {
    /// The transport connected
    Connected { server: BytesStr },
    /// The transport is gone; recovery may follow
    Disconnected { error: Option<String> },
    /// A REGISTER binding is in place
    Registered { expires_secs: u64 },
    /// The binding is gone, either on request or with the transport
    Unregistered,
    /// The registrar refused the binding
    RegistrationFailed { code: Option<Code>, cause: Cause },
    /// An incoming call awaits an answer
    IncomingCall(IncomingCall),
    /// A MESSAGE arrived
    NewMessage(IncomingMessage),
}

impl std::fmt::Debug for UaEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected { server } => f.debug_struct("Connected").field("server", server).finish(),
            Self::Disconnected { error } => {
                f.debug_struct("Disconnected").field("error", error).finish()
            }
            Self::Registered { expires_secs } => f
                .debug_struct("Registered")
                .field("expires_secs", expires_secs)
                .finish(),
            Self::Unregistered => f.write_str("Unregistered"),
            Self::RegistrationFailed { code, cause } => f
                .debug_struct("RegistrationFailed")
                .field("code", code)
                .field("cause", cause)
                .finish(),
            Self::IncomingCall(_) => f.write_str("IncomingCall"),
            Self::NewMessage(_) => f.write_str("NewMessage"),
        }
    }
}

/// How a call ended or failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndReason {
    pub originator: Originator,
    pub code: Option<Code>,
    pub cause: Cause,
}

impl EndReason {
    pub fn with_cause(mut self, cause: Cause) -> Self {
        self.cause = cause;
        self
    }

    pub fn local(cause: Cause) -> Self {
        Self {
            originator: Originator::Local,
            code: None,
            cause,
        }
    }

    pub fn remote(code: Code) -> Self {
        Self {
            originator: Originator::Remote,
            code: Some(code),
            cause: Cause::from_status(code),
        }
    }

    /// Remote action without a status code of its own, e.g. a BYE
    pub fn remote_cause(cause: Cause) -> Self {
        Self {
            originator: Originator::Remote,
            code: None,
            cause,
        }
    }

    pub fn system(cause: Cause) -> Self {
        Self {
            originator: Originator::System,
            code: None,
            cause,
        }
    }
}
