//! Named causes for session and registration outcomes

use sip_types::Code;
use std::fmt;

/// Who initiated the state change an event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Originator {
    Local,
    Remote,
    System,
}

/// Why a session or request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    Busy,
    Rejected,
    Redirected,
    Unavailable,
    NotFound,
    AddressIncomplete,
    IncompatibleSdp,
    BadMediaDescription,
    AuthenticationError,
    MissingSdp,
    Canceled,
    NoAnswer,
    Expires,
    NoAck,
    Bye,
    RequestTimeout,
    ConnectionError,
    InternalError,
    SipFailureCode,
}

impl Cause {
    /// Map a final failure status to its named cause
    pub fn from_status(code: Code) -> Cause {
        match code.into_u16() {
            300..=399 => Cause::Redirected,
            401 | 407 => Cause::AuthenticationError,
            404 => Cause::NotFound,
            408 => Cause::RequestTimeout,
            410 | 480 | 604 => Cause::Unavailable,
            415 | 488 | 606 => Cause::IncompatibleSdp,
            484 => Cause::AddressIncomplete,
            486 | 600 => Cause::Busy,
            403 | 603 => Cause::Rejected,
            487 => Cause::Canceled,
            400..=699 => Cause::SipFailureCode,
            _ => Cause::InternalError,
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Cause::Busy => "Busy",
            Cause::Rejected => "Rejected",
            Cause::Redirected => "Redirected",
            Cause::Unavailable => "Unavailable",
            Cause::NotFound => "Not Found",
            Cause::AddressIncomplete => "Address Incomplete",
            Cause::IncompatibleSdp => "Incompatible SDP",
            Cause::BadMediaDescription => "Bad Media Description",
            Cause::AuthenticationError => "Authentication Error",
            Cause::MissingSdp => "Missing SDP",
            Cause::Canceled => "Canceled",
            Cause::NoAnswer => "No Answer",
            Cause::Expires => "Expires",
            Cause::NoAck => "No ACK",
            Cause::Bye => "Terminated",
            Cause::RequestTimeout => "Request Timeout",
            Cause::ConnectionError => "Connection Error",
            Cause::InternalError => "Internal Error",
            Cause::SipFailureCode => "SIP Failure Code",
        };

        f.write_str(text)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(Cause::from_status(Code::BUSY_HERE), Cause::Busy);
        assert_eq!(Cause::from_status(Code::BUSY_EVERYWHERE), Cause::Busy);
        assert_eq!(Cause::from_status(Code::NOT_FOUND), Cause::NotFound);
        assert_eq!(Cause::from_status(Code::REQUEST_TERMINATED), Cause::Canceled);
        assert_eq!(
            Cause::from_status(Code::ADDRESS_INCOMPLETE),
            Cause::AddressIncomplete
        );
        assert_eq!(
            Cause::from_status(Code::NOT_ACCEPTABLE_HERE),
            Cause::IncompatibleSdp
        );
        assert_eq!(
            Cause::from_status(Code::SERVER_INTERNAL_ERROR),
            Cause::SipFailureCode
        );
    }
}
