//! Interface to the external media engine.
//!
//! The signaling core treats SDP as opaque text; everything about
//! tracks, ICE and encryption lives behind [`MediaBackend`]. The only
//! SDP surgery done here is the direction mangling used for hold.

use bytesstr::BytesStr;
use std::fmt::Write;

/// The media engine a call drives.
///
/// Mirrors the operations of an RTCPeerConnection wrapper: offers and
/// answers are created by the engine, remote descriptions are applied
/// to it, and it reports transport-level failures.
#[async_trait::async_trait]
pub trait MediaBackend: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create a local offer and apply it as the local description
    async fn create_offer(&mut self) -> Result<BytesStr, Self::Error>;

    /// Apply the remote offer and create the local answer
    async fn create_answer(&mut self, remote_offer: BytesStr) -> Result<BytesStr, Self::Error>;

    /// Apply the peer's answer to a previously created offer
    async fn set_remote_answer(&mut self, answer: BytesStr) -> Result<(), Self::Error>;

    /// Whether the engine is ready for another offer/answer exchange
    fn ready(&self) -> bool;

    /// Tear down the engine
    async fn close(&mut self);

    /// Next engine event; pends forever when the engine has none
    async fn run(&mut self) -> Result<MediaEvent, Self::Error>;
}

/// Failure events of the media engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    /// The media connection was lost
    ConnectionLost,
    /// ICE negotiation failed
    IceFailed,
}

/// Which directions a renegotiated offer must be restricted to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HoldState {
    pub local: bool,
    pub remote: bool,
}

impl HoldState {
    pub fn active(&self) -> bool {
        self.local || self.remote
    }
}

/// Rewrite the `a=` direction attributes of an offer for hold.
///
/// Local-only hold stops sending of the peer: `sendrecv` becomes
/// `sendonly` and `recvonly` becomes `inactive`. Remote-only hold is
/// the mirror image, and with both sides on hold every media section
/// goes `inactive`.
pub fn mangle_hold_directions(sdp: &str, hold: HoldState) -> String {
    if !hold.active() {
        return sdp.to_string();
    }

    let mut out = String::with_capacity(sdp.len());

    for line in sdp.split_inclusive('\n') {
        let stripped = line.trim_end_matches(['\r', '\n']);

        let direction = match stripped {
            "a=sendrecv" | "a=sendonly" | "a=recvonly" | "a=inactive" => {
                &stripped[2..]
            }
            _ => {
                out.push_str(line);
                continue;
            }
        };

        let mangled = match (hold.local, hold.remote) {
            (true, true) => "inactive",
            (true, false) => match direction {
                "sendrecv" => "sendonly",
                "recvonly" => "inactive",
                other => other,
            },
            (false, true) => match direction {
                "sendrecv" => "recvonly",
                "sendonly" => "inactive",
                other => other,
            },
            (false, false) => unreachable!("checked by hold.active"),
        };

        let _ = write!(out, "a={}\r\n", mangled);
    }

    out
}

#[cfg(test)]
mod test {
    use super::*;

    const OFFER: &str = "v=0\r\n\
        o=- 1 1 IN IP4 0.0.0.0\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
        a=sendrecv\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
        a=recvonly\r\n";

    #[test]
    fn no_hold_is_identity() {
        assert_eq!(mangle_hold_directions(OFFER, HoldState::default()), OFFER);
    }

    #[test]
    fn local_hold() {
        let mangled = mangle_hold_directions(
            OFFER,
            HoldState {
                local: true,
                remote: false,
            },
        );

        assert!(mangled.contains("a=sendonly\r\n"));
        assert!(mangled.contains("a=inactive\r\n"));
        assert!(!mangled.contains("a=sendrecv"));
    }

    #[test]
    fn remote_hold() {
        let mangled = mangle_hold_directions(
            OFFER,
            HoldState {
                local: false,
                remote: true,
            },
        );

        assert!(mangled.contains("a=recvonly\r\n"));
        // recvonly stays untouched under remote-only hold
        assert_eq!(mangled.matches("a=recvonly").count(), 2);
    }

    #[test]
    fn both_sides_hold_is_all_inactive() {
        let mangled = mangle_hold_directions(
            OFFER,
            HoldState {
                local: true,
                remote: true,
            },
        );

        assert_eq!(mangled.matches("a=inactive").count(), 2);
        assert!(!mangled.contains("sendrecv"));
        assert!(!mangled.contains("recvonly"));
    }
}
