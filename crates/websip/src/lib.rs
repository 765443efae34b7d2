//! SIP user agent signaling over WebSocket (RFC 3261 + RFC 7118)
//!
//! A [`UserAgent`] connects to one of the configured WebSocket servers,
//! registers with the SIP registrar and places or receives calls whose
//! media is produced by an external engine behind [`MediaBackend`].
//! Short messages, DTMF over INFO and call transfer via REFER/NOTIFY
//! ride on the same machinery.
//!
//! ```no_run
//! # async fn example<M: websip::MediaBackend>(media: M) -> Result<(), Box<dyn std::error::Error>> {
//! use websip::{ServerEntry, UaConfig, UaEvent, UserAgent};
//!
//! let mut config = UaConfig::new(
//!     vec![ServerEntry::new("wss://edge.example.com").weight(2)],
//!     "sip:alice@example.com".parse()?,
//! );
//! config.password = Some("secret".into());
//!
//! let (ua, mut events) = UserAgent::new(config)?;
//! ua.start();
//!
//! let mut outbound = ua.call("bob", media).await?;
//!
//! loop {
//!     match outbound.next_event().await {
//!         websip::OutboundEvent::Progress { code } => println!("ringing: {code}"),
//!         websip::OutboundEvent::Confirmed(call) => break,
//!         websip::OutboundEvent::Failed(reason) => return Err(format!("{reason:?}").into()),
//!     }
//! }
//! # let _ = events;
//! # Ok(())
//! # }
//! ```

mod call;
mod config;
mod events;
mod incoming;
mod media;
mod message;
mod outbound;
mod ua;

pub use call::{Call, CallError, CallEvent};
pub use config::{ConfigError, ServerEntry, UaConfig};
pub use events::{EndReason, UaEvent};
pub use incoming::{AnswerError, IncomingCall, RingOutcome};
pub use media::{mangle_hold_directions, HoldState, MediaBackend, MediaEvent};
pub use message::{IncomingMessage, CONTENT_TYPE_TEXT};
pub use outbound::{MakeCallError, OutboundCall, OutboundEvent};
pub use ua::{UaError, UaStatus, UserAgent};

pub use sip_types::Code;
pub use sip_ua::cause::{Cause, Originator};
pub use sip_ua::invite::dtmf::DtmfOptions;
