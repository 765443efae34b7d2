//! Core of the websip SIP stack
//!
//! Provides the WebSocket transport with recovery, the four RFC 3261
//! transaction state machines and the [`Endpoint`] tying them together.
//! Application logic is built as [`Layer`]s stacked on the endpoint.

use bytes::Bytes;
use downcast_rs::{impl_downcast, Downcast};
use sip_types::header::typed::{CSeq, CallID, FromTo, Via};
use sip_types::header::HeaderError;
use sip_types::msg::{RequestLine, StatusLine};
use sip_types::uri::SipUri;
use sip_types::{Headers, Method, Name};
use std::fmt;
use transaction::TsxKey;

#[macro_use]
mod error;
mod endpoint;
mod may_take;
pub mod transaction;
pub mod transport;

pub use endpoint::{Endpoint, EndpointBuilder, LayerKey};
pub use error::{Error, Result, WithStatus};
pub use may_take::MayTake;

/// Outgoing response
#[derive(Debug)]
pub struct Response {
    pub line: StatusLine,
    pub headers: Headers,
    pub body: Bytes,
}

/// Outgoing request
#[derive(Debug)]
pub struct Request {
    pub line: RequestLine,
    pub headers: Headers,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, uri: SipUri) -> Self {
        Self {
            line: RequestLine { method, uri },
            headers: Headers::default(),
            body: Bytes::new(),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.line.fmt(f)
    }
}

/// A request with its printed wire form, reused for retransmissions
#[derive(Debug)]
pub struct OutgoingRequest {
    pub msg: Request,
    pub buffer: Bytes,
}

/// A response with its printed wire form, reused for retransmissions
#[derive(Debug)]
pub struct OutgoingResponse {
    pub msg: Response,
    pub buffer: Bytes,
}

/// Headers that are part of every valid SIP message
#[derive(Debug, Clone)]
pub struct BaseHeaders {
    pub top_via: Via,
    pub from: FromTo,
    pub to: FromTo,
    pub call_id: CallID,
    pub cseq: CSeq,
}

impl BaseHeaders {
    pub fn extract_from(headers: &Headers) -> Result<Self, HeaderError> {
        let mut via: Vec<Via> = headers.get_all_named()?;

        if via.is_empty() {
            return Err(HeaderError::missing(Name::VIA));
        }

        Ok(Self {
            top_via: via.remove(0),
            from: headers.get(Name::FROM)?,
            to: headers.get(Name::TO)?,
            call_id: headers.get_named()?,
            cseq: headers.get_named()?,
        })
    }
}

/// Request received by the endpoint, passed to transactions and layers
#[derive(Debug)]
pub struct IncomingRequest {
    pub tsx_key: TsxKey,

    pub line: RequestLine,
    pub base_headers: BaseHeaders,
    pub headers: Headers,
    pub body: Bytes,
}

impl fmt::Display for IncomingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.line.fmt(f)
    }
}

/// Layers extend the endpoint with application logic.
///
/// Each request that does not belong to a transaction is offered to every
/// layer in insertion order until one takes it.
#[async_trait::async_trait]
pub trait Layer: Downcast + Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Called while building the endpoint, layers may register their
    /// capabilities here
    fn init(&mut self, _endpoint: &mut EndpointBuilder) {}

    async fn receive(&self, endpoint: &Endpoint, request: MayTake<'_, IncomingRequest>);
}

impl_downcast!(Layer);
