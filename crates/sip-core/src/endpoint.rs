use crate::transaction::{
    ClientInvTsx, ClientTsx, ServerInvTsx, ServerTsx, Transactions, TsxEvent, TsxKey, TsxMessage,
};
use crate::transport::TransportHandle;
use crate::{
    BaseHeaders, IncomingRequest, Layer, MayTake, OutgoingRequest, OutgoingResponse, Request,
    Response, Result,
};
use bytes::{Bytes, BytesMut};
use bytesstr::BytesStr;
use sip_types::header::typed::{Accept, Allow, Supported, Via};
use sip_types::msg::{Line, MessageLine, PullParser, StatusLine};
use sip_types::{Code, Headers, Method, Name};
use std::fmt::Write;
use std::marker::PhantomData;
use std::mem::take;
use std::ops::Index;
use std::sync::Arc;
use std::{fmt, io};
use tracing::Instrument;

/// The endpoint is the centerpiece of the stack, tying the transport,
/// the transaction tables and the stacked layers together.
///
/// It is a cheaply clonable handle; the endpoint must never be stored
/// inside a layer to avoid cyclic references.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<Inner>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("inner_refcount", &Arc::strong_count(&self.inner))
            .finish_non_exhaustive()
    }
}

struct Inner {
    // capabilities
    accept: Vec<Accept>,
    allow: Vec<Allow>,
    supported: Vec<Supported>,

    transport: TransportHandle,
    transactions: Transactions,

    layer: Box<[Box<dyn Layer>]>,
}

impl Endpoint {
    pub fn builder() -> EndpointBuilder {
        EndpointBuilder::new()
    }

    /// Send an INVITE, returning the transaction driving it
    pub async fn send_invite(&self, request: Request) -> Result<ClientInvTsx> {
        ClientInvTsx::send(self.clone(), request).await
    }

    /// Send a non-INVITE request, returning the transaction driving it
    pub async fn send_request(&self, request: Request) -> Result<ClientTsx> {
        ClientTsx::send(self.clone(), request).await
    }

    pub fn create_server_tsx(&self, request: &IncomingRequest) -> ServerTsx {
        ServerTsx::new(self.clone(), request)
    }

    pub fn create_server_inv_tsx(&self, request: &IncomingRequest) -> ServerInvTsx {
        ServerInvTsx::new(self.clone(), request)
    }

    pub fn accepted(&self) -> &Vec<Accept> {
        &self.inner.accept
    }

    pub fn allowed(&self) -> &Vec<Allow> {
        &self.inner.allow
    }

    pub fn supported(&self) -> &Vec<Supported> {
        &self.inner.supported
    }

    pub fn transport(&self) -> &TransportHandle {
        &self.inner.transport
    }

    /// Create a Via header for the given branch
    pub fn create_via(&self, branch: BytesStr) -> Via {
        Via::new(
            self.inner.transport.via_transport(),
            self.inner.transport.via_host(),
            branch,
        )
    }

    /// Print the request (if not yet printed) and send it
    pub async fn send_outgoing_request(&self, message: &mut OutgoingRequest) -> io::Result<()> {
        if message.buffer.is_empty() {
            message
                .msg
                .headers
                .insert(Name::CONTENT_LENGTH, message.msg.body.len().to_string());

            let mut buffer = BytesMut::new();

            write!(buffer, "{}\r\n{}\r\n", message.msg.line, message.msg.headers)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

            buffer.extend_from_slice(&message.msg.body);

            message.buffer = buffer.freeze();
        }

        log::trace!("sending request\n{}", String::from_utf8_lossy(&message.buffer));

        self.inner.transport.send(message.buffer.clone())
    }

    /// Print the response (if not yet printed) and send it
    pub async fn send_outgoing_response(&self, message: &mut OutgoingResponse) -> io::Result<()> {
        if message.buffer.is_empty() {
            message
                .msg
                .headers
                .insert(Name::CONTENT_LENGTH, message.msg.body.len().to_string());

            let mut buffer = BytesMut::new();

            write!(buffer, "{}\r\n{}\r\n", message.msg.line, message.msg.headers)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

            buffer.extend_from_slice(&message.msg.body);

            message.buffer = buffer.freeze();
        }

        log::trace!(
            "sending response\n{}",
            String::from_utf8_lossy(&message.buffer)
        );

        self.inner.transport.send(message.buffer.clone())
    }

    /// Create a response to an incoming request with the given code
    pub fn create_response(
        &self,
        request: &IncomingRequest,
        code: Code,
        reason: Option<BytesStr>,
    ) -> OutgoingResponse {
        assert_ne!(request.line.method, Method::Ack);

        let mut headers = Headers::with_capacity(5);

        let _ = request.headers.clone_into(&mut headers, Name::VIA);
        headers.insert_type(Name::FROM, &request.base_headers.from);
        headers.insert_type(Name::TO, &request.base_headers.to);
        headers.insert_named(&request.base_headers.call_id);
        headers.insert_named(&request.base_headers.cseq);

        if code == Code::TRYING {
            let _ = request.headers.clone_into(&mut headers, Name::TIMESTAMP);
        }

        OutgoingResponse {
            msg: Response {
                line: StatusLine {
                    code,
                    reason: reason.or_else(|| code.text().map(BytesStr::from_static)),
                },
                headers,
                body: Bytes::new(),
            },
            buffer: Default::default(),
        }
    }

    /// Decode one received frame and feed it into the stack.
    ///
    /// Messages of live transactions are delivered inline so arrival
    /// order is preserved; everything else is dispatched to the layers
    /// on its own task.
    pub fn receive_frame(&self, frame: Bytes) {
        let message = match decode_frame(&frame) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("discarding malformed frame, {}", e);

                if let Some(response) = best_effort_bad_request(&frame) {
                    let endpoint = self.clone();

                    tokio::spawn(async move {
                        let mut response = response;

                        if let Err(e) = endpoint.send_outgoing_response(&mut response).await {
                            log::debug!("failed to send 400 for malformed request, {}", e);
                        }
                    });
                }

                return;
            }
        };

        let tsx_key = match TsxKey::from_message_parts(&message.line, &message.base_headers) {
            Ok(tsx_key) => tsx_key,
            Err(e) => {
                log::warn!("no transaction key for incoming message, {}", e);
                return;
            }
        };

        let tsx_message = TsxMessage {
            line: message.line,
            base_headers: message.base_headers,
            headers: message.headers,
            body: message.body,
        };

        if let Some(handler) = self.transactions().get_tsx_handler(&tsx_key) {
            log::debug!("delegating message to transaction {}", tsx_key);

            if handler.send(TsxEvent::Message(tsx_message)).is_err() {
                log::error!("transaction vanished without unregistering");
                self.transactions().remove_transaction(&tsx_key);
            }

            return;
        }

        let line = match tsx_message.line {
            MessageLine::Request(line) => line,
            MessageLine::Response(_) => {
                log::debug!("discarding orphaned response");
                return;
            }
        };

        let incoming = IncomingRequest {
            tsx_key,
            line,
            base_headers: tsx_message.base_headers,
            headers: tsx_message.headers,
            body: tsx_message.body,
        };

        tokio::spawn(self.clone().do_receive(incoming));
    }

    /// Tell every live transaction that the transport is gone
    pub fn transport_failed(&self) {
        self.inner.transactions.transport_failed();
    }

    #[tracing::instrument(level = "debug", skip(self, incoming), fields(%incoming))]
    async fn do_receive(self, incoming: IncomingRequest) {
        let mut request = Some(incoming);

        for layer in self.inner.layer.iter() {
            let span = tracing::info_span!("receive", layer = %layer.name());

            layer
                .receive(&self, MayTake::new(&mut request))
                .instrument(span)
                .await;

            if request.is_none() {
                return;
            }
        }

        let request = request.expect("checked every iteration");

        log::debug!("no layer handled {}", request.line.method);

        if let Err(e) = self.handle_unwanted_request(request).await {
            log::error!("failed to respond to unhandled request, {:?}", e);
        }
    }

    async fn handle_unwanted_request(&self, request: IncomingRequest) -> Result<()> {
        if request.line.method == Method::Ack {
            return Ok(());
        }

        let response =
            self.create_response(&request, Code::CALL_OR_TRANSACTION_DOES_NOT_EXIST, None);

        if request.line.method == Method::Invite {
            self.create_server_inv_tsx(&request)
                .respond_failure(response)
                .await
        } else {
            self.create_server_tsx(&request).respond(response).await
        }
    }

    pub(crate) fn transactions(&self) -> &Transactions {
        &self.inner.transactions
    }
}

struct DecodedMessage {
    line: MessageLine,
    base_headers: BaseHeaders,
    headers: Headers,
    body: Bytes,
}

/// Parse a complete message out of one frame.
///
/// The body length must match the `Content-Length` header exactly.
fn decode_frame(frame: &Bytes) -> Result<DecodedMessage, anyhow::Error> {
    let mut parser = PullParser::new(frame, 0);

    let mut message_line = None;
    let mut headers = Headers::new();

    for line in &mut parser {
        let line = line.map_err(|_| anyhow::anyhow!("incomplete message head"))?;
        let line = std::str::from_utf8(line)?;

        if message_line.is_none() {
            match MessageLine::parse(frame, line) {
                Ok((_, line)) => message_line = Some(line),
                Err(_) => return Err(anyhow::anyhow!("invalid message line")),
            }
        } else {
            match Line::parse(frame, line) {
                Ok((_, line)) => headers.insert(line.name, line.value),
                Err(_) => log::warn!("skipping malformed header line"),
            }
        }
    }

    let line = message_line.ok_or_else(|| anyhow::anyhow!("missing message line"))?;

    let body = frame.slice(parser.head_end()..);

    let content_length: usize = headers
        .get_named::<sip_types::header::typed::ContentLength>()
        .map(|cl| cl.0)
        .unwrap_or(body.len());

    if content_length != body.len() {
        return Err(anyhow::anyhow!(
            "content-length {} does not match body length {}",
            content_length,
            body.len()
        ));
    }

    let base_headers = BaseHeaders::extract_from(&headers)?;

    Ok(DecodedMessage {
        line,
        base_headers,
        headers,
        body,
    })
}

/// Try to build a 400 for a request that failed decoding, echoing
/// whatever identification headers could be salvaged
fn best_effort_bad_request(frame: &Bytes) -> Option<OutgoingResponse> {
    let mut parser = PullParser::new(frame, 0);

    let first = parser.next()?.ok()?;
    let first = std::str::from_utf8(first).ok()?;

    // only requests are answered
    let line = match MessageLine::parse(frame, first) {
        Ok((_, line @ MessageLine::Request(_))) => line,
        _ => return None,
    };

    if line.request_method() == Some(&Method::Ack) {
        return None;
    }

    let mut headers = Headers::with_capacity(5);

    for raw in parser {
        let raw = raw.ok()?;
        let raw = std::str::from_utf8(raw).ok()?;

        if let Ok((_, line)) = Line::parse(frame, raw) {
            let echoed = [Name::VIA, Name::FROM, Name::TO, Name::CALL_ID, Name::CSEQ];

            if echoed.contains(&line.name) {
                headers.insert(line.name, line.value);
            }
        }
    }

    if !headers.contains(&Name::VIA) {
        return None;
    }

    Some(OutgoingResponse {
        msg: Response {
            line: StatusLine {
                code: Code::BAD_REQUEST,
                reason: Code::BAD_REQUEST.text().map(BytesStr::from_static),
            },
            headers,
            body: Bytes::new(),
        },
        buffer: Default::default(),
    })
}

/// Builder for [`Endpoint`]
pub struct EndpointBuilder {
    accept: Vec<Accept>,
    allow: Vec<Allow>,
    supported: Vec<Supported>,

    transport: Option<TransportHandle>,
    layer: Vec<Box<dyn Layer>>,
}

impl Default for EndpointBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointBuilder {
    pub fn new() -> Self {
        Self {
            accept: vec![],
            allow: vec![],
            supported: vec![],
            transport: None,
            layer: vec![],
        }
    }

    pub fn add_accept(&mut self, accepted: impl Into<Accept>) {
        self.accept.push(accepted.into());
    }

    pub fn add_allow(&mut self, allowed: impl Into<Allow>) {
        self.allow.push(allowed.into());
    }

    pub fn add_supported(&mut self, supported: impl Into<Supported>) {
        self.supported.push(supported.into());
    }

    pub fn set_transport(&mut self, transport: TransportHandle) -> &mut Self {
        self.transport = Some(transport);
        self
    }

    /// Add a [`Layer`] to the endpoint.
    ///
    /// Insertion order is dispatch order for incoming requests.
    pub fn add_layer<L>(&mut self, layer: L) -> LayerKey<L>
    where
        L: Layer,
    {
        let index = self.layer.len();

        self.layer.push(Box::new(layer));

        LayerKey {
            index,
            m: PhantomData::<fn() -> L>,
        }
    }

    pub fn build(&mut self) -> Endpoint {
        let mut layer = take(&mut self.layer).into_boxed_slice();
        for layer in layer.iter_mut() {
            layer.init(self);
        }

        let inner = Inner {
            accept: take(&mut self.accept),
            allow: take(&mut self.allow),
            supported: take(&mut self.supported),
            transport: self
                .transport
                .take()
                .unwrap_or_else(TransportHandle::detached),
            transactions: Default::default(),
            layer,
        };

        Endpoint {
            inner: Arc::new(inner),
        }
    }
}

impl<L: Layer> Index<LayerKey<L>> for Endpoint {
    type Output = L;

    fn index(&self, index: LayerKey<L>) -> &Self::Output {
        self.inner.layer[index.index]
            .downcast_ref()
            .expect("invalid layer key")
    }
}

/// Key to access a layer added to an [`Endpoint`]
pub struct LayerKey<L> {
    index: usize,
    m: PhantomData<fn() -> L>,
}

impl<L> fmt::Debug for LayerKey<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LayerKey").finish()
    }
}

impl<L> Clone for LayerKey<L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<L> Copy for LayerKey<L> {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decode_request_frame() {
        let frame = Bytes::from_static(
            b"INVITE sip:bob@example.com SIP/2.0\r\n\
              Via: SIP/2.0/WS abc.invalid;branch=z9hG4bK776asdhds\r\n\
              Max-Forwards: 70\r\n\
              To: Bob <sip:bob@example.com>\r\n\
              From: Alice <sip:alice@example.com>;tag=1928301774\r\n\
              Call-ID: a84b4c76e66710\r\n\
              CSeq: 314159 INVITE\r\n\
              Content-Length: 5\r\n\
              \r\n\
              v=0\r\n",
        );

        let message = decode_frame(&frame).unwrap();

        assert!(message.line.is_request());
        assert_eq!(message.base_headers.cseq.cseq, 314159);
        assert_eq!(message.base_headers.from.tag.as_ref().unwrap(), "1928301774");
        assert_eq!(&message.body[..], b"v=0\r\n");
    }

    #[test]
    fn decode_rejects_content_length_mismatch() {
        let frame = Bytes::from_static(
            b"MESSAGE sip:bob@example.com SIP/2.0\r\n\
              Via: SIP/2.0/WS abc.invalid;branch=z9hG4bKxyz\r\n\
              To: <sip:bob@example.com>\r\n\
              From: <sip:alice@example.com>;tag=88\r\n\
              Call-ID: m1\r\n\
              CSeq: 1 MESSAGE\r\n\
              Content-Length: 100\r\n\
              \r\n\
              hi",
        );

        assert!(decode_frame(&frame).is_err());
    }

    #[test]
    fn bad_request_needs_a_via() {
        let frame = Bytes::from_static(
            b"MESSAGE sip:bob@example.com SIP/2.0\r\n\
              To: <sip:bob@example.com\r\n\
              \r\n",
        );

        assert!(best_effort_bad_request(&frame).is_none());

        let frame = Bytes::from_static(
            b"MESSAGE sip:bob@example.com SIP/2.0\r\n\
              Via: SIP/2.0/WS abc.invalid;branch=z9hG4bKxyz\r\n\
              CSeq: broken\r\n\
              \r\n",
        );

        let response = best_effort_bad_request(&frame).unwrap();
        assert_eq!(response.msg.line.code, Code::BAD_REQUEST);
    }
}
