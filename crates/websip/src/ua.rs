use crate::config::{ConfigError, UaConfig};
use crate::events::{EndReason, UaEvent};
use crate::incoming::IncomingCall;
use crate::media::MediaBackend;
use crate::message::{IncomingMessage, MessageSender, CONTENT_TYPE_TEXT};
use crate::outbound::{MakeCallError, OutboundCall};
use bytesstr::BytesStr;
use parking_lot::Mutex;
use sip_auth::{CredentialStore, DigestCredentials, UacAuthSession};
use sip_core::transport::{TransportEvent, TransportPool, TransportShutdown};
use sip_core::{Endpoint, IncomingRequest, Layer, LayerKey, MayTake};
use sip_types::header::typed::{Accept, Contact, ContentType};
use sip_types::uri::{NameAddr, Param, SipUri};
use sip_types::{Code, Method};
use sip_ua::cause::Cause;
use sip_ua::dialog::DialogLayer;
use sip_ua::invite::acceptor::Acceptor;
use sip_ua::invite::timer::SessionTimerConfig;
use sip_ua::invite::InviteLayer;
use sip_ua::refer::normalize_target;
use sip_ua::register::{Registration, RemoveBinding};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Lifecycle state of the user agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UaStatus {
    Init,
    Ready,
    NotReady,
    UserClosed,
}

/// Errors of the user-facing API
#[derive(Debug, thiserror::Error)]
pub enum UaError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("operation requires a connected user agent")]
    NotReady,
    #[error("user agent was stopped")]
    UserClosed,
    #[error("target is not a valid SIP uri: {0}")]
    InvalidTarget(String),
    #[error("registration failed")]
    RegistrationFailed(EndReason),
    #[error("message could not be delivered")]
    MessageFailed(EndReason),
    #[error(transparent)]
    Core(#[from] sip_core::Error),
}

struct PendingStart {
    pool: TransportPool,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
}

struct Shared {
    config: UaConfig,
    preloaded_routes: Vec<sip_types::header::typed::Route>,
    pending_start: Mutex<Option<PendingStart>>,
    status: Mutex<UaStatus>,
    registered: Arc<AtomicBool>,
    contact: Arc<Mutex<Contact>>,
    credentials: CredentialStore,
    registration: tokio::sync::Mutex<Registration>,
    refresh_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    events: mpsc::UnboundedSender<UaEvent>,
    transport_shutdown: TransportShutdown,
    dialog_layer: LayerKey<DialogLayer>,
    invite_layer: LayerKey<InviteLayer>,
}

/// A SIP user agent signaling over WebSocket.
///
/// Owns the transport, the transaction tables and the registration;
/// calls and messages are created through it. Events that are not bound
/// to a live call are delivered on the channel handed out by
/// [`UserAgent::new`].
#[derive(Clone)]
pub struct UserAgent {
    endpoint: Endpoint,
    shared: Arc<Shared>,
}

impl UserAgent {
    /// Validate `config` and build the agent.
    ///
    /// The agent is inert until [`UserAgent::start`] is called.
    pub fn new(config: UaConfig) -> Result<(Self, mpsc::UnboundedReceiver<UaEvent>), UaError> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let (pool, transport, transport_shutdown, transport_events) = TransportPool::new(
            config.server_descs(),
            config.recovery(),
            Arc::new(sip_core::transport::ws::WsFactory),
        );

        if config.hack_via_tcp {
            pool.set_via_transport(BytesStr::from_static("TCP"));
        }

        let user = config.uri.user.clone().expect("validated");

        let contact_host = if config.hack_ip_in_contact {
            // some registrars refuse `.invalid` hostnames; hand them a
            // random rfc1918 address instead
            use rand::Rng;

            let mut rng = rand::thread_rng();
            sip_types::host::HostPort {
                host: sip_types::host::Host::Ip4(std::net::Ipv4Addr::new(
                    10,
                    rng.gen(),
                    rng.gen(),
                    rng.gen(),
                )),
                port: None,
            }
        } else {
            transport.via_host()
        };

        let contact_uri = SipUri::new(contact_host)
            .user(user.clone())
            .with_uri_param(Param::value("transport", "ws"));

        let preloaded_routes = if config.use_preloaded_route {
            config
                .preloaded_routes
                .iter()
                .filter_map(|route| route.parse::<SipUri>().ok())
                .map(|uri| {
                    sip_types::header::typed::Route::new(sip_types::uri::NameAddr::uri(uri))
                })
                .collect()
        } else {
            Vec::new()
        };

        let contact = Arc::new(Mutex::new(Contact::new(NameAddr::uri(contact_uri.clone()))));
        let registered = Arc::new(AtomicBool::new(false));

        let timer_config = SessionTimerConfig {
            enabled: config.session_timers,
            ..Default::default()
        };

        let mut builder = Endpoint::builder();
        builder.set_transport(transport);
        builder.add_accept(Accept::new("application/sdp"));
        builder.add_accept(Accept::new("application/dtmf-relay"));
        builder.add_allow(Method::Options);
        builder.add_allow(Method::Message);

        let dialog_layer = builder.add_layer(DialogLayer::default());
        let invite_layer = builder.add_layer(InviteLayer::default());

        let ua_layer = builder.add_layer(UaLayer {
            dialog_layer,
            invite_layer,
            user: user.clone(),
            no_answer_timeout: Duration::from_secs(u64::from(config.no_answer_timeout)),
            timer_config,
            registered: registered.clone(),
            contact: contact.clone(),
            events: events_tx.clone(),
            shared: std::sync::OnceLock::new(),
        });

        let endpoint = builder.build();

        let mut credentials = CredentialStore::new();

        if config.has_credentials() {
            let user = config.digest_user().expect("validated");

            let digest = match (&config.password, &config.ha1) {
                (Some(password), _) => DigestCredentials::new(user, password.clone()),
                (None, Some(ha1)) => DigestCredentials::with_ha1(user, ha1.clone()),
                (None, None) => unreachable!("has_credentials checked"),
            };

            credentials.set_default(digest);
        }

        let registration = Registration::new(
            NameAddr::uri(config.uri.clone()),
            NameAddr::uri(contact_uri),
            SipUri::new(config.uri.host_port.clone()),
            format!("urn:uuid:{}", uuid::Uuid::new_v4()),
            Duration::from_secs(u64::from(config.register_expires)),
        );

        let shared = Arc::new(Shared {
            config,
            preloaded_routes,
            pending_start: Mutex::new(Some(PendingStart {
                pool,
                transport_events,
            })),
            status: Mutex::new(UaStatus::Init),
            registered,
            contact,
            credentials,
            registration: tokio::sync::Mutex::new(registration),
            refresh_task: Mutex::new(None),
            events: events_tx,
            transport_shutdown,
            dialog_layer,
            invite_layer,
        });

        let ua = Self { endpoint, shared };

        let _ = ua.endpoint[ua_layer]
            .shared
            .set(Arc::downgrade(&ua.shared));

        Ok((ua, events_rx))
    }

    /// Begin connecting to the configured servers.
    ///
    /// A no-op when called more than once; a stopped agent stays
    /// stopped.
    pub fn start(&self) {
        if self.status() == UaStatus::UserClosed {
            return;
        }

        let Some(pending) = self.shared.pending_start.lock().take() else {
            return;
        };

        tokio::spawn(self.clone().transport_event_task(pending.transport_events));
        tokio::spawn(pending.pool.run());
    }

    pub fn status(&self) -> UaStatus {
        *self.shared.status.lock()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn dialog_layer(&self) -> LayerKey<DialogLayer> {
        self.shared.dialog_layer
    }

    pub(crate) fn invite_layer(&self) -> LayerKey<InviteLayer> {
        self.shared.invite_layer
    }

    pub(crate) fn credentials(&self) -> &CredentialStore {
        &self.shared.credentials
    }

    /// Domain bare targets are resolved against
    pub(crate) fn domain(&self) -> &sip_types::host::HostPort {
        &self.shared.config.uri.host_port
    }

    /// Stamp the configured preloaded routes onto an out-of-dialog
    /// request
    pub(crate) fn apply_preloaded_routes(&self, headers: &mut sip_types::Headers) {
        for route in &self.shared.preloaded_routes {
            headers.insert_named(route);
        }
    }

    /// STUN and TURN server lists for the media engine
    pub fn ice_servers(&self) -> (&[String], &[String]) {
        (
            &self.shared.config.stun_servers,
            &self.shared.config.turn_servers,
        )
    }

    pub(crate) fn session_timer_config(&self) -> SessionTimerConfig {
        SessionTimerConfig {
            enabled: self.shared.config.session_timers,
            ..Default::default()
        }
    }

    /// The Contact placed into requests, the GRUU once one was granted
    pub fn contact(&self) -> Contact {
        self.shared.contact.lock().clone()
    }

    fn local_addr(&self) -> NameAddr {
        NameAddr::uri(self.shared.config.uri.clone())
    }

    fn ensure_ready(&self) -> Result<(), UaError> {
        match self.status() {
            UaStatus::Ready => Ok(()),
            UaStatus::UserClosed => Err(UaError::UserClosed),
            _ => Err(UaError::NotReady),
        }
    }

    async fn transport_event_task(
        self,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        while let Some(event) = transport_events.recv().await {
            match event {
                TransportEvent::Message(frame) => {
                    self.endpoint.receive_frame(frame);
                }
                TransportEvent::Connected { server } => {
                    {
                        let mut status = self.shared.status.lock();

                        if *status == UaStatus::UserClosed {
                            continue;
                        }

                        *status = UaStatus::Ready;
                    }

                    let _ = self.shared.events.send(UaEvent::Connected { server });

                    if self.shared.config.register {
                        let ua = self.clone();

                        tokio::spawn(async move {
                            if let Err(e) = ua.register().await {
                                log::warn!("auto-register failed, {}", e);
                            }
                        });
                    }
                }
                TransportEvent::Closed { error } => {
                    {
                        let mut status = self.shared.status.lock();

                        if *status != UaStatus::UserClosed {
                            *status = UaStatus::NotReady;
                        }
                    }

                    // fail every live transaction, their owners see a
                    // transport error
                    self.endpoint.transport_failed();

                    self.abort_refresh();

                    // the binding dies with the connection, nothing is
                    // sent
                    if self.shared.registered.swap(false, Ordering::SeqCst) {
                        self.shared.registration.lock().await.mark_unregistered();
                        let _ = self.shared.events.send(UaEvent::Unregistered);
                    }

                    let _ = self.shared.events.send(UaEvent::Disconnected { error });
                }
                TransportEvent::Error { server, error } => {
                    log::info!("connect to {} failed, {}", server, error);
                }
            }
        }
    }

    /// Register with the configured registrar and keep the binding
    /// refreshed until [`UserAgent::unregister`] or [`UserAgent::stop`]
    pub async fn register(&self) -> Result<(), UaError> {
        self.ensure_ready()?;

        let outcome = self.register_once(RemoveBinding::No).await;

        match outcome {
            Ok(expires) => {
                let was_registered = self.shared.registered.swap(true, Ordering::SeqCst);

                let _ = self.shared.events.send(UaEvent::Registered {
                    expires_secs: expires.as_secs(),
                });

                if !was_registered {
                    self.spawn_refresh_task();
                }

                Ok(())
            }
            Err(reason) => {
                let _ = self.shared.events.send(UaEvent::RegistrationFailed {
                    code: reason.code,
                    cause: reason.cause,
                });

                if self.shared.registered.swap(false, Ordering::SeqCst) {
                    let _ = self.shared.events.send(UaEvent::Unregistered);
                }

                Err(UaError::RegistrationFailed(reason))
            }
        }
    }

    /// Remove the binding; `all` clears every binding of the address of
    /// record with `Contact: *`
    pub async fn unregister(&self, all: bool) -> Result<(), UaError> {
        self.abort_refresh();

        let remove = if all {
            RemoveBinding::All
        } else {
            RemoveBinding::Current
        };

        let result = self.register_once(remove).await;

        self.shared.registration.lock().await.cancel_refresh();

        if self.shared.registered.swap(false, Ordering::SeqCst) {
            let _ = self.shared.events.send(UaEvent::Unregistered);
        }

        result
            .map(|_| ())
            .map_err(UaError::RegistrationFailed)
    }

    /// One REGISTER exchange with digest retry and a single 423 retry
    async fn register_once(&self, remove: RemoveBinding) -> Result<Duration, EndReason> {
        let mut registration = self.shared.registration.lock().await;

        let mut auth = UacAuthSession::<sip_auth::DigestAuthenticator>::default();
        let mut retried_too_brief = false;

        loop {
            let mut request = registration.create_register(remove);

            self.apply_preloaded_routes(&mut request.headers);

            for allow in self.endpoint.allowed() {
                request.headers.insert_named(allow);
            }

            auth.authorize_request(&mut request.headers);

            let mut transaction = self
                .endpoint
                .send_request(request)
                .await
                .map_err(|_| EndReason::system(Cause::ConnectionError))?;

            let response = match transaction.receive_final().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    return Err(EndReason::system(Cause::RequestTimeout))
                }
                Err(_) => return Err(EndReason::system(Cause::ConnectionError)),
            };

            let code = response.line.code;

            match code.into_u16() {
                200..=299 => {
                    if remove == RemoveBinding::No {
                        registration.receive_success_response(&response);

                        if registration.has_gruu() {
                            *self.shared.contact.lock() = registration.contact().clone();
                        }
                    }

                    return Ok(registration.granted_expires());
                }
                401 | 407 => {
                    let request = transaction.request();

                    let handled = auth.handle_authenticate(
                        &response.headers,
                        &self.shared.credentials,
                        sip_auth::RequestParts {
                            line: &request.msg.line,
                            headers: &request.msg.headers,
                            body: &request.msg.body,
                        },
                    );

                    if handled.is_err() {
                        return Err(EndReason::remote(code));
                    }
                }
                423 => {
                    if retried_too_brief
                        || !registration.receive_interval_too_brief(&response)
                    {
                        return Err(EndReason::remote(code));
                    }

                    retried_too_brief = true;
                }
                _ => return Err(EndReason::remote(code)),
            }
        }
    }

    fn spawn_refresh_task(&self) {
        let ua = self.clone();

        let task = tokio::spawn(async move {
            loop {
                // take the deadline without holding the lock while
                // sleeping, user-initiated REGISTERs stay possible
                let deadline = ua.shared.registration.lock().await.refresh_deadline();

                let Some(deadline) = deadline else {
                    break;
                };

                tokio::time::sleep_until(deadline).await;

                match ua.register_once(RemoveBinding::No).await {
                    Ok(_) => {
                        log::debug!("registration refreshed");
                    }
                    Err(reason) => {
                        let _ = ua.shared.events.send(UaEvent::RegistrationFailed {
                            code: reason.code,
                            cause: reason.cause,
                        });

                        if ua.shared.registered.swap(false, Ordering::SeqCst) {
                            let _ = ua.shared.events.send(UaEvent::Unregistered);
                        }

                        break;
                    }
                }
            }
        });

        if let Some(old) = self.shared.refresh_task.lock().replace(task) {
            old.abort();
        }
    }

    fn abort_refresh(&self) {
        if let Some(task) = self.shared.refresh_task.lock().take() {
            task.abort();
        }
    }

    /// Place a call to `target`, which may be a full URI or a bare
    /// user(@host) resolved against the configured domain
    pub async fn call<M: MediaBackend>(
        &self,
        target: &str,
        media: M,
    ) -> Result<OutboundCall<M>, MakeCallError> {
        self.ensure_ready().map_err(MakeCallError::Ua)?;

        let target = normalize_target(target, &self.shared.config.uri.host_port)
            .ok_or_else(|| MakeCallError::Ua(UaError::InvalidTarget(target.to_string())))?;

        OutboundCall::make(self.clone(), self.local_addr(), self.contact(), target, media).await
    }

    /// Send a MESSAGE to `target`
    pub async fn send_message(
        &self,
        target: &str,
        body: impl Into<bytes::Bytes>,
        content_type: Option<ContentType>,
    ) -> Result<(), UaError> {
        self.ensure_ready()?;

        let target = normalize_target(target, &self.shared.config.uri.host_port)
            .ok_or_else(|| UaError::InvalidTarget(target.to_string()))?;

        let sender = MessageSender {
            local: self.local_addr(),
            target,
            content_type: content_type.unwrap_or(CONTENT_TYPE_TEXT),
            body: body.into(),
            routes: self.shared.preloaded_routes.clone(),
        };

        let mut auth = UacAuthSession::<sip_auth::DigestAuthenticator>::default();

        sender
            .send(&self.endpoint, &mut auth, &self.shared.credentials)
            .await
            .map_err(UaError::MessageFailed)
    }

    /// Stop the agent: remove the binding, close the transport and
    /// refuse any further operation
    pub async fn stop(&self) {
        {
            let mut status = self.shared.status.lock();

            if *status == UaStatus::UserClosed {
                return;
            }

            *status = UaStatus::UserClosed;
        }

        self.abort_refresh();

        if self.shared.registered.load(Ordering::SeqCst) {
            if let Err(e) = self.register_once(RemoveBinding::Current).await {
                log::debug!("unregister on stop failed, {:?}", e.cause);
            }

            self.shared.registered.store(false, Ordering::SeqCst);
            let _ = self.shared.events.send(UaEvent::Unregistered);
        }

        self.shared.transport_shutdown.shutdown();
    }
}

/// The dispatcher for requests no other layer claimed: out-of-dialog
/// OPTIONS, MESSAGE and INVITE, plus the final refusals
struct UaLayer {
    dialog_layer: LayerKey<DialogLayer>,
    invite_layer: LayerKey<InviteLayer>,
    user: BytesStr,
    no_answer_timeout: Duration,
    timer_config: SessionTimerConfig,
    registered: Arc<AtomicBool>,
    contact: Arc<Mutex<Contact>>,
    events: mpsc::UnboundedSender<UaEvent>,

    /// Back-reference to the agent owning this layer, set right after
    /// the endpoint is built
    shared: std::sync::OnceLock<std::sync::Weak<Shared>>,
}

#[async_trait::async_trait]
impl Layer for UaLayer {
    fn name(&self) -> &'static str {
        "ua"
    }

    async fn receive(&self, endpoint: &Endpoint, mut request: MayTake<'_, IncomingRequest>) {
        // in-dialog requests that got here matched no dialog; the
        // endpoint answers 481 for them
        if request.base_headers.to.tag.is_some() {
            return;
        }

        if request.line.method == Method::Ack || request.line.method == Method::Cancel {
            // unmatched ACK is dropped, unmatched CANCEL gets the 481
            return;
        }

        // requests for another user are refused outright
        let for_us = request
            .line
            .uri
            .user
            .as_ref()
            .map(|user| *user == self.user)
            .unwrap_or(false);

        if !for_us {
            let request = request.take();
            self.respond_final(endpoint, request, Code::NOT_FOUND).await;
            return;
        }

        match request.line.method {
            Method::Options => {
                let request = request.take();
                self.respond_options(endpoint, request).await;
            }
            Method::Message => {
                let request = request.take();

                let message = IncomingMessage::from_request(&request);

                self.respond_final(endpoint, request, Code::OK).await;

                let _ = self.events.send(UaEvent::NewMessage(message));
            }
            Method::Invite => {
                let request = request.take();

                if !self.registered.load(Ordering::SeqCst) {
                    self.respond_final(endpoint, request, Code::GONE).await;
                    return;
                }

                self.accept_invite(endpoint, request).await;
            }
            Method::Bye => {
                let request = request.take();
                self.respond_final(
                    endpoint,
                    request,
                    Code::CALL_OR_TRANSACTION_DOES_NOT_EXIST,
                )
                .await;
            }
            _ => {
                let request = request.take();
                self.respond_final(endpoint, request, Code::METHOD_NOT_ALLOWED)
                    .await;
            }
        }
    }
}

impl UaLayer {
    async fn respond_final(&self, endpoint: &Endpoint, request: IncomingRequest, code: Code) {
        let response = endpoint.create_response(&request, code, None);

        let result = if request.line.method == Method::Invite {
            endpoint
                .create_server_inv_tsx(&request)
                .respond_failure(response)
                .await
        } else {
            endpoint.create_server_tsx(&request).respond(response).await
        };

        if let Err(e) = result {
            log::warn!("failed to respond {} to {}, {:?}", code, request.line.method, e);
        }
    }

    async fn respond_options(&self, endpoint: &Endpoint, request: IncomingRequest) {
        let mut response = endpoint.create_response(&request, Code::OK, None);

        for allow in endpoint.allowed() {
            response.msg.headers.insert_named(allow);
        }

        for accept in endpoint.accepted() {
            response.msg.headers.insert_named(accept);
        }

        if let Err(e) = endpoint.create_server_tsx(&request).respond(response).await {
            log::warn!("failed to respond to OPTIONS, {:?}", e);
        }
    }

    async fn accept_invite(&self, endpoint: &Endpoint, request: IncomingRequest) {
        // a body must be SDP, late offers have no body at all
        let content_type = request.headers.get_named::<ContentType>().ok();

        let is_sdp = content_type
            .as_ref()
            .map(|ct| ct.0.starts_with("application/sdp"))
            .unwrap_or(false);

        if !request.body.is_empty() && !is_sdp {
            self.respond_final(endpoint, request, Code::UNSUPPORTED_MEDIA_TYPE)
                .await;
            return;
        }

        let contact = self.contact.lock().clone();

        let acceptor = match Acceptor::new(
            endpoint.clone(),
            self.dialog_layer,
            self.invite_layer,
            request,
            contact,
            self.timer_config,
        ) {
            Ok(acceptor) => acceptor,
            Err(err) => {
                let (request, e) = *err;

                log::warn!("refusing malformed INVITE, {}", e);
                self.respond_final(endpoint, request, Code::BAD_REQUEST).await;
                return;
            }
        };

        let ua = self
            .shared
            .get()
            .and_then(std::sync::Weak::upgrade)
            .map(|shared| UserAgent {
                endpoint: endpoint.clone(),
                shared,
            });

        let Some(ua) = ua else {
            log::warn!("agent is gone, dropping incoming call");
            return;
        };

        match IncomingCall::new(acceptor, self.no_answer_timeout).await {
            Ok(mut call) => {
                call.attach_ua(ua);
                let _ = self.events.send(UaEvent::IncomingCall(call));
            }
            Err(e) => log::warn!("failed to ring incoming call, {}", e),
        }
    }
}
