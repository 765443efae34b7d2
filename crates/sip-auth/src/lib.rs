//! UAC digest authentication (RFC 2617)
//!
//! A [`UacAuthSession`] lives next to a request being sent: it reads the
//! challenges of a 401/407 response, computes responses from the
//! credentials configured for the challenged realm and stamps the
//! resulting `Authorization`/`Proxy-Authorization` headers onto the
//! retried request. Replayed nonces keep their response cached with an
//! incremented nonce count.

use bytesstr::BytesStr;
use sip_types::header::typed::{AuthChallenge, AuthResponse};
use sip_types::msg::RequestLine;
use sip_types::{Headers, Name};
use std::collections::HashMap;

pub mod digest;
mod error;

pub use digest::{DigestAuthenticator, DigestCredentials, DigestSecret};
pub use error::Error;

/// The parts of a request covered by authentication
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'s> {
    pub line: &'s RequestLine,
    pub headers: &'s Headers,
    pub body: &'s [u8],
}

/// Credentials per realm, with an optional default for unknown realms
#[derive(Default)]
pub struct CredentialStore<C = DigestCredentials>
where
    C: Send + Sync,
{
    default: Option<C>,
    map: HashMap<String, C>,
}

impl<C> CredentialStore<C>
where
    C: Send + Sync,
{
    pub fn new() -> Self {
        Self {
            default: None,
            map: HashMap::new(),
        }
    }

    pub fn set_default(&mut self, credentials: C) {
        self.default = Some(credentials);
    }

    pub fn add_for_realm(&mut self, realm: impl Into<String>, credentials: C) {
        self.map.insert(realm.into(), credentials);
    }

    pub fn get_for_realm(&self, realm: &str) -> Option<&C> {
        self.map.get(realm).or(self.default.as_ref())
    }
}

/// Authenticator for one scheme; see [`DigestAuthenticator`]
pub trait UacAuthenticator: Default + Send + Sync {
    type Credentials: Send + Sync;

    /// The realm the challenge wants authenticated
    fn get_realm<'s>(&mut self, challenge: &'s AuthChallenge) -> Result<&'s BytesStr, Error>;

    /// Answer a challenge.
    ///
    /// `responses` holds the cached responses of earlier challenges; an
    /// unchanged nonce means the credentials were already rejected and
    /// the challenge must not be answered again.
    fn handle_challenge(
        &mut self,
        responses: &[ResponseEntry],
        request_parts: RequestParts<'_>,
        challenge: AuthChallenge,
        credentials: &Self::Credentials,
    ) -> Result<AuthResponse, Error>;

    /// Called for every cached response each time it is stamped onto a
    /// request
    fn on_authorize_request(&mut self, response: &mut ResponseEntry);
}

/// A cached authorization response reused on subsequent requests
pub struct ResponseEntry {
    pub realm: BytesStr,
    pub response: AuthResponse,

    /// How often the response has been used, starts at 0
    pub use_count: u32,

    is_proxy: bool,
}

/// Stateful authentication session of a single signaling exchange
#[derive(Default)]
pub struct UacAuthSession<A: UacAuthenticator = DigestAuthenticator> {
    authenticator: A,
    responses: Vec<ResponseEntry>,
}

impl<A: UacAuthenticator> UacAuthSession<A> {
    pub fn new(authenticator: A) -> Self {
        Self {
            authenticator,
            responses: vec![],
        }
    }

    /// Digest the challenges of a 401/407 response.
    ///
    /// Returns an error when no challenge could be answered, which is the
    /// caller's cue to surface the failure instead of retrying.
    pub fn handle_authenticate(
        &mut self,
        headers: &Headers,
        credentials: &CredentialStore<A::Credentials>,
        request_parts: RequestParts<'_>,
    ) -> Result<(), Error> {
        let mut handled_any = false;
        let mut any_challenge = false;

        for (name, is_proxy) in [
            (Name::WWW_AUTHENTICATE, false),
            (Name::PROXY_AUTHENTICATE, true),
        ] {
            let challenges: Vec<AuthChallenge> =
                headers.get_all(name).map_err(Error::Header)?;

            for challenge in challenges {
                any_challenge = true;

                let realm = match self.authenticator.get_realm(&challenge) {
                    Ok(realm) => realm.clone(),
                    Err(Error::UnknownScheme(scheme)) => {
                        log::warn!("skipping unknown authentication scheme {}", scheme);
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                let Some(credentials) = credentials.get_for_realm(&realm) else {
                    log::warn!("no credentials configured for realm {}", realm);
                    continue;
                };

                let response = match self.authenticator.handle_challenge(
                    &self.responses,
                    request_parts,
                    challenge,
                    credentials,
                ) {
                    Ok(response) => response,
                    Err(e) => {
                        log::warn!("failed to answer challenge for realm {}, {}", realm, e);
                        continue;
                    }
                };

                self.responses.retain(|entry| entry.realm != realm);
                self.responses.push(ResponseEntry {
                    realm,
                    response,
                    use_count: 0,
                    is_proxy,
                });

                handled_any = true;
            }
        }

        if !any_challenge {
            return Err(Error::NoAuthHeaders);
        }

        if handled_any {
            Ok(())
        } else {
            Err(Error::FailedToAuthenticate(BytesStr::from_static(
                "no answerable challenge",
            )))
        }
    }

    /// Stamp the cached authorization headers onto a request
    pub fn authorize_request(&mut self, headers: &mut Headers) {
        for entry in &mut self.responses {
            let name = if entry.is_proxy {
                Name::PROXY_AUTHORIZATION
            } else {
                Name::AUTHORIZATION
            };

            self.authenticator.on_authorize_request(entry);
            entry.use_count += 1;

            headers.insert_type(name, &entry.response);
        }
    }
}
