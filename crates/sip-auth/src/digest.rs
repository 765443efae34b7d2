//! MD5 digest authentication

use crate::{Error, RequestParts, ResponseEntry, UacAuthenticator};
use bytesstr::BytesStr;
use sip_types::header::typed::{
    Algorithm, AuthChallenge, AuthResponse, DigestChallenge, DigestResponse, QopOption,
    QopResponse,
};

/// The digest secret, either the plain password or a precomputed
/// `MD5(user:realm:password)`
pub enum DigestSecret {
    Password(String),
    Ha1(String),
}

pub struct DigestCredentials {
    user: String,
    secret: DigestSecret,
}

impl DigestCredentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            secret: DigestSecret::Password(password.into()),
        }
    }

    pub fn with_ha1(user: impl Into<String>, ha1: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            secret: DigestSecret::Ha1(ha1.into()),
        }
    }
}

fn hash_md5(i: &[u8]) -> String {
    format!("{:x}", md5::compute(i))
}

fn random_cnonce() -> BytesStr {
    BytesStr::from(format!("{:08x}", rand::random::<u32>()))
}

/// Answers 401 & 407 digest challenges
#[derive(Default)]
pub struct DigestAuthenticator {
    /// State of the session keyed by realm, needed to recompute qop
    /// responses when the nonce count increments
    entries: Vec<(BytesStr, HashedParts)>,
}

struct HashedParts {
    ha1: String,
    ha2: String,
}

impl UacAuthenticator for DigestAuthenticator {
    type Credentials = DigestCredentials;

    fn get_realm<'s>(&mut self, challenge: &'s AuthChallenge) -> Result<&'s BytesStr, Error> {
        match challenge {
            AuthChallenge::Digest(digest) => Ok(&digest.realm),
            AuthChallenge::Other { scheme, .. } => Err(Error::UnknownScheme(scheme.clone())),
        }
    }

    fn handle_challenge(
        &mut self,
        responses: &[ResponseEntry],
        request_parts: RequestParts<'_>,
        challenge: AuthChallenge,
        credentials: &DigestCredentials,
    ) -> Result<AuthResponse, Error> {
        let challenge = match challenge {
            AuthChallenge::Digest(challenge) => challenge,
            AuthChallenge::Other { scheme, .. } => return Err(Error::UnknownScheme(scheme)),
        };

        // Answer when this realm was never answered, or when the nonce
        // rotated (stale or otherwise). An unchanged nonce means the
        // credentials were rejected, answering again would loop.
        let previous = responses
            .iter()
            .find(|response| response.realm == challenge.realm);

        let answer = match previous {
            Some(previous) => match &previous.response {
                AuthResponse::Digest(digest) => digest.nonce != challenge.nonce,
                AuthResponse::Other { .. } => true,
            },
            None => true,
        };

        if answer {
            self.answer_digest_challenge(credentials, challenge, request_parts)
        } else {
            Err(Error::FailedToAuthenticate(challenge.realm))
        }
    }

    fn on_authorize_request(&mut self, response: &mut ResponseEntry) {
        let digest = match &mut response.response {
            AuthResponse::Digest(digest) => digest,
            AuthResponse::Other { .. } => return,
        };

        // freshly computed responses carry the right nc already
        if response.use_count == 0 {
            return;
        }

        let Some(qop_response) = &mut digest.qop_response else {
            return;
        };

        qop_response.nc += 1;

        let (_, parts) = self
            .entries
            .iter()
            .find(|(realm, _)| *realm == digest.realm)
            .expect("an entry exists for every cached response");

        digest.response = BytesStr::from(hash_md5(
            format!(
                "{}:{}:{:08x}:{}:{}:{}",
                parts.ha1,
                digest.nonce,
                qop_response.nc,
                qop_response.cnonce,
                qop_response.qop,
                parts.ha2
            )
            .as_bytes(),
        ));
    }
}

impl DigestAuthenticator {
    fn answer_digest_challenge(
        &mut self,
        credentials: &DigestCredentials,
        challenge: DigestChallenge,
        request_parts: RequestParts<'_>,
    ) -> Result<AuthResponse, Error> {
        let uri = BytesStr::from(request_parts.line.uri.to_string());
        let cnonce = random_cnonce();

        let ha1_base = match &credentials.secret {
            DigestSecret::Password(password) => hash_md5(
                format!("{}:{}:{}", credentials.user, challenge.realm, password).as_bytes(),
            ),
            DigestSecret::Ha1(ha1) => ha1.clone(),
        };

        let ha1 = match challenge.algorithm {
            Algorithm::Md5 => ha1_base,
            Algorithm::Md5Sess => {
                hash_md5(format!("{}:{}:{}", ha1_base, challenge.nonce, cnonce).as_bytes())
            }
            Algorithm::Other => return Err(Error::UnsupportedAlgorithm),
        };

        let ha2 = hash_md5(format!("{}:{}", request_parts.line.method, uri).as_bytes());

        let qop = if challenge.qop.is_empty() {
            None
        } else if challenge.qop.contains(&QopOption::Auth) {
            Some(QopOption::Auth)
        } else {
            return Err(Error::UnsupportedQop);
        };

        let (response, qop_response) = match qop {
            Some(qop) => {
                let nc = 1;

                let response = hash_md5(
                    format!(
                        "{}:{}:{:08x}:{}:{}:{}",
                        ha1, challenge.nonce, nc, cnonce, qop, ha2
                    )
                    .as_bytes(),
                );

                (
                    response,
                    Some(QopResponse {
                        qop,
                        cnonce: cnonce.clone(),
                        nc,
                    }),
                )
            }
            None => {
                let response =
                    hash_md5(format!("{}:{}:{}", ha1, challenge.nonce, ha2).as_bytes());

                (response, None)
            }
        };

        self.entries.retain(|(realm, _)| *realm != challenge.realm);
        self.entries
            .push((challenge.realm.clone(), HashedParts { ha1, ha2 }));

        Ok(AuthResponse::Digest(DigestResponse {
            username: BytesStr::from(credentials.user.clone()),
            realm: challenge.realm,
            nonce: challenge.nonce,
            uri,
            response: BytesStr::from(response),
            algorithm: challenge.algorithm,
            opaque: challenge.opaque,
            qop_response,
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{CredentialStore, UacAuthSession};
    use bytes::Bytes;
    use sip_types::header::HeaderParse;
    use sip_types::msg::RequestLine;
    use sip_types::uri::SipUri;
    use sip_types::{Headers, Method, Name};

    fn request_line() -> RequestLine {
        RequestLine {
            method: Method::Register,
            uri: "sip:biloxi.example.com".parse::<SipUri>().unwrap(),
        }
    }

    fn challenge_headers(value: &'static str) -> Headers {
        let mut headers = Headers::new();
        headers.insert(Name::WWW_AUTHENTICATE, value);
        headers
    }

    fn authorization(headers: &Headers) -> DigestResponse {
        let response: AuthResponse = headers.get(Name::AUTHORIZATION).unwrap();

        match response {
            AuthResponse::Digest(digest) => digest,
            AuthResponse::Other { .. } => panic!("expected digest response"),
        }
    }

    #[test]
    fn rfc2617_response_without_qop() {
        // RFC 2617 example adapted to MD5 without qop
        let challenge = "Digest realm=\"testrealm@host.com\", \
             nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\"";

        let src = Bytes::from_static(challenge.as_bytes());
        let (_, challenge) = AuthChallenge::parse(&src, challenge).unwrap();

        let mut authenticator = DigestAuthenticator::default();

        let credentials = DigestCredentials::new("Mufasa", "Circle Of Life");

        let line = RequestLine {
            method: Method::Other("GET".into()),
            uri: "sip:host.com".parse().unwrap(),
        };

        let headers = Headers::new();

        let response = authenticator
            .handle_challenge(
                &[],
                RequestParts {
                    line: &line,
                    headers: &headers,
                    body: &[],
                },
                challenge,
                &credentials,
            )
            .unwrap();

        let AuthResponse::Digest(digest) = response else {
            panic!("expected digest");
        };

        // response = MD5(HA1:nonce:HA2)
        let ha1 = hash_md5(b"Mufasa:testrealm@host.com:Circle Of Life");
        let ha2 = hash_md5(b"GET:sip:host.com");
        let expected = hash_md5(
            format!("{}:dcd98b7102dd2f0e8b11d0f600bfb0c093:{}", ha1, ha2).as_bytes(),
        );

        assert_eq!(digest.response, expected.as_str());
        assert!(digest.qop_response.is_none());
    }

    #[test]
    fn qop_auth_nc_starts_at_one_and_increments() {
        let mut session = UacAuthSession::<DigestAuthenticator>::default();

        let mut store = CredentialStore::new();
        store.set_default(DigestCredentials::new("bob", "secret"));

        let headers = challenge_headers(
            "Digest realm=\"a\", nonce=\"n\", qop=\"auth\"",
        );

        let line = request_line();
        let body = Headers::new();

        session
            .handle_authenticate(
                &headers,
                &store,
                RequestParts {
                    line: &line,
                    headers: &body,
                    body: &[],
                },
            )
            .unwrap();

        let mut request_headers = Headers::new();
        session.authorize_request(&mut request_headers);

        let first = authorization(&request_headers);
        let first_qop = first.qop_response.clone().unwrap();
        assert_eq!(first_qop.nc, 1);
        assert_eq!(first_qop.cnonce.len(), 8);

        // reusing the session bumps nc and recomputes the response
        let mut request_headers = Headers::new();
        session.authorize_request(&mut request_headers);

        let second = authorization(&request_headers);
        let second_qop = second.qop_response.clone().unwrap();
        assert_eq!(second_qop.nc, 2);
        assert_ne!(first.response, second.response);
    }

    #[test]
    fn repeated_challenge_with_same_nonce_fails() {
        let mut session = UacAuthSession::<DigestAuthenticator>::default();

        let mut store = CredentialStore::new();
        store.set_default(DigestCredentials::new("bob", "wrong"));

        let headers = challenge_headers("Digest realm=\"a\", nonce=\"n\", qop=\"auth\"");

        let line = request_line();
        let body = Headers::new();

        let parts = RequestParts {
            line: &line,
            headers: &body,
            body: &[],
        };

        session.handle_authenticate(&headers, &store, parts).unwrap();

        // same nonce again: the peer rejected the credentials
        assert!(session.handle_authenticate(&headers, &store, parts).is_err());
    }

    #[test]
    fn stale_nonce_rotation_is_answered_once_more() {
        let mut session = UacAuthSession::<DigestAuthenticator>::default();

        let mut store = CredentialStore::new();
        store.set_default(DigestCredentials::new("bob", "secret"));

        let line = request_line();
        let body = Headers::new();

        let parts = RequestParts {
            line: &line,
            headers: &body,
            body: &[],
        };

        let first = challenge_headers("Digest realm=\"a\", nonce=\"n1\", qop=\"auth\"");
        session.handle_authenticate(&first, &store, parts).unwrap();

        let stale = challenge_headers(
            "Digest realm=\"a\", nonce=\"n2\", stale=true, qop=\"auth\"",
        );
        session.handle_authenticate(&stale, &store, parts).unwrap();

        let mut request_headers = Headers::new();
        session.authorize_request(&mut request_headers);

        let digest = authorization(&request_headers);
        assert_eq!(digest.nonce, "n2");
        assert_eq!(digest.qop_response.unwrap().nc, 1);
    }

    #[test]
    fn ha1_credentials_are_used_verbatim() {
        let ha1 = hash_md5(b"bob:a:secret");

        let mut with_password = DigestAuthenticator::default();
        let mut with_ha1 = DigestAuthenticator::default();

        let challenge = "Digest realm=\"a\", nonce=\"n\"";
        let src = Bytes::from_static(challenge.as_bytes());

        let line = request_line();
        let headers = Headers::new();
        let parts = RequestParts {
            line: &line,
            headers: &headers,
            body: &[],
        };

        let (_, c1) = AuthChallenge::parse(&src, challenge).unwrap();
        let (_, c2) = AuthChallenge::parse(&src, challenge).unwrap();

        let r1 = with_password
            .handle_challenge(&[], parts, c1, &DigestCredentials::new("bob", "secret"))
            .unwrap();
        let r2 = with_ha1
            .handle_challenge(&[], parts, c2, &DigestCredentials::with_ha1("bob", ha1))
            .unwrap();

        let (AuthResponse::Digest(d1), AuthResponse::Digest(d2)) = (r1, r2) else {
            panic!("expected digests");
        };

        assert_eq!(d1.response, d2.response);
    }
}
