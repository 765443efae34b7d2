use crate::header::{HeaderParse, PrintHeader};
use crate::parse::{parse_quoted, token, whitespace, IResult};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::sequence::delimited;
use std::fmt::{self, Write};

/// One `name="value"` pair of a challenge or response
#[derive(Debug, Clone, PartialEq)]
pub struct AuthParam {
    pub name: BytesStr,
    pub value: BytesStr,
}

impl AuthParam {
    fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (i, _) = take_while(whitespace)(i)?;
        let (i, name) = take_while1(token)(i)?;
        let (i, _) = delimited(take_while(whitespace), tag("="), take_while(whitespace))(i)?;
        let (i, value) = alt((parse_quoted, take_while1(token)))(i)?;

        Ok((
            i,
            Self {
                name: BytesStr::from_parse(src, name),
                value: BytesStr::from_parse(src, value),
            },
        ))
    }
}

impl fmt::Display for AuthParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=\"{}\"", self.name, self.value)
    }
}

fn parse_scheme_params<'i>(
    src: &Bytes,
    i: &'i str,
) -> IResult<&'i str, (BytesStr, Vec<AuthParam>)> {
    let (i, _) = take_while(whitespace)(i)?;
    let (i, scheme) = take_while1(token)(i)?;
    let (i, _) = take_while1(whitespace)(i)?;

    let mut params = Vec::new();
    let (mut i, first) = AuthParam::parse(src, i)?;
    params.push(first);

    loop {
        let comma: IResult<&str, &str> =
            delimited(take_while(whitespace), tag(","), take_while(whitespace))(i);

        match comma {
            Ok((rem, _)) => match AuthParam::parse(src, rem) {
                Ok((rem, param)) => {
                    params.push(param);
                    i = rem;
                }
                Err(_) => break,
            },
            Err(_) => break,
        }
    }

    Ok((i, (BytesStr::from_parse(src, scheme), params)))
}

/// Digest algorithm of a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    Md5,
    Md5Sess,
    Other,
}

impl Algorithm {
    fn from_value(v: &str) -> Self {
        if v.eq_ignore_ascii_case("md5") {
            Self::Md5
        } else if v.eq_ignore_ascii_case("md5-sess") {
            Self::Md5Sess
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => f.write_str("MD5"),
            Self::Md5Sess => f.write_str("MD5-sess"),
            Self::Other => f.write_str("unknown"),
        }
    }
}

/// Quality of protection offered or chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QopOption {
    Auth,
    AuthInt,
    Other,
}

impl QopOption {
    fn from_value(v: &str) -> Self {
        if v.eq_ignore_ascii_case("auth") {
            Self::Auth
        } else if v.eq_ignore_ascii_case("auth-int") {
            Self::AuthInt
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for QopOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth => f.write_str("auth"),
            Self::AuthInt => f.write_str("auth-int"),
            Self::Other => f.write_str("unknown"),
        }
    }
}

/// A `WWW-Authenticate` / `Proxy-Authenticate` value
#[derive(Debug, Clone)]
pub enum AuthChallenge {
    Digest(DigestChallenge),
    Other {
        scheme: BytesStr,
        params: Vec<AuthParam>,
    },
}

impl HeaderParse for AuthChallenge {
    fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (rem, (scheme, params)) = parse_scheme_params(src, i)?;

        if scheme.eq_ignore_ascii_case("digest") {
            let challenge = DigestChallenge::from_params(params).ok_or_else(|| {
                nom::Err::Error(nom::error::Error::new(i, nom::error::ErrorKind::Verify))
            })?;

            Ok((rem, Self::Digest(challenge)))
        } else {
            Ok((rem, Self::Other { scheme, params }))
        }
    }
}

/// Digest challenge of RFC 2617
#[derive(Debug, Clone)]
pub struct DigestChallenge {
    pub realm: BytesStr,
    pub nonce: BytesStr,
    pub opaque: Option<BytesStr>,
    pub stale: bool,
    pub algorithm: Algorithm,
    pub qop: Vec<QopOption>,
}

impl DigestChallenge {
    fn from_params(params: Vec<AuthParam>) -> Option<Self> {
        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut stale = false;
        let mut algorithm = Algorithm::default();
        let mut qop = Vec::new();

        for param in params {
            match param.name.as_ref() {
                "realm" => realm = Some(param.value),
                "nonce" => nonce = Some(param.value),
                "opaque" => opaque = Some(param.value),
                "stale" => stale = param.value.eq_ignore_ascii_case("true"),
                "algorithm" => algorithm = Algorithm::from_value(&param.value),
                "qop" => {
                    qop = param
                        .value
                        .split(',')
                        .map(|v| QopOption::from_value(v.trim()))
                        .collect();
                }
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            nonce: nonce?,
            opaque,
            stale,
            algorithm,
            qop,
        })
    }
}

/// Chosen qop and its bookkeeping inside a [`DigestResponse`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QopResponse {
    pub qop: QopOption,
    pub cnonce: BytesStr,
    pub nc: u32,
}

/// An `Authorization` / `Proxy-Authorization` value
#[derive(Debug, Clone)]
pub enum AuthResponse {
    Digest(DigestResponse),
    Other {
        scheme: BytesStr,
        params: Vec<AuthParam>,
    },
}

impl HeaderParse for AuthResponse {
    fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (rem, (scheme, params)) = parse_scheme_params(src, i)?;

        if scheme.eq_ignore_ascii_case("digest") {
            let response = DigestResponse::from_params(params).ok_or_else(|| {
                nom::Err::Error(nom::error::Error::new(i, nom::error::ErrorKind::Verify))
            })?;

            Ok((rem, Self::Digest(response)))
        } else {
            Ok((rem, Self::Other { scheme, params }))
        }
    }
}

impl PrintHeader for AuthResponse {
    fn print(&self) -> String {
        match self {
            Self::Digest(digest) => digest.to_string(),
            Self::Other { scheme, params } => {
                let mut s = scheme.to_string();

                for (idx, param) in params.iter().enumerate() {
                    if idx == 0 {
                        s.push(' ');
                    } else {
                        s.push_str(", ");
                    }

                    let _ = write!(s, "{}", param);
                }

                s
            }
        }
    }
}

/// Digest response of RFC 2617
#[derive(Debug, Clone)]
pub struct DigestResponse {
    pub username: BytesStr,
    pub realm: BytesStr,
    pub nonce: BytesStr,
    pub uri: BytesStr,
    pub response: BytesStr,
    pub algorithm: Algorithm,
    pub opaque: Option<BytesStr>,
    pub qop_response: Option<QopResponse>,
}

impl DigestResponse {
    fn from_params(params: Vec<AuthParam>) -> Option<Self> {
        let mut username = None;
        let mut realm = None;
        let mut nonce = None;
        let mut uri = None;
        let mut response = None;
        let mut algorithm = Algorithm::default();
        let mut opaque = None;
        let mut qop = None;
        let mut cnonce = None;
        let mut nc = None;

        for param in params {
            match param.name.as_ref() {
                "username" => username = Some(param.value),
                "realm" => realm = Some(param.value),
                "nonce" => nonce = Some(param.value),
                "uri" => uri = Some(param.value),
                "response" => response = Some(param.value),
                "algorithm" => algorithm = Algorithm::from_value(&param.value),
                "opaque" => opaque = Some(param.value),
                "qop" => qop = Some(QopOption::from_value(&param.value)),
                "cnonce" => cnonce = Some(param.value),
                "nc" => nc = u32::from_str_radix(&param.value, 16).ok(),
                _ => {}
            }
        }

        let qop_response = match qop {
            Some(qop) => Some(QopResponse {
                qop,
                cnonce: cnonce?,
                nc: nc?,
            }),
            None => None,
        };

        Some(Self {
            username: username?,
            realm: realm?,
            nonce: nonce?,
            uri: uri?,
            response: response?,
            algorithm,
            opaque,
            qop_response,
        })
    }
}

impl fmt::Display for DigestResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            self.username, self.realm, self.nonce, self.uri, self.response
        )?;

        if !matches!(self.algorithm, Algorithm::Md5) {
            write!(f, ", algorithm={}", self.algorithm)?;
        }

        if let Some(opaque) = &self.opaque {
            write!(f, ", opaque=\"{}\"", opaque)?;
        }

        if let Some(qop) = &self.qop_response {
            write!(
                f,
                ", qop={}, cnonce=\"{}\", nc={:08x}",
                qop.qop, qop.cnonce, qop.nc
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn challenge() {
        let input = "Digest realm=\"atlanta.example.com\", qop=\"auth,auth-int\", \
            nonce=\"f84f1cec41e6cbe5aea9c8e88d359\", opaque=\"\", stale=FALSE, algorithm=MD5";
        let src = Bytes::from_static(input.as_bytes());

        let (_, challenge) = AuthChallenge::parse(&src, input).unwrap();

        let AuthChallenge::Digest(digest) = challenge else {
            panic!("expected digest challenge");
        };

        assert_eq!(digest.realm, "atlanta.example.com");
        assert_eq!(digest.nonce, "f84f1cec41e6cbe5aea9c8e88d359");
        assert!(!digest.stale);
        assert_eq!(digest.algorithm, Algorithm::Md5);
        assert_eq!(digest.qop, vec![QopOption::Auth, QopOption::AuthInt]);
    }

    #[test]
    fn response_round_trip() {
        let response = DigestResponse {
            username: "bob".into(),
            realm: "biloxi.example.com".into(),
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093".into(),
            uri: "sip:bob@biloxi.example.com".into(),
            response: "245f23415f11432b3434341c022".into(),
            algorithm: Algorithm::Md5,
            opaque: None,
            qop_response: Some(QopResponse {
                qop: QopOption::Auth,
                cnonce: "0a4f113b".into(),
                nc: 1,
            }),
        };

        let printed = AuthResponse::Digest(response).print();

        assert!(printed.contains("username=\"bob\""));
        assert!(printed.contains("nc=00000001"));
        assert!(printed.contains("qop=auth"));

        let src = Bytes::from(printed.clone().into_bytes());
        let s = std::str::from_utf8(&src).unwrap();
        let (_, parsed) = AuthResponse::parse(&src, s).unwrap();

        let AuthResponse::Digest(parsed) = parsed else {
            panic!("expected digest response");
        };

        assert_eq!(parsed.qop_response.unwrap().nc, 1);
    }
}
