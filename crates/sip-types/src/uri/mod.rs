//! SIP URIs and address forms

use crate::host::HostPort;
use crate::parse::{token, IResult};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case, take_while1};
use nom::combinator::opt;
use nom::sequence::{preceded, terminated};
use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;
use std::str::FromStr;

mod name_addr;
pub mod params;

pub use name_addr::NameAddr;
pub use params::{Param, Params};

/// Characters of the user part that need no percent-encoding
const USER_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b',')
    .remove(b';')
    .remove(b'?')
    .remove(b'/');

fn user_char(c: char) -> bool {
    token(c) || matches!(c, '&' | '=' | '$' | ',' | ';' | '?' | '/' | '(' | ')')
}

/// A `sip:` or `sips:` URI.
///
/// The scheme and host are normalized to lowercase while parsing, the
/// user part is percent-decoded. Printing encodes the user again, so
/// parse-print round trips are stable.
#[derive(Debug, Clone)]
pub struct SipUri {
    pub sips: bool,
    pub user: Option<BytesStr>,
    pub host_port: HostPort,
    pub uri_params: Params,
    pub header_params: Params,
}

impl SipUri {
    pub fn new(host_port: HostPort) -> Self {
        Self {
            sips: false,
            user: None,
            host_port,
            uri_params: Params::new(),
            header_params: Params::new(),
        }
    }

    pub fn sips(mut self, sips: bool) -> Self {
        self.sips = sips;
        self
    }

    pub fn user(mut self, user: impl Into<BytesStr>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_uri_param(mut self, param: Param) -> Self {
        self.uri_params.push(param);
        self
    }

    /// URI equality per the comparison rules the stack needs: scheme,
    /// user (case-sensitive) and host-port
    pub fn compare(&self, other: &Self) -> bool {
        self.sips == other.sips && self.user == other.user && self.host_port == other.host_port
    }

    pub fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        Self::parse_inner(src, i, true)
    }

    /// Parse an addr-spec without trailing uri parameters.
    ///
    /// Used when the URI appears outside `<>` brackets, where parameters
    /// belong to the surrounding header.
    pub fn parse_no_params<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        Self::parse_inner(src, i, false)
    }

    fn parse_inner<'i>(src: &Bytes, i: &'i str, with_params: bool) -> IResult<&'i str, Self> {
        let (i, scheme) = terminated(
            alt((tag_no_case("sips"), tag_no_case("sip"))),
            tag(":"),
        )(i)?;

        let (i, user) = opt(terminated(take_while1(user_char), tag("@")))(i)?;

        let (i, host_port) = HostPort::parse(src, i)?;

        let (i, uri_params, header_params) = if with_params {
            let (i, uri_params) = Params::parse(src, i)?;
            let (i, header_params) = opt(preceded(tag("?"), |i| Params::parse_amp(src, i)))(i)?;

            (i, uri_params, header_params.unwrap_or_default())
        } else {
            (i, Params::new(), Params::new())
        };

        let user = match user {
            Some(user) if user.contains('%') => {
                let decoded = percent_decode_str(user).decode_utf8().map_err(|_| {
                    nom::Err::Error(nom::error::Error::new(i, nom::error::ErrorKind::Verify))
                })?;

                Some(BytesStr::from(decoded.as_ref()))
            }
            Some(user) => Some(BytesStr::from_parse(src, user)),
            None => None,
        };

        Ok((
            i,
            Self {
                sips: scheme.eq_ignore_ascii_case("sips"),
                user,
                host_port,
                uri_params,
                header_params,
            },
        ))
    }
}

impl FromStr for SipUri {
    type Err = UriParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let src = Bytes::copy_from_slice(s.as_bytes());
        let s = std::str::from_utf8(&src).expect("came from str");

        match SipUri::parse(&src, s) {
            Ok((rem, uri)) if rem.is_empty() => Ok(uri),
            _ => Err(UriParseError),
        }
    }
}

/// The given input is not a valid SIP URI
#[derive(Debug, thiserror::Error)]
#[error("invalid sip uri")]
pub struct UriParseError;

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sips {
            f.write_str("sips:")?;
        } else {
            f.write_str("sip:")?;
        }

        if let Some(user) = &self.user {
            write!(f, "{}@", percent_encode(user.as_bytes(), &USER_SET))?;
        }

        write!(f, "{}{}", self.host_port, self.uri_params)?;

        if !self.header_params.is_empty() {
            write!(f, "?{}", self.header_params.print_amp())?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::host::Host;

    fn parse(i: &'static str) -> SipUri {
        i.parse().unwrap()
    }

    #[test]
    fn full_uri() {
        let uri = parse("sip:alice@atlanta.example.com:5060;transport=ws");

        assert!(!uri.sips);
        assert_eq!(uri.user.as_ref().unwrap(), "alice");
        assert_eq!(
            uri.host_port.host,
            Host::Name(BytesStr::from_static("atlanta.example.com"))
        );
        assert_eq!(uri.uri_params.get_val("transport").unwrap(), "ws");
    }

    #[test]
    fn round_trip_normalizes() {
        let uri = parse("SIP:Alice@Example.COM");

        // scheme and host lowercase, user case preserved
        assert_eq!(uri.to_string(), "sip:Alice@example.com");

        let again = uri.to_string().parse::<SipUri>().unwrap();
        assert!(uri.compare(&again));
    }

    #[test]
    fn user_percent_round_trip() {
        let uri = parse("sip:alice%20liddell@example.com");

        assert_eq!(uri.user.as_ref().unwrap(), "alice liddell");
        assert_eq!(uri.to_string(), "sip:alice%20liddell@example.com");
    }

    #[test]
    fn sips_compare() {
        assert!(parse("sips:a@h.test").compare(&parse("SIPS:a@H.test")));
        assert!(!parse("sips:a@h.test").compare(&parse("sip:a@h.test")));
    }
}
