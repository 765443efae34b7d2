use super::SipUri;
use crate::parse::{parse_quoted, token, whitespace, IResult};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::combinator::opt;
use nom::sequence::{delimited, terminated};
use std::fmt;

/// `display-name <uri>` address form used by From, To, Contact,
/// Refer-To and the routing headers.
///
/// Printing always emits the bracketed form so trailing parameters
/// stay attached to the header, not the URI.
#[derive(Debug, Clone)]
pub struct NameAddr {
    pub display_name: Option<BytesStr>,
    pub uri: SipUri,
}

impl NameAddr {
    pub fn uri(uri: SipUri) -> Self {
        Self {
            display_name: None,
            uri,
        }
    }

    pub fn new(display_name: impl Into<BytesStr>, uri: SipUri) -> Self {
        Self {
            display_name: Some(display_name.into()),
            uri,
        }
    }

    pub fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (i, _) = take_while(whitespace)(i)?;

        // name-addr with optional display name
        let quoted: IResult<&str, &str> = terminated(parse_quoted, take_while(whitespace))(i);

        if let Ok((rem, display_name)) = quoted {
            let (rem, uri) = bracketed_uri(src, rem)?;

            return Ok((
                rem,
                Self {
                    display_name: Some(BytesStr::from_parse(src, display_name)),
                    uri,
                },
            ));
        }

        // unquoted display name: one or more tokens before `<`
        fn unquoted_name(i: &str) -> IResult<&str, &str> {
            let (rem, name) = take_while1(|c| token(c) || c == ' ' || c == '\t')(i)?;
            let (rem, _) = nom::combinator::peek(tag("<"))(rem)?;
            Ok((rem, name.trim_end()))
        }

        let unquoted = unquoted_name(i);

        if let Ok((rem, display_name)) = unquoted {
            let (rem, uri) = bracketed_uri(src, rem)?;

            let display_name =
                Some(BytesStr::from_parse(src, display_name)).filter(|n| !n.is_empty());

            return Ok((rem, Self { display_name, uri }));
        }

        if let Ok((rem, uri)) = bracketed_uri(src, i) {
            return Ok((
                rem,
                Self {
                    display_name: None,
                    uri,
                },
            ));
        }

        // bare addr-spec, parameters belong to the surrounding header
        let (rem, uri) = SipUri::parse_no_params(src, i)?;

        Ok((
            rem,
            Self {
                display_name: None,
                uri,
            },
        ))
    }
}

fn bracketed_uri<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, SipUri> {
    delimited(tag("<"), |i| SipUri::parse(src, i), tag(">"))(i)
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(display_name) = &self.display_name {
            write!(f, "\"{}\" ", display_name)?;
        }

        write!(f, "<{}>", self.uri)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(i: &'static str) -> (&'static str, NameAddr) {
        let src = Bytes::from_static(i.as_bytes());
        NameAddr::parse(&src, i).unwrap()
    }

    #[test]
    fn quoted_display_name() {
        let (rem, addr) = parse("\"Bob Example\" <sip:bob@example.com>;tag=x");

        assert_eq!(rem, ";tag=x");
        assert_eq!(addr.display_name.unwrap(), "Bob Example");
        assert_eq!(addr.uri.user.unwrap(), "bob");
    }

    #[test]
    fn unquoted_display_name() {
        let (_, addr) = parse("Bob <sip:bob@example.com>");

        assert_eq!(addr.display_name.unwrap(), "Bob");
    }

    #[test]
    fn bare_addr_spec_leaves_params() {
        let (rem, addr) = parse("sip:carol@chicago.example.com;tag=887s");

        // the tag must stay with the header, not the uri
        assert_eq!(rem, ";tag=887s");
        assert!(addr.uri.uri_params.is_empty());
    }

    #[test]
    fn bracketed_uri_keeps_params() {
        let (rem, addr) = parse("<sip:carol@chicago.example.com;transport=ws>;expires=600");

        assert_eq!(rem, ";expires=600");
        assert_eq!(addr.uri.uri_params.get_val("transport").unwrap(), "ws");
    }

    #[test]
    fn print_round_trip() {
        let (_, addr) = parse("Bob <sip:bob@example.com>");
        assert_eq!(addr.to_string(), "\"Bob\" <sip:bob@example.com>");

        let printed = addr.to_string();
        let src = Bytes::from(printed.clone().into_bytes());
        let s = std::str::from_utf8(&src).unwrap();
        let (_, again) = NameAddr::parse(&src, s).unwrap();

        assert_eq!(again.display_name.unwrap(), "Bob");
        assert!(again.uri.compare(&addr.uri));
    }
}
