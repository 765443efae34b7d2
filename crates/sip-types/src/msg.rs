//! Message lines and the pull parser splitting a message head into lines

use crate::code::Code;
use crate::method::Method;
use crate::parse::{digit, token, whitespace, IResult};
use crate::uri::SipUri;
use crate::Name;
use bytes::Bytes;
use bytesstr::BytesStr;
use memchr::memchr2;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::combinator::map_res;
use std::fmt;
use std::str::FromStr;

/// The leading line of any SIP message
#[derive(Debug, Clone)]
pub enum MessageLine {
    Request(RequestLine),
    Response(StatusLine),
}

impl MessageLine {
    pub fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        if i.starts_with("SIP/2.0") {
            let (rem, line) = StatusLine::parse(src, i)?;
            Ok((rem, MessageLine::Response(line)))
        } else {
            let (rem, line) = RequestLine::parse(src, i)?;
            Ok((rem, MessageLine::Request(line)))
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    pub fn request_method(&self) -> Option<&Method> {
        match self {
            Self::Request(line) => Some(&line.method),
            Self::Response(_) => None,
        }
    }
}

impl fmt::Display for MessageLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(line) => line.fmt(f),
            Self::Response(line) => line.fmt(f),
        }
    }
}

/// The leading line of a SIP request
#[derive(Debug, Clone)]
pub struct RequestLine {
    pub method: Method,
    pub uri: SipUri,
}

impl RequestLine {
    pub fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (i, method) = Method::parse(src, i)?;
        let (i, _) = take_while1(whitespace)(i)?;
        let (i, uri) = SipUri::parse(src, i)?;
        let (i, _) = take_while1(whitespace)(i)?;
        let (i, _) = tag("SIP/2.0")(i)?;

        Ok((i, Self { method, uri }))
    }
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} SIP/2.0", self.method, self.uri)
    }
}

/// The leading line of a SIP response
#[derive(Debug, Clone)]
pub struct StatusLine {
    pub code: Code,
    pub reason: Option<BytesStr>,
}

impl StatusLine {
    pub fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (i, _) = tag("SIP/2.0")(i)?;
        let (i, _) = take_while1(whitespace)(i)?;
        let (i, code) = map_res(take_while1(digit), u16::from_str)(i)?;
        let (i, _) = take_while(whitespace)(i)?;
        let (i, reason) = take_while(|c| !matches!(c, '\r' | '\n'))(i)?;

        Ok((
            i,
            Self {
                code: Code::from(code),
                reason: match reason.trim() {
                    "" => None,
                    s => Some(BytesStr::from_parse(src, s)),
                },
            },
        ))
    }

    /// Parse from an owned string slice, used for `message/sipfrag` bodies
    pub fn parse_str(s: &str) -> Result<Self, ()> {
        let src = Bytes::copy_from_slice(s.as_bytes());
        let s = std::str::from_utf8(&src).expect("came from str");

        match Self::parse(&src, s) {
            Ok((_, line)) => Ok(line),
            Err(_) => Err(()),
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0 {}", self.code)?;

        match &self.reason {
            Some(reason) => write!(f, " {}", reason),
            None => match self.code.text() {
                Some(text) => write!(f, " {}", text),
                None => Ok(()),
            },
        }
    }
}

/// A `name: value` line of a message head
pub struct Line {
    pub name: Name,
    pub value: BytesStr,
}

impl Line {
    pub fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (i, _) = take_while(whitespace)(i)?;
        let (i, name) = take_while1(token)(i)?;
        let (i, _) = take_while(whitespace)(i)?;
        let (value, _) = tag(":")(i)?;

        Ok((
            "",
            Self {
                name: Name::from(BytesStr::from_parse(src, name)),
                value: BytesStr::from_parse(src, value.trim()),
            },
        ))
    }
}

/// Pull parser returning the lines of a SIP message head.
///
/// Lines are terminated by `\n` or `\r\n` followed by anything but
/// whitespace; a newline followed by space or tab continues the previous
/// line (folded headers). Returns `None` once the empty separator line
/// before the body is reached.
#[derive(Clone)]
pub struct PullParser<'i> {
    input: &'i [u8],
    progress: usize,
}

/// The message head is not yet complete
#[derive(Debug, PartialEq, Eq)]
pub struct Incomplete;

impl<'i> PullParser<'i> {
    pub fn new(input: &'i [u8], progress: usize) -> Self {
        Self { input, progress }
    }

    /// Index of the first body byte, only valid after the parser
    /// returned `None`
    pub fn head_end(&self) -> usize {
        match self.input[self.progress..] {
            [b'\r', b'\n', b'\r', b'\n', ..] => self.progress + 4,
            [b'\n', b'\n', ..] => self.progress + 2,
            _ => self.progress,
        }
    }

    pub fn progress(&self) -> usize {
        self.progress
    }
}

impl<'i> Iterator for PullParser<'i> {
    type Item = Result<&'i [u8], Incomplete>;

    fn next(&mut self) -> Option<Self::Item> {
        let line_begin = self.progress;
        let mut skip = 0;

        loop {
            let found = match memchr2(b'\n', b'\r', &self.input[line_begin + skip..]) {
                Some(found) => found,
                None => return Some(Err(Incomplete)),
            };

            let pos = line_begin + skip + found;

            match self.input[pos..] {
                // folded line, keep scanning
                [b'\n', b' ' | b'\t', ..] | [b'\r', b'\n', b' ' | b'\t', ..] => {
                    skip += found + 1;
                }
                [b'\n', next, ..] => {
                    let line = &self.input[line_begin..pos];

                    if line.is_empty() {
                        return None;
                    }

                    self.progress = if next == b'\n' { pos } else { pos + 1 };

                    return Some(Ok(line));
                }
                [b'\r', b'\n', next, _, ..] | [b'\r', b'\n', next] => {
                    let line = &self.input[line_begin..pos];

                    if line.is_empty() {
                        return None;
                    }

                    self.progress = if next == b'\r' { pos } else { pos + 2 };

                    return Some(Ok(line));
                }
                _ => return Some(Err(Incomplete)),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_line() {
        let src = Bytes::from_static(b"INVITE sip:bob@biloxi.example.com SIP/2.0");
        let s = std::str::from_utf8(&src).unwrap();

        let (rem, line) = RequestLine::parse(&src, s).unwrap();

        assert!(rem.is_empty());
        assert_eq!(line.method, Method::Invite);
        assert_eq!(line.uri.user.as_ref().unwrap(), "bob");
        assert_eq!(line.to_string(), "INVITE sip:bob@biloxi.example.com SIP/2.0");
    }

    #[test]
    fn status_line() {
        let src = Bytes::from_static(b"SIP/2.0 180 Ringing");
        let s = std::str::from_utf8(&src).unwrap();

        let (_, line) = StatusLine::parse(&src, s).unwrap();

        assert_eq!(line.code, Code::RINGING);
        assert_eq!(line.reason.as_ref().unwrap(), "Ringing");
    }

    #[test]
    fn status_line_default_reason() {
        let line = StatusLine {
            code: Code::REQUEST_TERMINATED,
            reason: None,
        };

        assert_eq!(line.to_string(), "SIP/2.0 487 Request Terminated");
    }

    #[test]
    fn pull_parser_lines_and_folding() {
        let msg = b"OPTIONS sip:user@example.com SIP/2.0\r\n\
            To: sip:user@example.com\r\n\
            Accept: application/sdp,\r\n\
            \tmessage/sipfrag\r\n\
            \r\nbody";

        let mut parser = PullParser::new(msg, 0);

        assert_eq!(
            parser.next().unwrap().unwrap(),
            b"OPTIONS sip:user@example.com SIP/2.0"
        );
        assert_eq!(parser.next().unwrap().unwrap(), b"To: sip:user@example.com");
        assert_eq!(
            parser.next().unwrap().unwrap(),
            &b"Accept: application/sdp,\r\n\tmessage/sipfrag"[..]
        );
        assert_eq!(parser.next(), None);
        assert_eq!(&msg[parser.head_end()..], b"body");
    }

    #[test]
    fn pull_parser_incomplete() {
        let msg = b"INVITE sip:user@example.com SIP/2.0\r\nTo: <si";

        let mut parser = PullParser::new(msg, 0);

        assert!(parser.next().unwrap().is_ok());
        assert_eq!(parser.next(), Some(Err(Incomplete)));
    }

    #[test]
    fn header_line() {
        let src = Bytes::from_static(b"Max-Forwards:  70");
        let s = std::str::from_utf8(&src).unwrap();

        let (_, line) = Line::parse(&src, s).unwrap();

        assert_eq!(line.name, Name::MAX_FORWARDS);
        assert_eq!(line.value, "70");
    }
}
