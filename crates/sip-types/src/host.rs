use crate::parse::{digit, IResult};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::bytes::complete::{tag, take_while1};
use nom::combinator::{map_res, opt};
use nom::sequence::{delimited, preceded};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

/// Host part of an URI or Via sent-by, either a DNS name or an IP literal.
///
/// DNS names are lowercased while parsing so two spellings of the same
/// host compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    Name(BytesStr),
    Ip4(Ipv4Addr),
    Ip6(Ipv6Addr),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    pub host: Host,
    pub port: Option<u16>,
}

fn host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_')
}

impl Host {
    pub fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let bracketed: IResult<&str, &str> =
            delimited(tag("["), take_while1(|c| c != ']'), tag("]"))(i);

        if let Ok((rem, lit)) = bracketed {
            let ip = Ipv6Addr::from_str(lit).map_err(|_| {
                nom::Err::Error(nom::error::Error::new(i, nom::error::ErrorKind::Verify))
            })?;

            return Ok((rem, Host::Ip6(ip)));
        }

        let (rem, host) = take_while1(host_char)(i)?;

        if let Ok(ip) = Ipv4Addr::from_str(host) {
            return Ok((rem, Host::Ip4(ip)));
        }

        let host = if host.bytes().any(|b| b.is_ascii_uppercase()) {
            BytesStr::from(host.to_ascii_lowercase())
        } else {
            BytesStr::from_parse(src, host)
        };

        Ok((rem, Host::Name(host)))
    }
}

impl HostPort {
    pub fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (i, host) = Host::parse(src, i)?;
        let (i, port) = opt(preceded(
            tag(":"),
            map_res(take_while1(digit), u16::from_str),
        ))(i)?;

        Ok((i, Self { host, port }))
    }

    pub fn host_name(name: impl Into<BytesStr>) -> Self {
        Self {
            host: Host::Name(name.into()),
            port: None,
        }
    }
}

impl From<IpAddr> for Host {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(ip) => Host::Ip4(ip),
            IpAddr::V6(ip) => Host::Ip6(ip),
        }
    }
}

impl From<SocketAddr> for HostPort {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().into(),
            port: Some(addr.port()),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Name(name) => name.fmt(f),
            Host::Ip4(ip) => ip.fmt(f),
            Host::Ip6(ip) => write!(f, "[{}]", ip),
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.host.fmt(f)?;

        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(i: &'static str) -> HostPort {
        let src = Bytes::from_static(i.as_bytes());
        let (rem, hp) = HostPort::parse(&src, i).unwrap();
        assert!(rem.is_empty());
        hp
    }

    #[test]
    fn name_is_lowercased() {
        let hp = parse("Example.COM:5060");
        assert_eq!(hp.host, Host::Name(BytesStr::from_static("example.com")));
        assert_eq!(hp.port, Some(5060));
        assert_eq!(hp.to_string(), "example.com:5060");
    }

    #[test]
    fn ip_literals() {
        assert_eq!(
            parse("192.0.2.1").host,
            Host::Ip4(Ipv4Addr::new(192, 0, 2, 1))
        );
        assert_eq!(parse("[2001:db8::1]:443").to_string(), "[2001:db8::1]:443");
    }
}
