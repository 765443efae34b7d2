use super::from_str_header;
use crate::header::{ConstNamed, HeaderParse, PrintHeader};
use crate::parse::{digit, IResult};
use crate::uri::Params;
use crate::Name;
use bytes::Bytes;
use nom::bytes::complete::take_while1;
use nom::combinator::map_res;
use std::fmt;
use std::str::FromStr;

/// Which side refreshes the session (RFC 4028)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresher {
    Unspecified,
    Uac,
    Uas,
}

impl fmt::Display for Refresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => Ok(()),
            Self::Uac => f.write_str("uac"),
            Self::Uas => f.write_str("uas"),
        }
    }
}

/// `Session-Expires` header (RFC 4028)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionExpires {
    pub delta_secs: u32,
    pub refresher: Refresher,
}

impl ConstNamed for SessionExpires {
    const NAME: Name = Name::SESSION_EXPIRES;
}

impl HeaderParse for SessionExpires {
    fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (i, delta_secs) = map_res(take_while1(digit), u32::from_str)(i)?;
        let (i, params) = Params::parse(src, i)?;

        let refresher = match params.get_val("refresher") {
            Some(v) if v.eq_ignore_ascii_case("uac") => Refresher::Uac,
            Some(v) if v.eq_ignore_ascii_case("uas") => Refresher::Uas,
            _ => Refresher::Unspecified,
        };

        Ok((
            i,
            Self {
                delta_secs,
                refresher,
            },
        ))
    }
}

impl PrintHeader for SessionExpires {
    fn print(&self) -> String {
        match self.refresher {
            Refresher::Unspecified => self.delta_secs.to_string(),
            refresher => format!("{};refresher={}", self.delta_secs, refresher),
        }
    }
}

from_str_header!(
    /// `Min-SE` header (RFC 4028)
    MinSe,
    Name::MIN_SE,
    u32
);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn session_expires() {
        let input = "1800;refresher=uas";
        let src = Bytes::from_static(input.as_bytes());

        let (_, se) = SessionExpires::parse(&src, input).unwrap();

        assert_eq!(se.delta_secs, 1800);
        assert_eq!(se.refresher, Refresher::Uas);
        assert_eq!(se.print(), "1800;refresher=uas");
    }

    #[test]
    fn bare_interval() {
        let input = "90";
        let src = Bytes::from_static(input.as_bytes());

        let (_, se) = SessionExpires::parse(&src, input).unwrap();

        assert_eq!(se.refresher, Refresher::Unspecified);
        assert_eq!(se.print(), "90");
    }
}
