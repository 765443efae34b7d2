use crate::header::{ConstNamed, HeaderParse, PrintHeader};
use crate::parse::{token, IResult};
use crate::{Method, Name};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::bytes::complete::take_while1;

/// `Allow` header entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allow(pub Method);

impl ConstNamed for Allow {
    const NAME: Name = Name::ALLOW;
}

impl HeaderParse for Allow {
    fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (rem, method) = Method::parse(src, i)?;
        Ok((rem, Self(method)))
    }
}

impl PrintHeader for Allow {
    const CSV: bool = true;

    fn print(&self) -> String {
        self.0.to_string()
    }
}

impl From<Method> for Allow {
    fn from(method: Method) -> Self {
        Self(method)
    }
}

macro_rules! token_csv_header {
    ($(#[$meta:meta])* $struct_name:ident, $header_name:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $struct_name(pub BytesStr);

        impl $struct_name {
            pub fn new(v: impl Into<BytesStr>) -> Self {
                Self(v.into())
            }
        }

        impl ConstNamed for $struct_name {
            const NAME: Name = $header_name;
        }

        impl HeaderParse for $struct_name {
            fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
                let (rem, v) = take_while1(|c| token(c) || c == '/')(i)?;
                Ok((rem, Self(BytesStr::from_parse(src, v))))
            }
        }

        impl PrintHeader for $struct_name {
            const CSV: bool = true;

            fn print(&self) -> String {
                self.0.to_string()
            }
        }

        impl From<&'static str> for $struct_name {
            fn from(v: &'static str) -> Self {
                Self(BytesStr::from_static(v))
            }
        }
    };
}

token_csv_header!(
    /// `Accept` header entry, a media type such as `application/sdp`
    Accept,
    Name::ACCEPT
);

token_csv_header!(
    /// `Supported` header entry
    Supported,
    Name::SUPPORTED
);

token_csv_header!(
    /// `Require` header entry
    Require,
    Name::REQUIRE
);

#[cfg(test)]
mod test {
    use super::*;
    use crate::Headers;

    #[test]
    fn allow_csv_round_trip() {
        let mut headers = Headers::new();

        for method in [Method::Invite, Method::Ack, Method::Cancel, Method::Bye] {
            headers.insert_named(&Allow(method));
        }

        let parsed = headers.get_all_named::<Allow>().unwrap();
        assert_eq!(parsed.len(), 4);
        assert_eq!(parsed[3].0, Method::Bye);
    }

    #[test]
    fn supported_list() {
        let mut headers = Headers::new();
        headers.insert(Name::SUPPORTED, "timer, gruu");

        let supported = headers.get_all_named::<Supported>().unwrap();

        assert!(supported.iter().any(|s| s.0 == "timer"));
        assert!(supported.iter().any(|s| s.0 == "gruu"));
    }
}
