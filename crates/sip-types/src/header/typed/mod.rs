//! Typed views of the headers the stack works with

mod auth;
mod call_id;
mod contact;
mod content;
mod csv;
mod cseq;
mod event;
mod expires;
mod from_to;
mod refer;
mod routing;
mod timer;
mod via;

pub use auth::{
    Algorithm, AuthChallenge, AuthParam, AuthResponse, DigestChallenge, DigestResponse, QopOption,
    QopResponse,
};
pub use call_id::CallID;
pub use contact::Contact;
pub use content::{ContentLength, ContentType};
pub use csv::{Accept, Allow, Require, Supported};
pub use cseq::CSeq;
pub use event::{Event, SubscriptionState};
pub use expires::{Expires, MaxForwards, MinExpires};
pub use from_to::FromTo;
pub use refer::{ReferTo, Replaces};
pub use routing::{RecordRoute, Route};
pub use timer::{MinSe, Refresher, SessionExpires};
pub use via::Via;

/// Declare a header wrapping a `FromStr`/`Display` value
macro_rules! from_str_header {
    ($(#[$meta:meta])* $struct_name:ident, $header_name:expr, $inner:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $struct_name(pub $inner);

        impl $crate::header::ConstNamed for $struct_name {
            const NAME: $crate::Name = $header_name;
        }

        impl $crate::header::HeaderParse for $struct_name {
            fn parse<'i>(
                _src: &bytes::Bytes,
                i: &'i str,
            ) -> $crate::parse::IResult<&'i str, Self> {
                let end = i
                    .char_indices()
                    .find(|(_, c)| !c.is_ascii_digit())
                    .map(|(idx, _)| idx)
                    .unwrap_or(i.len());

                match i[..end].parse() {
                    Ok(v) => Ok((&i[end..], Self(v))),
                    Err(_) => Err(nom::Err::Error(nom::error::Error::new(
                        i,
                        nom::error::ErrorKind::Digit,
                    ))),
                }
            }
        }

        impl $crate::header::PrintHeader for $struct_name {
            fn print(&self) -> String {
                self.0.to_string()
            }
        }
    };
}

pub(crate) use from_str_header;
