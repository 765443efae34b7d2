use crate::header::{ConstNamed, HeaderParse, PrintHeader};
use crate::parse::IResult;
use crate::uri::{NameAddr, Params};
use crate::Name;
use bytes::Bytes;
use std::fmt;

macro_rules! routing_header {
    ($(#[$meta:meta])* $struct_name:ident, $header_name:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $struct_name {
            pub addr: NameAddr,
            pub params: Params,
        }

        impl $struct_name {
            pub fn new(addr: NameAddr) -> Self {
                Self {
                    addr,
                    params: Params::new(),
                }
            }
        }

        impl ConstNamed for $struct_name {
            const NAME: Name = $header_name;
        }

        impl HeaderParse for $struct_name {
            fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
                let (i, addr) = NameAddr::parse(src, i)?;
                let (i, params) = Params::parse(src, i)?;

                Ok((i, Self { addr, params }))
            }
        }

        impl PrintHeader for $struct_name {
            fn print(&self) -> String {
                self.to_string()
            }
        }

        impl fmt::Display for $struct_name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", self.addr, self.params)
            }
        }
    };
}

routing_header!(
    /// `Route` header
    Route,
    Name::ROUTE
);

routing_header!(
    /// `Record-Route` header
    RecordRoute,
    Name::RECORD_ROUTE
);

impl From<RecordRoute> for Route {
    fn from(rr: RecordRoute) -> Self {
        Self {
            addr: rr.addr,
            params: rr.params,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn record_route() {
        let input = "<sip:edge.example.com;lr>";
        let src = Bytes::from_static(input.as_bytes());

        let (_, rr) = RecordRoute::parse(&src, input).unwrap();

        assert!(rr.addr.uri.uri_params.contains("lr"));
        assert_eq!(rr.to_string(), "<sip:edge.example.com;lr>");
    }
}
