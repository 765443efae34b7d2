use super::from_str_header;
use crate::Name;

from_str_header!(
    /// `Expires` header, seconds until the binding or offer expires
    Expires,
    Name::EXPIRES,
    u32
);

from_str_header!(
    /// `Min-Expires` header of a 423 response
    MinExpires,
    Name::MIN_EXPIRES,
    u32
);

from_str_header!(
    /// `Max-Forwards` header
    MaxForwards,
    Name::MAX_FORWARDS,
    u32
);

#[cfg(test)]
mod test {
    use super::*;
    use crate::header::{HeaderParse, PrintHeader};
    use bytes::Bytes;

    #[test]
    fn numeric_headers() {
        let src = Bytes::from_static(b"600");

        let (rem, expires) = Expires::parse(&src, "600").unwrap();
        assert!(rem.is_empty());
        assert_eq!(expires, Expires(600));
        assert_eq!(expires.print(), "600");
    }
}
