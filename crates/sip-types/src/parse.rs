//! Shared character classes and small combinators used by all parsers

use nom::bytes::complete::tag;
use nom::sequence::delimited;

pub type IResult<I, O> = nom::IResult<I, O>;

/// RFC 3261 `token` character class
pub fn token(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '-' | '.' | '!' | '%' | '*' | '_' | '+' | '`' | '\'' | '~'
        )
}

pub fn whitespace(c: char) -> bool {
    c.is_ascii_whitespace()
}

pub fn digit(c: char) -> bool {
    c.is_ascii_digit()
}

/// Parse a quoted string, returning the content between the quotes.
///
/// Escaped pairs are kept verbatim, the caller sees the raw content.
pub fn parse_quoted(i: &str) -> IResult<&str, &str> {
    delimited(tag("\""), quoted_content, tag("\""))(i)
}

fn quoted_content(i: &str) -> IResult<&str, &str> {
    let mut chars = i.char_indices();
    let mut escaped = false;

    for (idx, c) in &mut chars {
        if escaped {
            escaped = false;
            continue;
        }

        match c {
            '\\' => escaped = true,
            '"' => return Ok((&i[idx..], &i[..idx])),
            _ => {}
        }
    }

    Err(nom::Err::Error(nom::error::Error::new(
        i,
        nom::error::ErrorKind::TakeUntil,
    )))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn quoted() {
        let (rem, content) = parse_quoted(r#""Alice Liddell" <sip:"#).unwrap();
        assert_eq!(content, "Alice Liddell");
        assert_eq!(rem, " <sip:");
    }

    #[test]
    fn quoted_escaped() {
        let (rem, content) = parse_quoted(r#""a \" b" rest"#).unwrap();
        assert_eq!(content, r#"a \" b"#);
        assert_eq!(rem, " rest");
    }
}
