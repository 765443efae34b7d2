use crate::parse::{parse_quoted, token, IResult};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::combinator::opt;
use nom::sequence::preceded;
use std::fmt;

/// A single `;name` or `;name=value` parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: BytesStr,
    pub value: Option<BytesStr>,
}

impl Param {
    pub fn value(name: impl Into<BytesStr>, value: impl Into<BytesStr>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn flag(name: impl Into<BytesStr>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ";{}", self.name)?;

        if let Some(value) = &self.value {
            if value.is_empty() || value.chars().any(|c| !param_value_char(c)) {
                write!(f, "=\"{}\"", value)?;
            } else {
                write!(f, "={}", value)?;
            }
        }

        Ok(())
    }
}

/// Ordered list of `;`-separated parameters with case-insensitive names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    params: Vec<Param>,
}

fn param_value_char(c: char) -> bool {
    token(c) || matches!(c, '[' | ']' | ':' | '&' | '+' | '$' | '/')
}

impl Params {
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    pub fn with(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Parse as many `;name(=value)` pairs as present
    pub fn parse<'i>(src: &Bytes, mut i: &'i str) -> IResult<&'i str, Self> {
        let mut params = Vec::new();

        loop {
            let attempt: IResult<&str, (&str, Option<&str>)> = preceded(tag(";"), |i| {
                let (i, name) = take_while1(token)(i)?;
                let (i, value) = opt(preceded(
                    tag("="),
                    alt((parse_quoted, take_while1(param_value_char))),
                ))(i)?;
                Ok((i, (name, value)))
            })(i);

            match attempt {
                Ok((rem, (name, value))) => {
                    params.push(Param {
                        name: BytesStr::from_parse(src, name),
                        value: value.map(|v| BytesStr::from_parse(src, v)),
                    });
                    i = rem;
                }
                Err(_) => return Ok((i, Self { params })),
            }
        }
    }

    /// Parse `name=value` pairs separated by `&`, the form URI header
    /// parameters take after the `?`
    pub fn parse_amp<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let mut params = Vec::new();
        let mut i = i;

        loop {
            fn pair(i: &str) -> IResult<&str, (&str, &str)> {
                let (i, name) = take_while1(token)(i)?;
                let (i, _) = tag("=")(i)?;
                let (i, value) = take_while1(param_value_char)(i)?;
                Ok((i, (name, value)))
            }

            let attempt = pair(i);

            match attempt {
                Ok((rem, (name, value))) => {
                    params.push(Param {
                        name: BytesStr::from_parse(src, name),
                        value: Some(BytesStr::from_parse(src, value)),
                    });

                    match rem.strip_prefix('&') {
                        Some(rem) => i = rem,
                        None => return Ok((rem, Self { params })),
                    }
                }
                Err(_) => return Ok((i, Self { params })),
            }
        }
    }

    /// Print in the `&`-separated URI header form
    pub fn print_amp(&self) -> impl fmt::Display + '_ {
        struct AmpPrint<'p>(&'p [Param]);

        impl fmt::Display for AmpPrint<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for (idx, param) in self.0.iter().enumerate() {
                    if idx > 0 {
                        f.write_str("&")?;
                    }

                    write!(f, "{}", param.name)?;

                    if let Some(value) = &param.value {
                        write!(f, "={}", value)?;
                    }
                }

                Ok(())
            }
        }

        AmpPrint(&self.params)
    }

    pub fn get(&self, name: &str) -> Option<&Param> {
        self.params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Param> {
        self.params
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Value of the parameter, if the parameter is present and has one
    pub fn get_val(&self, name: &str) -> Option<&BytesStr> {
        self.get(name).and_then(|p| p.value.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove the parameter and return its value
    pub fn take(&mut self, name: &str) -> Option<BytesStr> {
        let idx = self
            .params
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))?;

        self.params.remove(idx).value
    }

    pub fn push(&mut self, param: Param) {
        self.params.push(param);
    }

    /// Overwrite the value of an existing parameter or append a new one
    pub fn push_or_edit(&mut self, name: impl Into<BytesStr>, value: impl Into<BytesStr>) {
        let name = name.into();
        let value = value.into();

        if let Some(param) = self.get_mut(&name) {
            param.value = Some(value);
        } else {
            self.params.push(Param::value(name, value));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.params.iter()
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for param in &self.params {
            param.fmt(f)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(i: &'static str) -> (&'static str, Params) {
        let src = Bytes::from_static(i.as_bytes());
        Params::parse(&src, i).unwrap()
    }

    #[test]
    fn parse_mixed() {
        let (rem, params) = parse(";branch=z9hG4bKabc;rport;received=192.0.2.1?x=1");

        assert_eq!(rem, "?x=1");
        assert_eq!(params.get_val("BRANCH").unwrap(), "z9hG4bKabc");
        assert!(params.contains("rport"));
        assert!(params.get_val("rport").is_none());
        assert_eq!(params.get_val("received").unwrap(), "192.0.2.1");
    }

    #[test]
    fn quoted_value_round_trip() {
        let (_, params) = parse(r#";+sip.instance="<urn:uuid:abc>""#);

        assert_eq!(params.get_val("+sip.instance").unwrap(), "<urn:uuid:abc>");
        assert_eq!(params.to_string(), r#";+sip.instance="<urn:uuid:abc>""#);
    }

    #[test]
    fn take_removes() {
        let (_, mut params) = parse(";tag=abc;x");

        assert_eq!(params.take("tag").unwrap(), "abc");
        assert!(params.get("tag").is_none());
        assert!(params.contains("x"));
    }
}
