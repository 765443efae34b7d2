use super::name::Name;
use super::{ConstNamed, HeaderError, HeaderParse, PrintHeader};
use bytesstr::BytesStr;
use std::fmt;

/// One or more raw values stored under a single header name
#[derive(Debug, Clone)]
pub enum Values {
    One(BytesStr),
    Many(Vec<BytesStr>),
}

impl Values {
    fn push(&mut self, value: BytesStr) {
        match self {
            Values::One(first) => {
                *self = Values::Many(vec![first.clone(), value]);
            }
            Values::Many(values) => values.push(value),
        }
    }

    fn first(&self) -> &BytesStr {
        match self {
            Values::One(value) => value,
            Values::Many(values) => &values[0],
        }
    }

    fn first_mut(&mut self) -> &mut BytesStr {
        match self {
            Values::One(value) => value,
            Values::Many(values) => &mut values[0],
        }
    }

    fn iter(&self) -> impl Iterator<Item = &BytesStr> {
        match self {
            Values::One(value) => std::slice::from_ref(value).iter(),
            Values::Many(values) => values.iter(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    name: Name,
    values: Values,
}

/// Container for the headers of a SIP message.
///
/// A `Vec`-backed multimap that keeps insertion order, which is also the
/// order headers are printed in.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<Entry>,
}

impl Headers {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    fn entry_mut(&mut self, name: &Name) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| &e.name == name)
    }

    fn entry(&self, name: &Name) -> Option<&Entry> {
        self.entries.iter().find(|e| &e.name == name)
    }

    pub fn contains(&self, name: &Name) -> bool {
        self.entry(name).is_some()
    }

    /// Insert a raw value, appending when the name is already present
    pub fn insert(&mut self, name: impl Into<Name>, value: impl Into<BytesStr>) {
        let name = name.into();

        if let Some(entry) = self.entry_mut(&name) {
            entry.values.push(value.into());
        } else {
            self.entries.push(Entry {
                name,
                values: Values::One(value.into()),
            });
        }
    }

    /// Insert a raw value; a new name is placed at the front of the message
    pub fn insert_front(&mut self, name: impl Into<Name>, value: impl Into<BytesStr>) {
        let name = name.into();

        if let Some(entry) = self.entry_mut(&name) {
            entry.values.push(value.into());
        } else {
            self.entries.insert(
                0,
                Entry {
                    name,
                    values: Values::One(value.into()),
                },
            );
        }
    }

    /// Insert a typed header under an explicit name
    pub fn insert_type<H: PrintHeader>(&mut self, name: impl Into<Name>, header: &H) {
        let name = name.into();
        let printed = BytesStr::from(header.print());

        match self.entry_mut(&name) {
            Some(entry) if H::CSV => {
                let value = match &mut entry.values {
                    Values::One(value) => value,
                    Values::Many(values) => values.last_mut().expect("many is never empty"),
                };

                *value = BytesStr::from(format!("{}, {}", value, printed));
            }
            Some(entry) => entry.values.push(printed),
            None => self.entries.push(Entry {
                name,
                values: Values::One(printed),
            }),
        }
    }

    /// Insert a typed header under its constant name
    pub fn insert_named<H: PrintHeader + ConstNamed>(&mut self, header: &H) {
        self.insert_type(H::NAME, header);
    }

    /// Insert a typed header under its constant name, placing a new
    /// name at the front of the message
    pub fn insert_named_front<H: PrintHeader + ConstNamed>(&mut self, header: &H) {
        if self.contains(&H::NAME) {
            self.insert_named(header);
        } else {
            self.insert_front(H::NAME, header.print());
        }
    }

    /// Parse the topmost value stored under `name` into `H`
    pub fn get<H: HeaderParse>(&self, name: Name) -> Result<H, HeaderError> {
        let entry = self.entry(&name).ok_or_else(|| HeaderError::missing(name.clone()))?;

        let value = entry.values.first();

        match H::parse(value.as_ref(), value.trim()) {
            Ok((_, header)) => Ok(header),
            Err(_) => Err(HeaderError::malformed(name)),
        }
    }

    /// Parse the topmost value of `H`'s constant name
    pub fn get_named<H: HeaderParse + ConstNamed>(&self) -> Result<H, HeaderError> {
        self.get(H::NAME)
    }

    /// Parse every value stored under `name`, splitting comma separated
    /// lists. Absent headers yield an empty vec.
    pub fn get_all<H: HeaderParse>(&self, name: Name) -> Result<Vec<H>, HeaderError> {
        let entry = match self.entry(&name) {
            Some(entry) => entry,
            None => return Ok(Vec::new()),
        };

        let mut out = Vec::new();

        for value in entry.values.iter() {
            let mut i = value.trim();

            loop {
                match H::parse(value.as_ref(), i) {
                    Ok((rem, header)) => {
                        out.push(header);

                        let rem = rem.trim_start();

                        match rem.strip_prefix(',') {
                            Some(rest) => i = rest.trim_start(),
                            None => break,
                        }
                    }
                    Err(_) if out.is_empty() => return Err(HeaderError::malformed(name)),
                    Err(_) => break,
                }
            }
        }

        Ok(out)
    }

    pub fn get_all_named<H: HeaderParse + ConstNamed>(&self) -> Result<Vec<H>, HeaderError> {
        self.get_all(H::NAME)
    }

    /// Parse, modify and re-print the topmost value of a header
    pub fn edit<H>(&mut self, name: Name, edit: impl FnOnce(&mut H)) -> Result<(), HeaderError>
    where
        H: HeaderParse + PrintHeader,
    {
        let mut header: H = self.get(name.clone())?;

        edit(&mut header);

        let entry = self.entry_mut(&name).expect("present, was just parsed");
        *entry.values.first_mut() = BytesStr::from(header.print());

        Ok(())
    }

    pub fn edit_named<H>(&mut self, edit: impl FnOnce(&mut H)) -> Result<(), HeaderError>
    where
        H: HeaderParse + PrintHeader + ConstNamed,
    {
        self.edit(H::NAME, edit)
    }

    /// Copy the raw values of `name` into `dst`
    pub fn clone_into(&self, dst: &mut Headers, name: Name) -> Result<(), HeaderError> {
        let entry = self.entry(&name).ok_or(HeaderError::Missing(name))?;

        dst.entries.push(entry.clone());

        Ok(())
    }

    /// Remove all values of `name`, returning them if any were present
    pub fn remove(&mut self, name: &Name) -> Option<Values> {
        let idx = self.entries.iter().position(|e| &e.name == name)?;

        Some(self.entries.remove(idx).values)
    }

    /// Iterate over `(name, value)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&Name, &BytesStr)> {
        self.entries
            .iter()
            .flat_map(|e| e.values.iter().map(move |v| (&e.name, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            write!(f, "{}: {}\r\n", name, value)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::header::typed::{Allow, Expires, MaxForwards, Via};
    use crate::Method;

    #[test]
    fn raw_insert_order() {
        let mut headers = Headers::new();

        headers.insert("expires", "120");
        headers.insert_front("max-forwards", "70");

        assert_eq!(
            headers.to_string(),
            "Max-Forwards: 70\r\nExpires: 120\r\n"
        );
    }

    #[test]
    fn typed_round_trip() {
        let mut headers = Headers::new();

        headers.insert_named(&Expires(600));
        headers.insert_named(&MaxForwards(70));

        assert_eq!(headers.get_named::<Expires>().unwrap(), Expires(600));
        assert_eq!(headers.get_named::<MaxForwards>().unwrap(), MaxForwards(70));
    }

    #[test]
    fn csv_headers_join() {
        let mut headers = Headers::new();

        headers.insert_named(&Allow(Method::Invite));
        headers.insert_named(&Allow(Method::Ack));
        headers.insert_named(&Allow(Method::Bye));

        assert_eq!(headers.to_string(), "Allow: INVITE, ACK, BYE\r\n");

        let allow = headers.get_all_named::<Allow>().unwrap();
        assert_eq!(
            allow.into_iter().map(|a| a.0).collect::<Vec<_>>(),
            vec![Method::Invite, Method::Ack, Method::Bye]
        );
    }

    #[test]
    fn multi_line_headers_keep_lines() {
        let mut headers = Headers::new();

        headers.insert(
            Name::VIA,
            "SIP/2.0/WS a.example.com;branch=z9hG4bKa",
        );
        headers.insert(
            Name::VIA,
            "SIP/2.0/WS b.example.com;branch=z9hG4bKb",
        );

        let vias = headers.get_all_named::<Via>().unwrap();
        assert_eq!(vias.len(), 2);
        assert_eq!(vias[0].params.get_val("branch").unwrap(), "z9hG4bKa");

        assert_eq!(headers.to_string().matches("Via:").count(), 2);
    }

    #[test]
    fn missing_vs_empty() {
        let headers = Headers::new();

        assert!(matches!(
            headers.get_named::<Expires>(),
            Err(HeaderError::Missing(_))
        ));
        assert!(headers.get_all_named::<Via>().unwrap().is_empty());
    }
}
