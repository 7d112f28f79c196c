//! CalDAV XML request parser
//!
//! Streams a PROPFIND/REPORT/PROPPATCH body into a typed request
//! record. The outermost recognised element fixes the request type;
//! `<prop>` children become property requests (known or not), and
//! `<href>` children of the root are collected URL-decoded. Everything
//! else is ignored, which is what RFC 4918 asks of servers.

use std::fmt;

use quick_xml::events::Event;
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;

use crate::props::Prop;
use crate::xml::writer::{NS_CALDAV, NS_DAV};

/// The request types the server understands, fixed by the root
/// element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqKind {
    CalendarQuery,
    CalendarMultiget,
    Propfind,
    PropertyUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    NotValidated,
    Valid,
    Invalid,
}

/// One property named in a `<prop>` block.
#[derive(Debug, Clone)]
pub struct PropRequest {
    /// `None` for properties the server has no notion of.
    pub tag: Option<Prop>,
    pub name: String,
    pub ns: String,
    /// Only captured for PROPERTYUPDATE on known properties.
    pub value: Option<String>,
    pub validity: Validity,
}

#[derive(Debug, Clone)]
pub struct DavRequest {
    pub kind: ReqKind,
    pub props: Vec<PropRequest>,
    pub hrefs: Vec<String>,
}

/// Rendered as `line:col: message`, the way the XML layer reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlError {
    pub line: usize,
    pub col: usize,
    pub message: String,
}

impl fmt::Display for XmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for XmlError {}

fn line_col(body: &[u8], offset: usize) -> (usize, usize) {
    let upto = &body[..offset.min(body.len())];
    let line = 1 + upto.iter().filter(|&&b| b == b'\n').count();
    let col = upto.len() - upto.iter().rposition(|&b| b == b'\n').map_or(0, |p| p + 1);
    (line, col)
}

/// Percent-decode, with `+` as space. Malformed escapes fail.
fn urldecode(s: &str) -> Option<String> {
    let b = s.as_bytes();
    let mut out = Vec::with_capacity(b.len());
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let hi = b.get(i + 1).and_then(|c| (*c as char).to_digit(16))?;
                let lo = b.get(i + 2).and_then(|c| (*c as char).to_digit(16))?;
                out.push((hi * 16 + lo) as u8);
                i += 3;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}

struct CurrentProp {
    tag: Option<Prop>,
    name: String,
    ns: String,
    value: String,
    depth: usize,
}

struct Parse<'a> {
    body: &'a [u8],
    kind: Option<ReqKind>,
    props: Vec<PropRequest>,
    hrefs: Vec<String>,
    in_prop: bool,
    in_href: bool,
    href_buf: String,
    current: Option<CurrentProp>,
}

impl Parse<'_> {
    fn err(&self, offset: usize, message: impl Into<String>) -> XmlError {
        let (line, col) = line_col(self.body, offset);
        XmlError {
            line,
            col,
            message: message.into(),
        }
    }

    fn set_kind(&mut self, kind: ReqKind, offset: usize) -> Result<(), XmlError> {
        if self.kind.is_some() {
            return Err(self.err(offset, "request type already exists"));
        }
        self.kind = Some(kind);
        Ok(())
    }

    fn finish_prop(&mut self, cur: CurrentProp) {
        let mut validity = Validity::NotValidated;
        let value = match (self.kind, cur.tag) {
            (Some(ReqKind::PropertyUpdate), Some(tag)) => {
                if let Some(validate) = tag.spec().validate {
                    validity = if validate(&cur.value) {
                        Validity::Valid
                    } else {
                        Validity::Invalid
                    };
                }
                Some(cur.value)
            }
            _ => None,
        };
        self.props.push(PropRequest {
            tag: cur.tag,
            name: cur.name,
            ns: cur.ns,
            value,
            validity,
        });
    }
}

fn resolved_name(
    resolve: &ResolveResult<'_>,
    local: &[u8],
) -> (String, String) {
    let ns = match resolve {
        ResolveResult::Bound(ns) => String::from_utf8_lossy(ns.as_ref()).into_owned(),
        _ => String::new(),
    };
    (ns, String::from_utf8_lossy(local).into_owned())
}

/// Parse a CalDAV request body into its typed record.
pub fn parse_request(body: &[u8]) -> Result<DavRequest, XmlError> {
    let mut reader = NsReader::from_reader(body);
    let mut buf = Vec::new();
    let mut p = Parse {
        body,
        kind: None,
        props: Vec::new(),
        hrefs: Vec::new(),
        in_prop: false,
        in_href: false,
        href_buf: String::new(),
        current: None,
    };

    loop {
        let offset = reader.buffer_position() as usize;
        match reader.read_resolved_event_into(&mut buf) {
            Ok((resolve, Event::Start(e))) => {
                if let Some(cur) = &mut p.current {
                    cur.depth += 1;
                } else if p.in_prop {
                    let (ns, name) = resolved_name(&resolve, e.local_name().as_ref());
                    let tag = Prop::from_xml(&ns, &name);
                    p.current = Some(CurrentProp {
                        tag,
                        name,
                        ns,
                        value: String::new(),
                        depth: 0,
                    });
                } else {
                    let (ns, name) = resolved_name(&resolve, e.local_name().as_ref());
                    match (ns.as_str(), name.as_str()) {
                        (NS_DAV, "propfind") => p.set_kind(ReqKind::Propfind, offset)?,
                        (NS_DAV, "propertyupdate") => {
                            p.set_kind(ReqKind::PropertyUpdate, offset)?
                        }
                        (NS_CALDAV, "calendar-query") => {
                            p.set_kind(ReqKind::CalendarQuery, offset)?
                        }
                        (NS_CALDAV, "calendar-multiget") => {
                            p.set_kind(ReqKind::CalendarMultiget, offset)?
                        }
                        (NS_DAV, "prop") => {
                            if p.kind.is_none() {
                                return Err(p.err(offset, "property list in unknown request"));
                            }
                            p.in_prop = true;
                        }
                        (NS_DAV, "href") => {
                            p.in_href = true;
                            p.href_buf.clear();
                        }
                        _ => {}
                    }
                }
            }
            Ok((resolve, Event::Empty(e))) => {
                if p.current.is_some() {
                    // Nested markup inside a property value; ignored.
                } else if p.in_prop {
                    let (ns, name) = resolved_name(&resolve, e.local_name().as_ref());
                    let tag = Prop::from_xml(&ns, &name);
                    let cur = CurrentProp {
                        tag,
                        name,
                        ns,
                        value: String::new(),
                        depth: 0,
                    };
                    p.finish_prop(cur);
                } else {
                    let (ns, name) = resolved_name(&resolve, e.local_name().as_ref());
                    match (ns.as_str(), name.as_str()) {
                        (NS_DAV, "propfind") => p.set_kind(ReqKind::Propfind, offset)?,
                        (NS_DAV, "propertyupdate") => {
                            p.set_kind(ReqKind::PropertyUpdate, offset)?
                        }
                        (NS_CALDAV, "calendar-query") => {
                            p.set_kind(ReqKind::CalendarQuery, offset)?
                        }
                        (NS_CALDAV, "calendar-multiget") => {
                            p.set_kind(ReqKind::CalendarMultiget, offset)?
                        }
                        _ => {}
                    }
                }
            }
            Ok((_, Event::Text(t))) => {
                let text = std::str::from_utf8(t.as_ref()).unwrap_or("");
                if let Some(cur) = &mut p.current {
                    cur.value.push_str(text);
                } else if p.in_href {
                    p.href_buf.push_str(text);
                }
            }
            Ok((resolve, Event::End(e))) => {
                if p.current.is_some() {
                    let nested = p.current.as_ref().is_some_and(|cur| cur.depth > 0);
                    if nested {
                        if let Some(cur) = &mut p.current {
                            cur.depth -= 1;
                        }
                    } else if let Some(cur) = p.current.take() {
                        p.finish_prop(cur);
                    }
                } else {
                    let (ns, name) = resolved_name(&resolve, e.local_name().as_ref());
                    match (ns.as_str(), name.as_str()) {
                        (NS_DAV, "prop") => p.in_prop = false,
                        (NS_DAV, "href") => {
                            if p.in_href && !p.href_buf.is_empty() {
                                // RFC 4918 wants these URL-decoded.
                                let decoded = urldecode(&p.href_buf)
                                    .ok_or_else(|| p.err(offset, "bad percent-encoding"))?;
                                p.hrefs.push(decoded);
                            }
                            p.in_href = false;
                        }
                        _ => {}
                    }
                }
            }
            Ok((_, Event::Eof)) => break,
            Ok(_) => {}
            Err(e) => return Err(p.err(reader.buffer_position() as usize, e.to_string())),
        }
        buf.clear();
    }

    let Some(kind) = p.kind else {
        return Err(p.err(body.len(), "unknown request type"));
    };
    Ok(DavRequest {
        kind,
        props: p.props,
        hrefs: p.hrefs,
    })
}
