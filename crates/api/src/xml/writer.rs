//! Multistatus XML writer
//!
//! Thin helpers over quick-xml's `Writer`. Known response structure
//! uses the `D:`/`C:`/`B:` prefixes declared on `<D:multistatus>`;
//! property elements echoed back to the client keep their original
//! namespace through a local `X:` binding.

use std::io::{self, Cursor};

use axum::http::StatusCode;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

pub const NS_DAV: &str = "DAV:";
pub const NS_CALDAV: &str = "urn:ietf:params:xml:ns:caldav";
pub const NS_CALSERV: &str = "http://calendarserver.org/ns/";
pub const NS_APPLE: &str = "http://apple.com/ns/ical/";

pub type XmlWriter = Writer<Cursor<Vec<u8>>>;

/// A writer primed with the XML declaration and an open
/// `<D:multistatus>` element.
pub fn multistatus() -> io::Result<XmlWriter> {
    let mut writer = Writer::new(Cursor::new(Vec::with_capacity(1024)));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut root = BytesStart::new("D:multistatus");
    root.push_attribute(("xmlns:B", NS_CALSERV));
    root.push_attribute(("xmlns:C", NS_CALDAV));
    root.push_attribute(("xmlns:D", NS_DAV));
    writer.write_event(Event::Start(root))?;
    Ok(writer)
}

/// Close `</D:multistatus>` and hand back the document bytes.
pub fn finish(mut writer: XmlWriter) -> io::Result<Vec<u8>> {
    writer.write_event(Event::End(BytesEnd::new("D:multistatus")))?;
    Ok(writer.into_inner().into_inner())
}

pub fn start(writer: &mut XmlWriter, tag: &str) -> io::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(tag)))
}

pub fn end(writer: &mut XmlWriter, tag: &str) -> io::Result<()> {
    writer.write_event(Event::End(BytesEnd::new(tag)))
}

pub fn empty(writer: &mut XmlWriter, tag: &str) -> io::Result<()> {
    writer.write_event(Event::Empty(BytesStart::new(tag)))
}

pub fn text(writer: &mut XmlWriter, content: &str) -> io::Result<()> {
    writer.write_event(Event::Text(BytesText::new(content)))
}

/// `<tag>content</tag>`
pub fn text_tag(writer: &mut XmlWriter, tag: &str, content: &str) -> io::Result<()> {
    start(writer, tag)?;
    text(writer, content)?;
    end(writer, tag)
}

/// `<D:href>path</D:href>`
pub fn href(writer: &mut XmlWriter, path: &str) -> io::Result<()> {
    text_tag(writer, "D:href", path)
}

/// `<D:status>HTTP/1.1 ...</D:status>`
pub fn status(writer: &mut XmlWriter, code: StatusCode) -> io::Result<()> {
    let line = format!(
        "HTTP/1.1 {} {}",
        code.as_u16(),
        code.canonical_reason().unwrap_or("")
    );
    text_tag(writer, "D:status", &line)
}

/// Open a property element under its original namespace:
/// `<X:name xmlns:X="ns">`.
pub fn foreign_start(writer: &mut XmlWriter, name: &str, ns: &str) -> io::Result<()> {
    let mut el = BytesStart::new(format!("X:{name}"));
    el.push_attribute(("xmlns:X", ns));
    writer.write_event(Event::Start(el))
}

pub fn foreign_end(writer: &mut XmlWriter, name: &str) -> io::Result<()> {
    writer.write_event(Event::End(BytesEnd::new(format!("X:{name}"))))
}

/// `<X:name xmlns:X="ns"/>` for properties listed without content.
pub fn foreign_empty(writer: &mut XmlWriter, name: &str, ns: &str) -> io::Result<()> {
    let mut el = BytesStart::new(format!("X:{name}"));
    el.push_attribute(("xmlns:X", ns));
    writer.write_event(Event::Empty(el))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn into_string(writer: XmlWriter) -> String {
        String::from_utf8(finish(writer).expect("finish")).expect("utf8")
    }

    #[test]
    fn multistatus_skeleton() {
        let writer = multistatus().expect("writer");
        let xml = into_string(writer);
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(xml.contains("xmlns:D=\"DAV:\""));
        assert!(xml.contains("xmlns:C=\"urn:ietf:params:xml:ns:caldav\""));
        assert!(xml.contains("xmlns:B=\"http://calendarserver.org/ns/\""));
        assert!(xml.ends_with("</D:multistatus>"));
    }

    #[test]
    fn status_lines() {
        let mut writer = multistatus().expect("writer");
        status(&mut writer, StatusCode::OK).expect("ok");
        status(&mut writer, StatusCode::NOT_FOUND).expect("nf");
        let xml = into_string(writer);
        assert!(xml.contains("<D:status>HTTP/1.1 200 OK</D:status>"));
        assert!(xml.contains("<D:status>HTTP/1.1 404 Not Found</D:status>"));
    }

    #[test]
    fn foreign_properties_keep_their_namespace() {
        let mut writer = multistatus().expect("writer");
        foreign_start(&mut writer, "getetag", NS_DAV).expect("start");
        text(&mut writer, "12-34").expect("text");
        foreign_end(&mut writer, "getetag").expect("end");
        foreign_empty(&mut writer, "x-madeup", "urn:example").expect("empty");
        let xml = into_string(writer);
        assert!(xml.contains("<X:getetag xmlns:X=\"DAV:\">12-34</X:getetag>"));
        assert!(xml.contains("<X:x-madeup xmlns:X=\"urn:example\"/>"));
    }

    #[test]
    fn text_is_escaped() {
        let mut writer = multistatus().expect("writer");
        text_tag(&mut writer, "D:displayname", "a <b> & c").expect("tag");
        let xml = into_string(writer);
        assert!(xml.contains("a &lt;b&gt; &amp; c"));
    }
}
