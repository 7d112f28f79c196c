//! Round-trip behavior over realistic client output: folded lines,
//! embedded timezones, recurrence rules, and non-ASCII text.

use kalends_ical::{Calendar, CompKind, Frequency, TimeKind};

// The shape Apple Calendar produces: VTIMEZONE with both observances,
// folded SUMMARY, TZID-qualified times.
const APPLE_STYLE: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//Apple Inc.//macOS 14.0//EN\r\n\
CALSCALE:GREGORIAN\r\n\
BEGIN:VTIMEZONE\r\n\
TZID:Europe/Riga\r\n\
BEGIN:DAYLIGHT\r\n\
TZOFFSETFROM:+0200\r\n\
RRULE:FREQ=YEARLY;BYMONTH=3;BYDAY=-1SU\r\n\
DTSTART:19810329T030000\r\n\
TZNAME:GMT+3\r\n\
TZOFFSETTO:+0300\r\n\
END:DAYLIGHT\r\n\
BEGIN:STANDARD\r\n\
TZOFFSETFROM:+0300\r\n\
RRULE:FREQ=YEARLY;BYMONTH=10;BYDAY=-1SU\r\n\
DTSTART:19961027T040000\r\n\
TZNAME:GMT+2\r\n\
TZOFFSETTO:+0200\r\n\
END:STANDARD\r\n\
END:VTIMEZONE\r\n\
BEGIN:VEVENT\r\n\
CREATED:20240101T120000Z\r\n\
UID:4B1C0A2E-97D3-4E5B-8123-000000000001\r\n\
DTEND;TZID=Europe/Riga:20240102T113000\r\n\
SUMMARY:Quarterly planning with the Rīga team (agenda review) and a ver\r\n\
 y long description that wraps across physical lines\r\n\
LAST-MODIFIED:20240101T120500Z\r\n\
DTSTAMP:20240101T120500Z\r\n\
DTSTART;TZID=Europe/Riga:20240102T101500\r\n\
RRULE:FREQ=WEEKLY;INTERVAL=2;BYDAY=TU\r\n\
BEGIN:VALARM\r\n\
TRIGGER:-PT15M\r\n\
ACTION:DISPLAY\r\n\
DESCRIPTION:Reminder\r\n\
END:VALARM\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

fn unfold(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"\r\n ") {
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

#[test]
fn apple_style_calendar_parses() {
    let cal = Calendar::parse(APPLE_STYLE.as_bytes(), None).expect("calendar");

    let ev = cal.events().next().expect("event");
    assert_eq!(
        ev.uid.as_deref(),
        Some("4B1C0A2E-97D3-4E5B-8123-000000000001")
    );
    let dtstart = ev.dtstart.as_ref().expect("dtstart");
    assert_eq!(dtstart.kind, TimeKind::Local);
    assert_eq!(dtstart.tzid.as_deref(), Some("Europe/Riga"));
    assert!(ev.created.is_some());
    assert!(ev.last_modified.is_some());
    assert!(ev.dtstamp.is_some());
    assert_eq!(ev.rrule.as_ref().map(|r| r.freq), Some(Frequency::Weekly));

    let tz = cal.timezones().next().expect("timezone");
    assert_eq!(tz.observances.len(), 2);
    assert!(tz.observances.iter().all(|o| o.rrule.is_some()));
    assert!(cal.components_of(CompKind::Valarm).next().is_some());
}

#[test]
fn parse_print_parse_is_stable() {
    let first = Calendar::parse(APPLE_STYLE.as_bytes(), None).expect("first");
    let printed = first.to_bytes();
    let second = Calendar::parse(&printed, None).expect("second");

    // Same typed view and same logical lines; only fold positions may
    // have moved.
    assert_eq!(first.components, second.components);
    assert_eq!(first.nodes, second.nodes);
    assert_eq!(printed, second.to_bytes());
    assert_eq!(
        unfold(&printed),
        unfold(APPLE_STYLE.as_bytes()),
        "printer must not change logical content"
    );
}

#[test]
fn every_printed_line_fits_and_is_whole_utf8() {
    let cal = Calendar::parse(APPLE_STYLE.as_bytes(), None).expect("calendar");
    for line in cal.to_bytes().split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        assert!(line.len() < 75, "line too long: {}", line.len());
        assert!(std::str::from_utf8(line).is_ok());
    }
}
