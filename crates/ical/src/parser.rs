//! Streaming iCalendar parser
//!
//! A push-down parser over the folded-line reader. Each BEGIN/END block
//! becomes a [`Component`] with typed fields; every logical line is also
//! preserved verbatim as a [`Node`] so the printer can round-trip the
//! input. Parsing stops at the first error.

use crate::error::ParseError;
use crate::lines::LineReader;
use crate::types::{
    CompKind, Duration, RecurRule, Time, TimeKind, TzObservance, TzRuleKind, UtcOffset,
    parse_datetime, parse_local_datetime, parse_utc_datetime,
};
use chrono::NaiveDateTime;

/// One logical content line, split into name, raw parameter text, and
/// value. The original spelling is preserved for printing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub params: Option<String>,
    pub value: String,
}

/// A parsed component with its typed fields.
///
/// Properties the server does not interpret still exist as nodes in the
/// owning [`Calendar`]; only the fields below are typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub kind: CompKind,
    pub uid: Option<String>,
    pub created: Option<NaiveDateTime>,
    pub last_modified: Option<NaiveDateTime>,
    pub dtstamp: Option<NaiveDateTime>,
    pub dtstart: Option<Time>,
    pub dtend: Option<Time>,
    pub duration: Option<Duration>,
    pub rrule: Option<RecurRule>,
    pub tzid: Option<String>,
    pub observances: Vec<TzObservance>,
}

impl Component {
    fn new(kind: CompKind) -> Self {
        Component {
            kind,
            uid: None,
            created: None,
            last_modified: None,
            dtstamp: None,
            dtstart: None,
            dtend: None,
            duration: None,
            rrule: None,
            tzid: None,
            observances: Vec::new(),
        }
    }
}

/// A parsed iCalendar document rooted at VCALENDAR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calendar {
    /// Every logical line in input order, for round-trip printing.
    pub nodes: Vec<Node>,
    /// Recognised components in document order.
    pub components: Vec<Component>,
}

impl Calendar {
    /// Parse `input`, reporting diagnostics against `file` (or
    /// `<buffer>` when absent).
    pub fn parse(input: &[u8], file: Option<&str>) -> Result<Calendar, ParseError> {
        let file = file.unwrap_or("<buffer>");
        let mut parser = Parser {
            file,
            lines: LineReader::new(input, file),
            cal: Calendar {
                nodes: Vec::new(),
                components: Vec::new(),
            },
        };

        // RFC 5545, 3.4: the stream must open with BEGIN:VCALENDAR.
        let (name, _, value) = parser.read_line()?;
        if !name.eq_ignore_ascii_case("BEGIN") {
            return Err(parser.err("first statement not \"BEGIN\""));
        } else if !value.eq_ignore_ascii_case("VCALENDAR") {
            return Err(parser.err("first component not \"VCALENDAR\""));
        }

        parser.parse_component(CompKind::Vcalendar)?;
        parser.resolve_timezones()?;
        Ok(parser.cal)
    }

    pub fn components_of(&self, kind: CompKind) -> impl Iterator<Item = &Component> {
        self.components.iter().filter(move |c| c.kind == kind)
    }

    pub fn events(&self) -> impl Iterator<Item = &Component> {
        self.components_of(CompKind::Vevent)
    }

    pub fn timezones(&self) -> impl Iterator<Item = &Component> {
        self.components_of(CompKind::Vtimezone)
    }
}

struct Parser<'a> {
    file: &'a str,
    lines: LineReader<'a>,
    cal: Calendar,
}

impl Parser<'_> {
    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.file, self.lines.line(), message)
    }

    /// Read one logical line, record it as a node, and hand back the
    /// split parts.
    fn read_line(&mut self) -> Result<(String, Option<String>, String), ParseError> {
        let line = self.lines.next_line()?;
        if line.is_empty() {
            return Err(self.err("empty line"));
        }
        let Some((head, value)) = line.split_once(':') else {
            return Err(self.err("no value for line"));
        };
        let (name, params) = match head.split_once(';') {
            Some((name, params)) => (name.to_string(), Some(params.to_string())),
            None => (head.to_string(), None),
        };
        let value = value.to_string();
        self.cal.nodes.push(Node {
            name: name.clone(),
            params: params.clone(),
            value: value.clone(),
        });
        Ok((name, params, value))
    }

    /// Parse the body of a component whose BEGIN line has already been
    /// consumed, up to and including its END line.
    fn parse_component(&mut self, kind: CompKind) -> Result<(), ParseError> {
        let idx = self.cal.components.len();
        self.cal.components.push(Component::new(kind));
        let begin_line = self.lines.line();

        while !self.lines.is_empty() {
            let (name, params, value) = self.read_line()?;

            if name.eq_ignore_ascii_case("BEGIN") {
                if let Some(inner) = CompKind::from_name(&value) {
                    self.parse_component(inner)?;
                } else if let Some(tz) = TzRuleKind::from_name(&value) {
                    self.parse_observance(tz)?;
                } else {
                    self.skip_opaque(&value)?;
                }
                continue;
            } else if name.eq_ignore_ascii_case("END") {
                if value.eq_ignore_ascii_case(kind.name()) {
                    break;
                }
                continue;
            }

            if name.eq_ignore_ascii_case("UID") {
                let v = Some(self.nonempty(&value)?);
                self.cal.components[idx].uid = v;
            } else if name.eq_ignore_ascii_case("CREATED") {
                let v = Some(self.utc(&value)?);
                self.cal.components[idx].created = v;
            } else if name.eq_ignore_ascii_case("LAST-MODIFIED") {
                let v = Some(self.utc(&value)?);
                self.cal.components[idx].last_modified = v;
            } else if name.eq_ignore_ascii_case("DTSTAMP") {
                let v = Some(self.utc(&value)?);
                self.cal.components[idx].dtstamp = v;
            } else if name.eq_ignore_ascii_case("DTSTART") {
                let v = Some(self.tz_datetime(&value, params.as_deref())?);
                self.cal.components[idx].dtstart = v;
            } else if name.eq_ignore_ascii_case("DTEND") {
                let v = Some(self.tz_datetime(&value, params.as_deref())?);
                self.cal.components[idx].dtend = v;
            } else if name.eq_ignore_ascii_case("DURATION") {
                let v = Some(Duration::parse(&value).map_err(|m| self.err(m))?);
                self.cal.components[idx].duration = v;
            } else if name.eq_ignore_ascii_case("TZID") {
                let v = Some(self.nonempty(&value)?);
                self.cal.components[idx].tzid = v;
            } else if name.eq_ignore_ascii_case("RRULE") {
                let v = Some(RecurRule::parse(&value, false).map_err(|m| self.err(m))?);
                self.cal.components[idx].rrule = v;
            }
        }

        // Required properties, reported against the BEGIN line.
        let comp = &self.cal.components[idx];
        match comp.kind {
            CompKind::Vevent => {
                if comp.uid.is_none() {
                    return Err(ParseError::new(self.file, begin_line, "missing \"UID\""));
                }
                if comp.dtstart.is_none() {
                    return Err(ParseError::new(
                        self.file,
                        begin_line,
                        "missing \"DTSTART\"",
                    ));
                }
            }
            CompKind::Vtimezone => {
                if comp.tzid.is_none() {
                    return Err(ParseError::new(self.file, begin_line, "missing \"TZID\""));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Parse a STANDARD/DAYLIGHT block into the most recent VTIMEZONE.
    fn parse_observance(&mut self, kind: TzRuleKind) -> Result<(), ParseError> {
        let Some(tz_idx) = self
            .cal
            .components
            .iter()
            .rposition(|c| c.kind == CompKind::Vtimezone)
        else {
            return Err(self.err(format!("\"{}\" outside \"VTIMEZONE\"", kind.name())));
        };

        let mut obs = TzObservance {
            kind,
            dtstart: None,
            offset_from: None,
            offset_to: None,
            rrule: None,
        };

        while !self.lines.is_empty() {
            let (name, _, value) = self.read_line()?;

            if name.eq_ignore_ascii_case("END") {
                if value.eq_ignore_ascii_case(kind.name()) {
                    break;
                }
                continue;
            }

            // DTSTART here must be local time: RFC 5545, p. 65.
            if name.eq_ignore_ascii_case("DTSTART") {
                obs.dtstart = Some(parse_local_datetime(&value).map_err(|m| self.err(m))?);
            } else if name.eq_ignore_ascii_case("TZOFFSETFROM") {
                obs.offset_from = Some(UtcOffset::parse(&value).map_err(|m| self.err(m))?);
            } else if name.eq_ignore_ascii_case("TZOFFSETTO") {
                obs.offset_to = Some(UtcOffset::parse(&value).map_err(|m| self.err(m))?);
            } else if name.eq_ignore_ascii_case("RRULE") {
                obs.rrule = Some(RecurRule::parse(&value, true).map_err(|m| self.err(m))?);
            }
        }

        self.cal.components[tz_idx].observances.push(obs);
        Ok(())
    }

    /// Consume a component the server does not recognise, preserving
    /// its lines as opaque nodes without interpretation.
    fn skip_opaque(&mut self, comp_name: &str) -> Result<(), ParseError> {
        let mut depth = 1usize;
        while !self.lines.is_empty() {
            let (name, _, value) = self.read_line()?;
            if name.eq_ignore_ascii_case("BEGIN") && value.eq_ignore_ascii_case(comp_name) {
                depth += 1;
            } else if name.eq_ignore_ascii_case("END") && value.eq_ignore_ascii_case(comp_name) {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
        }
        Err(self.err(format!("unterminated \"{comp_name}\"")))
    }

    fn nonempty(&self, value: &str) -> Result<String, ParseError> {
        if value.is_empty() {
            return Err(self.err("zero-length string"));
        }
        Ok(value.to_string())
    }

    fn utc(&self, value: &str) -> Result<NaiveDateTime, ParseError> {
        parse_utc_datetime(value).map_err(|m| self.err(m))
    }

    /// Parse a DTSTART/DTEND value together with its parameters,
    /// picking up a TZID and checking VALUE= agreement.
    fn tz_datetime(&self, value: &str, params: Option<&str>) -> Result<Time, ParseError> {
        let (kind, stamp) = parse_datetime(value).map_err(|m| self.err(m))?;
        let mut time = Time {
            kind,
            stamp,
            tzid: None,
        };

        let Some(params) = params else {
            return Ok(time);
        };

        for param in params.split(';') {
            if param.is_empty() {
                continue;
            }
            if param.eq_ignore_ascii_case("VALUE=DATE-TIME") {
                if kind == TimeKind::Date {
                    return Err(self.err("expected date-time but found date"));
                }
                continue;
            }
            if param.eq_ignore_ascii_case("VALUE=DATE") {
                if kind != TimeKind::Date {
                    return Err(self.err("expected date but found date-time"));
                }
                continue;
            }

            // Unrecognised parameters pass through (RFC allows them).
            let Some(tzid) = param
                .get(..5)
                .filter(|p| p.eq_ignore_ascii_case("TZID="))
                .map(|_| &param[5..])
            else {
                continue;
            };
            if tzid.is_empty() {
                continue;
            }
            if kind == TimeKind::Utc {
                return Err(self.err("TZID is incompatible with UTC designator in date-time"));
            }
            if time.tzid.is_some() {
                return Err(self.err("duplicate TZID"));
            }

            let tzid = tzid
                .strip_prefix('"')
                .and_then(|t| t.strip_suffix('"'))
                .unwrap_or(tzid);
            time.tzid = Some(tzid.to_string());
        }

        Ok(time)
    }

    /// RFC 5545 imposes no ordering, so a time may reference a timezone
    /// parsed after it. Check every TZID against the parsed VTIMEZONEs.
    fn resolve_timezones(&self) -> Result<(), ParseError> {
        let tzid_known = |tzid: &str| {
            self.cal.timezones().any(|tz| {
                tz.tzid
                    .as_deref()
                    .is_some_and(|t| t.eq_ignore_ascii_case(tzid))
            })
        };

        for comp in &self.cal.components {
            for time in [&comp.dtstart, &comp.dtend].into_iter().flatten() {
                if let Some(tzid) = &time.tzid {
                    if !tzid_known(tzid) {
                        return Err(ParseError::new(
                            self.file,
                            0,
                            format!("timezone \"{tzid}\" not found"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
