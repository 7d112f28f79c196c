//! Typed iCalendar values
//!
//! Value-level parsers return a bare message on failure; the component
//! parser attaches the source location.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// The iCalendar component kinds this server recognises (RFC 5545, 3.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompKind {
    Vcalendar,
    Vevent,
    Vtodo,
    Vjournal,
    Vfreebusy,
    Vtimezone,
    Valarm,
}

impl CompKind {
    pub const ALL: [CompKind; 7] = [
        CompKind::Vcalendar,
        CompKind::Vevent,
        CompKind::Vtodo,
        CompKind::Vjournal,
        CompKind::Vfreebusy,
        CompKind::Vtimezone,
        CompKind::Valarm,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CompKind::Vcalendar => "VCALENDAR",
            CompKind::Vevent => "VEVENT",
            CompKind::Vtodo => "VTODO",
            CompKind::Vjournal => "VJOURNAL",
            CompKind::Vfreebusy => "VFREEBUSY",
            CompKind::Vtimezone => "VTIMEZONE",
            CompKind::Valarm => "VALARM",
        }
    }

    pub fn from_name(name: &str) -> Option<CompKind> {
        CompKind::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name))
    }
}

/// The three lexical shapes a DATE/DATE-TIME value may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeKind {
    /// `YYYYMMDD`
    Date,
    /// `YYYYMMDDThhmmss`
    Local,
    /// `YYYYMMDDThhmmssZ`
    Utc,
}

/// A DTSTART/DTEND value with its lexical shape and optional TZID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Time {
    pub kind: TimeKind,
    /// Midnight for the date-only shape.
    pub stamp: NaiveDateTime,
    /// Only permitted with the local shape.
    pub tzid: Option<String>,
}

fn fixed_u32(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_ymd(s: &str) -> Option<NaiveDate> {
    let y = fixed_u32(&s[0..4])?;
    let m = fixed_u32(&s[4..6])?;
    let d = fixed_u32(&s[6..8])?;
    NaiveDate::from_ymd_opt(y as i32, m, d)
}

fn parse_hms(s: &str) -> Option<NaiveTime> {
    let h = fixed_u32(&s[0..2])?;
    let m = fixed_u32(&s[2..4])?;
    let sec = fixed_u32(&s[4..6])?;
    NaiveTime::from_hms_opt(h, m, sec)
}

/// Parse one of the three permitted date/date-time shapes, keyed by
/// length: 8 (date), 15 (local), 16 (UTC).
pub(crate) fn parse_datetime(s: &str) -> Result<(TimeKind, NaiveDateTime), String> {
    let bad = || "bad date/date-time".to_string();
    match s.len() {
        8 => {
            let d = parse_ymd(s).ok_or_else(bad)?;
            Ok((TimeKind::Date, d.and_time(NaiveTime::MIN)))
        }
        15 => {
            if s.as_bytes()[8] != b'T' {
                return Err(bad());
            }
            let d = parse_ymd(&s[0..8]).ok_or_else(bad)?;
            let t = parse_hms(&s[9..15]).ok_or_else(bad)?;
            Ok((TimeKind::Local, d.and_time(t)))
        }
        16 => {
            if s.as_bytes()[8] != b'T' || s.as_bytes()[15] != b'Z' {
                return Err(bad());
            }
            let d = parse_ymd(&s[0..8]).ok_or_else(bad)?;
            let t = parse_hms(&s[9..15]).ok_or_else(bad)?;
            Ok((TimeKind::Utc, d.and_time(t)))
        }
        _ => Err(bad()),
    }
}

/// Parse a value that must be the UTC date-time shape.
pub(crate) fn parse_utc_datetime(s: &str) -> Result<NaiveDateTime, String> {
    match parse_datetime(s)? {
        (TimeKind::Utc, stamp) => Ok(stamp),
        _ => Err("bad UTC date-time".to_string()),
    }
}

/// Parse a value that must be the local date-time shape.
pub(crate) fn parse_local_datetime(s: &str) -> Result<NaiveDateTime, String> {
    match parse_datetime(s)? {
        (TimeKind::Local, stamp) => Ok(stamp),
        _ => Err("bad local date-time".to_string()),
    }
}

/// A signed RFC 5545 duration (3.3.6), kept in its written units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Duration {
    pub negative: bool,
    pub weeks: u64,
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl Duration {
    pub(crate) fn parse(s: &str) -> Result<Duration, String> {
        let mut rest = s;
        let mut dur = Duration::default();

        if let Some(r) = rest.strip_prefix('-') {
            dur.negative = true;
            rest = r;
        } else if let Some(r) = rest.strip_prefix('+') {
            rest = r;
        }

        rest = rest.strip_prefix('P').ok_or("bad duration")?;
        if rest.is_empty() {
            return Err("empty duration".to_string());
        }

        let mut units = 0usize;
        let mut bytes = rest.as_bytes();
        while !bytes.is_empty() {
            if bytes[0] == b'T' {
                bytes = &bytes[1..];
                if bytes.is_empty() {
                    return Err("bad duration".to_string());
                }
                continue;
            }
            let digits = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
            if digits == 0 || digits == bytes.len() {
                return Err("bad duration".to_string());
            }
            let value: u64 = std::str::from_utf8(&bytes[..digits])
                .ok()
                .and_then(|d| d.parse().ok())
                .ok_or("bad duration")?;
            match bytes[digits] {
                b'W' => dur.weeks = value,
                b'D' => dur.days = value,
                b'H' => dur.hours = value,
                b'M' => dur.minutes = value,
                b'S' => dur.seconds = value,
                _ => return Err("bad duration".to_string()),
            }
            units += 1;
            bytes = &bytes[digits + 1..];
        }

        if units == 0 {
            return Err("empty duration".to_string());
        }
        if dur.weeks == 0 && dur.days == 0 && dur.hours == 0 && dur.minutes == 0 && dur.seconds == 0
        {
            return Err("zero-length duration".to_string());
        }
        Ok(dur)
    }
}

/// A UTC offset in seconds, parsed from `±HHMM` or `±HHMMSS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UtcOffset(pub i32);

impl UtcOffset {
    pub(crate) fn parse(s: &str) -> Result<UtcOffset, String> {
        let b = s.as_bytes();
        if b.len() != 5 && b.len() != 7 {
            return Err("bad UTC-offset size".to_string());
        }
        let sign = match b[0] {
            b'+' => 1,
            b'-' => -1,
            _ => return Err("bad UTC-offset sign".to_string()),
        };
        if !b[1..].iter().all(|c| c.is_ascii_digit()) {
            return Err("non-digit UTC-offset character".to_string());
        }

        let hour = (b[1] - b'0') as i32 * 10 + (b[2] - b'0') as i32;
        if hour >= 24 {
            return Err(format!("bad hour: {hour}"));
        }
        let min = (b[3] - b'0') as i32 * 10 + (b[4] - b'0') as i32;
        if min >= 60 {
            return Err(format!("bad minute: {min}"));
        }
        let sec = if b.len() == 7 {
            let sec = (b[5] - b'0') as i32 * 10 + (b[6] - b'0') as i32;
            if sec >= 60 {
                return Err(format!("bad second: {sec}"));
            }
            sec
        } else {
            0
        };

        Ok(UtcOffset(sign * (hour * 3600 + min * 60 + sec)))
    }
}

/// Recurrence frequencies (RFC 5545, 3.3.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Secondly,
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    const ALL: [Frequency; 7] = [
        Frequency::Secondly,
        Frequency::Minutely,
        Frequency::Hourly,
        Frequency::Daily,
        Frequency::Weekly,
        Frequency::Monthly,
        Frequency::Yearly,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Frequency::Secondly => "SECONDLY",
            Frequency::Minutely => "MINUTELY",
            Frequency::Hourly => "HOURLY",
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
        }
    }

    fn from_name(s: &str) -> Option<Frequency> {
        Frequency::ALL.into_iter().find(|f| f.name() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    const ALL: [Weekday; 7] = [
        Weekday::Sunday,
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
    ];

    pub fn abbrev(self) -> &'static str {
        match self {
            Weekday::Sunday => "SU",
            Weekday::Monday => "MO",
            Weekday::Tuesday => "TU",
            Weekday::Wednesday => "WE",
            Weekday::Thursday => "TH",
            Weekday::Friday => "FR",
            Weekday::Saturday => "SA",
        }
    }

    fn from_abbrev(s: &str) -> Option<Weekday> {
        Weekday::ALL.into_iter().find(|d| d.abbrev() == s)
    }
}

/// A weekday with an optional signed ordinal, e.g. `-1SU` (RFC 5545
/// "weekdaynum").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekdayNum {
    /// Zero when no ordinal was written.
    pub ordinal: i32,
    pub weekday: Weekday,
}

impl WeekdayNum {
    fn parse(s: &str) -> Result<WeekdayNum, String> {
        let mut rest = s;
        let mut sign = 1i32;
        if let Some(r) = rest.strip_prefix('-') {
            sign = -1;
            rest = r;
        } else if let Some(r) = rest.strip_prefix('+') {
            rest = r;
        }

        let digits = rest
            .bytes()
            .take_while(|b| b.is_ascii_digit())
            .count()
            .min(2);
        let ordinal = if digits > 0 {
            let n: i32 = rest[..digits].parse().map_err(|_| "unknown weekday")?;
            rest = &rest[digits..];
            sign * n
        } else {
            0
        };
        if ordinal.abs() > 53 {
            return Err("weekday ordinal out of range".to_string());
        }

        let weekday = Weekday::from_abbrev(rest).ok_or("unknown weekday")?;
        Ok(WeekdayNum { ordinal, weekday })
    }
}

/// A parsed and range-validated RRULE (RFC 5545, 3.3.10, 3.8.5.3).
///
/// The server stores and round-trips rules; it never expands
/// occurrences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurRule {
    pub freq: Frequency,
    pub until: Option<(TimeKind, NaiveDateTime)>,
    pub count: Option<u64>,
    pub interval: Option<u64>,
    pub by_second: Vec<u8>,
    pub by_minute: Vec<u8>,
    pub by_hour: Vec<u8>,
    pub by_day: Vec<WeekdayNum>,
    pub by_month_day: Vec<i8>,
    pub by_month: Vec<u8>,
    pub by_year_day: Vec<i16>,
    pub by_week_no: Vec<i8>,
    pub by_set_pos: Vec<i16>,
    pub wkst: Option<Weekday>,
}

fn unsigned_list<T: TryFrom<u64>>(v: &str, min: u64, max: u64, key: &str) -> Result<Vec<T>, String> {
    let mut out = Vec::new();
    for tok in v.split(',') {
        let n: u64 = tok.parse().map_err(|_| format!("malformed \"{key}\""))?;
        if n < min || n > max {
            return Err(format!("malformed \"{key}\""));
        }
        out.push(T::try_from(n).map_err(|_| format!("malformed \"{key}\""))?);
    }
    Ok(out)
}

fn signed_list<T: TryFrom<i64>>(v: &str, max: i64, key: &str) -> Result<Vec<T>, String> {
    let mut out = Vec::new();
    for tok in v.split(',') {
        let n: i64 = tok.parse().map_err(|_| format!("malformed \"{key}\""))?;
        if n == 0 || n.abs() > max {
            return Err(format!("malformed \"{key}\""));
        }
        out.push(T::try_from(n).map_err(|_| format!("malformed \"{key}\""))?);
    }
    Ok(out)
}

impl RecurRule {
    /// Parse a `;`-separated KEY=VALUE set. `in_tz` marks a rule inside
    /// a STANDARD/DAYLIGHT observance, where UNTIL must be UTC
    /// (RFC 5545, p. 66).
    pub(crate) fn parse(s: &str, in_tz: bool) -> Result<RecurRule, String> {
        let mut freq = None;
        let mut rule = RecurRule {
            freq: Frequency::Daily,
            until: None,
            count: None,
            interval: None,
            by_second: Vec::new(),
            by_minute: Vec::new(),
            by_hour: Vec::new(),
            by_day: Vec::new(),
            by_month_day: Vec::new(),
            by_month: Vec::new(),
            by_year_day: Vec::new(),
            by_week_no: Vec::new(),
            by_set_pos: Vec::new(),
            wkst: None,
        };

        for pair in s.split(';') {
            let Some((key, v)) = pair.split_once('=') else {
                return Err("bad \"RRULE\" syntax".to_string());
            };
            match key {
                "FREQ" => {
                    freq = Some(
                        Frequency::from_name(v).ok_or_else(|| "malformed \"FREQ\"".to_string())?,
                    );
                }
                "UNTIL" => {
                    let (kind, stamp) =
                        parse_datetime(v).map_err(|_| "malformed \"UNTIL\"".to_string())?;
                    if in_tz && kind != TimeKind::Utc {
                        return Err("malformed \"UNTIL\"".to_string());
                    }
                    rule.until = Some((kind, stamp));
                }
                "COUNT" => {
                    rule.count = Some(v.parse().map_err(|_| "malformed \"COUNT\"".to_string())?);
                }
                "INTERVAL" => {
                    rule.interval =
                        Some(v.parse().map_err(|_| "malformed \"INTERVAL\"".to_string())?);
                }
                "BYSECOND" => rule.by_second = unsigned_list(v, 1, 59, "BYSECOND")?,
                "BYMINUTE" => rule.by_minute = unsigned_list(v, 0, 59, "BYMINUTE")?,
                "BYHOUR" => rule.by_hour = unsigned_list(v, 0, 23, "BYHOUR")?,
                "BYDAY" => {
                    rule.by_day = v
                        .split(',')
                        .map(WeekdayNum::parse)
                        .collect::<Result<_, _>>()
                        .map_err(|_| "malformed \"BYDAY\"".to_string())?;
                }
                "BYMONTHDAY" => rule.by_month_day = signed_list(v, 31, "BYMONTHDAY")?,
                "BYMONTH" => rule.by_month = unsigned_list(v, 1, 12, "BYMONTH")?,
                "BYYEARDAY" => rule.by_year_day = signed_list(v, 366, "BYYEARDAY")?,
                "BYWEEKNO" => rule.by_week_no = signed_list(v, 53, "BYWEEKNO")?,
                "BYSETPOS" => rule.by_set_pos = signed_list(v, 366, "BYSETPOS")?,
                "WKST" => {
                    rule.wkst = Some(
                        Weekday::from_abbrev(v).ok_or_else(|| "malformed \"WKST\"".to_string())?,
                    );
                }
                _ => return Err(format!("unknown \"RRULE\" property: {key}")),
            }
        }

        match freq {
            Some(freq) => {
                rule.freq = freq;
                Ok(rule)
            }
            None => Err("missing \"FREQ\"".to_string()),
        }
    }
}

/// STANDARD or DAYLIGHT sub-object of a VTIMEZONE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TzRuleKind {
    Daylight,
    Standard,
}

impl TzRuleKind {
    pub fn name(self) -> &'static str {
        match self {
            TzRuleKind::Daylight => "DAYLIGHT",
            TzRuleKind::Standard => "STANDARD",
        }
    }

    pub fn from_name(name: &str) -> Option<TzRuleKind> {
        [TzRuleKind::Daylight, TzRuleKind::Standard]
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name))
    }
}

/// One STANDARD/DAYLIGHT observance within a VTIMEZONE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TzObservance {
    pub kind: TzRuleKind,
    /// Must be the local shape when present (RFC 5545, p. 65).
    pub dtstart: Option<NaiveDateTime>,
    pub offset_from: Option<UtcOffset>,
    pub offset_to: Option<UtcOffset>,
    pub rrule: Option<RecurRule>,
}
