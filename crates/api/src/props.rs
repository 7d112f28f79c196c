//! Property registry
//!
//! One table maps every DAV/CalDAV property this server understands to
//! its XML name, namespace, optional value validator, and up to three
//! serializers keyed by the scope of the PROPFIND target. A property
//! with no serializer for a scope lands in that response's 404
//! propstat.

use std::io;

use kalends_core::models::{Collection, ProxyBits, Resource};
use kalends_core::validation;
use kalends_ical::CompKind;

use crate::routes::DavState;
use crate::xml::writer::{self as xml, NS_APPLE, NS_CALDAV, NS_CALSERV, NS_DAV, XmlWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prop {
    CalendarColor,
    CalendarData,
    CalendarDescription,
    CalendarHomeSet,
    MinDateTime,
    CalendarProxyReadFor,
    CalendarProxyWriteFor,
    CalendarTimezone,
    CalendarUserAddressSet,
    CurrentUserPrincipal,
    CurrentUserPrivilegeSet,
    Displayname,
    GetContentType,
    GetCtag,
    GetEtag,
    GroupMemberSet,
    GroupMembership,
    Owner,
    PrincipalUrl,
    QuotaAvailableBytes,
    QuotaUsedBytes,
    ResourceType,
    ScheduleCalendarTransp,
    SupportedCalendarComponentSet,
    SupportedCalendarData,
}

pub type PrincipalFn = fn(&mut XmlWriter, &DavState) -> io::Result<()>;
pub type CollectionFn = fn(&mut XmlWriter, &DavState, &Collection) -> io::Result<()>;
pub type ResourceFn = fn(&mut XmlWriter, &DavState, &Collection, &Resource) -> io::Result<()>;

pub struct PropSpec {
    pub tag: Prop,
    pub name: &'static str,
    pub ns: &'static str,
    pub validate: Option<fn(&str) -> bool>,
    pub principal: Option<PrincipalFn>,
    pub collection: Option<CollectionFn>,
    pub resource: Option<ResourceFn>,
}

impl Prop {
    pub fn from_xml(ns: &str, local: &str) -> Option<Prop> {
        PROPS
            .iter()
            .find(|s| s.ns == ns && s.name == local)
            .map(|s| s.tag)
    }

    pub fn spec(self) -> &'static PropSpec {
        // The table carries every variant; the search cannot miss.
        PROPS
            .iter()
            .find(|s| s.tag == self)
            .unwrap_or(&PROPS[0])
    }
}

/// `/name/` under the server root.
fn principal_href(name: &str) -> String {
    format!("/{name}/")
}

fn requested_principal_href(w: &mut XmlWriter, state: &DavState) -> io::Result<()> {
    xml::href(w, &principal_href(&state.rprncpl.name))
}

/// RFC 4791, 6.2.1.
fn principal_calendar_home_set(w: &mut XmlWriter, state: &DavState) -> io::Result<()> {
    requested_principal_href(w, state)
}

fn collection_calendar_home_set(
    w: &mut XmlWriter,
    state: &DavState,
    _c: &Collection,
) -> io::Result<()> {
    principal_calendar_home_set(w, state)
}

fn resource_calendar_home_set(
    w: &mut XmlWriter,
    state: &DavState,
    _c: &Collection,
    _r: &Resource,
) -> io::Result<()> {
    principal_calendar_home_set(w, state)
}

/// caldav-proxy, 5.3.1: the principals this one may read for.
fn principal_proxy_read_for(w: &mut XmlWriter, state: &DavState) -> io::Result<()> {
    for grant in &state.rprncpl.grantors {
        if grant.bits == ProxyBits::Read {
            xml::href(w, &principal_href(&grant.name))?;
        }
    }
    Ok(())
}

/// caldav-proxy, 5.3.2.
fn principal_proxy_write_for(w: &mut XmlWriter, state: &DavState) -> io::Result<()> {
    for grant in &state.rprncpl.grantors {
        if grant.bits == ProxyBits::Write {
            xml::href(w, &principal_href(&grant.name))?;
        }
    }
    Ok(())
}

/// RFC 6638, 2.4.1.
fn principal_user_address_set(w: &mut XmlWriter, state: &DavState) -> io::Result<()> {
    xml::text_tag(
        w,
        "D:href",
        &format!("mailto:{}", state.rprncpl.email),
    )
}

fn collection_user_address_set(
    w: &mut XmlWriter,
    state: &DavState,
    _c: &Collection,
) -> io::Result<()> {
    principal_user_address_set(w, state)
}

fn resource_user_address_set(
    w: &mut XmlWriter,
    state: &DavState,
    _c: &Collection,
    _r: &Resource,
) -> io::Result<()> {
    principal_user_address_set(w, state)
}

/// RFC 5397, 3. This names the authenticated principal, not the one
/// whose tree is being read.
fn principal_current_user_principal(w: &mut XmlWriter, state: &DavState) -> io::Result<()> {
    xml::href(w, &principal_href(&state.prncpl.name))
}

fn collection_current_user_principal(
    w: &mut XmlWriter,
    state: &DavState,
    _c: &Collection,
) -> io::Result<()> {
    principal_current_user_principal(w, state)
}

fn resource_current_user_principal(
    w: &mut XmlWriter,
    state: &DavState,
    _c: &Collection,
    _r: &Resource,
) -> io::Result<()> {
    principal_current_user_principal(w, state)
}

fn privilege(w: &mut XmlWriter, name: &str) -> io::Result<()> {
    xml::start(w, "D:privilege")?;
    xml::empty(w, name)?;
    xml::end(w, "D:privilege")
}

/// RFC 3744, 5.4. Owners and WRITE proxies get the full set; READ
/// proxies see read only.
fn collection_privilege_set(w: &mut XmlWriter, state: &DavState, _c: &Collection) -> io::Result<()> {
    privilege(w, "D:read-current-user-privilege-set")?;
    if state.is_owner() || state.proxy == Some(ProxyBits::Write) {
        privilege(w, "D:read")?;
        privilege(w, "D:write")?;
        privilege(w, "D:bind")?;
        privilege(w, "D:unbind")?;
    } else if state.proxy == Some(ProxyBits::Read) {
        privilege(w, "D:read")?;
    }
    Ok(())
}

fn resource_privilege_set(
    w: &mut XmlWriter,
    state: &DavState,
    c: &Collection,
    _r: &Resource,
) -> io::Result<()> {
    collection_privilege_set(w, state, c)
}

fn collection_displayname(w: &mut XmlWriter, _s: &DavState, c: &Collection) -> io::Result<()> {
    xml::text(w, &c.displayname)
}

fn collection_colour(w: &mut XmlWriter, _s: &DavState, c: &Collection) -> io::Result<()> {
    xml::text(w, &c.colour)
}

fn collection_description(w: &mut XmlWriter, _s: &DavState, c: &Collection) -> io::Result<()> {
    xml::text(w, &c.description)
}

/// caldav-ctag-02, 4.1.
fn collection_getctag(w: &mut XmlWriter, _s: &DavState, c: &Collection) -> io::Result<()> {
    xml::text(w, &c.ctag.to_string())
}

/// RFC 4918, 15.6.
fn resource_getetag(
    w: &mut XmlWriter,
    _s: &DavState,
    _c: &Collection,
    r: &Resource,
) -> io::Result<()> {
    xml::text(w, &r.etag)
}

/// RFC 4918, 15.5. The RFC is silent for non-files; a directory MIME
/// type is the common answer.
fn principal_contenttype(w: &mut XmlWriter, _s: &DavState) -> io::Result<()> {
    xml::text(w, "httpd/unix-directory")
}

fn collection_contenttype(w: &mut XmlWriter, _s: &DavState, _c: &Collection) -> io::Result<()> {
    xml::text(w, "httpd/unix-directory")
}

fn resource_contenttype(
    w: &mut XmlWriter,
    _s: &DavState,
    _c: &Collection,
    _r: &Resource,
) -> io::Result<()> {
    xml::text(w, "text/calendar")
}

/// RFC 3744, 4.4, and caldav-proxy, 5.2: membership in the proxy
/// pseudo-groups of the principals that delegated to this one.
fn principal_group_membership(w: &mut XmlWriter, state: &DavState) -> io::Result<()> {
    for grant in &state.rprncpl.grantors {
        let seg = match grant.bits {
            ProxyBits::Read => "calendar-proxy-read",
            ProxyBits::Write => "calendar-proxy-write",
        };
        xml::href(w, &format!("/{}/{seg}/", grant.name))?;
    }
    Ok(())
}

/// RFC 4918, 14.17.
fn collection_owner(w: &mut XmlWriter, state: &DavState, _c: &Collection) -> io::Result<()> {
    requested_principal_href(w, state)
}

fn resource_owner(
    w: &mut XmlWriter,
    state: &DavState,
    _c: &Collection,
    _r: &Resource,
) -> io::Result<()> {
    requested_principal_href(w, state)
}

/// RFC 3744, 4.2.
fn principal_principal_url(w: &mut XmlWriter, state: &DavState) -> io::Result<()> {
    requested_principal_href(w, state)
}

fn collection_principal_url(w: &mut XmlWriter, state: &DavState, _c: &Collection) -> io::Result<()> {
    requested_principal_href(w, state)
}

fn resource_principal_url(
    w: &mut XmlWriter,
    state: &DavState,
    _c: &Collection,
    _r: &Resource,
) -> io::Result<()> {
    requested_principal_href(w, state)
}

/// RFC 4331, 3 and 4.
fn collection_quota_available(w: &mut XmlWriter, state: &DavState, _c: &Collection) -> io::Result<()> {
    xml::text(w, &state.rprncpl.quota_available.to_string())
}

fn resource_quota_available(
    w: &mut XmlWriter,
    state: &DavState,
    c: &Collection,
    _r: &Resource,
) -> io::Result<()> {
    collection_quota_available(w, state, c)
}

fn collection_quota_used(w: &mut XmlWriter, state: &DavState, _c: &Collection) -> io::Result<()> {
    xml::text(w, &state.rprncpl.quota_used.to_string())
}

fn resource_quota_used(
    w: &mut XmlWriter,
    state: &DavState,
    c: &Collection,
    _r: &Resource,
) -> io::Result<()> {
    collection_quota_used(w, state, c)
}

/// RFC 4918, 15.9, plus RFC 3744, 4.
fn principal_resourcetype(w: &mut XmlWriter, _s: &DavState) -> io::Result<()> {
    xml::empty(w, "D:principal")?;
    xml::empty(w, "D:collection")
}

fn collection_resourcetype(w: &mut XmlWriter, _s: &DavState, _c: &Collection) -> io::Result<()> {
    xml::empty(w, "D:collection")?;
    xml::empty(w, "C:calendar")
}

fn resource_resourcetype(
    _w: &mut XmlWriter,
    _s: &DavState,
    _c: &Collection,
    _r: &Resource,
) -> io::Result<()> {
    // Empty on purpose: the RFC default for plain resources.
    Ok(())
}

/// RFC 6638, 9.1. iOS insists on seeing this even though OPAQUE is the
/// documented default.
fn collection_schedule_transp(w: &mut XmlWriter, _s: &DavState, _c: &Collection) -> io::Result<()> {
    xml::empty(w, "C:opaque")
}

/// RFC 4791, 5.2.3.
fn collection_component_set(w: &mut XmlWriter, _s: &DavState, _c: &Collection) -> io::Result<()> {
    for kind in CompKind::ALL {
        let mut comp = quick_xml::events::BytesStart::new("C:comp");
        comp.push_attribute(("name", kind.name()));
        w.write_event(quick_xml::events::Event::Empty(comp))?;
    }
    Ok(())
}

/// RFC 4791, 5.2.4.
fn collection_supported_data(w: &mut XmlWriter, _s: &DavState, _c: &Collection) -> io::Result<()> {
    let mut el = quick_xml::events::BytesStart::new("C:calendar-data");
    el.push_attribute(("content-type", "text/calendar"));
    el.push_attribute(("version", "2.0"));
    w.write_event(quick_xml::events::Event::Empty(el))
}

/// RFC 4791, 5.2.2. All free-floating time is declared UTC.
fn collection_calendar_timezone(w: &mut XmlWriter, _s: &DavState, _c: &Collection) -> io::Result<()> {
    xml::text(
        w,
        "BEGIN:VCALENDAR\r\n\
         PRODID:-//kalends//calendar server//EN\r\n\
         VERSION:2.0\r\n\
         BEGIN:VTIMEZONE\r\n\
         TZID:GMT\r\n\
         BEGIN:STANDARD\r\n\
         DTSTART:19700101T000000\r\n\
         TZOFFSETTO:+0000\r\n\
         TZOFFSETFROM:+0000\r\n\
         END:STANDARD\r\n\
         END:VTIMEZONE\r\n\
         END:VCALENDAR\r\n",
    )
}

/// RFC 4791, 5.2.6.
fn collection_min_date_time(w: &mut XmlWriter, _s: &DavState, _c: &Collection) -> io::Result<()> {
    xml::text(w, "19700101T000000Z")
}

/// RFC 4791, 9.6: the iCalendar blob through the folding printer.
fn resource_calendar_data(
    w: &mut XmlWriter,
    _s: &DavState,
    _c: &Collection,
    r: &Resource,
) -> io::Result<()> {
    let printed = r.ical.to_bytes();
    xml::text(w, &String::from_utf8_lossy(&printed))
}

pub static PROPS: &[PropSpec] = &[
    PropSpec {
        tag: Prop::CalendarColor,
        name: "calendar-color",
        ns: NS_APPLE,
        validate: Some(validation::valid_colour),
        principal: None,
        collection: Some(collection_colour),
        resource: None,
    },
    PropSpec {
        tag: Prop::CalendarData,
        name: "calendar-data",
        ns: NS_CALDAV,
        validate: None,
        principal: None,
        collection: None,
        resource: Some(resource_calendar_data),
    },
    PropSpec {
        tag: Prop::CalendarDescription,
        name: "calendar-description",
        ns: NS_CALDAV,
        validate: None,
        principal: None,
        collection: Some(collection_description),
        resource: None,
    },
    PropSpec {
        tag: Prop::CalendarHomeSet,
        name: "calendar-home-set",
        ns: NS_CALDAV,
        validate: None,
        principal: Some(principal_calendar_home_set),
        collection: Some(collection_calendar_home_set),
        resource: Some(resource_calendar_home_set),
    },
    PropSpec {
        tag: Prop::MinDateTime,
        name: "min-date-time",
        ns: NS_CALDAV,
        validate: None,
        principal: None,
        collection: Some(collection_min_date_time),
        resource: None,
    },
    PropSpec {
        tag: Prop::CalendarProxyReadFor,
        name: "calendar-proxy-read-for",
        ns: NS_CALSERV,
        validate: None,
        principal: Some(principal_proxy_read_for),
        collection: None,
        resource: None,
    },
    PropSpec {
        tag: Prop::CalendarProxyWriteFor,
        name: "calendar-proxy-write-for",
        ns: NS_CALSERV,
        validate: None,
        principal: Some(principal_proxy_write_for),
        collection: None,
        resource: None,
    },
    PropSpec {
        tag: Prop::CalendarTimezone,
        name: "calendar-timezone",
        ns: NS_CALDAV,
        validate: None,
        principal: None,
        collection: Some(collection_calendar_timezone),
        resource: None,
    },
    PropSpec {
        tag: Prop::CalendarUserAddressSet,
        name: "calendar-user-address-set",
        ns: NS_CALDAV,
        validate: None,
        principal: Some(principal_user_address_set),
        collection: Some(collection_user_address_set),
        resource: Some(resource_user_address_set),
    },
    PropSpec {
        tag: Prop::CurrentUserPrincipal,
        name: "current-user-principal",
        ns: NS_DAV,
        validate: None,
        principal: Some(principal_current_user_principal),
        collection: Some(collection_current_user_principal),
        resource: Some(resource_current_user_principal),
    },
    PropSpec {
        tag: Prop::CurrentUserPrivilegeSet,
        name: "current-user-privilege-set",
        ns: NS_DAV,
        validate: None,
        principal: None,
        collection: Some(collection_privilege_set),
        resource: Some(resource_privilege_set),
    },
    PropSpec {
        tag: Prop::Displayname,
        name: "displayname",
        ns: NS_DAV,
        validate: None,
        principal: None,
        collection: Some(collection_displayname),
        resource: None,
    },
    PropSpec {
        tag: Prop::GetContentType,
        name: "getcontenttype",
        ns: NS_DAV,
        validate: None,
        principal: Some(principal_contenttype),
        collection: Some(collection_contenttype),
        resource: Some(resource_contenttype),
    },
    PropSpec {
        tag: Prop::GetCtag,
        name: "getctag",
        ns: NS_CALSERV,
        validate: None,
        principal: None,
        collection: Some(collection_getctag),
        resource: None,
    },
    PropSpec {
        tag: Prop::GetEtag,
        name: "getetag",
        ns: NS_DAV,
        validate: None,
        principal: None,
        collection: None,
        resource: Some(resource_getetag),
    },
    PropSpec {
        tag: Prop::GroupMemberSet,
        name: "group-member-set",
        ns: NS_DAV,
        validate: None,
        principal: None,
        collection: None,
        resource: None,
    },
    PropSpec {
        tag: Prop::GroupMembership,
        name: "group-membership",
        ns: NS_DAV,
        validate: None,
        principal: Some(principal_group_membership),
        collection: None,
        resource: None,
    },
    PropSpec {
        tag: Prop::Owner,
        name: "owner",
        ns: NS_DAV,
        validate: None,
        principal: None,
        collection: Some(collection_owner),
        resource: Some(resource_owner),
    },
    PropSpec {
        tag: Prop::PrincipalUrl,
        name: "principal-URL",
        ns: NS_DAV,
        validate: None,
        principal: Some(principal_principal_url),
        collection: Some(collection_principal_url),
        resource: Some(resource_principal_url),
    },
    PropSpec {
        tag: Prop::QuotaAvailableBytes,
        name: "quota-available-bytes",
        ns: NS_DAV,
        validate: None,
        principal: None,
        collection: Some(collection_quota_available),
        resource: Some(resource_quota_available),
    },
    PropSpec {
        tag: Prop::QuotaUsedBytes,
        name: "quota-used-bytes",
        ns: NS_DAV,
        validate: None,
        principal: None,
        collection: Some(collection_quota_used),
        resource: Some(resource_quota_used),
    },
    PropSpec {
        tag: Prop::ResourceType,
        name: "resourcetype",
        ns: NS_DAV,
        validate: None,
        principal: Some(principal_resourcetype),
        collection: Some(collection_resourcetype),
        resource: Some(resource_resourcetype),
    },
    PropSpec {
        tag: Prop::ScheduleCalendarTransp,
        name: "schedule-calendar-transp",
        ns: NS_CALDAV,
        validate: None,
        principal: None,
        collection: Some(collection_schedule_transp),
        resource: None,
    },
    PropSpec {
        tag: Prop::SupportedCalendarComponentSet,
        name: "supported-calendar-component-set",
        ns: NS_CALDAV,
        validate: None,
        principal: None,
        collection: Some(collection_component_set),
        resource: None,
    },
    PropSpec {
        tag: Prop::SupportedCalendarData,
        name: "supported-calendar-data",
        ns: NS_CALDAV,
        validate: None,
        principal: None,
        collection: Some(collection_supported_data),
        resource: None,
    },
];
