//! Term grammar: classify one directive of an SPF record and extract its fields.
//!
//! Classification only looks at the qualifier and keyword. Field extraction
//! is strict, so a term whose keyword is known but whose fields are
//! malformed is a format error rather than an unrecognized term.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::common::cidr::Cidr;

use super::mechanism::{DualCidr, Qualifier};
use super::SpfError;

static FAMILY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[+\-~?]?(a|mx|include|ip4|ip6|all)(?:[:/].*)?$").expect("valid family regex")
});

static HOST_TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([+\-~?])?(a|mx)(?::([a-z0-9._-]+))?(?:/([1-9][0-9]{0,2}))?(?:/([1-9][0-9]{0,2}))?$")
        .expect("valid a/mx regex")
});

static INCLUDE_TERM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([+\-~?])?include:([a-z0-9._-]+)$").expect("valid include regex"));

static IP_TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([+\-~?])?ip([46]):([0-9a-f.:]+)(?:/([1-9][0-9]{0,2}))?$").expect("valid ip regex")
});

static ALL_TERM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([+\-~?])?all$").expect("valid all regex"));

/// Keyword family of a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    A,
    Mx,
    Include,
    /// `ip4` and `ip6`
    Ip,
    All,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::A => "a",
            Family::Mx => "mx",
            Family::Include => "include",
            Family::Ip => "ip",
            Family::All => "all",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields of an `a` or `mx` term. Absent prefixes are already defaulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTerm<'a> {
    pub qualifier: Qualifier,
    pub family: Family,
    pub domain: Option<&'a str>,
    pub cidr: DualCidr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeTerm<'a> {
    pub qualifier: Qualifier,
    pub domain: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpTerm {
    pub qualifier: Qualifier,
    pub network: Cidr,
}

/// Returns the keyword family of `term`, or `None` when no family recognizes it.
pub fn classify(term: &str) -> Option<Family> {
    let caps = FAMILY.captures(term)?;
    let family = match caps[1].to_ascii_lowercase().as_str() {
        "a" => Family::A,
        "mx" => Family::Mx,
        "include" => Family::Include,
        "ip4" | "ip6" => Family::Ip,
        "all" => Family::All,
        _ => return None,
    };
    Some(family)
}

/// Check that `term` belongs to `expected` before extracting its fields.
pub fn expect_family(term: &str, expected: Family) -> Result<(), SpfError> {
    match classify(term) {
        Some(found) if found == expected => Ok(()),
        Some(found) => Err(SpfError::WrongMechanism {
            expected: expected.as_str(),
            found: found.as_str().to_string(),
        }),
        None => Err(SpfError::Format(format!("{term:?} is not an {expected} mechanism"))),
    }
}

/// Parse `[q]a[:domain][/v4][/v6]` or the same shape with `mx`.
pub fn parse_host(term: &str) -> Result<HostTerm<'_>, SpfError> {
    let caps = HOST_TERM
        .captures(term)
        .ok_or_else(|| SpfError::Format(format!("got {term:?}")))?;
    let family = if caps[2].eq_ignore_ascii_case("a") {
        Family::A
    } else {
        Family::Mx
    };
    let cidr = DualCidr {
        v4: parse_prefix(term, &caps, 4, 32)?,
        v6: parse_prefix(term, &caps, 5, 128)?,
    };
    Ok(HostTerm {
        qualifier: qualifier(&caps),
        family,
        domain: caps.get(3).map(|m| m.as_str()),
        cidr,
    })
}

/// Parse `[q]include:domain`.
pub fn parse_include(term: &str) -> Result<IncludeTerm<'_>, SpfError> {
    let caps = INCLUDE_TERM
        .captures(term)
        .ok_or_else(|| SpfError::Format(format!("got {term:?}")))?;
    let domain = caps.get(2).map_or("", |m| m.as_str());
    Ok(IncludeTerm {
        qualifier: qualifier(&caps),
        domain,
    })
}

/// Parse `[q]ip4:addr[/n]` or `[q]ip6:addr[/n]` into a single range.
pub fn parse_ip(term: &str) -> Result<IpTerm, SpfError> {
    let caps = IP_TERM
        .captures(term)
        .ok_or_else(|| SpfError::Format(format!("got {term:?}")))?;
    let literal = &caps[3];
    let (addr, max) = if &caps[2] == "4" {
        let addr: Ipv4Addr = literal
            .parse()
            .map_err(|_| SpfError::Format(format!("invalid IPv4 address {literal:?} in {term:?}")))?;
        (IpAddr::V4(addr), 32)
    } else {
        let addr: Ipv6Addr = literal
            .parse()
            .map_err(|_| SpfError::Format(format!("invalid IPv6 address {literal:?} in {term:?}")))?;
        (IpAddr::V6(addr), 128)
    };
    let prefix = parse_prefix(term, &caps, 4, max)?;
    Ok(IpTerm {
        qualifier: qualifier(&caps),
        network: Cidr::new(addr, prefix)?,
    })
}

/// Parse `[q]all`.
pub fn parse_all(term: &str) -> Result<Qualifier, SpfError> {
    let caps = ALL_TERM
        .captures(term)
        .ok_or_else(|| SpfError::Format(format!("{term:?} is not an all mechanism")))?;
    Ok(qualifier(&caps))
}

fn qualifier(caps: &Captures<'_>) -> Qualifier {
    Qualifier::decode(caps.get(1).map(|m| m.as_str()))
}

/// Prefix in capture group `group`, or `max` (the family default) when absent.
fn parse_prefix(term: &str, caps: &Captures<'_>, group: usize, max: u8) -> Result<u8, SpfError> {
    let Some(digits) = caps.get(group) else {
        return Ok(max);
    };
    match digits.as_str().parse::<u8>() {
        Ok(prefix) if (1..=max).contains(&prefix) => Ok(prefix),
        _ => Err(SpfError::Format(format!(
            "prefix /{} out of range 1-{max} in {term:?}",
            digits.as_str()
        ))),
    }
}
