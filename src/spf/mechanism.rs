//! SPF directives: a qualifier, the verbatim term text and a resolved mechanism.
//!
//! `a` and `mx` resolve their network set when built, `include` fetches and
//! parses the target record when built. Matching never touches DNS.

use std::fmt;
use std::net::IpAddr;

use crate::common::cidr::Cidr;
use crate::common::dns::{DnsError, DnsResolver};
use crate::common::domain::normalize;

use super::parser::{self, Family};
use super::record::{Lineage, SpfRecord};
use super::{SpfError, SpfOptions};

/// Qualifier prefix on a directive. Defaults to Pass if omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qualifier {
    Pass,     // +
    Fail,     // -
    SoftFail, // ~
    Neutral,  // ?
}

impl Qualifier {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Qualifier::Pass),
            '-' => Some(Qualifier::Fail),
            '~' => Some(Qualifier::SoftFail),
            '?' => Some(Qualifier::Neutral),
            _ => None,
        }
    }

    /// Decode an optional one-character prefix. Absent or unknown means Pass.
    pub fn decode(prefix: Option<&str>) -> Self {
        prefix
            .and_then(|p| p.chars().next())
            .and_then(Self::from_char)
            .unwrap_or(Qualifier::Pass)
    }
}

/// A CIDR prefix length pair for A and MX mechanisms.
/// The parser fills in 32 and 128 when a term omits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DualCidr {
    pub v4: u8,
    pub v6: u8,
}

/// Resolved SPF mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mechanism {
    /// `a[:domain][/v4][/v6]`
    A {
        domain: String,
        cidr: DualCidr,
        networks: Vec<Cidr>,
    },
    /// `mx[:domain][/v4][/v6]`
    Mx {
        domain: String,
        cidr: DualCidr,
        networks: Vec<Cidr>,
    },
    /// `ip4:addr[/n]` or `ip6:addr[/n]`
    Ip { network: Cidr },
    /// `include:domain`, owning the parsed record of `domain`.
    Include { domain: String, record: Box<SpfRecord> },
    /// `all`
    All,
}

/// A directive = qualifier + mechanism, plus the term it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    qualifier: Qualifier,
    text: String,
    mechanism: Mechanism,
}

impl Directive {
    pub fn qualifier(&self) -> Qualifier {
        self.qualifier
    }

    /// The term exactly as it appeared in the record.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn mechanism(&self) -> &Mechanism {
        &self.mechanism
    }

    /// Build an `a` directive. Without an explicit domain, `domain` is used.
    pub async fn a<R: DnsResolver>(term: &str, domain: &str, resolver: &R) -> Result<Self, SpfError> {
        Self::host(term, Family::A, domain, resolver).await
    }

    /// Build an `mx` directive. Without an explicit domain, `domain` is used.
    pub async fn mx<R: DnsResolver>(term: &str, domain: &str, resolver: &R) -> Result<Self, SpfError> {
        Self::host(term, Family::Mx, domain, resolver).await
    }

    /// Build an `ip4`/`ip6` directive. No DNS involved.
    pub fn ip(term: &str) -> Result<Self, SpfError> {
        parser::expect_family(term, Family::Ip)?;
        let parsed = parser::parse_ip(term)?;
        Ok(Self {
            qualifier: parsed.qualifier,
            text: term.to_string(),
            mechanism: Mechanism::Ip {
                network: parsed.network,
            },
        })
    }

    /// Build an `all` directive.
    pub fn all(term: &str) -> Result<Self, SpfError> {
        parser::expect_family(term, Family::All)?;
        let qualifier = parser::parse_all(term)?;
        Ok(Self {
            qualifier,
            text: term.to_string(),
            mechanism: Mechanism::All,
        })
    }

    /// Build an `include` directive, fetching and parsing the target record.
    pub async fn include<R: DnsResolver>(
        term: &str,
        resolver: &R,
        options: &SpfOptions,
    ) -> Result<Self, SpfError> {
        let mut lineage = Lineage::new(options, None);
        Self::include_in(term, resolver, &mut lineage).await
    }

    pub(crate) async fn include_in<R: DnsResolver>(
        term: &str,
        resolver: &R,
        lineage: &mut Lineage<'_>,
    ) -> Result<Self, SpfError> {
        parser::expect_family(term, Family::Include)?;
        let parsed = parser::parse_include(term)?;
        let domain = normalize(parsed.domain);

        lineage.enter(&domain)?;
        let nested = Box::pin(SpfRecord::lookup_in(&domain, resolver, lineage)).await;
        lineage.leave();
        let record = Box::new(nested?);

        log::debug!("built {term:?} for {domain}");
        Ok(Self {
            qualifier: parsed.qualifier,
            text: term.to_string(),
            mechanism: Mechanism::Include { domain, record },
        })
    }

    pub(crate) async fn host<R: DnsResolver>(
        term: &str,
        expected: Family,
        domain: &str,
        resolver: &R,
    ) -> Result<Self, SpfError> {
        parser::expect_family(term, expected)?;
        let parsed = parser::parse_host(term)?;
        let domain = normalize(parsed.domain.unwrap_or(domain));

        let addrs = match parsed.family {
            Family::Mx => mx_addresses(&domain, resolver).await?,
            _ => resolver.query_ip(&domain).await.map_err(dns_error(&domain))?,
        };
        let networks = network_set(&addrs, parsed.cidr)?;
        log::debug!("built {term:?} for {domain} with {} networks", networks.len());

        let cidr = parsed.cidr;
        let mechanism = match parsed.family {
            Family::Mx => Mechanism::Mx { domain, cidr, networks },
            _ => Mechanism::A { domain, cidr, networks },
        };
        Ok(Self {
            qualifier: parsed.qualifier,
            text: term.to_string(),
            mechanism,
        })
    }

    /// Match trail for `ip`: empty when this directive does not match,
    /// otherwise this directive's text followed by any nested trail.
    pub fn matches(&self, ip: IpAddr) -> Result<Vec<String>, SpfError> {
        let matched = match &self.mechanism {
            Mechanism::A { networks, .. } | Mechanism::Mx { networks, .. } => {
                networks.iter().any(|network| network.contains(ip))
            }
            Mechanism::Ip { network } => network.contains(ip),
            Mechanism::All => true,
            Mechanism::Include { record, .. } => {
                let mut trail = record.evaluate(ip)?;
                if !trail.is_empty() {
                    trail.insert(0, self.text.clone());
                }
                return Ok(trail);
            }
        };
        Ok(if matched {
            vec![self.text.clone()]
        } else {
            Vec::new()
        })
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Addresses of every exchange host of `domain`, in MX answer order.
async fn mx_addresses<R: DnsResolver>(domain: &str, resolver: &R) -> Result<Vec<IpAddr>, SpfError> {
    let exchanges = resolver.query_mx(domain).await.map_err(dns_error(domain))?;
    let mut addrs = Vec::new();
    for (_, host) in exchanges {
        let host_addrs = resolver.query_ip(&host).await.map_err(dns_error(&host))?;
        addrs.extend(host_addrs);
    }
    Ok(addrs)
}

fn network_set(addrs: &[IpAddr], cidr: DualCidr) -> Result<Vec<Cidr>, SpfError> {
    addrs
        .iter()
        .map(|addr| {
            let addr = addr.to_canonical();
            let prefix = if addr.is_ipv4() { cidr.v4 } else { cidr.v6 };
            Cidr::new(addr, prefix).map_err(SpfError::from)
        })
        .collect()
}

pub(crate) fn dns_error(domain: &str) -> impl FnOnce(DnsError) -> SpfError + '_ {
    move |source| {
        log::warn!("DNS lookup for {domain} failed: {source}");
        SpfError::Dns {
            domain: domain.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::dns::MockResolver;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    // ---- Qualifier ----

    #[test]
    fn qualifier_decode() {
        assert_eq!(Qualifier::decode(Some("-")), Qualifier::Fail);
        assert_eq!(Qualifier::decode(Some("~")), Qualifier::SoftFail);
        assert_eq!(Qualifier::decode(Some("?")), Qualifier::Neutral);
        assert_eq!(Qualifier::decode(Some("+")), Qualifier::Pass);
        assert_eq!(Qualifier::decode(None), Qualifier::Pass);
    }

    #[tokio::test]
    async fn qualifier_on_built_directives() {
        let resolver = MockResolver::new();
        resolver.add_mx("test.com", vec![(10, "mx.test.com")]);

        assert_eq!(Directive::all("-all").unwrap().qualifier(), Qualifier::Fail);
        assert_eq!(Directive::all("all").unwrap().qualifier(), Qualifier::Pass);
        let a = Directive::a("~a", "test.com", &resolver).await.unwrap();
        assert_eq!(a.qualifier(), Qualifier::SoftFail);
        let mx = Directive::mx("?mx", "test.com", &resolver).await.unwrap();
        assert_eq!(mx.qualifier(), Qualifier::Neutral);
    }

    // ---- a ----

    #[tokio::test]
    async fn a_matches_resolved_networks() {
        // (term, resolved for test.com, candidate)
        let cases = [
            ("a", "10.0.0.1", "10.0.0.1"),
            ("a:test2.com", "10.0.0.1", "192.168.0.1"),
            ("a:test2.com/24", "10.0.0.1", "192.168.0.4"),
            ("a/16", "10.0.0.1", "10.0.0.9"),
            ("a/26", "10.0.0.1", "10.0.0.9"),
        ];
        for (term, resolved, candidate) in cases {
            let resolver = MockResolver::new();
            resolver.add_ip("test.com", vec![ip(resolved)]);
            resolver.add_ip("test2.com", vec![ip("192.168.0.1")]);

            let directive = Directive::a(term, "test.com", &resolver).await.unwrap();
            assert_eq!(directive.matches(ip(candidate)).unwrap(), vec![term.to_string()], "{term}");
        }
    }

    #[tokio::test]
    async fn a_with_prefix_does_not_match_outside() {
        let resolver = MockResolver::new();
        resolver.add_ip("test.com", vec![ip("10.0.0.1")]);

        let directive = Directive::a("a/24", "test.com", &resolver).await.unwrap();
        assert_eq!(directive.matches(ip("10.0.0.9")).unwrap(), vec!["a/24"]);
        assert!(directive.matches(ip("10.0.1.9")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_dual_prefix_applies_per_family() {
        let resolver = MockResolver::new();
        resolver.add_ip("test.com", vec![ip("10.0.0.1"), ip("2001:db8::1")]);

        let directive = Directive::a("a/24/64", "test.com", &resolver).await.unwrap();
        assert!(!directive.matches(ip("10.0.0.200")).unwrap().is_empty());
        assert!(directive.matches(ip("10.0.1.1")).unwrap().is_empty());
        assert!(!directive.matches(ip("2001:db8::ffff:1")).unwrap().is_empty());
        assert!(directive.matches(ip("2001:db8:0:1::1")).unwrap().is_empty());

        match directive.mechanism() {
            Mechanism::A { domain, cidr, networks } => {
                assert_eq!(domain, "test.com");
                assert_eq!(*cidr, DualCidr { v4: 24, v6: 64 });
                let rendered: Vec<String> = networks.iter().map(|n| n.to_string()).collect();
                assert_eq!(rendered, vec!["10.0.0.0/24", "2001:db8::/64"]);
            }
            other => panic!("unexpected mechanism {other:?}"),
        }
    }

    #[tokio::test]
    async fn a_default_prefix_is_host_route() {
        let resolver = MockResolver::new();
        resolver.add_ip("test.com", vec![ip("10.0.0.1"), ip("2001:db8::1")]);

        let directive = Directive::a("a", "test.com", &resolver).await.unwrap();
        assert!(directive.matches(ip("10.0.0.2")).unwrap().is_empty());
        assert!(directive.matches(ip("2001:db8::2")).unwrap().is_empty());
        assert!(!directive.matches(ip("2001:db8::1")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_dns_failure() {
        let resolver = MockResolver::new();
        resolver.set_error("test.com", DnsError::ServFail);

        let err = Directive::a("a", "test.com", &resolver).await.unwrap_err();
        assert_eq!(
            err,
            SpfError::Dns {
                domain: "test.com".into(),
                source: DnsError::ServFail,
            }
        );
    }

    #[tokio::test]
    async fn a_malformed_domain_is_format_error() {
        let resolver = MockResolver::new();
        let err = Directive::a("a:bad^domain", "test.com", &resolver).await.unwrap_err();
        assert!(matches!(err, SpfError::Format(_)));
        assert!(resolver.queries().is_empty());
    }

    #[tokio::test]
    async fn a_constructor_rejects_mx_term() {
        let resolver = MockResolver::new();
        let err = Directive::a("mx", "test.com", &resolver).await.unwrap_err();
        assert_eq!(
            err,
            SpfError::WrongMechanism {
                expected: "a",
                found: "mx".into(),
            }
        );
    }

    // ---- mx ----

    #[tokio::test]
    async fn mx_matches_exchange_addresses() {
        // (term, candidate)
        let cases = [
            ("mx", "10.0.0.1"),
            ("mx/24", "10.0.0.20"),
            ("mx:test2.com", "192.168.0.1"),
            ("mx:test2.com/16", "192.168.1.1"),
        ];
        for (term, candidate) in cases {
            let resolver = MockResolver::new();
            resolver.add_mx("test.com", vec![(10, "mx.test.com")]);
            resolver.add_mx("test2.com", vec![(10, "test.test2.com")]);
            resolver.add_ip("mx.test.com", vec![ip("10.0.0.1")]);
            resolver.add_ip("test.test2.com", vec![ip("192.168.0.1")]);

            let directive = Directive::mx(term, "test.com", &resolver).await.unwrap();
            assert_eq!(directive.matches(ip(candidate)).unwrap(), vec![term.to_string()], "{term}");
        }
    }

    #[tokio::test]
    async fn mx_dual_prefix_applies_per_family() {
        let resolver = MockResolver::new();
        resolver.add_mx("test.com", vec![(10, "mx.test.com")]);
        resolver.add_ip("mx.test.com", vec![ip("10.0.0.1"), ip("2001:db8::1")]);

        let directive = Directive::mx("mx/24/64", "test.com", &resolver).await.unwrap();
        assert_eq!(directive.matches(ip("10.0.0.200")).unwrap(), vec!["mx/24/64"]);
        assert!(directive.matches(ip("10.0.1.1")).unwrap().is_empty());
        assert_eq!(directive.matches(ip("2001:db8::ffff:1")).unwrap(), vec!["mx/24/64"]);
        assert!(directive.matches(ip("2001:db8:0:1::1")).unwrap().is_empty());

        match directive.mechanism() {
            Mechanism::Mx { cidr, networks, .. } => {
                assert_eq!(*cidr, DualCidr { v4: 24, v6: 64 });
                let rendered: Vec<String> = networks.iter().map(|n| n.to_string()).collect();
                assert_eq!(rendered, vec!["10.0.0.0/24", "2001:db8::/64"]);
            }
            other => panic!("unexpected mechanism {other:?}"),
        }
    }

    #[tokio::test]
    async fn mx_resolves_hosts_in_order() {
        let resolver = MockResolver::new();
        resolver.add_mx("test.com", vec![(20, "b.test.com"), (10, "a.test.com")]);

        Directive::mx("mx", "test.com", &resolver).await.unwrap();
        let hosts: Vec<String> = resolver.queries().into_iter().map(|(_, d)| d).collect();
        assert_eq!(hosts, vec!["test.com", "b.test.com", "a.test.com"]);
    }

    #[tokio::test]
    async fn mx_host_failure_fails_whole_mechanism() {
        let resolver = MockResolver::new();
        resolver.add_mx("test.com", vec![(10, "good.test.com"), (20, "bad.test.com")]);
        resolver.add_ip("good.test.com", vec![ip("10.0.0.1")]);
        resolver.set_error("bad.test.com", DnsError::Timeout);

        let err = Directive::mx("mx", "test.com", &resolver).await.unwrap_err();
        assert!(matches!(err, SpfError::Dns { ref domain, .. } if domain == "bad.test.com"));
    }

    #[tokio::test]
    async fn mx_without_records_never_matches() {
        let resolver = MockResolver::new();
        let directive = Directive::mx("mx", "test.com", &resolver).await.unwrap();
        assert!(directive.matches(ip("10.0.0.1")).unwrap().is_empty());
    }

    // ---- ip4 / ip6 ----

    #[test]
    fn ip_matches_literal_network() {
        let directive = Directive::ip("ip4:192.168.1.1/24").unwrap();
        assert_eq!(directive.matches(ip("192.168.1.15")).unwrap(), vec!["ip4:192.168.1.1/24"]);
        assert!(directive.matches(ip("192.168.2.1")).unwrap().is_empty());

        let directive = Directive::ip("ip6:2a00:1450:4000::/36").unwrap();
        assert!(!directive.matches(ip("2a00:1450:4000::1")).unwrap().is_empty());
        assert!(directive.matches(ip("2a00:1450:5000::1")).unwrap().is_empty());
    }

    #[test]
    fn ip_default_prefix_is_exact() {
        let directive = Directive::ip("ip4:192.168.1.1").unwrap();
        assert!(!directive.matches(ip("192.168.1.1")).unwrap().is_empty());
        assert!(directive.matches(ip("192.168.1.2")).unwrap().is_empty());
    }

    #[test]
    fn ip_family_mismatch_never_matches() {
        let directive = Directive::ip("ip4:0.0.0.0/1").unwrap();
        assert!(directive.matches(ip("::1")).unwrap().is_empty());
    }

    #[test]
    fn ip_constructor_rejects_other_terms() {
        assert!(matches!(
            Directive::ip("all"),
            Err(SpfError::WrongMechanism { expected: "ip", .. })
        ));
        assert!(matches!(Directive::ip("ip4:1.2.3.4/40"), Err(SpfError::Format(_))));
    }

    // ---- all ----

    #[test]
    fn all_always_matches() {
        let directive = Directive::all("-all").unwrap();
        assert_eq!(directive.matches(ip("1.2.3.4")).unwrap(), vec!["-all"]);
        assert_eq!(directive.matches(ip("::1")).unwrap(), vec!["-all"]);
    }

    #[test]
    fn all_rejects_other_terms() {
        assert!(Directive::all("all:foo").is_err());
        assert!(matches!(
            Directive::all("a"),
            Err(SpfError::WrongMechanism { expected: "all", .. })
        ));
    }

    // ---- include ----

    #[tokio::test]
    async fn include_prefixes_inner_trail() {
        let resolver = MockResolver::new();
        resolver.add_txt("sub.example.org", vec!["v=spf1 a -all"]);
        resolver.add_ip("sub.example.org", vec![ip("10.5.5.1")]);

        let directive = Directive::include("include:sub.example.org", &resolver, &SpfOptions::default())
            .await
            .unwrap();
        assert_eq!(
            directive.matches(ip("10.5.5.1")).unwrap(),
            vec!["include:sub.example.org", "a"]
        );
        // The nested -all matches everything else.
        assert_eq!(
            directive.matches(ip("10.9.9.9")).unwrap(),
            vec!["include:sub.example.org", "-all"]
        );
    }

    #[tokio::test]
    async fn include_without_inner_match_is_empty() {
        let resolver = MockResolver::new();
        resolver.add_txt("sub.example.org", vec!["v=spf1 ip4:10.0.0.0/8"]);

        let directive = Directive::include("~include:sub.example.org", &resolver, &SpfOptions::default())
            .await
            .unwrap();
        assert_eq!(directive.qualifier(), Qualifier::SoftFail);
        assert!(directive.matches(ip("192.168.0.1")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn include_missing_record_fails() {
        let resolver = MockResolver::new();
        let err = Directive::include("include:nothing.example", &resolver, &SpfOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, SpfError::NoSpfRecord("nothing.example".into()));
    }

    #[test]
    fn display_is_verbatim_term() {
        let directive = Directive::ip("-ip4:10.0.0.1/8").unwrap();
        assert_eq!(directive.to_string(), "-ip4:10.0.0.1/8");
    }
}
