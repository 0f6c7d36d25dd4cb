//! SPF record: fetch the policy text of a domain, build its directives and
//! evaluate candidate addresses against them.

use std::net::IpAddr;

use crate::common::dns::DnsResolver;
use crate::common::domain::{domains_equal, normalize};

use super::mechanism::{dns_error, Directive};
use super::parser::{self, Family};
use super::{SpfError, SpfOptions};

/// Version tag every SPF record starts with.
pub const VERSION_TAG: &str = "v=spf1";

/// Parsed SPF record of one domain.
///
/// Directives keep the textual order of the record. Once parsed the record
/// is never mutated, so it can be shared across threads and evaluated any
/// number of times without further DNS traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpfRecord {
    domain: String,
    raw: String,
    directives: Option<Vec<Directive>>,
}

impl SpfRecord {
    /// An empty record for `domain`; call [`fetch`](Self::fetch) and
    /// [`parse`](Self::parse) to populate it.
    pub fn new(domain: &str) -> Self {
        Self {
            domain: normalize(domain),
            raw: String::new(),
            directives: None,
        }
    }

    /// Fetch and parse the record published by `domain`.
    pub async fn lookup<R: DnsResolver>(
        domain: &str,
        resolver: &R,
        options: &SpfOptions,
    ) -> Result<Self, SpfError> {
        let mut lineage = Lineage::new(options, Some(domain));
        Self::lookup_in(domain, resolver, &mut lineage).await
    }

    pub(crate) async fn lookup_in<R: DnsResolver>(
        domain: &str,
        resolver: &R,
        lineage: &mut Lineage<'_>,
    ) -> Result<Self, SpfError> {
        let mut record = Self::new(domain);
        record.fetch(resolver).await?;
        record.parse_in(resolver, lineage).await?;
        Ok(record)
    }

    /// Query the TXT records of the domain and keep the first SPF record.
    ///
    /// On failure the record text stays empty.
    pub async fn fetch<R: DnsResolver>(&mut self, resolver: &R) -> Result<(), SpfError> {
        self.raw.clear();
        self.directives = None;
        let txt = resolver
            .query_txt(&self.domain)
            .await
            .map_err(dns_error(&self.domain))?;
        let raw = txt
            .into_iter()
            .find(|entry| is_spf_record(entry))
            .ok_or_else(|| SpfError::NoSpfRecord(self.domain.clone()))?;

        log::debug!("SPF record for {}: {raw:?}", self.domain);
        self.raw = raw;
        Ok(())
    }

    /// Build every directive of the fetched record, in textual order.
    ///
    /// Fails on the first directive that cannot be built; the record then
    /// has no directives and cannot be evaluated.
    pub async fn parse<R: DnsResolver>(&mut self, resolver: &R, options: &SpfOptions) -> Result<(), SpfError> {
        let mut lineage = Lineage::new(options, Some(self.domain.as_str()));
        self.parse_in(resolver, &mut lineage).await
    }

    async fn parse_in<R: DnsResolver>(&mut self, resolver: &R, lineage: &mut Lineage<'_>) -> Result<(), SpfError> {
        self.directives = None;
        if !is_spf_record(&self.raw) {
            return Err(SpfError::NoSpfRecord(self.domain.clone()));
        }

        let mut directives = Vec::new();
        // The first term is the version tag.
        for term in self.raw.split(' ').skip(1).filter(|t| !t.is_empty()) {
            let directive = match parser::classify(term) {
                Some(Family::A) => Directive::host(term, Family::A, &self.domain, resolver).await?,
                Some(Family::Mx) => Directive::host(term, Family::Mx, &self.domain, resolver).await?,
                Some(Family::Ip) => Directive::ip(term)?,
                Some(Family::All) => Directive::all(term)?,
                Some(Family::Include) => Directive::include_in(term, resolver, lineage).await?,
                None if lineage.options.strict => {
                    return Err(SpfError::UnknownMechanism(term.to_string()));
                }
                None => {
                    log::debug!("skipping unrecognized term {term:?} in SPF record for {}", self.domain);
                    continue;
                }
            };
            directives.push(directive);
        }

        self.directives = Some(directives);
        Ok(())
    }

    /// Match trail of the first directive matching `ip`, empty when none does.
    ///
    /// For an include the trail starts with the include term followed by the
    /// trail of the included record.
    pub fn evaluate(&self, ip: IpAddr) -> Result<Vec<String>, SpfError> {
        Ok(self.first_match(ip)?.map(|(_, trail)| trail).unwrap_or_default())
    }

    /// The top-level directive whose match ends evaluation for `ip`.
    pub fn matched_directive(&self, ip: IpAddr) -> Result<Option<&Directive>, SpfError> {
        Ok(self.first_match(ip)?.map(|(directive, _)| directive))
    }

    fn first_match(&self, ip: IpAddr) -> Result<Option<(&Directive, Vec<String>)>, SpfError> {
        let directives = self
            .directives
            .as_ref()
            .ok_or_else(|| SpfError::Unparsed(self.domain.clone()))?;
        for directive in directives {
            let trail = directive.matches(ip)?;
            if !trail.is_empty() {
                return Ok(Some((directive, trail)));
            }
        }
        Ok(None)
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The TXT record text, empty until fetched.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn directives(&self) -> &[Directive] {
        self.directives.as_deref().unwrap_or(&[])
    }

    pub fn is_parsed(&self) -> bool {
        self.directives.is_some()
    }
}

/// Check if a TXT record is an SPF record (case-insensitive v=spf1 prefix).
fn is_spf_record(txt: &str) -> bool {
    let lower = txt.to_ascii_lowercase();
    lower == VERSION_TAG || lower.starts_with("v=spf1 ")
}

/// The chain of domains from the record being parsed down to the include
/// currently being built.
pub(crate) struct Lineage<'o> {
    options: &'o SpfOptions,
    chain: Vec<String>,
    depth: usize,
}

impl<'o> Lineage<'o> {
    pub(crate) fn new(options: &'o SpfOptions, root: Option<&str>) -> Self {
        Self {
            options,
            chain: root.map(normalize).into_iter().collect(),
            depth: 0,
        }
    }

    pub(crate) fn enter(&mut self, domain: &str) -> Result<(), SpfError> {
        if self.chain.iter().any(|d| domains_equal(d, domain)) {
            return Err(SpfError::IncludeLoop(domain.to_string()));
        }
        if let Some(max) = self.options.max_include_depth {
            if self.depth >= max {
                return Err(SpfError::IncludeDepthExceeded {
                    domain: domain.to_string(),
                    max,
                });
            }
        }
        self.chain.push(normalize(domain));
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.chain.pop();
        self.depth = self.depth.saturating_sub(1);
    }
}
