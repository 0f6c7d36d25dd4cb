use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnsError {
    #[error("NXDOMAIN: domain does not exist")]
    NxDomain,
    #[error("SERVFAIL: server failure")]
    ServFail,
    #[error("timeout")]
    Timeout,
    #[error("DNS error: {0}")]
    Other(String),
}

/// DNS lookups needed to build an SPF record.
///
/// Implementations may enforce their own timeouts or caching; the SPF code
/// awaits one query at a time and never retries.
pub trait DnsResolver: Clone + Send + Sync + 'static {
    fn query_txt(&self, domain: &str) -> impl Future<Output = Result<Vec<String>, DnsError>> + Send;
    /// A and AAAA records for `domain`.
    fn query_ip(&self, domain: &str) -> impl Future<Output = Result<Vec<IpAddr>, DnsError>> + Send;
    /// MX records as `(preference, exchange)` pairs.
    fn query_mx(&self, domain: &str) -> impl Future<Output = Result<Vec<(u16, String)>, DnsError>> + Send;
}

/// Hickory DNS resolver implementation
#[derive(Clone)]
pub struct HickoryResolver {
    resolver: TokioResolver,
}

impl HickoryResolver {
    pub fn new() -> Self {
        let resolver = TokioResolver::builder_with_config(
            ResolverConfig::default(),
            TokioConnectionProvider::default(),
        )
        .build();
        Self { resolver }
    }

    pub fn with_config(config: ResolverConfig, opts: ResolverOpts) -> Self {
        let resolver = TokioResolver::builder_with_config(config, TokioConnectionProvider::default())
            .with_options(opts)
            .build();
        Self { resolver }
    }

    fn classify_error(e: &hickory_resolver::ResolveError) -> DnsError {
        let msg = e.to_string().to_lowercase();
        if msg.contains("nxdomain") || msg.contains("no records") {
            DnsError::NxDomain
        } else if msg.contains("timeout") || msg.contains("timed out") {
            DnsError::Timeout
        } else if msg.contains("servfail") {
            DnsError::ServFail
        } else {
            DnsError::Other(e.to_string())
        }
    }
}

impl Default for HickoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsResolver for HickoryResolver {
    async fn query_txt(&self, domain: &str) -> Result<Vec<String>, DnsError> {
        log::debug!("TXT lookup for {domain}");
        match self.resolver.txt_lookup(domain).await {
            Ok(lookup) => Ok(lookup.iter().map(|txt| txt.to_string()).collect()),
            Err(e) => Err(Self::classify_error(&e)),
        }
    }

    async fn query_ip(&self, domain: &str) -> Result<Vec<IpAddr>, DnsError> {
        log::debug!("A/AAAA lookup for {domain}");
        let mut addrs = Vec::new();
        let mut failure = None;

        match self.resolver.ipv4_lookup(domain).await {
            Ok(lookup) => addrs.extend(lookup.iter().map(|a| IpAddr::V4(a.0))),
            Err(e) => failure = Some(Self::classify_error(&e)),
        }
        match self.resolver.ipv6_lookup(domain).await {
            Ok(lookup) => addrs.extend(lookup.iter().map(|aaaa| IpAddr::V6(aaaa.0))),
            Err(e) if failure.is_none() => failure = Some(Self::classify_error(&e)),
            Err(_) => {}
        }

        // A domain with only one address family is not an error.
        match failure {
            Some(e) if addrs.is_empty() => Err(e),
            _ => Ok(addrs),
        }
    }

    async fn query_mx(&self, domain: &str) -> Result<Vec<(u16, String)>, DnsError> {
        log::debug!("MX lookup for {domain}");
        match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => {
                let records: Vec<(u16, String)> = lookup
                    .iter()
                    .map(|mx| (mx.preference(), mx.exchange().to_string().trim_end_matches('.').to_string()))
                    .collect();
                Ok(records)
            }
            Err(e) => Err(Self::classify_error(&e)),
        }
    }
}

/// Kind of query recorded by [`MockResolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Txt,
    Ip,
    Mx,
}

/// Mock DNS resolver for testing
#[derive(Clone, Default)]
pub struct MockResolver {
    txt_records: Arc<Mutex<HashMap<String, Vec<String>>>>,
    ip_records: Arc<Mutex<HashMap<String, Vec<IpAddr>>>>,
    mx_records: Arc<Mutex<HashMap<String, Vec<(u16, String)>>>>,
    errors: Arc<Mutex<HashMap<String, DnsError>>>,
    queries: Arc<Mutex<Vec<(QueryKind, String)>>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_txt(&self, domain: &str, records: Vec<&str>) {
        let records = records.into_iter().map(String::from).collect();
        self.txt_records.lock().unwrap().insert(domain.to_lowercase(), records);
    }

    pub fn add_ip(&self, domain: &str, addrs: Vec<IpAddr>) {
        self.ip_records.lock().unwrap().insert(domain.to_lowercase(), addrs);
    }

    pub fn add_mx(&self, domain: &str, records: Vec<(u16, &str)>) {
        let records = records.into_iter().map(|(pref, host)| (pref, host.to_string())).collect();
        self.mx_records.lock().unwrap().insert(domain.to_lowercase(), records);
    }

    /// Every query for `domain`, of any kind, fails with `error`.
    pub fn set_error(&self, domain: &str, error: DnsError) {
        self.errors.lock().unwrap().insert(domain.to_lowercase(), error);
    }

    /// Queries issued so far, in order.
    pub fn queries(&self) -> Vec<(QueryKind, String)> {
        self.queries.lock().unwrap().clone()
    }

    fn record_query(&self, kind: QueryKind, domain: &str) -> Result<String, DnsError> {
        let domain_lower = domain.to_lowercase();
        self.queries.lock().unwrap().push((kind, domain_lower.clone()));
        match self.errors.lock().unwrap().get(&domain_lower) {
            Some(e) => Err(e.clone()),
            None => Ok(domain_lower),
        }
    }
}

impl DnsResolver for MockResolver {
    async fn query_txt(&self, domain: &str) -> Result<Vec<String>, DnsError> {
        let domain_lower = self.record_query(QueryKind::Txt, domain)?;
        Ok(self.txt_records.lock().unwrap().get(&domain_lower).cloned().unwrap_or_default())
    }

    async fn query_ip(&self, domain: &str) -> Result<Vec<IpAddr>, DnsError> {
        let domain_lower = self.record_query(QueryKind::Ip, domain)?;
        Ok(self.ip_records.lock().unwrap().get(&domain_lower).cloned().unwrap_or_default())
    }

    async fn query_mx(&self, domain: &str) -> Result<Vec<(u16, String)>, DnsError> {
        let domain_lower = self.record_query(QueryKind::Mx, domain)?;
        Ok(self.mx_records.lock().unwrap().get(&domain_lower).cloned().unwrap_or_default())
    }
}
