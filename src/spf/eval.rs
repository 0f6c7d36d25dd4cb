use std::net::IpAddr;
use std::sync::Arc;

use crate::common::dns::{DnsResolver, HickoryResolver};

use super::record::SpfRecord;
use super::{SpfError, SpfOptions};

/// SPF verifier: a resolver handle plus parsing options.
pub struct SpfVerifier<R: DnsResolver> {
    resolver: Arc<R>,
    options: SpfOptions,
}

impl<R: DnsResolver> SpfVerifier<R> {
    pub fn new(resolver: Arc<R>) -> Self {
        Self {
            resolver,
            options: SpfOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SpfOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &SpfOptions {
        &self.options
    }

    /// Fetch and parse the record of `domain`.
    ///
    /// Nothing is cached: every call repeats the DNS lookups.
    pub async fn lookup(&self, domain: &str) -> Result<SpfRecord, SpfError> {
        SpfRecord::lookup(domain, self.resolver.as_ref(), &self.options).await
    }

    /// Look up the record of `domain` and return the match trail for `ip`.
    pub async fn check_host(&self, ip: IpAddr, domain: &str) -> Result<Vec<String>, SpfError> {
        let record = self.lookup(domain).await?;
        let trail = record.evaluate(ip)?;
        log::debug!("SPF {domain} for {ip}: {trail:?}");
        Ok(trail)
    }
}

impl Default for SpfVerifier<HickoryResolver> {
    fn default() -> Self {
        Self::new(Arc::new(HickoryResolver::new()))
    }
}
