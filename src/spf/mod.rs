//! SPF policy records: parse the `v=spf1` record of a domain and find the
//! directive that authorizes a sender address.

mod eval;
mod mechanism;
mod parser;
mod record;

pub use eval::SpfVerifier;
pub use mechanism::{Directive, DualCidr, Mechanism, Qualifier};
pub use parser::{classify, Family};
pub use record::{SpfRecord, VERSION_TAG};

use thiserror::Error;

use crate::common::cidr::CidrError;
use crate::common::dns::DnsError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpfError {
    /// A term of a known family has malformed fields or an out of range prefix.
    #[error("wrong mechanism format: {0}")]
    Format(String),
    /// A directive constructor was handed a term of another family.
    #[error("wrong mechanism: wanted {expected:?} got {found:?}")]
    WrongMechanism { expected: &'static str, found: String },
    #[error("failed to resolve domain {domain}: {source}")]
    Dns {
        domain: String,
        #[source]
        source: DnsError,
    },
    #[error("no SPF record found under the domain {0}")]
    NoSpfRecord(String),
    /// Only raised with [`SpfOptions::strict`].
    #[error("unrecognized term {0:?}")]
    UnknownMechanism(String),
    #[error("include loop through {0}")]
    IncludeLoop(String),
    #[error("include of {domain} exceeds the maximum depth of {max}")]
    IncludeDepthExceeded { domain: String, max: usize },
    #[error("SPF record for {0} has not been parsed")]
    Unparsed(String),
}

impl From<CidrError> for SpfError {
    fn from(e: CidrError) -> Self {
        SpfError::Format(e.to_string())
    }
}

/// Parsing options.
///
/// The default is lenient (unrecognized terms are skipped) with no bound on
/// include depth. Include loops are always rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpfOptions {
    pub strict: bool,
    pub max_include_depth: Option<usize>,
}

impl SpfOptions {
    /// Reject unrecognized terms instead of skipping them.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Fail once includes nest deeper than `depth`.
    pub fn max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = Some(depth);
        self
    }
}
