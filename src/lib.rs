//! SPF policy matching: fetch a domain's `v=spf1` record, parse its
//! directives and report which directive authorizes a sender address.
//!
//! DNS caching is the caller's responsibility. This library provides
//! a `DnsResolver` trait; implement it with caching at the resolver layer.

pub mod common;
pub mod spf;

pub use common::dns::{DnsError, DnsResolver, HickoryResolver};
pub use spf::{Directive, Mechanism, Qualifier, SpfError, SpfOptions, SpfRecord, SpfVerifier};
