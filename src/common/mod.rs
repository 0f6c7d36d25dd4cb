//! Infrastructure shared by the SPF code: DNS access, CIDR ranges, domain names.

pub mod cidr;
pub mod dns;
pub mod domain;
