//! Cache-correctness verification for a single test case

pub mod protocol;
pub mod sentinel;

#[cfg(test)]
pub(crate) mod fake;

pub use protocol::{BuildRecord, Collaborators, Phase, VerifyProtocol, VerifySettings};
pub use sentinel::{parse_cache_verdict, CacheVerdict};
