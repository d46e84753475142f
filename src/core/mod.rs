// src/core/mod.rs

/// Data structures shared by every check: the target domain, request
/// descriptors and hops of a redirect chain, verdicts and the `ScanReport`.
pub mod models;

/// The checks (redirect chains, TLS, DNS, headers) and the `Scanner` that
/// runs them in phases and merges their results.
pub mod scanner;
