// src/lib.rs

//! Evaluates the security posture of a public website: HTTPS enforcement,
//! TLS versions, certificate lifetime, security headers and DNS hardening.
//!
//! ```no_run
//! # async fn demo() -> vanguard_sitecheck::error::Result<()> {
//! use vanguard_sitecheck::core::scanner::Scanner;
//!
//! let mut scanner = Scanner::new("example.com")?;
//! let report = scanner.scan().await?;
//! println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
