//! # Resilience Module
//!
//! Explicit retry policies for store calls. A policy is a value handed to the
//! component making network calls (page iteration, transactional writes); no
//! call is retried unless the caller supplied a policy that allows it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use registry_migrate::resilience::{BackoffConfig, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn example() -> registry_migrate::error::Result<()> {
//! let policy = RetryPolicy::new(
//!     3,
//!     BackoffConfig {
//!         base_delay: Duration::from_millis(200),
//!         max_delay: Duration::from_secs(5),
//!         multiplier: 2.0,
//!     },
//! );
//!
//! let value = policy
//!     .run("scan", || async { Ok::<_, registry_migrate::MigrationError>(42) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod retry;

pub use retry::{BackoffConfig, RetryPolicy};
