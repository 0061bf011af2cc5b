//! # Vigil
//!
//! Resumable security compliance scanning for GitHub organizations.
//!
//! A scan enumerates every repository in an organization and runs three
//! security checks against each (secret scanning, Dependabot alerts,
//! code scanning) in sequential batches of bounded concurrency. While it
//! runs, the scan can be cancelled, paused, or re-batched through a
//! [`scan::ScanHandle`], and its progress can be read at any moment
//! without waiting on in-flight work. Progress survives restarts: every
//! batch boundary writes a checkpoint, and long scans periodically
//! re-seed themselves from one so no single execution grows without
//! bound.
//!
//! ## Usage
//!
//! ```bash
//! vigil scan my-org --batch-size 20
//! vigil status my-org
//! vigil scan my-org --resume
//! ```
//!
//! ## Modules
//!
//! - `client` - security-check client trait, GitHub implementation, and a
//!   scripted mock for tests
//! - `codec` - payload sealing for checkpoints at rest
//! - `config` - layered configuration (defaults, TOML file, environment)
//! - `scan` - the orchestration core: state machine, batch fan-out,
//!   control plane, retry, checkpoints, and reporting
pub mod client;
pub mod codec;
pub mod config;
pub mod scan;
