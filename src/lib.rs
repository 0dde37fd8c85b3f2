//! Multi-protocol credential brute-force scanner core.
//!
//! Given a target, a protocol name, and a credential dictionary, `credprobe`
//! drives protocol-specific authentication state machines and returns the
//! credentials the target accepted. Fifteen probes are built in (SSH, MySQL,
//! PostgreSQL, SQL Server, Oracle plus Oracle SID enumeration, MongoDB,
//! Redis, ClickHouse, FTP, SMB, RDP, SNMP, Telnet, Elasticsearch), all
//! answering through one [`Cracker`] trait so the scan runner never sees a
//! driver-specific error surface.
//!
//! ```no_run
//! use std::sync::Arc;
//! use credprobe::{AdaptiveLimiter, Registry, ScanContext, Scanner, Task};
//!
//! # async fn run() -> credprobe::Result<()> {
//! let scanner = Scanner::new(Arc::new(Registry::builtin()), Arc::new(AdaptiveLimiter::default()));
//!
//! let mut task = Task::new("demo", "192.0.2.10", "6379");
//! task.params.insert("service", "redis");
//! task.params.insert("passwords", "changeme,hunter2");
//!
//! let hits = scanner.run(&ScanContext::new(), &task).await?;
//! for hit in hits {
//!     println!("{}@{}:{} accepts {:?}", hit.service, hit.host, hit.port, hit.password);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! **Every form of peer verification is intentionally disabled.** SSH host
//! keys are accepted blind, and the TLS legs of the RDP and Elasticsearch
//! probes accept any certificate, because the scanner's whole premise is connecting
//! to unknown, attacker-chosen hosts. Never reuse this crate's transport
//! plumbing for anything that handles data worth protecting.
//!
//! This is an offensive-security tool. Point it only at infrastructure you
//! are authorized to test.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod auth;
mod context;
pub mod cracker;
pub mod dict;
pub mod error;
mod limiter;
mod registry;
pub(crate) mod runtime;
mod scanner;
mod task;

pub use auth::{Auth, AuthMode};
pub use context::ScanContext;
pub use cracker::{Cracker, Verdict};
pub use error::{Error, ErrorKind, Result};
pub use limiter::{AdaptiveLimiter, LimiterOptions, Permit};
pub use registry::Registry;
pub use scanner::{Scanner, ScannerOptions};
pub use task::{BruteResult, Params, Task};
