//! rowpipe: streaming filters over self-describing tabular text.
//!
//! A stream is a header line declaring a field separator and column
//! names, followed by data rows and pass-through comments. Every filter
//! reads such a stream and writes a compatible one, so shell pipelines
//! like `rpsort | rpjoin | rpreduce` compose into a lightweight
//! relational algebra over ordinary files. The same filters can be wired
//! together in-process with bounded pipes via [`filter::Pipeline`].
//!
//! The engine pieces live here: the codec ([`stream`]), the bounded pipe
//! ([`pipe`]), the filter framework and builder ([`filter`]), the
//! external sort and its parallel merge tree, the merge-join and the
//! group-by driver.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

pub mod channel;
pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod key;
pub mod pipe;
pub mod spill;
pub mod stream;

pub use config::Settings;
pub use error::{Error, Result};
