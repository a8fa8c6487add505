#![allow(clippy::tabs_in_doc_comments)]
//! # twin-client-core
//!
//! Dispatch and resilience substrate for a digital-twin platform
//! client: a classifying pub/sub bus (`bus`), a pull-based search
//! subscription driver built on top of it (`search`), and the
//! connection transport that feeds both (`transport`).

pub mod bus;
pub mod classify;
pub mod config;
pub mod error;
pub mod frame;
pub mod search;
pub mod transport;

pub use error::{Error, Result};
