//! Core types and trait definitions for the worldgate verification service.
//!
//! This crate is deliberately free of HTTP, database and runtime
//! dependencies. The status resolver lives here because it is a pure
//! function of its inputs; everything that sleeps, spawns or talks to the
//! network lives in `worldgate-verify`.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod error;
pub mod fetch;
pub mod keyname;
pub mod model;
pub mod resolve;
pub mod restrict;
pub mod status;
pub mod store;
pub mod world;

pub use error::{Error, Result};
pub use fetch::FetchError;
pub use restrict::Restriction;
pub use status::Status;
