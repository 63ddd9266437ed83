//! # streampath
//!
//! Fetch a JSON document over HTTP and return the value at a path as soon as
//! it has been read, without waiting for the rest of the body.
//!
//! The response body is fed chunk by chunk into an incremental matcher. The
//! first value found at the path resolves the lookup and cancels the
//! transfer, so the connection is released early and the server stops
//! sending. A path that never matches reads the body to its end and resolves
//! to `None`.
//!
//! ## Example
//!
//! ```no_run
//! use streampath::{RequestOptions, fetch_and_find_path};
//!
//! # #[tokio::main]
//! # async fn main() -> miette::Result<()> {
//! let value = fetch_and_find_path(
//!     "http://localhost:3000/",
//!     "data3",
//!     RequestOptions::default(),
//! )
//! .await?;
//!
//! match value {
//!     Some(value) => println!("found: {value}"),
//!     None => println!("not in the document"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Paths
//!
//! Paths are dot-separated. A plain component names an object member, a
//! numeric one an array index, `*` matches any single member or element, an
//! empty component (`a..b`) matches any depth and `/regex/` matches member
//! names. See [`path::JsonPath`].
//!
//! ## Custom HTTP clients
//!
//! [`PathFetcher`] works over any [`http_client::HttpClient`]. With the
//! default `reqwest-client` feature, [`reqwest::Client`] implements it.

#![warn(missing_docs)]
pub use serde_json;
pub use url;

pub mod error;
pub mod fetch;
pub mod http_client;
pub mod matcher;
pub mod path;
pub mod stream;

pub use error::FetchError;
#[cfg(feature = "reqwest-client")]
pub use fetch::fetch_and_find_path;
pub use fetch::{PathFetcher, RequestOptions};
pub use matcher::{PathMatch, PathMatcher};
pub use path::JsonPath;
