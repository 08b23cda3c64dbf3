//! Devgate - a development proxy and production asset packager
//!
//! This library provides the pieces behind a frontend dev workflow where the
//! backend is a separately run process:
//! - Serves bundled assets under a fixed URL prefix on a fixed port
//! - Forwards every other request verbatim to the backend origin
//! - Answers with a self-reloading 502 page while the backend is restarting
//! - Pushes a full-page reload to the browser when a watched backend
//!   artifact changes
//! - Packages entry files into content-hashed bundles with a JSON manifest
//!   for production

pub mod assets;
pub mod build;
pub mod config;
pub mod error;
pub mod manifest;
pub mod proxy;
pub mod reload;
pub mod upstream;

pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
