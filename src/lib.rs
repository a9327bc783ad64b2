//! The library code for the `sitepipe` asset pipeline. A project keeps its
//! sources under `src/{html,scss,js,images,fonts}`; `sitepipe` turns them into
//! two output trees:
//!
//! 1. The staging tree (`public/`), regenerated on every development run and
//!    served with live reload ([`crate::server`]) while file watchers
//!    ([`crate::watch`]) re-run whichever step's sources changed.
//! 2. The distribution tree (`dist/`), derived from the staging tree for
//!    production: bundling directives in pages are resolved into minified
//!    bundles ([`crate::useref`]), images are optimized ([`crate::images`])
//!    and fonts are copied.
//!
//! Each transformation is a [`step::Step`]. Steps are sequenced into stages by
//! the pipelines in [`crate::build`]; steps within a stage run concurrently
//! and a stage starts only after the previous one finished.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]

pub mod build;
pub mod cachebust;
pub mod clean;
pub mod config;
pub mod copy;
pub mod html;
pub mod images;
pub mod minify;
pub mod reload;
pub mod server;
pub mod step;
pub mod style;
pub mod url;
pub mod useref;
mod util;
mod value;
pub mod watch;
