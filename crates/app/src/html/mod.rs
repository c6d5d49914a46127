//! Embedded HTML served by the web UI.
//!
//! Pages are kept as `&'static str` so they ship inside the binary without
//! filesystem lookups.

pub(crate) mod index;
