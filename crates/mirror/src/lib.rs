//! Mirror orchestration for vitrine.
//!
//! Two pieces live here: the singleflight coordinator that collapses
//! concurrent duplicate fetches into one upstream request, and the mirror
//! service that answers index, version, and artifact queries by combining
//! the cache index, the artifact store, and the upstream client.

pub mod error;
pub mod service;
pub mod singleflight;

pub use error::{MirrorError, MirrorResult};
pub use service::{CacheTtls, MirrorService};
pub use singleflight::{FlightError, Singleflight};
