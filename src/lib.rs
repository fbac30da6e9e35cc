//! Library circulation service.
//!
//! Domain modules (catalog, borrowers, lending) built on the kernel's module
//! lifecycle, the HTTP facade, and the multicast event channel.

pub mod modules;
pub mod utils;
