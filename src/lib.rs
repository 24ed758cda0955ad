//! Video-on-demand portal: catalog, payment-gated playback, complaints,
//! notifications, device blocking and object-storage uploads behind an axum API.
//!
//! [`access`] and [`playback`] hold no I/O. A front end can drive the access
//! gate and the playback controller directly and apply the returned
//! [`playback::Command`]s to its own media elements.

pub mod access;
pub mod app;
pub mod auth;
pub mod config;
pub mod database;
pub mod handlers;
pub mod playback;
pub mod rate_limit;
pub mod storage;
pub mod types;

#[cfg(test)]
mod test_support;
