pub mod admin;
pub mod auth;
pub mod common;
pub mod movies;
pub mod notifications;
pub mod payments;
pub mod playback;
pub mod upload;
