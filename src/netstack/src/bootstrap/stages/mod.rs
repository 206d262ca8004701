//! Stage bodies, grouped by the part of the lab they touch.
mod access;
mod agent;
mod bridge;
mod data_plane;
mod identity;

pub use access::{append_key_if_missing, FORWARD_HOST};
