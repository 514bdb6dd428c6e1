//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod adapters;
pub mod socket_guard;
