//! Wire formats.

pub mod models;
