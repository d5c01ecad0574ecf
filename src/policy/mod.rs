//! Authorization policy: which keys exist and which scripts they may fetch.

pub mod access;
pub mod catalog;
