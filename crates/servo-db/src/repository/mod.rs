//! # Repository Module
//!
//! SQL lives here and nowhere else. Callers see typed methods.
//!
//! ## Available Repositories
//!
//! - [`kv::KvRepository`] - Key-value records (the preset collection)

pub mod kv;
