//! Utilities Module - shared infrastructure
//!
//! - `constants`: Reserved names and limits
//! - `jsonpath`: Dotted model paths (parse, read, write)
//! - `records`: Column-to-records projection for table-shaped data
//! - `entities`: HTML entity decoding for delivered definitions

pub mod constants;
pub mod entities;
pub mod jsonpath;
pub mod records;

pub use records::columns_to_records;
