#![doc = include_str!("../README.md")]

pub use crate::context::ParsingContext;
pub use crate::engine::stream::{BitReader, BitWriter};
pub use crate::engine::RecordDecoder;
pub use crate::error::Error;
pub use crate::schema::*;
pub use crate::types::*;

pub mod context;
pub mod engine;
pub mod error;
pub mod schema;
pub mod types;
