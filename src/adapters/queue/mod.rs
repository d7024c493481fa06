//! Queue adapters

mod mns;

pub use mns::MnsQueue;
