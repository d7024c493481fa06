//! Object store adapters

mod oss;

pub use oss::OssStore;
