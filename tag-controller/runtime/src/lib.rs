#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use tag_controller_core as core;
pub use tag_controller_k8s as k8s;

pub mod admission;
mod args;
pub mod metrics;
pub mod settings;

pub use self::args::Args;
