#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod compiler;
pub mod context;
mod engine;
mod env;
mod error;
pub mod functions;
pub mod loader;
pub mod machine;
mod ops;
pub mod value;

pub use compiler::{Compiled, artifact_name};
pub use context::Context;
pub use engine::Engine;
pub use env::{Env, Function};
pub use error::{Error, Location};
pub use loader::Loader;
pub use machine::{LoadRequest, Machine, Step};
pub use value::{Object, Value};
