pub mod action;
pub mod changes;
pub mod checkpoint;
pub mod config;
pub mod decision;
pub mod error;
pub mod gc;
pub mod hook;
pub mod io;
pub mod mode;
pub mod paths;
pub mod permission;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod validator;
pub mod workspace;

pub use error::{GateError, Result};
