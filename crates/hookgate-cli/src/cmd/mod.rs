pub mod checkpoint;
pub mod config;
pub mod gc;
pub mod hook;
pub mod mode;
