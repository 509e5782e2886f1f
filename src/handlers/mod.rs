//! Built-in terminal handlers.

pub mod echo;
