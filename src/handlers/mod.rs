pub mod commands;
pub mod session;
