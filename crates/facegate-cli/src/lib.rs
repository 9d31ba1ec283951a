pub mod cli;
pub mod commands;
pub mod config;
pub mod enroll;
pub mod errors;
pub mod faces;
pub mod interactive;
pub mod output;
pub mod services;
pub mod verify;
