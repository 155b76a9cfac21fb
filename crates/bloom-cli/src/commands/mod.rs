pub mod add;
pub mod clear;
pub mod common;
pub mod config;
pub mod list;
pub mod remove;
pub mod stats;
