//! html5-cf library
//!
//! This module exposes the API clients, the response cache and the commands for
//! use in integration tests.

pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod data;
pub mod output;
