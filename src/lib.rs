//! context-runner - drive a line-protocol context server over stdio.

pub mod config;
pub mod connector;
pub mod display;
pub mod runner;
