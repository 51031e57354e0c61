#![forbid(unsafe_code)]

pub mod app;
pub mod backend;
pub mod blocks;
pub mod chunker;
pub mod cli;
pub mod config;
pub mod demo;
pub mod formats;
pub mod ingest;
pub mod logging;
