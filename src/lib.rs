#![forbid(unsafe_code)]

//! Media relay service: turns a YouTube or TikTok link into a hosted audio
//! file and keeps a JSON library of everything it has published.

pub mod auth;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod library;
pub mod pipeline;
pub mod relay;
pub mod scrape;
pub mod source;
