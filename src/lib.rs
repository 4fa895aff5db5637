//! Beatmap search and `.osz` download.
//!
//! The binary drives [`cli::run`]. Windowed front ends embed
//! [`session::Session`] instead, which runs the same search and download
//! code on worker threads and reports back through [`session::UiMsg`].

pub mod app_state;
pub mod cli;
pub mod downloader;
pub mod search;
pub mod session;
pub mod storage;

#[cfg(test)]
mod test_support;
