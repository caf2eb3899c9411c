//! decklink-bridge - DeckLink capture and playback control
//!
//! Device discovery, capture with input-format detection and scheduled
//! playback for Blackmagic DeckLink cards, with a software-emulated driver
//! for running without hardware.

pub mod config;
pub mod error;
pub mod events;
pub mod utils;
pub mod video;

pub use error::{AppError, Result};
