pub mod capture;
pub mod config;
pub mod error;
pub mod generate;
pub mod live;
pub mod pcm;
pub mod playback;
pub mod transcript;

pub use error::{Result, VoiceError};
