//! Feature components

pub mod video_compressor;

pub use video_compressor::VideoCompressor;
