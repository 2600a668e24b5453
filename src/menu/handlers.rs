use crate::component::VideoCompressor;
use crate::config::Config;
use crate::pause;
use crate::signal::take_shutdown_signal;
use anyhow::Result;
use console::{Term, style};
use rust_i18n::t;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

fn finish(term: &Term, shutdown_signal: &Arc<AtomicBool>, outcome: Result<()>) -> Result<()> {
    if let Err(e) = outcome {
        eprintln!("{} {}", style(t!("common.error_prefix")).red().bold(), e);
    }
    if take_shutdown_signal(shutdown_signal) {
        println!("{}", style(t!("common.interrupted")).yellow());
    }
    pause(term)
}

pub fn run_single_compression(
    term: &Term,
    shutdown_signal: &Arc<AtomicBool>,
    config: &mut Config,
) -> Result<()> {
    let mut compressor = VideoCompressor::new(config.clone(), Arc::clone(shutdown_signal));
    let outcome = compressor.run_single();
    *config = compressor.into_config();
    finish(term, shutdown_signal, outcome)
}

pub fn run_batch_compression(
    term: &Term,
    shutdown_signal: &Arc<AtomicBool>,
    config: &mut Config,
) -> Result<()> {
    let mut compressor = VideoCompressor::new(config.clone(), Arc::clone(shutdown_signal));
    let outcome = compressor.run_batch();
    *config = compressor.into_config();
    finish(term, shutdown_signal, outcome)
}

pub fn run_list_presets(term: &Term, config: &Config) -> Result<()> {
    term.clear_screen()?;
    VideoCompressor::new(config.clone(), Arc::new(AtomicBool::new(false))).list_presets();
    pause(term)
}
