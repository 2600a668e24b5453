use super::batch_progress::BatchProgress;
use super::command_builder::{OUTPUT_EXTENSION, derive_output_path};
use super::compressor::{BatchCallback, CompressionRequest, Compressor};
use super::progress_hub::{JobUpdate, ProgressEvent, UpdateCallback};
use super::result::CompressionResult;
use crate::config::{Config, add_recent_path, save_settings};
use crate::tools::{scan_video_files, validate_directory_exists};
use anyhow::{Context, Result};
use console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rust_i18n::t;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}";

/// Interactive front end for single-file and folder compression.
pub struct VideoCompressor {
    config: Config,
    shutdown_signal: Arc<AtomicBool>,
}

impl VideoCompressor {
    pub const fn new(config: Config, shutdown_signal: Arc<AtomicBool>) -> Self {
        Self {
            config,
            shutdown_signal,
        }
    }

    /// Settings as updated during the session (recent paths).
    #[must_use]
    pub fn into_config(self) -> Config {
        self.config
    }

    fn build_compressor(&self) -> Result<Compressor> {
        let presets = Arc::new(self.config.preset_registry());
        let compressor = Compressor::from_settings(&self.config.settings.compressor, presets)?
            .with_shutdown_signal(Arc::clone(&self.shutdown_signal));
        Ok(compressor)
    }

    pub fn run_single(&mut self) -> Result<()> {
        println!("{}", style(t!("compress.single_title")).cyan().bold());

        let compressor = self.build_compressor()?;
        let Some(input) = self.prompt_path(&t!("compress.prompt_file"))? else {
            return Ok(());
        };
        let input_path = PathBuf::from(&input);
        self.remember_path(&input);

        let Some(preset) = self.prompt_preset(&compressor)? else {
            return Ok(());
        };
        let output_path = self.output_path_for(&input_path);
        println!(
            "{} {}",
            style(t!("compress.output")).dim(),
            output_path.display()
        );

        let bar = ProgressBar::new(100);
        bar.set_style(progress_style()?);
        let bar_for_updates = bar.clone();
        let on_progress: UpdateCallback = Arc::new(move |update: &JobUpdate| {
            render_update(&bar_for_updates, update);
        });

        let request = CompressionRequest::new(&input_path, &output_path, &preset);
        let result = compressor.compress(&request, Some(on_progress))?;
        bar.finish_and_clear();

        print_result(&result);
        Ok(())
    }

    pub fn run_batch(&mut self) -> Result<()> {
        println!("{}", style(t!("compress.batch_title")).cyan().bold());

        let compressor = self.build_compressor()?;
        let Some(input) = self.prompt_path(&t!("compress.prompt_folder"))? else {
            return Ok(());
        };
        let directory = PathBuf::from(&input);
        validate_directory_exists(&directory)?;
        self.remember_path(&input);

        println!("{}", style(t!("compress.scanning")).dim());
        let video_files = scan_video_files(&directory);
        if video_files.is_empty() {
            println!("{}", style(t!("compress.no_videos")).yellow());
            return Ok(());
        }

        println!(
            "{}",
            style(t!("compress.found_videos", count = video_files.len())).green()
        );
        for (index, file) in video_files.iter().enumerate() {
            println!(
                "  {}. {} ({:.2} MB)",
                index + 1,
                file.path.file_name().unwrap_or_default().to_string_lossy(),
                megabytes(file.size)
            );
        }
        println!();

        let Some(preset) = self.prompt_preset(&compressor)? else {
            return Ok(());
        };
        let workers = self.config.settings.compressor.max_workers.max(1);
        let confirmed = Confirm::new()
            .with_prompt(t!("compress.confirm_batch", count = video_files.len(), workers = workers))
            .default(true)
            .interact()?;
        if !confirmed {
            println!("{}", style(t!("common.cancelled")).yellow());
            return Ok(());
        }

        let requests: Vec<CompressionRequest> = video_files
            .iter()
            .map(|file| {
                CompressionRequest::new(&file.path, &self.output_path_for(&file.path), &preset)
            })
            .collect();

        let progress = Arc::new(BatchProgress::new(requests.len()));
        let bar = ProgressBar::new(100);
        bar.set_style(progress_style()?);
        let on_progress: BatchCallback = {
            let progress = Arc::clone(&progress);
            let bar = bar.clone();
            Arc::new(move |index: usize, update: &JobUpdate| {
                progress.record(index, update);
                let status = progress.status();
                bar.set_position(status.overall_percentage.round() as u64);
                bar.set_message(format!("{}/{}", status.finished, status.total));
                if update.event.is_terminal() {
                    bar.println(terminal_line(&update.event));
                }
            })
        };

        let results = compressor.compress_batch(requests, workers, Some(on_progress))?;
        bar.finish_and_clear();

        print_batch_summary(&results);
        Ok(())
    }

    pub fn list_presets(&self) {
        println!("{}", style(t!("presets.title")).cyan().bold());
        let registry = self.config.preset_registry();
        let default_preset = &self.config.settings.compressor.default_preset;
        for (name, label) in registry.list() {
            let Ok(preset) = registry.get(&name) else {
                continue;
            };
            let marker = if &name == default_preset { "*" } else { " " };
            let resolution = preset
                .max_resolution
                .map_or_else(|| "-".to_string(), |r| r.to_string());
            println!(
                "{marker} {:<14} {:<24} {} v:{:<5} a:{:<5} crf:{:<3} speed:{} max:{}{}",
                style(&name).green(),
                label,
                preset.codec,
                preset.video_bitrate.as_str(),
                preset.audio_bitrate.as_str(),
                preset.crf,
                preset.speed,
                resolution,
                if preset.two_pass { " two-pass" } else { "" }
            );
        }
        println!();
        println!("{}", style(t!("presets.default_hint")).dim());
    }

    /// Next to the input, or in the configured output directory. A `.webm`
    /// input never gets its own path as output.
    fn output_path_for(&self, input: &Path) -> PathBuf {
        let directory = self
            .config
            .settings
            .compressor
            .output_dir
            .clone()
            .or_else(|| input.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        let output = derive_output_path(input, &directory);
        if output == input {
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            return directory.join(format!("{stem}.compressed.{OUTPUT_EXTENSION}"));
        }
        output
    }

    fn remember_path(&mut self, path: &str) {
        add_recent_path(&mut self.config.settings, path);
        if let Err(e) = save_settings(&self.config.settings) {
            warn!("Failed to save recent paths: {e}");
        }
    }

    fn prompt_path(&self, prompt: &str) -> Result<Option<String>> {
        let recent_paths = &self.config.settings.recent_paths;

        if recent_paths.is_empty() {
            let path: String = Input::new().with_prompt(prompt).interact_text()?;
            return Ok(Some(path.trim().to_string()));
        }

        let mut options: Vec<String> = recent_paths
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let indicator = if Path::new(p).exists() { "✓" } else { "✗" };
                format!("{} [{}] {}", i + 1, indicator, p)
            })
            .collect();
        options.push(t!("common.new_path").to_string());

        println!("{}", style(t!("common.esc_hint")).dim());

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt(t!("common.select_path"))
            .items(&options)
            .default(0)
            .interact_opt()?;

        match selection {
            None => Ok(None),
            Some(idx) if idx < recent_paths.len() => Ok(Some(recent_paths[idx].clone())),
            Some(_) => {
                let path: String = Input::new().with_prompt(prompt).interact_text()?;
                Ok(Some(path.trim().to_string()))
            }
        }
    }

    fn prompt_preset(&self, compressor: &Compressor) -> Result<Option<String>> {
        let presets = compressor.presets().list();
        let items: Vec<String> = presets
            .iter()
            .map(|(name, label)| format!("{name:<14} {label}"))
            .collect();
        let default_index = presets
            .iter()
            .position(|(name, _)| name == &self.config.settings.compressor.default_preset)
            .unwrap_or(0);

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt(t!("compress.prompt_preset"))
            .items(&items)
            .default(default_index)
            .interact_opt()?;
        Ok(selection.map(|idx| presets[idx].0.clone()))
    }
}

fn progress_style() -> Result<ProgressStyle> {
    Ok(ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .context("Invalid progress bar template")?
        .progress_chars("#>-"))
}

fn render_update(bar: &ProgressBar, update: &JobUpdate) {
    let ProgressEvent::Progress(snapshot) = &update.event else {
        return;
    };
    if let Some(percentage) = snapshot.percentage {
        bar.set_position(percentage.round() as u64);
    } else {
        bar.tick();
    }
    let mut message = format_clock(snapshot.current_time_seconds);
    if snapshot.pass_count > 1 {
        message.push_str(&format!(" pass {}/{}", snapshot.pass, snapshot.pass_count));
    }
    if let Some(speed) = snapshot.speed {
        message.push_str(&format!(" {speed:.2}x"));
    }
    if let Some(eta) = snapshot.eta_seconds {
        message.push_str(&format!(" ETA {}", format_clock(eta)));
    }
    bar.set_message(message);
}

fn format_clock(seconds: f64) -> String {
    let secs = seconds.max(0.0).round() as u64;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

fn terminal_line(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::Completed(result) => format!(
            "{} {} ({:.2}x)",
            style("✓").green(),
            result.file_name(),
            result.compression_ratio
        ),
        ProgressEvent::Failed(result) | ProgressEvent::Cancelled(result) => format!(
            "{} {} {}",
            style("✗").red(),
            result.file_name(),
            result
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default()
        ),
        ProgressEvent::Progress(_) => String::new(),
    }
}

fn print_result(result: &CompressionResult) {
    println!();
    if result.success {
        println!("{}", style(t!("compress.done")).green().bold());
        println!(
            "  {} {}",
            style(t!("compress.output")).dim(),
            result.output_path.display()
        );
        println!(
            "  {:.2} MB -> {:.2} MB ({:.2}x)",
            megabytes(result.input_size_bytes),
            megabytes(result.output_size_bytes),
            result.compression_ratio
        );
    } else if result.is_cancelled() {
        println!("{}", style(t!("common.cancelled")).yellow());
    } else if let Some(error) = &result.error {
        println!("{} {}", style(t!("common.error_prefix")).red().bold(), error);
    }
}

fn print_batch_summary(results: &[CompressionResult]) {
    let succeeded = results.iter().filter(|r| r.success).count();
    let cancelled = results.iter().filter(|r| r.is_cancelled()).count();
    let failed = results.len() - succeeded - cancelled;
    let input_total: u64 = results.iter().filter(|r| r.success).map(|r| r.input_size_bytes).sum();
    let output_total: u64 = results.iter().map(|r| r.output_size_bytes).sum();

    println!();
    println!("{}", style(t!("compress.summary_title")).cyan().bold());
    println!("  {}", t!("compress.summary_total", count = results.len()));
    println!("  {}", style(t!("compress.summary_succeeded", count = succeeded)).green());
    if cancelled > 0 {
        println!("  {}", style(t!("compress.summary_cancelled", count = cancelled)).yellow());
    }
    if failed > 0 {
        println!("  {}", style(t!("compress.summary_failed", count = failed)).red());
        for result in results.iter().filter(|r| !r.success && !r.is_cancelled()) {
            if let Some(error) = &result.error {
                println!("    {} {}", result.file_name(), style(error).dim());
            }
        }
    }
    if output_total > 0 {
        println!(
            "  {:.2} MB -> {:.2} MB",
            megabytes(input_total),
            megabytes(output_total)
        );
    }

    info!("Batch summary - succeeded: {succeeded}, failed: {failed}, cancelled: {cancelled}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0.0), "00:00:00");
        assert_eq!(format_clock(3725.4), "01:02:05");
        assert_eq!(format_clock(-3.0), "00:00:00");
    }

    #[test]
    fn test_output_path_never_overwrites_input() {
        let compressor =
            VideoCompressor::new(Config::default(), Arc::new(AtomicBool::new(false)));
        assert_eq!(
            compressor.output_path_for(Path::new("/v/clip.mp4")),
            PathBuf::from("/v/clip.webm")
        );
        assert_eq!(
            compressor.output_path_for(Path::new("/v/clip.webm")),
            PathBuf::from("/v/clip.compressed.webm")
        );
    }

    #[test]
    fn test_output_dir_setting() {
        let mut config = Config::default();
        config.settings.compressor.output_dir = Some(PathBuf::from("/out"));
        let compressor = VideoCompressor::new(config, Arc::new(AtomicBool::new(false)));
        assert_eq!(
            compressor.output_path_for(Path::new("/v/clip.mov")),
            PathBuf::from("/out/clip.webm")
        );
    }
}
