use crate::config::save::save_settings;
use crate::config::types::{Config, Language};
use crate::menu::handlers::{run_batch_compression, run_list_presets, run_single_compression};
use anyhow::Result;
use console::{Term, style};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Select};
use rust_i18n::t;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

const MAX_WORKER_LIMIT: usize = 16;

pub fn show_main_menu(
    term: &Term,
    shutdown_signal: &Arc<AtomicBool>,
    config: &mut Config,
) -> Result<bool> {
    term.clear_screen()?;

    println!("{}", style(t!("main_menu.title")).cyan().bold());
    println!("{}", style(t!("common.esc_hint")).dim());

    let options = vec![
        t!("main_menu.opt_single"),
        t!("main_menu.opt_batch"),
        t!("main_menu.opt_presets"),
        t!("main_menu.opt_settings"),
        t!("main_menu.exit"),
    ];

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("main_menu.prompt"))
        .items(&options)
        .default(0)
        .interact_on_opt(term)?;

    match selection {
        Some(0) => {
            run_single_compression(term, shutdown_signal, config)?;
            Ok(true)
        }
        Some(1) => {
            run_batch_compression(term, shutdown_signal, config)?;
            Ok(true)
        }
        Some(2) => {
            run_list_presets(term, config)?;
            Ok(true)
        }
        Some(3) => {
            show_settings_menu(term, config)?;
            Ok(true)
        }
        // exit or ESC
        _ => Ok(false),
    }
}

fn show_settings_menu(term: &Term, config: &mut Config) -> Result<()> {
    loop {
        term.clear_screen()?;

        println!("{}", style(t!("settings.title")).cyan().bold());
        println!("{}", style(t!("common.esc_hint")).dim());

        let compressor = &config.settings.compressor;
        let output_dir = compressor
            .output_dir
            .as_ref()
            .map_or_else(
                || t!("settings.output_dir.beside_input").to_string(),
                |p| p.display().to_string(),
            );
        let options = vec![
            format!("{} [{}]", t!("settings.opt_default_preset"), compressor.default_preset),
            format!("{} [{}]", t!("settings.opt_workers"), compressor.max_workers),
            format!(
                "{} [{}]",
                t!("settings.opt_alpha"),
                if compressor.preserve_alpha_when_detected {
                    t!("common.on")
                } else {
                    t!("common.off")
                }
            ),
            format!("{} [{output_dir}]", t!("settings.opt_output_dir")),
            format!("{} [{}]", t!("settings.opt_language"), config.settings.language),
            t!("settings.back").to_string(),
        ];

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt(t!("settings.prompt"))
            .items(&options)
            .default(0)
            .interact_on_opt(term)?;

        let changed = match selection {
            Some(0) => select_default_preset(term, config)?,
            Some(1) => input_worker_count(config)?,
            Some(2) => {
                let compressor = &mut config.settings.compressor;
                compressor.preserve_alpha_when_detected = !compressor.preserve_alpha_when_detected;
                true
            }
            Some(3) => input_output_dir(config)?,
            Some(4) => select_language(term, config)?,
            _ => break,
        };

        if changed {
            save_settings(&config.settings)?;
            println!("\n{}", style(t!("settings.saved")).green());
            thread::sleep(Duration::from_millis(600));
        }
    }

    Ok(())
}

fn select_default_preset(term: &Term, config: &mut Config) -> Result<bool> {
    let presets = config.preset_registry().list();
    let items: Vec<String> = presets
        .iter()
        .map(|(name, label)| format!("{name:<14} {label}"))
        .collect();
    let default_index = presets
        .iter()
        .position(|(name, _)| name == &config.settings.compressor.default_preset)
        .unwrap_or(0);

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("settings.default_preset_prompt"))
        .items(&items)
        .default(default_index)
        .interact_on_opt(term)?;

    let Some(index) = selection else {
        return Ok(false);
    };
    let name = presets[index].0.clone();
    if name == config.settings.compressor.default_preset {
        return Ok(false);
    }
    config.settings.compressor.default_preset = name;
    Ok(true)
}

fn input_worker_count(config: &mut Config) -> Result<bool> {
    let current = config.settings.compressor.max_workers;
    let workers: usize = Input::new()
        .with_prompt(t!("settings.workers_prompt", max = MAX_WORKER_LIMIT))
        .default(current)
        .validate_with(|value: &usize| -> Result<(), String> {
            if (1..=MAX_WORKER_LIMIT).contains(value) {
                Ok(())
            } else {
                Err(t!("settings.workers_invalid", max = MAX_WORKER_LIMIT).to_string())
            }
        })
        .interact_text()?;
    if workers == current {
        return Ok(false);
    }
    config.settings.compressor.max_workers = workers;
    Ok(true)
}

fn input_output_dir(config: &mut Config) -> Result<bool> {
    let current = config
        .settings
        .compressor
        .output_dir
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let value: String = Input::new()
        .with_prompt(t!("settings.output_dir.prompt"))
        .with_initial_text(current)
        .allow_empty(true)
        .interact_text()?;
    let value = value.trim();
    let output_dir = (!value.is_empty()).then(|| PathBuf::from(value));
    if output_dir == config.settings.compressor.output_dir {
        return Ok(false);
    }
    config.settings.compressor.output_dir = output_dir;
    Ok(true)
}

fn select_language(term: &Term, config: &mut Config) -> Result<bool> {
    let languages = [Language::English, Language::TraditionalChinese];
    let items: Vec<String> = languages.iter().map(ToString::to_string).collect();
    let default_index = languages
        .iter()
        .position(|&l| l == config.settings.language)
        .unwrap_or(0);

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("settings.language_prompt"))
        .items(&items)
        .default(default_index)
        .interact_on_opt(term)?;

    let Some(index) = selection else {
        return Ok(false);
    };
    let selected = languages[index];
    if selected == config.settings.language {
        return Ok(false);
    }
    config.settings.language = selected;
    rust_i18n::set_locale(selected.as_str());
    Ok(true)
}
