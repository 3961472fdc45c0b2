//! Bisub - Bilingual Subtitle Pipeline
//!
//! Command-line entry point: runs whole jobs with live progress, or single
//! steps (translate, retranslate, burn) on existing files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{Level, info};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use bisub::app::{AppContext, SubmitMode};
use bisub::cli::{Args, Commands};
use bisub::config::Config;
use bisub::job::{JobEvent, JobRequest, OutputKind};
use bisub::media::{FfmpegProcessor, MediaProcessor};
use bisub::source::SourceRef;
use bisub::subtitle::{self, Subtitle, srt};
use bisub::translate::{
    ChatCompletionsClient, LanguagePair, RetranslateEntry, SubtitleTranslator,
};

const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}/{len} {msg}";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Process {
            url,
            file,
            source_lang,
            target_lang,
            start,
            end,
            burn,
            output_dir,
        } => {
            let source = match (url, file) {
                (_, Some(path)) => SourceRef::Local(path),
                (Some(url), None) => SourceRef::Remote(url),
                (None, None) => bail!("either a URL or --file is required"),
            };
            let request = JobRequest {
                source,
                source_lang,
                target_lang,
                start,
                end,
            };
            let output_dir = match output_dir {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            process(config, request, burn, &output_dir).await?;
        }
        Commands::Translate {
            input,
            output,
            source_lang,
            target_lang,
        } => {
            info!("Translating subtitles: {}", input.display());
            let translator = translator(&config)?;
            let original = read_srt(&input).await?;
            let languages = LanguagePair::new(source_lang, target_lang);

            let pb = progress_bar(original.len() as u64)?;
            let translated = translator
                .translate_subtitle(&original, &languages, None, &mut |done: usize, total: usize| {
                    pb.set_length(total as u64);
                    pb.set_position(done as u64);
                })
                .await?;
            pb.finish_with_message("translated");

            let bilingual = subtitle::merge(&original, &translated)?;
            tokio::fs::write(&output, srt::serialize(&bilingual)).await?;
            println!("Wrote {}", output.display());
        }
        Commands::Retranslate {
            original,
            translated,
            indices,
            hint,
            output,
            source_lang,
            target_lang,
        } => {
            let translator = translator(&config)?;
            let original_sub = read_srt(&original).await?;
            let translated_sub = read_srt(&translated).await?;
            if original_sub.len() != translated_sub.len() {
                bail!(
                    "{} has {} entries but {} has {}",
                    original.display(),
                    original_sub.len(),
                    translated.display(),
                    translated_sub.len()
                );
            }

            let rows: Vec<RetranslateEntry> = original_sub
                .iter()
                .zip(translated_sub.iter())
                .map(|(o, t)| RetranslateEntry::new(o.index(), o.text(), t.text()))
                .collect();
            let languages = LanguagePair::new(source_lang, target_lang);
            let updates = translator
                .retranslate(&rows, &indices, &languages, hint.as_deref(), None)
                .await?;

            for (index, text) in &updates {
                println!("{:>4}: {}", index, text);
            }
            let updated = apply_updates(translated_sub, &updates)?;
            let output = output.unwrap_or(translated);
            tokio::fs::write(&output, srt::serialize(&updated)).await?;
            println!("Wrote {}", output.display());
        }
        Commands::Burn {
            video,
            subtitles,
            output,
        } => {
            info!("Burning subtitles into video: {}", video.display());
            let media = FfmpegProcessor::new(config.media.clone());
            media.burn_subtitles(&video, &subtitles, &output).await?;
            println!("Wrote {}", output.display());
        }
        Commands::Check => {
            let media = FfmpegProcessor::new(config.media.clone());
            media.check_availability().await?;
            println!(
                "ffmpeg ({}) and ffprobe ({}) are available",
                config.media.ffmpeg_path, config.media.ffprobe_path
            );
        }
    }

    Ok(())
}

/// Run one job to completion, rendering its events, then copy its outputs.
async fn process(config: Config, request: JobRequest, burn: bool, output_dir: &Path) -> Result<()> {
    let keepalive = config.jobs.keepalive();
    let ctx = AppContext::new(config)?;
    let cleanup = ctx.spawn_cleanup();

    let id = ctx.submit(request, SubmitMode::Full { burn })?;
    info!(job_id = %id, "Processing job");
    let outbox = ctx.events(&id)?;

    let pb = progress_bar(100)?;
    loop {
        match outbox.recv_or_keepalive(keepalive).await {
            JobEvent::Progress {
                progress,
                current_step,
                message,
                ..
            } => {
                pb.set_position(progress as u64);
                pb.set_message(format!("{}: {}", current_step, message));
            }
            JobEvent::DownloadComplete {
                progress,
                title,
                duration,
                width,
                height,
                ..
            } => {
                pb.set_position(progress as u64);
                pb.println(format!(
                    "Acquired \"{}\" ({:.1}s, {}x{})",
                    title, duration, width, height
                ));
            }
            JobEvent::Complete { .. } => {
                pb.finish_with_message("done");
                break;
            }
            JobEvent::Error {
                code,
                message,
                detail,
            } => {
                pb.abandon_with_message(message.clone());
                cleanup.abort();
                bail!("{} [{}]: {}", message, code, detail);
            }
            JobEvent::Ping => pb.tick(),
        }
    }
    cleanup.abort();

    let snapshot = ctx.status(&id)?;
    tokio::fs::create_dir_all(output_dir).await?;
    for kind in [OutputKind::Srt, OutputKind::Ass, OutputKind::Video] {
        let Some(path) = snapshot.outputs.get(&kind) else {
            continue;
        };
        let target = output_path(output_dir, &id, path);
        tokio::fs::copy(path, &target)
            .await
            .with_context(|| format!("copying {} to {}", path.display(), target.display()))?;
        println!("Wrote {}", target.display());
    }
    Ok(())
}

fn output_path(output_dir: &Path, job_id: &str, produced: &Path) -> PathBuf {
    let name = produced
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output_dir.join(format!("{}_{}", job_id, name))
}

fn translator(config: &Config) -> Result<SubtitleTranslator> {
    let model = ChatCompletionsClient::new(config.translate.clone())?;
    Ok(SubtitleTranslator::new(Arc::new(model), config.translate.clone()))
}

async fn read_srt(path: &Path) -> Result<Subtitle> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(srt::parse(&content)?)
}

fn apply_updates(translated: Subtitle, updates: &BTreeMap<usize, String>) -> Result<Subtitle> {
    let entries = translated
        .into_entries()
        .into_iter()
        .map(|entry| match updates.get(&entry.index()) {
            Some(text) => entry.with_text(text.as_str()),
            None => Ok(entry),
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Subtitle::new(entries)?)
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(PROGRESS_TEMPLATE)?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".bisub").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "bisub.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("bisub.log").display()
    );

    Ok(())
}
