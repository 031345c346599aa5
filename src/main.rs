use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use panelwatch::config::{load_app_config, load_regions_config, validate_all};
use panelwatch::parser::{scan_entries, Disposition};
use panelwatch::platforms::create_engine;
use panelwatch::{Watchdog, WatchdogError};

#[derive(Parser)]
#[command(name = "panelwatch", about = "OCR-driven supervisor for the panel application")]
struct Cli {
    /// Window identity, layout and timing configuration.
    #[arg(long, default_value = "config/app.yaml")]
    app_config: PathBuf,

    /// Screen regions, click targets and executable paths.
    #[arg(long, default_value = "config/regions.yaml")]
    regions_config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the supervision loop.
    Run,
    /// Validate both configuration files and report every problem found.
    CheckConfig,
    /// Capture the log region once, OCR it, and show how each timestamp
    /// candidate was parsed and classified.
    Diagnose,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run => run(&cli.app_config, &cli.regions_config).await,
        Command::CheckConfig => check_config(&cli.app_config, &cli.regions_config),
        Command::Diagnose => diagnose(&cli.app_config, &cli.regions_config).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(app_path: &Path, regions_path: &Path) -> anyhow::Result<()> {
    let logs_dir = PathBuf::from("logs");
    std::fs::create_dir_all(&logs_dir)
        .with_context(|| format!("creating log directory {}", logs_dir.display()))?;

    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let file_appender =
        tracing_appender::rolling::never(&logs_dir, format!("watchdog_{stamp}.log"));
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    let app = load_app_config(app_path)
        .with_context(|| format!("loading {}", app_path.display()))?;
    let regions = load_regions_config(regions_path)
        .with_context(|| format!("loading {}", regions_path.display()))?;
    validate_all(&app, &regions)?;
    info!(
        app = %app_path.display(),
        regions = %regions_path.display(),
        "configuration loaded"
    );

    let engine = create_engine()?;
    let mut watchdog = Watchdog::new(engine, app, regions, logs_dir);
    watchdog.run().await?;
    Ok(())
}

fn check_config(app_path: &Path, regions_path: &Path) -> anyhow::Result<()> {
    let app = load_app_config(app_path)
        .with_context(|| format!("loading {}", app_path.display()))?;
    let regions = load_regions_config(regions_path)
        .with_context(|| format!("loading {}", regions_path.display()))?;

    let mut problems = app.validate();
    problems.extend(regions.validate());

    // Structural validation cannot know the filesystem; check the paths
    // the loop will need at runtime.
    if !regions.panel.dir.is_dir() {
        problems.push(format!(
            "panel.dir does not exist: {}",
            regions.panel.dir.display()
        ));
    }
    if let Some(route) = &regions.steam_route {
        if let Some(exe) = &route.exe {
            if route.launch_with_panel && !exe.is_file() {
                problems.push(format!("steam_route.exe does not exist: {}", exe.display()));
            }
        }
    }

    if problems.is_empty() {
        println!("configuration ok");
        Ok(())
    } else {
        for problem in &problems {
            println!("problem: {problem}");
        }
        Err(WatchdogError::InvalidConfiguration(format!(
            "{} problem(s) found",
            problems.len()
        ))
        .into())
    }
}

async fn diagnose(app_path: &Path, regions_path: &Path) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app = load_app_config(app_path)?;
    let regions = load_regions_config(regions_path)?;
    validate_all(&app, &regions)?;

    let engine = create_engine()?;
    let window = engine
        .find_window_by_title(&app.window.title_substring)?
        .ok_or_else(|| {
            WatchdogError::WindowNotFound(format!(
                "no window matching '{}'",
                app.window.title_substring
            ))
        })?;
    println!("window: '{}' (pid {})", window.title, window.pid);

    let (client_w, client_h) = engine.client_size(window.id)?;
    let region = if let Some(pct) = &regions.log_region_pct {
        pct.to_client_rect(client_w, client_h)
    } else if let Some(rect) = &regions.log_region {
        *rect
    } else {
        return Err(WatchdogError::InvalidConfiguration(
            "no log region configured".to_string(),
        )
        .into());
    };
    println!(
        "log region: {}x{} at ({}, {}) in a {}x{} client area",
        region.w, region.h, region.x, region.y, client_w, client_h
    );

    let shot = engine.capture_client_region(window.id, region).await?;
    let text = engine.ocr_screenshot(&shot).await?;
    println!("--- normalized OCR text ---");
    println!("{}", panelwatch::normalize::normalize_ocr_text(&text));
    println!("--- candidates ---");

    let candidates = scan_entries(&text);
    if candidates.is_empty() {
        println!("(no timestamp-shaped tokens found)");
        return Ok(());
    }
    let mut best: Option<&panelwatch::parser::Candidate> = None;
    for candidate in &candidates {
        println!(
            "{:02}:{:02}  age {:6.1} min  {:?}  '{}'",
            candidate.hour,
            candidate.minute,
            candidate.age_minutes,
            candidate.disposition,
            candidate.message
        );
        if candidate.disposition == Disposition::Accepted
            && best.map(|b| candidate.age_minutes < b.age_minutes).unwrap_or(true)
        {
            best = Some(candidate);
        }
    }
    match best {
        Some(candidate) => println!(
            "selected: {:02}:{:02} | {}",
            candidate.hour, candidate.minute, candidate.message
        ),
        None => println!("selected: none (all candidates filtered out)"),
    }
    Ok(())
}
