//! Immich OCR loop
//!
//! Attaches to a Chromium page over the DevTools protocol and runs the
//! capture → OCR → inject → navigate loop against it, with single-step
//! controls on stdin.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use immich_ocr_loop::automation::{
    spawn_loop, AutomationConfig, Collaborators, LoopEvent, LoopHandle, TesseractMode,
};
use immich_ocr_loop::capture::{CaptureTarget, Region, RegionStore};
use immich_ocr_loop::ocr::{ocr_capture, Normalizer, TesseractEngine};
use immich_ocr_loop::page::{CdpPage, PageRenderer};
use immich_ocr_loop::{logging, paths};

#[derive(Parser)]
#[command(name = "immich-ocr-loop")]
#[command(about = "Reads usernames off Immich photos and writes them into their descriptions")]
#[command(version)]
struct Cli {
    /// Config file (defaults to config.json next to the executable)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach to the browser and accept control commands on stdin
    Run {
        /// DevTools endpoint, overrides debugger_url from the config
        #[arg(long, env = "IMMICH_OCR_DEBUGGER_URL")]
        debugger: Option<String>,
        /// Open this URL in a new tab instead of using the current one
        #[arg(long)]
        url: Option<String>,
        /// Start the loop as soon as the page is attached
        #[arg(long)]
        start: bool,
        /// Capture the whole page instead of the remembered region
        #[arg(long)]
        full_page: bool,
        /// Wait after navigating before capturing (ms)
        #[arg(long)]
        capture_delay: Option<u64>,
        /// Wait after writing before navigating (ms)
        #[arg(long)]
        save_delay: Option<u64>,
    },
    /// Show, set or clear the remembered capture region
    Region {
        #[command(subcommand)]
        action: RegionAction,
    },
    /// Run OCR on an image file and print what would be written
    Ocr {
        image: PathBuf,
        /// Segmentation mode, overrides tesseract_mode from the config
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        /// Treat the image as a whole-page capture
        #[arg(long)]
        full_page: bool,
    },
}

#[derive(Subcommand)]
enum RegionAction {
    Show,
    /// Region as X,Y,WIDTH,HEIGHT
    Set { region: Region },
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Auto,
    Sparse,
    Block,
}

impl From<ModeArg> for TesseractMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Auto => TesseractMode::Auto,
            ModeArg::Sparse => TesseractMode::Sparse,
            ModeArg::Block => TesseractMode::Block,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    paths::ensure_directories().context("Failed to create data directories")?;
    logging::init_logging(paths::get_logs_dir(), &cli.log_level);
    logging::install_panic_hook();

    let config_path = cli.config.clone().unwrap_or_else(paths::get_config_path);
    let config = AutomationConfig::load(&config_path);
    let store = RegionStore::new(paths::get_region_path());

    match cli.command {
        Commands::Run {
            debugger,
            url,
            start,
            full_page,
            capture_delay,
            save_delay,
        } => {
            let mut config = AutomationConfig {
                debugger_url: debugger.unwrap_or(config.debugger_url.clone()),
                full_page: config.full_page || full_page,
                capture_delay_ms: capture_delay.unwrap_or(config.capture_delay_ms),
                save_delay_ms: save_delay.unwrap_or(config.save_delay_ms),
                ..config
            };
            config = config.sanitize();
            run(config, store, url.as_deref(), start).await
        }
        Commands::Region { action } => region_command(action, &store),
        Commands::Ocr {
            image,
            mode,
            full_page,
        } => ocr_file(&config, image, mode, full_page),
    }
}

fn region_command(action: RegionAction, store: &RegionStore) -> Result<()> {
    match action {
        RegionAction::Show => match store.load() {
            Some(region) => println!("{}", region),
            None => println!("No region remembered ({})", store.path().display()),
        },
        RegionAction::Set { region } => {
            store.save(&region)?;
            println!("Remembered {}", region);
        }
        RegionAction::Clear => {
            store.clear()?;
            println!("Region cleared");
        }
    }
    Ok(())
}

fn ocr_file(
    config: &AutomationConfig,
    image: PathBuf,
    mode: Option<ModeArg>,
    full_page: bool,
) -> Result<()> {
    let img = image::open(&image)
        .with_context(|| format!("Failed to open {}", image.display()))?
        .to_rgba8();

    let target = if full_page {
        CaptureTarget::FullPage
    } else {
        CaptureTarget::Region(Region::new(0, 0, img.width(), img.height())?)
    };
    let mode = mode
        .map(TesseractMode::from)
        .unwrap_or(config.tesseract_mode)
        .resolve(&target);
    let normalizer = Normalizer::from_config(config, full_page);
    let engine = TesseractEngine::from_config(config);

    let result = ocr_capture(img, mode, &engine, &normalizer);
    println!("Raw text: {:?}", result.raw_text);
    println!("Token:    {}", result.token);
    if let Some(failure) = &result.failure {
        println!("Failure:  {}", failure);
    }
    if let Err(reason) = normalizer.validate_token(result.token.as_str()) {
        println!("Rejected: {}", reason);
    }
    Ok(())
}

async fn run(
    config: AutomationConfig,
    store: RegionStore,
    open_url: Option<&str>,
    start: bool,
) -> Result<()> {
    let page = Arc::new(CdpPage::connect(&config.debugger_url, open_url).await?);
    let renderer: Arc<dyn PageRenderer> = page.clone();

    let (handle, task) = spawn_loop(
        config.clone(),
        Collaborators {
            renderer,
            capturer: page,
            extractor: Box::new(TesseractEngine::from_config(&config)),
            region_store: Some(store),
        },
    )?;

    tokio::spawn(print_events(handle.subscribe()));

    if start {
        if let Err(e) = handle.start().await {
            error!("Could not start loop: {}", e);
        }
    }

    println!("Commands: start, stop, ocr, write [text], next, region X,Y,W,H, clear, full on|off, status, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match parse_control(&line) {
                    Ok(None) => continue,
                    Ok(Some(Control::Quit)) => break,
                    Ok(Some(control)) => {
                        if let Err(e) = apply(&handle, control).await {
                            warn!("{}", e);
                        }
                    }
                    Err(e) => println!("{}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    let _ = handle.stop().await;
    handle.shutdown();
    let _ = task.await;
    Ok(())
}

/// One line typed on stdin.
#[derive(Debug, PartialEq)]
enum Control {
    Start,
    Stop,
    Capture,
    Write(Option<String>),
    Next,
    SetRegion(Region),
    ClearRegion,
    FullPage(bool),
    Status,
    Quit,
}

fn parse_control(line: &str) -> Result<Option<Control>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let control = match word.to_lowercase().as_str() {
        "start" => Control::Start,
        "stop" => Control::Stop,
        "ocr" | "capture" => Control::Capture,
        "write" => Control::Write((!rest.is_empty()).then(|| rest.to_string())),
        "next" => Control::Next,
        "region" => Control::SetRegion(rest.parse().context("usage: region X,Y,W,H")?),
        "clear" => Control::ClearRegion,
        "full" => match rest {
            "on" => Control::FullPage(true),
            "off" => Control::FullPage(false),
            _ => bail!("usage: full on|off"),
        },
        "status" => Control::Status,
        "quit" | "exit" => Control::Quit,
        other => return Err(anyhow!("Unknown command: {}", other)),
    };
    Ok(Some(control))
}

async fn apply(handle: &LoopHandle, control: Control) -> Result<()> {
    match control {
        Control::Start => handle.start().await?,
        Control::Stop => {
            if !handle.stop().await? {
                println!("Loop is not running");
            }
        }
        Control::Capture => {
            let result = handle.capture_once().await?;
            println!("OCR: {:?} -> {}", result.raw_text, result.token);
        }
        Control::Write(text) => {
            let outcome = handle.inject_once(text).await?;
            println!("Write: {:?}", outcome);
        }
        Control::Next => {
            handle.navigate_once().await?;
        }
        Control::SetRegion(region) => handle.set_region(Some(region)).await?,
        Control::ClearRegion => handle.set_region(None).await?,
        Control::FullPage(enabled) => handle.set_full_page(enabled).await?,
        Control::Status => println!("{}", handle.status().await?),
        Control::Quit => {}
    }
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<LoopEvent>) {
    loop {
        match events.recv().await {
            Ok(LoopEvent::StateChanged(state)) => println!("[{}]", state),
            Ok(LoopEvent::TextExtracted { raw_text, token }) => {
                println!("  OCR {:?} -> {}", raw_text, token)
            }
            Ok(LoopEvent::Injected { token, confirmed }) => {
                println!("  wrote {} ({})", token, if confirmed { "ok" } else { "not written" })
            }
            Ok(LoopEvent::Rejected(reason)) => println!("  rejected: {}", reason),
            Ok(LoopEvent::Error(e)) => println!("  error: {}", e),
            Ok(LoopEvent::RegionChanged(Some(region))) => println!("  region {}", region),
            Ok(LoopEvent::RegionChanged(None)) => println!("  region cleared"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("Missed {} events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control() {
        assert_eq!(parse_control("  ").unwrap(), None);
        assert_eq!(parse_control("START").unwrap(), Some(Control::Start));
        assert_eq!(parse_control("write").unwrap(), Some(Control::Write(None)));
        assert_eq!(
            parse_control("write zoe 99").unwrap(),
            Some(Control::Write(Some("zoe 99".into())))
        );
        assert_eq!(
            parse_control("region 1,2,30,40").unwrap(),
            Some(Control::SetRegion(Region::new(1, 2, 30, 40).unwrap()))
        );
        assert_eq!(parse_control("full on").unwrap(), Some(Control::FullPage(true)));
    }

    #[test]
    fn test_parse_control_errors() {
        assert!(parse_control("region 1,2").is_err());
        assert!(parse_control("region 0,0,0,10").is_err());
        assert!(parse_control("full maybe").is_err());
        assert!(parse_control("dance").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["immich-ocr-loop", "region", "set", "5,6,70,20"]).unwrap();
        match cli.command {
            Commands::Region {
                action: RegionAction::Set { region },
            } => assert_eq!(region, Region::new(5, 6, 70, 20).unwrap()),
            _ => panic!("wrong subcommand"),
        }
    }
}
