use std::fs::{self, File};
#[cfg(feature = "pdf")]
use std::path::Path;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
#[cfg(feature = "pdf")]
use serde::Serialize;
use simplelog::{Config, LevelFilter, WriteLogger};

use pdfpane::panic_handler;
use pdfpane::settings::Settings;
#[cfg(feature = "pdf")]
use pdfpane::viewer::{AnnotationElement, RenderEvent, TextSpan};

/// Headless PDF page viewer: renders pages into PNG snapshots with JSON
/// dumps of the text and annotation layers.
#[derive(Parser, Debug)]
#[clap(about, version)]
struct Args {
    /// The PDF file to open
    file: PathBuf,

    /// 1-based page to render first
    #[clap(short, long)]
    page: Option<u32>,

    /// Container width in CSS pixels
    #[clap(long)]
    width: Option<f64>,

    /// Container height in CSS pixels
    #[clap(long)]
    height: Option<f64>,

    /// Device pixel ratio
    #[clap(long)]
    dpr: Option<f64>,

    /// Directory receiving snapshots and layer dumps
    #[clap(short, long, default_value = "pdfpane-out")]
    out: PathBuf,

    /// Keep calling next-page until the last page
    #[clap(long)]
    walk: bool,

    /// Settings file (defaults to the user config directory)
    #[clap(long)]
    config: Option<PathBuf>,

    /// HTML skeleton overriding the built-in one
    #[clap(long)]
    template: Option<PathBuf>,

    #[clap(long, default_value = "pdfpane.log")]
    log_file: PathBuf,

    /// Log at debug level
    #[clap(short, long)]
    verbose: bool,
}

#[cfg(feature = "pdf")]
#[derive(Serialize)]
struct LayerDump<'a> {
    page: u32,
    page_count: Option<u32>,
    progress: f64,
    canvas: (u32, u32),
    text: &'a [TextSpan],
    annotations: &'a [AnnotationElement],
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    WriteLogger::init(
        level,
        Config::default(),
        File::create(&args.log_file)
            .with_context(|| format!("creating log file {:?}", args.log_file))?,
    )?;
    panic_handler::initialize_panic_handler();
    info!("running with arguments: {args:?}");

    let mut settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    apply_overrides(&mut settings, &args);

    fs::create_dir_all(&args.out)
        .with_context(|| format!("creating output directory {:?}", args.out))?;

    run(&args, &settings)
}

fn apply_overrides(settings: &mut Settings, args: &Args) {
    if let Some(page) = args.page {
        settings.initial_page = page.max(1);
    }
    if let Some(width) = args.width {
        settings.container.width = width;
    }
    if let Some(height) = args.height {
        settings.container.height = height;
    }
    if let Some(dpr) = args.dpr {
        settings.container.device_pixel_ratio = dpr;
    }
    if let Some(template) = &args.template {
        settings.template = Some(template.clone());
    }
}

#[cfg(feature = "pdf")]
fn run(args: &Args, settings: &Settings) -> Result<()> {
    use std::sync::Arc;

    use pdfpane::viewer::{FixedContainer, LifecycleEvent, MupdfEngine, PageController};

    let container = Arc::new(FixedContainer::with_device_pixel_ratio(
        settings.container.width,
        settings.container.height,
        settings.container.device_pixel_ratio,
    ));
    let options = settings.viewer_options()?;
    let mut controller = PageController::new(MupdfEngine::new(), container, options)
        .context("setting up the viewer")?;

    let out = args.out.clone();
    controller.add_event_listener(LifecycleEvent::AfterRender, move |event| {
        if event.failed {
            log::error!("Page {} did not render", event.page);
            return;
        }
        if let Err(e) = write_outputs(&out, event) {
            log::error!("Failed to write outputs for page {}: {e:#}", event.page);
        }
    });

    let info = controller
        .load_document(args.file.clone())
        .wait()
        .with_context(|| format!("opening {:?}", args.file))?;
    println!(
        "{}: {} pages{}",
        args.file.display(),
        info.page_count,
        info.title
            .map(|title| format!(" ({title})"))
            .unwrap_or_default()
    );

    if args.walk {
        while controller.page_count().is_some_and(|count| controller.page() < count) {
            let page = controller.page() + 1;
            controller
                .next_page()
                .wait()
                .with_context(|| format!("rendering page {page}"))?;
        }
    }

    controller.shutdown();
    info!("done");
    Ok(())
}

#[cfg(not(feature = "pdf"))]
fn run(_args: &Args, _settings: &Settings) -> Result<()> {
    anyhow::bail!("pdfpane was built without the `pdf` feature; no engine is available")
}

#[cfg(feature = "pdf")]
fn write_outputs(out: &Path, event: &RenderEvent<'_>) -> Result<()> {
    let viewer = event.viewer;
    let snapshot = viewer.context().snapshot();
    let png = out.join(format!("page-{:03}.png", event.page));
    snapshot
        .save(&png)
        .with_context(|| format!("saving {png:?}"))?;

    let text = viewer.regions().text_layer.lock().children.clone();
    let annotations = viewer.regions().annotation_layer.lock().children.clone();
    let dump = LayerDump {
        page: event.page,
        page_count: viewer.page_count(),
        progress: viewer.regions().progress.lock().percent,
        canvas: snapshot.dimensions(),
        text: &text,
        annotations: &annotations,
    };
    let json = out.join(format!("page-{:03}.json", event.page));
    fs::write(&json, serde_json::to_string_pretty(&dump)?)
        .with_context(|| format!("writing {json:?}"))?;

    info!(
        "Page {} -> {png:?} (background {:?})",
        event.page,
        viewer.context().pixel(0, 0)
    );
    println!("page {} -> {}", event.page, png.display());
    Ok(())
}
