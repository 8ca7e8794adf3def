mod cli;

use mtsforge::{config, console, scan};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, ConvertArgs};
use mf_av::{FfmpegInvoker, ToolRegistry};
use mf_batch::{BatchReport, Dispatcher, JobSet, RunOptions};
use std::path::Path;
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mtsforge=debug,mf_batch=debug,mf_av=debug,mf_core=debug".to_string()
        } else {
            "mtsforge=info,mf_batch=warn,mf_av=warn,mf_core=warn".to_string()
        }
    });

    // stdout is reserved for progress and reports
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Convert(args) => convert(args, cli.config.as_deref()),
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("mtsforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn convert(args: ConvertArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Command-line flags override the file
    if let Some(workers) = args.workers {
        config.batch.workers = workers;
    }
    if let Some(ext) = args.ext {
        config.batch.target_extension = ext;
    }
    if args.keep_source {
        config.batch.delete_source = false;
    }
    config.check().context("Invalid conversion settings")?;

    let sources = scan::collect_inputs(
        &args.inputs,
        &config.batch.source_extensions,
        args.recursive,
    )?;
    if sources.is_empty() {
        anyhow::bail!(
            "No source files found (looking for: {})",
            config.batch.source_extensions.join(", ")
        );
    }

    let tools = ToolRegistry::discover(&config.encoder);
    let invoker = FfmpegInvoker::from_registry(&tools, config.encoder.clone())
        .context("ffmpeg is required for conversion")?;
    tracing::debug!("Using ffmpeg at {:?}", invoker.program());

    let job_set = JobSet::new(config.batch.target_extension.as_str());
    for source in sources {
        match job_set.add(source) {
            Ok(_) => {}
            Err(mf_core::Error::Validation(msg)) => tracing::warn!("Skipping: {msg}"),
            Err(e) => return Err(e.into()),
        }
    }

    let options = RunOptions::from(&config.batch);
    tracing::info!(
        "Converting {} file(s) with {} worker(s) ({} CPUs)",
        job_set.len(),
        options.effective_workers(),
        num_cpus::get()
    );

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(run_batch(&job_set, invoker, options, !args.json))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("\n{}", console::render_report(&report));
    }

    if !report.is_clean() {
        anyhow::bail!(
            "{} file(s) failed, {} cancelled",
            report.tally.failed,
            report.tally.cancelled
        );
    }
    Ok(())
}

async fn run_batch(
    job_set: &JobSet,
    invoker: FfmpegInvoker,
    options: RunOptions,
    show_progress: bool,
) -> Result<BatchReport> {
    let mut dispatcher = Dispatcher::new(Arc::new(invoker));
    if show_progress {
        dispatcher = dispatcher.with_sink(Arc::new(console::ConsoleSink::new()));
    }

    let handle = dispatcher.start(job_set, options)?;

    let canceller = handle.canceller();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let skipped = canceller.cancel();
            eprintln!(
                "\nCancelling: {skipped} queued file(s) skipped, waiting for conversions in progress"
            );
        }
    });

    let report = handle.wait().await?;
    interrupt.abort();
    Ok(report)
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    println!("Checking external tools...\n");

    let tools = ToolRegistry::discover(&config.encoder).check_all();
    let mut ffmpeg_ok = false;

    for tool in &tools {
        let status = if tool.available { "✓" } else { "✗" };
        if tool.name == "ffmpeg" {
            ffmpeg_ok = tool.available;
        }

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if ffmpeg_ok {
        println!("ffmpeg is available; conversions can run.");
    } else {
        println!("ffmpeg is missing. Install it or set encoder.ffmpeg_path.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    println!("✓ Configuration is valid");
    println!("  Workers: {}", config.batch.workers);
    println!(
        "  Convert: {} -> {}",
        config.batch.source_extensions.join(", "),
        config.batch.target_extension
    );
    println!("  Delete sources: {}", config.batch.delete_source);
    println!(
        "  Encoder: {} / {} ({})",
        config.encoder.video_codec, config.encoder.audio_codec, config.encoder.preset
    );

    let warnings = config.validate();
    for warning in &warnings {
        println!("  ! {}", warning);
    }

    Ok(())
}
