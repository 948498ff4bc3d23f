// =============================================================================
// SHADER ARCHIVE PATCHER
// =============================================================================
//
// Reads config.toml, decodes the input archive, runs every [[patch]] job
// against it, and writes the result when an output path is configured.
//
// FLOW:
//   config.toml -> Container::open -> resolve program -> recompile stage
//               -> replace code -> Container::save

mod config;

use anyhow::{Context, Result};
use config::{Config, PatchJob};
use shader_archive::{patch_program, Container, ExternalCompiler};
use std::fs::OpenOptions;
use std::io::Write;

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting shader archive patcher");
    log::info!("Input: {:?}", config.archive.input);

    let mut container = Container::open(&config.archive.input)?;
    log::info!(
        "Archive '{}' holds {} models: {:?}",
        container.name,
        container.models.len(),
        container.models.keys().collect::<Vec<_>>()
    );

    let mut compiler = ExternalCompiler::new(&config.compiler.program);
    compiler.timeout = config.compiler.timeout();
    compiler.scratch_root = config.compiler.scratch_dir.clone();

    let mut fallbacks = 0;
    for job in &config.patches {
        if !run_job(&mut container, &compiler, job)? {
            fallbacks += 1;
        }
    }
    if fallbacks > 0 {
        log::warn!("{} of {} patch jobs kept their original code", fallbacks, config.patches.len());
    }

    match &config.archive.output {
        Some(output) => container.save(output)?,
        None => log::info!("No output path configured, nothing written"),
    }
    Ok(())
}

/// Runs one job. Returns false when the compiler failed and the original code was kept.
fn run_job(container: &mut Container, compiler: &ExternalCompiler, job: &PatchJob) -> Result<bool> {
    let source = std::fs::read_to_string(&job.source)
        .with_context(|| format!("Failed to read shader source: {:?}", job.source))?;
    let model = container
        .model_mut(&job.model)
        .with_context(|| format!("Patch job for {:?}", job.source))?;

    let macros = (!job.macros.is_empty()).then_some(&job.macros);
    let (program, output) = patch_program(model, compiler, &job.options, job.stage, &source, macros)
        .with_context(|| format!("Failed to patch model '{}'", job.model))?;

    for message in &output.messages {
        log::info!("[{}] {}", job.model, message);
    }
    if let Some(reason) = &output.fallback {
        log::warn!("Model '{}' program {}: {}", job.model, program, reason);
        return Ok(false);
    }
    log::info!("Model '{}' program {}: {:?} stage replaced", job.model, program, job.stage);
    Ok(true)
}

/// Initialize env_logger and optionally start a fresh log file
fn init_logging(config: &Config) {
    use env_logger::Builder;

    // Config level first so RUST_LOG can still override it
    let mut builder = Builder::new();
    builder.filter_level(config.logging.level_filter());
    builder.parse_default_env();
    builder.init();

    // Create/clear log file if enabled
    if config.logging.log_to_file {
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.logging.log_file)
        {
            let _ = writeln!(file, "=== Shader Archive Patcher Log ===");
            let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
            let _ = writeln!(file, "Input: {:?}", config.archive.input);
            let _ = writeln!(file);
        }
    }
}
