//! tramid - staged IR middle end
//!
//! Reads stage-1/2 module trees as JSON, lowers them to stage 3, runs the
//! optimizer and writes the lowered tree (and optionally a legacy-shaped
//! copy) for the code generators.

mod feedback;
mod middle;
mod stdlib;
mod types;
mod utils;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use log::{error, info};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use feedback::{OptimizationReport, UnitFeedback, UnitStats};
use middle::ir::{DispatchMode, Module, STAGE_SYNTAX, STAGE_TYPED};
use middle::ir_printer::print_ir;
use middle::legacy::normalize_to_legacy;
use middle::lower::{promote_to_stage2, Lowerer};
use middle::optimize::{optimize_module, OptimizerConfig, DEFAULT_REWRITE_BUDGET};
use types::SharedTypeRegistry;

/// Staged IR middle end
#[derive(Parser, Debug)]
#[command(name = "tramid")]
#[command(version = "0.1.0")]
#[command(about = "Lower and optimize module trees for the transpiler backends")]
struct Cli {
    /// Input module trees (JSON)
    #[arg(value_name = "FILE", required = true)]
    inputs: Vec<PathBuf>,

    /// Optimization level (0-2)
    #[arg(short = 'O', long = "opt-level", default_value = "1")]
    opt_level: String,

    /// Pass overrides, e.g. "+LoopInvariantHoistLitePass,-NoOpCastCleanupPass"
    #[arg(long = "opt-pass", default_value = "")]
    opt_pass: String,

    /// Target language recorded in the trace
    #[arg(long, default_value = "")]
    target_lang: String,

    /// Which trees to write
    #[arg(long, value_enum, default_value_t = Emit::Stage3)]
    emit: Emit,

    /// Output directory (defaults to each input's directory)
    #[arg(short = 'o', long = "out-dir", value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Write the optimizer trace next to the output
    #[arg(long, value_enum)]
    trace: Option<TraceFormat>,

    /// Print each tree before optimization
    #[arg(long)]
    dump_before: bool,

    /// Override the dispatch mode recorded in the module metadata
    #[arg(long, value_enum)]
    dispatch_mode: Option<DispatchArg>,

    /// Print one JSON feedback record per unit on stdout
    #[arg(long)]
    feedback: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Emit {
    Stage3,
    Legacy,
    Both,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum TraceFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DispatchArg {
    Native,
    TypeId,
}

impl From<DispatchArg> for DispatchMode {
    fn from(arg: DispatchArg) -> Self {
        match arg {
            DispatchArg::Native => DispatchMode::Native,
            DispatchArg::TypeId => DispatchMode::TypeId,
        }
    }
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let config = OptimizerConfig {
        opt_level: cli.opt_level.clone(),
        pass_spec: cli.opt_pass.clone(),
        target_lang: cli.target_lang.clone(),
        debug_flags: Default::default(),
        rewrite_budget: DEFAULT_REWRITE_BUDGET,
    };
    let registry = SharedTypeRegistry::new();

    // Reject bad configuration before any unit is read
    if let Err(e) = config.to_context(&registry) {
        eprintln!("Error: {}", e);
        process::exit(2);
    }

    let results: Vec<_> = cli
        .inputs
        .par_iter()
        .map(|input| run_unit(input, &cli, &config, &registry))
        .collect();

    let mut failed = 0;
    for (input, result) in cli.inputs.iter().zip(results) {
        match result {
            Ok(unit) => {
                if cli.feedback {
                    println!("{}", unit.to_json_compact());
                }
                if !unit.success {
                    failed += 1;
                }
            }
            Err(e) => {
                error!("{}: {:#}", input.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        eprintln!("{} of {} unit(s) failed", failed, cli.inputs.len());
        process::exit(1);
    }
}

/// Run one unit; middle-end failures come back as failed feedback, I/O
/// failures as errors
fn run_unit(
    input: &Path,
    cli: &Cli,
    config: &OptimizerConfig,
    registry: &SharedTypeRegistry,
) -> anyhow::Result<UnitFeedback> {
    let name = input.display().to_string();
    info!("processing {}", name);
    let total = Instant::now();

    let text = fs::read_to_string(input).with_context(|| format!("reading {}", name))?;
    let mut stats = UnitStats::default();

    let (module, report) = match compile_unit(&text, cli, config, registry, &mut stats) {
        Ok(done) => done,
        Err(e) => {
            error!("{}: {}", name, e);
            stats.total_time_ms = total.elapsed().as_secs_f64() * 1000.0;
            return Ok(UnitFeedback::failure(name, &e, stats));
        }
    };

    write_outputs(input, cli, &module, &report)?;
    stats.total_time_ms = total.elapsed().as_secs_f64() * 1000.0;
    info!(
        "{}: {} rewrite(s) in {:.3} ms",
        name, report.change_count, stats.total_time_ms
    );
    Ok(UnitFeedback::success(name, stats, report))
}

/// Parse, lower to stage 3 and optimize
fn compile_unit(
    text: &str,
    cli: &Cli,
    config: &OptimizerConfig,
    registry: &SharedTypeRegistry,
    stats: &mut UnitStats,
) -> utils::Result<(Module, OptimizationReport)> {
    let mut module = Module::from_json(text)?;

    let lower_start = Instant::now();
    if module.east_stage == STAGE_SYNTAX {
        module = promote_to_stage2(module)?;
    }
    if module.east_stage == STAGE_TYPED {
        let mut lowerer = Lowerer::new(registry);
        if let Some(mode) = cli.dispatch_mode {
            lowerer = lowerer.with_dispatch_mode(mode.into());
        }
        module = lowerer.lower(module)?;
        stats.class_count = lowerer.registered_classes().len();
    }
    stats.lower_time_ms = lower_start.elapsed().as_secs_f64() * 1000.0;
    stats.stmt_count = module.body.len();

    if cli.dump_before {
        println!("{}", print_ir(&module));
    }

    let opt_start = Instant::now();
    let report = optimize_module(&mut module, config, registry, None)?;
    stats.optimize_time_ms = opt_start.elapsed().as_secs_f64() * 1000.0;
    Ok((module, report))
}

fn output_path(input: &Path, cli: &Cli, suffix: &str) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("module");
    let stem = stem.strip_suffix(".east").unwrap_or(stem);
    let dir = match &cli.out_dir {
        Some(dir) => dir.clone(),
        None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    dir.join(format!("{}.{}", stem, suffix))
}

fn write_file(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
}

fn write_outputs(input: &Path, cli: &Cli, module: &Module, report: &OptimizationReport) -> anyhow::Result<()> {
    if matches!(cli.emit, Emit::Stage3 | Emit::Both) {
        write_file(&output_path(input, cli, "east3.json"), &module.to_json()?)?;
    }
    if matches!(cli.emit, Emit::Legacy | Emit::Both) {
        let legacy = normalize_to_legacy(module, STAGE_TYPED);
        write_file(&output_path(input, cli, "east2.json"), &legacy.to_json()?)?;
    }
    match cli.trace {
        Some(TraceFormat::Text) => write_file(&output_path(input, cli, "trace.txt"), &report.render_trace())?,
        Some(TraceFormat::Json) => write_file(&output_path(input, cli, "trace.json"), &report.to_json())?,
        None => {}
    }
    Ok(())
}
