use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use tracing::Level;

use patchflow::config::RuntimeConfig;
use patchflow::pass::PassId;
use patchflow::pipeline::{run_pipeline, CompilationState, CompileOptions, NoTap, RunMode};
use patchflow::runtime::{execute_frame, BufferPool, DrawInstruction, ExternalInputs, RuntimeState};
use patchflow::{demos, stdlib};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    Normalized,
    Typed,
    Lir,
    Schedule,
    Frames,
    Fingerprint,
}

#[derive(Parser, Debug)]
#[command(
    name = "patchflow",
    version,
    about = "Patchflow — compiles animation dataflow patches to frame schedules and runs them"
)]
struct Cli {
    /// Built-in demo patch
    #[arg(default_value = "dots", value_parser = clap::builder::PossibleValuesParser::new(demos::NAMES))]
    demo: String,

    /// Element count for array-based demos
    #[arg(long, default_value_t = 5)]
    count: u32,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Schedule)]
    emit: EmitStage,

    /// Frames to run with `--emit frames`
    #[arg(long, default_value_t = 3)]
    frames: u32,

    /// Milliseconds between frames
    #[arg(long, default_value_t = 16.0)]
    frame_ms: f64,

    /// Runtime configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print artifacts as JSON
    #[arg(long)]
    json: bool,

    /// Log passes and timing to stderr
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .init();

    let registry = match stdlib::standard_registry() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("patchflow: error: {}", e);
            std::process::exit(2);
        }
    };
    let Some(patch) = demos::by_name(&cli.demo, cli.count) else {
        eprintln!("patchflow: unknown demo '{}'", cli.demo);
        std::process::exit(2);
    };

    let terminal = match cli.emit {
        EmitStage::Normalized => PassId::Normalize,
        EmitStage::Typed => PassId::AxisValidate,
        EmitStage::Lir => PassId::Lower,
        EmitStage::Schedule | EmitStage::Frames | EmitStage::Fingerprint => PassId::Schedule,
    };
    let mut state = CompilationState::new(&patch, &registry);
    run_pipeline(
        &mut state,
        terminal,
        &CompileOptions::default(),
        RunMode::Compile,
        &mut NoTap,
    );
    for diag in &state.diagnostics {
        eprintln!("patchflow: {}", diag);
    }
    if state.has_error() {
        let errors = state.diagnostics.iter().filter(|d| d.is_error()).count();
        eprintln!("patchflow: {} error(s), compilation failed", errors);
        std::process::exit(1);
    }

    match cli.emit {
        EmitStage::Normalized => emit(&cli, state.normalized.as_ref()),
        EmitStage::Typed => emit(&cli, state.typed.as_ref()),
        EmitStage::Lir => emit(&cli, state.lowered.as_ref()),
        EmitStage::Schedule => emit(&cli, state.schedule.as_ref()),
        EmitStage::Fingerprint | EmitStage::Frames => {
            let Some(program) = state.into_program() else {
                eprintln!("patchflow: pipeline finished without producing a schedule");
                std::process::exit(1);
            };
            if cli.emit == EmitStage::Fingerprint {
                println!("{}", program.fingerprint());
                return;
            }
            let config = load_config(cli.config.as_ref());
            run_frames(&cli, &program, config);
        }
    }
}

fn emit<T: std::fmt::Display + Serialize>(cli: &Cli, artifact: Option<&T>) {
    let Some(artifact) = artifact else {
        eprintln!("patchflow: pass produced no artifact");
        std::process::exit(1);
    };
    if cli.json {
        print_json(artifact);
    } else {
        print!("{}", artifact);
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            eprintln!("patchflow: error: {}", e);
            std::process::exit(2);
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> RuntimeConfig {
    let Some(path) = path else {
        return RuntimeConfig::default();
    };
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|text| RuntimeConfig::from_json(&text).map_err(|e| e.to_string()));
    match parsed {
        Ok(config) => config,
        Err(e) => {
            eprintln!("patchflow: error: {}: {}", path.display(), e);
            std::process::exit(2);
        }
    }
}

fn run_frames(cli: &Cli, program: &patchflow::CompiledProgramIR, config: RuntimeConfig) {
    let mut state = RuntimeState::with_config(program, config);
    let mut pool = BufferPool::new();
    let inputs = ExternalInputs::new();
    let mut frames: Vec<Vec<DrawInstruction>> = Vec::new();
    for k in 0..cli.frames {
        let wall_ms = f64::from(k) * cli.frame_ms;
        match execute_frame(program, &mut state, &mut pool, wall_ms, &inputs) {
            Ok(result) => {
                for diag in &result.diagnostics {
                    tracing::warn!("{}", diag);
                }
                frames.push(result.draw);
            }
            Err(e) => {
                eprintln!("patchflow: runtime error at frame {}: {}", k, e);
                std::process::exit(1);
            }
        }
    }
    if cli.json {
        print_json(&frames);
        return;
    }
    for (k, draw) in frames.iter().enumerate() {
        println!("frame {} ({} instructions)", k, draw.len());
        for d in draw {
            println!(
                "  {} #{} {:?} at ({:.4}, {:.4}) scale {:.4} fill [{:.3}, {:.3}, {:.3}, {:.3}] opacity {:.3}",
                d.target,
                d.element_id,
                d.geometry.shape,
                d.transform.translate[0],
                d.transform.translate[1],
                d.transform.scale,
                d.style.fill[0],
                d.style.fill[1],
                d.style.fill[2],
                d.style.fill[3],
                d.style.opacity
            );
        }
    }
}
