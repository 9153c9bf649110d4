//! TauFW CLI

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use tau_core::ExecutionMode;
use tau_plotter::config::SystematicConfig;
use tau_plotter::datacard::{CreateInputsOptions, ShapeInputs, SystVariation};
use tau_plotter::{
    AnalysisConfig, AnalysisContext, GetHistsOptions, SampleSet, Selection, Stack, Variable, plotinputs,
};
use tau_render::config::{RenderConfig, resolve_config};

#[derive(Parser)]
#[command(name = "taufw")]
#[command(about = "TauFW - histograms, stack plots and datacard inputs from flat tuples")]
#[command(version)]
struct Cli {
    /// Worker threads for the event loop (0 = all cores). Overrides the config.
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Run the event loop on the calling thread.
    #[arg(long, global = true, conflicts_with = "threads")]
    sequential: bool,

    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    /// Raise the log level once per occurrence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct IoArgs {
    /// Analysis configuration (YAML, or JSON by extension)
    #[arg(short, long)]
    config: PathBuf,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    out: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill histograms and write one JSON histogram set per selection and variable
    Hists {
        #[command(flatten)]
        io: IoArgs,

        /// Blind observed data inside each variable's window.
        #[arg(long)]
        blind: bool,
    },

    /// Fill histograms and write stack artifacts (JSON) with SVG renderings
    Stack {
        #[command(flatten)]
        io: IoArgs,

        /// Blind observed data inside each variable's window.
        #[arg(long)]
        blind: bool,

        /// Leave out the ratio panel.
        #[arg(long)]
        no_ratio: bool,

        /// Render configuration (YAML).
        #[arg(long)]
        render_config: Option<PathBuf>,
    },

    /// Write datacard shape files: nominal pass, then every systematic variation
    Createinputs {
        #[command(flatten)]
        io: IoArgs,
    },

    /// Read shape files back and render nominal stacks and systematic comparisons
    Plotinputs {
        #[command(flatten)]
        io: IoArgs,

        /// Render configuration (YAML).
        #[arg(long)]
        render_config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level, cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn init_logging(level: tracing::Level, verbose: u8) {
    const LEVELS: [tracing::Level; 5] = [
        tracing::Level::ERROR,
        tracing::Level::WARN,
        tracing::Level::INFO,
        tracing::Level::DEBUG,
        tracing::Level::TRACE,
    ];
    let base = LEVELS.iter().position(|l| *l == level).unwrap_or(1);
    let level = LEVELS[(base + verbose as usize).min(LEVELS.len() - 1)];
    let filter = EnvFilter::builder().with_default_directive(LevelFilter::from_level(level).into()).from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

/// 1: configuration, 2: missing input, 3: failure while filling.
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<tau_core::Error>() {
            return match e {
                e if e.is_fill_time() => 3,
                tau_core::Error::FileUnavailable { .. } | tau_core::Error::Io(_) => 2,
                _ => 1,
            };
        }
        if let Some(e) = cause.downcast_ref::<tau_render::RenderError>() {
            return match e {
                tau_render::RenderError::Io(_) => 2,
                _ => 1,
            };
        }
    }
    1
}

fn run(cli: &Cli) -> Result<()> {
    let mode = if cli.sequential { Some(ExecutionMode::Sequential) } else { cli.threads.map(ExecutionMode::Parallel) };
    match &cli.command {
        Commands::Hists { io, blind } => cmd_hists(io, mode, *blind),
        Commands::Stack { io, blind, no_ratio, render_config } => {
            cmd_stack(io, mode, *blind, *no_ratio, render_config.as_deref())
        }
        Commands::Createinputs { io } => cmd_createinputs(io, mode),
        Commands::Plotinputs { io, render_config } => cmd_plotinputs(io, render_config.as_deref()),
    }
}

struct Analysis {
    cfg: AnalysisConfig,
    ctx: AnalysisContext,
    variables: Vec<Variable>,
    selections: Vec<Selection>,
}

impl Analysis {
    fn load(io: &IoArgs) -> Result<Self> {
        let cfg = AnalysisConfig::from_path(&io.config)
            .with_context(|| format!("loading config {}", io.config.display()))?;
        let ctx = cfg.context()?;
        let variables = cfg.variables()?;
        let selections = cfg.selections();
        std::fs::create_dir_all(&io.out).with_context(|| format!("creating {}", io.out.display()))?;
        tracing::info!(era = %ctx.era, channel = %ctx.channel, variables = variables.len(), selections = selections.len(), "config loaded");
        Ok(Self { cfg, ctx, variables, selections })
    }

    fn sampleset(&self, mode: Option<ExecutionMode>) -> Result<SampleSet> {
        let mut set = self.cfg.sampleset()?;
        if let Some(m) = mode {
            set.mode = m;
        }
        Ok(set)
    }

    fn stem(&self, var: &Variable, sel: &Selection) -> String {
        format!("{}_{}{}", var.filename, sel.filename, self.cfg.tag)
    }

    fn shapes_template(&self, out: &Path) -> String {
        out.join(&self.cfg.datacard.output).to_string_lossy().into_owned()
    }
}

fn cmd_hists(io: &IoArgs, mode: Option<ExecutionMode>, blind: bool) -> Result<()> {
    let a = Analysis::load(io)?;
    let set = a.sampleset(mode)?;
    let opts = GetHistsOptions { method: a.cfg.method.clone(), blind, ..GetHistsOptions::default() };
    let hists = set.gethists(&a.variables, &a.selections, &opts)?;
    for var in &a.variables {
        for sel in &a.selections {
            if let Some(hs) = hists.get(&sel.filename, &var.filename) {
                hs.display();
                write_json(&io.out.join(format!("{}.json", a.stem(var, sel))), hs)?;
            }
        }
    }
    Ok(())
}

fn cmd_stack(
    io: &IoArgs,
    mode: Option<ExecutionMode>,
    blind: bool,
    no_ratio: bool,
    render_config: Option<&Path>,
) -> Result<()> {
    let a = Analysis::load(io)?;
    let rcfg = load_render_config(render_config)?;
    let set = a.sampleset(mode)?;
    let opts = GetHistsOptions { method: a.cfg.method.clone(), blind, ..GetHistsOptions::default() };
    let hists = set.gethists(&a.variables, &a.selections, &opts)?;
    for var in &a.variables {
        for sel in &a.selections {
            let Some(hs) = hists.get(&sel.filename, &var.filename) else {
                continue;
            };
            let stack = Stack::new(hs.clone(), var, sel, &a.ctx);
            let stack = if no_ratio { stack.with_ratio(false) } else { stack };
            write_plot(&io.out, &a.stem(var, sel), &stack, &rcfg)?;
        }
    }
    Ok(())
}

fn cmd_createinputs(io: &IoArgs, mode: Option<ExecutionMode>) -> Result<()> {
    let a = Analysis::load(io)?;
    let set = a.sampleset(mode)?;
    let template = a.shapes_template(&io.out);
    let nominal = CreateInputsOptions {
        method: a.cfg.method.clone(),
        recreate: true,
        clamp_negative: !a.cfg.datacard.keep_negative,
        replace_p: a.cfg.datacard.replace_p,
        ..CreateInputsOptions::default()
    };
    let mut inputs = ShapeInputs::new();
    inputs.fill(&template, &set, &a.variables, &a.selections, &nominal)?;
    for syst in &a.cfg.systematics {
        for (tag, shifted) in syst.apply(&set)? {
            tracing::info!(systematic = %syst.name, %tag, "variation");
            let opts = CreateInputsOptions { tag, filter: syst.processes.clone(), recreate: false, ..nominal.clone() };
            inputs.fill(&template, &shifted, &a.variables, &a.selections, &opts)?;
        }
    }
    let mut written = inputs.save()?;
    written.sort();
    written.dedup();
    for path in &written {
        println!("{}", path.display());
    }
    Ok(())
}

fn cmd_plotinputs(io: &IoArgs, render_config: Option<&Path>) -> Result<()> {
    let a = Analysis::load(io)?;
    let rcfg = load_render_config(render_config)?;
    let systs: Vec<SystVariation> = a.cfg.systematics.iter().map(SystematicConfig::variation).collect();
    let plots = plotinputs(&a.shapes_template(&io.out), &systs, &a.variables, &a.selections, &a.ctx)?;
    for p in &plots {
        let stem = a.stem(&p.stack.variable, &p.stack.selection);
        write_plot(&io.out, &stem, &p.stack, &rcfg)?;
        for cmp in &p.comparisons {
            let json = serde_json::to_string(cmp)?;
            let path = io.out.join(format!("{stem}_{}.svg", slug(&cmp.title)));
            tau_render::render_to_file(&json, "compare", &path, &rcfg)?;
            tracing::info!(path = %path.display(), "comparison written");
        }
    }
    Ok(())
}

fn load_render_config(path: Option<&Path>) -> Result<RenderConfig> {
    let text = match path {
        Some(p) => Some(std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?),
        None => None,
    };
    Ok(resolve_config(text.as_deref())?)
}

/// `<stem>.json` artifact and `<stem>.svg` rendering of a stack.
fn write_plot(out: &Path, stem: &str, stack: &Stack, rcfg: &RenderConfig) -> Result<()> {
    let art = stack.artifact()?;
    write_json(&out.join(format!("{stem}.json")), &art)?;
    let path = out.join(format!("{stem}.svg"));
    tau_render::render_to_file(&serde_json::to_string(&art)?, "stack", &path, rcfg)?;
    tracing::info!(path = %path.display(), "stack written");
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// File-name friendly form of a plot title: `ZTT, tes` becomes `ZTT_tes`.
fn slug(title: &str) -> String {
    title
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '.'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
