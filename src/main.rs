use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;

use volplan::backend::DryRunBackend;
use volplan::bounded_executor::{run_catalog, PlanOutcome};
use volplan::config::PlanConfig;
use volplan::names::NamePolicy;
use volplan::operation::Plan;
use volplan::plan::{print_catalog, read_plans, write_catalog, CatalogExport};
use volplan::trace::print_trace;

/// Exhaustive storage-lifecycle plan generator and runner.
#[derive(Parser, Debug)]
#[command(name = "volplan")]
#[command(about = "Generate and replay every legal storage-lifecycle plan", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Naming of created resources (overrides the config file)
    #[arg(long, global = true, value_enum)]
    names: Option<NamesArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the plan catalog for one length
    Generate {
        /// Plan length, seed included
        #[arg(long)]
        len: Option<usize>,

        /// Number of plans to print before the catalog size
        #[arg(long)]
        limit: Option<usize>,

        /// Print the catalog as JSON instead of text
        #[arg(long, conflicts_with = "out")]
        json: bool,

        /// Write the catalog as JSON to this file
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Print the number of plans for one length
    Count {
        #[arg(long)]
        len: Option<usize>,
    },

    /// Replay plans against a backend
    Run {
        /// JSON plan file (catalog export, list of plans or single plan);
        /// generated from the config when omitted
        #[arg(long)]
        plans: Option<PathBuf>,

        /// Plan length when generating
        #[arg(long, conflicts_with = "plans")]
        len: Option<usize>,

        /// Run only the plan at this catalog index
        #[arg(long)]
        index: Option<usize>,

        #[arg(long, value_enum, default_value_t = BackendArg::DryRun)]
        backend: BackendArg,

        /// Maximum number of plans running at once
        #[arg(long)]
        parallel: Option<usize>,

        /// Print the run trace of every plan
        #[arg(long)]
        trace: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    DryRun,
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum NamesArg {
    Fixed,
    Sequential,
}

impl From<NamesArg> for NamePolicy {
    fn from(arg: NamesArg) -> Self {
        match arg {
            NamesArg::Fixed => NamePolicy::Fixed,
            NamesArg::Sequential => NamePolicy::Sequential,
        }
    }
}

fn print_error_chain(err: &anyhow::Error) {
    eprintln!("Error: {err}");

    let mut n = 0;
    let mut cur = err.source();
    while let Some(cause) = cur {
        eprintln!("  {n}: {cause}");
        n += 1;
        cur = cause.source();
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    if let Err(err) = real_main(cli) {
        print_error_chain(&err);
        std::process::exit(1);
    }
}

fn real_main(cli: Cli) -> Result<()> {
    let mut cfg = match &cli.config {
        Some(path) => PlanConfig::load_from_file(path)?,
        None => PlanConfig::default(),
    };
    if let Some(names) = cli.names {
        cfg.name_policy = names.into();
    }

    match cli.command {
        Command::Generate {
            len,
            limit,
            json,
            out,
        } => {
            apply_len(&mut cfg, len)?;
            let plans = generate(&cfg)?;
            let export = CatalogExport::new(cfg.max_len, &plans);

            if let Some(path) = out {
                write_catalog(&path, &export)?;
                println!("Wrote {} plan(s) to {}", plans.len(), path.display());
            } else if json {
                let text =
                    serde_json::to_string_pretty(&export).context("failed to serialize catalog")?;
                println!("{text}");
            } else {
                print_catalog(&plans, limit.unwrap_or(cfg.limit));
            }
        }
        Command::Count { len } => {
            apply_len(&mut cfg, len)?;
            let n = cfg.generator().count(cfg.max_len)?;
            println!("{n}");
        }
        Command::Run {
            plans,
            len,
            index,
            backend,
            parallel,
            trace,
        } => {
            apply_len(&mut cfg, len)?;
            if let Some(p) = parallel {
                cfg.max_parallel = p;
            }

            let mut catalog = match &plans {
                Some(path) => read_plans(path)?,
                None => generate(&cfg)?,
            };
            if let Some(i) = index {
                if i >= catalog.len() {
                    return Err(anyhow!(
                        "plan index {i} out of range (catalog has {} plan(s))",
                        catalog.len()
                    ));
                }
                catalog = vec![catalog.swap_remove(i)];
            }

            let opts = cfg.batch_options();
            let outcomes = match backend {
                BackendArg::DryRun => run_catalog(&catalog, &opts, |_| DryRunBackend::new())?,
                BackendArg::Command => {
                    let command = cfg.command_backend()?;
                    run_catalog(&catalog, &opts, |_| command.clone())?
                }
            };

            report(&outcomes, trace)?;
        }
    }

    Ok(())
}

fn apply_len(cfg: &mut PlanConfig, len: Option<usize>) -> Result<()> {
    if let Some(len) = len {
        cfg.max_len = len;
    }
    cfg.validate()
}

fn generate(cfg: &PlanConfig) -> Result<Vec<Plan>> {
    let plans = cfg
        .generator()
        .generate(cfg.max_len)
        .with_context(|| format!("failed to generate plans of length {}", cfg.max_len))?;
    info!(max_len = cfg.max_len, plans = plans.len(), "generated catalog");
    Ok(plans)
}

fn report(outcomes: &[PlanOutcome], trace: bool) -> Result<()> {
    let mut failed = 0usize;
    for o in outcomes {
        match &o.result {
            Ok(summary) => println!("PASS {} {} steps={}", o.index, summary.fingerprint, summary.steps),
            Err(err) => {
                failed += 1;
                println!("FAIL {} {} {}", o.index, o.plan.fingerprint(), err.chain());
            }
        }
        if trace {
            print_trace(&o.trace, false);
        }
    }

    println!(
        "RUN SUMMARY: {} passed, {failed} failed",
        outcomes.len() - failed
    );
    if failed > 0 {
        return Err(anyhow!("{failed} of {} plan(s) failed", outcomes.len()));
    }
    Ok(())
}
