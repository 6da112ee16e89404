use std::path::PathBuf;
use std::str::FromStr;

use crate::context::Context;
use crate::error::KernelError;
use crate::global_properties::ContextGlobalPropertiesExt;
use crate::log::{info, set_log_level, set_module_filters, LevelFilter, ModuleFilter};
use crate::snapshot::ContextSnapshotExt;
use clap::{Args, Command, FromArgMatches as _};

/// Default cli arguments for the nucleus runner
#[derive(Args, Debug, Default)]
pub struct BaseArgs {
    /// Optional path for a global properties config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable logging at the given level (error, warn, info, debug, trace, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override the log level for one module path, as `<module>=<level>` (repeatable)
    #[arg(long = "log-filter", value_name = "MODULE=LEVEL")]
    pub log_filters: Vec<ModuleFilter>,

    /// Maximum depth of events raised from within event handlers
    #[arg(long)]
    pub max_event_depth: Option<usize>,

    /// Write a JSON snapshot of the final state to this path
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// Log execution statistics when the run ends
    #[arg(short, long)]
    pub timeline: bool,
}

#[derive(Args)]
pub struct PlaceholderCustom {}

fn create_nucleus_cli() -> Command {
    let cli = Command::new("nucleus");
    BaseArgs::augment_args(cli)
}

/// Runs a simulation with custom cli arguments.
///
/// This function allows you to define custom arguments and a setup function
///
/// # Parameters
/// - `setup_fn`: A function that takes a mutable reference to a `Context`, a `BaseArgs` struct,
///   a Option<A> where A is the custom cli arguments struct
///
/// # Errors
/// Returns an error if argument parsing, the setup function, module initialization or the
/// snapshot fails
pub fn run_with_custom_args<A, F>(setup_fn: F) -> Result<Context, Box<dyn std::error::Error>>
where
    A: Args,
    F: Fn(&mut Context, &BaseArgs, Option<A>) -> Result<(), KernelError>,
{
    let mut cli = create_nucleus_cli();
    cli = A::augment_args(cli);
    let matches = cli.get_matches();

    let base_args_matches = BaseArgs::from_arg_matches(&matches)?;
    let custom_matches = A::from_arg_matches(&matches)?;
    run_with_args_internal(base_args_matches, Some(custom_matches), setup_fn)
}

/// Runs a simulation with default cli arguments
///
/// This function parses command line arguments allows you to define a setup function
///
/// # Parameters
/// - `setup_fn`: A function that takes a mutable reference to a `Context`and `BaseArgs` struct
///
/// # Errors
/// Returns an error if argument parsing, the setup function, module initialization or the
/// snapshot fails
pub fn run_with_args<F>(setup_fn: F) -> Result<Context, Box<dyn std::error::Error>>
where
    F: Fn(&mut Context, &BaseArgs, Option<PlaceholderCustom>) -> Result<(), KernelError>,
{
    let cli = create_nucleus_cli();
    let matches = cli.get_matches();

    let base_args_matches = BaseArgs::from_arg_matches(&matches)?;
    run_with_args_internal(base_args_matches, None, setup_fn)
}

fn run_with_args_internal<A, F>(
    args: BaseArgs,
    custom_args: Option<A>,
    setup_fn: F,
) -> Result<Context, Box<dyn std::error::Error>>
where
    F: Fn(&mut Context, &BaseArgs, Option<A>) -> Result<(), KernelError>,
{
    if let Some(log_level) = &args.log_level {
        let level = LevelFilter::from_str(log_level)
            .map_err(|_| format!("invalid log level: {log_level}"))?;
        set_log_level(level);
    }
    if !args.log_filters.is_empty() {
        set_module_filters(&args.log_filters);
    }

    // Instantiate a context
    let mut context = Context::new();

    // Optionally set global properties from a file
    if let Some(config_path) = &args.config {
        context.load_global_properties(config_path)?;
    }

    if let Some(max_event_depth) = args.max_event_depth {
        context.set_max_event_depth(max_event_depth);
    }

    if args.timeline {
        context.enable_execution_statistics();
    }

    // Run the provided Fn, which registers modules and schedules plans
    setup_fn(&mut context, &args, custom_args)?;

    let initialized = context.init_modules()?;
    info!("starting run with {} modules", initialized.len());

    // Execute the context
    context.execute();

    if let Some(snapshot_path) = &args.snapshot {
        context.write_snapshot(snapshot_path)?;
    }
    Ok(context)
}
