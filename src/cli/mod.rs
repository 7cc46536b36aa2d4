//! RR-013: CLI subcommands: validate, list, action, plan.

use crate::core::clock::SystemClock;
use crate::core::executor::Executor;
use crate::core::orchestrator::PlanRunner;
use crate::core::parser::{self, DefinitionError};
use crate::core::resolver;
use crate::core::types::{
    ActionCatalogue, LabConfig, Machine, Params, PlanCatalogue, RunEvent, TransportKind,
};
use crate::trace::{eventlog, logger, round_secs, Trace, TraceKind};
use crate::transport::LabTransport;
use clap::Subcommand;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

/// Token selecting every action (after a machine) or every plan (alone).
pub const ALL: &str = "-a";

/// Environment variable holding tracing filter directives.
pub const LOG_ENV: &str = "RANGERUN_LOG";

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate lab.yaml and its action and plan catalogues
    Validate {
        /// Path to lab.yaml
        #[arg(short, long, default_value = "lab.yaml")]
        file: PathBuf,
    },

    /// List machines, actions and plans
    List {
        /// Path to lab.yaml
        #[arg(short, long, default_value = "lab.yaml")]
        file: PathBuf,
    },

    /// Run actions: <machine> <action>... [<machine> -a]...
    Action {
        /// Path to lab.yaml
        #[arg(short, long, default_value = "lab.yaml")]
        file: PathBuf,

        /// Log directory (default: the lab's `logs` setting)
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Parameter override, repeatable
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,

        /// Machine and action tokens
        #[arg(required = true, allow_hyphen_values = true)]
        targets: Vec<String>,
    },

    /// Run plans by name, or every plan with -a
    Plan {
        /// Path to lab.yaml
        #[arg(short, long, default_value = "lab.yaml")]
        file: PathBuf,

        /// Log directory (default: the lab's `logs` setting)
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Plan names, or -a alone
        #[arg(required = true, allow_hyphen_values = true)]
        plans: Vec<String>,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Validate { file } => cmd_validate(&file),
        Commands::List { file } => cmd_list(&file),
        Commands::Action {
            file,
            log_dir,
            params,
            targets,
        } => cmd_action(&file, log_dir.as_deref(), &params, &targets),
        Commands::Plan {
            file,
            log_dir,
            plans,
        } => cmd_plan(&file, log_dir.as_deref(), &plans),
    }
}

/// A loaded lab: configuration plus both catalogues.
#[derive(Debug)]
pub struct LabContext {
    pub lab: LabConfig,
    /// Directory of lab.yaml; catalogue and log paths are relative to it.
    pub root: PathBuf,
    pub actions: ActionCatalogue,
    pub plans: PlanCatalogue,
}

impl LabContext {
    pub fn log_dir(&self, override_dir: Option<&Path>) -> PathBuf {
        match override_dir {
            Some(dir) => dir.to_path_buf(),
            None => self.root.join(&self.lab.logs),
        }
    }

    /// Lab-wide `params`, the lowest caller tier.
    pub fn defaults(&self) -> Params {
        resolver::params_from_yaml(self.lab.params.iter())
    }
}

/// Load lab.yaml and the catalogues it points at. A missing catalogue file
/// counts as empty.
pub fn load_lab(file: &Path) -> Result<LabContext, String> {
    let lab = parser::parse_lab_file(file)?;
    let root = file.parent().map(Path::to_path_buf).unwrap_or_default();
    let actions = load_catalogue(&root.join(&lab.actions), parser::parse_actions_file)?;
    let plans = load_catalogue(&root.join(&lab.plans), parser::parse_plans_file)?;
    Ok(LabContext {
        lab,
        root,
        actions,
        plans,
    })
}

fn load_catalogue<T: Default>(
    path: &Path,
    parse: fn(&Path) -> Result<T, DefinitionError>,
) -> Result<T, String> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "catalogue not found, treating as empty");
        return Ok(T::default());
    }
    parse(path).map_err(|e| format!("{}: {}", path.display(), e))
}

/// Load and cross-check a lab, printing every validation error.
fn load_and_validate(file: &Path) -> Result<LabContext, String> {
    let ctx = load_lab(file)?;
    let errors = parser::validate_lab(&ctx.lab, &ctx.actions, &ctx.plans);
    if errors.is_empty() {
        return Ok(ctx);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let ctx = load_and_validate(file)?;
    println!(
        "OK: {} ({} machines, {} actions, {} plans)",
        ctx.lab.name,
        ctx.lab.machines.len(),
        ctx.actions.len(),
        ctx.plans.len()
    );
    Ok(())
}

fn cmd_list(file: &Path) -> Result<(), String> {
    let ctx = load_lab(file)?;
    println!("Lab: {}", ctx.lab.name);
    if let Some(ref desc) = ctx.lab.description {
        println!("  {}", desc);
    }

    println!("Machines:");
    for (name, machine) in &ctx.lab.machines {
        println!("  {} [{}]", name, describe_machine(name, machine));
    }

    println!("Actions:");
    for (name, def) in &ctx.actions {
        println!("  {} ({} commands)", name, def.commands.len());
    }

    println!("Plans:");
    for (name, plan) in &ctx.plans {
        let timeout = plan
            .plan_timeout
            .map(|t| format!(", timeout {}s", t.as_secs_f64()))
            .unwrap_or_default();
        println!(
            "  {} ({} need, {} actions{})",
            name,
            plan.need.len(),
            plan.actions.len(),
            timeout
        );
    }
    Ok(())
}

fn describe_machine(name: &str, machine: &Machine) -> String {
    match machine.transport {
        TransportKind::Container => format!(
            "{} {}",
            machine.runtime,
            crate::transport::container::container_name(name, machine)
        ),
        TransportKind::Ssh => format!(
            "ssh {}@{}",
            machine.user,
            machine.addr.as_deref().unwrap_or("?")
        ),
        TransportKind::Local => "local".to_string(),
    }
}

/// Parse `action` target tokens into per-machine action lists.
///
/// The first token must be a machine. A machine token switches the current
/// machine, `-a` selects every action for it, and unknown action names are
/// skipped. Every machine must end up with at least one action.
pub fn parse_action_targets(
    tokens: &[String],
    machines: &IndexMap<String, Machine>,
    actions: &ActionCatalogue,
) -> Result<Vec<(String, Vec<String>)>, String> {
    let first = tokens
        .first()
        .ok_or_else(|| "you must specify at least one machine".to_string())?;
    if !machines.contains_key(first) {
        return Err(format!(
            "syntax error: first argument must be a machine, got '{}'",
            first
        ));
    }

    let mut targets: IndexMap<String, Vec<String>> = IndexMap::new();
    let mut current = String::new();

    for token in tokens {
        if machines.contains_key(token) {
            if targets.get(&current).is_some_and(Vec::is_empty) {
                return Err(format!(
                    "syntax error for machine '{}': no actions defined",
                    current
                ));
            }
            current.clone_from(token);
            targets.entry(current.clone()).or_default();
        } else if token == ALL {
            targets.insert(current.clone(), actions.keys().cloned().collect());
        } else if actions.contains_key(token) {
            if let Some(list) = targets.get_mut(&current) {
                list.push(token.clone());
            }
        } else {
            tracing::warn!(action = %token, "action not found, skipping");
            println!("Action '{}' not found. Skipping.", token);
        }
    }

    if targets.get(&current).is_none_or(Vec::is_empty) {
        return Err(format!(
            "syntax error: machine '{}' has no valid actions",
            current
        ));
    }
    Ok(targets.into_iter().collect())
}

/// Resolve `plan` tokens: `-a` alone selects every plan; unknown names are
/// skipped.
pub fn parse_plan_targets(tokens: &[String], plans: &PlanCatalogue) -> Result<Vec<String>, String> {
    if tokens.len() == 1 && tokens[0] == ALL {
        return Ok(plans.keys().cloned().collect());
    }

    let mut selected = Vec::new();
    for token in tokens {
        if token == ALL {
            return Err("syntax error: '-a' must be used alone".to_string());
        }
        if plans.contains_key(token) {
            selected.push(token.clone());
        } else {
            tracing::warn!(plan = %token, "plan not found, skipping");
            println!("Plan '{}' not found. Skipping.", token);
        }
    }

    if selected.is_empty() {
        return Err("no valid plans to execute".to_string());
    }
    Ok(selected)
}

/// Parse repeated `NAME=VALUE` overrides into `$NAME` keys.
pub fn parse_param_overrides(raw: &[String]) -> Result<Params, String> {
    let mut params = Params::new();
    for item in raw {
        let (name, value) = item
            .split_once('=')
            .ok_or_else(|| format!("invalid parameter '{}', expected NAME=VALUE", item))?;
        let name = name.trim();
        if name.is_empty() || name == "$" {
            return Err(format!("invalid parameter '{}': empty name", item));
        }
        params.insert(resolver::param_key(name), value.to_string());
    }
    Ok(params)
}

/// Tracing filter from `RANGERUN_LOG`; `default` applies when it is unset or empty.
pub fn log_filter(default: tracing::Level) -> EnvFilter {
    log_filter_from(std::env::var(LOG_ENV).ok().as_deref(), default)
}

fn log_filter_from(directives: Option<&str>, default: tracing::Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(default).into())
        .parse_lossy(directives.unwrap_or_default())
}

/// Process-wide interrupt flag, raised by Ctrl-C.
fn interrupt_flag() -> Arc<AtomicBool> {
    static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    FLAG.get_or_init(|| {
        let flag = Arc::new(AtomicBool::new(false));
        let handler_flag = Arc::clone(&flag);
        if let Err(e) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst)) {
            tracing::warn!(error = %e, "cannot install Ctrl-C handler");
        }
        flag
    })
    .clone()
}

fn record_event(log_dir: &Path, event: RunEvent) {
    if let Err(e) = eventlog::append_event(log_dir, event) {
        tracing::error!(error = %e, "cannot append run event");
    }
}

fn cmd_action(
    file: &Path,
    log_dir: Option<&Path>,
    raw_params: &[String],
    tokens: &[String],
) -> Result<(), String> {
    let ctx = load_and_validate(file)?;
    let log_dir = ctx.log_dir(log_dir);
    let targets = parse_action_targets(tokens, &ctx.lab.machines, &ctx.actions)?;
    let overrides = parse_param_overrides(raw_params)?;
    let call_params = resolver::merge_scopes(&[&ctx.defaults(), &overrides]);

    let transport = LabTransport::new(ctx.lab.machines.clone());
    let clock = SystemClock::new();
    let interrupt = interrupt_flag();
    let executor = Executor::new(&ctx.actions, &transport, &clock).with_interrupt(&interrupt);

    let mut failed = 0;
    for (machine, actions) in &targets {
        for action in actions {
            if interrupt.swap(false, Ordering::SeqCst) {
                println!("Interrupted. Remaining actions skipped.");
                return Err("interrupted".to_string());
            }

            let run_id = eventlog::generate_run_id();
            record_event(
                &log_dir,
                RunEvent::ActionStarted {
                    machine: machine.clone(),
                    action: action.clone(),
                    run_id: run_id.clone(),
                },
            );

            println!("Executing action '{}' on {}", action, machine);
            let run = executor.run_action(machine, action, &call_params);
            print_trace(&run.trace, 1);
            if let Some(ref e) = run.error {
                println!("  error: {}", e);
            }

            let log_path = match logger::save_action_log(&log_dir, machine, action, &run) {
                Ok(path) => path.display().to_string(),
                Err(e) => {
                    tracing::error!(machine = %machine, action = %action, error = %e, "cannot save action log");
                    "not saved".to_string()
                }
            };
            record_event(
                &log_dir,
                RunEvent::ActionCompleted {
                    machine: machine.clone(),
                    action: action.clone(),
                    run_id,
                    result: run.result,
                    total_seconds: round_secs(run.elapsed),
                },
            );

            println!(
                "ACTION {} on {}: {} ({:.2}s), log: {}",
                action,
                machine,
                run.result,
                run.elapsed.as_secs_f64(),
                log_path
            );
            if !run.result.is_success() {
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(format!("{} action(s) failed", failed));
    }
    Ok(())
}

fn cmd_plan(file: &Path, log_dir: Option<&Path>, tokens: &[String]) -> Result<(), String> {
    let ctx = load_and_validate(file)?;
    let log_dir = ctx.log_dir(log_dir);
    let selected = parse_plan_targets(tokens, &ctx.plans)?;

    let transport = LabTransport::new(ctx.lab.machines.clone());
    let clock = SystemClock::new();
    let interrupt = interrupt_flag();
    let executor = Executor::new(&ctx.actions, &transport, &clock).with_interrupt(&interrupt);
    let runner = PlanRunner::new(&ctx.plans, &executor).with_defaults(ctx.defaults());

    let mut failed = 0;
    for plan in &selected {
        if interrupt.swap(false, Ordering::SeqCst) {
            println!("Interrupted. Remaining plans skipped.");
            return Err("interrupted".to_string());
        }

        let run_id = eventlog::generate_run_id();
        record_event(
            &log_dir,
            RunEvent::PlanStarted {
                plan: plan.clone(),
                run_id: run_id.clone(),
            },
        );

        println!("Executing PLAN '{}'", plan);
        let run = runner.run_plan(plan);
        print_trace(&run.trace, 1);

        let log_path = match logger::save_plan_log(&log_dir, plan, &run) {
            Ok(path) => path.display().to_string(),
            Err(e) => {
                tracing::error!(plan = %plan, error = %e, "cannot save plan log");
                "not saved".to_string()
            }
        };
        record_event(
            &log_dir,
            RunEvent::PlanCompleted {
                plan: plan.clone(),
                run_id,
                result: run.result,
                total_seconds: round_secs(run.elapsed),
            },
        );

        println!(
            "PLAN {}: {} ({:.2}s), log: {}",
            plan,
            run.result,
            run.elapsed.as_secs_f64(),
            log_path
        );
        if !run.result.is_success() {
            failed += 1;
        }
    }

    if failed > 0 {
        return Err(format!("{} plan(s) failed", failed));
    }
    Ok(())
}

fn describe(kind: &TraceKind) -> String {
    match kind {
        TraceKind::ActionStep {
            action, machine, ..
        } => format!("action {} on {}", action, machine),
        TraceKind::CommandStep {
            command, machine, ..
        } => format!("{} on {}", command, machine),
        TraceKind::Call { call, .. } => format!("call {}", call),
        TraceKind::Group { operator } => operator.to_string(),
        TraceKind::Command { command, .. } => command.clone(),
        TraceKind::Phase {} => String::new(),
    }
}

/// Print a trace as an indented tree.
fn print_trace(trace: &Trace, depth: usize) {
    let indent = "  ".repeat(depth);
    for (key, node) in trace {
        let marker = node
            .error
            .as_deref()
            .map(|e| format!(" ({})", e))
            .unwrap_or_default();
        println!(
            "{}{} [{}] {} {:.2}s{}",
            indent,
            key,
            node.result,
            describe(&node.kind),
            node.elapsed.as_secs_f64(),
            marker
        );
        print_trace(&node.children, depth + 1);
    }
}
