mod file_provider;

use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use clap::{Args, CommandFactory, Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use keel_core::config::{DEFAULT_CONFIG_FILE, ProjectConfig, ProviderKind};
use keel_core::provider::Provider;
use keel_core::provisioner::EnsureOutcome;
use keel_core::report::{self, DEFAULT_REPORT_FILE};
use keel_core::runbook::{ClusterStep, Runbook, StepReport};
use keel_core::verify::{self, VerifyReport, VerifyScope};
use keel_provider_aws::AwsProvider;
use keel_state::{BackendConfig, StateBackend, create_backend};

use file_provider::{DEFAULT_RESOURCES_FILE, FileProvider};

#[derive(Parser)]
#[command(name = "keel", version)]
#[command(
    about = "Provision an EKS cluster, its security groups and databases with re-runnable runbooks",
    long_about = None
)]
struct Cli {
    /// Path to the project configuration
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Project name, prefix of every resource name
    #[arg(long, global = true, env = "KEEL_PROJECT")]
    project: Option<String>,

    /// AWS region
    #[arg(long, global = true, env = "KEEL_REGION")]
    region: Option<String>,

    /// Path to the state file
    #[arg(long, global = true, env = "KEEL_STATE", value_name = "PATH")]
    state: Option<PathBuf>,

    /// Log filter (e.g. "info", "debug", "keel_core=trace")
    #[arg(long, global = true, env = "KEEL_LOG", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Network, IAM and EKS cluster runbook
    Cluster(ClusterArgs),
    /// Security group runbook
    SecurityGroups(SecurityGroupArgs),
    /// Database runbook (RDS and ElastiCache)
    Databases(DatabaseArgs),
    /// Print recorded state as KEY=value lines
    Output {
        /// Print secrets instead of masking them
        #[arg(long)]
        show_secrets: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ClusterArgs {
    /// Run every step in order
    #[arg(long)]
    all: bool,

    /// Run a single step (1-7)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u8).range(1..=7))]
    step: Option<u8>,

    /// Check that every resource exists and is ready
    #[arg(long)]
    verify: bool,

    /// Check credentials, permissions and required tools
    #[arg(long)]
    check: bool,

    /// Write a summary report
    #[arg(long, value_name = "PATH", num_args = 0..=1, default_missing_value = DEFAULT_REPORT_FILE)]
    report: Option<PathBuf>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SecurityGroupArgs {
    /// Create every configured group, sources first
    #[arg(long)]
    all: bool,

    /// Create a single group
    #[arg(long, value_name = "NAME")]
    sg: Option<String>,

    /// Check that every group exists
    #[arg(long)]
    verify: bool,

    /// Check credentials, permissions and required tools
    #[arg(long)]
    check: bool,

    /// Write a summary report
    #[arg(long, value_name = "PATH", num_args = 0..=1, default_missing_value = DEFAULT_REPORT_FILE)]
    report: Option<PathBuf>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct DatabaseArgs {
    /// Create every configured database, then wait for all of them
    #[arg(long)]
    all: bool,

    /// Create a single database
    #[arg(long, value_name = "NAME")]
    db: Option<String>,

    /// Check that every database exists and is available
    #[arg(long)]
    verify: bool,

    /// Check credentials, permissions and required tools
    #[arg(long)]
    check: bool,

    /// Write a summary report
    #[arg(long, value_name = "PATH", num_args = 0..=1, default_missing_value = DEFAULT_REPORT_FILE)]
    report: Option<PathBuf>,
}

/// What a runbook subcommand was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
enum Action<T> {
    All,
    One(T),
    Verify,
    Check,
    Report(PathBuf),
}

/// Collapse a runbook's flags into one action; clap's group guarantees
/// exactly one is set
fn action<T>(
    all: bool,
    one: Option<T>,
    verify: bool,
    check: bool,
    report: Option<PathBuf>,
) -> Action<T> {
    if let Some(one) = one {
        Action::One(one)
    } else if verify {
        Action::Verify
    } else if check {
        Action::Check
    } else if let Some(path) = report {
        Action::Report(path)
    } else {
        debug_assert!(all);
        Action::All
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .parse_filters(&cli.log_level)
        .format_timestamp(None)
        .init();

    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "keel", &mut std::io::stdout());
        return Ok(());
    }
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Cluster(args) => {
            let action = action(
                args.all,
                args.step.and_then(ClusterStep::from_number),
                args.verify,
                args.check,
                args.report,
            );
            run_cluster(&config, action).await
        }
        Commands::SecurityGroups(args) => {
            let action = action(args.all, args.sg, args.verify, args.check, args.report);
            run_security_groups(&config, action).await
        }
        Commands::Databases(args) => {
            let action = action(args.all, args.db, args.verify, args.check, args.report);
            run_databases(&config, action).await
        }
        Commands::Output { show_secrets } => run_output(&config, show_secrets).await,
        Commands::Completions { .. } => Ok(()),
    }
}

/// Read the configuration file and apply flag / environment overrides.
///
/// The default file may be absent; an explicitly named one must exist.
fn load_config(cli: &Cli) -> Result<ProjectConfig, String> {
    let (path, required) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    let mut config = ProjectConfig::load(&path, required).map_err(|e| e.to_string())?;
    config.apply_overrides(cli.project.clone(), cli.region.clone(), cli.state.clone());
    Ok(config)
}

/// Select the Provider named in the configuration
async fn get_provider(config: &ProjectConfig) -> Box<dyn Provider> {
    match config.provider {
        ProviderKind::Aws => {
            println!(
                "{}",
                format!("Using AWS provider (region: {})", config.region).cyan()
            );
            Box::new(AwsProvider::new(&config.region).await)
        }
        ProviderKind::File => {
            let store = config.state_path.with_file_name(DEFAULT_RESOURCES_FILE);
            println!(
                "{}",
                format!("Using file-based rehearsal provider ({})", store.display()).cyan()
            );
            Box::new(FileProvider::new(store))
        }
    }
}

fn get_backend(config: &ProjectConfig) -> Result<Box<dyn StateBackend>, String> {
    create_backend(&BackendConfig::local(
        config.state_path.display().to_string(),
    ))
    .map_err(|e| e.to_string())
}

/// Cancellation token fired by Ctrl-C
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, stopping at the next wait");
            token.cancel();
        }
    });
    cancel
}

// ========== Runbook commands ==========

async fn run_cluster(config: &ProjectConfig, action: Action<ClusterStep>) -> Result<(), String> {
    let provider = get_provider(config).await;
    let backend = get_backend(config)?;

    let steps: Vec<ClusterStep> = match action {
        Action::All => ClusterStep::ALL.to_vec(),
        Action::One(step) => vec![step],
        Action::Verify => {
            return run_verify(&*provider, config, &*backend, VerifyScope::Cluster).await;
        }
        Action::Check => return run_check(&*provider, config).await,
        Action::Report(path) => {
            return run_report(&*provider, config, &*backend, VerifyScope::Cluster, &path).await;
        }
    };

    let mut runbook = Runbook::open(&*provider, config, &*backend, interrupt_token())
        .await
        .map_err(|e| e.to_string())?;
    let mut created = 0;
    // Print each step as it finishes; waits can take many minutes
    for step in steps {
        println!("{}", step.to_string().cyan().bold());
        let report = runbook
            .run_cluster_step(step)
            .await
            .map_err(|e| e.to_string())?;
        print_step_report(&report);
        created += report.created();
    }
    print_summary(created);
    println!(
        "{}",
        format!("State saved to {}", backend.location()).green()
    );
    Ok(())
}

async fn run_security_groups(config: &ProjectConfig, action: Action<String>) -> Result<(), String> {
    let provider = get_provider(config).await;
    let backend = get_backend(config)?;

    match action {
        Action::All | Action::One(_) => {
            let mut runbook = Runbook::open(&*provider, config, &*backend, interrupt_token())
                .await
                .map_err(|e| e.to_string())?;
            let reports = match action {
                Action::One(name) => runbook.run_security_group(&name).await.map(|r| vec![r]),
                _ => runbook.run_security_groups_all().await,
            }
            .map_err(|e| e.to_string())?;
            print_reports(&reports);
            Ok(())
        }
        Action::Verify => {
            run_verify(&*provider, config, &*backend, VerifyScope::SecurityGroups).await
        }
        Action::Check => run_check(&*provider, config).await,
        Action::Report(path) => {
            run_report(&*provider, config, &*backend, VerifyScope::SecurityGroups, &path).await
        }
    }
}

async fn run_databases(config: &ProjectConfig, action: Action<String>) -> Result<(), String> {
    let provider = get_provider(config).await;
    let backend = get_backend(config)?;

    match action {
        Action::All | Action::One(_) => {
            let mut runbook = Runbook::open(&*provider, config, &*backend, interrupt_token())
                .await
                .map_err(|e| e.to_string())?;
            let reports = match action {
                Action::One(name) => runbook.run_database(&name).await.map(|r| vec![r]),
                _ => runbook.run_databases_all().await,
            }
            .map_err(|e| e.to_string())?;
            print_reports(&reports);
            println!(
                "{}",
                "Master passwords are stored in state; print them with `keel output --show-secrets`."
                    .dimmed()
            );
            Ok(())
        }
        Action::Verify => run_verify(&*provider, config, &*backend, VerifyScope::Databases).await,
        Action::Check => run_check(&*provider, config).await,
        Action::Report(path) => {
            run_report(&*provider, config, &*backend, VerifyScope::Databases, &path).await
        }
    }
}

// ========== Output ==========

fn print_reports(reports: &[StepReport]) {
    for report in reports {
        print_step_report(report);
    }
    print_summary(reports.iter().map(StepReport::created).sum());
}

fn print_summary(created: usize) {
    println!();
    if created == 0 {
        println!("{}", "No changes needed.".green());
    } else {
        println!("{}", format!("Created {} resource(s).", created).green().bold());
    }
}

fn print_step_report(report: &StepReport) {
    println!("{}", report.title.bold());
    for result in &report.results {
        let id = &result.state.id;
        let identifier = result.identifier().unwrap_or("-");
        match result.outcome {
            EnsureOutcome::Created => {
                println!("  {} {} {}", "+".green().bold(), id, identifier.dimmed())
            }
            EnsureOutcome::Skipped => println!(
                "  {} {} {} ({})",
                "=".cyan(),
                id,
                identifier.dimmed(),
                result.outcome.as_str()
            ),
        }
    }
    for ready in &report.waited {
        println!("  {} {} is {}", "✓".green(), ready.label, ready.status);
    }
    for note in &report.notes {
        println!("  {} {}", "!".yellow().bold(), note);
    }
}

fn print_verify_report(report: &VerifyReport) {
    println!("{}", format!("Verify {}", report.scope).bold());
    for check in &report.checks {
        if check.passed {
            let status = check
                .status
                .as_deref()
                .map(|s| format!(" ({})", s))
                .unwrap_or_default();
            println!("  {} {}{}", "✓".green(), check.id, status);
        } else {
            println!(
                "  {} {}: {}",
                "✗".red().bold(),
                check.id,
                check.detail.as_deref().unwrap_or("failed")
            );
        }
    }
}

// ========== Verify / Check / Report ==========

async fn run_verify(
    provider: &dyn Provider,
    config: &ProjectConfig,
    backend: &dyn StateBackend,
    scope: VerifyScope,
) -> Result<(), String> {
    let state = backend
        .load(&config.project)
        .await
        .map_err(|e| e.to_string())?;
    let report = verify::verify(provider, config, &state, scope)
        .await
        .map_err(|e| e.to_string())?;
    print_verify_report(&report);

    let failed = report.failures().count();
    if failed == 0 {
        println!("{}", "All checks passed.".green().bold());
        Ok(())
    } else {
        Err(format!("{} of {} checks failed", failed, report.checks.len()))
    }
}

async fn run_check(provider: &dyn Provider, config: &ProjectConfig) -> Result<(), String> {
    config.validate().map_err(|e| e.to_string())?;
    println!("{}", "Configuration is valid.".green());

    let preflight = provider.preflight().await.map_err(|e| e.to_string())?;
    println!("Account: {}", preflight.account);
    println!("Caller:  {}", preflight.arn);

    let mut failures = Vec::new();
    for probe in &preflight.probes {
        match &probe.detail {
            None if probe.ok => println!("  {} {}", "✓".green(), probe.service),
            detail => {
                let detail = detail.as_deref().unwrap_or("failed");
                println!("  {} {}: {}", "✗".red().bold(), probe.service, detail);
                failures.push(format!("{} access", probe.service));
            }
        }
    }

    for tool in &config.check.required_tools {
        match which::which(tool) {
            Ok(path) => println!("  {} {} ({})", "✓".green(), tool, path.display()),
            Err(_) => {
                println!("  {} {} not found on PATH", "✗".red().bold(), tool);
                failures.push(format!("{} on PATH", tool));
            }
        }
    }

    if failures.is_empty() {
        println!("{}", "Preflight passed.".green().bold());
        Ok(())
    } else {
        Err(format!("preflight failed: {}", failures.join(", ")))
    }
}

async fn run_report(
    provider: &dyn Provider,
    config: &ProjectConfig,
    backend: &dyn StateBackend,
    scope: VerifyScope,
    path: &PathBuf,
) -> Result<(), String> {
    let state = backend
        .load(&config.project)
        .await
        .map_err(|e| e.to_string())?;
    let verify = verify::verify(provider, config, &state, scope)
        .await
        .map_err(|e| e.to_string())?;

    let text = report::render(config, &state, Some(&verify), Utc::now());
    fs::write(path, &text).map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
    println!(
        "{}",
        format!("Report written to {}", path.display()).green()
    );
    Ok(())
}

async fn run_output(config: &ProjectConfig, show_secrets: bool) -> Result<(), String> {
    let backend = get_backend(config)?;
    let state = backend
        .read_state()
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("No state found at {}", backend.location()))?;

    for (key, value) in state.outputs(show_secrets) {
        println!("{}={}", key, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("keel").chain(args.iter().copied()))
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cluster_needs_exactly_one_action() {
        assert!(parse(&["cluster"]).is_err());
        assert!(parse(&["cluster", "--all", "--verify"]).is_err());
        assert!(parse(&["cluster", "--all"]).is_ok());
    }

    #[test]
    fn step_must_be_between_one_and_seven() {
        assert!(parse(&["cluster", "--step", "0"]).is_err());
        assert!(parse(&["cluster", "--step", "8"]).is_err());

        let cli = parse(&["cluster", "--step", "6"]).unwrap();
        match cli.command {
            Commands::Cluster(args) => {
                let action = action(
                    args.all,
                    args.step.and_then(ClusterStep::from_number),
                    args.verify,
                    args.check,
                    args.report,
                );
                assert_eq!(action, Action::One(ClusterStep::Cluster));
            }
            _ => panic!("Expected cluster command"),
        }
    }

    #[test]
    fn report_path_defaults_when_omitted() {
        let cli = parse(&["databases", "--report"]).unwrap();
        match cli.command {
            Commands::Databases(args) => {
                assert_eq!(args.report, Some(PathBuf::from(DEFAULT_REPORT_FILE)));
            }
            _ => panic!("Expected databases command"),
        }

        let cli = parse(&["security-groups", "--report", "out.txt"]).unwrap();
        match cli.command {
            Commands::SecurityGroups(args) => {
                let action = action(args.all, args.sg, args.verify, args.check, args.report);
                assert_eq!(action, Action::Report(PathBuf::from("out.txt")));
            }
            _ => panic!("Expected security-groups command"),
        }
    }

    #[test]
    fn global_flags_override_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.toml");
        fs::write(&path, "project = \"acme\"\nregion = \"us-east-1\"\n").unwrap();

        let cli = parse(&[
            "databases",
            "--all",
            "--config",
            path.to_str().unwrap(),
            "--region",
            "eu-west-1",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.project, "acme");
        assert_eq!(config.region, "eu-west-1");
    }

    #[test]
    fn explicit_config_must_exist() {
        let cli = parse(&["cluster", "--all", "--config", "/nonexistent/keel.toml"]).unwrap();
        let err = load_config(&cli).unwrap_err();
        assert!(err.contains("failed to read"));
    }

    #[test]
    fn action_prefers_the_named_unit() {
        assert_eq!(
            action(false, Some("alb".to_string()), false, false, None),
            Action::One("alb".to_string())
        );
        assert_eq!(action::<String>(true, None, false, false, None), Action::All);
        assert_eq!(action::<String>(false, None, false, true, None), Action::Check);
    }

    #[tokio::test]
    async fn rehearsal_run_records_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ProjectConfig {
            project: "acme".to_string(),
            provider: ProviderKind::File,
            state_path: dir.path().join("keel.state.json"),
            ..Default::default()
        };
        config.wait.propagation_delay_secs = 0;
        config.check.required_tools.clear();

        run_cluster(&config, Action::One(ClusterStep::Network))
            .await
            .unwrap();
        run_security_groups(&config, Action::All).await.unwrap();
        run_verify_ok(&config).await;

        assert!(dir.path().join(DEFAULT_RESOURCES_FILE).exists());
        run_check(&FileProvider::new(dir.path().join(DEFAULT_RESOURCES_FILE)), &config)
            .await
            .unwrap();
    }

    async fn run_verify_ok(config: &ProjectConfig) {
        let provider = get_provider(config).await;
        let backend = get_backend(config).unwrap();
        run_verify(&*provider, config, &*backend, VerifyScope::SecurityGroups)
            .await
            .unwrap();
    }
}
