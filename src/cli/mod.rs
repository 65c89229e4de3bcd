//! SC-017: CLI subcommands: init, validate, graph, plan, synth, status, schema, completion.

use crate::core::composer::Composer;
use crate::core::{executor, parser, state, types};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "ccm-infra",
    version,
    about = "Stack composition for the Cricket Club Manager cloud footprint"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new ccm-infra project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate ccm-infra.yaml and resolve every environment
    Validate {
        /// Path to ccm-infra.yaml
        #[arg(short, long, default_value = "ccm-infra.yaml")]
        file: PathBuf,
    },

    /// Show execution order and cross-stack wiring
    Graph {
        /// Path to ccm-infra.yaml
        #[arg(short, long, default_value = "ccm-infra.yaml")]
        file: PathBuf,

        /// Target environment
        #[arg(short, long, default_value = "staging")]
        env: String,

        /// Emit Graphviz DOT instead of text
        #[arg(long)]
        dot: bool,
    },

    /// Show what a synth would change against the last lock
    Plan {
        /// Path to ccm-infra.yaml
        #[arg(short, long, default_value = "ccm-infra.yaml")]
        file: PathBuf,

        /// Target environment
        #[arg(short, long, default_value = "staging")]
        env: String,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Compose every stack and write templates
    Synth {
        /// Path to ccm-infra.yaml
        #[arg(short, long, default_value = "ccm-infra.yaml")]
        file: PathBuf,

        /// Target environment
        #[arg(short, long, default_value = "staging")]
        env: String,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Template output directory
        #[arg(short, long, default_value = "cdk.out")]
        out: PathBuf,

        /// Compose and plan without writing templates, lock or events
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the last synth from lock files
    Status {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Target specific environment
        #[arg(short, long)]
        env: Option<String>,
    },

    /// Print the JSON Schema of ccm-infra.yaml
    Schema,

    /// Generate shell completions
    Completion {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Graph { file, env, dot } => cmd_graph(&file, &env, dot),
        Commands::Plan {
            file,
            env,
            state_dir,
        } => cmd_plan(&file, &env, &state_dir),
        Commands::Synth {
            file,
            env,
            state_dir,
            out,
            dry_run,
        } => cmd_synth(&file, &env, &state_dir, &out, dry_run),
        Commands::Status { state_dir, env } => cmd_status(&state_dir, env.as_deref()),
        Commands::Schema => cmd_schema(),
        Commands::Completion { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "ccm-infra",
                &mut std::io::stdout(),
            );
            Ok(())
        }
    }
}

const STARTER: &str = r#"version: "1.0"
name: ccm
description: "Cricket Club Manager cloud footprint"
region: eu-west-2
hosted_zone: crickitup.com

environments:
  staging:
    backendDomainName: api-staging.crickitup.com
    dbInstanceClass: db.t4g.micro
    dbAllocatedStorage: 20
    dbName: ccm
    dbUsername: ccm_admin
    v2S3BucketName: ccm-staging-v2-frontend
  production:
    backendDomainName: api.crickitup.com
    dbInstanceClass: db.t4g.small
    dbAllocatedStorage: 50
    dbName: ccm
    dbUsername: ccm_admin
    v2S3BucketName: ccm-production-v2-frontend
    v2DomainName: app.crickitup.com

policy:
  tripwire: true
  lock_file: true
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("ccm-infra.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;

    std::fs::write(&config_path, STARTER)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized ccm-infra project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parser::parse_config_file(file)?;
    let mut errors: Vec<String> = parser::validate_config(&config)
        .into_iter()
        .map(|e| e.to_string())
        .collect();

    // Contracts are checked per environment, since each has its own profile
    let mut stacks = 0;
    if errors.is_empty() {
        for env in config.environments.keys() {
            let resolved = executor::composer_for(&config, env).and_then(|c| {
                stacks = c.descriptors().len();
                c.resolve()
            });
            if let Err(e) = resolved {
                errors.push(format!("{}: {}", env, e));
            }
        }
    }

    if errors.is_empty() {
        println!(
            "OK: {} ({} environments, {} stacks)",
            config.name,
            config.environments.len(),
            stacks
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

/// Parse and validate a config file, returning errors if invalid.
fn parse_and_validate(file: &Path) -> Result<types::InfraConfig, String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err("validation failed".to_string())
}

fn cmd_graph(file: &Path, env: &str, dot: bool) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let composer = executor::composer_for(&config, env).map_err(|e| e.to_string())?;
    let order = composer.resolve().map_err(|e| e.to_string())?;
    if dot {
        print!("{}", render_dot(&composer));
    } else {
        print!("{}", render_order(&composer, &order));
    }
    Ok(())
}

/// Execution order with each stack's upstream wiring.
fn render_order(composer: &Composer, order: &[String]) -> String {
    let descriptors = composer.descriptors();
    let mut out = format!("Execution order ({}):\n", composer.settings().environment);
    for (i, name) in order.iter().enumerate() {
        out.push_str(&format!("  {}. {}\n", i + 1, name));
        let Some(d) = descriptors.iter().find(|d| &d.name == name) else {
            continue;
        };
        for input in &d.inputs {
            out.push_str(&format!("       {} <- {}\n", input.name, input.source));
        }
    }
    out
}

/// Graphviz DOT, one edge per (upstream, downstream) pair labelled with the outputs consumed.
fn render_dot(composer: &Composer) -> String {
    let mut out = String::from("digraph stacks {\n  rankdir=LR;\n");
    for d in composer.descriptors() {
        out.push_str(&format!("  \"{}\";\n", d.name));
    }
    for d in composer.descriptors() {
        for upstream in d.upstream() {
            let outputs: Vec<&str> = d
                .inputs
                .iter()
                .filter_map(|i| match &i.source {
                    types::InputSource::Output { stack, output } if stack == upstream => {
                        Some(output.as_str())
                    }
                    _ => None,
                })
                .collect();
            out.push_str(&format!(
                "  \"{}\" -> \"{}\" [label=\"{}\"];\n",
                upstream,
                d.name,
                outputs.join(", ")
            ));
        }
    }
    out.push_str("}\n");
    out
}

fn cmd_plan(file: &Path, env: &str, state_dir: &Path) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let plan = executor::plan(&config, env, state_dir)?;
    print_plan(&plan);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::ExecutionPlan) {
    println!(
        "Planning: {} ({} stacks)",
        plan.environment,
        plan.execution_order.len()
    );
    println!();

    for change in &plan.changes {
        let symbol = match change.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Update => "~",
            types::PlanAction::Destroy => "-",
            types::PlanAction::NoOp => " ",
        };
        println!("  {} {}", symbol, change.description);
    }

    println!();
    println!(
        "Plan: {} to add, {} to change, {} to destroy, {} unchanged.",
        plan.to_create, plan.to_update, plan.to_destroy, plan.unchanged
    );
}

fn cmd_synth(
    file: &Path,
    env: &str,
    state_dir: &Path,
    out_dir: &Path,
    dry_run: bool,
) -> Result<(), String> {
    let config = parse_and_validate(file)?;

    let cfg = executor::ComposeConfig {
        config: &config,
        environment: env,
        state_dir,
        out_dir,
        dry_run,
    };

    let result = executor::compose(&cfg)?;
    print_plan(&result.plan);
    println!();

    if dry_run {
        println!("Dry run: no templates, lock or events written.");
        return Ok(());
    }

    for path in &result.templates {
        println!("  Wrote: {}", path.display());
    }
    println!(
        "Synth complete: {} stacks ({:.2}s) {}",
        result.order.len(),
        result.total_duration.as_secs_f64(),
        result.composite_hash
    );
    Ok(())
}

fn cmd_status(state_dir: &Path, env_filter: Option<&str>) -> Result<(), String> {
    let entries = std::fs::read_dir(state_dir)
        .map_err(|e| format!("cannot read state dir {}: {}", state_dir.display(), e))?;

    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| env_filter.is_none_or(|f| f == name))
        .collect();
    names.sort();

    let mut found = false;
    for name in &names {
        if let Some(lock) = state::load_lock(state_dir, name)? {
            found = true;
            print!("{}", render_lock(&lock));
        }
    }

    if !found {
        println!("No state found. Run `ccm-infra synth` first.");
    }

    Ok(())
}

fn render_lock(lock: &types::CompositionLock) -> String {
    let (built, failed) = state::status_counts(lock);
    let mut out = format!("Environment: {}\n", lock.environment);
    out.push_str(&format!("  Generated: {}\n", lock.generated_at));
    out.push_str(&format!("  Generator: {}\n", lock.generator));
    out.push_str(&format!("  Stacks: {} built, {} failed\n", built, failed));

    for (stack, sl) in &lock.stacks {
        let duration = sl
            .duration_seconds
            .map(|d| format!(" ({:.3}s)", d))
            .unwrap_or_default();
        out.push_str(&format!("    {}: {}{} {}\n", stack, sl.status, duration, sl.hash));
        for (name, value) in &sl.outputs {
            out.push_str(&format!("      {} = {}\n", name, value));
        }
    }
    out.push('\n');
    out
}

/// JSON Schema of the config file.
fn config_schema() -> Result<String, String> {
    let schema = schemars::schema_for!(types::InfraConfig);
    serde_json::to_string_pretty(&schema).map_err(|e| format!("schema serialize error: {}", e))
}

fn cmd_schema() -> Result<(), String> {
    println!("{}", config_schema()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        dir
    }

    #[test]
    fn test_sc017_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("test-project");
        std::fs::create_dir_all(&sub).unwrap();
        cmd_init(&sub).unwrap();
        assert!(sub.join("ccm-infra.yaml").exists());
        assert!(sub.join("state").is_dir());
    }

    #[test]
    fn test_sc017_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ccm-infra.yaml"), "exists").unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_sc017_starter_validates() {
        let dir = project();
        cmd_validate(&dir.path().join("ccm-infra.yaml")).unwrap();
    }

    #[test]
    fn test_sc017_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("ccm-infra.yaml");
        std::fs::write(
            &config,
            r#"
version: "2.0"
name: ""
hosted_zone: crickitup.com
environments: {}
"#,
        )
        .unwrap();
        assert!(cmd_validate(&config).is_err());
    }

    #[test]
    fn test_sc017_validate_checks_contracts() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("ccm-infra.yaml");
        std::fs::write(&config, STARTER.replace("    dbAllocatedStorage: 50\n", "")).unwrap();
        let err = cmd_validate(&config).unwrap_err();
        assert_eq!(err, "1 validation error(s)");
    }

    #[test]
    fn test_sc017_graph_text_and_dot() {
        let dir = project();
        let file = dir.path().join("ccm-infra.yaml");
        cmd_graph(&file, "staging", false).unwrap();
        cmd_graph(&file, "staging", true).unwrap();

        let config = parser::parse_config_file(&file).unwrap();
        let composer = executor::composer_for(&config, "staging").unwrap();
        let order = composer.resolve().unwrap();
        let text = render_order(&composer, &order);
        assert!(text.starts_with("Execution order (staging):\n  1. network\n"));
        assert!(text.contains("sgId <- network.sgId"));
        assert!(text.contains("backendDomainName <- profile.backendDomainName"));

        let dot = render_dot(&composer);
        assert!(dot.starts_with("digraph stacks {"));
        assert!(dot.contains("\"network\" -> \"database\" [label=\"vpcId, sgId, isolatedSubnetIds\"];"));
        assert!(dot.contains("\"backend\" -> \"frontend\" [label=\"apiDomainName\"];"));
    }

    #[test]
    fn test_sc017_graph_unknown_env() {
        let dir = project();
        let err = cmd_graph(&dir.path().join("ccm-infra.yaml"), "qa", false).unwrap_err();
        assert!(err.contains("unknown environment 'qa'"));
    }

    #[test]
    fn test_sc017_plan_synth_status() {
        let dir = project();
        let file = dir.path().join("ccm-infra.yaml");
        let state_dir = dir.path().join("state");
        let out = dir.path().join("cdk.out");

        cmd_plan(&file, "staging", &state_dir).unwrap();
        cmd_synth(&file, "staging", &state_dir, &out, false).unwrap();
        assert!(out.join("CCM-staging-Backend.template.json").exists());
        assert!(state::lock_file_path(&state_dir, "staging").exists());

        cmd_status(&state_dir, None).unwrap();
        cmd_status(&state_dir, Some("staging")).unwrap();

        let lock = state::load_lock(&state_dir, "staging").unwrap().unwrap();
        let text = render_lock(&lock);
        assert!(text.contains("Stacks: 4 built, 0 failed"));
        assert!(text.contains("vpcId = ${network:Vpc}"));
    }

    #[test]
    fn test_sc017_synth_dry_run() {
        let dir = project();
        let out = dir.path().join("cdk.out");
        cmd_synth(
            &dir.path().join("ccm-infra.yaml"),
            "production",
            &dir.path().join("state"),
            &out,
            true,
        )
        .unwrap();
        assert!(!out.exists());
    }

    #[test]
    fn test_sc017_status_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("state")).unwrap();
        cmd_status(&dir.path().join("state"), None).unwrap();
    }

    #[test]
    fn test_sc017_schema() {
        let schema = config_schema().unwrap();
        assert!(schema.contains("hosted_zone"));
        assert!(schema.contains("environments"));
    }

    #[test]
    fn test_sc017_cli_parses() {
        let cli = Cli::try_parse_from(["ccm-infra", "-vv", "synth", "-e", "production", "--dry-run"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Synth { ref env, dry_run: true, .. } if env == "production"
        ));
        Cli::command().debug_assert();
    }
}
