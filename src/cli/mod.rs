//! CLI subcommands: init, validate, synth, plan, outputs, schema.

use crate::core::composer::{GaraStack, DEFAULT_STACK_NAME};
use crate::core::config::GaraConfig;
use crate::core::error::{Result, SynthError};
use crate::core::stack::StackEnv;
use crate::core::template::Template;
use crate::core::{hasher, parser, planner, state};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CONFIG_FILE: &str = "gara.yaml";
const DEFAULT_OUT_DIR: &str = "cdk.out";

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a gara.yaml holding the default configuration
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Parse and validate a configuration file
    Validate {
        /// Path to gara.yaml
        #[arg(short, long, default_value = CONFIG_FILE)]
        file: PathBuf,
    },

    /// Synthesize the CloudFormation template
    Synth {
        #[command(flatten)]
        target: TargetArgs,

        /// Output directory for the template
        #[arg(long, default_value = DEFAULT_OUT_DIR)]
        out: PathBuf,

        /// Print the template instead of writing it
        #[arg(long)]
        stdout: bool,
    },

    /// Show what deploying a fresh synthesis would change
    Plan {
        #[command(flatten)]
        target: TargetArgs,

        /// Directory holding the previously synthesized template
        #[arg(long, default_value = DEFAULT_OUT_DIR)]
        out: PathBuf,
    },

    /// List the outputs of a synthesized template
    Outputs {
        #[arg(long, default_value = DEFAULT_STACK_NAME)]
        stack_name: String,

        #[arg(long, default_value = DEFAULT_OUT_DIR)]
        out: PathBuf,
    },

    /// Print the JSON schema of the configuration file
    Schema,
}

/// What to synthesize and where it will be deployed.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Configuration overlay (defaults are used when omitted)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_STACK_NAME)]
    pub stack_name: String,

    /// Pin the account instead of resolving it at deploy time
    #[arg(long, env = "CDK_DEFAULT_ACCOUNT")]
    pub account: Option<String>,

    /// Pin the region instead of resolving it at deploy time
    #[arg(long, env = "CDK_DEFAULT_REGION")]
    pub region: Option<String>,
}

impl TargetArgs {
    fn env(&self) -> StackEnv {
        StackEnv::new(self.account.clone(), self.region.clone())
    }
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Synth {
            target,
            out,
            stdout,
        } => cmd_synth(&target, &out, stdout),
        Commands::Plan { target, out } => cmd_plan(&target, &out),
        Commands::Outputs { stack_name, out } => cmd_outputs(&stack_name, &out),
        Commands::Schema => cmd_schema(),
    }
}

fn cmd_init(path: &Path) -> Result<()> {
    let config_path = path.join(CONFIG_FILE);
    if config_path.exists() {
        return Err(SynthError::AlreadyExists(config_path));
    }
    std::fs::create_dir_all(path).map_err(|e| SynthError::io(path, e))?;

    let body = serde_yaml_ng::to_string(&GaraConfig::default())?;
    let content = format!(
        "# Gara infrastructure configuration.\n# Remove any value you do not change; omitted values keep their defaults.\n{}",
        body
    );
    std::fs::write(&config_path, content).map_err(|e| SynthError::io(&config_path, e))?;

    println!("Initialized gara configuration at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<()> {
    let config = parser::parse_config_file(file)?;
    check(&config)?;
    println!(
        "OK: {} (services: {}, {}; pipelines: {}, {})",
        file.display(),
        config.backend_service.service_name,
        config.frontend_service.service_name,
        config.backend_pipeline.pipeline_name,
        config.frontend_pipeline.pipeline_name
    );
    Ok(())
}

/// Fail on any validation finding, logging each one.
fn check(config: &GaraConfig) -> Result<()> {
    let errors = parser::validate_config(config);
    if errors.is_empty() {
        return Ok(());
    }
    for e in &errors {
        warn!("{}", e);
    }
    Err(SynthError::Validation(
        errors.into_iter().map(|e| e.message).collect(),
    ))
}

fn load_config(file: Option<&Path>) -> Result<GaraConfig> {
    match file {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            parser::parse_config_file(path)
        }
        None => Ok(GaraConfig::default()),
    }
}

/// Load, validate, compose and synthesize.
fn synthesize(target: &TargetArgs) -> Result<Template> {
    let config = load_config(target.file.as_deref())?;
    check(&config)?;
    GaraStack::build(&target.stack_name, &config, target.env())?.synth()
}

fn cmd_synth(target: &TargetArgs, out: &Path, stdout: bool) -> Result<()> {
    let template = synthesize(target)?;
    if stdout {
        println!("{}", template.to_json_pretty()?);
        return Ok(());
    }
    let path = state::save_template(out, &target.stack_name, &template)?;
    println!(
        "Synthesized {} ({} resources, {} outputs) to {}",
        target.stack_name,
        template.resources.len(),
        template.outputs.len(),
        path.display()
    );
    println!("  Hash: {}", hasher::hash_template(&template));
    Ok(())
}

fn cmd_plan(target: &TargetArgs, out: &Path) -> Result<()> {
    let template = synthesize(target)?;
    let previous = state::load_template(out, &target.stack_name)?;
    if previous.is_none() {
        info!(stack = %target.stack_name, "no previous template, everything is new");
    }
    let changes = planner::plan(&target.stack_name, previous.as_ref(), &template);
    print_plan(&changes);
    Ok(())
}

/// Display a change set to stdout.
fn print_plan(changes: &planner::ChangeSet) {
    println!("Planning: {} ({} resources)", changes.stack, changes.changes.len());
    println!();
    for change in &changes.changes {
        let symbol = match change.action {
            planner::PlanAction::Create => "+",
            planner::PlanAction::Update => "~",
            planner::PlanAction::Destroy => "-",
            planner::PlanAction::NoOp => " ",
        };
        println!("  {} {}", symbol, change.description);
    }
    println!();
    println!(
        "Plan: {} to add, {} to change, {} to destroy, {} unchanged.",
        changes.to_create, changes.to_update, changes.to_destroy, changes.unchanged
    );
}

fn cmd_outputs(stack_name: &str, out: &Path) -> Result<()> {
    let path = state::template_path(out, stack_name);
    let Some(template) = state::load_template(out, stack_name)? else {
        return Err(SynthError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "no synthesized template, run synth first"),
        ));
    };
    println!("{} outputs:", stack_name);
    for (name, output) in &template.outputs {
        let export = output
            .export
            .as_ref()
            .map(|e| format!(" [export: {}]", e.name))
            .unwrap_or_default();
        println!("  {}{}", name, export);
        println!("    {}", output.description);
        println!("    = {}", output.value.as_value());
    }
    Ok(())
}

fn cmd_schema() -> Result<()> {
    let schema = schemars::schema_for!(GaraConfig);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
