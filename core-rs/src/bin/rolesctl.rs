//! rolesctl - operator CLI for the roles core
//!
//! Validates, packs and inspects condition trees, and runs permission checks
//! against a policy document.

use alloy_primitives::{Address, U256};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use roles_core::condition::hex_bytes;
use roles_core::{
    inspect, pack, role_key, unpack, BatchVerdict, Call, Clock, ConditionNode, ConditionTree, EngineConfig,
    FixedClock, Operation, PolicyFile, SystemClock, Verdict,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rolesctl")]
#[command(version = roles_core::VERSION)]
#[command(about = "Calldata permission engine", long_about = None)]
struct Cli {
    /// Log more (-v info, -vv debug)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a condition tree or a policy document
    Validate {
        /// YAML file: a list of condition nodes, or a `kind: Policy` document
        file: PathBuf,
    },
    /// Pack a condition tree and print the blob as hex
    Pack {
        /// YAML list of condition nodes
        tree: PathBuf,
    },
    /// Unpack a hex blob and print its condition nodes
    Unpack {
        /// Packed conditions (0x-prefixed hex)
        blob: String,
    },
    /// Decode call data against a condition tree
    Inspect {
        #[arg(long)]
        tree: PathBuf,
        /// Call data (0x-prefixed hex)
        #[arg(long)]
        data: String,
        /// Engine settings with decoder limits
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Check one call against a policy
    Check {
        #[arg(long)]
        policy: PathBuf,
        /// Role label or 32-byte hex key
        #[arg(long)]
        role: String,
        #[arg(long)]
        target: Address,
        /// Call data (0x-prefixed hex)
        #[arg(long, default_value = "0x")]
        data: String,
        /// Value transferred, in wei
        #[arg(long, default_value = "0")]
        value: U256,
        /// Make the call as a delegatecall
        #[arg(long)]
        delegate: bool,
        #[arg(long, default_value_t = Address::ZERO)]
        caller: Address,
        /// Unix time to evaluate at (defaults to now)
        #[arg(long)]
        now: Option<u64>,
    },
    /// Check a batch of calls as one unit
    Batch {
        #[arg(long)]
        policy: PathBuf,
        #[arg(long)]
        role: String,
        /// YAML list of calls (target, value, data, operation)
        #[arg(long)]
        calls: PathBuf,
        #[arg(long, default_value_t = Address::ZERO)]
        caller: Address,
        #[arg(long)]
        now: Option<u64>,
    },
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn read_tree(path: &Path) -> Result<Vec<ConditionNode>> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("Invalid condition tree in {}", path.display()))
}

fn decode_hex(raw: &str) -> Result<Vec<u8>> {
    hex_bytes::decode(raw).with_context(|| format!("Invalid hex: {}", raw))
}

fn print_verdict(verdict: &Verdict) {
    if verdict.allowed {
        println!("{} allowed", "✓".green());
        return;
    }
    match (verdict.violating_node, verdict.operator) {
        (Some(node), Some(operator)) => {
            println!("{} denied: {} at node {} ({})", "✗".red(), verdict.status, node, operator)
        }
        _ => println!("{} denied: {}", "✗".red(), verdict.status),
    }
}

fn handle_validate(file: &Path) -> Result<()> {
    let content = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let document: serde_yaml::Value = serde_yaml::from_str(&content)?;

    if document.get("kind").is_some() {
        let policy = PolicyFile::from_yaml(&content)?;
        let functions: usize = policy
            .roles
            .iter()
            .flat_map(|r| r.targets.iter())
            .map(|t| t.functions.len())
            .sum();
        println!(
            "{} policy '{}' is valid ({} roles, {} functions)",
            "✓".green(),
            policy.metadata.name,
            policy.roles.len(),
            functions
        );
    } else {
        let tree = ConditionTree::new(serde_yaml::from_value(document)?)?;
        println!("{} condition tree is valid ({} nodes)", "✓".green(), tree.len());
    }
    Ok(())
}

fn handle_check(
    policy: &Path,
    role: &str,
    call: Call,
    caller: Address,
    now: Option<u64>,
) -> Result<Verdict> {
    let policy = PolicyFile::load(policy)?;
    let key = role_key(role);
    let mut engine = policy.build_engine(FixedClock::new(now.unwrap_or_else(|| SystemClock.now())))?;
    if !engine.roles().contains(&key) {
        bail!(roles_core::RolesError::RoleNotFound(role.to_string()));
    }
    Ok(engine.check(&key, caller, &call)?)
}

fn handle_batch(policy: &Path, role: &str, calls: &Path, caller: Address, now: Option<u64>) -> Result<BatchVerdict> {
    let policy = PolicyFile::load(policy)?;
    let content = fs::read_to_string(calls).with_context(|| format!("Failed to read {}", calls.display()))?;
    let calls: Vec<Call> = serde_yaml::from_str(&content)?;
    let key = role_key(role);
    let mut engine = policy.build_engine(FixedClock::new(now.unwrap_or_else(|| SystemClock.now())))?;
    if !engine.roles().contains(&key) {
        bail!(roles_core::RolesError::RoleNotFound(role.to_string()));
    }
    Ok(engine.check_batch(&key, caller, &calls)?)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Validate { file } => {
            if let Err(e) = handle_validate(&file) {
                eprintln!("{} {:#}", "✗".red(), e);
                std::process::exit(1);
            }
        }

        Commands::Pack { tree } => {
            let tree = ConditionTree::new(read_tree(&tree)?)?;
            println!("0x{}", hex::encode(pack(&tree)));
        }

        Commands::Unpack { blob } => {
            let tree = unpack(&decode_hex(&blob)?)?;
            print!("{}", serde_yaml::to_string(tree.nodes())?);
        }

        Commands::Inspect { tree, data, config } => {
            let config = match config {
                Some(path) => EngineConfig::load(path)?,
                None => EngineConfig::default(),
            };
            let tree = ConditionTree::with_limits(
                read_tree(&tree)?,
                config.max_condition_nodes,
                config.decoder.max_depth,
            )?;
            let payload = inspect(&decode_hex(&data)?, &tree, &config.decoder);
            println!("{}", serde_json::to_string_pretty(&payload)?);
            if payload.overflow() {
                std::process::exit(1);
            }
        }

        Commands::Check {
            policy,
            role,
            target,
            data,
            value,
            delegate,
            caller,
            now,
        } => {
            let call = Call {
                target,
                value,
                data: decode_hex(&data)?,
                operation: if delegate { Operation::DelegateCall } else { Operation::Call },
            };
            let verdict = handle_check(&policy, &role, call, caller, now)?;
            print_verdict(&verdict);
            if !verdict.allowed {
                std::process::exit(1);
            }
        }

        Commands::Batch {
            policy,
            role,
            calls,
            caller,
            now,
        } => {
            let batch = handle_batch(&policy, &role, &calls, caller, now)?;
            for (index, verdict) in batch.verdicts.iter().enumerate() {
                print!("[{}] ", index);
                print_verdict(verdict);
            }
            if !batch.allowed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
