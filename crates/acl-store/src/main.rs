//! acl-store command line tool.
//!
//! Loads a JSON ACL policy into an in-memory store and either lists the
//! resulting rule order or classifies test packets against it.

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use serde::Serialize;
use sonic_acl_store::{AclPolicy, AclResult, AclStore, ConfigError, TableMatch, TestPacket};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// SONiC ACL store tool
#[derive(Parser, Debug)]
#[command(name = "acl-store")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a policy and print each table's rules in evaluation order
    Check {
        /// Policy file (JSON)
        policy: PathBuf,
    },
    /// Load a policy and classify test packets against it
    Eval {
        /// Policy file (JSON)
        policy: PathBuf,
        /// Test packets (JSON array)
        packets: PathBuf,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct PacketReport {
    packet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    matches: Vec<TableMatch>,
}

fn load_store(path: &Path) -> Result<AclStore, ConfigError> {
    let policy = AclPolicy::from_file(path)?;
    let store = policy.build_store()?;
    info!(
        "Loaded policy {}: {} tables, {} rules",
        path.display(),
        store.table_count(),
        store.total_rule_count()
    );
    Ok(store)
}

/// Each table followed by its rules in evaluation order.
fn check_lines(store: &AclStore) -> AclResult<Vec<String>> {
    let mut lines = Vec::new();
    for table in store.tables() {
        lines.push(table.to_string());
        for rule in store.table_rules(table.id)? {
            lines.push(format!("  {}", rule));
            lines.extend(rule.filters.iter().map(|filter| format!("    match {}", filter)));
            lines.extend(rule.actions.iter().map(|action| format!("    action {}", action)));
        }
    }
    Ok(lines)
}

fn evaluate_test_packet(store: &AclStore, case: &TestPacket) -> AclResult<Vec<TableMatch>> {
    let Some(table) = case.table else {
        return Ok(store.evaluate_stage(case.stage, &case.packet));
    };
    let entry = store.get_table(table);
    let matched = store.evaluate(table, &case.packet)?;
    Ok(matched
        .map(|matched| TableMatch {
            stage: entry.as_ref().map(|t| t.stage).unwrap_or(case.stage),
            table_priority: entry.as_ref().map(|t| t.priority).unwrap_or_default(),
            matched,
        })
        .into_iter()
        .collect())
}

/// Evaluates every test packet; one that cannot be evaluated is reported with
/// its error and does not stop the others.
fn evaluate_test_packets(store: &AclStore, cases: &[TestPacket]) -> Vec<PacketReport> {
    cases
        .iter()
        .enumerate()
        .map(|(position, case)| {
            let name = case.label(position);
            match evaluate_test_packet(store, case) {
                Ok(matches) => PacketReport {
                    packet: name,
                    error: None,
                    matches,
                },
                Err(e) => {
                    warn!("acl-store: {}: {}", name, e);
                    PacketReport {
                        packet: name,
                        error: Some(e.to_string()),
                        matches: Vec::new(),
                    }
                }
            }
        })
        .collect()
}

fn report_lines(reports: &[PacketReport]) -> Vec<String> {
    let mut lines = Vec::new();
    for report in reports {
        if let Some(error) = &report.error {
            lines.push(format!("{}: error: {}", report.packet, error));
            continue;
        }
        if report.matches.is_empty() {
            lines.push(format!("{}: no match", report.packet));
            continue;
        }
        for table_match in &report.matches {
            let actions: Vec<String> = table_match
                .matched
                .actions
                .iter()
                .map(ToString::to_string)
                .collect();
            lines.push(format!(
                "{}: table {} rule {} priority {} -> [{}]",
                report.packet,
                table_match.matched.table,
                table_match.matched.rule,
                table_match.matched.priority,
                actions.join(", ")
            ));
        }
    }
    lines
}

fn run_check(policy: &Path) -> Result<(), ConfigError> {
    let store = load_store(policy)?;
    for line in check_lines(&store)? {
        println!("{}", line);
    }
    Ok(())
}

fn run_eval(policy: &Path, packets: &Path, json: bool) -> Result<(), ConfigError> {
    let store = load_store(policy)?;
    let cases = TestPacket::load_all(packets)?;
    let reports = evaluate_test_packets(&store, &cases);

    if json {
        let out = serde_json::to_string_pretty(&reports).map_err(ConfigError::Serialize)?;
        println!("{}", out);
        return Ok(());
    }
    for line in report_lines(&reports) {
        println!("{}", line);
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let result = match &args.command {
        Command::Check { policy } => run_check(policy),
        Command::Eval {
            policy,
            packets,
            json,
        } => run_eval(policy, packets, *json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("acl-store: {}", e);
            ExitCode::FAILURE
        }
    }
}
