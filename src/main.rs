//! money-flows CLI
//!
//! Trace money flows through a transaction ledger from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Trace flows with the greedy heuristic
//! money-flows trace --input ledger.csv --output flows.csv
//!
//! # Compare heuristics, inferring missing deposits and withdrawals
//! money-flows trace --input ledger.csv --output flows.csv --heuristic greedy,well-mixed --infer
//!
//! # Show inferred starting balances
//! money-flows balances --input ledger.csv --starting-balance infer
//!
//! # Generate a random ledger for testing
//! money-flows generate --accounts 10 --transactions 500 --output ledger.csv
//! ```

use money_flows::allocation::AllocationPolicy;
use money_flows::config::{RunConfig, StartingBalanceMode};
use money_flows::core::transaction::FeeConvention;
use money_flows::engine::{infer_starting_balances, Ledger, RunSummary, StartingBalances};
use money_flows::error::FlowError;
use money_flows::io::{write_issues, FlowWriter, TransactionReader};
use money_flows::simulation::ledger_gen::{generate_random_ledger, to_input_records, LedgerConfig};
use rust_decimal::Decimal;
use std::fmt::Display;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::process;

fn print_usage() {
    eprintln!(
        r#"money-flows — follow the money through a transaction ledger

USAGE:
    money-flows <COMMAND> [OPTIONS]

COMMANDS:
    trace       Decompose a ledger into money flows
    balances    Show the starting balances a ledger implies
    generate    Generate a random feasible ledger (for testing)
    help        Show this message

OPTIONS (trace, balances):
    --input <FILE>              Path to the transactions CSV
    --config <FILE>             JSON run configuration (flags below override it)
    --starting-balance <MODE>   none (default), infer or read-from-column
    --format <FORMAT>           Summary format: text (default) or json

OPTIONS (trace):
    --output <FILE>             Write flows here instead of stdout
    --issues <FILE>             Write skipped records here
    --heuristic <LIST>          Comma-separated: no-tracking, greedy (default), well-mixed
    --infer                     Infer deposits, existing balances and close-out withdrawals
    --resolution <AMOUNT>       Smallest tracked amount (default: 0.01)
    --cutoff <HOURS>            Flush claims older than this
    --fee-convention <CONV>     sender-pays (default), recipient-pays or split
    --strict                    Abort on the first accounting error

OPTIONS (generate):
    --accounts <N>              Number of accounts (default: 10)
    --transactions <N>          Number of transactions (default: 100)
    --seed <N>                  Random seed (default: 42)
    --fee-rate <RATE>           Fee as a share of the amount (default: 0.01)
    --output <FILE>             Write to file instead of stdout

EXAMPLES:
    money-flows trace --input ledger.csv --output flows.csv
    money-flows trace --input ledger.csv --output flows.csv --heuristic greedy,well-mixed --infer
    money-flows balances --input ledger.csv --starting-balance infer --format json
    money-flows generate --accounts 20 --transactions 1000 --seed 7 --output ledger.csv

Multiple heuristics run one after the other, each with its own ledger; output
files get a _<heuristic> suffix. Set RUST_LOG to control log verbosity."#
    );
}

fn exit_with(message: impl Display) -> ! {
    eprintln!("Error: {}", message);
    process::exit(1);
}

fn value<'a>(args: &'a [String], i: usize, flag: &str, expected: &str) -> &'a str {
    args.get(i).map(String::as_str).unwrap_or_else(|| {
        eprintln!("{} requires {}", flag, expected);
        process::exit(1);
    })
}

fn parsed<T: std::str::FromStr>(args: &[String], i: usize, flag: &str, expected: &str) -> T
where
    T::Err: Display,
{
    value(args, i, flag, expected).parse().unwrap_or_else(|e| {
        eprintln!("{}: {}", flag, e);
        process::exit(1);
    })
}

/// Options shared by `trace` and `balances`.
struct RunOptions {
    input: String,
    output: Option<String>,
    issues: Option<String>,
    format: String,
    config: RunConfig,
}

fn parse_run_options(args: &[String]) -> RunOptions {
    let mut input = None;
    let mut output = None;
    let mut issues = None;
    let mut format = "text".to_string();
    let mut config_path = None;
    let mut overrides: Vec<Box<dyn FnOnce(&mut RunConfig)>> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--input" => {
                i += 1;
                input = Some(value(args, i, flag, "a file path").to_string());
            }
            "--output" => {
                i += 1;
                output = Some(value(args, i, flag, "a file path").to_string());
            }
            "--issues" => {
                i += 1;
                issues = Some(value(args, i, flag, "a file path").to_string());
            }
            "--config" => {
                i += 1;
                config_path = Some(value(args, i, flag, "a file path").to_string());
            }
            "--format" => {
                i += 1;
                format = value(args, i, flag, "'text' or 'json'").to_string();
            }
            "--heuristic" => {
                i += 1;
                let heuristics = value(args, i, flag, "a heuristic list")
                    .split(',')
                    .map(|h| {
                        h.trim().parse::<AllocationPolicy>().unwrap_or_else(|e| {
                            eprintln!("--heuristic: {}", e);
                            process::exit(1);
                        })
                    })
                    .collect::<Vec<_>>();
                overrides.push(Box::new(move |c: &mut RunConfig| c.heuristics = heuristics));
            }
            "--infer" => overrides.push(Box::new(|c: &mut RunConfig| c.infer = true)),
            "--strict" => overrides.push(Box::new(|c: &mut RunConfig| c.strict = true)),
            "--resolution" => {
                i += 1;
                let resolution: Decimal = parsed(args, i, flag, "an amount");
                overrides.push(Box::new(move |c: &mut RunConfig| c.resolution_limit = resolution));
            }
            "--cutoff" => {
                i += 1;
                let hours: f64 = parsed(args, i, flag, "a number of hours");
                overrides.push(Box::new(move |c: &mut RunConfig| c.time_cutoff = Some(hours)));
            }
            "--starting-balance" => {
                i += 1;
                let mode: StartingBalanceMode = parsed(args, i, flag, "none, infer or read-from-column");
                overrides.push(Box::new(move |c: &mut RunConfig| c.starting_balance = mode));
            }
            "--fee-convention" => {
                i += 1;
                let convention: FeeConvention = parsed(args, i, flag, "a fee convention");
                overrides.push(Box::new(move |c: &mut RunConfig| c.fee_convention = convention));
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let input = input.unwrap_or_else(|| exit_with("--input <FILE> is required"));
    let mut config = match config_path {
        Some(path) => RunConfig::from_path(&path).unwrap_or_else(|e| exit_with(e)),
        None => RunConfig::default(),
    };
    for apply in overrides {
        apply(&mut config);
    }
    config.validate().unwrap_or_else(|e| exit_with(e));

    RunOptions {
        input,
        output,
        issues,
        format,
        config,
    }
}

fn load_starting_balances(input: &str, config: &RunConfig) -> Result<StartingBalances, FlowError> {
    if config.starting_balance == StartingBalanceMode::None {
        return Ok(StartingBalances::new());
    }
    let stream = TransactionReader::from_path(input, config)?.filter_map(Result::ok);
    Ok(infer_starting_balances(stream, config))
}

/// `flows.csv` becomes `flows_greedy.csv` when several heuristics share one path.
fn suffixed(path: &str, policy: AllocationPolicy, multiple: bool) -> String {
    if !multiple {
        return path.to_string();
    }
    let p = Path::new(path);
    let stem = p.file_stem().and_then(|s| s.to_str()).unwrap_or(path);
    let name = match p.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, policy.as_str().replace('-', "_"), ext),
        None => format!("{}_{}", stem, policy.as_str().replace('-', "_")),
    };
    p.with_file_name(name).to_string_lossy().into_owned()
}

fn trace_one(
    options: &RunOptions,
    policy: AllocationPolicy,
    starting: &StartingBalances,
    multiple: bool,
) -> Result<RunSummary, FlowError> {
    let config = options.config.for_heuristic(policy);
    let sink: Box<dyn Write> = match &options.output {
        Some(path) => Box::new(File::create(suffixed(path, policy, multiple))?),
        None => Box::new(io::stdout().lock()),
    };
    let mut writer = FlowWriter::from_writer(sink, &config.timestamp_format);

    let mut ledger = Ledger::new(config.clone())?.with_starting_balances(starting.clone());
    let records = TransactionReader::from_path(&options.input, &config)?;
    let summary = ledger.run(records, |flow| writer.write(flow))?;
    writer.flush()?;

    if let Some(path) = &options.issues {
        write_issues(File::create(suffixed(path, policy, multiple))?, ledger.issues())?;
    }
    Ok(summary)
}

fn cmd_trace(args: &[String]) {
    let options = parse_run_options(args);
    let starting = load_starting_balances(&options.input, &options.config).unwrap_or_else(|e| exit_with(e));
    let multiple = options.config.heuristics.len() > 1;

    let mut summaries = Vec::new();
    for policy in options.config.heuristics.clone() {
        let summary = trace_one(&options, policy, &starting, multiple).unwrap_or_else(|e| exit_with(e));
        summaries.push(summary);
    }

    if options.format == "json" {
        let json = serde_json::to_string_pretty(&summaries).unwrap_or_else(|e| exit_with(e));
        eprintln!("{}", json);
    } else {
        for summary in &summaries {
            eprintln!("{}\n", summary);
        }
    }
}

fn cmd_balances(args: &[String]) {
    let options = parse_run_options(args);
    let mut config = options.config.clone();
    if config.starting_balance == StartingBalanceMode::None {
        config.starting_balance = StartingBalanceMode::Infer;
    }
    let starting = load_starting_balances(&options.input, &config).unwrap_or_else(|e| exit_with(e));

    if options.format == "json" {
        let balances: std::collections::BTreeMap<String, String> = starting
            .iter()
            .map(|(account, balance)| (account.to_string(), balance.to_string()))
            .collect();
        let json = serde_json::to_string_pretty(&balances).unwrap_or_else(|e| exit_with(e));
        println!("{}", json);
    } else {
        println!("=== Starting Balances ({:?}) ===", config.starting_balance);
        if starting.is_empty() {
            println!("Every account can start empty.");
        }
        for (account, balance) in starting.iter() {
            println!("  {:<20} {:>16}", account.as_str(), balance);
        }
        println!("Total: {}", starting.total());
    }
}

fn cmd_generate(args: &[String]) {
    let mut config = LedgerConfig::default();
    let mut output_path: Option<String> = None;
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--accounts" => {
                i += 1;
                config.account_count = parsed(args, i, flag, "a number");
            }
            "--transactions" => {
                i += 1;
                config.transaction_count = parsed(args, i, flag, "a number");
            }
            "--seed" => {
                i += 1;
                config.seed = parsed(args, i, flag, "a number");
            }
            "--fee-rate" => {
                i += 1;
                config.fee_rate = parsed(args, i, flag, "a decimal share");
            }
            "--output" => {
                i += 1;
                output_path = Some(value(args, i, flag, "a file path").to_string());
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let transactions = generate_random_ledger(&config);
    let records = to_input_records(&transactions, money_flows::config::DEFAULT_TIMESTAMP_FORMAT);

    let sink: Box<dyn Write> = match &output_path {
        Some(path) => Box::new(File::create(path).unwrap_or_else(|e| {
            eprintln!("Error writing to '{}': {}", path, e);
            process::exit(1);
        })),
        None => Box::new(io::stdout().lock()),
    };
    let mut writer = csv::Writer::from_writer(sink);
    for record in &records {
        writer.serialize(record).unwrap_or_else(|e| exit_with(e));
    }
    writer.flush().unwrap_or_else(|e| exit_with(e));

    if let Some(path) = output_path {
        eprintln!(
            "Generated {} transactions across {} accounts → {}",
            records.len(),
            config.account_count,
            path
        );
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = args[1].as_str();
    let rest = &args[2..];

    match command {
        "trace" => cmd_trace(rest),
        "balances" => cmd_balances(rest),
        "generate" => cmd_generate(rest),
        "help" | "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            process::exit(1);
        }
    }
}
