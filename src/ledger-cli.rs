//! Operator tool for a ballot ledger, usable while the server is down.
//! Reads the same `Rocket.toml` / `ROCKET_*` configuration as the server.

use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Arg, ArgAction, ArgMatches, Command};
use rocket::figment::Figment;
use thiserror::Error;

use ballot_ledger::config::{LedgerConfig, SyncConfig};
use ballot_ledger::election::standings;
use ballot_ledger::model::{
    election::ElectionDefaults,
    export::ballot_table_bytes,
    ledger::{Ledger, StorageError},
    roster::{Roster, RosterError, CANDIDATES_FILE, VOTERS_FILE},
};
use ballot_ledger::sync::{S3Store, SyncClient, SyncOutcome, SyncPolicy};

const PROGRAM_NAME: &str = "ledger-cli";

const ABOUT_TEXT: &str = "Inspect, archive and replicate a ballot ledger.

EXIT CODES:
     0: Success.
     1: Local error (configuration, ledger or roster).
     2: Remote sync did not complete.";

const EXPORT_PATH: &str = "EXPORT_PATH";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .subcommand_required(true)
        .subcommand(Command::new("status").about("Show election settings and sync state"))
        .subcommand(Command::new("results").about("Print the current ranking"))
        .subcommand(
            Command::new("export")
                .about("Write the ballot table as CSV")
                .arg(
                    Arg::new(EXPORT_PATH)
                        .help("Where to write the CSV file")
                        .action(ArgAction::Set)
                        .required(true),
                ),
        )
        .subcommand(Command::new("snapshot").about("Archive the ledger into the backup directory"))
        .subcommand(Command::new("push").about("Upload the ledger to the remote store"))
        .subcommand(Command::new("pull").about("Replace the ledger with the remote copy"))
        .subcommand(
            Command::new("reconcile").about("Run the startup decision between local and remote"),
        )
        .subcommand(
            Command::new("secrets")
                .about("Print the roster files as TOML, for pasting into a secret store"),
        )
}

/// Errors that this program may produce.
#[derive(Debug, Error)]
enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] rocket::figment::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Election(#[from] ballot_ledger::error::Error),
    #[error("{0} cannot be written as a TOML literal string, it contains '''")]
    Secrets(&'static str),
    #[error("Remote sync did not complete: {0}")]
    Sync(String),
}

impl Error {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Sync(_) => 2,
            _ => 1,
        }
    }
}

/// Everything the commands work on.
struct Context {
    ledger: Ledger,
    ledger_config: LedgerConfig,
    sync_config: SyncConfig,
}

impl Context {
    fn load(figment: &Figment) -> Result<Self, Error> {
        let ledger_config: LedgerConfig = figment.extract()?;
        let sync_config: SyncConfig = figment.extract()?;
        let fallback = ElectionDefaults::default();
        let defaults = ElectionDefaults {
            title: figment
                .extract_inner("default_title")
                .unwrap_or(fallback.title),
            max_selections: figment
                .extract_inner("default_max_selections")
                .unwrap_or(fallback.max_selections),
        };
        let ledger = Ledger::open(&ledger_config.ledger_path, defaults)?;
        Ok(Self {
            ledger,
            ledger_config,
            sync_config,
        })
    }

    fn sync_client(&self) -> SyncClient {
        if self.sync_config.is_complete() {
            SyncClient::new(
                self.ledger.clone(),
                Arc::new(S3Store::from_config(&self.sync_config)),
                &self.sync_config.s3_key,
                SyncPolicy::from(&self.sync_config),
            )
        } else {
            SyncClient::disabled(self.ledger.clone())
        }
    }
}

fn status(ctx: &Context) -> Result<(), Error> {
    let settings = ctx.ledger.settings()?;
    println!("Ledger:        {}", ctx.ledger.path().display());
    println!("Title:         {}", settings.title);
    println!("Status:        {}", settings.status);
    println!("Max choices:   {}", settings.max_selections);
    println!("Ballots:       {}", ctx.ledger.ballot_count()?);
    match settings.last_remote_sync_at {
        Some(at) => println!("Last sync:     {at}"),
        None => println!("Last sync:     never"),
    }
    match ctx.sync_client().location() {
        Some(location) => println!("Remote:        {location}"),
        None => println!("Remote:        not configured"),
    }
    let snapshots = ctx.ledger_config.archiver().list_snapshots()?;
    println!("Snapshots:     {}", snapshots.len());
    for stem in snapshots {
        println!("  {stem}");
    }
    Ok(())
}

fn results(ctx: &Context) -> Result<(), Error> {
    let tally = standings(&ctx.ledger, &ctx.ledger_config.roster())?;
    println!("{} voter{}", tally.voters, if tally.voters != 1 { "s" } else { "" });
    for (place, count) in tally.ranking.iter().enumerate() {
        println!(
            "{:>3}. {}: {} vote{}",
            place + 1,
            count.candidate,
            count.votes,
            if count.votes != 1 { "s" } else { "" }
        );
    }
    Ok(())
}

fn export(ctx: &Context, path: &str) -> Result<(), Error> {
    let candidates = ctx.ledger_config.roster().list_candidates()?;
    let (table, summary) = ballot_table_bytes(&candidates, &ctx.ledger.ballots()?)?;
    fs::write(path, table).map_err(StorageError::from)?;
    println!(
        "Wrote {} voters, {} votes to {path}",
        summary.voters, summary.total_votes
    );
    Ok(())
}

fn snapshot(ctx: &Context) -> Result<(), Error> {
    let candidates = ctx.ledger_config.roster().list_candidates()?;
    let snapshot = ctx
        .ledger_config
        .archiver()
        .snapshot(&ctx.ledger, &candidates)?;
    println!("{}", snapshot.export_path.display());
    println!("{}", snapshot.ledger_path.display());
    Ok(())
}

fn report(outcome: SyncOutcome) -> Result<(), Error> {
    let summary = outcome.report();
    match summary.at {
        Some(at) => println!("{} ({at})", summary.outcome),
        None => println!("{}", summary.outcome),
    }
    match outcome {
        SyncOutcome::Failed(failure) => Err(Error::Sync(failure.to_string())),
        SyncOutcome::Skipped(_) => Err(Error::Sync(
            summary.warning.unwrap_or(summary.outcome.to_string()),
        )),
        _ => Ok(()),
    }
}

/// Render the roster files as TOML multi-line literal strings.
fn secrets_toml(voters: Option<String>, candidates: Option<String>) -> Result<String, Error> {
    let mut toml = String::new();
    for (key, value) in [("voters_csv", voters), ("candidates_csv", candidates)] {
        if let Some(text) = value {
            if text.contains("'''") {
                return Err(Error::Secrets(key));
            }
            toml.push_str(&format!("{key} = '''\n{}\n'''\n", text.trim_end()));
        }
    }
    Ok(toml)
}

fn secrets(ctx: &Context) -> Result<(), Error> {
    let roster = ctx.ledger_config.roster();
    let voters = roster.read_source(VOTERS_FILE)?;
    let candidates = roster.read_source(CANDIDATES_FILE)?;
    if voters.is_none() {
        eprintln!("No {VOTERS_FILE} found in {}", roster.dir().display());
    }
    if candidates.is_none() {
        eprintln!("No {CANDIDATES_FILE} found in {}", roster.dir().display());
    }
    print!("{}", secrets_toml(voters, candidates)?);
    Ok(())
}

/// Run the chosen command.
async fn run(args: &ArgMatches) -> Result<(), Error> {
    let ctx = Context::load(&rocket::Config::figment())?;
    match args.subcommand() {
        Some(("status", _)) => status(&ctx),
        Some(("results", _)) => results(&ctx),
        Some(("export", sub)) => {
            let path: &String = sub.get_one(EXPORT_PATH).unwrap(); // Required argument is guaranteed to be present.
            export(&ctx, path)
        }
        Some(("snapshot", _)) => snapshot(&ctx),
        Some(("push", _)) => report(ctx.sync_client().push().await),
        Some(("pull", _)) => report(ctx.sync_client().pull().await),
        Some(("reconcile", _)) => report(ctx.sync_client().reconcile_on_startup().await),
        Some(("secrets", _)) => secrets(&ctx),
        _ => unreachable!("clap enforces a known subcommand"),
    }
}

#[rocket::main]
async fn main() -> ExitCode {
    let args = cli().get_matches();
    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}
