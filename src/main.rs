use std::path::Path;

use log::{error, info, warn, LevelFilter};
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Logger, Root},
    encode::pattern::PatternEncoder,
};
use rocket::Error as RocketError;
use thiserror::Error;

const LOG_CONFIG_FILE: &str = "log4rs.yaml";

/// Errors that stop the server from starting or running.
#[derive(Debug, Error)]
enum Error {
    #[error(transparent)]
    Rocket(#[from] RocketError),
}

/// Log to the console only, for machines without a `log4rs.yaml`.
fn console_logging() -> log4rs::Config {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {h({l:5})} {t} - {m}{n}",
        )))
        .build();
    log4rs::Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .logger(Logger::builder().build("ballot_ledger", LevelFilter::Info))
        .build(Root::builder().appender("stdout").build(LevelFilter::Warn))
        .expect("Built-in logging config is valid")
}

fn init_logging() {
    if Path::new(LOG_CONFIG_FILE).exists() {
        log4rs::init_file(LOG_CONFIG_FILE, log4rs_dynamic_filters::default_deserializers())
            .expect("Failed to initialise logging");
        info!("Initialised logging from {LOG_CONFIG_FILE}");
    } else {
        log4rs::init_config(console_logging()).expect("Failed to initialise logging");
        warn!("No {LOG_CONFIG_FILE} found, logging to the console only");
    }
}

async fn run() -> Result<(), Error> {
    info!("Configuring server...");
    let rocket = ballot_ledger::build().ignite().await?;
    info!("...ledger open, server configured!");
    // Rocket's own launch chatter is noise from here on.
    log4rs_dynamic_filters::DynamicLevelFilter::set("rocket", LevelFilter::Off);
    let _ = rocket.launch().await?;
    Ok(())
}

#[rocket::main]
async fn main() {
    init_logging();

    if let Err(err) = run().await {
        error!("{err}");
        error!("Critical failure, shutting down");
        std::process::exit(1)
    }
}
