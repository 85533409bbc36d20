mod utils;

use crate::utils::{network_line, summary_line, write_output, OcaRow};
use clap::{Args, Parser, Subcommand};
use oca_locator::{GeocodingStrategy, LocatorConfig, LocatorError, OcaLocator, OcaRecord};
use std::path::PathBuf;
use std::process::exit;
use tabled::settings::Style;
use tabled::Table;
use tokio::runtime::Runtime;
use tracing::{error, info};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// disable logging
    #[clap(long, global = true)]
    no_log: bool,

    /// enable debug logging
    #[clap(long, global = true)]
    debug: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct EngineOpts {
    /// location providers to use
    #[clap(short, long, value_enum)]
    geocoding: Option<GeocodingStrategy>,

    /// skip the per-OCA ASN lookup and use the local network's ASN instead
    #[clap(long)]
    no_oca_asn: bool,

    /// number of OCAs processed in parallel
    #[clap(short, long)]
    concurrency: Option<usize>,

    /// overall deadline, e.g. `90s` or `2m`
    #[clap(short, long, value_parser = humantime::parse_duration)]
    deadline: Option<std::time::Duration>,
}

#[derive(Args, Clone)]
struct OutputOpts {
    /// print out results in JSON format instead of Markdown table
    #[clap(short, long)]
    json: bool,

    /// also write the JSON results to this file
    #[clap(short, long)]
    output_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the OCAs fast.com assigns to this network and locate them
    Locate {
        /// number of OCA URLs to request
        #[clap(short, long)]
        url_count: Option<u32>,

        #[clap(flatten)]
        engine: EngineOpts,

        #[clap(flatten)]
        output: OutputOpts,
    },

    /// Locate the given OCA hostnames without contacting fast.com
    Lookup {
        /// OCA hostnames, e.g. ipv4-c001-ord001-ix.1.oca.nflxvideo.net
        #[clap(required = true)]
        hostnames: Vec<String>,

        #[clap(flatten)]
        engine: EngineOpts,

        #[clap(flatten)]
        output: OutputOpts,
    },

    /// Print a fresh fast.com token
    Token,

    /// Print the effective configuration
    Config,
}

impl EngineOpts {
    fn apply(&self, config: &mut LocatorConfig) {
        if let Some(geocoding) = self.geocoding {
            config.geocoding = geocoding;
        }
        if self.no_oca_asn {
            config.lookup_oca_asn = false;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency.max(1);
        }
        if let Some(deadline) = self.deadline {
            config.deadline = deadline;
        }
    }
}

fn get_tokio_runtime() -> Runtime {
    match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start async runtime: {}", e);
            exit(1);
        }
    }
}

fn build_locator(config: LocatorConfig) -> OcaLocator {
    for line in config.display_summary() {
        info!("{}", line);
    }
    match OcaLocator::with_config(config) {
        Ok(locator) => locator,
        Err(e) => {
            error!("failed to initialize locator: {}", e);
            exit(1);
        }
    }
}

fn fail(stage: &str, e: LocatorError) -> ! {
    error!("{} failed: {}", stage, e);
    eprintln!("error: {} failed: {}", stage, e);
    exit(1);
}

fn print_records<T: serde::Serialize>(records: &[OcaRecord], json_value: &T, output: &OutputOpts) {
    let json = match serde_json::to_string_pretty(json_value) {
        Ok(json) => json,
        Err(e) => fail("serializing results", e.into()),
    };

    if output.json {
        println!("{}", json);
    } else {
        let rows: Vec<OcaRow> = records.iter().map(OcaRow::from).collect();
        println!("{}", Table::new(rows).with(Style::markdown()));
        println!();
        println!("{}", summary_line(records));
    }

    if let Some(path) = &output.output_file {
        match write_output(path, &json) {
            Ok(()) => info!("results written to {}", path.display()),
            Err(e) => fail("writing output file", e.into()),
        }
    }
}

fn enable_logging() {
    tracing_subscriber::fmt()
        .with_ansi(true)
        .with_level(true)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();

    if cli.debug {
        std::env::set_var("RUST_LOG", "oca_locator=debug");
    } else if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "oca_locator=info");
    }
    if !cli.no_log {
        enable_logging();
    }

    let mut config = LocatorConfig::from_env();

    match cli.command {
        Commands::Locate {
            url_count,
            engine,
            output,
        } => {
            if let Some(url_count) = url_count {
                config.url_count = url_count.max(1);
            }
            engine.apply(&mut config);
            let locator = build_locator(config);

            let rt = get_tokio_runtime();
            let result = match rt.block_on(locator.locate()) {
                Ok(result) => result,
                Err(e) => fail("OCA discovery", e),
            };

            if !output.json {
                println!("{}", network_line(&result.network));
                println!();
            }
            print_records(&result.records, &result, &output);
        }
        Commands::Lookup {
            hostnames,
            engine,
            output,
        } => {
            engine.apply(&mut config);
            let locator = build_locator(config);

            let rt = get_tokio_runtime();
            let records = rt.block_on(locator.locate_hostnames(&hostnames));
            print_records(&records, &records, &output);
        }
        Commands::Token => {
            let locator = build_locator(config);
            let rt = get_tokio_runtime();
            match rt.block_on(locator.token()) {
                Ok(token) => println!("{}", token),
                Err(e) => fail("token extraction", e),
            }
        }
        Commands::Config => {
            for line in config.display_summary() {
                println!("{}", line);
            }
        }
    }
}
