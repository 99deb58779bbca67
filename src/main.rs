#![allow(clippy::result_large_err)]

use anyhow::{anyhow, Context};
use std::path::Path;
use turnstone::config::{ServiceConfig, DEFAULT_MAPPINGS_DIR, DEFAULT_MAPPINGS_SUFFIX};
use turnstone::mapping::repository::MappingRepository;
use turnstone::telemetry;

enum CliCommand {
    Run {
        config_path: Option<String>,
    },
    CheckMappings {
        dir: Option<String>,
        suffix: Option<String>,
    },
    Help,
    CheckMappingsHelp,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise telemetry")?;

    match parse_cli_args()? {
        CliCommand::Run { config_path } => {
            let config = match config_path {
                Some(path) => ServiceConfig::from_path(&path),
                None => ServiceConfig::load(),
            }
            .context("failed to load configuration")?;

            let app = turnstone::app::GatewayApp::initialise(config)
                .await
                .context("failed to construct application")?;

            app.run().await.context("application runtime error")
        }
        CliCommand::CheckMappings { dir, suffix } => {
            run_check_mappings(dir, suffix)?;
            Ok(())
        }
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::CheckMappingsHelp => {
            print_check_mappings_help();
            Ok(())
        }
    }
}

fn parse_cli_args() -> anyhow::Result<CliCommand> {
    let mut args = std::env::args().skip(1);
    let Some(first) = args.next() else {
        return Ok(CliCommand::Run { config_path: None });
    };

    if first == "check-mappings" {
        return parse_check_mappings_args(args);
    }

    let mut config_path = None;
    let mut pending = Some(first);

    loop {
        let arg = match pending.take() {
            Some(value) => value,
            None => match args.next() {
                Some(value) => value,
                None => break,
            },
        };

        match arg.as_str() {
            "-c" | "--config" => {
                if config_path.is_some() {
                    anyhow::bail!("config path specified multiple times");
                }
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected path after {arg}"))?;
                config_path = Some(value);
            }
            "-h" | "--help" => return Ok(CliCommand::Help),
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    }

    Ok(CliCommand::Run { config_path })
}

fn parse_check_mappings_args<I>(args: I) -> anyhow::Result<CliCommand>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut dir = None;
    let mut suffix = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dir" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected path after --dir"))?;
                dir = Some(value);
            }
            "--suffix" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected value after --suffix"))?;
                suffix = Some(value);
            }
            "-h" | "--help" => return Ok(CliCommand::CheckMappingsHelp),
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    }

    Ok(CliCommand::CheckMappings { dir, suffix })
}

fn print_help() {
    println!(
        "\
Usage: turnstone [OPTIONS]
       turnstone check-mappings [--dir <PATH>] [--suffix <SUFFIX>]

Options:
  -c, --config <PATH>    Path to the turnstone configuration file
  -h, --help             Print this help message

Check-mappings:
      --dir <PATH>       Mappings directory (default: mappings)
      --suffix <SUFFIX>  Mapping file suffix (default: _mapping.json)
  -h, --help             Print this help message
"
    );
}

fn print_check_mappings_help() {
    println!(
        "\
Usage: turnstone check-mappings [OPTIONS]

Options:
      --dir <PATH>       Mappings directory (default: mappings)
      --suffix <SUFFIX>  Mapping file suffix (default: _mapping.json)
  -h, --help             Print this help message
"
    );
}

fn run_check_mappings(dir: Option<String>, suffix: Option<String>) -> anyhow::Result<()> {
    let dir = dir.unwrap_or_else(|| DEFAULT_MAPPINGS_DIR.to_string());
    let suffix = suffix.unwrap_or_else(|| DEFAULT_MAPPINGS_SUFFIX.to_string());

    let report = MappingRepository::load(Path::new(&dir), &suffix)
        .with_context(|| format!("failed to read mappings from {dir}"))?;

    for fault in &report.skipped {
        eprintln!("{}: {}", fault.path.display(), fault.reason);
    }
    println!("loaded {} mapping(s) from {dir}", report.loaded);
    if let Some(default) = report.repository.default_descriptor() {
        println!("default target: {}", default.target_id);
    }

    if report.skipped.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("one or more mapping files failed validation"))
    }
}
