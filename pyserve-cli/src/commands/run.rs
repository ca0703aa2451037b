use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use pyserve::WorkerService;
use serde_json::{Map, Value};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Script to run in the worker
    pub script: PathBuf,

    /// Script input as a JSON object
    #[arg(long, value_name = "JSON", conflicts_with = "input_file")]
    pub input: Option<String>,

    /// Read the script input from a JSON file
    #[arg(long, value_name = "PATH")]
    pub input_file: Option<PathBuf>,
}

pub async fn execute(args: RunArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let input = read_input(&args)?;
    let script = std::path::absolute(&args.script)
        .with_context(|| format!("Invalid script path {}", args.script.display()))?;

    let service = global.create_service().await?;
    let result = service.run_script(&script, &input).await;
    service.stop();

    match result {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => match e.remote_exception() {
            Some(exception) => {
                eprintln!("{}", WorkerService::format_exception(exception));
                anyhow::bail!("script {} failed", args.script.display())
            }
            None => Err(e.into()),
        },
    }
}

fn read_input(args: &RunArgs) -> anyhow::Result<Map<String, Value>> {
    let raw = match (&args.input, &args.input_file) {
        (Some(json), _) => json.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file {}", path.display()))?,
        (None, None) => return Ok(Map::new()),
    };

    match serde_json::from_str::<Value>(&raw).context("Script input is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("Script input must be a JSON object, got {}", other),
    }
}
