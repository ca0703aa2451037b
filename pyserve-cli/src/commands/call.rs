use anyhow::Context;
use clap::Args;
use serde_json::Value;

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Worker method to invoke
    pub method: String,

    /// Positional arguments as a JSON array
    #[arg(value_name = "ARGS_JSON")]
    pub args: Option<String>,
}

pub async fn execute(args: CallArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let params = match args.args.as_deref() {
        None => Vec::new(),
        Some(raw) => match serde_json::from_str::<Value>(raw).context("ARGS_JSON is not valid JSON")? {
            Value::Array(params) => params,
            other => anyhow::bail!("ARGS_JSON must be a JSON array, got {}", other),
        },
    };

    let service = global.create_service().await?;
    let result = service.request(&args.method, params).await;
    service.stop();

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}
