use clap::Args;

#[derive(Args, Debug)]
pub struct PortArgs {
    /// First port to try (defaults to the configured free-port start)
    #[arg(long, value_name = "N")]
    pub from: Option<u16>,
}

pub fn execute(args: PortArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let start = match args.from {
        Some(port) => port,
        None => global.options()?.free_start_port,
    };

    let port = pyserve::net::find_free_port(start)?;
    println!("{}", port);
    Ok(())
}
