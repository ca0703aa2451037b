/// Open the service and print the port the worker answered on.
pub async fn execute(global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let service = global.create_service().await?;

    println!("{}", service.port());
    if let Some(pid) = service.pid() {
        tracing::info!(pid, port = service.port(), "Worker ready");
    }

    service.stop();
    Ok(())
}
