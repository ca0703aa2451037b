//! Stand-in for `python -u python_service_runscript.py <port> <debug>`.
//!
//! Exits with status 2 when the entry script does not exist, like the
//! interpreter does.

use std::path::Path;
use std::process::ExitCode;

use pyserve_test_utils::FakeWorker;

fn parse_args(args: &[String]) -> Result<(String, u16), String> {
    let mut rest = args.iter().skip(1).skip_while(|a| a.as_str() == "-u");
    let script = rest.next().ok_or("missing script path")?.clone();
    let port = rest
        .next()
        .ok_or("missing port")?
        .parse::<u16>()
        .map_err(|e| format!("invalid port: {}", e))?;
    Ok((script, port))
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let (script, port) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("usage: fake-worker [-u] <script> <port> <debug>: {}", e);
            return ExitCode::from(2);
        }
    };

    if !Path::new(&script).is_file() {
        eprintln!("fake-worker: can't open file '{}': [Errno 2] No such file or directory", script);
        return ExitCode::from(2);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("fake-worker: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("fake-worker serving {} on port {}", script, port);
    let served = runtime.block_on(FakeWorker::builder().serve_forever(port));

    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fake-worker: failed to serve on port {}: {}", port, e);
            ExitCode::FAILURE
        }
    }
}
