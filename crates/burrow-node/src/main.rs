use std::process::ExitCode;

use burrow_node::{
    telemetry,
    Config,
    Node,
};
use tracing::{
    error,
    info,
};

// Following the BSD convention for failing to read config
// See here: https://freedesktop.org/software/systemd/man/systemd.exec.html#Process%20Exit%20Codes
const EX_CONFIG: u8 = 78;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::get() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("failed reading config:\n{error:?}");
            return ExitCode::from(EX_CONFIG);
        }
    };

    if let Err(error) = telemetry::configure()
        .set_filter_directives(&config.log)
        .set_pretty_print(config.pretty_print)
        .try_init()
    {
        eprintln!(
            "failed initializing telemetry with filter directive `{log}`\n{error:?}",
            log = config.log,
        );
        return ExitCode::FAILURE;
    }

    info!(
        config = %serde_json::to_string(&config).unwrap_or_default(),
        "starting burrow node"
    );

    if let Err(error) = Node::run_until_stopped(config).await {
        error!(
            error = AsRef::<dyn std::error::Error>::as_ref(&error),
            "burrow node stopped with an error"
        );
        return ExitCode::FAILURE;
    }
    info!("burrow node stopped");
    ExitCode::SUCCESS
}
