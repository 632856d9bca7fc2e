use std::{io, process};

use persisted_state::{
    application::{
        commands::{CommandContext, execute},
        error::AppError,
    },
    config,
    infra::{error::InfraError, telemetry},
    storage::select_backend,
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(source = report.source, chain = ?report.messages, "{error}");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(source = report.source, chain = ?report.messages, "{error}");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(AppError::from)?;

    let command = cli_args.command.unwrap_or(config::Command::Probe);

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let selected = select_backend(settings.storage.backend, &settings.storage.directory)
        .map_err(InfraError::from)?;
    info!(
        backend = selected.backend.name(),
        fell_back = selected.fell_back,
        decode_failure = %settings.objects.decode_failure,
        "Persistence engine ready"
    );

    let context = CommandContext::new(selected, &settings);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    execute(&context, command, &mut out).await
}
