use std::path::PathBuf;

use snafu::{ResultExt, Snafu};
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Registry,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to initialize rolling file appender in {directory:?}"))]
    InitRollingFileAppender {
        source: InitError,
        directory: PathBuf,
    },

    #[snafu(display("failed to install the global tracing subscriber"))]
    InstallSubscriber { source: TryInitError },
}

/// Initializes `tracing` logging with the filter read from the environment
/// variable `env`, e.g. `BOSH_OPERATOR_LOG=debug`. Without it the maximum
/// level is INFO.
///
/// Logs are written to stderr, stdout is reserved for command output. Log
/// output is additionally copied to a daily rotated file if
/// `{env}_DIRECTORY` is set to a directory path.
pub fn initialize_logging(env: &str, app_name: &str) -> Result<(), Error> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(env)
        .from_env_lossy();

    let file_appender_directory = std::env::var_os(format!("{env}_DIRECTORY")).map(PathBuf::from);
    let file_layer = file_appender_directory
        .as_deref()
        .map(|directory| {
            RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(app_name)
                .filename_suffix("log")
                .max_log_files(6)
                .build(directory)
                .context(InitRollingFileAppenderSnafu { directory })
        })
        .transpose()?
        .map(|appender| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(appender)
        });

    Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context(InstallSubscriberSnafu)?;

    // Logging is only possible once the subscriber is installed
    match file_appender_directory {
        Some(directory) => tracing::info!(directory = %directory.display(), "file logging enabled"),
        None => tracing::debug!("file logging disabled, because no log directory set"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tracing::{debug, error, info};

    // Run `BOSH_OPERATOR_TEST_LOG=debug cargo test default_tracing -- --nocapture`
    // to see the DEBUG message as well.
    #[test]
    fn default_tracing_level_is_info() {
        super::initialize_logging("BOSH_OPERATOR_TEST_LOG", "test").unwrap();

        error!("ERROR level messages should be seen.");
        info!("INFO level messages should also be seen by default.");
        debug!("DEBUG level messages should be seen only if the variable is set.");
    }
}
