use bosh_operator::{
    cli::{self, Opts},
    logging,
};
use clap::Parser;
use snafu::{ResultExt, Snafu};

const APP_NAME: &str = "bosh-operator";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("command failed"))]
    Run { source: cli::Error },
}

#[snafu::report]
fn main() -> Result<(), Error> {
    let opts = Opts::parse();
    logging::initialize_logging("BOSH_OPERATOR_LOG", APP_NAME).context(InitializeLoggingSnafu)?;

    let mut stdout = std::io::stdout().lock();
    opts.command.run(&mut stdout).context(RunSnafu)
}
