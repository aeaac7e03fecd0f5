use tracing_subscriber::EnvFilter;

use repograph::{cli, output, router};

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = cli::parse();
    init_logging(cli.verbose);
    let json = cli.json;
    if let Err(err) = router::dispatch(cli) {
        std::process::exit(output::format_error(&err, json));
    }
}
