use shellfyre::env::LOG_KEY;
use shellfyre::{Environment, Interpreter};
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_env(LOG_KEY).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let status = Interpreter::new(Environment::new()).repl();
    std::process::exit(status);
}
