use parley::app::{self, AppError};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), AppError> {
    // Diagnostics go to stderr so the transcript on stdout stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    app::run()
}
