//! vfsbridge REPL entry point.
//!
//! Launch the interactive shell:
//! ```bash
//! cargo run -p vfsbridge-repl
//! ```

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    // Logs go to stderr so they never mix with command output
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("vfsbridge=info".parse()?))
        .init();

    vfsbridge_repl::run()
}
