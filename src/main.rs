// src/main.rs

use dagrun::{cli, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();
    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("dagrun error: {err}");
    }

    match run(args).await {
        Ok(result) => std::process::exit(result),
        Err(err) => {
            eprintln!("dagrun error: {err}");
            std::process::exit(err.exit_status());
        }
    }
}
