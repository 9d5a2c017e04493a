// CLI modules
mod args;
mod op;
mod ops;
mod process;
mod state;
mod version;

use args::{Args, Parser};
use clap::Subcommand;
use op::Op;
use ops::{Add, Cat, Init, Key, Publish, Resolve, Serve, Version};

command_enum! {
    (Init, Init),
    (Add, Add),
    (Cat, Cat),
    (Key, Key),
    (Publish, Publish),
    (Resolve, Resolve),
    (Serve, Serve),
    (Version, Version),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // flag > config file > warn
    let level = args.log_level.unwrap_or_else(|| {
        state::AppState::load(args.config_path.clone())
            .map(|state| process::parse_level(&state.config.log_level))
            .unwrap_or(tracing::Level::WARN)
    });
    let guard = process::init_logging(level);

    let ctx = op::OpContext::new(args.config_path);

    let code = match args.command.execute(&ctx).await {
        Ok(output) => {
            let output = output.to_string();
            if !output.is_empty() {
                println!("{}", output);
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };
    // exit skips destructors, flush the log writer first
    drop(guard);
    std::process::exit(code);
}
