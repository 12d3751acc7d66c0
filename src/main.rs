//! sevenzip-plugins-build - bundles Rust 7-Zip format plugins into one DLL.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sevenzip_plugins::builder::{self, BuildEnv, Invocation, args};

#[derive(Parser, Debug)]
#[command(name = "sevenzip-plugins-build", version, disable_help_flag = true)]
struct Cli {
    /// Target architecture: 64, 32 or ARM64.
    arch: String,

    /// Environment overrides, output flag, cargo flags and plugins.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    if args::wants_help(&argv) {
        print!("{}", args::HELP);
        return;
    }
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let result = async {
        let cwd = std::env::current_dir()
            .map_err(|e| builder::BuildError::io("get working directory", e))?;
        let inv = Invocation::parse(&cli.arch, &cli.args, &cwd)?;
        let mut env = BuildEnv::from_process();
        env.apply_overrides(&inv.env);
        builder::run(inv, env, &cwd, interrupted()).await
    }
    .await;

    if let Err(e) = result {
        match e {
            builder::BuildError::Interrupted => eprintln!("interrupted"),
            ref e => {
                eprintln!("sevenzip-plugins-build: error: {e}");
                if let Some(note) = e.note() {
                    eprintln!("note: {note}");
                }
            }
        }
        std::process::exit(e.exit_code());
    }
}

/// Resolves on Ctrl+C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
