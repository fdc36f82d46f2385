use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use ironswarm::args::SwarmArgs;
use ironswarm::config::load_config;
use ironswarm::error::{AppError, TransportError};
use ironswarm::logger;
use ironswarm::node::{Node, NodeOptions};
use ironswarm::scenario::builtin_registry;

const EXIT_OK: u8 = 0;
const EXIT_CONFIG: u8 = 1;
const EXIT_BIND: u8 = 2;
const EXIT_SIGNAL: u8 = 130;

fn exit_code_for(err: &AppError) -> u8 {
    match err {
        AppError::Transport(TransportError::Bind { .. }) => EXIT_BIND,
        _ => EXIT_CONFIG,
    }
}

fn main() -> ExitCode {
    let args = SwarmArgs::parse();
    logger::init_logging(args.verbose, args.log_file.as_deref().map(Path::new));

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Failed to build runtime: {}", err);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let code = runtime.block_on(async move {
        let config = match load_config(args.config.as_deref().map(Path::new)) {
            Ok(config) => config,
            Err(err) => {
                error!("{}", err);
                return EXIT_CONFIG;
            }
        };

        let options = NodeOptions::from(&args);
        let node = match Node::bind(options, config, builtin_registry()).await {
            Ok(node) => node,
            Err(err) => {
                error!("{}", err);
                return exit_code_for(&err);
            }
        };

        let signal_node = node.clone();
        let signalled = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let signalled_flag = std::sync::Arc::clone(&signalled);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                signalled_flag.store(true, std::sync::atomic::Ordering::SeqCst);
                signal_node.trigger_shutdown();
            }
        });

        match node.run().await {
            Ok(()) => {
                if signalled.load(std::sync::atomic::Ordering::SeqCst) {
                    EXIT_SIGNAL
                } else {
                    EXIT_OK
                }
            }
            Err(err) => {
                error!("{}", err);
                exit_code_for(&err)
            }
        }
    });

    ExitCode::from(code)
}
