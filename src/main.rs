mod api;
mod cli;
mod config;
mod error;
mod interactive;
mod migrator;
mod server;

use cli::Cli;
use log::{debug, error};

fn main() {
    debug!("Command-line args: {:?}", std::env::args_os().collect::<Vec<_>>());

    if let Err(err) = Cli::handle_command_line() {
        error!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
