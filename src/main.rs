//! Fieldflow command-line front end

use fieldflow::cli::FieldflowCli;
use fieldflow::FormError;
use std::process;

fn main() {
    let mut cli = FieldflowCli::new();

    match cli.run() {
        Ok(()) => {}
        Err(FormError::Io(e)) => {
            eprintln!("IO Error: {}", e);
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
