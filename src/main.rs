//! CTF platform installer
//!
//! Command-line entry point; see the library crate for the details.

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    match ctf_installer::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Don't print if it's an empty error (e.g., from a clap usage error)
            let msg = e.to_string();
            if !msg.is_empty() {
                eprintln!("Error: {e}");

                if let Some(diagnostics) = e.diagnostics() {
                    eprintln!();
                    eprintln!("{diagnostics}");
                }
            }

            let code = e.exit_code();
            ExitCode::from(code as u8)
        }
    }
}
