//! Spinner for long-running cluster operations.
//!
//! The spinner animates on stderr from its own thread so the async work it
//! decorates is never blocked by rendering.
//!
//! # Example
//!
//! ```rust,ignore
//! let result = tui::spin("Checking cluster...", kubectl.cluster_reachable()).await;
//! ```

use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use teapot::Model;
use teapot::components::{Spinner, SpinnerStyle};
use teapot::style::{CLEAR_LINE, Color};

use super::is_interactive;

/// Handle to control a running spinner.
pub struct SpinnerHandle {
    running: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl SpinnerHandle {
    /// Stop the spinner.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }

    /// Stop with a success message.
    pub fn success(mut self, message: &str) {
        self.stop();
        teapot::output::success(message);
    }

    /// Stop with an error message.
    pub fn error(mut self, message: &str) {
        self.stop();
        teapot::output::error(message);
    }

    /// Stop with a warning message.
    pub fn warning(mut self, message: &str) {
        self.stop();
        teapot::output::warning(message);
    }

    /// Stop without any message.
    pub fn clear(mut self) {
        self.stop();
    }
}

impl Drop for SpinnerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start a spinner that can be manually controlled.
///
/// Outside a terminal, or in CI, the message is printed once instead.
pub fn start(message: impl Into<String>) -> SpinnerHandle {
    let message = message.into();
    let running = Arc::new(AtomicBool::new(true));

    if !is_interactive(false) {
        teapot::output::info(&message);
        return SpinnerHandle { running, join_handle: None };
    }

    let running_clone = Arc::clone(&running);
    let join_handle = std::thread::spawn(move || {
        let mut spinner =
            Spinner::new().style(SpinnerStyle::Dots).color(Color::Cyan).message(&message);
        let sleep_duration = SpinnerStyle::Dots.interval();

        while running_clone.load(Ordering::SeqCst) {
            eprint!("\r{}{}", CLEAR_LINE, spinner.view());
            let _ = io::stderr().flush();

            spinner.tick();
            std::thread::sleep(sleep_duration);
        }

        eprint!("\r{CLEAR_LINE}");
        let _ = io::stderr().flush();
    });

    SpinnerHandle { running, join_handle: Some(join_handle) }
}

/// Run an async operation with a spinner, clearing it when done.
pub async fn spin<F, T>(message: impl Into<String>, future: F) -> T
where
    F: Future<Output = T>,
{
    let handle = start(message);
    let result = future.await;
    handle.clear();
    result
}
