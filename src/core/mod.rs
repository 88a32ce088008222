pub mod dataset;
pub mod duplicate;
pub mod genealogy;
pub mod hash;
pub mod image;
pub mod index;
pub mod relatives;
pub mod repository;

use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::time::Instant;

/// Run `f()`, log how long it took (with `label`), and return its result.
pub(crate) fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    info!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}

/// A bar for a pair scan, or a hidden one when progress output is off.
pub(crate) fn progress_bar(enabled: bool, label: &str) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{spinner:.green} {msg:<10} [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    bar.set_style(style);
    bar.set_message(label.to_string());
    bar
}
