// Terminal output for the command-line front end
pub mod progress;
pub mod summary;

pub use progress::progress_sink;
pub use summary::{print_catalog, print_report};
