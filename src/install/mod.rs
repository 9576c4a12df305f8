mod system;

pub use system::{install, uninstall, unit_file};
