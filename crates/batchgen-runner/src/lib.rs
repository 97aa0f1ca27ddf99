pub mod config;
pub mod constraints;
pub mod doctor;
pub mod generate;
pub mod maintain;
pub mod queue_ops;
pub mod runner;
pub mod scenario;
pub mod util;

pub use config::*;
pub use constraints::*;
pub use doctor::*;
pub use generate::*;
pub use maintain::*;
pub use queue_ops::*;
pub use runner::*;
pub use util::*;
