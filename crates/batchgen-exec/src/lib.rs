//! Boundaries to the external collaborators: the per-package recipe
//! executor and the multi-environment platform validator.

pub mod error;
pub mod subprocess;
pub mod types;
pub mod validator;

pub use error::ExecError;
pub use subprocess::SubprocessExecutor;
pub use types::{PlatformValidator, RecipeExecutor};
pub use validator::ResultFileValidator;
