use std::time::Duration;

use batchgen_core::{EntryId, ExecutorReport, PlatformResult};

use crate::ExecError;

/// Attempts to generate and verify the recipe for one package.
///
/// Implementations must return within `timeout`. An overrun is reported as
/// [`ExecutorReport::deadline_exceeded`], not as an error. `Err` means the
/// executor itself could not be run or did not answer in the structured form.
pub trait RecipeExecutor: Send + Sync {
    fn execute(&self, package: &EntryId, timeout: Duration) -> Result<ExecutorReport, ExecError>;
}

/// Produces per-platform results for already generated recipes. How the
/// environments are provisioned is the implementation's business.
pub trait PlatformValidator: Send + Sync {
    /// Empty `recipes` or `environments` means no filter on that axis.
    fn validate(&self, recipes: &[String], environments: &[String]) -> Result<Vec<PlatformResult>, ExecError>;
}
