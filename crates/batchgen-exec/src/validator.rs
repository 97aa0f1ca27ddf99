use std::path::PathBuf;

use batchgen_core::PlatformResult;

use crate::{ExecError, PlatformValidator};

/// Reads the JSON result list written by the multi-environment validation
/// phase.
#[derive(Clone, Debug)]
pub struct ResultFileValidator {
    pub path: PathBuf,
}

impl ResultFileValidator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PlatformValidator for ResultFileValidator {
    fn validate(&self, recipes: &[String], environments: &[String]) -> Result<Vec<PlatformResult>, ExecError> {
        let bytes =
            std::fs::read(&self.path).map_err(|source| ExecError::ReadResults { path: self.path.clone(), source })?;
        let results: Vec<PlatformResult> = serde_json::from_slice(&bytes)
            .map_err(|source| ExecError::ParseResults { path: self.path.clone(), source })?;
        Ok(results
            .into_iter()
            .filter(|r| recipes.is_empty() || recipes.contains(&r.recipe))
            .filter(|r| environments.is_empty() || environments.contains(&r.platform.to_string()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const RESULTS: &str = r#"[
        {"recipe":"jq","platform_id":"darwin-arm64","status":"pass","exit_code":0,"attempts":1},
        {"recipe":"jq","platform_id":"linux-alpine-musl-x86_64","status":"fail","exit_code":6,"attempts":2},
        {"recipe":"fd","platform_id":"darwin-arm64","status":"skipped"}
    ]"#;

    #[test]
    fn filters_by_recipe_and_environment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.json");
        std::fs::write(&path, RESULTS).unwrap();
        let v = ResultFileValidator::new(&path);

        assert_eq!(v.validate(&[], &[]).unwrap().len(), 3);
        assert_eq!(v.validate(&["jq".into()], &[]).unwrap().len(), 2);
        let darwin = v.validate(&[], &["darwin-arm64".into()]).unwrap();
        assert!(darwin.iter().all(|r| r.platform.os == "darwin"));
    }

    #[test]
    fn bad_platform_id_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.json");
        std::fs::write(&path, r#"[{"recipe":"jq","platform_id":"windows","status":"pass"}]"#).unwrap();
        assert!(matches!(ResultFileValidator::new(&path).validate(&[], &[]), Err(ExecError::ParseResults { .. })));
    }
}
