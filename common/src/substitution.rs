// Environment variable interpolation engine

use crate::errors::SubstitutionError;
use regex::Regex;
use std::collections::HashMap;
use tracing::instrument;

/// EnvInterpolator resolves `$ENV{NAME}` references in task-file strings
///
/// Interpolation happens once at load time against a snapshot of the process
/// environment, so command strings and directory roots carry no unresolved
/// references into execution.
pub struct EnvInterpolator {
    /// Compiled regex for finding `$ENV{NAME}` references
    reference_regex: Regex,
}

impl EnvInterpolator {
    /// Create a new EnvInterpolator
    pub fn new() -> Result<Self, SubstitutionError> {
        let reference_regex = Regex::new(r"\$ENV\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .map_err(|e| SubstitutionError::RegexError(e.to_string()))?;

        Ok(Self { reference_regex })
    }

    /// Resolve all `$ENV{NAME}` references in a template string
    ///
    /// # Errors
    /// Returns `SubstitutionError::UndefinedVariable` listing every referenced
    /// variable missing from the snapshot.
    #[instrument(skip(self, env), fields(template_len = template.len()))]
    pub fn interpolate(
        &self,
        template: &str,
        env: &HashMap<String, String>,
    ) -> Result<String, SubstitutionError> {
        let mut result = template.to_string();
        let mut undefined_vars = Vec::new();

        for cap in self.reference_regex.captures_iter(template) {
            let full_match = cap.get(0).unwrap().as_str();
            let var_name = cap.get(1).unwrap().as_str();

            match env.get(var_name) {
                Some(value) => {
                    result = result.replace(full_match, value);
                }
                None => {
                    if !undefined_vars.contains(&var_name.to_string()) {
                        undefined_vars.push(var_name.to_string());
                    }
                }
            }
        }

        if !undefined_vars.is_empty() {
            tracing::error!(
                undefined_variables = ?undefined_vars,
                template = template,
                "Undefined environment variables in template"
            );
            return Err(SubstitutionError::UndefinedVariable {
                variables: undefined_vars,
                template: template.to_string(),
            });
        }

        Ok(result)
    }

    /// Extract all referenced variable names from a template
    pub fn extract_references(&self, template: &str) -> Vec<String> {
        let mut variables = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for cap in self.reference_regex.captures_iter(template) {
            let var_name = cap.get(1).unwrap().as_str().to_string();
            if seen.insert(var_name.clone()) {
                variables.push(var_name);
            }
        }

        variables
    }

    /// Check if a template contains any `$ENV{NAME}` references
    pub fn has_references(&self, template: &str) -> bool {
        self.reference_regex.is_match(template)
    }
}

impl Default for EnvInterpolator {
    fn default() -> Self {
        Self::new().expect("Failed to create EnvInterpolator")
    }
}

/// Snapshot the process environment for interpolation
pub fn env_snapshot() -> HashMap<String, String> {
    std::env::vars().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_interpolate_directory_root() {
        let interp = EnvInterpolator::new().unwrap();
        let env = env(&[("SKA", "/proj/sot/ska")]);

        let result = interp.interpolate("$ENV{SKA}/data/twiki-wg", &env).unwrap();
        assert_eq!(result, "/proj/sot/ska/data/twiki-wg");
    }

    #[test]
    fn test_interpolate_multiple_references() {
        let interp = EnvInterpolator::new().unwrap();
        let env = env(&[("SKA", "/proj/sot/ska"), ("USER", "aca")]);

        let result = interp
            .interpolate("$ENV{SKA}/home/$ENV{USER}/bin", &env)
            .unwrap();
        assert_eq!(result, "/proj/sot/ska/home/aca/bin");
    }

    #[test]
    fn test_interpolate_same_reference_twice() {
        let interp = EnvInterpolator::new().unwrap();
        let env = env(&[("SKA", "/ska")]);

        let result = interp
            .interpolate("cp $ENV{SKA}/a $ENV{SKA}/b", &env)
            .unwrap();
        assert_eq!(result, "cp /ska/a /ska/b");
    }

    #[test]
    fn test_interpolate_undefined_variable() {
        let interp = EnvInterpolator::new().unwrap();
        let env = HashMap::new();

        let result = interp.interpolate("$ENV{MISSING}/data", &env);
        match result {
            Err(SubstitutionError::UndefinedVariable { variables, .. }) => {
                assert_eq!(variables, vec!["MISSING"]);
            }
            _ => panic!("Expected UndefinedVariable error"),
        }
    }

    #[test]
    fn test_interpolate_reports_all_undefined() {
        let interp = EnvInterpolator::new().unwrap();
        let env = HashMap::new();

        let result = interp.interpolate("$ENV{A} $ENV{B} $ENV{A}", &env);
        match result {
            Err(SubstitutionError::UndefinedVariable { variables, .. }) => {
                assert_eq!(variables, vec!["A".to_string(), "B".to_string()]);
            }
            _ => panic!("Expected UndefinedVariable error"),
        }
    }

    #[test]
    fn test_interpolate_no_references() {
        let interp = EnvInterpolator::new().unwrap();
        let env = HashMap::new();

        let result = interp.interpolate("plain string", &env).unwrap();
        assert_eq!(result, "plain string");
    }

    #[test]
    fn test_extract_references() {
        let interp = EnvInterpolator::new().unwrap();
        let refs = interp.extract_references("$ENV{SKA}/bin:$ENV{PATH}");
        assert_eq!(refs, vec!["SKA".to_string(), "PATH".to_string()]);
    }

    #[test]
    fn test_has_references() {
        let interp = EnvInterpolator::new().unwrap();

        assert!(interp.has_references("$ENV{SKA}/data"));
        assert!(!interp.has_references("no references"));
        // Shell-style $SKA without the ENV{} wrapper is not a reference
        assert!(!interp.has_references("$SKA/data"));
        // Invalid names do not match
        assert!(!interp.has_references("$ENV{1BAD}"));
    }
}
