//! Provisioning parameters and the value-substitution resolver.
//!
//! Resolution is pure: it either produces an immutable [`ResolvedContext`]
//! that every downstream descriptor consumes read-only, or fails with the
//! name of the first missing required parameter before any resource is
//! touched.

use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_HANDLER_FILE: &str = "lambda_function";
pub const DEFAULT_HANDLER_NAME: &str = "lambda_handler";
pub const DEFAULT_RUNTIME: &str = "python3.9";

/// Errors surfaced during parameter resolution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("required parameter '{0}' is missing")]
    MissingParameter(&'static str),
}

/// Externally supplied configuration, collected before resolution.
///
/// All fields are optional at this stage; [`Parameters::resolve`] decides
/// which absences are fatal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Parameters {
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub bucket_name: Option<String>,
    pub table_name: Option<String>,
    pub table_key: Option<String>,
    pub api_name: Option<String>,
    pub api_stage: Option<String>,
    pub handler_file: Option<String>,
    pub handler_name: Option<String>,
    pub runtime: Option<String>,
}

impl Parameters {
    /// Reads parameters from `PLINTH_*` environment variables. Unset
    /// variables stay `None`; resolution decides what is required.
    pub fn from_env() -> Self {
        let var = |name: &str| env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            region: var("PLINTH_REGION"),
            access_key: var("PLINTH_ACCESS_KEY"),
            secret_key: var("PLINTH_SECRET_KEY"),
            bucket_name: var("PLINTH_BUCKET_NAME"),
            table_name: var("PLINTH_TABLE_NAME"),
            table_key: var("PLINTH_TABLE_KEY"),
            api_name: var("PLINTH_API_NAME"),
            api_stage: var("PLINTH_API_STAGE"),
            handler_file: var("PLINTH_HANDLER_FILE"),
            handler_name: var("PLINTH_HANDLER_NAME"),
            runtime: var("PLINTH_RUNTIME"),
        }
    }

    /// Substitutes parameters into an immutable context. Required
    /// parameters must be present; optional ones fall back to fixed
    /// defaults.
    pub fn resolve(&self) -> Result<ResolvedContext, ResolveError> {
        fn required(
            value: &Option<String>,
            name: &'static str,
        ) -> Result<String, ResolveError> {
            value
                .as_deref()
                .map(str::to_owned)
                .ok_or(ResolveError::MissingParameter(name))
        }

        fn optional(value: &Option<String>, default: &str) -> String {
            value
                .as_deref()
                .map(str::to_owned)
                .unwrap_or_else(|| default.to_owned())
        }

        Ok(ResolvedContext {
            region: required(&self.region, "region")?,
            credentials: Credentials {
                access_key: required(&self.access_key, "access_key")?,
                secret_key: required(&self.secret_key, "secret_key")?,
            },
            bucket_name: required(&self.bucket_name, "bucket_name")?,
            table_name: required(&self.table_name, "table_name")?,
            table_key: required(&self.table_key, "table_key")?,
            api_name: required(&self.api_name, "api_name")?,
            api_stage: required(&self.api_stage, "api_stage")?,
            handler_file: optional(&self.handler_file, DEFAULT_HANDLER_FILE),
            handler_name: optional(&self.handler_name, DEFAULT_HANDLER_NAME),
            runtime: optional(&self.runtime, DEFAULT_RUNTIME),
        })
    }
}

/// Provider credentials. The secret never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Fully resolved provisioning configuration, consumed read-only by every
/// downstream resource descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedContext {
    pub region: String,
    pub credentials: Credentials,
    pub bucket_name: String,
    pub table_name: String,
    pub table_key: String,
    pub api_name: String,
    pub api_stage: String,
    pub handler_file: String,
    pub handler_name: String,
    pub runtime: String,
}

impl ResolvedContext {
    /// Handler identifier in `file.handler` form.
    pub fn handler(&self) -> String {
        format!("{}.{}", self.handler_file, self.handler_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_parameters() -> Parameters {
        Parameters {
            region: Some("eu-west-1".into()),
            access_key: Some("AKIAEXAMPLE".into()),
            secret_key: Some("hunter2".into()),
            bucket_name: Some("demo-bucket".into()),
            table_name: Some("demo-table".into()),
            table_key: Some("id".into()),
            api_name: Some("demo-api".into()),
            api_stage: Some("prod".into()),
            handler_file: None,
            handler_name: None,
            runtime: None,
        }
    }

    #[test]
    fn resolves_with_defaults_for_optional_parameters() {
        let ctx = full_parameters().resolve().unwrap();
        assert_eq!(ctx.handler_file, DEFAULT_HANDLER_FILE);
        assert_eq!(ctx.handler_name, DEFAULT_HANDLER_NAME);
        assert_eq!(ctx.runtime, DEFAULT_RUNTIME);
        assert_eq!(ctx.handler(), "lambda_function.lambda_handler");
    }

    #[test]
    fn missing_required_parameter_names_the_parameter() {
        let mut params = full_parameters();
        params.table_name = None;
        assert_eq!(
            params.resolve().unwrap_err(),
            ResolveError::MissingParameter("table_name")
        );
    }

    #[test]
    fn every_required_parameter_is_enforced() {
        let required: &[(&str, fn(&mut Parameters))] = &[
            ("region", |p| p.region = None),
            ("access_key", |p| p.access_key = None),
            ("secret_key", |p| p.secret_key = None),
            ("bucket_name", |p| p.bucket_name = None),
            ("table_name", |p| p.table_name = None),
            ("table_key", |p| p.table_key = None),
            ("api_name", |p| p.api_name = None),
            ("api_stage", |p| p.api_stage = None),
        ];

        for (name, clear) in required {
            let mut params = full_parameters();
            clear(&mut params);
            assert_eq!(
                params.resolve().unwrap_err(),
                ResolveError::MissingParameter(name),
                "parameter {name} should be required"
            );
        }
    }

    #[test]
    fn explicit_optionals_override_defaults() {
        let mut params = full_parameters();
        params.handler_file = Some("ingest".into());
        params.handler_name = Some("entry".into());
        params.runtime = Some("python3.12".into());
        let ctx = params.resolve().unwrap();
        assert_eq!(ctx.handler(), "ingest.entry");
        assert_eq!(ctx.runtime, "python3.12");
    }

    #[test]
    fn debug_output_redacts_the_secret() {
        let ctx = full_parameters().resolve().unwrap();
        let rendered = format!("{:?}", ctx.credentials);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("hunter2"));
    }
}
