use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

/// Errors from fetching the request-signing secret.
#[derive(Debug, Error)]
pub enum SecretError {
    /// No secret is available for the project.
    #[error("signing secret not found: set {0}")]
    Missing(String),
}

/// Source of the per-project request-signing secret, fetched once at
/// startup. The production secret store sits behind this seam.
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn signing_secret(&self, project: &str) -> Result<SecretString, SecretError>;
}

/// Reads the signing secret from the process environment, under
/// `JOBRUNNER_SECRET_<PROJECT>` (project upper-cased, `-`/`.` mapped to
/// `_`).
pub struct EnvSecretSource;

#[async_trait]
impl SecretSource for EnvSecretSource {
    async fn signing_secret(&self, project: &str) -> Result<SecretString, SecretError> {
        let var = env_var_for(project);
        std::env::var(&var)
            .map(SecretString::new)
            .map_err(|_| SecretError::Missing(var))
    }
}

fn env_var_for(project: &str) -> String {
    format!(
        "JOBRUNNER_SECRET_{}",
        project.to_uppercase().replace(['-', '.'], "_")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_maps_to_env_var() {
        assert_eq!(env_var_for("jobrunner"), "JOBRUNNER_SECRET_JOBRUNNER");
        assert_eq!(env_var_for("prod-eu.main"), "JOBRUNNER_SECRET_PROD_EU_MAIN");
    }

    #[tokio::test]
    async fn missing_secret_names_the_variable() {
        let err = EnvSecretSource
            .signing_secret("never-configured-project")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "signing secret not found: set JOBRUNNER_SECRET_NEVER_CONFIGURED_PROJECT"
        );
    }
}
