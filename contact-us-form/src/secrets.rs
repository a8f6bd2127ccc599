use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ssm::operation::get_parameter::GetParameterError;
use thiserror::Error;

#[async_trait]
pub trait SecretFetcher: Send + Sync {
    async fn get_parameter(&self, path: &str, with_decryption: bool)
        -> Result<String, SecretError>;
}

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Parameter \"{0}\" does not have a value.")]
    MissingValue(String),
    #[error("Error fetching parameter \"{path}\": {source}")]
    Backend {
        path: String,
        source: lambda_http::Error,
    },
}

/// Reads parameters from AWS Systems Manager Parameter Store.
#[derive(Clone)]
pub struct SsmParameterStore(aws_sdk_ssm::Client);

impl SsmParameterStore {
    pub async fn open() -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Ok(url) = std::env::var("AWS_ENDPOINT_URL") {
            loader = loader.endpoint_url(url);
        }
        let config = loader.load().await;
        Self(aws_sdk_ssm::Client::new(&config))
    }
}

#[async_trait]
impl SecretFetcher for SsmParameterStore {
    async fn get_parameter(
        &self,
        path: &str,
        with_decryption: bool,
    ) -> Result<String, SecretError> {
        let output = self
            .0
            .get_parameter()
            .name(path)
            .with_decryption(with_decryption)
            .send()
            .await
            .map_err(|error| {
                if matches!(
                    error.as_service_error(),
                    Some(GetParameterError::ParameterNotFound(_))
                ) {
                    SecretError::MissingValue(path.into())
                } else {
                    SecretError::Backend {
                        path: path.into(),
                        source: Box::new(error),
                    }
                }
            })?;
        let Some(value) = output.parameter().and_then(|parameter| parameter.value()) else {
            return Err(SecretError::MissingValue(path.into()));
        };
        Ok(value.into())
    }
}
