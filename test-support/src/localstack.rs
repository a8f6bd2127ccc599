use aws_config::{BehaviorVersion, SdkConfig};
use log::info;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};

pub const LOCALSTACK_PORT: u16 = 4566;

/// A LocalStack instance for tests against AWS APIs.
///
/// Set `USE_RUNNING_LOCALSTACK` to the endpoint URL of an instance which is already running to
/// skip starting a container.
pub struct LocalStack {
    pub endpoint_url: String,
    pub sdk_config: SdkConfig,
    _container: Option<ContainerAsync<GenericImage>>,
}

impl LocalStack {
    pub async fn start() -> Self {
        use_dummy_credentials();
        let (endpoint_url, container) = match std::env::var("USE_RUNNING_LOCALSTACK") {
            Ok(endpoint_url) => {
                info!("Using already running LocalStack at {endpoint_url}");
                (endpoint_url, None)
            }
            Err(_) => {
                info!("Starting own LocalStack instance");
                let container = GenericImage::new("localstack/localstack", "3.8")
                    .with_exposed_port(LOCALSTACK_PORT.tcp())
                    .with_wait_for(WaitFor::message_on_stdout("Ready."))
                    .with_env_var("SERVICES", "ssm")
                    .start()
                    .await
                    .unwrap();
                let port = container
                    .get_host_port_ipv4(LOCALSTACK_PORT.tcp())
                    .await
                    .unwrap();
                (format!("http://127.0.0.1:{port}"), Some(container))
            }
        };
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url(&endpoint_url)
            .load()
            .await;
        Self {
            endpoint_url,
            sdk_config,
            _container: container,
        }
    }
}

/// LocalStack accepts any credentials but the SDK refuses to sign without some.
fn use_dummy_credentials() {
    for (key, value) in [
        ("AWS_ACCESS_KEY_ID", "test"),
        ("AWS_SECRET_ACCESS_KEY", "test"),
        ("AWS_REGION", "us-east-1"),
    ] {
        if std::env::var_os(key).is_none() {
            std::env::set_var(key, value);
        }
    }
}
