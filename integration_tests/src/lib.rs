use log::info;
use shared_fixture::{
    DockerCli, EnvPublisher, FixtureConfig, PropertyStore, Publishers, RootScope, SharedFixture,
};
use std::sync::OnceLock;

pub const CONTAINER_NAME: &str = "shared_fixture_integration_tests";

pub struct TestFixture {
    pub fixture: SharedFixture,
    pub host: String,
    pub amqp_port: u16,
}

static FIXTURE: OnceLock<SharedFixture> = OnceLock::new();

// The RabbitMQ broker shared by every test in this binary, stopped when the
// process exits.
pub fn shared() -> &'static SharedFixture {
    FIXTURE.get_or_init(|| {
        let config = FixtureConfig::new()
            .container_name(CONTAINER_NAME)
            .with_env_overrides()
            .expect("Invalid SHARED_FIXTURE_* environment");
        info!("Using shared fixture config {:?}", config);

        let docker = DockerCli::new().detect_platform(true);

        SharedFixture::builder(docker)
            .config(config)
            .publisher(
                Publishers::new()
                    .with(PropertyStore::global())
                    .with(EnvPublisher),
            )
            .scope(&RootScope::global())
            .build()
            .expect("Failed to build shared fixture")
    })
}

// Set up the test fixture.
pub fn set_test_fixture(func: &str) -> TestFixture {
    let fixture = shared().clone();
    let handle = fixture
        .ensure_started()
        .unwrap_or_else(|e| panic!("{}: shared fixture failed to start: {}", func, e));

    let amqp_port = handle.host_port(5672).unwrap_or(5672);

    TestFixture {
        host: handle.host.clone(),
        amqp_port,
        fixture,
    }
}
