use std::net::TcpStream;
use std::process::Command;
use std::thread::sleep;
use std::time::{Duration, Instant};

use shared_fixture::{EnvPublisher, PropertyStore};
use shared_fixture_integration_tests::{set_test_fixture, shared};

fn init() {
    dotenv::dotenv().ok();
    let _ = env_logger::builder().is_test(true).try_init();
}

// The broker accepts connections a few seconds after the container starts.
fn wait_for_port(host: &str, port: u16, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect((host, port)).is_ok() {
            return true;
        }
        sleep(Duration::from_secs(1));
    }
    false
}

#[test]
#[ignore = "needs a docker daemon"]
fn test_broker_reachable() {
    init();
    let fixture = set_test_fixture("test_broker_reachable");
    assert!(
        wait_for_port(&fixture.host, fixture.amqp_port, Duration::from_secs(60)),
        "broker did not open {}:{}",
        fixture.host,
        fixture.amqp_port
    );
}

#[test]
#[ignore = "needs a docker daemon"]
fn test_control_string_targets_container() {
    init();
    let fixture = set_test_fixture("test_control_string_targets_container");
    let handle = fixture.fixture.handle().expect("fixture is running");

    let control = PropertyStore::global()
        .get("rabbitmqctl.bin")
        .expect("control string published");
    assert_eq!(control, format!("DOCKER:{}", handle.id));
    assert_eq!(
        std::env::var(EnvPublisher::env_key("rabbitmqctl.bin")).unwrap(),
        control
    );

    let container = control.trim_start_matches("DOCKER:");
    let output = Command::new("docker")
        .args(["inspect", "--format", "{{.State.Running}}", container])
        .output()
        .expect("Failed to execute docker inspect");
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "true");
}

#[tokio::test]
#[ignore = "needs a docker daemon"]
async fn test_async_access_shares_container() {
    init();
    let sync_handle = set_test_fixture("test_async_access_shares_container")
        .fixture
        .handle()
        .expect("fixture is running");
    let async_handle = shared()
        .ensure_started_async()
        .await
        .expect("fixture is running");

    assert_eq!(sync_handle.id, async_handle.id);
}
