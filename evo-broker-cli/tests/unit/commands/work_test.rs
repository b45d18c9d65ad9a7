use super::*;
use crate::helpers::utils::{create_config_file, get_free_address, get_path};
use evo_broker::example::VectorSolution;
use evo_broker::prelude::{Broker, NetworkConsumer, NetworkConsumerSettings};
use std::time::Duration;

fn get_work_matches(args: &[&str]) -> ArgMatches {
    get_work_app().try_get_matches_from([&["work"], args].concat()).unwrap()
}

#[test]
fn can_apply_work_arguments() {
    let matches = get_work_matches(&["--address", "10.0.0.1:1", "--max-stalls", "0", "--process-max", "7", "-t", "9"]);
    let mut config = Config::default();

    apply_work_args(&matches, &mut config).unwrap();

    let client = config.client.unwrap();
    assert_eq!(client.address, Some("10.0.0.1:1".to_string()));
    assert_eq!(client.max_stalls, Some(0));
    assert_eq!(client.process_max, Some(7));
    assert_eq!(client.max_duration_secs, Some(9));
}

#[test]
fn can_keep_config_address_without_argument() {
    let matches = get_work_matches(&[]);
    let mut config = Config {
        client: Some(ClientConfig { address: Some("10.0.0.2:2".to_string()), ..ClientConfig::default() }),
        ..Config::default()
    };

    apply_work_args(&matches, &mut config).unwrap();

    assert_eq!(config.client.and_then(|client| client.address), Some("10.0.0.2:2".to_string()));
}

#[test]
fn can_fail_when_server_is_unreachable() {
    let config = create_config_file(r#"{ "client": { "maxConnectionAttempts": 2, "connectionRetryDelayMs": 10 } }"#);
    let config_path = get_path(&config);
    let address = get_free_address();
    let matches = get_work_matches(&["--config", config_path.as_str(), "--address", address.as_str()]);

    let result = run_work(&matches);

    assert!(result.unwrap_err().starts_with("worker has failed: 'connection failure"));
}

#[test]
fn can_finish_work_on_max_stalls() {
    let broker = Broker::<VectorSolution>::new_open(Arc::new(Environment::silent()));
    let consumer = Arc::new(NetworkConsumer::<VectorSolution>::new(NetworkConsumerSettings {
        address: "127.0.0.1:0".to_string(),
        idle_hint: Duration::from_millis(5),
        io_timeout: Duration::from_millis(10),
        ..NetworkConsumerSettings::default()
    }));
    broker.enrol(consumer.clone()).unwrap();
    let address = consumer.local_address().unwrap().to_string();
    let matches = get_work_matches(&["--address", address.as_str(), "--max-stalls", "2"]);

    let result = run_work(&matches);

    assert_eq!(result, Ok(()));
    broker.shutdown();
}
