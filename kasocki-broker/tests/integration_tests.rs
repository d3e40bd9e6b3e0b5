//! Integration tests for [`RdKafkaBrokerAdapter`] against a real broker.
//!
//! These spin up a disposable Kafka instance with `testcontainers` and drive
//! the adapter the way `kasocki-core`'s session does: `assign` once, `poll`
//! in a loop, `disconnect` once.
//!
//! # Panics
//!
//! Setup helpers use `expect()`/`panic!()`, which is acceptable in test code.

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]

use kasocki_broker::{OffsetReset, RdKafkaBrokerAdapter};
use kasocki_core::assignment::Assignment;
use kasocki_core::broker::{BrokerAdapter, PollOutcome};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers_modules::kafka::{Kafka, KAFKA_PORT};

async fn start_kafka() -> (testcontainers::ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("failed to start Kafka container");
    let host = kafka.get_host().await.expect("failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("failed to get port");
    let brokers = format!("{host}:{port}");
    (kafka, brokers)
}

fn producer(brokers: &str) -> FutureProducer {
    ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .create()
        .expect("failed to create producer")
}

async fn produce(producer: &FutureProducer, topic: &str, payload: &str) {
    producer
        .send(
            FutureRecord::<(), _>::to(topic).payload(payload),
            Duration::from_secs(10),
        )
        .await
        .expect("failed to produce record");
}

async fn poll_until_record(adapter: &RdKafkaBrokerAdapter) -> kasocki_core::broker::BrokerRecord {
    for _ in 0..40 {
        match adapter.poll().await.expect("poll failed") {
            PollOutcome::Record(record) => return record,
            PollOutcome::Timeout | PollOutcome::EndOfLog => continue,
        }
    }
    panic!("no record observed after repeated polling");
}

#[tokio::test]
async fn assign_with_explicit_offset_replays_from_start() {
    let (_kafka, brokers) = start_kafka().await;
    let topic = "kasocki-it-replay";
    let producer = producer(&brokers);
    produce(&producer, topic, "one").await;
    produce(&producer, topic, "two").await;
    produce(&producer, topic, "three").await;

    let adapter = RdKafkaBrokerAdapter::builder()
        .brokers(&brokers)
        .session_id("replay")
        .offset_reset(OffsetReset::Earliest)
        .build()
        .expect("failed to build adapter");

    adapter
        .assign(&[Assignment { topic: topic.to_string(), partition: 0, offset: 0 }])
        .await
        .expect("assign failed");

    let mut payloads = Vec::new();
    while payloads.len() < 3 {
        match adapter.poll().await.expect("poll failed") {
            PollOutcome::Record(record) => payloads.push(String::from_utf8(record.payload).unwrap()),
            PollOutcome::Timeout | PollOutcome::EndOfLog => continue,
        }
    }

    assert_eq!(payloads, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn latest_offset_skips_existing_records() {
    let (_kafka, brokers) = start_kafka().await;
    let topic = "kasocki-it-latest";
    let producer = producer(&brokers);
    produce(&producer, topic, "before").await;

    let adapter = RdKafkaBrokerAdapter::builder()
        .brokers(&brokers)
        .session_id("latest")
        .build()
        .expect("failed to build adapter");

    adapter
        .assign(&[Assignment { topic: topic.to_string(), partition: 0, offset: -1 }])
        .await
        .expect("assign failed");

    // A couple of immediate polls should see nothing: "before" was already
    // in the log when we assigned at the end of it.
    for _ in 0..3 {
        let outcome = adapter.poll().await.expect("poll failed");
        assert!(matches!(outcome, PollOutcome::Timeout | PollOutcome::EndOfLog));
    }

    produce(&producer, topic, "after").await;
    let record = poll_until_record(&adapter).await;
    assert_eq!(record.payload, b"after");
}

#[tokio::test]
async fn two_sessions_on_same_topic_do_not_rebalance() {
    let (_kafka, brokers) = start_kafka().await;
    let topic = "kasocki-it-no-rebalance";
    let producer = producer(&brokers);
    produce(&producer, topic, "shared").await;

    let first = RdKafkaBrokerAdapter::builder()
        .brokers(&brokers)
        .session_id("session-a")
        .offset_reset(OffsetReset::Earliest)
        .build()
        .expect("failed to build adapter");
    let second = RdKafkaBrokerAdapter::builder()
        .brokers(&brokers)
        .session_id("session-b")
        .offset_reset(OffsetReset::Earliest)
        .build()
        .expect("failed to build adapter");

    first
        .assign(&[Assignment { topic: topic.to_string(), partition: 0, offset: 0 }])
        .await
        .expect("assign failed");
    second
        .assign(&[Assignment { topic: topic.to_string(), partition: 0, offset: 0 }])
        .await
        .expect("assign failed");

    // Each session reads the whole log independently; a coordinated consumer
    // group would have split the one record between them instead.
    let record_a = poll_until_record(&first).await;
    let record_b = poll_until_record(&second).await;
    assert_eq!(record_a.payload, b"shared");
    assert_eq!(record_b.payload, b"shared");
}

#[tokio::test]
async fn metadata_reports_created_topic() {
    let (_kafka, brokers) = start_kafka().await;
    let topic = "kasocki-it-metadata";
    produce(&producer(&brokers), topic, "seed").await;

    let adapter = RdKafkaBrokerAdapter::builder()
        .brokers(&brokers)
        .session_id("metadata")
        .build()
        .expect("failed to build adapter");

    let metadata = adapter.metadata().await.expect("metadata failed");
    assert!(metadata.topics.contains_key(topic));
    assert_eq!(metadata.topics[topic], vec![0]);
}

#[tokio::test]
async fn disconnect_then_poll_reports_end_of_log() {
    let (_kafka, brokers) = start_kafka().await;
    let topic = "kasocki-it-disconnect";
    produce(&producer(&brokers), topic, "seed").await;

    let adapter = RdKafkaBrokerAdapter::builder()
        .brokers(&brokers)
        .session_id("disconnect")
        .offset_reset(OffsetReset::Earliest)
        .build()
        .expect("failed to build adapter");
    adapter
        .assign(&[Assignment { topic: topic.to_string(), partition: 0, offset: 0 }])
        .await
        .expect("assign failed");

    adapter.disconnect().await.expect("disconnect failed");
    assert!(matches!(adapter.poll().await.expect("poll failed"), PollOutcome::EndOfLog));
    assert!(adapter.metadata().await.is_err());
}
