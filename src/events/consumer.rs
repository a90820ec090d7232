//! Kafka consumer loop for the CDC topics.
//!
//! Messages are handled strictly one at a time and the offset is only
//! committed once handling succeeds, so the pipeline is at-least-once and
//! relies on the idempotent upsert downstream.

use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::KafkaConfig;
use crate::domain::EntityKind;
use crate::events::handlers::{dispatch, EventRouter};
use crate::events::parser::parse_debezium_message;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("no handler registered for {} events", .0.table())]
    Routing(EntityKind),
}

/// What to do with the offset after looking at one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handled (or permanently unusable): advance past it.
    Commit,
    /// Handling failed transiently: leave uncommitted so the broker
    /// redelivers it.
    Retry,
}

/// Spawn a Tokio task running the change-event consumer loop.
pub fn spawn_consumer(
    router: EventRouter,
    config: KafkaConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = run_consumer(router, config, shutdown_rx).await {
            error!("change-event consumer terminated: {err}");
        }
    })
}

pub async fn run_consumer(
    router: EventRouter,
    config: KafkaConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), ConsumerError> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &config.brokers)
        .set("group.id", &config.group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", "45000")
        .set("max.poll.interval.ms", "300000")
        .create()?;

    let topics: Vec<&str> = config.topics.iter().map(String::as_str).collect();
    consumer.subscribe(&topics)?;

    info!(
        group_id = %config.group_id,
        topics = ?config.topics,
        "starting change-event consumer"
    );

    let mut stream = consumer.stream();

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if shutdown_requested(changed, &shutdown_rx) {
                    info!("shutdown signal received, stopping consumer");
                    break;
                }
            }

            message = stream.next() => {
                match message {
                    Some(Ok(record)) => {
                        let disposition = process_record(&router, record.payload()).await?;
                        if disposition == Disposition::Commit {
                            if let Err(err) = consumer.commit_message(&record, CommitMode::Async) {
                                warn!("failed to commit offset: {err}");
                            }
                        }
                    }
                    Some(Err(err)) => {
                        // Broker-level error on the polled message: nothing
                        // was consumed, nothing to commit.
                        error!("kafka error while polling: {err}");
                    }
                    None => {
                        warn!("message stream ended unexpectedly");
                        break;
                    }
                }
            }
        }
    }

    // Dropping the StreamConsumer closes it; every exit path above funnels
    // through here exactly once.
    info!("change-event consumer stopped");
    Ok(())
}

/// A dropped shutdown sender reads the same as an explicit signal;
/// otherwise the loop would poll `changed()` hot forever.
fn shutdown_requested(
    changed: Result<(), watch::error::RecvError>,
    shutdown_rx: &watch::Receiver<bool>,
) -> bool {
    changed.is_err() || *shutdown_rx.borrow()
}

/// Decides the fate of a single polled message.
///
/// Empty or unparseable payloads can never succeed on redelivery, so they
/// are logged and committed rather than poisoning the partition. A parsed
/// event whose kind has no registered handler is a wiring fault and stops
/// the loop. Handler failures leave the offset alone.
pub(crate) async fn process_record(
    router: &EventRouter,
    payload: Option<&[u8]>,
) -> Result<Disposition, ConsumerError> {
    let Some(data) = payload else {
        info!("discarding message with empty payload");
        return Ok(Disposition::Commit);
    };

    let event = match parse_debezium_message(data) {
        Ok(event) => event,
        Err(err) => {
            error!("discarding unparseable change event: {err}");
            return Ok(Disposition::Commit);
        }
    };

    let Some(handler) = router.handler_for(event.entity) else {
        return Err(ConsumerError::Routing(event.entity));
    };

    match dispatch(handler.as_ref(), &event).await {
        Ok(()) => Ok(Disposition::Commit),
        Err(err) => {
            error!(
                entity = event.entity.table(),
                "failed to handle change event, leaving offset uncommitted: {err}"
            );
            Ok(Disposition::Retry)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::handlers::{HandlerError, MockEventHandler, VideoEventHandler};
    use crate::events::projection::testing::InMemoryVideoStore;
    use crate::events::projection::{SaveVideo, SaveVideoError};
    use crate::services::enrichment::{
        BannerDetail, EnrichmentError, MockEnrichmentClient, VideoDetail,
    };
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use uuid::Uuid;

    fn video_message(op: &str, after: serde_json::Value) -> Vec<u8> {
        json!({
            "payload": {
                "source": { "table": "videos" },
                "op": op,
                "before": after.clone(),
                "after": after
            }
        })
        .to_string()
        .into_bytes()
    }

    fn router_with(handler: MockEventHandler) -> EventRouter {
        EventRouter::new().with_handler(EntityKind::Video, Arc::new(handler))
    }

    #[tokio::test]
    async fn shutdown_signal_stops_the_loop() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        let changed = rx.changed().await;
        assert!(shutdown_requested(changed, &rx));
    }

    #[tokio::test]
    async fn dropped_shutdown_sender_counts_as_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let changed = rx.changed().await;
        assert!(shutdown_requested(changed, &rx));
    }

    #[tokio::test]
    async fn spurious_wakeup_keeps_the_loop_running() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(false).unwrap();
        let changed = rx.changed().await;
        assert!(!shutdown_requested(changed, &rx));
    }

    #[tokio::test]
    async fn successful_handling_commits_the_offset() {
        let mut handler = MockEventHandler::new();
        handler
            .expect_handle_created()
            .times(1)
            .returning(|_| Ok(()));

        let payload = video_message("c", json!({ "id": Uuid::new_v4() }));
        let disposition = process_record(&router_with(handler), Some(payload.as_slice()))
            .await
            .unwrap();

        assert_eq!(disposition, Disposition::Commit);
    }

    #[tokio::test]
    async fn handler_failure_never_commits() {
        let mut handler = MockEventHandler::new();
        handler.expect_handle_created().times(1).returning(|_| {
            Err(HandlerError::Save(SaveVideoError::Enrichment(
                EnrichmentError::Status {
                    status: 503,
                    video_id: Uuid::nil(),
                },
            )))
        });

        let payload = video_message("c", json!({ "id": Uuid::new_v4() }));
        let disposition = process_record(&router_with(handler), Some(payload.as_slice()))
            .await
            .unwrap();

        assert_eq!(disposition, Disposition::Retry);
    }

    #[tokio::test]
    async fn empty_payload_is_committed_without_handling() {
        let mut handler = MockEventHandler::new();
        handler.expect_handle_created().times(0);
        handler.expect_handle_updated().times(0);
        handler.expect_handle_deleted().times(0);

        let disposition = process_record(&router_with(handler), None).await.unwrap();
        assert_eq!(disposition, Disposition::Commit);
    }

    #[tokio::test]
    async fn unparseable_payload_is_committed_without_handling() {
        let mut handler = MockEventHandler::new();
        handler.expect_handle_created().times(0);
        handler.expect_handle_updated().times(0);
        handler.expect_handle_deleted().times(0);

        let disposition = process_record(&router_with(handler), Some(b"not json".as_slice()))
            .await
            .unwrap();
        assert_eq!(disposition, Disposition::Commit);
    }

    #[tokio::test]
    async fn event_for_unrouted_kind_is_a_routing_fault() {
        let router = EventRouter::new();
        let payload = json!({
            "payload": {
                "source": { "table": "genres" },
                "op": "c",
                "after": { "id": Uuid::new_v4() }
            }
        })
        .to_string()
        .into_bytes();

        let err = process_record(&router, Some(payload.as_slice())).await.unwrap_err();
        assert!(matches!(err, ConsumerError::Routing(EntityKind::Genre)));
    }

    /// End-to-end over the in-process pieces: a Debezium create event for
    /// the videos table flows through parsing, dispatch, enrichment and the
    /// store, and the offset is marked for commit.
    #[tokio::test]
    async fn create_event_projects_enriched_video_and_commits() {
        let video_id = Uuid::new_v4();
        let category_id = Uuid::new_v4();

        let mut client = MockEnrichmentClient::new();
        let detail = VideoDetail {
            id: video_id,
            title: "X".to_string(),
            launch_year: 2000,
            rating: crate::domain::Rating::L,
            is_active: true,
            categories: vec![crate::services::enrichment::CategorySummary {
                id: category_id,
                name: "Action".to_string(),
                description: String::new(),
            }],
            cast_members: vec![],
            genres: vec![],
            banner: BannerDetail {
                name: "X".to_string(),
                raw_location: url::Url::parse("http://banner.example/x").unwrap(),
            },
        };
        client
            .expect_get_video()
            .times(1)
            .returning(move |_| Ok(detail.clone()));

        let store = Arc::new(InMemoryVideoStore::default());
        let save_video = SaveVideo::new(Arc::new(client), store.clone());
        let router = EventRouter::new().with_handler(
            EntityKind::Video,
            Arc::new(VideoEventHandler::new(save_video, store.clone())),
        );

        let payload = video_message(
            "c",
            json!({
                "id": video_id,
                "title": "X",
                "launch_year": 2000,
                "rating": "L",
                "created_at": "2000-01-01T00:00:00Z",
                "updated_at": "2000-01-01T00:00:00Z",
                "is_active": true
            }),
        );

        let disposition = process_record(&router, Some(payload.as_slice())).await.unwrap();
        assert_eq!(disposition, Disposition::Commit);

        let videos = store.videos.lock().unwrap();
        assert_eq!(videos.len(), 1);
        let video = videos.get(&video_id).unwrap();
        assert_eq!(video.title, "X");
        assert_eq!(video.categories, BTreeSet::from([category_id]));
        assert!(video.cast_members.is_empty());
        assert!(video.genres.is_empty());
        assert_eq!(video.banner.as_str(), "http://banner.example/x");
    }

    /// Same event applied twice leaves exactly one indexed document.
    #[tokio::test]
    async fn redelivered_create_event_is_idempotent() {
        let video_id = Uuid::new_v4();

        let mut client = MockEnrichmentClient::new();
        let detail = VideoDetail {
            id: video_id,
            title: "X".to_string(),
            launch_year: 2000,
            rating: crate::domain::Rating::L,
            is_active: true,
            categories: vec![],
            cast_members: vec![],
            genres: vec![],
            banner: BannerDetail {
                name: "X".to_string(),
                raw_location: url::Url::parse("http://banner.example/x").unwrap(),
            },
        };
        client
            .expect_get_video()
            .times(2)
            .returning(move |_| Ok(detail.clone()));

        let store = Arc::new(InMemoryVideoStore::default());
        let save_video = SaveVideo::new(Arc::new(client), store.clone());
        let router = EventRouter::new().with_handler(
            EntityKind::Video,
            Arc::new(VideoEventHandler::new(save_video, store.clone())),
        );

        let payload = video_message(
            "c",
            json!({
                "id": video_id,
                "title": "X",
                "launch_year": 2000,
                "rating": "L",
                "created_at": "2000-01-01T00:00:00Z",
                "updated_at": "2000-01-01T00:00:00Z",
                "is_active": true
            }),
        );

        process_record(&router, Some(payload.as_slice())).await.unwrap();
        process_record(&router, Some(payload.as_slice())).await.unwrap();

        assert_eq!(store.videos.lock().unwrap().len(), 1);
    }
}
