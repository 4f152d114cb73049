//! Builds the recent-chats feed for one user.
//!
//! Every peer is looked up independently: derive the conversation key, read
//! the tail of its log, decode it. Lookups run concurrently up to
//! `max_in_flight` in whatever order they finish, and results are put back
//! in peer order before blank previews are dropped. A failing peer never
//! fails the batch.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::chat::{self, PreviewEntry, StoredRecord};
use crate::conversation::ConversationKey;
use crate::entity::{Identity, Peer};
use crate::error::{PreviewError, Result};
use crate::log::{FriendGraph, MessageLog};

pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

pub struct PreviewAggregator<L: ?Sized> {
    log: Arc<L>,
    max_in_flight: usize,
    fetch_timeout: Option<Duration>,
}

impl<L: MessageLog + ?Sized> PreviewAggregator<L> {
    pub fn new(log: Arc<L>) -> Self {
        Self {
            log,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            fetch_timeout: None,
        }
    }

    /// Cap on concurrent log reads per request. Values below 1 are treated as 1.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Look up the friends of `me` and build their previews.
    /// Friend-graph failures are returned unchanged.
    pub async fn recent_chats<G>(&self, graph: &G, me: &Identity) -> Result<Vec<PreviewEntry>>
    where
        G: FriendGraph + ?Sized,
    {
        let peers = graph.peers_of(me).await?;
        Ok(self.build_previews(me, peers).await)
    }

    /// Previews of the conversations between `me` and each of `peers` that
    /// have a non-blank latest message, in the order `peers` were given.
    ///
    /// Dropping the returned future cancels every outstanding read.
    pub async fn build_previews(&self, me: &Identity, peers: Vec<Peer>) -> Vec<PreviewEntry> {
        let total = peers.len();

        // Completion order is arbitrary; the index restores peer order.
        let mut entries: Vec<(usize, Option<PreviewEntry>)> =
            stream::iter(peers.into_iter().enumerate())
                .map(|(index, peer)| async move { (index, self.preview_for(me, peer).await) })
                .buffer_unordered(self.max_in_flight)
                .collect()
                .await;
        entries.sort_unstable_by_key(|(index, _)| *index);

        let previews: Vec<PreviewEntry> = entries
            .into_iter()
            .filter_map(|(_, entry)| entry)
            .filter(|entry| !entry.last_message.is_blank())
            .collect();

        debug!(user = %me, total, kept = previews.len(), "Built recent-chat previews");
        previews
    }

    /// `None` when no conversation can be addressed for this peer.
    async fn preview_for(&self, me: &Identity, peer: Peer) -> Option<PreviewEntry> {
        let conversation = match ConversationKey::derive(me, &peer.id) {
            Ok(key) => key,
            Err(e) => {
                warn!(peer = %peer.id, error = %e, "Skipping peer");
                return None;
            }
        };

        let record = match self.fetch_latest(&conversation).await {
            Ok(record) => record,
            Err(e) => {
                warn!(peer = %peer.id, error = %e, "Falling back to an empty preview");
                None
            }
        };

        Some(PreviewEntry {
            last_message: chat::decode(record.as_ref()),
            peer,
            conversation,
        })
    }

    async fn fetch_latest(&self, key: &ConversationKey) -> Result<Option<StoredRecord>> {
        match self.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, self.log.latest(key))
                .await
                .map_err(|_| PreviewError::Timeout(limit))?,
            None => self.log.latest(key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Message;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    enum Reply {
        Record(&'static str),
        Missing,
        Fail,
        Hang,
    }

    /// Log keyed by conversation key, with a per-key delay.
    #[derive(Default)]
    struct ScriptedLog {
        replies: HashMap<String, (Reply, Duration)>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedLog {
        fn with(mut self, a: &str, b: &str, reply: Reply, delay_ms: u64) -> Self {
            let key = ConversationKey::derive(&a.into(), &b.into()).unwrap();
            self.replies
                .insert(key.to_string(), (reply, Duration::from_millis(delay_ms)));
            self
        }
    }

    #[async_trait]
    impl MessageLog for ScriptedLog {
        async fn latest(&self, key: &ConversationKey) -> Result<Option<StoredRecord>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let (reply, delay) = self
                .replies
                .get(key.as_str())
                .cloned()
                .unwrap_or((Reply::Missing, Duration::ZERO));
            tokio::time::sleep(delay).await;

            let result = match reply {
                Reply::Record(raw) => Ok(Some(StoredRecord::from(raw))),
                Reply::Missing => Ok(None),
                Reply::Fail => Err(PreviewError::StoreUnavailable("connection refused".into())),
                Reply::Hang => std::future::pending().await,
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    struct StaticGraph(Result<Vec<Peer>>);

    #[async_trait]
    impl FriendGraph for StaticGraph {
        async fn peers_of(&self, _user: &Identity) -> Result<Vec<Peer>> {
            match &self.0 {
                Ok(peers) => Ok(peers.clone()),
                Err(_) => Err(PreviewError::Unauthorized),
            }
        }
    }

    fn ids(previews: &[PreviewEntry]) -> Vec<&str> {
        previews.iter().map(|p| p.peer.id.as_str()).collect()
    }

    #[tokio::test]
    async fn skips_peers_without_messages() {
        let log = ScriptedLog::default().with(
            "u1",
            "p2",
            Reply::Record(r#"{"senderId":"u2","text":"hi"}"#),
            0,
        );
        let aggregator = PreviewAggregator::new(Arc::new(log));

        let previews = aggregator
            .build_previews(&"u1".into(), vec![Peer::new("p1"), Peer::new("p2")])
            .await;

        assert_eq!(
            previews,
            vec![PreviewEntry {
                peer: Peer::new("p2"),
                last_message: Message::new("u2", "hi"),
                conversation: ConversationKey::derive(&"u1".into(), &"p2".into()).unwrap(),
            }]
        );
    }

    #[tokio::test]
    async fn skips_malformed_and_blank_records() {
        let log = ScriptedLog::default()
            .with("u1", "p1", Reply::Record("not json"), 0)
            .with("u1", "p2", Reply::Record(r#"{"senderId":"u3","text":"   "}"#), 0)
            .with("u1", "p3", Reply::Record(r#"{"senderId":"u1","text":"ok"}"#), 0);
        let aggregator = PreviewAggregator::new(Arc::new(log));

        let previews = aggregator
            .build_previews(
                &"u1".into(),
                vec![Peer::new("p1"), Peer::new("p2"), Peer::new("p3")],
            )
            .await;

        assert_eq!(ids(&previews), vec!["p3"]);
        assert!(previews.iter().all(|p| !p.last_message.text.trim().is_empty()));
    }

    #[tokio::test]
    async fn keeps_input_order_when_later_peers_finish_first() {
        let log = ScriptedLog::default()
            .with("me", "slow", Reply::Record(r#"{"senderId":"slow","text":"first"}"#), 60)
            .with("me", "mid", Reply::Record(r#"{"senderId":"mid","text":"second"}"#), 30)
            .with("me", "fast", Reply::Record(r#"{"senderId":"fast","text":"third"}"#), 0);
        let aggregator = PreviewAggregator::new(Arc::new(log));

        let previews = aggregator
            .build_previews(
                &"me".into(),
                vec![Peer::new("slow"), Peer::new("mid"), Peer::new("fast")],
            )
            .await;

        assert_eq!(ids(&previews), vec!["slow", "mid", "fast"]);
    }

    #[tokio::test]
    async fn one_failing_peer_does_not_abort_the_batch() {
        let log = ScriptedLog::default()
            .with("me", "a", Reply::Record(r#"{"senderId":"a","text":"one"}"#), 0)
            .with("me", "b", Reply::Fail, 0)
            .with("me", "c", Reply::Record(r#"{"senderId":"c","text":"three"}"#), 0);
        let aggregator = PreviewAggregator::new(Arc::new(log));

        let previews = aggregator
            .build_previews(
                &"me".into(),
                vec![Peer::new("a"), Peer::new("b"), Peer::new("c")],
            )
            .await;

        assert_eq!(ids(&previews), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn invalid_peer_identity_is_skipped() {
        let log = ScriptedLog::default()
            .with("me", "ok", Reply::Record(r#"{"senderId":"ok","text":"hey"}"#), 0);
        let aggregator = PreviewAggregator::new(Arc::new(log));

        let previews = aggregator
            .build_previews(
                &"me".into(),
                vec![Peer::new("bad--id"), Peer::new("ok"), Peer::new("")],
            )
            .await;

        assert_eq!(ids(&previews), vec!["ok"]);
    }

    #[tokio::test]
    async fn slow_peer_times_out_without_blocking_others() {
        let log = ScriptedLog::default()
            .with("me", "stuck", Reply::Hang, 0)
            .with("me", "fine", Reply::Record(r#"{"senderId":"fine","text":"here"}"#), 0);
        let aggregator = PreviewAggregator::new(Arc::new(log))
            .with_fetch_timeout(Some(Duration::from_millis(50)));

        let previews = aggregator
            .build_previews(&"me".into(), vec![Peer::new("stuck"), Peer::new("fine")])
            .await;

        assert_eq!(ids(&previews), vec!["fine"]);
    }

    #[tokio::test]
    async fn concurrency_is_capped() {
        let mut log = ScriptedLog::default();
        let peers: Vec<Peer> = (0..12).map(|i| Peer::new(format!("p{}", i))).collect();
        for peer in &peers {
            let reply = Reply::Record(r#"{"senderId":"x","text":"t"}"#);
            log = log.with("me", peer.id.as_str(), reply, 10);
        }
        let log = Arc::new(log);
        let aggregator = PreviewAggregator::new(log.clone()).with_max_in_flight(3);

        let previews = aggregator.build_previews(&"me".into(), peers).await;

        assert_eq!(previews.len(), 12);
        let peak = log.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in-flight was {}", peak);
        assert!(peak > 1, "reads did not overlap");
    }

    #[tokio::test]
    async fn slow_peer_does_not_hold_back_later_reads() {
        // Cap of 4 with two slow peers four places apart: both slow reads
        // should overlap instead of running back to back.
        let slow = Reply::Record(r#"{"senderId":"s","text":"slow"}"#);
        let fast = Reply::Record(r#"{"senderId":"f","text":"fast"}"#);
        let names = ["slow1", "f0", "f1", "f2", "slow2", "f3", "f4", "f5", "f6", "f7"];

        let mut log = ScriptedLog::default();
        for name in names {
            let (reply, delay) = if name.starts_with("slow") {
                (slow.clone(), 300)
            } else {
                (fast.clone(), 10)
            };
            log = log.with("me", name, reply, delay);
        }
        let aggregator = PreviewAggregator::new(Arc::new(log)).with_max_in_flight(4);
        let peers: Vec<Peer> = names.iter().map(|name| Peer::new(*name)).collect();

        let started = std::time::Instant::now();
        let previews = aggregator.build_previews(&"me".into(), peers).await;
        let elapsed = started.elapsed();

        assert_eq!(ids(&previews), names.to_vec());
        assert!(elapsed < Duration::from_millis(500), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn zero_cap_is_clamped() {
        let aggregator =
            PreviewAggregator::new(Arc::new(ScriptedLog::default())).with_max_in_flight(0);
        assert_eq!(aggregator.max_in_flight(), 1);
        assert!(aggregator.build_previews(&"me".into(), vec![Peer::new("p")]).await.is_empty());
    }

    #[tokio::test]
    async fn dropping_the_request_cancels_outstanding_reads() {
        let log = Arc::new(ScriptedLog::default().with("me", "p", Reply::Hang, 0));
        let aggregator = PreviewAggregator::new(log.clone());

        let me = Identity::from("me");
        let pending = aggregator.build_previews(&me, vec![Peer::new("p")]);
        let timed_out = tokio::time::timeout(Duration::from_millis(20), pending).await;

        assert!(timed_out.is_err());
        // The hung read was dropped without ever completing.
        assert_eq!(log.in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(log.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recent_chats_uses_the_friend_graph() {
        let log = ScriptedLog::default()
            .with("me", "p2", Reply::Record(r#"{"senderId":"me","text":"sent"}"#), 0);
        let aggregator = PreviewAggregator::new(Arc::new(log));
        let graph = StaticGraph(Ok(vec![
            Peer::new("p1"),
            Peer::new("p2").with_display_name("Two"),
        ]));

        let previews = aggregator.recent_chats(&graph, &"me".into()).await.unwrap();

        assert_eq!(ids(&previews), vec!["p2"]);
        assert_eq!(previews[0].peer.display_name.as_deref(), Some("Two"));
        assert!(previews[0].last_message.is_from(&"me".into()));
    }

    #[tokio::test]
    async fn friend_graph_failure_propagates() {
        let aggregator = PreviewAggregator::new(Arc::new(ScriptedLog::default()));
        let graph = StaticGraph(Err(PreviewError::Unauthorized));

        let err = aggregator.recent_chats(&graph, &"me".into()).await.unwrap_err();
        assert!(matches!(err, PreviewError::Unauthorized));
    }

    #[tokio::test]
    async fn works_behind_a_trait_object() {
        let log: Arc<dyn MessageLog> = Arc::new(
            ScriptedLog::default().with(
                "me",
                "p",
                Reply::Record(r#"{"senderId":"p","text":"dyn"}"#),
                0,
            ),
        );
        let aggregator = PreviewAggregator::new(log);

        let previews = aggregator.build_previews(&"me".into(), vec![Peer::new("p")]).await;
        assert_eq!(previews[0].last_message.text, "dyn");
    }
}
