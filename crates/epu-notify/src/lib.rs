//! `epu-notify` — pluggable subscriber notification sinks (spec §4.7).
//!
//! `epu-core::SubscriberSink` is the trait boundary the reactor and
//! dispatcher notify through. This crate supplies the concrete sinks a
//! daemon wires in at startup: a callback-based sink in the same idiom
//! as the health monitor's `HealthCallback` and the HTTP trigger's
//! `RequestHandler` (an `Arc<dyn Fn(...) -> BoxFuture>`), and a
//! composite sink that fans a single notification out to several sinks
//! without letting one's failure block the rest.

use std::sync::Arc;

use epu_core::{BoxFuture, SubscriberSink};
use tracing::warn;

/// A sink built from a plain closure, for callers who'd rather hand in a
/// function than implement the trait. Mirrors the
/// `Arc<dyn Fn(...) -> BoxFuture + Send + Sync>` callback shape used
/// elsewhere for single-method collaborators.
pub struct CallbackSink {
    callback: Arc<dyn Fn(&str, &str, serde_json::Value) -> BoxFuture<'static, ()> + Send + Sync>,
}

impl CallbackSink {
    pub fn new(
        callback: impl Fn(&str, &str, serde_json::Value) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }
}

impl SubscriberSink for CallbackSink {
    fn notify_by_name(&self, name: &str, op: &str, payload: serde_json::Value) -> BoxFuture<'_, ()> {
        (self.callback)(name, op, payload)
    }
}

/// Fans a notification out to every sink in the list. Each sink is
/// awaited in turn; a failing sink is logged and does not stop delivery
/// to the rest (spec §4.7: "never lets one subscriber's failure block or
/// cancel delivery to the rest" generalized from per-subscriber to
/// per-sink).
pub struct CompositeSink {
    sinks: Vec<Box<dyn SubscriberSink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Box<dyn SubscriberSink>>) -> Self {
        Self { sinks }
    }
}

impl SubscriberSink for CompositeSink {
    fn notify_by_name(&self, name: &str, op: &str, payload: serde_json::Value) -> BoxFuture<'_, ()> {
        let name = name.to_string();
        let op = op.to_string();
        Box::pin(async move {
            for sink in &self.sinks {
                if let Err(e) = sink.notify_by_name(&name, &op, payload.clone()).await {
                    warn!(name, op, error = %e, "composite sink: one delivery failed, continuing");
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FailingSink;
    impl SubscriberSink for FailingSink {
        fn notify_by_name(&self, _name: &str, _op: &str, _payload: serde_json::Value) -> BoxFuture<'_, ()> {
            Box::pin(async { Err(anyhow::anyhow!("transport down")) })
        }
    }

    struct CountingSink {
        count: AtomicUsize,
    }
    impl SubscriberSink for CountingSink {
        fn notify_by_name(&self, _name: &str, _op: &str, _payload: serde_json::Value) -> BoxFuture<'_, ()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn callback_sink_invokes_closure() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let sink = CallbackSink::new(move |name, op, payload| {
            let seen = seen2.clone();
            let name = name.to_string();
            let op = op.to_string();
            Box::pin(async move {
                seen.lock().unwrap().push((name, op, payload));
                Ok(())
            })
        });

        sink.notify_by_name("sub1", "handle_status", serde_json::json!({"state": "RUNNING"}))
            .await
            .unwrap();

        let recorded = seen.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "sub1");
        assert_eq!(recorded[0].1, "handle_status");
    }

    #[tokio::test]
    async fn composite_sink_continues_past_failing_member() {
        let counting = Box::new(CountingSink { count: AtomicUsize::new(0) });
        let composite = CompositeSink::new(vec![Box::new(FailingSink), counting]);

        composite
            .notify_by_name("sub1", "op", serde_json::json!({}))
            .await
            .expect("composite delivery never propagates member failures");
    }

    #[tokio::test]
    async fn composite_sink_delivers_to_all_members() {
        let counts: Vec<_> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let sinks: Vec<Box<dyn SubscriberSink>> = counts
            .iter()
            .cloned()
            .map(|c| Box::new(SharedCountingSink { count: c }) as Box<dyn SubscriberSink>)
            .collect();
        let composite = CompositeSink::new(sinks);

        composite.notify_by_name("sub1", "op", serde_json::json!({})).await.unwrap();

        for c in &counts {
            assert_eq!(c.load(Ordering::SeqCst), 1);
        }
    }

    struct SharedCountingSink {
        count: Arc<AtomicUsize>,
    }
    impl SubscriberSink for SharedCountingSink {
        fn notify_by_name(&self, _name: &str, _op: &str, _payload: serde_json::Value) -> BoxFuture<'_, ()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }
}
