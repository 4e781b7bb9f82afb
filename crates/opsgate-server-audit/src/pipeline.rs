// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use opsgate_server_config::{AuditConfig, QueueOverflowPolicy};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, Semaphore};
use tracing::{instrument, warn};

use crate::error::{AuditError, AuditResult};
use crate::event::AuditEvent;
use crate::sink::AuditSink;

enum Message {
	Event(AuditEvent),
	Flush(oneshot::Sender<()>),
}

/// Bounded audit queue drained by a single consumer task.
///
/// Sinks are published to one after another in the order given, so each sink
/// sees events in submission order. A failing sink is logged and skipped.
///
/// Under [`QueueOverflowPolicy::Block`] a full queue parks the event in a
/// waiting sender. At most `queue_capacity` senders are parked at once; past
/// that the event is dropped with a warning.
pub struct AuditService {
	tx: mpsc::Sender<Message>,
	overflow_policy: QueueOverflowPolicy,
	parked: Arc<Semaphore>,
	parked_limit: u32,
}

impl AuditService {
	/// Must be called from within a Tokio runtime.
	pub fn new(
		queue_capacity: usize,
		overflow_policy: QueueOverflowPolicy,
		sinks: Vec<Arc<dyn AuditSink>>,
	) -> Self {
		let queue_capacity = queue_capacity.max(1);
		let (tx, rx) = mpsc::channel(queue_capacity);
		let parked_limit = u32::try_from(queue_capacity).unwrap_or(u32::MAX);

		tokio::spawn(Self::background_task(rx, sinks));

		Self {
			tx,
			overflow_policy,
			parked: Arc::new(Semaphore::new(parked_limit as usize)),
			parked_limit,
		}
	}

	pub fn from_config(config: &AuditConfig, sinks: Vec<Arc<dyn AuditSink>>) -> Self {
		Self::new(config.queue_capacity, config.queue_overflow_policy, sinks)
	}

	async fn background_task(mut rx: mpsc::Receiver<Message>, sinks: Vec<Arc<dyn AuditSink>>) {
		while let Some(message) = rx.recv().await {
			match message {
				Message::Event(event) => Self::publish(&sinks, event).await,
				Message::Flush(done) => {
					let _ = done.send(());
				}
			}
		}
	}

	async fn publish(sinks: &[Arc<dyn AuditSink>], event: AuditEvent) {
		let event = Arc::new(event);
		for sink in sinks {
			if let Err(source) = sink.publish(Arc::clone(&event)).await {
				let error = AuditError::SinkError {
					sink: sink.name().to_string(),
					source,
				};
				warn!(event_id = %event.id, error = %error, "audit sink publish failed");
			}
		}
	}

	/// Queue an audit event without waiting.
	///
	/// Returns `true` if the event was queued (or parked under `Block`),
	/// `false` if it was dropped.
	#[instrument(skip(self, event), fields(event_type = %event.event_type))]
	pub fn log(&self, event: AuditEvent) -> bool {
		let event_id = event.id;
		let message = match self.tx.try_send(Message::Event(event)) {
			Ok(()) => return true,
			Err(TrySendError::Closed(_)) => {
				warn!(%event_id, "audit queue closed, event dropped");
				return false;
			}
			Err(TrySendError::Full(message)) => message,
		};

		match self.overflow_policy {
			QueueOverflowPolicy::DropNewest => {
				warn!(%event_id, "audit queue full, event dropped");
				false
			}
			QueueOverflowPolicy::Block => {
				let Ok(permit) = Arc::clone(&self.parked).try_acquire_owned() else {
					warn!(%event_id, "audit queue and parked senders full, event dropped");
					return false;
				};
				let tx = self.tx.clone();
				tokio::spawn(async move {
					if tx.send(message).await.is_err() {
						warn!(%event_id, "audit queue closed, event dropped");
					}
					drop(permit);
				});
				true
			}
		}
	}

	/// Queue an event if there is room right now.
	pub fn try_log(&self, event: AuditEvent) -> AuditResult<()> {
		self.tx.try_send(Message::Event(event)).map_err(|e| match e {
			TrySendError::Full(_) => AuditError::QueueFull,
			TrySendError::Closed(_) => AuditError::Shutdown,
		})
	}

	/// Queue an event, waiting for room.
	pub async fn log_blocking(&self, event: AuditEvent) -> AuditResult<()> {
		self
			.tx
			.send(Message::Event(event))
			.await
			.map_err(|_| AuditError::Shutdown)
	}

	/// Waits until every event accepted so far has been offered to the sinks.
	pub async fn flush(&self) {
		// Parked senders hold permits until their event is queued.
		drop(self.parked.acquire_many(self.parked_limit).await);

		let (done, wait) = oneshot::channel();
		if self.tx.send(Message::Flush(done)).await.is_ok() {
			let _ = wait.await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::event::tests::sample_evaluation;
	use crate::sink::AuditSinkError;
	use async_trait::async_trait;
	use opsgate_authz_core::PolicyEffect;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Mutex;
	use tokio::time::{sleep, Duration};

	struct TestSink {
		name: String,
		seen: Mutex<Vec<uuid::Uuid>>,
	}

	impl TestSink {
		fn new(name: &str) -> Self {
			Self {
				name: name.to_string(),
				seen: Mutex::new(Vec::new()),
			}
		}

		fn seen(&self) -> Vec<uuid::Uuid> {
			self.seen.lock().unwrap().clone()
		}
	}

	#[async_trait]
	impl AuditSink for TestSink {
		fn name(&self) -> &str {
			&self.name
		}

		async fn publish(&self, event: Arc<AuditEvent>) -> Result<(), AuditSinkError> {
			self.seen.lock().unwrap().push(event.id);
			Ok(())
		}
	}

	struct FailingSink {
		attempts: AtomicUsize,
	}

	#[async_trait]
	impl AuditSink for FailingSink {
		fn name(&self) -> &str {
			"failing"
		}

		async fn publish(&self, _event: Arc<AuditEvent>) -> Result<(), AuditSinkError> {
			self.attempts.fetch_add(1, Ordering::SeqCst);
			Err(AuditSinkError::Transient("test error".to_string()))
		}
	}

	/// Holds the consumer inside `publish` until a permit is added.
	struct GateSink {
		gate: Arc<Semaphore>,
		published: AtomicUsize,
	}

	impl GateSink {
		fn new() -> (Arc<Self>, Arc<Semaphore>) {
			let gate = Arc::new(Semaphore::new(0));
			let sink = Arc::new(Self {
				gate: gate.clone(),
				published: AtomicUsize::new(0),
			});
			(sink, gate)
		}

		fn published(&self) -> usize {
			self.published.load(Ordering::SeqCst)
		}
	}

	#[async_trait]
	impl AuditSink for GateSink {
		fn name(&self) -> &str {
			"gate"
		}

		async fn publish(&self, _event: Arc<AuditEvent>) -> Result<(), AuditSinkError> {
			self.gate.acquire().await.unwrap().forget();
			self.published.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
	}

	fn event() -> AuditEvent {
		AuditEvent::policy_evaluation(sample_evaluation(PolicyEffect::Deny))
	}

	async fn wait_for(mut done: impl FnMut() -> bool) {
		for _ in 0..100 {
			if done() {
				return;
			}
			sleep(Duration::from_millis(10)).await;
		}
	}

	#[tokio::test]
	async fn test_log_delivers_in_order() {
		let sink = Arc::new(TestSink::new("test"));
		let service = AuditService::new(16, QueueOverflowPolicy::DropNewest, vec![sink.clone()]);

		let events: Vec<AuditEvent> = (0..5).map(|_| event()).collect();
		let ids: Vec<_> = events.iter().map(|e| e.id).collect();
		for e in events {
			assert!(service.log(e));
		}

		wait_for(|| sink.seen().len() == 5).await;
		assert_eq!(sink.seen(), ids);
	}

	#[tokio::test]
	async fn test_log_blocking_sends_to_sink() {
		let sink = Arc::new(TestSink::new("test"));
		let service = AuditService::new(16, QueueOverflowPolicy::DropNewest, vec![sink.clone()]);

		service.log_blocking(event()).await.unwrap();

		wait_for(|| sink.seen().len() == 1).await;
		assert_eq!(sink.seen().len(), 1);
	}

	#[tokio::test]
	async fn test_failing_sink_does_not_block_others() {
		let failing = Arc::new(FailingSink {
			attempts: AtomicUsize::new(0),
		});
		let good = Arc::new(TestSink::new("good"));
		let service = AuditService::new(
			16,
			QueueOverflowPolicy::DropNewest,
			vec![failing.clone(), good.clone()],
		);

		service.log(event());

		wait_for(|| good.seen().len() == 1).await;
		assert_eq!(good.seen().len(), 1);
		assert_eq!(failing.attempts.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_full_queue_drops_newest() {
		let (sink, gate) = GateSink::new();
		let service = AuditService::new(1, QueueOverflowPolicy::DropNewest, vec![sink.clone()]);

		// The consumer takes the first event and parks in the sink.
		assert!(service.log(event()));
		sleep(Duration::from_millis(50)).await;

		assert!(service.log(event()));
		assert!(matches!(service.try_log(event()), Err(AuditError::QueueFull)));
		assert!(!service.log(event()));

		gate.add_permits(1);
		wait_for(|| sink.published() == 1).await;
		gate.add_permits(1);
		wait_for(|| sink.published() == 2).await;
		assert_eq!(sink.published(), 2);
	}

	#[tokio::test]
	async fn test_block_policy_parks_up_to_capacity() {
		let sink = Arc::new(TestSink::new("test"));
		let service = AuditService::new(4, QueueOverflowPolicy::Block, vec![sink.clone()]);

		// Four fill the queue and four wait in parked senders.
		for _ in 0..8 {
			assert!(service.log(event()));
		}

		wait_for(|| sink.seen().len() == 8).await;
		assert_eq!(sink.seen().len(), 8);
	}

	#[tokio::test]
	async fn test_block_policy_bounds_parked_senders() {
		let (sink, gate) = GateSink::new();
		let service = AuditService::new(4, QueueOverflowPolicy::Block, vec![sink.clone()]);

		assert!(service.log(event()));
		sleep(Duration::from_millis(50)).await;

		let accepted = (0..1000).filter(|_| service.log(event())).count();
		assert_eq!(accepted, 8);
		assert_eq!(service.parked.available_permits(), 0);

		gate.add_permits(1000);
		wait_for(|| sink.published() == 9).await;
		assert_eq!(sink.published(), 9);

		wait_for(|| service.parked.available_permits() == 4).await;
		assert_eq!(service.parked.available_permits(), 4);
	}

	#[tokio::test]
	async fn test_flush_waits_for_delivery() {
		let sink = Arc::new(TestSink::new("test"));
		let service = AuditService::new(2, QueueOverflowPolicy::Block, vec![sink.clone()]);

		for _ in 0..4 {
			assert!(service.log(event()));
		}
		service.flush().await;

		assert_eq!(sink.seen().len(), 4);
	}
}
