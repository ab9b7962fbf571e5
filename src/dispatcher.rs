//! Message dispatcher: one sequential worker per active user.
//!
//! The main loop reads the channel stream and hands each message to its
//! sender's worker. Workers process their queue in arrival order and exit
//! after an idle period; a worker for the same user that is started later
//! waits for its predecessor to finish first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::channels::{Channel, IncomingMessage};
use crate::error::Error;
use crate::onboarding::OnboardingManager;

/// Finished workers are swept from the map every this many dispatches.
const SWEEP_EVERY: u64 = 256;

struct Worker {
    tx: mpsc::UnboundedSender<IncomingMessage>,
    done: JoinHandle<()>,
}

/// Routes inbound messages to per-user workers.
pub struct Dispatcher {
    manager: Arc<OnboardingManager>,
    channel: Arc<dyn Channel>,
    idle_timeout: Duration,
    workers: HashMap<String, Worker>,
    dispatched: u64,
}

impl Dispatcher {
    pub fn new(
        manager: Arc<OnboardingManager>,
        channel: Arc<dyn Channel>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            channel,
            idle_timeout,
            workers: HashMap::new(),
            dispatched: 0,
        }
    }

    /// Run until Ctrl+C or until the channel stream ends, then drain workers.
    pub async fn run(mut self) -> Result<(), Error> {
        let mut stream = self.channel.start().await?;
        tracing::info!(channel = self.channel.name(), "Dispatcher ready and listening");

        loop {
            let message = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl+C received, shutting down...");
                    break;
                }
                msg = stream.next() => match msg {
                    Some(m) => m,
                    None => {
                        tracing::info!("Channel stream ended, shutting down...");
                        break;
                    }
                },
            };
            self.dispatch(message);
        }

        self.drain().await;
        if let Err(e) = self.channel.shutdown().await {
            tracing::warn!(error = %e, "Channel shutdown failed");
        }
        Ok(())
    }

    /// Queue `msg` on its sender's worker, starting one if needed.
    fn dispatch(&mut self, msg: IncomingMessage) {
        self.dispatched += 1;
        if self.dispatched % SWEEP_EVERY == 0 {
            self.workers.retain(|_, w| !w.done.is_finished());
        }

        let msg = match self.workers.get(&msg.user_id) {
            Some(worker) => match worker.tx.send(msg) {
                Ok(()) => return,
                // Worker went idle and closed its queue.
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };

        let user_id = msg.user_id.clone();
        let previous = self.workers.remove(&user_id).map(|w| w.done);
        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive until the worker task starts.
        let _ = tx.send(msg);

        let span = tracing::info_span!("user", user_id = %user_id);
        let done = tokio::spawn(
            run_worker(
                self.manager.clone(),
                self.channel.clone(),
                rx,
                self.idle_timeout,
                previous,
            )
            .instrument(span),
        );
        self.workers.insert(user_id, Worker { tx, done });
    }

    /// Close every queue and wait for in-flight work.
    async fn drain(&mut self) {
        let workers: Vec<Worker> = self.workers.drain().map(|(_, w)| w).collect();
        for worker in workers {
            drop(worker.tx);
            if let Err(e) = worker.done.await {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
    }

    /// Number of tracked workers (finished ones may linger until the next sweep).
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

async fn run_worker(
    manager: Arc<OnboardingManager>,
    channel: Arc<dyn Channel>,
    mut rx: mpsc::UnboundedReceiver<IncomingMessage>,
    idle_timeout: Duration,
    previous: Option<JoinHandle<()>>,
) {
    if let Some(previous) = previous {
        if let Err(e) = previous.await {
            tracing::error!(error = %e, "Previous worker task failed");
        }
    }

    loop {
        match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(msg)) => process(&manager, channel.as_ref(), msg).await,
            Ok(None) => break,
            Err(_) => {
                // Refuse new messages, then finish what was already queued.
                rx.close();
                while let Ok(msg) = rx.try_recv() {
                    process(&manager, channel.as_ref(), msg).await;
                }
                tracing::debug!("Worker idle, exiting");
                break;
            }
        }
    }
}

async fn process(manager: &OnboardingManager, channel: &dyn Channel, msg: IncomingMessage) {
    let queued_ms = (Utc::now() - msg.received_at).num_milliseconds();
    tracing::debug!(message_id = %msg.id, queued_ms, "Handling message");
    let replies = manager.handle(&msg).await;
    for reply in replies {
        if let Err(e) = channel.respond(&msg, reply).await {
            tracing::warn!(message_id = %msg.id, error = %e, "Failed to send reply");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::channels::{MessageStream, OutgoingResponse};
    use crate::config::{FlowConfig, RetryPolicy};
    use crate::error::ChannelError;
    use crate::onboarding::{KeywordClassifier, MemorySessionStore, OnboardingDeps, prompts};
    use crate::store::{LibSqlBackend, ProfileStore, UpsertStrategy};

    /// Replays a fixed script and records what was sent to whom.
    struct ScriptChannel {
        script: Mutex<Vec<IncomingMessage>>,
        sent: Mutex<Vec<(String, OutgoingResponse)>>,
    }

    impl ScriptChannel {
        fn new(script: Vec<IncomingMessage>) -> Self {
            Self {
                script: Mutex::new(script),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent_to(&self, user_id: &str) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(u, _)| u == user_id)
                .map(|(_, r)| r.content.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Channel for ScriptChannel {
        fn name(&self) -> &str {
            "script"
        }

        async fn start(&self) -> Result<MessageStream, ChannelError> {
            let script = std::mem::take(&mut *self.script.lock().unwrap());
            Ok(Box::pin(futures::stream::iter(script)))
        }

        async fn respond(
            &self,
            msg: &IncomingMessage,
            response: OutgoingResponse,
        ) -> Result<(), ChannelError> {
            // Yield so workers interleave.
            tokio::task::yield_now().await;
            self.sent
                .lock()
                .unwrap()
                .push((msg.user_id.clone(), response));
            Ok(())
        }
    }

    async fn manager() -> Arc<OnboardingManager> {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        Arc::new(OnboardingManager::new(OnboardingDeps {
            profiles: ProfileStore::new(db, UpsertStrategy::Native, RetryPolicy::none()),
            sessions: Arc::new(MemorySessionStore::new()),
            classifier: Arc::new(KeywordClassifier),
            flow: FlowConfig::default(),
        }))
    }

    fn script_for(user_id: &str) -> Vec<IncomingMessage> {
        ["/start", "yes", "Automate routine", "a@b.com", "Individual"]
            .iter()
            .map(|text| IncomingMessage::new("script", user_id, text))
            .collect()
    }

    #[tokio::test]
    async fn interleaved_users_each_see_ordered_flow() {
        let a = script_for("a");
        let b = script_for("b");
        let script: Vec<IncomingMessage> = a.into_iter().zip(b).flat_map(|(x, y)| [x, y]).collect();

        let channel = Arc::new(ScriptChannel::new(script));
        let dispatcher = Dispatcher::new(manager().await, channel.clone(), Duration::from_secs(5));
        dispatcher.run().await.unwrap();

        for user in ["a", "b"] {
            let sent = channel.sent_to(user);
            assert_eq!(sent.len(), 6, "{user}: {sent:?}");
            assert_eq!(sent[1], prompts::knowledge_question());
            assert_eq!(sent[2], prompts::pain_question());
            assert_eq!(sent[3], prompts::email_question());
            assert_eq!(sent[4], prompts::segment_question());
            assert!(sent[5].contains("personal workflow"));
        }
    }

    #[tokio::test]
    async fn worker_runs_after_failed_predecessor() {
        let channel = Arc::new(ScriptChannel::new(Vec::new()));
        let previous = tokio::spawn(async { panic!("worker crashed") });

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(IncomingMessage::new("script", "a", "/start")).unwrap();
        drop(tx);
        run_worker(
            manager().await,
            channel.clone(),
            rx,
            Duration::from_secs(5),
            Some(previous),
        )
        .await;

        let sent = channel.sent_to("a");
        assert_eq!(sent.len(), 2, "{sent:?}");
        assert_eq!(sent[1], prompts::knowledge_question());
    }

    #[tokio::test]
    async fn idle_worker_is_replaced_in_order() {
        let channel = Arc::new(ScriptChannel::new(Vec::new()));
        let mut dispatcher =
            Dispatcher::new(manager().await, channel.clone(), Duration::from_millis(10));

        dispatcher.dispatch(IncomingMessage::new("script", "a", "/start"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        // The first worker has gone idle; this message needs a new one.
        dispatcher.dispatch(IncomingMessage::new("script", "a", "no"));
        dispatcher.drain().await;

        let sent = channel.sent_to("a");
        assert_eq!(sent.len(), 4, "{sent:?}");
        assert_eq!(sent[2], prompts::explainer());
        assert_eq!(sent[3], prompts::pain_question());
        assert_eq!(dispatcher.worker_count(), 0);
    }
}
