//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use crate::gateway::{GatewayError, InferenceGateway};
use crate::runtime::{RuntimeSettings, SseEvent, ThreadHandle, ThreadSnapshot};
use crate::thread::HistoryEntry;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

// ============================================================================
// Mock Gateway
// ============================================================================

/// Mock gateway that returns queued replies
pub struct MockGateway {
    replies: Mutex<VecDeque<Result<String, GatewayError>>>,
    /// Record of every history sent
    pub requests: Mutex<Vec<Vec<HistoryEntry>>>,
}

#[allow(dead_code)]
impl MockGateway {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful reply
    pub fn queue_reply(&self, content: impl Into<String>) {
        self.replies.lock().unwrap().push_back(Ok(content.into()));
    }

    /// Queue a failure
    pub fn queue_error(&self, error: GatewayError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded histories
    pub fn recorded_requests(&self) -> Vec<Vec<HistoryEntry>> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self, history: &[HistoryEntry]) -> Result<String, GatewayError> {
        self.requests.lock().unwrap().push(history.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::network("No mock reply queued")))
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceGateway for MockGateway {
    async fn complete(&self, history: &[HistoryEntry]) -> Result<String, GatewayError> {
        self.next_reply(history)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Gated Mock Gateway (for in-flight testing)
// ============================================================================

/// Mock gateway whose calls block until the test releases them
pub struct GatedGateway {
    inner: MockGateway,
    gate: Notify,
    /// Notified when a call reaches the gateway
    pub request_started: Arc<Notify>,
}

#[allow(dead_code)]
impl GatedGateway {
    pub fn new() -> Self {
        Self {
            inner: MockGateway::new(),
            gate: Notify::new(),
            request_started: Arc::new(Notify::new()),
        }
    }

    pub fn queue_reply(&self, content: impl Into<String>) {
        self.inner.queue_reply(content);
    }

    pub fn queue_error(&self, error: GatewayError) {
        self.inner.queue_error(error);
    }

    /// Let one blocked call through
    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn recorded_requests(&self) -> Vec<Vec<HistoryEntry>> {
        self.inner.recorded_requests()
    }
}

impl Default for GatedGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceGateway for GatedGateway {
    async fn complete(&self, history: &[HistoryEntry]) -> Result<String, GatewayError> {
        self.request_started.notify_one();
        self.gate.notified().await;
        self.inner.next_reply(history)
    }

    fn name(&self) -> &str {
        "gated"
    }
}

// ============================================================================
// Test Runtime
// ============================================================================

/// Helper for driving a thread runtime with minimal boilerplate
pub struct TestRuntime<G: InferenceGateway + 'static> {
    pub handle: ThreadHandle,
    pub broadcast_rx: broadcast::Receiver<SseEvent>,
    pub gateway: Arc<G>,
}

impl<G: InferenceGateway + 'static> TestRuntime<G> {
    pub fn new(gateway: G) -> Self {
        Self::with_settings(gateway, &RuntimeSettings::default())
    }

    pub fn with_settings(gateway: G, settings: &RuntimeSettings) -> Self {
        let gateway = Arc::new(gateway);
        let handle = ThreadHandle::spawn("test-session", gateway.clone(), settings);
        let broadcast_rx = handle.subscribe();
        Self {
            handle,
            broadcast_rx,
            gateway,
        }
    }

    /// Wait until the snapshot satisfies `predicate`
    pub async fn wait_for_snapshot(
        &self,
        timeout: Duration,
        predicate: impl FnMut(&ThreadSnapshot) -> bool,
    ) -> bool {
        let mut rx = self.handle.watch();
        let satisfied = matches!(
            tokio::time::timeout(timeout, rx.wait_for(predicate)).await,
            Ok(Ok(_))
        );
        satisfied
    }

    /// Wait until no completion is outstanding
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        self.wait_for_snapshot(timeout, |s| !s.pending).await
    }

    /// Wait for an error notification on the broadcast channel
    pub async fn wait_for_error(&mut self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(50), self.broadcast_rx.recv()).await {
                Ok(Ok(SseEvent::Error { message, .. })) => return Some(message),
                _ => continue,
            }
        }
        None
    }

    /// (role, content) pairs of the current thread
    pub fn contents(&self) -> Vec<(&'static str, String)> {
        self.handle
            .snapshot()
            .turns
            .into_iter()
            .map(|t| (t.role.as_str(), t.content))
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayErrorKind;
    use crate::runtime::DispatchError;
    use crate::state_machine::{ChatState, TransitionError};
    use crate::thread::Role;

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_mock_gateway_records_and_replies() {
        let gateway = MockGateway::new();
        gateway.queue_reply("one");
        let history = vec![HistoryEntry::new(Role::User, "hi")];

        assert_eq!(gateway.complete(&history).await.unwrap(), "one");
        let err = gateway.complete(&history).await.unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::Network);
        assert_eq!(gateway.recorded_requests().len(), 2);
    }

    /// Integration test: full send, rewrite, delete walk-through
    #[tokio::test]
    async fn test_send_rewrite_delete_scenario() {
        let gateway = MockGateway::new();
        gateway.queue_reply("hi there");
        gateway.queue_reply("hello again");
        let rt = TestRuntime::new(gateway);

        let user_id = rt.handle.send("hello").await.unwrap();
        assert!(rt.wait_for_idle(WAIT).await);
        assert_eq!(
            rt.contents(),
            vec![
                ("user", "hello".to_string()),
                ("assistant", "hi there".to_string())
            ]
        );

        let assistant_id = rt.handle.snapshot().turns[1].id.clone();
        rt.handle.rewrite(assistant_id.clone()).await.unwrap();
        assert!(rt.wait_for_idle(WAIT).await);

        let snapshot = rt.handle.snapshot();
        assert_eq!(snapshot.turns.len(), 2);
        assert_eq!(snapshot.turns[1].id, assistant_id);
        assert_eq!(snapshot.turns[1].content, "hello again");

        let after_delete = rt.handle.delete_turn(user_id).await.unwrap();
        assert!(after_delete.turns.is_empty());
        assert!(!after_delete.pending);
    }

    /// Rewrite sends only the turns before the target
    #[tokio::test]
    async fn test_rewrite_context_is_truncated() {
        let gateway = MockGateway::new();
        gateway.queue_reply("A1");
        gateway.queue_reply("A2");
        gateway.queue_reply("A1 again");
        let rt = TestRuntime::new(gateway);

        rt.handle.send("U1").await.unwrap();
        assert!(rt.wait_for_idle(WAIT).await);
        rt.handle.send("U2").await.unwrap();
        assert!(rt.wait_for_idle(WAIT).await);

        let a1 = rt.handle.snapshot().turns[1].id.clone();
        rt.handle.rewrite(a1).await.unwrap();
        assert!(rt.wait_for_idle(WAIT).await);

        let requests = rt.gateway.recorded_requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].len(), 3);
        assert_eq!(requests[2], vec![HistoryEntry::new(Role::User, "U1")]);

        // Later turns stay in the thread
        assert_eq!(
            rt.contents(),
            vec![
                ("user", "U1".to_string()),
                ("assistant", "A1 again".to_string()),
                ("user", "U2".to_string()),
                ("assistant", "A2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_blank_send_is_rejected() {
        let rt = TestRuntime::new(MockGateway::new());

        for text in ["", "   "] {
            let result = rt.handle.send(text).await;
            assert!(matches!(
                result,
                Err(DispatchError::Rejected(TransitionError::EmptyMessage))
            ));
        }
        assert!(rt.handle.snapshot().turns.is_empty());
        assert!(rt.gateway.recorded_requests().is_empty());
    }

    /// Two rapid sends produce one gateway call and one user turn
    #[tokio::test]
    async fn test_single_request_in_flight() {
        let gateway = GatedGateway::new();
        gateway.queue_reply("only answer");
        let rt = TestRuntime::new(gateway);

        rt.handle.send("first").await.unwrap();
        let second = rt.handle.send("second").await;
        assert!(matches!(
            second,
            Err(DispatchError::Rejected(TransitionError::Busy))
        ));

        let user_id = rt.handle.snapshot().turns[0].id.clone();
        let rewrite = rt.handle.rewrite(user_id).await;
        assert!(matches!(
            rewrite,
            Err(DispatchError::Rejected(TransitionError::Busy))
        ));

        assert!(rt.handle.snapshot().pending);
        rt.gateway.release();
        assert!(rt.wait_for_idle(WAIT).await);

        assert_eq!(rt.gateway.recorded_requests().len(), 1);
        assert_eq!(
            rt.contents(),
            vec![
                ("user", "first".to_string()),
                ("assistant", "only answer".to_string())
            ]
        );
    }

    /// Failed send keeps the unanswered user turn
    #[tokio::test]
    async fn test_failed_send_leaves_user_turn() {
        let gateway = MockGateway::new();
        gateway.queue_error(GatewayError::rate_limit("Too many requests, slow down"));
        let mut rt = TestRuntime::new(gateway);

        rt.handle.send("hello").await.unwrap();

        let message = rt.wait_for_error(WAIT).await;
        assert_eq!(message.as_deref(), Some("Too many requests, slow down"));
        assert!(rt.wait_for_idle(WAIT).await);

        let snapshot = rt.handle.snapshot();
        assert_eq!(rt.contents(), vec![("user", "hello".to_string())]);
        let notice = snapshot.last_error.unwrap();
        assert_eq!(notice.kind, GatewayErrorKind::RateLimit);
    }

    /// Failed rewrite keeps the old content; the next request clears the notice
    #[tokio::test]
    async fn test_failed_rewrite_keeps_content() {
        let gateway = MockGateway::new();
        gateway.queue_reply("original");
        gateway.queue_error(GatewayError::server_error("model overloaded"));
        gateway.queue_reply("second answer");
        let rt = TestRuntime::new(gateway);

        rt.handle.send("question").await.unwrap();
        assert!(rt.wait_for_idle(WAIT).await);
        let assistant_id = rt.handle.snapshot().turns[1].id.clone();

        rt.handle.rewrite(assistant_id).await.unwrap();
        assert!(
            rt.wait_for_snapshot(WAIT, |s| !s.pending && s.last_error.is_some())
                .await
        );
        assert_eq!(rt.handle.snapshot().turns[1].content, "original");

        rt.handle.send("another").await.unwrap();
        assert!(rt.handle.snapshot().last_error.is_none());
        assert!(rt.wait_for_idle(WAIT).await);
    }

    /// Deleting the turn a reply is for drops the reply when it lands
    #[tokio::test]
    async fn test_delete_during_pending_discards_reply() {
        let gateway = GatedGateway::new();
        gateway.queue_reply("too late");
        let rt = TestRuntime::new(gateway);

        let user_id = rt.handle.send("question").await.unwrap();
        rt.gateway.request_started.notified().await;

        let after_delete = rt.handle.delete_turn(user_id).await.unwrap();
        assert!(after_delete.turns.is_empty());
        assert!(after_delete.pending, "delete must not clear the pending flag");

        rt.gateway.release();
        assert!(rt.wait_for_idle(WAIT).await);
        assert!(rt.handle.snapshot().turns.is_empty());
    }

    /// Deleting an unrelated exchange does not affect the in-flight reply
    #[tokio::test]
    async fn test_delete_other_turn_during_pending() {
        let gateway = GatedGateway::new();
        gateway.queue_reply("A1");
        gateway.queue_reply("A2");
        let rt = TestRuntime::new(gateway);

        let first = rt.handle.send("U1").await.unwrap();
        rt.gateway.release();
        assert!(rt.wait_for_idle(WAIT).await);

        rt.handle.send("U2").await.unwrap();
        rt.handle.delete_turn(first).await.unwrap();
        rt.gateway.release();
        assert!(rt.wait_for_idle(WAIT).await);

        assert_eq!(
            rt.contents(),
            vec![("user", "U2".to_string()), ("assistant", "A2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_rewrite_unknown_or_user_turn_rejected() {
        let gateway = MockGateway::new();
        gateway.queue_reply("answer");
        let rt = TestRuntime::new(gateway);

        let user_id = rt.handle.send("question").await.unwrap();
        assert!(rt.wait_for_idle(WAIT).await);

        let user = rt.handle.rewrite(user_id).await;
        assert!(matches!(
            user,
            Err(DispatchError::Rejected(TransitionError::NotRewritable(_)))
        ));

        let unknown = rt.handle.rewrite("missing".into()).await;
        assert!(matches!(
            unknown,
            Err(DispatchError::Rejected(TransitionError::UnknownTurn(_)))
        ));
        assert_eq!(rt.gateway.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_hung_gateway_times_out() {
        let settings = RuntimeSettings {
            completion_timeout: Duration::from_millis(50),
            ..RuntimeSettings::default()
        };
        let rt = TestRuntime::with_settings(GatedGateway::new(), &settings);

        rt.handle.send("anyone?").await.unwrap();
        assert!(rt.wait_for_idle(WAIT).await);

        let snapshot = rt.handle.snapshot();
        assert_eq!(snapshot.turns.len(), 1);
        assert_eq!(snapshot.last_error.unwrap().kind, GatewayErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_state_changes_are_broadcast() {
        let gateway = MockGateway::new();
        gateway.queue_reply("hi");
        let mut rt = TestRuntime::new(gateway);

        rt.handle.send("hello").await.unwrap();

        let mut states = Vec::new();
        while states.len() < 2 {
            match tokio::time::timeout(WAIT, rt.broadcast_rx.recv()).await {
                Ok(Ok(SseEvent::StateChange { state })) => states.push(state),
                Ok(Ok(_)) => {}
                other => panic!("expected state change, got {other:?}"),
            }
        }
        assert!(states[0].is_pending());
        assert_eq!(states[1], ChatState::Idle);
    }
}
