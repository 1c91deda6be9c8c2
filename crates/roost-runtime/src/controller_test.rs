#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value, json};
    use tokio::sync::{Mutex, mpsc};
    use tokio_util::sync::CancellationToken;

    use roost_core::RoostError;
    use roost_core::session::{CompletionStatus, MessageRole, StreamPhase};
    use roost_stream::transport::STREAM_EVENT;

    use crate::backend::{
        AssistantBackend, ProcessControl, ProcessInput, SpawnSpec, SpawnedProcess,
    };
    use crate::config::RuntimeConfig;
    use crate::controller::SessionController;

    const SETTLE: Duration = Duration::from_millis(30);

    /// Scripted backend. Each spawn plays the next script of envelopes;
    /// unless the script ends with `complete`, the process then stays
    /// alive until killed and emits `complete` on its way out.
    struct MockBackend {
        scripts: Mutex<VecDeque<Vec<Value>>>,
        spawns: AtomicUsize,
        sent: Arc<Mutex<Vec<String>>>,
        kills: Arc<Mutex<Vec<String>>>,
        modes: Arc<Mutex<Vec<Option<String>>>>,
        spawn_delay: Option<Duration>,
        fail_spawns: bool,
    }

    impl MockBackend {
        fn new(scripts: Vec<Vec<Value>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into_iter().collect()),
                spawns: AtomicUsize::new(0),
                sent: Arc::new(Mutex::new(Vec::new())),
                kills: Arc::new(Mutex::new(Vec::new())),
                modes: Arc::new(Mutex::new(Vec::new())),
                spawn_delay: None,
                fail_spawns: false,
            }
        }

        fn failing() -> Self {
            let mut mock = Self::new(Vec::new());
            mock.fail_spawns = true;
            mock
        }

        fn with_spawn_delay(mut self, delay: Duration) -> Self {
            self.spawn_delay = Some(delay);
            self
        }

        fn spawn_count(&self) -> usize {
            self.spawns.load(Ordering::SeqCst)
        }
    }

    struct MockInput {
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ProcessInput for MockInput {
        async fn send_turn(&self, text: &str) -> roost_core::Result<()> {
            self.sent.lock().await.push(text.to_string());
            Ok(())
        }
    }

    struct MockControl {
        process_id: String,
        kills: Arc<Mutex<Vec<String>>>,
        kill: CancellationToken,
    }

    #[async_trait]
    impl ProcessControl for MockControl {
        async fn kill(&self) -> roost_core::Result<()> {
            self.kills.lock().await.push(self.process_id.clone());
            self.kill.cancel();
            Ok(())
        }
    }

    #[async_trait]
    impl AssistantBackend for MockBackend {
        async fn check_availability(&self) -> roost_core::Result<()> {
            Ok(())
        }

        async fn spawn(&self, spec: SpawnSpec) -> roost_core::Result<SpawnedProcess> {
            if self.fail_spawns {
                return Err(RoostError::spawn("scripted spawn failure"));
            }
            if let Some(delay) = self.spawn_delay {
                tokio::time::sleep(delay).await;
            }
            self.spawns.fetch_add(1, Ordering::SeqCst);
            self.modes.lock().await.push(spec.permission_mode.clone());
            let script = self.scripts.lock().await.pop_front().unwrap_or_default();

            let (tx, rx) = mpsc::channel(32);
            let kill = CancellationToken::new();
            let process_id = spec.process_id.clone();
            let playback_kill = kill.clone();
            tokio::spawn(async move {
                for mut envelope in script {
                    // Scripts carry a placeholder id; stamp the real one.
                    rewrite_process_id(&mut envelope, &process_id);
                    let ends = envelope["data"]["type"] == "complete";
                    if tx.send(envelope).await.is_err() {
                        return;
                    }
                    if ends {
                        return;
                    }
                }
                playback_kill.cancelled().await;
                // A killed process can still drain buffered output.
                let _ = tx
                    .send(envelope_for(
                        &process_id,
                        json!({
                            "type": "assistant",
                            "message": { "content": "late reply" },
                            "uuid": "late-uuid",
                        }),
                    ))
                    .await;
                let _ = tx
                    .send(envelope_for(
                        &process_id,
                        json!({ "type": "complete", "code": 0 }),
                    ))
                    .await;
            });

            Ok(SpawnedProcess {
                events: rx,
                input: Box::new(MockInput {
                    sent: self.sent.clone(),
                }),
                control: Box::new(MockControl {
                    process_id: spec.process_id,
                    kills: self.kills.clone(),
                    kill,
                }),
            })
        }
    }

    fn envelope_for(process_id: &str, mut data: Value) -> Value {
        if let Some(object) = data.as_object_mut() {
            object.insert("processId".to_string(), json!(process_id));
        }
        json!({ "event": STREAM_EVENT, "data": data })
    }

    fn rewrite_process_id(envelope: &mut Value, process_id: &str) {
        if let Some(data) = envelope.get_mut("data").and_then(Value::as_object_mut) {
            data.insert("processId".to_string(), json!(process_id));
        }
    }

    fn script_event(data: Value) -> Value {
        envelope_for("placeholder", data)
    }

    fn created(session_id: &str) -> Value {
        script_event(json!({
            "type": "session_created",
            "sessionId": session_id,
            "projectPath": "/tmp/demo",
            "projectName": "demo",
            "createdAt": "2026-01-01T00:00:00Z",
        }))
    }

    fn ready(session_id: &str) -> Value {
        script_event(json!({ "type": "session_ready", "sessionId": session_id }))
    }

    fn init() -> Value {
        script_event(json!({ "type": "system", "subtype": "init" }))
    }

    fn chunk(text: &str) -> Value {
        script_event(json!({ "type": "chunk", "content": text }))
    }

    fn success_result(cost: f64) -> Value {
        script_event(json!({
            "type": "result",
            "subtype": "success",
            "totalCostUsd": cost,
            "isError": false,
        }))
    }

    fn complete(code: i32) -> Value {
        script_event(json!({ "type": "complete", "code": code }))
    }

    /// A project directory that actually exists on disk.
    fn demo_path() -> String {
        std::env::temp_dir().to_string_lossy().into_owned()
    }

    fn controller_with(scripts: Vec<Vec<Value>>) -> (SessionController, Arc<MockBackend>) {
        let backend = Arc::new(MockBackend::new(scripts));
        let config = RuntimeConfig {
            flush_interval_ms: 5,
            ..Default::default()
        };
        (SessionController::new(backend.clone(), config), backend)
    }

    #[tokio::test]
    async fn test_start_new_session_registers_entry() {
        let (controller, _backend) = controller_with(vec![vec![created("s1"), init()]]);

        let entry = controller
            .start_new_session(demo_path(), "demo", None)
            .await
            .unwrap();
        assert!(entry.process_id.starts_with("proc-"));

        tokio::time::sleep(SETTLE).await;
        let entry = controller.session(&entry.process_id).await.unwrap();
        assert_eq!(entry.session_id.as_deref(), Some("s1"));
        assert!(entry.is_streaming);
        assert_eq!(controller.sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_spawn_failure_rolls_back_registry() {
        let backend = Arc::new(MockBackend::failing());
        let controller = SessionController::new(backend, RuntimeConfig::default());

        let err = controller
            .start_new_session(demo_path(), "demo", None)
            .await
            .unwrap_err();
        assert!(err.is_spawn());
        assert!(controller.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_first_message_is_recorded_and_sent() {
        let (controller, backend) = controller_with(vec![vec![created("s1"), init()]]);

        controller
            .start_new_session(demo_path(), "demo", Some("hello"))
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;

        assert_eq!(*backend.sent.lock().await, vec!["hello"]);
        let messages = controller.timeline().snapshot("s1").await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content, "hello");
    }

    #[tokio::test]
    async fn test_send_message_gates_on_streaming() {
        // No result in the script, so the turn never finishes.
        let (controller, _backend) = controller_with(vec![vec![created("s1"), init()]]);
        let entry = controller
            .start_new_session(demo_path(), "demo", None)
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;

        let err = controller
            .send_message(&entry.process_id, "another")
            .await
            .unwrap_err();
        assert!(err.is_not_ready());
    }

    #[tokio::test]
    async fn test_send_message_after_result_succeeds() {
        let (controller, backend) =
            controller_with(vec![vec![created("s1"), init(), success_result(0.001)]]);
        let entry = controller
            .start_new_session(demo_path(), "demo", None)
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;

        controller
            .send_message(&entry.process_id, "next question")
            .await
            .unwrap();

        assert_eq!(*backend.sent.lock().await, vec!["next question"]);
        let entry = controller.session(&entry.process_id).await.unwrap();
        assert!(entry.is_streaming);
    }

    #[tokio::test]
    async fn test_send_message_to_unknown_session_is_not_found() {
        let (controller, _backend) = controller_with(Vec::new());
        let err = controller
            .send_message("proc-missing", "hi")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_send_message_after_process_exit_is_not_ready() {
        let (controller, _backend) = controller_with(vec![vec![
            created("s1"),
            init(),
            success_result(0.001),
            complete(0),
        ]]);
        let entry = controller
            .start_new_session(demo_path(), "demo", None)
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;

        let err = controller
            .send_message(&entry.process_id, "hello?")
            .await
            .unwrap_err();
        assert!(err.is_not_ready());
    }

    #[tokio::test]
    async fn test_resume_transfers_ownership_from_live_owner() {
        let (controller, backend) = controller_with(vec![
            vec![ready("s1"), init(), chunk("st")],
            vec![ready("s1"), init()],
        ]);

        let first = controller
            .resume_session("s1", demo_path(), "demo", None)
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;
        let owner = controller.session(&first.process_id).await.unwrap();
        assert!(owner.is_streaming);

        // Resuming again mid-stream hands the session to a fresh process.
        let second = controller
            .resume_session("s1", demo_path(), "demo", None)
            .await
            .unwrap();
        assert_ne!(second.process_id, first.process_id);
        assert_eq!(backend.spawn_count(), 2);

        tokio::time::sleep(SETTLE).await;
        let streaming: Vec<_> = controller
            .sessions()
            .await
            .into_iter()
            .filter(|s| s.is_streaming)
            .collect();
        assert_eq!(streaming.len(), 1);
        assert_eq!(streaming[0].process_id, second.process_id);
    }

    #[tokio::test]
    async fn test_concurrent_resumes_conflict() {
        let backend = Arc::new(
            MockBackend::new(vec![vec![ready("s1"), init()], vec![ready("s1"), init()]])
                .with_spawn_delay(Duration::from_millis(20)),
        );
        let config = RuntimeConfig {
            flush_interval_ms: 5,
            ..Default::default()
        };
        let controller = SessionController::new(backend.clone(), config);

        let (a, b) = tokio::join!(
            controller.resume_session("s1", demo_path(), "demo", None),
            controller.resume_session("s1", demo_path(), "demo", None),
        );
        let outcomes = [a, b];
        let won = outcomes.iter().filter(|r| r.is_ok()).count();
        let conflicted = outcomes
            .iter()
            .filter(|r| r.as_ref().is_err_and(|e| e.is_conflict()))
            .count();
        assert_eq!(won, 1);
        assert_eq!(conflicted, 1);

        tokio::time::sleep(SETTLE).await;
        let streaming: Vec<_> = controller
            .sessions()
            .await
            .into_iter()
            .filter(|s| s.is_streaming)
            .collect();
        assert_eq!(streaming.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_passes_permission_mode_through() {
        let (controller, backend) =
            controller_with(vec![vec![ready("s1"), init(), success_result(0.001)]]);

        // Unrecognized modes are forwarded unchanged, never interpreted.
        controller
            .resume_session("s1", demo_path(), "demo", Some("someFutureMode"))
            .await
            .unwrap();

        assert_eq!(
            *backend.modes.lock().await,
            vec![Some("someFutureMode".to_string())]
        );
    }

    #[tokio::test]
    async fn test_resume_after_owner_died_spawns_again() {
        let (controller, backend) = controller_with(vec![
            vec![ready("s1"), init(), success_result(0.001), complete(0)],
            vec![ready("s1"), init()],
        ]);

        let first = controller
            .resume_session("s1", demo_path(), "demo", None)
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;
        let stale = controller.session(&first.process_id).await.unwrap();
        assert_eq!(stale.signals.phase, StreamPhase::Complete);

        let second = controller
            .resume_session("s1", demo_path(), "demo", None)
            .await
            .unwrap();
        assert_ne!(second.process_id, first.process_id);
        assert_eq!(backend.spawn_count(), 2);

        tokio::time::sleep(SETTLE).await;
        let sessions = controller.sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].process_id, second.process_id);
    }

    #[tokio::test]
    async fn test_stop_session_removes_and_kills() {
        let (controller, backend) = controller_with(vec![vec![created("s1"), init()]]);
        let entry = controller
            .start_new_session(demo_path(), "demo", None)
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;

        controller.stop_session(&entry.process_id).await.unwrap();
        assert!(controller.sessions().await.is_empty());

        // The kill runs off the stop path; buffered envelopes drained on the
        // way out can neither resurrect the entry nor land in the timeline.
        tokio::time::sleep(SETTLE).await;
        assert_eq!(*backend.kills.lock().await, vec![entry.process_id.clone()]);
        assert!(controller.sessions().await.is_empty());
        assert!(controller.timeline().snapshot("s1").await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_unknown_session_is_not_found() {
        let (controller, _backend) = controller_with(Vec::new());
        let err = controller.stop_session("proc-missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_streamed_turn_end_to_end() {
        let (controller, _backend) = controller_with(vec![vec![
            created("s1"),
            init(),
            chunk("The "),
            chunk("answer is "),
            chunk("42."),
            success_result(0.002),
        ]]);

        let entry = controller
            .start_new_session(demo_path(), "demo", None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let messages = controller.timeline().snapshot("s1").await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "The answer is 42.");
        assert_eq!(messages[0].role, MessageRole::Assistant);

        let entry = controller.session(&entry.process_id).await.unwrap();
        assert_eq!(entry.signals.completion, CompletionStatus::Success);
        assert_eq!(entry.signals.last_cost_usd, Some(0.002));
        assert!(!entry.is_streaming);
        assert!(entry.signals.live_text.is_none());
        assert_eq!(entry.signals.phase, StreamPhase::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let (controller, backend) = controller_with(vec![
            vec![created("s1"), init()],
            vec![created("s2"), init()],
        ]);
        controller
            .start_new_session(demo_path(), "a", None)
            .await
            .unwrap();
        controller
            .start_new_session(demo_path(), "b", None)
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;

        controller.shutdown().await;
        assert!(controller.sessions().await.is_empty());
        tokio::time::sleep(SETTLE).await;
        assert_eq!(backend.kills.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_start_rejects_missing_project_dir() {
        let (controller, backend) = controller_with(Vec::new());
        let err = controller
            .start_new_session("/no/such/project-dir", "demo", None)
            .await
            .unwrap_err();
        assert!(err.is_spawn());
        assert!(controller.sessions().await.is_empty());
        assert_eq!(backend.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_resume_rejects_missing_project_dir() {
        let (controller, backend) = controller_with(Vec::new());
        let err = controller
            .resume_session("s1", "/no/such/project-dir", "demo", None)
            .await
            .unwrap_err();
        assert!(err.is_spawn());
        assert!(controller.sessions().await.is_empty());
        assert_eq!(backend.spawn_count(), 0);
    }
}
