//! Chat and detection control behind the HTTP handlers.
//!
//! - `conversation`: chat log rendered for the page.
//! - `detection`: what the detector looks for, and the label file it polls.
//! - `analysis`: the remote service deciding both of the above.

pub(crate) mod analysis;
pub(crate) mod conversation;
pub(crate) mod detection;

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    control::{
        analysis::{AnalysisClient, AnalysisError, AnalysisRequest},
        conversation::{ConversationLog, Role},
        detection::{DetectionConfig, LabelFile},
    },
    error::AppError,
    stream::FrameBuffer,
};

#[derive(Debug, Serialize)]
pub(crate) struct ConversationView {
    pub(crate) messages: Vec<String>,
    pub(crate) camera_active: bool,
}

#[derive(Default)]
struct ControlState {
    conversation: ConversationLog,
    detection: DetectionConfig,
    /// Bumped by every reset; replies that straddle one are not logged.
    epoch: u64,
    /// Bumped by every detection change that must reach the label file.
    label_generation: u64,
}

pub(crate) struct ControlSurface {
    client: Arc<dyn AnalysisClient>,
    timeout: Duration,
    labels: Arc<LabelFile>,
    frames: Arc<FrameBuffer>,
    state: Mutex<ControlState>,
}

impl ControlSurface {
    pub(crate) fn new(
        client: Arc<dyn AnalysisClient>,
        timeout: Duration,
        labels: LabelFile,
        initial_prompt: impl Into<String>,
        frames: Arc<FrameBuffer>,
    ) -> Self {
        let mut detection = DetectionConfig::with_prompt(initial_prompt);
        match labels.load() {
            Ok(classes) if !classes.is_empty() => {
                info!(path = %labels.path().display(), classes = ?classes, "resuming detection from label file");
                detection.detecting = true;
                detection.target_classes = classes.into_iter().collect();
            }
            Ok(_) => {}
            Err(err) => {
                warn!(path = %labels.path().display(), error = %err, "could not read label file");
            }
        }

        Self {
            client,
            timeout,
            labels: Arc::new(labels),
            frames,
            state: Mutex::new(ControlState {
                detection,
                ..ControlState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forward a user message to the analysis service and record the exchange.
    ///
    /// Nothing changes unless the service answers in time.
    pub(crate) async fn send_message(&self, text: &str) -> Result<Vec<String>, AppError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::InvalidInput("Mensaje vacío".into()));
        }

        let (prompt, epoch) = {
            let state = self.lock();
            (state.detection.analysis_prompt.clone(), state.epoch)
        };
        let request = AnalysisRequest {
            message: text.to_string(),
            prompt,
            image_jpeg_base64: self.frames.read().map(|snapshot| BASE64.encode(&snapshot.jpeg)),
        };

        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, self.client.analyze(request)).await {
            Ok(result) => result,
            Err(_) => Err(AnalysisError::Timeout(self.timeout)),
        };
        metrics::histogram!("assistant_analysis_seconds").record(started.elapsed().as_secs_f64());

        let reply = match outcome {
            Ok(reply) => {
                metrics::counter!("assistant_analysis_requests_total", "outcome" => "ok").increment(1);
                reply
            }
            Err(err) => {
                metrics::counter!("assistant_analysis_requests_total", "outcome" => "error")
                    .increment(1);
                warn!(client = self.client.name(), error = %err, "analysis request failed");
                return Err(AppError::CollaboratorUnavailable(err.to_string()));
            }
        };

        let (messages, generation, contents) = {
            let mut state = self.lock();
            state.detection.apply(&reply);
            state.label_generation += 1;
            info!(
                detecting = state.detection.detecting,
                classes = ?state.detection.target_classes,
                "detection updated"
            );
            if state.epoch == epoch {
                state.conversation.push(Role::User, text);
                state.conversation.push(Role::Assistant, reply.reply);
            } else {
                debug!("conversation reset while waiting for the reply, not logging it");
            }
            (
                state.conversation.rendered(),
                state.label_generation,
                LabelFile::render(&state.detection),
            )
        };

        self.write_labels(generation, contents).await;
        Ok(messages)
    }

    async fn write_labels(&self, generation: u64, contents: String) {
        let labels = self.labels.clone();
        let written =
            tokio::task::spawn_blocking(move || labels.write_generation(generation, &contents))
                .await;
        match written {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                warn!(path = %self.labels.path().display(), error = %err, "failed to update label file");
            }
            Err(err) => warn!("label file writer failed: {err}"),
        }
    }

    pub(crate) fn reset_conversation(&self) {
        let mut state = self.lock();
        let cleared = state.conversation.len();
        state.conversation.clear();
        state.epoch += 1;
        info!(cleared, "conversation reset");
    }

    pub(crate) fn conversation(&self) -> ConversationView {
        ConversationView {
            messages: self.lock().conversation.rendered(),
            camera_active: self.camera_active(),
        }
    }

    pub(crate) fn camera_active(&self) -> bool {
        self.frames.is_active()
    }

    pub(crate) fn detection(&self) -> DetectionConfig {
        self.lock().detection.clone()
    }

    pub(crate) fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.lock().conversation.last_activity()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use actix_web::web::Bytes;
    use async_trait::async_trait;

    use super::*;
    use crate::control::{analysis::AnalysisReply, detection::read_labels};

    struct SlowClient;

    #[async_trait]
    impl AnalysisClient for SlowClient {
        async fn analyze(&self, _: AnalysisRequest) -> Result<AnalysisReply, AnalysisError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(AnalysisError::Transport("unreachable".into()))
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    /// Detects cats and remembers what it was sent.
    #[derive(Default)]
    struct CatClient {
        seen: Mutex<Vec<AnalysisRequest>>,
    }

    #[async_trait]
    impl AnalysisClient for CatClient {
        async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisReply, AnalysisError> {
            self.seen.lock().unwrap().push(request);
            Ok(AnalysisReply {
                detecting: true,
                target_classes: vec!["cat".into()],
                analysis_prompt: Some("watch for cats".into()),
                reply: "Buscando gatos".into(),
            })
        }

        fn name(&self) -> &str {
            "cat"
        }
    }

    fn surface(client: Arc<dyn AnalysisClient>, dir: &tempfile::TempDir) -> ControlSurface {
        ControlSurface::new(
            client,
            Duration::from_millis(50),
            LabelFile::new(dir.path().join("label.txt")),
            "base prompt",
            Arc::new(FrameBuffer::new()),
        )
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let control = surface(Arc::new(CatClient::default()), &dir);

        let err = control.send_message("   ").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(control.conversation().messages.is_empty());
        assert!(!dir.path().join("label.txt").exists());
    }

    #[tokio::test]
    async fn timed_out_service_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let control = surface(Arc::new(CatClient::default()), &dir);
        control.send_message("hola").await.unwrap();
        let before = control.detection();

        let control = ControlSurface {
            client: Arc::new(SlowClient),
            ..control
        };
        let err = control.send_message("is there a cat?").await.unwrap_err();
        assert!(matches!(err, AppError::CollaboratorUnavailable(_)));
        assert_eq!(control.conversation().messages.len(), 2);
        assert_eq!(control.detection(), before);
    }

    #[tokio::test]
    async fn successful_reply_updates_detection_labels_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(CatClient::default());
        let control = surface(client.clone(), &dir);
        control.frames.publish(Bytes::from_static(b"jpeg"));

        let messages = control.send_message("  is there a cat?  ").await.unwrap();
        assert_eq!(
            messages,
            vec!["Tú: is there a cat?", "Asistente: Buscando gatos"]
        );

        let detection = control.detection();
        assert!(detection.detecting);
        assert_eq!(detection.analysis_prompt, "watch for cats");
        assert_eq!(
            fs::read_to_string(dir.path().join("label.txt")).unwrap(),
            "cat\n"
        );

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].prompt, "base prompt");
        assert_eq!(seen[0].image_jpeg_base64.as_deref(), Some("anBlZw=="));
    }

    #[tokio::test]
    async fn reset_clears_only_the_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let control = surface(Arc::new(CatClient::default()), &dir);
        control.send_message("hola").await.unwrap();

        control.reset_conversation();
        assert!(control.conversation().messages.is_empty());
        assert!(control.detection().detecting);
        assert_eq!(read_labels(&dir.path().join("label.txt")).unwrap(), vec!["cat"]);
    }

    /// Answers only once the test opens the gate.
    #[derive(Default)]
    struct GatedClient {
        gate: tokio::sync::Notify,
    }

    #[async_trait]
    impl AnalysisClient for GatedClient {
        async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisReply, AnalysisError> {
            self.gate.notified().await;
            Ok(AnalysisReply {
                detecting: true,
                target_classes: vec!["cup".into()],
                analysis_prompt: None,
                reply: format!("visto: {}", request.message),
            })
        }

        fn name(&self) -> &str {
            "gated"
        }
    }

    #[tokio::test]
    async fn reply_arriving_after_a_reset_is_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(GatedClient::default());
        let control = ControlSurface::new(
            client.clone(),
            Duration::from_secs(2),
            LabelFile::new(dir.path().join("label.txt")),
            "base prompt",
            Arc::new(FrameBuffer::new()),
        );

        let (sent, ()) = tokio::join!(control.send_message("hola"), async {
            tokio::task::yield_now().await;
            control.reset_conversation();
            client.gate.notify_one();
        });

        assert!(sent.unwrap().is_empty());
        assert!(control.conversation().messages.is_empty());
        assert!(control.detection().detecting);
        assert_eq!(read_labels(&dir.path().join("label.txt")).unwrap(), vec!["cup"]);

        client.gate.notify_one();
        let messages = control.send_message("otra vez").await.unwrap();
        assert_eq!(messages, vec!["Tú: otra vez", "Asistente: visto: otra vez"]);
    }

    #[tokio::test]
    async fn label_file_follows_the_latest_reply() {
        let dir = tempfile::tempdir().unwrap();
        let control = surface(Arc::new(CatClient::default()), &dir);
        control.send_message("uno").await.unwrap();
        control.send_message("dos").await.unwrap();

        assert_eq!(control.lock().label_generation, 2);
        assert_eq!(*control.labels.written.lock().unwrap(), 2);
        assert_eq!(read_labels(&dir.path().join("label.txt")).unwrap(), vec!["cat"]);
    }

    #[test]
    fn resumes_detection_from_an_existing_label_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("label.txt"), "dog\nperson\n").unwrap();
        let control = surface(Arc::new(CatClient::default()), &dir);

        let detection = control.detection();
        assert!(detection.detecting);
        assert_eq!(detection.target_classes.len(), 2);
        assert!(!control.camera_active());
    }
}
