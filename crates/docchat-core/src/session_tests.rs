use super::*;

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{self, Instant};

use crate::models::{
    ConversationDetail, DirectorySnapshot, DocumentRecord, JobStatus, JobTicket, MessageOrigin,
    ProcessingJob,
};
use crate::test_support::{
    Call, ScriptedBackend, assistant, conversation, directory, document, job, message, ticket,
    transient, user,
};

fn session_with(backend: &Arc<ScriptedBackend>, config: &Config) -> ChatSession {
    let backend: Arc<dyn Backend> = backend.clone();
    ChatSession::new(backend, "c1", config)
}

async fn loaded(backend: &Arc<ScriptedBackend>, config: &Config, messages: Vec<Message>) -> ChatSession {
    backend.push_conversation(Ok(conversation("c1", messages)));
    let session = session_with(backend, config);
    session.load().await.expect("load");
    session
}

fn body(session: &ChatSession, index: usize) -> Option<String> {
    session.store().message(index).map(|m| m.body)
}

fn status_calls(backend: &ScriptedBackend) -> usize {
    backend.count(|c| matches!(c, Call::Status(_)))
}

mod reply {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn reply_is_fetched_and_revealed() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = loaded(&backend, &Config::default(), vec![]).await;

        backend.push_send(Ok(ticket("j1")));
        backend.push_status(Ok(job("j1", JobStatus::Processing)));
        backend.push_status(Ok(job("j1", JobStatus::Processed)));
        backend.push_conversation(Ok(conversation(
            "c1",
            vec![user("u1", "Hello"), assistant("a1", "Hi there")],
        )));

        let start = Instant::now();
        assert_eq!(session.send_message("Hello").await.expect("send"), "j1");

        let optimistic = session.store().last_message().expect("optimistic");
        assert!(optimistic.is_optimistic());
        assert_eq!(optimistic.origin, MessageOrigin::user());
        assert_eq!(
            session.store().status().message,
            MessagePhase::AwaitingProcessing {
                job_id: "j1".to_string()
            }
        );

        time::sleep(Duration::from_millis(10_030)).await;
        assert_eq!(session.store().status().message, MessagePhase::Revealing);
        assert_eq!(body(&session, 1).as_deref(), Some("Hi "));

        session.wait_for_reply().await.expect("reply");
        assert_eq!(start.elapsed(), Duration::from_millis(10_060));
        assert_eq!(session.store().len(), 2);
        assert_eq!(body(&session, 1).as_deref(), Some("Hi there"));
        assert_eq!(session.store().status().message, MessagePhase::Idle);
        assert!(!session.store().is_revealing());
        assert_eq!(session.store().status().notice, None);

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(status_calls(&backend), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_poll_error_still_reconciles() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = loaded(&backend, &Config::default(), vec![]).await;

        backend.push_send(Ok(ticket("j1")));
        backend.push_status(Err(transient()));
        backend.push_status(Ok(job("j1", JobStatus::Processed)));
        backend.push_conversation(Ok(conversation(
            "c1",
            vec![user("u1", "Hello"), assistant("a1", "Hi there")],
        )));

        session.send_message("Hello").await.expect("send");
        session.wait_for_reply().await.expect("reply");

        assert_eq!(body(&session, 1).as_deref(), Some("Hi there"));
        assert_eq!(session.store().status().notice, None);
        assert_eq!(status_calls(&backend), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn processed_without_new_assistant_message_goes_idle() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = loaded(&backend, &Config::default(), vec![]).await;

        backend.push_send(Ok(ticket("j1")));
        backend.push_status(Ok(job("j1", JobStatus::Processed)));
        backend.push_conversation(Ok(conversation("c1", vec![user("u1", "Hello")])));

        session.send_message("Hello").await.expect("send");
        session.wait_for_reply().await.expect("reply");

        assert_eq!(session.store().len(), 1);
        assert!(!session.store().is_revealing());
        assert_eq!(session.store().status().message, MessagePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn capped_poll_times_out_and_fetches_anyway() {
        let backend = Arc::new(ScriptedBackend::default());
        let mut config = Config::default();
        config.polling.max_attempts = Some(2);
        let session = loaded(&backend, &config, vec![]).await;

        backend.push_send(Ok(ticket("j1")));
        backend.push_status(Ok(job("j1", JobStatus::Pending)));
        backend.push_status(Ok(job("j1", JobStatus::Processing)));
        backend.push_conversation(Ok(conversation("c1", vec![user("u1", "Hello")])));

        session.send_message("Hello").await.expect("send");
        session.wait_for_reply().await.expect("reply");

        assert_eq!(session.store().status().notice, Some(Notice::ReplyTimedOut));
        assert_eq!(session.store().status().message, MessagePhase::Idle);
        assert_eq!(status_calls(&backend), 2);
        assert_eq!(backend.count(|c| matches!(c, Call::Conversation(_))), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_after_processing_sets_notice() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = loaded(&backend, &Config::default(), vec![]).await;

        backend.push_send(Ok(ticket("j1")));
        backend.push_status(Ok(job("j1", JobStatus::Processed)));
        backend.push_conversation(Err(transient()));

        session.send_message("Hello").await.expect("send");
        let err = session.wait_for_reply().await.expect_err("fetch fails");

        assert!(matches!(err, Error::Api { status: 503, .. }));
        assert_eq!(session.store().status().notice, Some(Notice::LoadFailed));
        assert_eq!(session.store().status().message, MessagePhase::Idle);
        assert_eq!(session.store().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_without_pending_reply_returns() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = loaded(&backend, &Config::default(), vec![]).await;
        session.wait_for_reply().await.expect("nothing to wait for");
    }
}

mod send {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn empty_message_is_rejected_locally() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = loaded(&backend, &Config::default(), vec![]).await;

        let err = session.send_message("   \n").await.expect_err("empty");

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(session.store().status().notice, Some(Notice::EmptyMessage));
        assert_eq!(session.store().status().message, MessagePhase::Idle);
        assert!(session.store().is_empty());
        assert_eq!(backend.count(|c| matches!(c, Call::Send(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn message_text_is_trimmed() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = loaded(&backend, &Config::default(), vec![]).await;
        backend.push_send(Ok(ticket("j1")));

        session.send_message("  Hello  ").await.expect("send");

        assert!(backend.calls().contains(&Call::Send("Hello".to_string())));
        assert_eq!(body(&session, 0).as_deref(), Some("Hello"));
        session.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn second_send_while_sending_is_busy() {
        let backend = Arc::new(ScriptedBackend::default());
        let gate = backend.hold_sends();
        backend.push_send(Ok(ticket("j1")));
        let session = Arc::new(loaded(&backend, &Config::default(), vec![]).await);

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.send_message("one").await })
        };
        while backend.count(|c| matches!(c, Call::Send(_))) == 0 {
            tokio::task::yield_now().await;
        }

        let err = session.send_message("two").await.expect_err("busy");
        assert!(matches!(err, Error::Busy(_)));
        assert_eq!(session.store().len(), 1);

        gate.add_permits(1);
        assert_eq!(first.await.expect("join").expect("send"), "j1");
        assert_eq!(backend.count(|c| matches!(c, Call::Send(_))), 1);
        session.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_rolls_back_optimistic_message() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = loaded(
            &backend,
            &Config::default(),
            vec![user("u0", "earlier"), assistant("a0", "answer")],
        )
        .await;
        backend.push_send(Err(transient()));

        let err = session.send_message("Hello").await.expect_err("send fails");

        assert!(matches!(err, Error::Api { status: 503, .. }));
        assert_eq!(session.store().len(), 2);
        assert_eq!(session.store().status().notice, Some(Notice::SendFailed));
        assert_eq!(session.store().status().message, MessagePhase::Idle);

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(status_calls(&backend), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn new_send_fast_forwards_running_reveal() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = loaded(&backend, &Config::default(), vec![]).await;
        let answer = "a fairly long answer that takes a while";

        backend.push_send(Ok(ticket("j1")));
        backend.push_status(Ok(job("j1", JobStatus::Processed)));
        backend.push_conversation(Ok(conversation(
            "c1",
            vec![user("u1", "first"), assistant("a1", answer)],
        )));
        session.send_message("first").await.expect("send");

        time::sleep(Duration::from_millis(5_030)).await;
        assert!(session.store().is_revealing());
        assert_eq!(body(&session, 1).as_deref(), Some("a f"));

        backend.push_send(Ok(ticket("j2")));
        session.send_message("second").await.expect("send");

        assert_eq!(body(&session, 1).as_deref(), Some(answer));
        assert!(!session.store().is_revealing());
        assert_eq!(session.store().len(), 3);
        assert_eq!(
            session.store().status().message,
            MessagePhase::AwaitingProcessing {
                job_id: "j2".to_string()
            }
        );

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(body(&session, 1).as_deref(), Some(answer));
        session.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn new_send_replaces_pending_reply_pipeline() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = loaded(&backend, &Config::default(), vec![]).await;

        backend.push_send(Ok(ticket("j1")));
        session.send_message("a").await.expect("send");
        time::sleep(Duration::from_secs(2)).await;

        backend.push_send(Ok(ticket("j2")));
        backend.push_status(Ok(job("j2", JobStatus::Processed)));
        backend.push_conversation(Ok(conversation(
            "c1",
            vec![user("u1", "a"), user("u2", "b"), assistant("a1", "ok")],
        )));
        let start = Instant::now();
        session.send_message("b").await.expect("send");
        session.wait_for_reply().await.expect("reply");

        assert_eq!(start.elapsed(), Duration::from_millis(5_020));
        assert_eq!(backend.count(|c| *c == Call::Status("j1".to_string())), 0);
        assert_eq!(backend.count(|c| *c == Call::Status("j2".to_string())), 1);
        assert_eq!(body(&session, 2).as_deref(), Some("ok"));
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn load_failure_sets_notice() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_conversation(Err(transient()));
        let session = session_with(&backend, &Config::default());

        assert!(session.load().await.is_err());
        let status = session.store().status();
        assert_eq!(status.notice, Some(Notice::LoadFailed));
        assert!(!status.loading);
    }

    #[tokio::test(start_paused = true)]
    async fn load_replaces_transcript_and_header() {
        let backend = Arc::new(ScriptedBackend::default());
        let mut detail = conversation("c1", vec![user("u1", "hi"), assistant("a1", "hello")]);
        detail.knowledge_base_id = Some("kb-1".to_string());
        backend.push_conversation(Ok(detail));
        let session = session_with(&backend, &Config::default());

        session.load().await.expect("load");

        assert_eq!(session.store().len(), 2);
        assert_eq!(session.store().knowledge_base_id().as_deref(), Some("kb-1"));
        assert_eq!(session.store().header().name, "Chat");
        assert!(session.store().header().messages.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_stops_polling_and_rejects_commands() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = loaded(&backend, &Config::default(), vec![]).await;
        backend.push_send(Ok(ticket("j1")));
        for _ in 0..10 {
            backend.push_status(Ok(job("j1", JobStatus::Processing)));
        }

        session.send_message("Hello").await.expect("send");
        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(status_calls(&backend), 1);

        session.dispose();
        session.wait_for_reply().await.expect("nothing left");
        assert!(session.is_disposed());
        assert_eq!(session.store().status().message, MessagePhase::Idle);

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(status_calls(&backend), 1);

        assert!(matches!(session.send_message("again").await, Err(Error::Cancelled)));
        assert!(matches!(session.load().await, Err(Error::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_during_reveal_keeps_partial_text() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = loaded(&backend, &Config::default(), vec![]).await;
        backend.push_send(Ok(ticket("j1")));
        backend.push_status(Ok(job("j1", JobStatus::Processed)));
        backend.push_conversation(Ok(conversation(
            "c1",
            vec![user("u1", "Hello"), assistant("a1", "abcdefghij")],
        )));

        session.send_message("Hello").await.expect("send");
        time::sleep(Duration::from_millis(5_030)).await;
        assert!(session.store().is_revealing());
        assert_eq!(body(&session, 1).as_deref(), Some("abc"));

        session.dispose();
        time::sleep(Duration::from_secs(1)).await;

        assert_eq!(body(&session, 1).as_deref(), Some("abc"));
        assert!(!session.store().is_revealing());
        assert_eq!(session.store().status().message, MessagePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_session_stops_polling() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = loaded(&backend, &Config::default(), vec![]).await;
        backend.push_send(Ok(ticket("j1")));
        for _ in 0..10 {
            backend.push_status(Ok(job("j1", JobStatus::Processing)));
        }

        session.send_message("Hello").await.expect("send");
        drop(session);

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(status_calls(&backend), 0);
    }

    /// Delegates to a scripted backend but blows up on status queries.
    struct PanicOnStatus(ScriptedBackend);

    #[async_trait]
    impl Backend for PanicOnStatus {
        async fn send_message(&self, request: &SendMessageRequest) -> Result<JobTicket> {
            self.0.send_message(request).await
        }

        async fn job_status(&self, _job_id: &str) -> Result<ProcessingJob> {
            panic!("status endpoint exploded");
        }

        async fn conversation(&self, conversation_id: &str) -> Result<ConversationDetail> {
            self.0.conversation(conversation_id).await
        }

        async fn upload_document(
            &self,
            directory_id: &str,
            file: &UploadFile,
        ) -> Result<DocumentRecord> {
            self.0.upload_document(directory_id, file).await
        }

        async fn attach_document(&self, conversation_id: &str, document_id: &str) -> Result<Message> {
            self.0.attach_document(conversation_id, document_id).await
        }

        async fn directory_tree(&self) -> Result<DirectorySnapshot> {
            self.0.directory_tree().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_pipeline_is_a_scheduler_error() {
        let scripted = ScriptedBackend::default();
        scripted.push_send(Ok(ticket("j1")));
        let backend: Arc<dyn Backend> = Arc::new(PanicOnStatus(scripted));
        let session = ChatSession::new(backend, "c1", &Config::default());

        session.send_message("Hello").await.expect("send");
        let err = session.wait_for_reply().await.expect_err("crash");

        assert!(matches!(err, Error::Scheduler(_)));
        let status = session.store().status();
        assert_eq!(status.notice, Some(Notice::StatusCheckFailed));
        assert_eq!(status.message, MessagePhase::Idle);
    }
}

mod upload {
    use super::*;

    const MIB: usize = 1024 * 1024;

    fn pdf(name: &str, size: usize) -> UploadFile {
        UploadFile::new(name, PDF_MIME, vec![0u8; size])
    }

    fn tree_with(status: &str) -> DirectorySnapshot {
        directory(
            "root",
            vec![document("d1", "doc.pdf", status)],
            vec![],
        )
    }

    fn attached_message() -> Message {
        Message {
            document_name: "doc.pdf".to_string(),
            document_ext: "pdf".to_string(),
            ..message("m9", MessageOrigin::assistant(), "")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn indexed_document_is_attached() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = loaded(&backend, &Config::default(), vec![user("u1", "hi")]).await;

        backend.push_tree(Ok(directory("root", vec![], vec![])));
        backend.push_upload(Ok(document("d1", "doc.pdf", "Processando")));
        backend.push_tree(Ok(tree_with("Processando")));
        backend.push_tree(Ok(tree_with("Finalizado")));
        backend.push_attach(Ok(attached_message()));

        let start = Instant::now();
        let attached = session
            .upload_document(pdf("doc.pdf", 5 * MIB))
            .await
            .expect("upload");

        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert!(attached.is_newly_attached);
        assert_eq!(attached.document(), Some("doc.pdf"));
        assert_eq!(session.store().len(), 2);
        assert_eq!(session.store().last_message(), Some(attached));
        assert_eq!(
            backend.calls()[1..],
            [
                Call::Tree,
                Call::Upload {
                    directory_id: "root".to_string(),
                    file_name: "doc.pdf".to_string(),
                },
                Call::Tree,
                Call::Tree,
                Call::Attach {
                    conversation_id: "c1".to_string(),
                    document_id: "d1".to_string(),
                },
            ]
        );

        let status = session.store().status();
        assert_eq!(
            status.upload.progress_text().as_deref(),
            Some("doc.pdf anexado com sucesso")
        );
        assert_eq!(status.notice, None);

        time::sleep(Duration::from_millis(3_001)).await;
        assert_eq!(session.store().status().upload, UploadPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn non_pdf_is_rejected_without_network() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = session_with(&backend, &Config::default());

        let file = UploadFile::new("notes.txt", "text/plain", b"hello".to_vec());
        let err = session.upload_document(file).await.expect_err("not pdf");

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(session.store().status().notice, Some(Notice::NotPdf));
        assert_eq!(session.store().status().upload, UploadPhase::Idle);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_pdf_is_rejected_without_network() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = session_with(&backend, &Config::default());

        let err = session
            .upload_document(pdf("big.pdf", 10 * MIB + 1))
            .await
            .expect_err("too large");

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(
            session.store().status().notice,
            Some(Notice::TooLarge { max_mb: 10 })
        );
        assert!(backend.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_max_size_is_accepted() {
        let backend = Arc::new(ScriptedBackend::default());
        let mut config = Config::default();
        config.upload.directory_id = Some("dir-7".to_string());
        let session = session_with(&backend, &config);
        backend.push_upload(Err(transient()));

        let _ = session.upload_document(pdf("edge.pdf", 10 * MIB)).await;

        assert_eq!(backend.count(|c| matches!(c, Call::Upload { .. })), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn upload_failure_aborts_remaining_steps() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = session_with(&backend, &Config::default());
        backend.push_tree(Ok(directory("root", vec![], vec![])));
        backend.push_upload(Err(transient()));

        let err = session
            .upload_document(pdf("doc.pdf", 1024))
            .await
            .expect_err("upload fails");

        assert!(matches!(err, Error::Api { status: 503, .. }));
        let status = session.store().status();
        assert_eq!(status.notice, Some(Notice::UploadFailed));
        assert_eq!(
            status.upload,
            UploadPhase::Done {
                file_name: "doc.pdf".to_string(),
                succeeded: false,
            }
        );
        assert_eq!(backend.count(|c| matches!(c, Call::Tree)), 1);
        assert_eq!(backend.count(|c| matches!(c, Call::Attach { .. })), 0);

        time::sleep(Duration::from_millis(3_001)).await;
        assert_eq!(session.store().status().upload, UploadPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn attach_failure_leaves_transcript_unchanged() {
        let backend = Arc::new(ScriptedBackend::default());
        let session = loaded(&backend, &Config::default(), vec![user("u1", "hi")]).await;
        backend.push_tree(Ok(directory("root", vec![], vec![])));
        backend.push_upload(Ok(document("d1", "doc.pdf", "Processando")));
        backend.push_tree(Ok(tree_with("Finalizado")));
        backend.push_attach(Err(transient()));

        assert!(session.upload_document(pdf("doc.pdf", 1024)).await.is_err());

        assert_eq!(session.store().status().notice, Some(Notice::AttachFailed));
        assert_eq!(session.store().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn indexing_timeout_has_its_own_notice() {
        let backend = Arc::new(ScriptedBackend::default());
        let mut config = Config::default();
        config.indexing.max_checks = Some(2);
        config.upload.directory_id = Some("dir-7".to_string());
        let session = session_with(&backend, &config);
        backend.push_upload(Ok(document("d1", "doc.pdf", "Processando")));
        backend.push_tree(Ok(tree_with("Processando")));
        backend.push_tree(Ok(tree_with("Processando")));

        let err = session
            .upload_document(pdf("doc.pdf", 1024))
            .await
            .expect_err("timeout");

        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(session.store().status().notice, Some(Notice::IndexingTimedOut));
        assert_eq!(backend.count(|c| matches!(c, Call::Attach { .. })), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn configured_directory_skips_tree_lookup() {
        let backend = Arc::new(ScriptedBackend::default());
        let mut config = Config::default();
        config.upload.directory_id = Some("dir-7".to_string());
        let session = session_with(&backend, &config);
        backend.push_upload(Ok(document("d1", "doc.pdf", "Processando")));
        backend.push_tree(Ok(tree_with("Finalizado")));
        backend.push_attach(Ok(attached_message()));

        session
            .upload_document(pdf("doc.pdf", 1024))
            .await
            .expect("upload");

        assert_eq!(
            backend.calls().first(),
            Some(&Call::Upload {
                directory_id: "dir-7".to_string(),
                file_name: "doc.pdf".to_string(),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_during_indexing_leaves_upload_idle() {
        let backend = Arc::new(ScriptedBackend::default());
        let mut config = Config::default();
        config.upload.directory_id = Some("dir-7".to_string());
        let session = Arc::new(session_with(&backend, &config));
        backend.push_upload(Ok(document("d1", "doc.pdf", "Processando")));
        for _ in 0..20 {
            backend.push_tree(Ok(tree_with("Processando")));
        }

        let upload = {
            let session = session.clone();
            tokio::spawn(async move { session.upload_document(pdf("doc.pdf", 1024)).await })
        };
        time::sleep(Duration::from_secs(3)).await;
        assert!(matches!(
            session.store().status().upload,
            UploadPhase::AwaitingIndex { .. }
        ));

        session.dispose();
        assert!(matches!(upload.await.expect("join"), Err(Error::Cancelled)));
        assert_eq!(session.store().status().upload, UploadPhase::Idle);

        time::sleep(Duration::from_secs(10)).await;
        let status = session.store().status();
        assert_eq!(status.upload, UploadPhase::Idle);
        assert_eq!(status.notice, None);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_upload_is_busy() {
        let backend = Arc::new(ScriptedBackend::default());
        let mut config = Config::default();
        config.upload.directory_id = Some("dir-7".to_string());
        let session = Arc::new(session_with(&backend, &config));
        backend.push_upload(Ok(document("d1", "doc.pdf", "Processando")));
        for _ in 0..20 {
            backend.push_tree(Ok(tree_with("Processando")));
        }

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.upload_document(pdf("doc.pdf", 1024)).await })
        };
        while !session.store().status().upload.is_active() {
            tokio::task::yield_now().await;
        }

        let err = session
            .upload_document(pdf("other.pdf", 1024))
            .await
            .expect_err("busy");
        assert!(matches!(err, Error::Busy(_)));
        assert_eq!(session.store().status().notice, Some(Notice::UploadBusy));

        time::sleep(Duration::from_secs(5)).await;
        session.dispose();
        assert!(matches!(first.await.expect("join"), Err(Error::Cancelled)));
        assert_eq!(backend.count(|c| matches!(c, Call::Upload { .. })), 1);
    }
}
