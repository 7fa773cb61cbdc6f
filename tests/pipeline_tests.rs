mod support;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use grademate::{
    Dispatcher, Pipeline, PipelineState, SkipReason,
    embedding::Embedder,
    error::{PipelineError, StoreError},
    plagiarism::DEFAULT_PLAGIARISM_THRESHOLD,
    store::{JsonFileStore, MemoryStore, SubmissionStore},
    submission::{Assignment, Submission, SubmissionStatus},
};
use support::{
    CountingLoader, HashEncoder, embedder_with_loader, extractor_reading, write_pdf, write_png,
};
use uuid::Uuid;

const REFERENCE: &str = "Photosynthesis converts light energy into chemical energy";
const ANSWER: &str = "Photosynthesis converts light energy from the sun into chemical energy \
                      stored in glucose inside the chloroplasts of green plant cells";
const NEAR_COPY: &str = "Photosynthesis converts light energy from the sun into chemical energy \
                         stored in glucose inside the chloroplasts of green leaf cells";

/// Wraps a [`MemoryStore`], tracking concurrent loads and optionally failing
/// the peer query.
#[derive(Default)]
struct ObservedStore {
    inner:      MemoryStore,
    fail_peers: bool,
    load_delay: Duration,
    in_flight:  AtomicUsize,
    peak:       AtomicUsize,
}

impl ObservedStore {
    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubmissionStore for ObservedStore {
    async fn load_submission(&self, id: Uuid) -> Result<Submission, StoreError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.load_delay).await;
        let outcome = self.inner.load_submission(id).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn load_assignment(&self, id: Uuid) -> Result<Assignment, StoreError> {
        self.inner.load_assignment(id).await
    }

    async fn peer_answers(
        &self,
        assignment_id: Uuid,
        exclude: Uuid,
    ) -> Result<Vec<String>, StoreError> {
        if self.fail_peers {
            return Err(anyhow::anyhow!("connection reset by peer").into());
        }
        self.inner.peer_answers(assignment_id, exclude).await
    }

    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        self.inner.save_submission(submission).await
    }
}

fn pipeline_over(store: Arc<ObservedStore>) -> Pipeline {
    Pipeline::new(
        store,
        extractor_reading("unused"),
        Arc::new(Embedder::with_encoder(Arc::new(HashEncoder::new()))),
        DEFAULT_PLAGIARISM_THRESHOLD,
    )
}

struct Harness {
    store:    Arc<MemoryStore>,
    pipeline: Pipeline,
    encoder:  Arc<HashEncoder>,
}

fn harness(ocr_line: &str) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let encoder = Arc::new(HashEncoder::new());
    let embedder = Arc::new(Embedder::with_encoder(encoder.clone()));
    let pipeline = Pipeline::new(
        store.clone(),
        extractor_reading(ocr_line),
        embedder,
        DEFAULT_PLAGIARISM_THRESHOLD,
    );
    Harness {
        store,
        pipeline,
        encoder,
    }
}

fn assignment_with_reference(reference: &str) -> Assignment {
    Assignment::builder()
        .max_score(100.0)
        .reference_text(reference.to_string())
        .build()
}

#[tokio::test]
async fn identical_answer_is_graded_full_marks() {
    let h = harness("unused");
    let assignment = assignment_with_reference(REFERENCE);
    let submission = Submission::builder()
        .assignment_id(assignment.id)
        .submitter("ada")
        .answer_text(REFERENCE)
        .build();
    let id = submission.id;
    h.store.insert_assignment(assignment).await;
    h.store.insert_submission(submission).await;

    let report = h.pipeline.run(id).await.expect("run");

    assert_eq!(
        report.states,
        vec![
            PipelineState::Uploaded,
            PipelineState::TextReady,
            PipelineState::Graded,
            PipelineState::PlagiarismChecked,
            PipelineState::Persisted,
        ]
    );
    let stored = h.store.submission(id).await.expect("stored");
    assert_eq!(stored, report.submission);
    assert_eq!(stored.score, 100.0);
    assert!(stored.graded);
    assert!(!stored.plagiarized);
    assert!(stored.evaluated_at.is_some());
    assert_eq!(stored.status, SubmissionStatus::Graded);
    assert!(stored.feedback.starts_with("Excellent work!"));
    assert_eq!(h.store.save_count().await, 1);
}

#[tokio::test]
async fn score_is_scaled_to_the_assignment_maximum() {
    let h = harness("unused");
    let assignment = Assignment::builder()
        .max_score(25.0)
        .reference_text(REFERENCE.to_string())
        .build();
    let submission = Submission::builder()
        .assignment_id(assignment.id)
        .submitter("ada")
        .answer_text("Photosynthesis turns light into chemical energy in plants")
        .build();
    let id = submission.id;
    h.store.insert_assignment(assignment).await;
    h.store.insert_submission(submission).await;

    let report = h.pipeline.run(id).await.expect("run");

    // 7.1 out of 10
    assert_eq!(report.submission.score, 17.75);
    assert!(report.submission.feedback.starts_with("Good answer!"));
}

#[tokio::test]
async fn empty_answer_is_not_graded_and_never_embedded() {
    let h = harness("unused");
    let assignment = assignment_with_reference(REFERENCE);
    let submission = Submission::builder()
        .assignment_id(assignment.id)
        .submitter("ada")
        .build();
    let id = submission.id;
    h.store.insert_assignment(assignment).await;
    h.store.insert_submission(submission).await;

    let report = h.pipeline.run(id).await.expect("run");

    assert_eq!(report.skip_reason(), Some(SkipReason::NoAnswerText));
    assert_eq!(report.final_state(), Some(PipelineState::Persisted));
    assert_eq!(report.submission.score, 0.0);
    assert!(!report.submission.graded);
    assert!(!report.submission.plagiarized);
    assert!(matches!(
        report.submission.status,
        SubmissionStatus::NotGraded { .. }
    ));
    assert_eq!(h.encoder.calls(), 0);
}

#[tokio::test]
async fn missing_key_skips_grading_but_still_screens() {
    let h = harness("unused");
    let assignment = Assignment::builder().build();
    let first = Submission::builder()
        .assignment_id(assignment.id)
        .submitter("ada")
        .answer_text(ANSWER)
        .build();
    let second = Submission::builder()
        .assignment_id(assignment.id)
        .submitter("grace")
        .answer_text(NEAR_COPY)
        .build();
    let id = second.id;
    h.store.insert_assignment(assignment).await;
    h.store.insert_submission(first).await;
    h.store.insert_submission(second).await;

    let report = h.pipeline.run(id).await.expect("run");

    assert_eq!(report.skip_reason(), Some(SkipReason::NoKey));
    assert!(report.rejected());
    assert!(report.submission.plagiarized);
}

#[tokio::test]
async fn near_identical_second_submission_is_rejected() {
    let h = harness("unused");
    let assignment = assignment_with_reference(REFERENCE);
    let first = Submission::builder()
        .assignment_id(assignment.id)
        .submitter("ada")
        .answer_text(ANSWER)
        .build();
    let first_id = first.id;
    h.store.insert_assignment(assignment.clone()).await;
    h.store.insert_submission(first).await;

    let first_report = h.pipeline.run(first_id).await.expect("first run");
    assert!(!first_report.rejected());
    assert!(first_report.submission.graded);

    let second = Submission::builder()
        .assignment_id(assignment.id)
        .submitter("grace")
        .answer_text(NEAR_COPY)
        .build();
    let second_id = second.id;
    h.store.insert_submission(second).await;

    let report = h.pipeline.run(second_id).await.expect("second run");

    assert_eq!(
        report.states,
        vec![
            PipelineState::Uploaded,
            PipelineState::TextReady,
            PipelineState::Graded,
            PipelineState::RejectedAsPlagiarized,
            PipelineState::Persisted,
        ]
    );
    let peer = report.peer_match.expect("peer match");
    assert!(peer.similarity > DEFAULT_PLAGIARISM_THRESHOLD);

    let stored = h.store.submission(second_id).await.expect("stored");
    assert!(stored.plagiarized);
    assert!(!stored.graded);
    assert_eq!(stored.score, 0.0);
    assert!(stored.feedback.is_empty());
    assert!(stored.evaluated_at.is_none());
    assert_eq!(stored.status, SubmissionStatus::RejectedAsPlagiarized);

    // The first submission is untouched by the second run.
    let first_stored = h.store.submission(first_id).await.expect("first stored");
    assert!(first_stored.graded);
    assert!(!first_stored.plagiarized);
}

#[tokio::test]
async fn answer_text_is_extracted_from_an_uploaded_image() {
    let dir = tempfile::tempdir().unwrap();
    let scan = dir.path().join("answer.png");
    write_png(&scan);

    let h = harness(REFERENCE);
    let assignment = assignment_with_reference(REFERENCE);
    let submission = Submission::builder()
        .assignment_id(assignment.id)
        .submitter("ada")
        .file(scan)
        .build();
    let id = submission.id;
    h.store.insert_assignment(assignment).await;
    h.store.insert_submission(submission).await;

    let report = h.pipeline.run(id).await.expect("run");

    assert_eq!(report.submission.answer_text, REFERENCE);
    assert_eq!(report.submission.score, 100.0);
    assert!(report.submission.graded);
}

#[tokio::test]
async fn failed_extraction_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness("unused");
    let assignment = assignment_with_reference(REFERENCE);
    let submission = Submission::builder()
        .assignment_id(assignment.id)
        .submitter("ada")
        .file(dir.path().join("vanished.pdf"))
        .build();
    let id = submission.id;
    h.store.insert_assignment(assignment).await;
    h.store.insert_submission(submission).await;

    let report = h.pipeline.run(id).await.expect("run still completes");

    assert_eq!(report.skip_reason(), Some(SkipReason::NoAnswerText));
    assert_eq!(report.final_state(), Some(PipelineState::Persisted));
    assert_eq!(h.store.save_count().await, 1);
}

#[tokio::test]
async fn reference_is_read_from_the_key_file() {
    let dir = tempfile::tempdir().unwrap();
    let key = dir.path().join("key.pdf");
    write_pdf(&key, &[REFERENCE]);

    let h = harness("unused");
    let assignment = Assignment::builder().max_score(10.0).key_file(key).build();
    let submission = Submission::builder()
        .assignment_id(assignment.id)
        .submitter("ada")
        .answer_text(REFERENCE)
        .build();
    let id = submission.id;
    h.store.insert_assignment(assignment).await;
    h.store.insert_submission(submission).await;

    let report = h.pipeline.run(id).await.expect("run");

    assert!(report.submission.graded);
    assert_eq!(report.submission.score, 10.0);
}

#[tokio::test]
async fn unreadable_key_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let key = dir.path().join("key.pdf");
    std::fs::write(&key, b"garbage").unwrap();

    let h = harness("unused");
    let assignment = Assignment::builder().key_file(key).build();
    let submission = Submission::builder()
        .assignment_id(assignment.id)
        .submitter("ada")
        .answer_text(ANSWER)
        .build();
    let id = submission.id;
    h.store.insert_assignment(assignment).await;
    h.store.insert_submission(submission).await;

    let report = h.pipeline.run(id).await.expect("run");

    assert_eq!(report.skip_reason(), Some(SkipReason::KeyUnreadable));
    assert_eq!(
        report.submission.status,
        SubmissionStatus::NotGraded {
            reason: SkipReason::KeyUnreadable.to_string(),
        }
    );
}

#[tokio::test]
async fn unavailable_model_degrades_instead_of_aborting() {
    let store = Arc::new(MemoryStore::new());
    let loader = Arc::new(CountingLoader::failing(usize::MAX, true));
    let embedder = Arc::new(embedder_with_loader(loader, 1, Duration::from_secs(1)));
    let pipeline = Pipeline::new(
        store.clone(),
        extractor_reading("unused"),
        embedder,
        DEFAULT_PLAGIARISM_THRESHOLD,
    );

    let assignment = assignment_with_reference(REFERENCE);
    let peer = Submission::builder()
        .assignment_id(assignment.id)
        .submitter("ada")
        .answer_text(ANSWER)
        .build();
    let submission = Submission::builder()
        .assignment_id(assignment.id)
        .submitter("grace")
        .answer_text(ANSWER)
        .build();
    let id = submission.id;
    store.insert_assignment(assignment).await;
    store.insert_submission(peer).await;
    store.insert_submission(submission).await;

    let report = pipeline.run(id).await.expect("run");

    assert_eq!(report.skip_reason(), Some(SkipReason::ModelUnavailable));
    assert!(!report.rejected());
    assert_eq!(report.final_state(), Some(PipelineState::Persisted));
    assert!(store.submission(id).await.is_some());
}

#[tokio::test]
async fn missing_submission_aborts_the_run() {
    let h = harness("unused");
    let id = Uuid::new_v4();

    match h.pipeline.run(id).await {
        Err(PipelineError::Load {
            id: reported,
            source: StoreError::SubmissionNotFound(missing),
        }) => {
            assert_eq!(reported, id);
            assert_eq!(missing, id);
        }
        other => panic!("expected a load error, got {other:?}"),
    }
    assert_eq!(h.store.save_count().await, 0);
}

#[tokio::test]
async fn rerunning_gives_the_same_result() {
    let h = harness("unused");
    let assignment = assignment_with_reference(REFERENCE);
    let submission = Submission::builder()
        .assignment_id(assignment.id)
        .submitter("ada")
        .answer_text(ANSWER)
        .build();
    let id = submission.id;
    h.store.insert_assignment(assignment).await;
    h.store.insert_submission(submission).await;

    let first = h.pipeline.run(id).await.expect("first");
    let second = h.pipeline.run(id).await.expect("second");

    assert_eq!(first.states, second.states);
    assert_eq!(first.submission.score, second.submission.score);
    assert_eq!(first.submission.feedback, second.submission.feedback);
    assert_eq!(first.submission.status, second.submission.status);
}

#[tokio::test]
async fn failed_peer_query_clears_an_earlier_rejection() {
    let store = Arc::new(ObservedStore {
        fail_peers: true,
        ..Default::default()
    });
    let assignment = assignment_with_reference(REFERENCE);
    let submission = Submission::builder()
        .assignment_id(assignment.id)
        .submitter("ada")
        .answer_text(REFERENCE)
        .plagiarized(true)
        .status(SubmissionStatus::RejectedAsPlagiarized)
        .build();
    let id = submission.id;
    store.inner.insert_assignment(assignment).await;
    store.inner.insert_submission(submission).await;

    let report = pipeline_over(store.clone()).run(id).await.expect("run");

    assert!(!report.rejected());
    assert_eq!(report.final_state(), Some(PipelineState::Persisted));
    let stored = store.inner.submission(id).await.expect("stored");
    assert!(stored.graded);
    assert!(!stored.plagiarized);
    assert_eq!(stored.score, 100.0);
    assert_eq!(stored.status, SubmissionStatus::Graded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dispatcher_never_exceeds_its_workers() {
    let store = Arc::new(ObservedStore {
        load_delay: Duration::from_millis(25),
        ..Default::default()
    });
    let assignment = assignment_with_reference(REFERENCE);
    let mut ids = Vec::new();
    for i in 0..6 {
        let submission = Submission::builder()
            .assignment_id(assignment.id)
            .submitter(format!("student-{i}"))
            .build();
        ids.push(submission.id);
        store.inner.insert_submission(submission).await;
    }
    store.inner.insert_assignment(assignment).await;

    let outcomes = Dispatcher::new(Arc::new(pipeline_over(store.clone())), 2)
        .run_all(ids)
        .await;

    assert_eq!(outcomes.len(), 6);
    assert!(outcomes.iter().all(|(_, outcome)| outcome.is_ok()));
    assert_eq!(store.peak(), 2);
    assert_eq!(store.inner.save_count().await, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dispatcher_isolates_failures_and_keeps_order() {
    let h = harness("unused");
    let assignment = assignment_with_reference(REFERENCE);
    let answers = [
        REFERENCE,
        "Plants use sunlight to make sugar",
        "Photosynthesis turns light into chemical energy in plants",
    ];

    let mut ids = Vec::new();
    for (i, answer) in answers.iter().enumerate() {
        let submission = Submission::builder()
            .assignment_id(assignment.id)
            .submitter(format!("student-{i}"))
            .answer_text(answer.to_string())
            .build();
        ids.push(submission.id);
        h.store.insert_submission(submission).await;
    }
    let missing = Uuid::new_v4();
    ids.insert(1, missing);
    h.store.insert_assignment(assignment).await;

    let outcomes = Dispatcher::new(Arc::new(h.pipeline), 2)
        .run_all(ids.clone())
        .await;

    let returned: Vec<Uuid> = outcomes.iter().map(|(id, _)| *id).collect();
    assert_eq!(returned, ids);
    for (id, outcome) in &outcomes {
        if *id == missing {
            assert!(matches!(outcome, Err(PipelineError::Load { .. })));
        } else {
            assert!(outcome.is_ok(), "{id}: {outcome:?}");
        }
    }
    assert_eq!(h.store.save_count().await, 3);
}

#[tokio::test]
async fn json_store_persists_the_whole_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let assignment = assignment_with_reference(REFERENCE);
    let submission = Submission::builder()
        .assignment_id(assignment.id)
        .submitter("ada")
        .answer_text(REFERENCE)
        .build();
    let id = submission.id;
    let seed = serde_json::json!({
        "assignments": [assignment],
        "submissions": [submission],
    });
    std::fs::write(&path, serde_json::to_string_pretty(&seed).unwrap()).unwrap();

    let store = Arc::new(JsonFileStore::open(&path).await.expect("open"));
    let pipeline = Pipeline::new(
        store,
        extractor_reading("unused"),
        Arc::new(Embedder::with_encoder(Arc::new(HashEncoder::new()))),
        DEFAULT_PLAGIARISM_THRESHOLD,
    );
    pipeline.run(id).await.expect("run");

    let reopened = JsonFileStore::open(&path).await.expect("reopen");
    let stored = reopened.load_submission(id).await.expect("stored");
    assert!(stored.graded);
    assert_eq!(stored.score, 100.0);
    assert_eq!(reopened.snapshot().await.submissions.len(), 1);

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.path() != path)
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}
