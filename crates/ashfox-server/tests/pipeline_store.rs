// crates/ashfox-server/tests/pipeline_store.rs
// Persistence and concurrency integration tests for the pipeline store,
// including the sqlite backend and multi-writer scenarios.

use ashfox::metrics::MetricsRegistry;
use ashfox::store::PipelineStore;
use ashfox::store::repo::{MemoryRepository, ProjectRepository, SqliteRepository};
use ashfox_types::{JobKind, JobStatus};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

fn store_over(repo: Arc<dyn ProjectRepository>) -> PipelineStore {
    PipelineStore::new(repo, Arc::new(MetricsRegistry::new()))
}

#[tokio::test]
async fn concurrent_claims_never_hand_out_the_same_job() {
    let repo: Arc<dyn ProjectRepository> =
        Arc::new(SqliteRepository::open_in_memory().await.expect("open"));
    let store = Arc::new(store_over(repo));

    let workspace = store.create_workspace("studio").await.expect("workspace");
    let project = store
        .create_project(&workspace.id, "fox", None)
        .await
        .expect("project");

    let mut submitted = Vec::new();
    for i in 0..3 {
        let job = store
            .submit_job(&project.project_id, JobKind::GltfConvert, json!({ "n": i }))
            .await
            .expect("submit");
        submitted.push(job.id);
    }

    // Two workers race; their claims are distinct jobs from the queue.
    let (a, b) = tokio::join!(
        {
            let store = store.clone();
            async move { store.claim_next_job("worker-a", None).await }
        },
        {
            let store = store.clone();
            async move { store.claim_next_job("worker-b", None).await }
        },
    );
    let a = a.expect("claim a").expect("job a");
    let b = b.expect("claim b").expect("job b");
    assert_ne!(a.id, b.id);
    let claimed: HashSet<&String> = [&a.id, &b.id].into_iter().collect();
    assert!(claimed.iter().all(|id| submitted.contains(id)));
    assert_eq!(a.worker_id.as_deref(), Some("worker-a"));
    assert_eq!(b.worker_id.as_deref(), Some("worker-b"));

    // The third claim gets the one job the racers left behind.
    let c = store
        .claim_next_job("worker-c", None)
        .await
        .expect("claim c")
        .expect("job c");
    assert!(!claimed.contains(&c.id));
    assert!(submitted.contains(&c.id));
    assert!(
        store
            .claim_next_job("worker-d", None)
            .await
            .expect("claim d")
            .is_none()
    );
}

#[tokio::test]
async fn two_gateways_converge_on_shared_sqlite() {
    let repo: Arc<dyn ProjectRepository> =
        Arc::new(SqliteRepository::open_in_memory().await.expect("open"));
    let gateway_a = store_over(repo.clone());
    let gateway_b = store_over(repo.clone());

    // Simultaneous mutations from two processes' stores: the loser's
    // retry re-reads the winner's state and reapplies.
    let (a, b) = tokio::join!(
        gateway_a.create_workspace("alpha"),
        gateway_b.create_workspace("beta"),
    );
    a.expect("alpha");
    b.expect("beta");

    // Both observers converge on both workspaces.
    for store in [&gateway_a, &gateway_b] {
        let names: HashSet<String> = store
            .list_workspaces()
            .await
            .expect("list")
            .into_iter()
            .map(|w| w.name)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains("alpha"));
        assert!(names.contains("beta"));
    }
}

#[tokio::test]
async fn state_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("pipeline.db");

    let project_id = {
        let repo: Arc<dyn ProjectRepository> =
            Arc::new(SqliteRepository::open(&path).await.expect("open"));
        let store = store_over(repo);
        let workspace = store.create_workspace("studio").await.expect("workspace");
        let project = store
            .create_project(&workspace.id, "fox", None)
            .await
            .expect("project");
        let job = store
            .submit_job(&project.project_id, JobKind::TexturePreflight, json!({}))
            .await
            .expect("submit");
        store.claim_next_job("w1", None).await.expect("claim");
        store
            .complete_job(&job.id, json!({"status": "ok"}))
            .await
            .expect("complete");
        project.project_id
    };

    let repo: Arc<dyn ProjectRepository> =
        Arc::new(SqliteRepository::open(&path).await.expect("reopen"));
    let store = store_over(repo);

    let project = store.get_project(&project_id).await.expect("project");
    assert_eq!(project.name, "fox");
    assert_eq!(project.active_job_status, Some(JobStatus::Completed));

    // The event log and its ordering survived too.
    let events = store
        .get_project_events_since(&project_id, 0)
        .await
        .expect("events");
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=seqs.len() as u64).collect::<Vec<_>>());

    let state = store.read_state().await.expect("state");
    assert_eq!(state.counters.jobs_submitted, 1);
    assert_eq!(state.counters.jobs_completed, 1);
}

#[tokio::test]
async fn event_sequences_stay_contiguous_under_interleaving() {
    let repo: Arc<dyn ProjectRepository> = Arc::new(MemoryRepository::new());
    let store = Arc::new(store_over(repo));
    let workspace = store.create_workspace("studio").await.expect("workspace");
    let p1 = store
        .create_project(&workspace.id, "fox", None)
        .await
        .expect("p1");
    let p2 = store
        .create_project(&workspace.id, "owl", None)
        .await
        .expect("p2");

    // Interleave activity across two projects from two tasks.
    let submit = |store: Arc<PipelineStore>, project: String| async move {
        for _ in 0..3 {
            let job = store
                .submit_job(&project, JobKind::GltfConvert, json!({}))
                .await
                .expect("submit");
            store.claim_next_job("w", None).await.expect("claim");
            store.fail_job(&job.id, "no host").await.expect("fail");
        }
    };
    tokio::join!(
        submit(store.clone(), p1.project_id.clone()),
        submit(store.clone(), p2.project_id.clone()),
    );

    for project in [&p1.project_id, &p2.project_id] {
        let events = store
            .get_project_events_since(project, 0)
            .await
            .expect("events");
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        let expected: Vec<u64> = (1..=seqs.len() as u64).collect();
        assert_eq!(seqs, expected, "project {project} has gaps");
        assert!(events.iter().all(|e| &e.project_id == project));
    }
}

#[tokio::test]
async fn claim_is_first_in_first_out_across_backends() {
    for repo in [
        Arc::new(MemoryRepository::new()) as Arc<dyn ProjectRepository>,
        Arc::new(SqliteRepository::open_in_memory().await.expect("open")),
    ] {
        let store = store_over(repo);
        let workspace = store.create_workspace("studio").await.expect("workspace");
        let project = store
            .create_project(&workspace.id, "fox", None)
            .await
            .expect("project");
        let first = store
            .submit_job(&project.project_id, JobKind::GltfConvert, json!({"n": 1}))
            .await
            .expect("submit");
        let second = store
            .submit_job(&project.project_id, JobKind::GltfConvert, json!({"n": 2}))
            .await
            .expect("submit");

        let a = store.claim_next_job("w", None).await.expect("claim").expect("job");
        let b = store.claim_next_job("w", None).await.expect("claim").expect("job");
        assert_eq!((a.id, b.id), (first.id, second.id));
    }
}
