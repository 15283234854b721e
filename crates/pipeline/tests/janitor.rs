//! Janitor sweeps: expiry, grace-period purges, result retention.

mod common;

use assert_matches::assert_matches;
use chrono::Duration as ChronoDuration;
use headshot_core::job::JobStatus;
use headshot_core::style::Style;
use headshot_core::types::ClientId;
use headshot_pipeline::{FetchError, Pipeline, ServiceError};
use tokio_util::sync::CancellationToken;

use common::{png, test_config, wait_for_status, ScriptedProvider};

#[tokio::test]
async fn second_sweep_at_same_time_changes_nothing() {
    let pipeline = Pipeline::in_memory(test_config(), ScriptedProvider::new([])).unwrap();
    let service = pipeline.service();

    let mut ids = Vec::new();
    for (client, tag) in [("alice", "j1"), ("alice", "j2"), ("bob", "j3")] {
        let source = service.upload_source(png(tag)).await.unwrap();
        ids.push(
            service
                .submit_job(ClientId::new(client), source, Style::CorporateClassic)
                .await
                .unwrap(),
        );
    }
    service.cancel_job(ids[2]).await.unwrap();

    let latest = service.get_job_status(ids[2]).await.unwrap().expires_at;
    let now = latest + ChronoDuration::seconds(1);

    let first = pipeline.janitor().sweep(now).await;
    assert_eq!(first.jobs_expired, 2);
    assert_eq!(first.artifacts_purged, 3);

    let before: Vec<_> = futures::future::join_all(ids.iter().map(|id| service.get_job_status(*id)))
        .await
        .into_iter()
        .map(|s| s.unwrap().status)
        .collect();

    let second = pipeline.janitor().sweep(now).await;
    assert_eq!(second.jobs_expired, 0);
    assert_eq!(second.artifacts_purged, 0);
    assert_eq!(second.records_purged, 0);

    let after: Vec<_> = futures::future::join_all(ids.iter().map(|id| service.get_job_status(*id)))
        .await
        .into_iter()
        .map(|s| s.unwrap().status)
        .collect();
    assert_eq!(before, after);
    assert_eq!(
        after,
        [JobStatus::Expired, JobStatus::Expired, JobStatus::Cancelled]
    );
}

#[tokio::test]
async fn terminal_records_are_purged_after_grace() {
    let config = test_config();
    let grace = ChronoDuration::from_std(config.record_grace).unwrap();
    let pipeline = Pipeline::in_memory(config, ScriptedProvider::new([])).unwrap();
    let service = pipeline.service();

    let source = service.upload_source(png("old")).await.unwrap();
    let id = service
        .submit_job(ClientId::new("alice"), source, Style::CorporateClassic)
        .await
        .unwrap();
    let expires_at = service.get_job_status(id).await.unwrap().expires_at;

    // Expired but still inside the grace period: the record stays.
    let report = pipeline.janitor().sweep(expires_at + ChronoDuration::seconds(1)).await;
    assert_eq!(report.jobs_expired, 1);
    assert_eq!(report.records_purged, 0);
    assert_matches!(service.fetch_result(id).await, Err(FetchError::Expired(_)));

    let report = pipeline
        .janitor()
        .sweep(expires_at + grace + ChronoDuration::seconds(1))
        .await;
    assert_eq!(report.records_purged, 1);
    assert_matches!(service.get_job_status(id).await, Err(ServiceError::NotFound(_)));
    assert_matches!(service.fetch_result(id).await, Err(FetchError::NotFound(_)));
}

#[tokio::test]
async fn completed_result_expires_after_retention() {
    let pipeline = Pipeline::in_memory(test_config(), ScriptedProvider::new([])).unwrap();
    let service = pipeline.service();
    let handle = pipeline.start(CancellationToken::new());

    let source = service.upload_source(png("kept")).await.unwrap();
    let id = service
        .submit_job(ClientId::new("alice"), source, Style::CorporateClassic)
        .await
        .unwrap();
    let done = wait_for_status(&service, id, JobStatus::Completed).await;
    handle.shutdown().await;

    // Well inside retention nothing is touched.
    let report = pipeline.janitor().sweep(chrono::Utc::now()).await;
    assert_eq!(report.jobs_expired, 0);
    assert_eq!(report.artifacts_purged, 0);
    assert!(service.fetch_result(id).await.is_ok());

    // Past retention the bytes go, the record stays for the grace period.
    let report = pipeline
        .janitor()
        .sweep(done.expires_at + ChronoDuration::seconds(60))
        .await;
    assert_eq!(report.jobs_expired, 0);
    assert_eq!(report.artifacts_purged, 2);
    assert_eq!(report.records_purged, 0);

    let snapshot = service.get_job_status(id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_matches!(service.fetch_result(id).await, Err(FetchError::Expired(_)));
}
