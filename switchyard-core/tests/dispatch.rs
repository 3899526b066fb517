use std::{sync::Arc, time::Duration};

use switchyard_core::{
    HeartbeatMonitor, JobDispatcher, NewJob, RegistryConfig, RegistryRuntime, StaticDirectory,
    dispatch::DispatchResponse,
};
use switchyard_model::{
    FailureReason, JobStatus, START_WORKFLOW, ServiceKey, ServiceState, TYPE_WORKFLOW,
};

#[path = "support/mod.rs"]
mod support;

use support::{Cluster, ENCODE, HOST_A, HOST_B, ORG, dispatch_url};

#[tokio::test]
async fn least_loaded_host_wins_and_ties_prefer_capacity() {
    let cluster = Cluster::new(&[(HOST_A, 2.0), (HOST_B, 1.0)]).await;

    let first = cluster.submit("transcode", 1.0).await;
    let report = cluster.dispatcher.run_cycle().await.unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(cluster.client.calls_for(first.id), vec![dispatch_url(HOST_A)]);

    let mut running = cluster.registry.job(first.id).await.unwrap();
    assert_eq!(running.status, JobStatus::Dispatching);
    assert_eq!(running.processor_host.as_deref(), Some(HOST_A));
    running.status = JobStatus::Running;
    cluster.registry.update_job(running).await.unwrap();

    let factors = cluster.registry.load_factors().await.unwrap();
    assert_eq!(factors.get(HOST_A).copied(), Some(0.5));
    assert_eq!(factors.get(HOST_B).copied(), Some(0.0));

    let second = cluster.submit("transcode", 1.0).await;
    cluster.dispatcher.run_cycle().await.unwrap();
    assert_eq!(cluster.client.calls_for(second.id), vec![dispatch_url(HOST_B)]);
}

#[tokio::test]
async fn racing_claims_have_one_winner() {
    let cluster = Cluster::new(&[(HOST_A, 2.0), (HOST_B, 1.0)]).await;
    let job = cluster.submit("transcode", 0.1).await;

    let (left, right) = tokio::join!(
        cluster.registry.claim_for_dispatch(job.clone(), HOST_A),
        cluster.registry.claim_for_dispatch(job.clone(), HOST_B),
    );
    let winners = [&left, &right].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    let loser = if left.is_ok() { right } else { left };
    assert!(matches!(
        loser,
        Err(switchyard_core::RegistryError::Undispatchable(id)) if id == job.id
    ));
}

#[tokio::test]
async fn concurrent_dispatchers_never_send_a_job_twice() {
    let cluster = Cluster::new(&[(HOST_A, 4.0), (HOST_B, 4.0)]).await;
    let mut ids = Vec::new();
    for _ in 0..20 {
        ids.push(cluster.submit("transcode", 0.1).await.id);
    }

    let rival = JobDispatcher::new(
        Arc::clone(&cluster.registry),
        Arc::new(StaticDirectory::permissive([ORG])),
        cluster.client.clone(),
    );
    let (ours, theirs) = tokio::join!(cluster.dispatcher.run_cycle(), rival.run_cycle());
    let (ours, theirs) = (ours.unwrap(), theirs.unwrap());
    assert_eq!(ours.dispatched + theirs.dispatched, ids.len());

    for id in ids {
        assert_eq!(cluster.client.calls_for(id).len(), 1, "job {id} sent more than once");
        let job = cluster.registry.job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Dispatching);
    }
}

#[tokio::test]
async fn oversized_job_goes_to_largest_host_even_when_busy() {
    let cluster = Cluster::new(&[(HOST_A, 2.0), (HOST_B, 1.0)]).await;

    let mut busy = cluster.submit("transcode", 1.5).await;
    busy.status = JobStatus::Running;
    busy.processor_host = Some(HOST_A.to_string());
    cluster.registry.update_job(busy).await.unwrap();

    let heavy = cluster.submit("render", 3.0).await;
    let report = cluster.dispatcher.run_cycle().await.unwrap();

    assert_eq!(report.dispatched, 1);
    assert_eq!(cluster.client.calls_for(heavy.id), vec![dispatch_url(HOST_A)]);
}

#[tokio::test]
async fn full_hosts_are_skipped_for_root_jobs() {
    let cluster = Cluster::new(&[(HOST_A, 1.0)]).await;

    let mut busy = cluster.submit("transcode", 1.0).await;
    busy.status = JobStatus::Running;
    busy.processor_host = Some(HOST_A.to_string());
    cluster.registry.update_job(busy).await.unwrap();

    let waiting = cluster.submit("transcode", 0.5).await;
    let report = cluster.dispatcher.run_cycle().await.unwrap();

    assert_eq!(report.dispatched, 0);
    assert_eq!(report.skipped, 1);
    assert!(cluster.client.calls_for(waiting.id).is_empty());
    let job = cluster.registry.job(waiting.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);
}

#[tokio::test]
async fn rejected_job_fails_without_health_penalty() {
    let cluster = Cluster::new(&[(HOST_A, 2.0)]).await;
    cluster.client.always(
        &dispatch_url(HOST_A),
        DispatchResponse::Rejected("unsupported codec".into()),
    );

    let job = cluster.submit("transcode", 0.1).await;
    let report = cluster.dispatcher.run_cycle().await.unwrap();
    assert_eq!(report.rejected, 1);

    let failed = cluster.registry.job(job.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.failure_reason, FailureReason::Data);
    assert!(failed.date_completed.is_some());

    let service = cluster
        .registry
        .service(&ServiceKey::new(ENCODE, HOST_A))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(service.state, ServiceState::Normal);
}

#[tokio::test]
async fn busy_everywhere_pins_job_to_last_host() {
    let cluster = Cluster::new(&[(HOST_A, 2.0), (HOST_B, 1.0)]).await;
    cluster.client.always(&dispatch_url(HOST_A), DispatchResponse::Busy);
    cluster.client.always(&dispatch_url(HOST_B), DispatchResponse::Busy);

    let pinned = cluster.submit("transcode", 0.1).await;
    let first = cluster.dispatcher.run_cycle().await.unwrap();
    assert_eq!(first.requeued, 1);
    assert_eq!(
        cluster.client.calls_for(pinned.id),
        vec![dispatch_url(HOST_A), dispatch_url(HOST_B)]
    );
    assert_eq!(
        cluster.dispatcher.priority_list().get(&pinned.id).map(String::as_str),
        Some(HOST_B)
    );
    let requeued = cluster.registry.job(pinned.id).await.unwrap();
    assert_eq!(requeued.status, JobStatus::Queued);
    assert!(requeued.processor_host.is_none());

    // Other work stays off B while the pin holds and ends up pinned to A.
    let other = cluster.submit("thumbnail", 0.1).await;
    cluster.dispatcher.run_cycle().await.unwrap();
    assert_eq!(cluster.client.calls_for(other.id), vec![dispatch_url(HOST_A)]);
    assert_eq!(
        cluster.dispatcher.priority_list().get(&other.id).map(String::as_str),
        Some(HOST_A)
    );

    // Each job now only gets its own host.
    cluster.client.always(&dispatch_url(HOST_A), DispatchResponse::Accepted);
    let third = cluster.dispatcher.run_cycle().await.unwrap();
    assert_eq!(third.dispatched, 1);
    assert_eq!(third.requeued, 1);
    assert_eq!(
        cluster.client.calls_for(pinned.id),
        vec![
            dispatch_url(HOST_A),
            dispatch_url(HOST_B),
            dispatch_url(HOST_A),
            dispatch_url(HOST_B),
            dispatch_url(HOST_B),
        ]
    );
    assert_eq!(
        cluster.client.calls_for(other.id),
        vec![dispatch_url(HOST_A), dispatch_url(HOST_A)]
    );

    cluster.client.always(&dispatch_url(HOST_B), DispatchResponse::Accepted);
    let last = cluster.dispatcher.run_cycle().await.unwrap();
    assert_eq!(last.dispatched, 1);
    assert!(cluster.dispatcher.priority_list().is_empty());
}

#[tokio::test]
async fn pinned_job_moves_on_when_its_host_leaves() {
    let cluster = Cluster::new(&[(HOST_A, 2.0), (HOST_B, 1.0)]).await;
    cluster.client.always(&dispatch_url(HOST_A), DispatchResponse::Busy);
    cluster.client.always(&dispatch_url(HOST_B), DispatchResponse::Busy);

    let job = cluster.submit("transcode", 0.1).await;
    cluster.dispatcher.run_cycle().await.unwrap();
    assert_eq!(
        cluster.dispatcher.priority_list().get(&job.id).map(String::as_str),
        Some(HOST_B)
    );

    cluster
        .registry
        .unregister_service(ENCODE, HOST_B)
        .await
        .unwrap();
    cluster.client.always(&dispatch_url(HOST_A), DispatchResponse::Accepted);

    let report = cluster.dispatcher.run_cycle().await.unwrap();
    assert_eq!(report.dispatched, 1);
    let dispatched = cluster.registry.job(job.id).await.unwrap();
    assert_eq!(dispatched.status, JobStatus::Dispatching);
    assert_eq!(dispatched.processor_host.as_deref(), Some(HOST_A));
    assert!(cluster.dispatcher.priority_list().is_empty());
}

#[tokio::test]
async fn workflow_jobs_are_dispatched_last() {
    let cluster = Cluster::new(&[(HOST_A, 2.0)]).await;
    cluster
        .registry
        .register_service(TYPE_WORKFLOW, HOST_A, "/workflow/", true)
        .await
        .unwrap();

    let workflow = cluster
        .registry
        .create_job(NewJob::new(TYPE_WORKFLOW, START_WORKFLOW, HOST_A, "admin", ORG))
        .await
        .unwrap();
    let regular = cluster.submit("transcode", 0.1).await;

    let report = cluster.dispatcher.run_cycle().await.unwrap();
    assert_eq!(report.dispatched, 2);
    let order: Vec<_> = cluster.client.calls().into_iter().map(|(_, id)| id).collect();
    assert_eq!(order, vec![regular.id, workflow.id]);
}

#[tokio::test]
async fn children_fan_out_until_a_sibling_runs() {
    let cluster = Cluster::new(&[(HOST_A, 1.0)]).await;

    let mut parent = cluster.submit("transcode", 1.0).await;
    parent.status = JobStatus::Running;
    parent.processor_host = Some(HOST_A.to_string());
    let parent = cluster.registry.update_job(parent).await.unwrap();

    // A is full, but a child with no running sibling may still go there.
    let first = cluster
        .registry
        .create_job(cluster.new_job("segment").with_parent(parent.id).with_load(0.5))
        .await
        .unwrap();
    let report = cluster.dispatcher.run_cycle().await.unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(cluster.client.calls_for(first.id), vec![dispatch_url(HOST_A)]);

    let mut running = cluster.registry.job(first.id).await.unwrap();
    running.status = JobStatus::Running;
    cluster.registry.update_job(running).await.unwrap();

    let second = cluster
        .registry
        .create_job(cluster.new_job("segment").with_parent(parent.id).with_load(0.5))
        .await
        .unwrap();
    let report = cluster.dispatcher.run_cycle().await.unwrap();
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.skipped, 1);
    assert!(cluster.client.calls_for(second.id).is_empty());
}

#[tokio::test]
async fn exhausted_operation_is_not_retried_in_the_same_cycle() {
    let mut config = RegistryConfig::default();
    config.dispatch.accept_job_loads_exceeding_max_load = false;
    let cluster = Cluster::with_config(&[(HOST_A, 2.0)], config).await;
    cluster.client.always(&dispatch_url(HOST_A), DispatchResponse::Busy);

    let first = cluster.submit("transcode", 0.1).await;
    let second = cluster.submit("transcode", 0.1).await;
    let different = cluster.submit("thumbnail", 0.1).await;

    let report = cluster.dispatcher.run_cycle().await.unwrap();
    assert_eq!(report.requeued, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(cluster.client.calls_for(first.id), vec![dispatch_url(HOST_A)]);
    assert!(cluster.client.calls_for(second.id).is_empty());
    assert_eq!(cluster.client.calls_for(different.id), vec![dispatch_url(HOST_A)]);
    assert!(cluster.dispatcher.priority_list().is_empty());

    // The next cycle starts fresh.
    cluster.client.always(&dispatch_url(HOST_A), DispatchResponse::Accepted);
    let next = cluster.dispatcher.run_cycle().await.unwrap();
    assert_eq!(next.dispatched, 3);
    assert_eq!(cluster.client.calls_for(second.id), vec![dispatch_url(HOST_A)]);
}

#[tokio::test]
async fn busy_host_falls_through_to_next_candidate() {
    let cluster = Cluster::new(&[(HOST_A, 2.0), (HOST_B, 1.0)]).await;
    cluster.client.queue(&dispatch_url(HOST_A), DispatchResponse::Busy);

    let job = cluster.submit("transcode", 0.1).await;
    let report = cluster.dispatcher.run_cycle().await.unwrap();

    assert_eq!(report.dispatched, 1);
    assert_eq!(
        cluster.client.calls_for(job.id),
        vec![dispatch_url(HOST_A), dispatch_url(HOST_B)]
    );
    let dispatched = cluster.registry.job(job.id).await.unwrap();
    assert_eq!(dispatched.processor_host.as_deref(), Some(HOST_B));
}

#[tokio::test]
async fn unknown_organization_is_skipped() {
    let cluster = Cluster::new(&[(HOST_A, 2.0)]).await;
    let job = cluster
        .registry
        .create_job(
            NewJob::new(ENCODE, "transcode", HOST_A, "admin", "nobody")
                .with_load(0.1),
        )
        .await
        .unwrap();

    let report = cluster.dispatcher.run_cycle().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert!(cluster.client.calls_for(job.id).is_empty());
}

#[tokio::test]
async fn restart_jobs_go_before_queued_ones() {
    let cluster = Cluster::new(&[(HOST_A, 2.0)]).await;
    let queued = cluster.submit("transcode", 0.1).await;
    let mut restarted = cluster.submit("transcode", 0.1).await;
    restarted.status = JobStatus::Restart;
    let restarted = cluster.registry.update_job(restarted).await.unwrap();

    cluster.dispatcher.run_cycle().await.unwrap();
    let order: Vec<_> = cluster.client.calls().into_iter().map(|(_, id)| id).collect();
    assert_eq!(order, vec![restarted.id, queued.id]);
}

#[tokio::test]
async fn runtime_dispatches_on_its_own_and_shuts_down() {
    let cluster = Cluster::new(&[(HOST_A, 2.0)]).await;
    let dispatcher = Arc::new(JobDispatcher::new(
        Arc::clone(&cluster.registry),
        Arc::new(StaticDirectory::permissive([ORG])),
        cluster.client.clone(),
    ));
    let monitor = Arc::new(HeartbeatMonitor::new(
        Arc::clone(&cluster.registry),
        cluster.client.clone(),
    ));
    let runtime = RegistryRuntime::new(
        dispatcher,
        monitor,
        Some(Duration::from_millis(20)),
        None,
    );
    runtime.start().await;

    let job = cluster.submit("transcode", 0.1).await;
    let mut status = JobStatus::Queued;
    for _ in 0..100 {
        status = cluster.registry.job(job.id).await.unwrap().status;
        if status == JobStatus::Dispatching {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, JobStatus::Dispatching);

    runtime.shutdown().await;
    assert!(runtime.shutdown_token().is_cancelled());
}
