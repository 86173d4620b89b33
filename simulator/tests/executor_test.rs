// Step execution against a hand-built scenario context

mod common;

use common::{init_logging, MockLauncher, MockOptions, MockSigner};
use engine_simulator::devp2p::ProbeError;
use engine_simulator::prelude::*;
use engine_simulator::scenarios::{
    DevP2PCheckForkId, DevP2PRequestPooledTransactionHash, LaunchClients, ScenarioExecutor,
    SendModifiedLatestPayload,
};

async fn context(launcher: Arc<MockLauncher>, client_forks: ForkConfig, forks: ForkConfig) -> Arc<ScenarioContext> {
    init_logging();
    let primary = launcher
        .launch(&LaunchOptions::new(ClientRole::Primary, client_forks))
        .await
        .unwrap();
    let ctx = ScenarioContext::builder("executor test")
        .with_forks(forks)
        .with_signer(Arc::new(MockSigner))
        .with_launcher(launcher)
        .with_clock(Arc::new(PausedClock::new()))
        .build()
        .unwrap();
    ctx.track_launched(primary.clone());
    ctx.clmock.add_client(primary, ClientRole::Primary).unwrap();
    ctx.clmock.initialize().await.unwrap();
    Arc::new(ctx)
}

async fn default_context() -> (Arc<ScenarioContext>, Arc<MockLauncher>) {
    let launcher = Arc::new(MockLauncher::new(MockOptions::default()));
    let ctx = context(launcher.clone(), ForkConfig::default(), ForkConfig::default()).await;
    (ctx, launcher)
}

fn send(count: usize, blobs: usize) -> Step {
    Step::SendBlobTransactions(SendBlobTransactions::new(count, blobs, 1))
}

#[tokio::test(start_paused = true)]
async fn test_report_and_log() {
    let (ctx, _) = default_context().await;
    let steps = vec![
        Step::NewPayloads(NewPayloads::new()),
        send(3, 1),
        Step::NewPayloads(NewPayloads::new().blobs(3).expected_blobs(blob_list(0, 3))),
    ];

    let mut executor = ScenarioExecutor::new();
    let report = executor.execute(&ctx, &steps).await.unwrap();

    assert!(report.success);
    assert_eq!(report.steps_executed, 3);
    assert_eq!(executor.current_step(), 3);
    assert!(report
        .log
        .iter()
        .any(|line| line.starts_with("--- Step 2: SendBlobTransactions")));
    assert!(report.render().contains("Status: SUCCESS"));

    // everything sent was included and resolved
    assert!(ctx.txgen.pool().is_empty());
    assert_eq!(ctx.txgen.pool().inclusions().len(), 3);
    assert_eq!(ctx.clmock.head().unwrap().number, 2);
}

#[tokio::test(start_paused = true)]
async fn test_stops_at_first_failing_step() {
    let (ctx, _) = default_context().await;
    let steps = vec![
        Step::NewPayloads(NewPayloads::new()),
        // nothing was sent, so the payload cannot carry a blob
        Step::NewPayloads(NewPayloads::new().blobs(1)),
        Step::NewPayloads(NewPayloads::new()),
    ];

    let mut executor = ScenarioExecutor::new();
    let err = executor.execute(&ctx, &steps).await.unwrap_err();

    assert!(format!("{err:#}").starts_with("Failed at step 2 (NewPayloads"));
    assert!(matches!(
        err.downcast_ref::<Failure>(),
        Some(Failure::ProtocolViolation { .. })
    ));
    assert_eq!(executor.current_step(), 2);
    assert!(!executor
        .get_log()
        .iter()
        .any(|line| line.contains("completed successfully")));
    assert_eq!(ctx.clmock.head().unwrap().number, 2);
}

#[tokio::test(start_paused = true)]
async fn test_underpriced_replacement_is_rejected() {
    let (ctx, _) = default_context().await;
    let same_tip = SendBlobTransactions::new(1, 1, 1).replacing();

    let steps = vec![
        send(1, 1),
        Step::SendBlobTransactions(same_tip.clone().expecting_rejection()),
    ];
    ScenarioExecutor::new().execute(&ctx, &steps).await.unwrap();

    let err = ScenarioExecutor::new()
        .execute(&ctx, &[Step::SendBlobTransactions(same_tip)])
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Failure>(),
        Some(Failure::Submission(SubmissionError::Rejected { code: -32000, .. }))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_parallel_failures_are_collected() {
    let (ctx, _) = default_context().await;
    let steps = vec![Step::ParallelSteps(vec![
        send(1, 1),
        Step::SendBlobTransactions(SendBlobTransactions::new(1, 1, 1).to_client(4)),
        Step::SendBlobTransactions(SendBlobTransactions::new(1, 1, 1).to_client(5)),
    ])];

    let err = ScenarioExecutor::new().execute(&ctx, &steps).await.unwrap_err();
    match err.downcast_ref::<Failure>() {
        Some(Failure::Parallel(failures)) => {
            let members: Vec<usize> = failures.iter().map(|member| member.index).collect();
            assert_eq!(members, vec![1, 2]);
            assert!(failures[0].step.ends_with("to client 4"), "{}", failures[0].step);
            assert!(failures[1].step.ends_with("to client 5"), "{}", failures[1].step);
        }
        other => panic!("expected parallel failure, got {other:?}"),
    }
    // the member that could run did
    assert_eq!(ctx.txgen.sent_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_mirrored_client_follows_the_chain() {
    let (ctx, launcher) = default_context().await;
    let steps = vec![
        Step::LaunchClients(LaunchClients::new(ClientRole::Mirrored)),
        // two 4-blob transactions never fit one payload
        send(2, 4),
        Step::NewPayloads(NewPayloads::new().count(2).blobs(4)),
    ];
    ScenarioExecutor::new().execute(&ctx, &steps).await.unwrap();

    let primary = launcher.client(0).unwrap();
    let mirrored = launcher.client(1).unwrap();
    assert_eq!(mirrored.calls("engine_newPayload"), 2);
    assert_eq!(mirrored.head(), primary.head());

    ctx.teardown().await;
    assert_eq!(launcher.stopped().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_pooled_transactions_over_devp2p() {
    let (ctx, _) = default_context().await;
    let steps = vec![
        send(2, 2),
        Step::DevP2PRequestPooledTransactionHash(DevP2PRequestPooledTransactionHash {
            client: 0,
            transaction_indexes: vec![1, 0],
            wait_for_new_pooled_tx: true,
        }),
    ];
    ScenarioExecutor::new().execute(&ctx, &steps).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_incompatible_fork_id_is_reported() {
    let launcher = Arc::new(MockLauncher::new(MockOptions::default()));
    // the client activates every fork at genesis, we schedule Cancun at 3
    let client_forks = ForkConfig::default()
        .with_genesis_timestamp(5)
        .with_shanghai_timestamp(Some(5))
        .with_cancun_timestamp(Some(5));
    let forks = ForkConfig::default().with_cancun_timestamp(Some(3));
    let ctx = context(launcher, client_forks, forks).await;

    let err = ScenarioExecutor::new()
        .execute(&ctx, &[Step::DevP2PCheckForkId(DevP2PCheckForkId { client: 0 })])
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Failure>(),
        Some(Failure::Probe(ProbeError::ForkId(_)))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_modified_payload_needs_a_produced_payload() {
    let (ctx, _) = default_context().await;
    let step = Step::SendModifiedLatestPayload(SendModifiedLatestPayload::new(
        0,
        ExpectedOutcome::invalid(),
    ));
    let err = ScenarioExecutor::new().execute(&ctx, &[step]).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<Failure>(), Some(Failure::Sequencing(_))));
}

#[tokio::test(start_paused = true)]
async fn test_any_status_expectation_still_promotes() {
    let (ctx, launcher) = default_context().await;
    let steps = vec![
        Step::NewPayloads(NewPayloads::new().expecting(ExpectedOutcome::default())),
        Step::NewPayloads(NewPayloads::new().expecting(ExpectedOutcome::default())),
    ];
    ScenarioExecutor::new().execute(&ctx, &steps).await.unwrap();

    assert_eq!(ctx.clmock.head().unwrap().number, 2);
    assert_eq!(launcher.client(0).unwrap().head().number, 2);
}

fn syncing_client_steps() -> Vec<Step> {
    vec![
        Step::NewPayloads(NewPayloads::new()),
        Step::LaunchClients(LaunchClients::new(ClientRole::Syncing).skip_bootnode()),
        Step::NewPayloads(NewPayloads::new().count(2)),
    ]
}

#[tokio::test(start_paused = true)]
async fn test_syncing_client_only_follows_forkchoice() {
    let (ctx, launcher) = default_context().await;
    ScenarioExecutor::new()
        .execute(&ctx, &syncing_client_steps())
        .await
        .unwrap();

    let syncing = launcher.client(1).unwrap();
    assert_eq!(syncing.calls("engine_newPayload"), 0);
    assert_eq!(syncing.calls("engine_forkchoiceUpdated"), 2);
    // it answered SYNCING and never learned the new blocks
    assert_eq!(syncing.head().number, 0);
    assert_eq!(ctx.clmock.head().unwrap().number, 3);
}

#[tokio::test(start_paused = true)]
async fn test_syncing_client_answering_invalid_fails_promotion() {
    let launcher = Arc::new(MockLauncher::new(MockOptions {
        reject_unknown_heads: true,
        ..MockOptions::default()
    }));
    let ctx = context(launcher, ForkConfig::default(), ForkConfig::default()).await;

    let err = ScenarioExecutor::new()
        .execute(&ctx, &syncing_client_steps())
        .await
        .unwrap_err();
    match err.downcast_ref::<Failure>() {
        Some(Failure::ProtocolViolation { step, actual, .. }) => {
            assert_eq!(step, "forkchoiceUpdated on client 1");
            assert_eq!(actual, "INVALID");
        }
        other => panic!("expected a protocol violation, got {other:?}"),
    }
}
