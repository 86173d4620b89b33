//! Cancun test table.
//!
//! Each [`CancunTest`] is plain data: a name, a description, the fork
//! schedule its clients start with, and the steps to run. The runner owns
//! everything else.

use std::time::Duration;

use alloy_primitives::B256;
use engine_common::blob::{blob_list, BlobId, HashCorruption, VersionedHashes};
use engine_common::config::{
    BlobGasConfig, ForkConfig, GAS_PER_BLOB, MAX_BLOBS_PER_BLOCK, TARGET_BLOBS_PER_BLOCK,
};
use engine_common::fee::min_excess_blobs_for_blob_gas_price;
use engine_common::payload::{EngineVersion, FieldOverride, PayloadCustomizer};
use serde::{Deserialize, Serialize};

use super::step::{
    DevP2PCheckForkId, DevP2PRequestPooledTransactionHash, LaunchClients, NewPayloads,
    SendModifiedLatestPayload, Step,
};
use crate::engine::ClientRole;
use crate::txgen::SendBlobTransactions;
use crate::validator::ExpectedOutcome;

const TARGET_BLOBS: usize = TARGET_BLOBS_PER_BLOCK as usize;
const MAX_BLOBS: usize = MAX_BLOBS_PER_BLOCK as usize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancunTest {
    pub name: String,
    pub about: String,
    pub forks: ForkConfig,
    pub steps: Vec<Step>,
}

impl CancunTest {
    fn new(name: impl Into<String>, about: impl Into<String>, forks: ForkConfig) -> Self {
        Self {
            name: name.into(),
            about: about.into(),
            forks,
            steps: Vec::new(),
        }
    }

    fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }
}

/// Every Cancun test, in execution order
pub fn tests() -> Vec<CancunTest> {
    let mut tests = vec![
        blob_transactions_on_block_1("Shanghai Genesis", 1),
        blob_transactions_on_block_1("Cancun Genesis", 0),
        ordering_single_account(),
        ordering_single_account_2(),
        ordering_multiple_accounts(),
        ordering_multiple_clients(),
        replace_blob_transactions(),
        parallel_blob_transactions(),
    ];
    tests.extend(new_payload_before_cancun());
    tests.extend(new_payload_after_cancun());
    tests.extend(versioned_hash_corruption(false));
    tests.extend(versioned_hash_corruption(true));
    tests.extend(incorrect_blob_gas_used());
    tests.extend(fork_id());
    tests.push(request_blob_pooled_transactions());
    tests
}

fn send(count: usize, blobs_per_transaction: usize, max_blob_gas_cost: u128) -> Step {
    Step::SendBlobTransactions(SendBlobTransactions::new(
        count,
        blobs_per_transaction,
        max_blob_gas_cost,
    ))
}

fn payloads(count: usize, blobs: usize) -> Step {
    Step::NewPayloads(NewPayloads::new().count(count).blobs(blobs))
}

/// Blobs that have to be in excess before the blob gas price reaches 2
fn price_increment_blobs() -> usize {
    min_excess_blobs_for_blob_gas_price(2, &BlobGasConfig::default()) as usize
}

fn blob_transactions_on_block_1(genesis: &str, cancun_height: u64) -> CancunTest {
    // every full payload pushes the excess up by max - target blobs
    let full_payloads = price_increment_blobs() / (MAX_BLOBS - TARGET_BLOBS);
    CancunTest::new(
        format!("Blob Transactions On Block 1, {genesis}"),
        "Blob transactions are included from the first Cancun block, in order, with a \
         matching blobs bundle. Maxing out the blobs raises the blob gas price above what \
         the last transaction pays, so one payload comes out empty before it is included.",
        ForkConfig::default().with_cancun_fork_height(cancun_height),
    )
    .steps([
        payloads(1, 0),
        send(TARGET_BLOBS, 1, 1),
        Step::NewPayloads(
            NewPayloads::new()
                .blobs(TARGET_BLOBS)
                .expected_blobs(blob_list(0, TARGET_BLOBS as u64)),
        ),
        send(full_payloads + 1, MAX_BLOBS, 1),
        payloads(full_payloads, MAX_BLOBS),
        payloads(1, 0),
        payloads(1, MAX_BLOBS),
    ])
}

fn ordering_single_account() -> CancunTest {
    CancunTest::new(
        "Blob Transaction Ordering, Single Account",
        "One account sends 5 transactions of MAX-1 blobs, then MAX+1 single-blob \
         transactions. The first four payloads carry MAX-1 blobs, the rest are full.",
        ForkConfig::default(),
    )
    .steps([
        send(5, MAX_BLOBS - 1, 100),
        send(MAX_BLOBS + 1, 1, 100),
        Step::NewPayloads(NewPayloads::new().count(4).blobs(MAX_BLOBS - 1).planned()),
        Step::NewPayloads(NewPayloads::new().count(2).blobs(MAX_BLOBS).planned()),
    ])
}

fn ordering_single_account_2() -> CancunTest {
    CancunTest::new(
        "Blob Transaction Ordering, Single Account 2",
        "One account sends 5 transactions of MAX-1 blobs, one 2-blob transaction and \
         MAX-2 single-blob transactions. Five payloads carry MAX-1 blobs, the last is full.",
        ForkConfig::default(),
    )
    .steps([
        send(5, MAX_BLOBS - 1, 100),
        send(1, 2, 100),
        send(MAX_BLOBS - 2, 1, 100),
        Step::NewPayloads(NewPayloads::new().count(5).blobs(MAX_BLOBS - 1).planned()),
        Step::NewPayloads(NewPayloads::new().count(1).blobs(MAX_BLOBS).planned()),
    ])
}

fn ordering_multiple_accounts() -> CancunTest {
    CancunTest::new(
        "Blob Transaction Ordering, Multiple Accounts",
        "Account A sends 5 transactions of MAX-1 blobs, account B 5 single-blob \
         transactions. Every payload is full.",
        ForkConfig::default(),
    )
    .steps([
        Step::SendBlobTransactions(SendBlobTransactions::new(5, MAX_BLOBS - 1, 100)),
        Step::SendBlobTransactions(SendBlobTransactions::new(5, 1, 100).from_account(1)),
        Step::NewPayloads(NewPayloads::new().count(5).blobs(MAX_BLOBS)),
    ])
}

fn ordering_multiple_clients() -> CancunTest {
    CancunTest::new(
        "Blob Transaction Ordering, Multiple Clients",
        "Account A sends to client A, account B to a second client kept out of block \
         production. Client A builds full payloads from both.",
        ForkConfig::default(),
    )
    .steps([
        Step::LaunchClients(LaunchClients::new(ClientRole::Detached)),
        payloads(1, 0),
        Step::SendBlobTransactions(SendBlobTransactions::new(5, MAX_BLOBS - 1, 120)),
        Step::SendBlobTransactions(
            SendBlobTransactions::new(5, 1, 100)
                .from_account(1)
                .to_client(1),
        ),
        Step::NewPayloads(
            NewPayloads::new()
                .count(5)
                .blobs(MAX_BLOBS)
                .get_payload_delay(Duration::from_secs(2)),
        ),
    ])
}

fn replace_blob_transactions() -> CancunTest {
    let mut test = CancunTest::new(
        "Replace Blob Transactions",
        "Transactions at the same nonce with increasing tips replace each other; only \
         the last one is included.",
        ForkConfig::default(),
    )
    .step(Step::SendBlobTransactions(
        SendBlobTransactions::new(1, 1, 1).with_fees(1_000_000_000, 1_000_000_000),
    ));
    for (cost, fee) in [(100u128, 10u128.pow(10)), (1_000, 10u128.pow(11)), (10_000, 10u128.pow(12))] {
        test = test.step(Step::SendBlobTransactions(
            SendBlobTransactions::new(1, 1, cost)
                .with_fees(fee, fee)
                .replacing(),
        ));
    }
    test.step(Step::NewPayloads(
        NewPayloads::new().blobs(1).expected_blobs(vec![BlobId(3)]),
    ))
}

fn parallel_blob_transactions() -> CancunTest {
    let senders = (0..10)
        .map(|account| {
            Step::SendBlobTransactions(
                SendBlobTransactions::new(5, MAX_BLOBS, 100).from_account(account),
            )
        })
        .collect();
    CancunTest::new(
        "Parallel Blob Transactions",
        "Ten accounts send full-blob transactions concurrently; the first payload carries \
         the maximum number of blobs.",
        ForkConfig::default(),
    )
    .steps([
        Step::ParallelSteps(senders),
        Step::NewPayloads(
            NewPayloads::new()
                .blobs(MAX_BLOBS)
                .expected_blobs(blob_list(0, MAX_BLOBS as u64)),
        ),
    ])
}

fn new_payload_v3(customizer: PayloadCustomizer, hashes: Option<VersionedHashes>) -> NewPayloads {
    let mut step = NewPayloads::new()
        .version(EngineVersion::V3)
        .customizer(customizer);
    if let Some(hashes) = hashes {
        step = step.versioned_hashes(hashes);
    }
    step
}

fn new_payload_before_cancun() -> Vec<CancunTest> {
    let nil_field = ExpectedOutcome::invalid_params()
        .with_description("NewPayloadV3 before Cancun with any nil field must return INVALID_PARAMS_ERROR");
    let empty = || Some(VersionedHashes::from_blobs(Vec::new()));
    let cases = [
        (
            "Nil Data Fields, Nil Versioned Hashes, Nil Beacon Root",
            PayloadCustomizer::new(),
            Some(VersionedHashes::nil()),
            nil_field.clone(),
        ),
        (
            "Nil ExcessBlobGas, 0x00 BlobGasUsed, Nil Versioned Hashes, Nil Beacon Root",
            PayloadCustomizer::new().with_blob_gas_used(FieldOverride::Set(0)),
            None,
            nil_field.clone(),
        ),
        (
            "0x00 ExcessBlobGas, Nil BlobGasUsed, Nil Versioned Hashes, Nil Beacon Root",
            PayloadCustomizer::new().with_excess_blob_gas(FieldOverride::Set(0)),
            None,
            nil_field.clone(),
        ),
        (
            "Nil Data Fields, Empty Array Versioned Hashes, Nil Beacon Root",
            PayloadCustomizer::new(),
            empty(),
            nil_field.clone(),
        ),
        (
            "Nil Data Fields, Nil Versioned Hashes, Zero Beacon Root",
            PayloadCustomizer::new().with_parent_beacon_root(FieldOverride::Set(B256::ZERO)),
            None,
            nil_field,
        ),
        (
            "0x00 Data Fields, Empty Array Versioned Hashes, Zero Beacon Root",
            PayloadCustomizer::new()
                .with_excess_blob_gas(FieldOverride::Set(0))
                .with_blob_gas_used(FieldOverride::Set(0))
                .with_parent_beacon_root(FieldOverride::Set(B256::ZERO)),
            empty(),
            ExpectedOutcome::unsupported_fork().with_description(
                "NewPayloadV3 before Cancun with no nil fields must return UNSUPPORTED_FORK_ERROR",
            ),
        ),
    ];

    cases
        .into_iter()
        .map(|(fields, customizer, hashes, expected)| {
            CancunTest::new(
                format!("NewPayloadV3 Before Cancun, {fields}"),
                format!("Send NewPayloadV3 on a Shanghai payload with {fields}; {}", expected.description),
                ForkConfig::default().with_cancun_fork_height(2),
            )
            .step(Step::NewPayloads(
                new_payload_v3(customizer, hashes).expecting(expected),
            ))
        })
        .collect()
}

fn new_payload_after_cancun() -> Vec<CancunTest> {
    let cases = [
        (
            "Nil ExcessBlobGas, 0x00 BlobGasUsed, Empty Array Versioned Hashes, Zero Beacon Root",
            "ExcessBlobGas",
            PayloadCustomizer::new().with_excess_blob_gas(FieldOverride::Remove),
        ),
        (
            "0x00 ExcessBlobGas, Nil BlobGasUsed, Empty Array Versioned Hashes",
            "BlobGasUsed",
            PayloadCustomizer::new().with_blob_gas_used(FieldOverride::Remove),
        ),
        (
            "0x00 Blob Fields, Empty Array Versioned Hashes, Nil Beacon Root",
            "parentBeaconBlockRoot",
            PayloadCustomizer::new().with_parent_beacon_root(FieldOverride::Remove),
        ),
    ];

    cases
        .into_iter()
        .map(|(fields, missing, customizer)| {
            let expected = ExpectedOutcome::invalid_params().with_description(format!(
                "NewPayloadV3 after Cancun with nil {missing} must return INVALID_PARAMS_ERROR"
            ));
            CancunTest::new(
                format!("NewPayloadV3 After Cancun, {fields}"),
                format!("Send NewPayloadV3 on the first Cancun payload without {missing}"),
                ForkConfig::default().with_cancun_fork_height(1),
            )
            .step(Step::NewPayloads(new_payload_v3(customizer, None).expecting(expected)))
        })
        .collect()
}

fn corruption_title(corruption: HashCorruption) -> &'static str {
    match corruption {
        HashCorruption::Missing => "Missing Hash",
        HashCorruption::Extra => "Extra Hash",
        HashCorruption::OutOfOrder => "Out of Order",
        HashCorruption::Duplicated => "Repeated Hash",
        HashCorruption::Incorrect => "Incorrect Hash",
        HashCorruption::WrongVersion => "Incorrect Version",
        HashCorruption::Nil => "Nil Hashes",
        HashCorruption::Empty => "Empty Hashes",
        HashCorruption::NonEmptyOnNoBlobs => "Non-Empty Hashes",
    }
}

/// `null` is malformed input; every other damaged list is a bad block
fn corruption_outcome(corruption: HashCorruption) -> ExpectedOutcome {
    match corruption {
        HashCorruption::Nil => ExpectedOutcome::invalid_params()
            .with_description("NewPayloadV3 after Cancun with nil VersionedHashes must return INVALID_PARAMS_ERROR"),
        _ => ExpectedOutcome::invalid()
            .with_description("NewPayloadV3 with an incorrect list of versioned hashes must return INVALID"),
    }
}

const CORRUPTIONS: [HashCorruption; 9] = [
    HashCorruption::Missing,
    HashCorruption::Extra,
    HashCorruption::OutOfOrder,
    HashCorruption::Duplicated,
    HashCorruption::Incorrect,
    HashCorruption::WrongVersion,
    HashCorruption::Nil,
    HashCorruption::Empty,
    HashCorruption::NonEmptyOnNoBlobs,
];

/// Damaged versioned-hash lists, sent either to the primary as the payload
/// is built, or to a fresh client that cannot know the parent and so has to
/// reject the list before it even starts syncing
fn versioned_hash_corruption(syncing: bool) -> Vec<CancunTest> {
    CORRUPTIONS
        .into_iter()
        .map(|corruption| {
            let blobs = match corruption {
                HashCorruption::NonEmptyOnNoBlobs => Vec::new(),
                _ => blob_list(0, TARGET_BLOBS as u64),
            };
            let hashes = corruption.apply(&blobs);
            let expected = corruption_outcome(corruption);
            let title = corruption_title(corruption);

            let mut test = CancunTest::new(
                if syncing {
                    format!("NewPayloadV3 Versioned Hashes, {title} (Syncing)")
                } else {
                    format!("NewPayloadV3 Versioned Hashes, {title}")
                },
                format!(
                    "Send NewPayloadV3 with the versioned hashes {corruption}; {}",
                    expected.description
                ),
                ForkConfig::default(),
            );
            if syncing {
                // the launched client never sees this block's parent
                test = test.step(payloads(1, 0));
            }
            if !blobs.is_empty() {
                test = test.step(send(TARGET_BLOBS, 1, 1));
            }
            let built = NewPayloads::new()
                .blobs(blobs.len())
                .expected_blobs(blobs.clone());

            if syncing {
                let mut launch = LaunchClients::new(ClientRole::Detached);
                launch.skip_bootnode = true;
                test.steps([
                    Step::NewPayloads(built),
                    Step::LaunchClients(launch),
                    Step::SendModifiedLatestPayload(
                        SendModifiedLatestPayload::new(1, expected).versioned_hashes(hashes),
                    ),
                ])
            } else {
                test.step(Step::NewPayloads(
                    built.versioned_hashes(hashes).expecting(expected),
                ))
            }
        })
        .collect()
}

fn incorrect_blob_gas_used() -> Vec<CancunTest> {
    [("Non-Zero", 1), ("GAS_PER_BLOB", GAS_PER_BLOB)]
        .into_iter()
        .map(|(label, blob_gas_used)| {
            CancunTest::new(
                format!("Incorrect BlobGasUsed: {label} on Zero Blobs"),
                format!("Send a payload with zero blobs and BlobGasUsed {blob_gas_used}"),
                ForkConfig::default(),
            )
            .step(Step::NewPayloads(
                NewPayloads::new()
                    .customizer(
                        PayloadCustomizer::new().with_blob_gas_used(FieldOverride::Set(blob_gas_used)),
                    )
                    .expecting(ExpectedOutcome::invalid()),
            ))
        })
        .collect()
}

fn fork_id() -> Vec<CancunTest> {
    [
        (0, 0, 0, 0),
        (0, 0, 1, 0),
        (1, 0, 1, 0),
        (0, 0, 1, 1),
        (1, 1, 1, 0),
        (1, 1, 2, 0),
        (1, 1, 2, 1),
    ]
    .into_iter()
    .map(|(genesis, shanghai, cancun, produce_before_peering): (u64, u64, u64, usize)| {
        let mut name = format!("ForkID, genesis at {genesis}, shanghai at {shanghai}, cancun at {cancun}");
        if produce_before_peering > 0 {
            name.push_str(", transition");
        }
        let mut test = CancunTest::new(
            name,
            format!(
                "Peer with the client at height {produce_before_peering} with genesis timestamp \
                 {genesis}, shanghai at timestamp {shanghai} and cancun at timestamp {cancun}"
            ),
            ForkConfig::default()
                .with_genesis_timestamp(genesis)
                .with_shanghai_timestamp(Some(shanghai))
                .with_cancun_timestamp(Some(cancun)),
        );
        if produce_before_peering > 0 {
            test = test.step(payloads(produce_before_peering, 0));
        }
        test.step(Step::DevP2PCheckForkId(DevP2PCheckForkId { client: 0 }))
    })
    .collect()
}

fn request_blob_pooled_transactions() -> CancunTest {
    CancunTest::new(
        "Request Blob Pooled Transactions",
        "Request a blob transaction from the client's pool over eth/68 and check its \
         network encoding.",
        ForkConfig::default(),
    )
    .steps([
        payloads(1, 0),
        send(1, 1, 1),
        Step::DevP2PRequestPooledTransactionHash(DevP2PRequestPooledTransactionHash {
            client: 0,
            transaction_indexes: vec![0],
            wait_for_new_pooled_tx: true,
        }),
    ])
}
