// tests/orchestrator.rs
//! End-to-end tests for the DID orchestrator against the in-memory ledger
//! and document store, including partial-failure and concurrency scenarios.

use anchored_doc_store::crypto::integrity;
use anchored_doc_store::ledger::CommitmentEvent;
use anchored_doc_store::{
    Commitment, DIDDocument, DidOrchestrator, DocIdHash, DocumentPatch, DocumentStoreAdapter,
    EncryptedPayload, EncryptionKey, IdempotencyKey, InMemoryDocumentStore, InMemoryLedger,
    LedgerAdapter, PayloadHash, PublicKey, RetryPolicy, Service, StoreError,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(8),
    }
}

fn setup() -> (
    Arc<InMemoryLedger>,
    Arc<InMemoryDocumentStore>,
    DidOrchestrator<InMemoryLedger, InMemoryDocumentStore>,
) {
    init_logging();
    let ledger = Arc::new(InMemoryLedger::new());
    let store = Arc::new(InMemoryDocumentStore::new());
    let orchestrator = DidOrchestrator::new(
        Arc::clone(&ledger),
        Arc::clone(&store),
        EncryptionKey::generate(),
    )
    .with_retry_policy(fast_retry());
    (ledger, store, orchestrator)
}

fn sample_document(did: &str) -> DIDDocument {
    let now = Utc::now();
    DIDDocument {
        id: did.to_string(),
        controller: "did:example:controller".to_string(),
        created: now,
        updated: now,
        public_keys: vec![PublicKey {
            id: format!("{}#key-1", did),
            key_type: "Ed25519VerificationKey2020".to_string(),
            controller: "did:example:controller".to_string(),
            public_key_multibase: "z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK".to_string(),
        }],
        services: vec![Service {
            id: format!("{}#agent", did),
            service_type: "DIDCommMessaging".to_string(),
            service_endpoint: "https://agent.example.com".to_string(),
        }],
        proof: None,
    }
}

fn endpoint_patch(did: &str, endpoint: &str) -> DocumentPatch {
    DocumentPatch {
        services: Some(vec![Service {
            id: format!("{}#agent", did),
            service_type: "DIDCommMessaging".to_string(),
            service_endpoint: endpoint.to_string(),
        }]),
        ..Default::default()
    }
}

// Scenario A: create, then resolve returns the identical document at
// nonce 0.
#[tokio::test]
async fn create_then_resolve_returns_identical_document() {
    let (_ledger, _store, orchestrator) = setup();
    let did = "did:example:1";
    let document = sample_document(did);

    let commitment = orchestrator
        .create_did(document.clone(), vec![0x51])
        .await
        .unwrap();
    assert_eq!(commitment.nonce, 0);

    let resolved = orchestrator.resolve_did(did).await.unwrap();
    assert_eq!(resolved.document, document);
    assert_eq!(resolved.nonce, 0);
}

#[tokio::test]
async fn resolve_unknown_did_is_not_found() {
    let (_ledger, _store, orchestrator) = setup();
    let result = orchestrator.resolve_did("did:example:missing").await;
    assert!(matches!(result, Err(StoreError::NotFound)));
}

#[tokio::test]
async fn create_twice_is_a_conflict() {
    let (_ledger, _store, orchestrator) = setup();
    let document = sample_document("did:example:dup");

    orchestrator
        .create_did(document.clone(), vec![])
        .await
        .unwrap();
    let second = orchestrator.create_did(document, vec![]).await;
    assert!(matches!(second, Err(StoreError::Conflict { .. })));
}

#[tokio::test]
async fn create_rejects_malformed_document() {
    let (_ledger, _store, orchestrator) = setup();
    let mut document = sample_document("did:example:bad");
    document.id = "not-a-did".to_string();
    let result = orchestrator.create_did(document, vec![]).await;
    assert!(matches!(result, Err(StoreError::MalformedDocument(_))));
}

// Scenario B: update the service endpoint, resolve reflects it at nonce 1,
// and the superseded payload no longer verifies against the new commitment.
#[tokio::test]
async fn update_replaces_endpoint_and_advances_nonce() {
    let (ledger, store, orchestrator) = setup();
    let did = "did:example:1";
    let doc_id_hash = integrity::hash_doc_id(did);

    orchestrator
        .create_did(sample_document(did), vec![])
        .await
        .unwrap();
    let old_payload = store.get(doc_id_hash).await.unwrap();

    let commitment = orchestrator
        .update_did(did, endpoint_patch(did, "https://new-agent.example.com"), vec![])
        .await
        .unwrap();
    assert_eq!(commitment.nonce, 1);

    let resolved = orchestrator.resolve_did(did).await.unwrap();
    assert_eq!(resolved.nonce, 1);
    assert_eq!(
        resolved.document.services[0].service_endpoint,
        "https://new-agent.example.com"
    );
    // The rest of the document survived the patch.
    assert_eq!(resolved.document.public_keys.len(), 1);
    assert_eq!(resolved.document.id, did);

    // The old payload fails verification against the current commitment.
    let current = ledger.get_commitment(doc_id_hash).await.unwrap();
    assert!(!integrity::verify(&old_payload, &current.payload_hash));
}

#[tokio::test]
async fn update_unknown_did_is_not_found() {
    let (_ledger, _store, orchestrator) = setup();
    let result = orchestrator
        .update_did("did:example:missing", DocumentPatch::default(), vec![])
        .await;
    assert!(matches!(result, Err(StoreError::NotFound)));
}

#[tokio::test]
async fn sequential_updates_produce_gapless_nonces() {
    let (_ledger, _store, orchestrator) = setup();
    let did = "did:example:seq";

    orchestrator
        .create_did(sample_document(did), vec![])
        .await
        .unwrap();
    for expected in 1..=4u64 {
        let endpoint = format!("https://agent-{}.example.com", expected);
        let commitment = orchestrator
            .update_did(did, endpoint_patch(did, &endpoint), vec![])
            .await
            .unwrap();
        assert_eq!(commitment.nonce, expected);
    }
    assert_eq!(orchestrator.resolve_did(did).await.unwrap().nonce, 4);
}

// Scenario C: a single corrupted ciphertext byte surfaces as an integrity
// violation, never as stale or garbage data.
#[tokio::test]
async fn corrupted_ciphertext_is_an_integrity_violation() {
    let (_ledger, store, orchestrator) = setup();
    let did = "did:example:tampered";
    let doc_id_hash = integrity::hash_doc_id(did);

    orchestrator
        .create_did(sample_document(did), vec![])
        .await
        .unwrap();
    assert!(store.corrupt_ciphertext(doc_id_hash));

    let result = orchestrator.resolve_did(did).await;
    match result {
        Err(StoreError::IntegrityViolation { doc_id_hash: hash }) => {
            assert_eq!(hash, doc_id_hash);
        }
        other => panic!("expected IntegrityViolation, got {:?}", other),
    }
}

// Scenario D: the store put fails after the ledger confirmed the
// commitment. Resolve reports DataUnavailable while the divergence lasts;
// once the retried put lands, the same resolve returns the document.
#[tokio::test]
async fn store_failure_after_commit_is_data_unavailable_until_repaired() {
    let (_ledger, store, orchestrator) = setup();
    let did = "did:example:flaky-store";
    let document = sample_document(did);

    // Every put fails for now: inline retries exhaust, repair keeps going.
    store.fail_next_puts(u32::MAX);
    let created = orchestrator.create_did(document.clone(), vec![]).await;
    assert!(matches!(created, Err(StoreError::DataUnavailable { .. })));

    // Existence is governed by the ledger: committed but unavailable,
    // never NotFound, never a fabricated document.
    let unavailable = orchestrator.resolve_did(did).await;
    assert!(matches!(
        unavailable,
        Err(StoreError::DataUnavailable { .. })
    ));

    // The store recovers; the background repair put eventually lands.
    store.fail_next_puts(0);
    let mut resolved = None;
    for _ in 0..500 {
        match orchestrator.resolve_did(did).await {
            Ok(found) => {
                resolved = Some(found);
                break;
            }
            Err(StoreError::DataUnavailable { .. }) => {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Err(other) => panic!("unexpected error while waiting: {:?}", other),
        }
    }
    let resolved = resolved.expect("repair put never landed");
    assert_eq!(resolved.document, document);
    assert_eq!(resolved.nonce, 0);
}

#[tokio::test]
async fn transient_put_failures_are_retried_inline() {
    let (_ledger, store, orchestrator) = setup();
    let did = "did:example:transient";

    // Fewer failures than the retry budget: create succeeds outright.
    store.fail_next_puts(2);
    orchestrator
        .create_did(sample_document(did), vec![])
        .await
        .unwrap();
    assert_eq!(orchestrator.resolve_did(did).await.unwrap().nonce, 0);
}

// A payload with no ledger commitment should never exist; resolve fails
// closed instead of guessing.
#[tokio::test]
async fn store_ahead_of_ledger_is_inconsistent_state() {
    let (_ledger, store, orchestrator) = setup();
    let did = "did:example:orphan";
    let doc_id_hash = integrity::hash_doc_id(did);

    let key = EncryptionKey::generate();
    let payload =
        anchored_doc_store::crypto::encryption::encrypt(&key, b"orphaned bytes").unwrap();
    store.put(doc_id_hash, payload).await.unwrap();

    let result = orchestrator.resolve_did(did).await;
    assert!(matches!(
        result,
        Err(StoreError::InconsistentState { .. })
    ));
}

/// Ledger wrapper that lets a competing writer land between the
/// orchestrator's read of the current nonce and its update submission.
struct RacingLedger {
    inner: Arc<InMemoryLedger>,
    race_armed: AtomicBool,
}

impl RacingLedger {
    fn new(inner: Arc<InMemoryLedger>) -> Self {
        RacingLedger {
            inner,
            race_armed: AtomicBool::new(false),
        }
    }

    fn arm(&self) {
        self.race_armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerAdapter for RacingLedger {
    async fn create_commitment(
        &self,
        doc_id_hash: DocIdHash,
        payload_hash: PayloadHash,
        signature: Vec<u8>,
    ) -> Result<Commitment, StoreError> {
        self.inner
            .create_commitment(doc_id_hash, payload_hash, signature)
            .await
    }

    async fn update_commitment(
        &self,
        doc_id_hash: DocIdHash,
        payload_hash: PayloadHash,
        signature: Vec<u8>,
        nonce: u64,
        idempotency_key: IdempotencyKey,
    ) -> Result<Commitment, StoreError> {
        if self.race_armed.swap(false, Ordering::SeqCst) {
            // The concurrent writer wins the race for the same nonce.
            self.inner
                .update_commitment(
                    doc_id_hash,
                    PayloadHash([0xee; 32]),
                    vec![0xee],
                    nonce,
                    IdempotencyKey {
                        doc_id_hash,
                        proposed_nonce: nonce,
                    },
                )
                .await?;
        }
        self.inner
            .update_commitment(doc_id_hash, payload_hash, signature, nonce, idempotency_key)
            .await
    }

    async fn get_commitment(&self, doc_id_hash: DocIdHash) -> Result<Commitment, StoreError> {
        self.inner.get_commitment(doc_id_hash).await
    }

    fn subscribe(&self, doc_id_hash: DocIdHash) -> anchored_doc_store::CommitmentEvents {
        self.inner.subscribe(doc_id_hash)
    }
}

// No lost update: of two writers computing against the same nonce, exactly
// one wins; the loser gets a Conflict carrying the reconciled nonce and no
// silent overwrite happens.
#[tokio::test]
async fn concurrent_update_loser_gets_conflict_with_fresh_nonce() {
    init_logging();
    let inner = Arc::new(InMemoryLedger::new());
    let ledger = Arc::new(RacingLedger::new(Arc::clone(&inner)));
    let store = Arc::new(InMemoryDocumentStore::new());
    let orchestrator = DidOrchestrator::new(
        Arc::clone(&ledger),
        Arc::clone(&store),
        EncryptionKey::generate(),
    )
    .with_retry_policy(fast_retry());

    let did = "did:example:raced";
    orchestrator
        .create_did(sample_document(did), vec![])
        .await
        .unwrap();

    ledger.arm();
    let result = orchestrator
        .update_did(did, endpoint_patch(did, "https://loser.example.com"), vec![])
        .await;
    match result {
        Err(StoreError::Conflict {
            current_nonce,
            proposed_nonce,
        }) => {
            // The competitor moved the document to nonce 1 first.
            assert_eq!(current_nonce, 1);
            assert_eq!(proposed_nonce, 1);
        }
        other => panic!("expected Conflict, got {:?}", other),
    }

    // The winner's commitment is untouched by the losing writer.
    let current = inner
        .get_commitment(integrity::hash_doc_id(did))
        .await
        .unwrap();
    assert_eq!(current.nonce, 1);
    assert_eq!(current.payload_hash, PayloadHash([0xee; 32]));
}

/// Ledger wrapper whose reads stall, for deadline tests.
struct SlowLedger {
    inner: Arc<InMemoryLedger>,
    delay: Duration,
}

#[async_trait]
impl LedgerAdapter for SlowLedger {
    async fn create_commitment(
        &self,
        doc_id_hash: DocIdHash,
        payload_hash: PayloadHash,
        signature: Vec<u8>,
    ) -> Result<Commitment, StoreError> {
        self.inner
            .create_commitment(doc_id_hash, payload_hash, signature)
            .await
    }

    async fn update_commitment(
        &self,
        doc_id_hash: DocIdHash,
        payload_hash: PayloadHash,
        signature: Vec<u8>,
        nonce: u64,
        idempotency_key: IdempotencyKey,
    ) -> Result<Commitment, StoreError> {
        self.inner
            .update_commitment(doc_id_hash, payload_hash, signature, nonce, idempotency_key)
            .await
    }

    async fn get_commitment(&self, doc_id_hash: DocIdHash) -> Result<Commitment, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_commitment(doc_id_hash).await
    }

    fn subscribe(&self, doc_id_hash: DocIdHash) -> anchored_doc_store::CommitmentEvents {
        self.inner.subscribe(doc_id_hash)
    }
}

#[tokio::test]
async fn slow_ledger_hits_operation_timeout() {
    init_logging();
    let ledger = Arc::new(SlowLedger {
        inner: Arc::new(InMemoryLedger::new()),
        delay: Duration::from_millis(200),
    });
    let store = Arc::new(InMemoryDocumentStore::new());
    let orchestrator =
        DidOrchestrator::new(ledger, store, EncryptionKey::generate())
            .with_timeout(Duration::from_millis(20));

    let result = orchestrator.resolve_did("did:example:slow").await;
    assert!(matches!(result, Err(StoreError::Timeout)));
}

// Operations on distinct identifiers are independent and safe in parallel.
#[tokio::test]
async fn independent_identifiers_run_in_parallel() {
    init_logging();
    let ledger = Arc::new(InMemoryLedger::new());
    let store = Arc::new(InMemoryDocumentStore::new());
    let orchestrator = Arc::new(DidOrchestrator::new(
        Arc::clone(&ledger),
        Arc::clone(&store),
        EncryptionKey::generate(),
    ));

    let mut handles = Vec::new();
    for i in 0..8 {
        let orchestrator = Arc::clone(&orchestrator);
        handles.push(tokio::spawn(async move {
            let did = format!("did:example:parallel-{}", i);
            orchestrator
                .create_did(sample_document(&did), vec![i as u8])
                .await
                .unwrap();
            orchestrator.resolve_did(&did).await.unwrap()
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let resolved = handle.await.unwrap();
        assert_eq!(resolved.document.id, format!("did:example:parallel-{}", i));
        assert_eq!(resolved.nonce, 0);
    }
}

/// Store wrapper with a per-call stall schedule and lost-acknowledgement
/// injection: a put with a lost ack is applied by the backing store but
/// still reported as a transport failure, as a remote store may do.
struct UnreliableStore {
    inner: Arc<InMemoryDocumentStore>,
    stalls: Mutex<VecDeque<Duration>>,
    lost_acks: AtomicU32,
}

impl UnreliableStore {
    fn new(inner: Arc<InMemoryDocumentStore>) -> Self {
        UnreliableStore {
            inner,
            stalls: Mutex::new(VecDeque::new()),
            lost_acks: AtomicU32::new(0),
        }
    }

    /// Queues a stall consumed by the next `put` call.
    fn push_stall(&self, delay: Duration) {
        self.stalls.lock().unwrap().push_back(delay);
    }

    /// The next `count` puts apply their payload but report failure.
    fn lose_next_acks(&self, count: u32) {
        self.lost_acks.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStoreAdapter for UnreliableStore {
    async fn put(
        &self,
        doc_id_hash: DocIdHash,
        payload: EncryptedPayload,
    ) -> Result<(), StoreError> {
        let stall = self.stalls.lock().unwrap().pop_front();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        self.inner.put(doc_id_hash, payload).await?;
        if self.lost_acks.load(Ordering::SeqCst) > 0 {
            self.lost_acks.fetch_sub(1, Ordering::SeqCst);
            return Err(StoreError::Store("acknowledgement lost".to_string()));
        }
        Ok(())
    }

    async fn get(&self, doc_id_hash: DocIdHash) -> Result<EncryptedPayload, StoreError> {
        self.inner.get(doc_id_hash).await
    }
}

// A resolve racing an in-flight update waits for the write to settle and
// returns the updated document; the commitment-confirmed-payload-pending
// window must never surface as an integrity violation.
#[tokio::test]
async fn resolve_waits_out_an_in_flight_update() {
    init_logging();
    let store = Arc::new(UnreliableStore::new(Arc::new(InMemoryDocumentStore::new())));
    let ledger = Arc::new(InMemoryLedger::new());
    let orchestrator = Arc::new(
        DidOrchestrator::new(
            Arc::clone(&ledger),
            Arc::clone(&store),
            EncryptionKey::generate(),
        )
        .with_retry_policy(fast_retry()),
    );

    let did = "did:example:read-write-race";
    orchestrator
        .create_did(sample_document(did), vec![])
        .await
        .unwrap();

    // The update's payload write hangs long enough for the resolve below
    // to land squarely between its ledger write and its store write.
    store.push_stall(Duration::from_millis(150));
    let updater = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            orchestrator
                .update_did(did, endpoint_patch(did, "https://settled.example.com"), vec![])
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let resolved = orchestrator.resolve_did(did).await.unwrap();
    assert_eq!(resolved.nonce, 1);
    assert_eq!(
        resolved.document.services[0].service_endpoint,
        "https://settled.example.com"
    );
    updater.await.unwrap().unwrap();
}

// An applied-but-unacknowledged put leaves a repair task running; when a
// later update supersedes the payload, the repair must not re-write its
// stale payload over the newer one.
#[tokio::test]
async fn repair_task_never_clobbers_a_later_update() {
    init_logging();
    let inner_store = Arc::new(InMemoryDocumentStore::new());
    let store = Arc::new(UnreliableStore::new(Arc::clone(&inner_store)));
    let ledger = Arc::new(InMemoryLedger::new());
    let orchestrator = DidOrchestrator::new(
        Arc::clone(&ledger),
        Arc::clone(&store),
        EncryptionKey::generate(),
    )
    .with_retry_policy(fast_retry());

    let did = "did:example:ambiguous-ack";
    let doc_id_hash = integrity::hash_doc_id(did);

    // Every inline attempt applies its payload yet reports failure, so
    // create ends committed-but-unavailable with a repair task pending
    // even though the payload actually landed.
    store.lose_next_acks(fast_retry().max_attempts);
    let created = orchestrator.create_did(sample_document(did), vec![]).await;
    assert!(matches!(created, Err(StoreError::DataUnavailable { .. })));

    // The repair's re-put is slower than the update's put, so an unlocked
    // check-then-put would apply the stale payload last.
    store.push_stall(Duration::from_millis(60));
    store.push_stall(Duration::from_millis(5));
    tokio::time::sleep(Duration::from_millis(1)).await;

    let commitment = orchestrator
        .update_did(did, endpoint_patch(did, "https://survivor.example.com"), vec![])
        .await
        .unwrap();
    assert_eq!(commitment.nonce, 1);

    // Let any remaining repair attempt settle.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let current = ledger.get_commitment(doc_id_hash).await.unwrap();
    let stored = inner_store.get(doc_id_hash).await.unwrap();
    assert!(integrity::verify(&stored, &current.payload_hash));

    let resolved = orchestrator.resolve_did(did).await.unwrap();
    assert_eq!(resolved.nonce, 1);
    assert_eq!(
        resolved.document.services[0].service_endpoint,
        "https://survivor.example.com"
    );
}

// The deadline covers the pre-confirmation phase only. A store put that
// outlives the deadline after the ledger confirmed still completes instead
// of stranding the document committed-but-unavailable with no repair.
#[tokio::test]
async fn slow_put_after_ledger_confirmation_is_not_cut_off_by_deadline() {
    init_logging();
    let store = Arc::new(UnreliableStore::new(Arc::new(InMemoryDocumentStore::new())));
    let ledger = Arc::new(InMemoryLedger::new());
    let orchestrator = DidOrchestrator::new(
        Arc::clone(&ledger),
        Arc::clone(&store),
        EncryptionKey::generate(),
    )
    .with_retry_policy(fast_retry())
    .with_timeout(Duration::from_millis(40));

    let did = "did:example:slow-put";
    let document = sample_document(did);
    store.push_stall(Duration::from_millis(120));

    let commitment = orchestrator
        .create_did(document.clone(), vec![])
        .await
        .unwrap();
    assert_eq!(commitment.nonce, 0);

    let resolved = orchestrator.resolve_did(did).await.unwrap();
    assert_eq!(resolved.document, document);
    assert_eq!(resolved.nonce, 0);
}

// The commitment event feed delivers per-identifier events in commit order
// and can be cancelled at any time.
#[tokio::test]
async fn event_feed_reports_create_and_update_in_order() {
    let (_ledger, _store, orchestrator) = setup();
    let did = "did:example:events";

    let mut events = orchestrator.subscribe(did);

    orchestrator
        .create_did(sample_document(did), vec![])
        .await
        .unwrap();
    orchestrator
        .update_did(did, endpoint_patch(did, "https://next.example.com"), vec![])
        .await
        .unwrap();

    match events.recv().await.unwrap() {
        CommitmentEvent::Created(commitment) => assert_eq!(commitment.nonce, 0),
        other => panic!("expected Created, got {:?}", other),
    }
    match events.recv().await.unwrap() {
        CommitmentEvent::Updated(commitment) => assert_eq!(commitment.nonce, 1),
        other => panic!("expected Updated, got {:?}", other),
    }
    events.unsubscribe();
}
