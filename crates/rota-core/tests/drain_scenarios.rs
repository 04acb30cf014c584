//! End-to-end capture and drain scenarios against in-memory remotes.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rota_core::models::{PhotoAsset, RemoteOrder};
use rota_core::remote::MemoryLedger;
use rota_core::storage::MemoryAssetStore;
use rota_core::{
    ActionFields, ActionKind, CaptureRequest, CourierQueue, OrderStatus, ReceiverType,
    SyncSettings, SyncState,
};

const COURIER: &str = "courier-7";

type Queue = CourierQueue<Arc<MemoryLedger>, Arc<MemoryAssetStore>>;

struct Scenario {
    _dir: tempfile::TempDir,
    db_path: std::path::PathBuf,
    settings: SyncSettings,
    photo_path: String,
    ledger: Arc<MemoryLedger>,
    store: Arc<MemoryAssetStore>,
    queue: Queue,
}

impl Scenario {
    async fn new() -> Self {
        Self::with_settings(SyncSettings::default()).await
    }

    async fn with_settings(settings: SyncSettings) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("rota.db");
        let photo_path = dir.path().join("photo.jpg");
        std::fs::write(&photo_path, b"jpeg-bytes").unwrap();

        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryAssetStore::new());
        let queue = open(&db_path, &ledger, &store, &settings).await;
        Self {
            _dir: dir,
            db_path,
            settings,
            photo_path: photo_path.to_string_lossy().into_owned(),
            ledger,
            store,
            queue,
        }
    }

    /// Simulate a process restart on the same database file.
    async fn restart(&mut self) {
        self.queue = open(&self.db_path, &self.ledger, &self.store, &self.settings).await;
    }

    fn delivery(&self, barcode: &str, receiver: &str) -> CaptureRequest {
        CaptureRequest {
            barcode: barcode.to_string(),
            expected_barcode: Some(barcode.to_string()),
            kind: ActionKind::Delivery,
            fields: ActionFields::Receiver {
                receiver_name: receiver.to_string(),
                receiver_type: ReceiverType::Family,
            },
            photo_path: Some(self.photo_path.clone()),
        }
    }

    fn return_to_sender(&self, barcode: &str) -> CaptureRequest {
        CaptureRequest {
            barcode: barcode.to_string(),
            expected_barcode: None,
            kind: ActionKind::Return,
            fields: ActionFields::Receiver {
                receiver_name: "Depot".to_string(),
                receiver_type: ReceiverType::Recipient,
            },
            photo_path: Some(self.photo_path.clone()),
        }
    }
}

async fn open(
    db_path: &std::path::Path,
    ledger: &Arc<MemoryLedger>,
    store: &Arc<MemoryAssetStore>,
    settings: &SyncSettings,
) -> Queue {
    CourierQueue::open_path(
        db_path,
        Arc::clone(ledger),
        Arc::clone(store),
        settings.clone(),
        COURIER,
    )
    .await
    .unwrap()
}

fn collection(barcode: &str) -> CaptureRequest {
    CaptureRequest {
        barcode: barcode.to_string(),
        expected_barcode: None,
        kind: ActionKind::Collection,
        fields: ActionFields::Empty,
        photo_path: None,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_delivery_syncs_once_connectivity_returns() {
    let mut scenario = Scenario::new().await;
    scenario
        .queue
        .enqueue(scenario.delivery("ABC12345", "Maria"))
        .await
        .unwrap();
    assert!(scenario.queue.is_handled("ABC12345"));

    // Captured while offline: the queue survives a restart.
    scenario.restart().await;
    assert_eq!(scenario.queue.list().await.unwrap().len(), 1);
    assert!(scenario.queue.is_handled("ABC12345"));

    scenario.ledger.insert("ABC12345", OrderStatus::EmRota);
    let report = scenario.queue.drain().await.unwrap();

    assert_eq!(report.applied.len(), 1);
    assert_eq!(
        scenario.ledger.status("ABC12345"),
        Some(OrderStatus::Entregue)
    );
    assert!(scenario.queue.list().await.unwrap().is_empty());
    let entry = scenario.queue.handled_entry("ABC12345").unwrap();
    assert!(entry.remotely_synced);

    let writes = scenario.ledger.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(
        writes[0].fields,
        ActionFields::Receiver {
            receiver_name: "Maria".to_string(),
            receiver_type: ReceiverType::Family,
        }
    );
    assert_eq!(
        writes[0].photo_ref.as_ref().map(|r| r.as_str().to_string()),
        Some("memory://entregas/ABC12345-delivery.jpg".to_string())
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn delivery_then_return_keeps_only_the_delivery() {
    let scenario = Scenario::new().await;
    scenario.ledger.insert("XYZ99999", OrderStatus::EmRota);
    scenario
        .queue
        .enqueue(scenario.delivery("XYZ99999", "Maria"))
        .await
        .unwrap();
    scenario
        .queue
        .enqueue(scenario.return_to_sender("XYZ99999"))
        .await
        .unwrap();

    let report = scenario.queue.drain().await.unwrap();

    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.applied[0].kind, ActionKind::Delivery);
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].kind, ActionKind::Return);
    assert_eq!(scenario.ledger.writes().len(), 1);
    assert_eq!(
        scenario.ledger.status("XYZ99999"),
        Some(OrderStatus::Entregue)
    );
    assert!(scenario.queue.list().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn recapture_before_sync_writes_once_with_latest_fields() {
    let scenario = Scenario::new().await;
    scenario.ledger.insert("ABC12345", OrderStatus::EmRota);
    let first = scenario
        .queue
        .enqueue(scenario.delivery("ABC12345", "Maria"))
        .await
        .unwrap();
    let second = scenario
        .queue
        .enqueue(scenario.delivery("ABC12345", "João"))
        .await
        .unwrap();
    assert_eq!(first, second);

    scenario.queue.drain().await.unwrap();

    let writes = scenario.ledger.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(
        writes[0].fields,
        ActionFields::Receiver {
            receiver_name: "João".to_string(),
            receiver_type: ReceiverType::Family,
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_already_at_target_is_skipped_without_write() {
    let scenario = Scenario::new().await;
    scenario.ledger.insert("COL00001", OrderStatus::Coletado);
    scenario.queue.enqueue(collection("COL00001")).await.unwrap();

    let report = scenario.queue.drain().await.unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert!(scenario.ledger.writes().is_empty());
    assert!(scenario.queue.list().await.unwrap().is_empty());
    assert!(scenario
        .queue
        .handled_entry("COL00001")
        .unwrap()
        .remotely_synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn different_terminal_status_is_a_conflict() {
    let scenario = Scenario::new().await;
    scenario.ledger.insert("ABC12345", OrderStatus::Devolvido);
    scenario
        .queue
        .enqueue(scenario.delivery("ABC12345", "Maria"))
        .await
        .unwrap();

    let report = scenario.queue.drain().await.unwrap();

    assert_eq!(report.conflicts.len(), 1);
    assert!(report.conflicts[0].detail.contains("devolvido"));
    assert!(scenario.ledger.writes().is_empty());
    assert!(scenario.queue.list().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn uploaded_photo_is_not_uploaded_again_after_restart() {
    let mut scenario = Scenario::with_settings(SyncSettings {
        backoff_base_ms: 0,
        backoff_max_ms: 0,
        ..SyncSettings::default()
    })
    .await;
    scenario
        .queue
        .enqueue(scenario.delivery("ABC12345", "Maria"))
        .await
        .unwrap();

    // Upload succeeds, then the lookup fails: the photo ref is kept.
    scenario.ledger.set_offline(true);
    let report = scenario.queue.drain().await.unwrap();
    assert_eq!(report.retrying.len(), 1);
    assert_eq!(scenario.store.put_count(), 1);
    let record = &scenario.queue.list().await.unwrap()[0];
    assert!(record.photo.as_ref().is_some_and(PhotoAsset::is_uploaded));

    scenario.restart().await;
    scenario.ledger.set_offline(false);
    scenario.ledger.insert("ABC12345", OrderStatus::EmRota);

    let report = scenario.queue.drain().await.unwrap();
    assert_eq!(report.applied.len(), 1);
    assert_eq!(scenario.store.put_count(), 1);
    assert_eq!(scenario.ledger.writes().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn mixed_queue_drains_to_empty() {
    let scenario = Scenario::new().await;
    scenario.ledger.insert("AAA11111", OrderStatus::EmRota);
    scenario.ledger.insert("BBB22222", OrderStatus::AguardandoColeta);
    scenario.ledger.insert_order(RemoteOrder {
        barcode: "CCC33333".to_string(),
        status: OrderStatus::EmRota,
        assigned_courier: Some(COURIER.to_string()),
        updated_at: None,
    });
    scenario.ledger.insert("DDD44444", OrderStatus::Entregue);

    scenario
        .queue
        .enqueue(scenario.delivery("AAA11111", "Ana"))
        .await
        .unwrap();
    scenario.queue.enqueue(collection("BBB22222")).await.unwrap();
    scenario
        .queue
        .enqueue(CaptureRequest {
            barcode: "CCC33333".to_string(),
            expected_barcode: None,
            kind: ActionKind::FailedAttempt,
            fields: ActionFields::Failure {
                reason: "ninguém em casa".to_string(),
            },
            photo_path: None,
        })
        .await
        .unwrap();
    scenario
        .queue
        .enqueue(scenario.delivery("DDD44444", "Rui"))
        .await
        .unwrap();

    let report = scenario.queue.drain().await.unwrap();

    assert_eq!(report.applied.len(), 3);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.failed.is_empty());
    assert!(scenario.queue.list().await.unwrap().is_empty());
    assert_eq!(
        scenario.ledger.status("CCC33333"),
        Some(OrderStatus::TentativaFalha)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn interrupted_apply_is_recovered_on_restart() {
    let mut scenario = Scenario::new().await;
    scenario.ledger.insert("COL00001", OrderStatus::AguardandoColeta);
    scenario.queue.enqueue(collection("COL00001")).await.unwrap();

    // A crash mid-apply leaves the row in `applying`.
    {
        let db = rota_core::db::Database::open(&scenario.db_path).await.unwrap();
        db.connection()
            .execute("UPDATE action_queue SET sync_state = 'applying'", ())
            .await
            .unwrap();
    }

    scenario.restart().await;
    assert_eq!(
        scenario.queue.list().await.unwrap()[0].sync_state,
        SyncState::Pending
    );
    let report = scenario.queue.drain().await.unwrap();
    assert_eq!(report.applied.len(), 1);
}
