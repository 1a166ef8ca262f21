//! Idempotent ingestion controller — orchestrates one inbound update
//! through resolve → extract → validate → persist → reply.
//!
//! Each update's pipeline runs RECEIVED → RESOLVING → EXTRACTING →
//! VALIDATING → PERSISTING → REPLIED, with redelivery dedup handled by
//! the persisted attempt ledger, not in-memory locks, so correctness
//! survives process restarts mid-pipeline.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channels::update::{ImageRef, IncomingMessage, UpdateEnvelope};
use crate::channels::Transport;
use crate::error::ExtractionError;
use crate::extract::{Extractor, TextCommandParser, TransactionDraft};
use crate::ingest::reply;
use crate::ingest::validate::{validate, ValidationContext};
use crate::store::{AttemptClaim, Database, Tenant, TransactionRecord};
use crate::tenant::TenantResolver;

/// What the webhook should tell the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Done with this delivery — do not redeliver.
    Ack,
    /// The failure was transient — invite redelivery.
    Redeliver,
}

/// A step failure, classified for the acknowledgment decision.
enum StepFailure {
    /// Infra trouble; a redelivery may succeed.
    Transient(String),
    /// Retrying the same input won't change the outcome.
    Permanent {
        detail: String,
        user_message: &'static str,
    },
}

/// The ingestion pipeline, one instance per process.
pub struct IngestionController {
    db: Arc<dyn Database>,
    resolver: TenantResolver,
    extractor: Arc<dyn Extractor>,
    transport: Arc<dyn Transport>,
    text_parser: TextCommandParser,
}

impl IngestionController {
    pub fn new(
        db: Arc<dyn Database>,
        extractor: Arc<dyn Extractor>,
        transport: Arc<dyn Transport>,
        default_currency: String,
    ) -> Self {
        let resolver = TenantResolver::new(Arc::clone(&db), default_currency);
        Self {
            db,
            resolver,
            extractor,
            transport,
            text_parser: TextCommandParser::new(),
        }
    }

    /// Process one inbound update end to end.
    ///
    /// Never panics and never surfaces raw errors to the transport —
    /// the return value is the whole contract.
    pub async fn handle(&self, update: UpdateEnvelope) -> AckDecision {
        let Some(message) = update.message else {
            debug!(update_id = update.update_id, "Update without message, ignoring");
            return AckDecision::Ack;
        };

        let Some(sender_id) = message.from.as_ref().map(|f| f.id.to_string()) else {
            warn!(
                update_id = update.update_id,
                message_id = message.message_id,
                "Message without sender, ignoring"
            );
            return AckDecision::Ack;
        };

        self.process_message(&sender_id, &message).await
    }

    async fn process_message(&self, sender_id: &str, msg: &IncomingMessage) -> AckDecision {
        let chat_id = msg.chat.id.to_string();
        let source_message_id = msg.message_id.to_string();

        debug!(sender_id, %source_message_id, state = "resolving", "Processing update");
        let tenant = match self.resolver.resolve(sender_id, msg.display_name()).await {
            Ok(tenant) => tenant,
            Err(e) => {
                warn!(sender_id, error = %e, "Tenant resolution failed, inviting redelivery");
                return AckDecision::Redeliver;
            }
        };

        let image = msg.image_attachment();
        let has_text = msg
            .text
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());

        if image.is_none() && !has_text {
            self.send_best_effort(&chat_id, reply::HELP).await;
            return AckDecision::Ack;
        }

        // Dedup before any side effect: claim the delivery key.
        match self.db.begin_attempt(&tenant.id, &source_message_id).await {
            Ok(AttemptClaim::Claimed) => {}
            Ok(AttemptClaim::AlreadySucceeded { .. }) => {
                debug!(
                    tenant_id = %tenant.id,
                    %source_message_id,
                    "Redelivery of a succeeded attempt, replaying confirmation"
                );
                self.replay_confirmation(&tenant, &source_message_id, &chat_id)
                    .await;
                return AckDecision::Ack;
            }
            Ok(AttemptClaim::InProgress) => {
                debug!(
                    tenant_id = %tenant.id,
                    %source_message_id,
                    "Concurrent redelivery while attempt is in progress, acking"
                );
                return AckDecision::Ack;
            }
            Ok(AttemptClaim::AlreadyFailed) => {
                debug!(
                    tenant_id = %tenant.id,
                    %source_message_id,
                    "Redelivery of a permanently failed attempt, acking"
                );
                return AckDecision::Ack;
            }
            Err(e) => {
                warn!(error = %e, "Attempt ledger unavailable, inviting redelivery");
                return AckDecision::Redeliver;
            }
        }

        match self
            .run_pipeline(&tenant, msg, image, &source_message_id, &chat_id)
            .await
        {
            Ok(record) => {
                // The row is committed; ledger bookkeeping and the reply
                // are best-effort. A crash here means a redelivery hits
                // the unique constraint and recovers.
                if let Err(e) = self
                    .db
                    .mark_attempt_succeeded(&tenant.id, &source_message_id, &record.id)
                    .await
                {
                    warn!(error = %e, "Failed to record attempt success");
                }
                info!(
                    tenant_id = %tenant.id,
                    transaction_id = %record.id,
                    amount = %record.amount,
                    currency = %record.currency,
                    state = "replied",
                    "Transaction ingested"
                );
                self.send_best_effort(&chat_id, &reply::confirmation(&record))
                    .await;
                AckDecision::Ack
            }
            Err(StepFailure::Transient(reason)) => {
                warn!(
                    tenant_id = %tenant.id,
                    %source_message_id,
                    %reason,
                    "Transient pipeline failure, releasing claim"
                );
                if let Err(e) = self.db.release_attempt(&tenant.id, &source_message_id).await {
                    warn!(error = %e, "Failed to release attempt claim");
                }
                AckDecision::Redeliver
            }
            Err(StepFailure::Permanent {
                detail,
                user_message,
            }) => {
                info!(
                    tenant_id = %tenant.id,
                    %source_message_id,
                    %detail,
                    "Permanent pipeline failure, notifying user"
                );
                if let Err(e) = self
                    .db
                    .mark_attempt_failed(&tenant.id, &source_message_id, &detail)
                    .await
                {
                    warn!(error = %e, "Failed to record attempt failure");
                }
                self.send_best_effort(&chat_id, user_message).await;
                AckDecision::Ack
            }
        }
    }

    /// The claimed pipeline: extract → validate → persist.
    async fn run_pipeline(
        &self,
        tenant: &Tenant,
        msg: &IncomingMessage,
        image: Option<ImageRef>,
        source_message_id: &str,
        chat_id: &str,
    ) -> Result<TransactionRecord, StepFailure> {
        debug!(tenant_id = %tenant.id, state = "extracting", "Building draft");
        let draft = match image {
            Some(image) => self.extract_from_image(&image, chat_id).await?,
            None => self.parse_text_command(msg)?,
        };

        debug!(tenant_id = %tenant.id, state = "validating", "Validating draft");
        let ctx = ValidationContext {
            received_at: msg.received_at(),
            default_currency: tenant.default_currency.clone(),
        };
        let validated = validate(draft, &ctx).map_err(|e| StepFailure::Permanent {
            detail: e.to_string(),
            user_message: reply::validation_failure(&e),
        })?;

        debug!(tenant_id = %tenant.id, state = "persisting", "Storing transaction");
        match self
            .db
            .insert_transaction(&tenant.id, source_message_id, &validated)
            .await
        {
            Ok(record) => Ok(record),
            Err(e) if e.is_conflict() => {
                // An earlier pipeline for this key already committed —
                // the unique constraint is the backstop. Serve its row.
                debug!(
                    tenant_id = %tenant.id,
                    %source_message_id,
                    "Insert conflicted with an existing row, treating as success"
                );
                self.db
                    .get_transaction_by_source(&tenant.id, source_message_id)
                    .await
                    .ok()
                    .flatten()
                    .ok_or_else(|| {
                        StepFailure::Transient("conflicting row vanished".to_string())
                    })
            }
            Err(e) => Err(StepFailure::Transient(e.to_string())),
        }
    }

    async fn extract_from_image(
        &self,
        image: &ImageRef,
        chat_id: &str,
    ) -> Result<TransactionDraft, StepFailure> {
        self.send_best_effort(chat_id, reply::PROCESSING).await;

        let bytes = self
            .transport
            .download_file(&image.file_id)
            .await
            .map_err(|e| StepFailure::Transient(e.to_string()))?;

        self.extractor
            .extract(&bytes, &image.mime_type)
            .await
            .map_err(|e| match e {
                ExtractionError::Transient { reason } => StepFailure::Transient(reason),
                ExtractionError::Permanent { reason }
                | ExtractionError::SchemaMismatch { reason } => StepFailure::Permanent {
                    detail: reason,
                    user_message: reply::UNREADABLE_IMAGE,
                },
            })
    }

    fn parse_text_command(&self, msg: &IncomingMessage) -> Result<TransactionDraft, StepFailure> {
        let text = msg.text.as_deref().unwrap_or_default();
        self.text_parser
            .parse(text)
            .ok_or_else(|| StepFailure::Permanent {
                detail: format!("unrecognized text command: {text}"),
                user_message: reply::USAGE_HINT,
            })
    }

    /// Re-send the confirmation for an already-persisted delivery.
    async fn replay_confirmation(&self, tenant: &Tenant, source_message_id: &str, chat_id: &str) {
        match self
            .db
            .get_transaction_by_source(&tenant.id, source_message_id)
            .await
        {
            Ok(Some(record)) => {
                self.send_best_effort(chat_id, &reply::confirmation(&record))
                    .await;
            }
            Ok(None) => warn!(
                tenant_id = %tenant.id,
                %source_message_id,
                "Succeeded attempt has no transaction row"
            ),
            Err(e) => warn!(error = %e, "Failed to load stored transaction for replay"),
        }
    }

    /// Replies are benign side effects — log and move on when they fail.
    async fn send_best_effort(&self, chat_id: &str, text: &str) {
        if let Err(e) = self.transport.send_message(chat_id, text).await {
            warn!(chat_id, error = %e, "Failed to send reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use crate::extract::NullExtractor;
    use crate::store::{LibSqlBackend, TransactionFilter};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    /// Transport fake that records outbound messages.
    struct RecordingTransport {
        sent: Mutex<Vec<(String, String)>>,
        fail_downloads: bool,
    }

    impl RecordingTransport {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_downloads: false,
            }
        }

        fn failing_downloads() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_downloads: true,
            }
        }

        fn sent_texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, text)| text.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
            self.sent
                .lock()
                .unwrap()
                .push((chat_id.to_string(), text.to_string()));
            Ok(())
        }

        async fn download_file(&self, file_ref: &str) -> Result<Vec<u8>, ChannelError> {
            if self.fail_downloads {
                Err(ChannelError::DownloadFailed {
                    file_ref: file_ref.into(),
                    reason: "simulated outage".into(),
                })
            } else {
                Ok(b"image-bytes".to_vec())
            }
        }
    }

    struct Harness {
        controller: IngestionController,
        db: Arc<dyn Database>,
        transport: Arc<RecordingTransport>,
    }

    async fn harness(extractor: NullExtractor, transport: RecordingTransport) -> Harness {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let transport = Arc::new(transport);
        let controller = IngestionController::new(
            Arc::clone(&db),
            Arc::new(extractor),
            transport.clone(),
            "INR".to_string(),
        );
        Harness {
            controller,
            db,
            transport,
        }
    }

    fn photo_update(update_id: i64, sender: i64, message_id: i64) -> UpdateEnvelope {
        serde_json::from_value(serde_json::json!({
            "update_id": update_id,
            "message": {
                "message_id": message_id,
                "from": {"id": sender, "first_name": "Asha"},
                "chat": {"id": sender},
                "date": 1700000000,
                "photo": [{"file_id": "photo-1", "width": 1280, "height": 960}]
            }
        }))
        .unwrap()
    }

    fn text_update(update_id: i64, sender: i64, message_id: i64, text: &str) -> UpdateEnvelope {
        serde_json::from_value(serde_json::json!({
            "update_id": update_id,
            "message": {
                "message_id": message_id,
                "from": {"id": sender, "first_name": "Asha"},
                "chat": {"id": sender},
                "date": 1700000000,
                "text": text
            }
        }))
        .unwrap()
    }

    async fn tenant_rows(h: &Harness, sender: i64) -> Vec<crate::store::TransactionRecord> {
        let tenant = h
            .db
            .get_tenant_by_external_id(&sender.to_string())
            .await
            .unwrap()
            .unwrap();
        h.db.list_transactions(&tenant.id, &TransactionFilter::default())
            .await
            .unwrap()
    }

    // ── Happy path ──────────────────────────────────────────────────

    #[tokio::test]
    async fn clean_receipt_is_tracked() {
        let h = harness(NullExtractor::default(), RecordingTransport::new()).await;

        let ack = h.controller.handle(photo_update(1, 1001, 42)).await;
        assert_eq!(ack, AckDecision::Ack);

        let rows = tenant_rows(&h, 1001).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, dec!(450));
        assert_eq!(rows[0].source_message_id, "42");

        let texts = h.transport.sent_texts();
        assert_eq!(texts.first().map(String::as_str), Some(reply::PROCESSING));
        assert_eq!(
            texts.last().map(String::as_str),
            Some("Tracked 450 INR at Starbucks (Coffee)")
        );
    }

    #[tokio::test]
    async fn redelivery_after_success_replays_reply() {
        let h = harness(NullExtractor::default(), RecordingTransport::new()).await;

        h.controller.handle(photo_update(1, 1001, 42)).await;
        let ack = h.controller.handle(photo_update(2, 1001, 42)).await;
        assert_eq!(ack, AckDecision::Ack);

        let rows = tenant_rows(&h, 1001).await;
        assert_eq!(rows.len(), 1, "redelivery must not duplicate the row");

        let texts = h.transport.sent_texts();
        let confirmations = texts
            .iter()
            .filter(|t| t.starts_with("Tracked 450"))
            .count();
        assert_eq!(confirmations, 2, "second delivery replays the confirmation");
    }

    #[tokio::test]
    async fn concurrent_same_key_yields_one_row() {
        let h = harness(NullExtractor::default(), RecordingTransport::new()).await;

        let (a, b) = tokio::join!(
            h.controller.handle(photo_update(1, 1001, 42)),
            h.controller.handle(photo_update(2, 1001, 42)),
        );
        assert_eq!(a, AckDecision::Ack);
        assert_eq!(b, AckDecision::Ack);
        assert_eq!(tenant_rows(&h, 1001).await.len(), 1);
    }

    #[tokio::test]
    async fn same_message_id_from_two_tenants_stores_both() {
        let h = harness(NullExtractor::default(), RecordingTransport::new()).await;

        h.controller.handle(photo_update(1, 1001, 42)).await;
        h.controller.handle(photo_update(2, 2002, 42)).await;

        assert_eq!(tenant_rows(&h, 1001).await.len(), 1);
        assert_eq!(tenant_rows(&h, 2002).await.len(), 1);
    }

    // ── Failure classification ──────────────────────────────────────

    #[tokio::test]
    async fn missing_amount_fails_permanently() {
        let mut draft = NullExtractor::sample_draft();
        draft.amount = None;
        let h = harness(NullExtractor::with_draft(draft), RecordingTransport::new()).await;

        let ack = h.controller.handle(photo_update(1, 1001, 42)).await;
        assert_eq!(ack, AckDecision::Ack, "validation failure must not redeliver");
        assert!(tenant_rows(&h, 1001).await.is_empty());

        let texts = h.transport.sent_texts();
        assert!(
            texts.iter().any(|t| t.contains("Could not extract")),
            "user must see the failure: {texts:?}"
        );

        // Redelivery of the failed attempt stays quiet.
        let before = h.transport.sent_texts().len();
        let ack = h.controller.handle(photo_update(2, 1001, 42)).await;
        assert_eq!(ack, AckDecision::Ack);
        assert_eq!(h.transport.sent_texts().len(), before);
    }

    #[tokio::test]
    async fn transient_extraction_invites_redelivery() {
        let h = harness(
            NullExtractor::failing_transient("vision timeout"),
            RecordingTransport::new(),
        )
        .await;

        let ack = h.controller.handle(photo_update(1, 1001, 42)).await;
        assert_eq!(ack, AckDecision::Redeliver);
        assert!(tenant_rows(&h, 1001).await.is_empty());

        // The claim was released: a redelivery may try again (and this
        // time the backend still fails, so it stays redeliverable).
        let ack = h.controller.handle(photo_update(2, 1001, 42)).await;
        assert_eq!(ack, AckDecision::Redeliver);
    }

    #[tokio::test]
    async fn permanent_extraction_notifies_and_acks() {
        let h = harness(
            NullExtractor::failing_permanent("malformed image"),
            RecordingTransport::new(),
        )
        .await;

        let ack = h.controller.handle(photo_update(1, 1001, 42)).await;
        assert_eq!(ack, AckDecision::Ack);
        assert!(h
            .transport
            .sent_texts()
            .iter()
            .any(|t| t == reply::UNREADABLE_IMAGE));
    }

    #[tokio::test]
    async fn failed_download_invites_redelivery() {
        let h = harness(
            NullExtractor::default(),
            RecordingTransport::failing_downloads(),
        )
        .await;

        let ack = h.controller.handle(photo_update(1, 1001, 42)).await;
        assert_eq!(ack, AckDecision::Redeliver);
        assert!(tenant_rows(&h, 1001).await.is_empty());
    }

    // ── Text and help paths ─────────────────────────────────────────

    #[tokio::test]
    async fn text_command_is_tracked_without_extractor() {
        // A failing extractor proves the text path never touches it.
        let h = harness(
            NullExtractor::failing_permanent("should not be called"),
            RecordingTransport::new(),
        )
        .await;

        let ack = h
            .controller
            .handle(text_update(1, 1001, 7, "add 15rs as coffee"))
            .await;
        assert_eq!(ack, AckDecision::Ack);

        let rows = tenant_rows(&h, 1001).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, dec!(15));
        assert_eq!(rows[0].currency, "INR");
        assert_eq!(rows[0].category, "coffee");
    }

    #[tokio::test]
    async fn unparseable_text_gets_usage_hint() {
        let h = harness(NullExtractor::default(), RecordingTransport::new()).await;

        let ack = h
            .controller
            .handle(text_update(1, 1001, 7, "hello there"))
            .await;
        assert_eq!(ack, AckDecision::Ack);
        assert!(tenant_rows(&h, 1001).await.is_empty());
        assert!(h
            .transport
            .sent_texts()
            .iter()
            .any(|t| t == reply::USAGE_HINT));
    }

    #[tokio::test]
    async fn empty_update_gets_help() {
        let h = harness(NullExtractor::default(), RecordingTransport::new()).await;

        let update = serde_json::from_value(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 7,
                "from": {"id": 1001, "first_name": "Asha"},
                "chat": {"id": 1001},
                "date": 1700000000
            }
        }))
        .unwrap();
        let ack = h.controller.handle(update).await;
        assert_eq!(ack, AckDecision::Ack);
        assert_eq!(h.transport.sent_texts(), vec![reply::HELP.to_string()]);

        // Help paths never claim the delivery key.
        let tenant = h
            .db
            .get_tenant_by_external_id("1001")
            .await
            .unwrap()
            .unwrap();
        assert!(h
            .db
            .get_transaction_by_source(&tenant.id, "7")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_without_message_is_acked() {
        let h = harness(NullExtractor::default(), RecordingTransport::new()).await;
        let update = serde_json::from_value(serde_json::json!({"update_id": 9})).unwrap();
        assert_eq!(h.controller.handle(update).await, AckDecision::Ack);
        assert!(h.transport.sent_texts().is_empty());
    }
}
