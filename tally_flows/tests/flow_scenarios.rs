//! End-to-end conversations through the real flows, with the ledger,
//! the analyzer, and the suggester replaced by fakes.
//!
//! Verified here:
//! - an expense phrase runs through the category picker into the ledger
//! - 'skip' in the picker records the transaction uncategorized
//! - a bare opener slot-fills amount and payee before picking
//! - an attachment outranks its own expense-looking caption
//! - staged imports commit on 'confirm' and expire into a resend ask
//! - a ledger outage leaves the session retryable, and an interrupted
//!   import resumes without double-booking
//! - category proposals apply on approval and outlive the chat session
//! - balance is a single turn and leaves no session behind

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tally_core::{
    Attachment, AttachmentKind, InboundEvent, Orchestrator, StageCache, StagedNamespace, UserKey,
};
use tally_flows::{
    CATEGORIZATION_TTL, CategoryProposal, CategorySuggester, DOCUMENT_TTL, FlowSet, StagedBatch,
    flow_set,
};
use tally_ledger::{Account, Category, LedgerApi, NewTransaction, Transaction};
use tally_providers::{DocumentAnalyzer, ExtractedRow};

#[derive(Default)]
struct FakeLedger {
    accounts: Vec<Account>,
    categories: Vec<Category>,
    uncategorized: Vec<Transaction>,
    recorded: Mutex<Vec<NewTransaction>>,
    categorized: Mutex<Vec<(String, String)>>,
    // Some(n): allow n more successful creates, then error until healed.
    healthy_creates_left: Mutex<Option<usize>>,
}

impl FakeLedger {
    fn outage_after(&self, successes: usize) {
        *self.healthy_creates_left.lock().unwrap() = Some(successes);
    }

    fn heal(&self) {
        *self.healthy_creates_left.lock().unwrap() = None;
    }

    fn recorded(&self) -> Vec<NewTransaction> {
        self.recorded.lock().unwrap().clone()
    }

    fn categorized(&self) -> Vec<(String, String)> {
        self.categorized.lock().unwrap().clone()
    }
}

fn outage() -> tally_ledger::Error {
    tally_ledger::Error::Api {
        status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
        body: "ledger maintenance".to_string(),
    }
}

#[async_trait]
impl LedgerApi for FakeLedger {
    async fn accounts(&self) -> tally_ledger::Result<Vec<Account>> {
        Ok(self.accounts.clone())
    }

    async fn categories(&self) -> tally_ledger::Result<Vec<Category>> {
        Ok(self.categories.clone())
    }

    async fn create_transaction(&self, new: &NewTransaction) -> tally_ledger::Result<Transaction> {
        {
            let mut left = self.healthy_creates_left.lock().unwrap();
            if let Some(n) = left.as_mut() {
                if *n == 0 {
                    return Err(outage());
                }
                *n -= 1;
            }
        }
        let mut recorded = self.recorded.lock().unwrap();
        recorded.push(new.clone());
        Ok(Transaction {
            id: format!("t-{}", recorded.len()),
            date: new.date,
            payee: Some(new.payee.clone()),
            amount_minor: new.amount_minor,
            category_id: new.category_id.clone(),
            note: new.note.clone(),
        })
    }

    async fn uncategorized(&self, limit: usize) -> tally_ledger::Result<Vec<Transaction>> {
        Ok(self.uncategorized.iter().take(limit).cloned().collect())
    }

    async fn set_category(
        &self,
        transaction_id: &str,
        category_id: &str,
    ) -> tally_ledger::Result<()> {
        self.categorized
            .lock()
            .unwrap()
            .push((transaction_id.to_string(), category_id.to_string()));
        Ok(())
    }
}

struct FakeAnalyzer {
    rows: Vec<ExtractedRow>,
}

#[async_trait]
impl DocumentAnalyzer for FakeAnalyzer {
    async fn analyze(&self, _attachment: &Attachment) -> anyhow::Result<Vec<ExtractedRow>> {
        Ok(self.rows.clone())
    }
}

struct FakeSuggester {
    pairs: Vec<(String, String)>,
}

#[async_trait]
impl CategorySuggester for FakeSuggester {
    async fn suggest(
        &self,
        _transactions: &[Transaction],
        _categories: &[Category],
    ) -> anyhow::Result<Vec<(String, String)>> {
        Ok(self.pairs.clone())
    }
}

struct Harness {
    orchestrator: Orchestrator,
    documents: Arc<StageCache<StagedBatch>>,
    proposals: Arc<StageCache<CategoryProposal>>,
}

struct Ttls {
    document: Duration,
    categorization: Duration,
    session: Duration,
}

impl Default for Ttls {
    fn default() -> Self {
        Self {
            document: DOCUMENT_TTL,
            categorization: CATEGORIZATION_TTL,
            session: Duration::from_secs(30 * 60),
        }
    }
}

fn harness(
    ledger: &Arc<FakeLedger>,
    rows: Vec<ExtractedRow>,
    pairs: Vec<(String, String)>,
    ttls: Ttls,
) -> Harness {
    let ledger_api: Arc<dyn LedgerApi> = ledger.clone();
    let analyzer: Arc<dyn DocumentAnalyzer> = Arc::new(FakeAnalyzer { rows });
    let suggester: Arc<dyn CategorySuggester> = Arc::new(FakeSuggester { pairs });
    let FlowSet {
        catalog,
        documents,
        proposals,
    } = flow_set(
        ledger_api,
        analyzer,
        suggester,
        ttls.document,
        ttls.categorization,
    );
    let document_ns: Arc<dyn StagedNamespace> = documents.clone();
    let proposal_ns: Arc<dyn StagedNamespace> = proposals.clone();
    let orchestrator = Orchestrator::new(Arc::new(catalog))
        .with_session_timeout(ttls.session)
        .with_stage(document_ns)
        .with_stage(proposal_ns);
    Harness {
        orchestrator,
        documents,
        proposals,
    }
}

fn food_and_transport() -> Vec<Category> {
    vec![
        Category {
            id: "c-1".to_string(),
            name: "Food".to_string(),
        },
        Category {
            id: "c-2".to_string(),
            name: "Transport".to_string(),
        },
    ]
}

fn statement_rows() -> Vec<ExtractedRow> {
    vec![
        ExtractedRow {
            date: Some("2026-08-20".to_string()),
            payee: "Cafe Luna".to_string(),
            amount_minor: -1200,
            note: None,
        },
        ExtractedRow {
            date: Some("2026-08-21".to_string()),
            payee: "City Market".to_string(),
            amount_minor: -3450,
            note: Some("groceries".to_string()),
        },
    ]
}

fn user(raw: &str) -> UserKey {
    UserKey::from(raw)
}

fn msg(user: &UserKey, text: &str) -> InboundEvent {
    InboundEvent::message(user.clone(), text)
}

fn pdf(user: &UserKey, caption: &str) -> InboundEvent {
    InboundEvent::document(
        user.clone(),
        caption,
        Attachment::new(AttachmentKind::Pdf, b"%PDF-1.7".to_vec()).with_file_name("statement.pdf"),
    )
}

#[tokio::test]
async fn expense_records_with_the_picked_category() {
    let ledger = Arc::new(FakeLedger {
        categories: food_and_transport(),
        ..FakeLedger::default()
    });
    let h = harness(&ledger, vec![], vec![], Ttls::default());
    let alice = user("alice");

    let listing = h
        .orchestrator
        .handle(msg(&alice, "spent $12 at Cafe Luna"))
        .await
        .unwrap();
    assert!(listing.contains("Which category?"), "got: {listing}");
    assert!(listing.contains("1. Food"));

    let status = h.orchestrator.status(&alice);
    let session = status.session.unwrap();
    assert_eq!(session.root, "expense");
    assert_eq!(session.active, "category_picker");
    assert_eq!(session.active_step, "awaiting_choice");

    let done = h.orchestrator.handle(msg(&alice, "Food")).await.unwrap();
    assert_eq!(done, "Recorded 12.00 spent at Cafe Luna (Food).");

    let recorded = ledger.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].amount_minor, -1200);
    assert_eq!(recorded[0].payee, "Cafe Luna");
    assert_eq!(recorded[0].category_id.as_deref(), Some("c-1"));
    assert!(h.orchestrator.status(&alice).session.is_none());
}

#[tokio::test]
async fn skip_in_the_picker_records_uncategorized() {
    let ledger = Arc::new(FakeLedger {
        categories: food_and_transport(),
        ..FakeLedger::default()
    });
    let h = harness(&ledger, vec![], vec![], Ttls::default());
    let alice = user("alice");

    let _ = h
        .orchestrator
        .handle(msg(&alice, "paid 8.50 for the bus"))
        .await
        .unwrap();
    let done = h.orchestrator.handle(msg(&alice, "skip")).await.unwrap();
    assert_eq!(done, "Recorded 8.50 spent at the bus (uncategorized).");

    let recorded = ledger.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].amount_minor, -850);
    assert_eq!(recorded[0].category_id, None);
}

#[tokio::test]
async fn bare_opener_slot_fills_amount_then_payee() {
    let ledger = Arc::new(FakeLedger {
        categories: food_and_transport(),
        ..FakeLedger::default()
    });
    let h = harness(&ledger, vec![], vec![], Ttls::default());
    let alice = user("alice");

    let ask_amount = h.orchestrator.handle(msg(&alice, "spent")).await.unwrap();
    assert!(ask_amount.contains("How much"), "got: {ask_amount}");

    let ask_payee = h.orchestrator.handle(msg(&alice, "12.50")).await.unwrap();
    assert!(ask_payee.contains("Who was that to?"), "got: {ask_payee}");

    let listing = h
        .orchestrator
        .handle(msg(&alice, "Cafe Luna"))
        .await
        .unwrap();
    assert!(listing.contains("2. Transport"));

    let done = h.orchestrator.handle(msg(&alice, "2")).await.unwrap();
    assert_eq!(done, "Recorded 12.50 spent at Cafe Luna (Transport).");
    assert_eq!(ledger.recorded()[0].category_id.as_deref(), Some("c-2"));
}

#[tokio::test]
async fn attachment_outranks_its_expense_caption() {
    let ledger = Arc::new(FakeLedger::default());
    let h = harness(&ledger, statement_rows(), vec![], Ttls::default());
    let alice = user("alice");

    let reply = h
        .orchestrator
        .handle(pdf(&alice, "spent $9 at Shop"))
        .await
        .unwrap();
    assert!(reply.contains("Found 2 transaction(s)"), "got: {reply}");
    assert!(reply.contains("Cafe Luna"));
    assert!(ledger.recorded().is_empty());
    assert!(!h.documents.is_empty());
}

#[tokio::test]
async fn staged_import_commits_on_confirm() {
    let ledger = Arc::new(FakeLedger::default());
    let h = harness(&ledger, statement_rows(), vec![], Ttls::default());
    let alice = user("alice");

    let _ = h.orchestrator.handle(pdf(&alice, "")).await.unwrap();
    let done = h.orchestrator.handle(msg(&alice, "confirm")).await.unwrap();
    assert_eq!(done, "Imported 2 transaction(s).");

    let recorded = ledger.recorded();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0].payee, "Cafe Luna");
    assert_eq!(recorded[0].date.to_string(), "2026-08-20");
    assert_eq!(recorded[1].note.as_deref(), Some("groceries"));
    assert!(h.documents.is_empty());
    assert!(h.orchestrator.status(&alice).session.is_none());
}

#[tokio::test]
async fn late_confirm_asks_for_a_resend() {
    let ledger = Arc::new(FakeLedger::default());
    let ttls = Ttls {
        document: Duration::from_millis(40),
        ..Ttls::default()
    };
    let h = harness(&ledger, statement_rows(), vec![], ttls);
    let alice = user("alice");

    let _ = h.orchestrator.handle(pdf(&alice, "")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let reply = h.orchestrator.handle(msg(&alice, "confirm")).await.unwrap();
    assert!(reply.contains("resend the document"), "got: {reply}");
    assert!(ledger.recorded().is_empty());
}

#[tokio::test]
async fn discard_drops_the_staged_import() {
    let ledger = Arc::new(FakeLedger::default());
    let h = harness(&ledger, statement_rows(), vec![], Ttls::default());
    let alice = user("alice");

    let _ = h.orchestrator.handle(pdf(&alice, "")).await.unwrap();
    let dropped = h.orchestrator.handle(msg(&alice, "discard")).await.unwrap();
    assert_eq!(dropped, "Discarded the staged import.");
    assert!(h.documents.is_empty());
    assert!(ledger.recorded().is_empty());

    let nothing = h.orchestrator.handle(msg(&alice, "discard")).await.unwrap();
    assert_eq!(nothing, "There's nothing staged to discard.");
}

#[tokio::test]
async fn ledger_outage_keeps_the_expense_retryable() {
    let ledger = Arc::new(FakeLedger {
        categories: food_and_transport(),
        ..FakeLedger::default()
    });
    ledger.outage_after(0);
    let h = harness(&ledger, vec![], vec![], Ttls::default());
    let alice = user("alice");

    let _ = h
        .orchestrator
        .handle(msg(&alice, "spent $5 at Cafe Luna"))
        .await
        .unwrap();
    let apology = h.orchestrator.handle(msg(&alice, "Food")).await.unwrap();
    assert!(apology.contains("try that again"), "got: {apology}");

    // the session survived the failure, parked right before the post
    let status = h.orchestrator.status(&alice);
    let session = status.session.unwrap();
    assert_eq!(session.root, "expense");
    assert_eq!(session.active_step, "record");

    ledger.heal();
    let done = h.orchestrator.handle(msg(&alice, "go ahead")).await.unwrap();
    assert_eq!(done, "Recorded 5.00 spent at Cafe Luna (Food).");
    assert_eq!(ledger.recorded().len(), 1);
}

#[tokio::test]
async fn interrupted_import_resumes_without_double_booking() {
    let mut rows = statement_rows();
    rows.push(ExtractedRow {
        date: None,
        payee: "Fuel Stop".to_string(),
        amount_minor: -5000,
        note: None,
    });
    let ledger = Arc::new(FakeLedger::default());
    ledger.outage_after(1);
    let h = harness(&ledger, rows, vec![], Ttls::default());
    let alice = user("alice");

    let _ = h.orchestrator.handle(pdf(&alice, "")).await.unwrap();
    let partial = h.orchestrator.handle(msg(&alice, "confirm")).await.unwrap();
    assert!(partial.contains("Imported 1 of 3"), "got: {partial}");

    ledger.heal();
    let done = h.orchestrator.handle(msg(&alice, "confirm")).await.unwrap();
    assert_eq!(done, "Imported 2 transaction(s).");

    let payees: Vec<String> = ledger.recorded().iter().map(|n| n.payee.clone()).collect();
    assert_eq!(payees, ["Cafe Luna", "City Market", "Fuel Stop"]);
}

#[tokio::test]
async fn category_proposal_applies_on_approval() {
    let uncategorized = vec![
        Transaction {
            id: "t-1".to_string(),
            date: chrono::NaiveDate::from_ymd_opt(2026, 8, 20).unwrap(),
            payee: Some("Cafe Luna".to_string()),
            amount_minor: -1200,
            category_id: None,
            note: None,
        },
        Transaction {
            id: "t-2".to_string(),
            date: chrono::NaiveDate::from_ymd_opt(2026, 8, 21).unwrap(),
            payee: Some("Shell".to_string()),
            amount_minor: -4000,
            category_id: None,
            note: None,
        },
    ];
    let pairs = vec![
        ("t-1".to_string(), "c-1".to_string()),
        ("t-2".to_string(), "c-2".to_string()),
    ];
    let ledger = Arc::new(FakeLedger {
        categories: food_and_transport(),
        uncategorized,
        ..FakeLedger::default()
    });
    let h = harness(&ledger, vec![], pairs, Ttls::default());
    let alice = user("alice");

    let listing = h
        .orchestrator
        .handle(msg(&alice, "categorize my transactions"))
        .await
        .unwrap();
    assert!(listing.contains("• Cafe Luna (-12.00): Food"), "got: {listing}");
    assert!(listing.contains("• Shell (-40.00): Transport"));

    let done = h.orchestrator.handle(msg(&alice, "apply")).await.unwrap();
    assert_eq!(done, "Categorized 2 transaction(s).");
    assert_eq!(
        ledger.categorized(),
        [
            ("t-1".to_string(), "c-1".to_string()),
            ("t-2".to_string(), "c-2".to_string())
        ]
    );
    assert!(h.proposals.is_empty());
}

#[tokio::test]
async fn proposal_outlives_the_chat_session() {
    let uncategorized = vec![Transaction {
        id: "t-1".to_string(),
        date: chrono::NaiveDate::from_ymd_opt(2026, 8, 20).unwrap(),
        payee: Some("Cafe Luna".to_string()),
        amount_minor: -1200,
        category_id: None,
        note: None,
    }];
    let pairs = vec![("t-1".to_string(), "c-1".to_string())];
    let ledger = Arc::new(FakeLedger {
        categories: food_and_transport(),
        uncategorized,
        ..FakeLedger::default()
    });
    let ttls = Ttls {
        session: Duration::from_millis(30),
        ..Ttls::default()
    };
    let h = harness(&ledger, vec![], pairs, ttls);
    let alice = user("alice");

    let _ = h
        .orchestrator
        .handle(msg(&alice, "categorize"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(h.orchestrator.status(&alice).session.is_none());

    // the conversation is gone; the staged proposal is not
    let done = h
        .orchestrator
        .handle(msg(&alice, "apply the categories"))
        .await
        .unwrap();
    assert_eq!(done, "Categorized 1 transaction(s).");
    assert_eq!(ledger.categorized().len(), 1);
}

#[tokio::test]
async fn balance_is_a_single_turn() {
    let ledger = Arc::new(FakeLedger {
        accounts: vec![
            Account {
                id: "a-1".to_string(),
                name: "Checking".to_string(),
                balance_minor: 125_000,
                closed: false,
            },
            Account {
                id: "a-2".to_string(),
                name: "Savings".to_string(),
                balance_minor: 500_000,
                closed: false,
            },
        ],
        ..FakeLedger::default()
    });
    let h = harness(&ledger, vec![], vec![], Ttls::default());
    let alice = user("alice");

    let report = h
        .orchestrator
        .handle(msg(&alice, "my balance please"))
        .await
        .unwrap();
    assert!(report.contains("• Checking: 1250.00"), "got: {report}");
    assert!(report.contains("Total: 6250.00"));
    assert!(h.orchestrator.status(&alice).session.is_none());
}

#[tokio::test]
async fn reset_purges_the_staged_batch_with_the_session() {
    let ledger = Arc::new(FakeLedger {
        categories: food_and_transport(),
        ..FakeLedger::default()
    });
    let h = harness(&ledger, statement_rows(), vec![], Ttls::default());
    let alice = user("alice");

    let _ = h.orchestrator.handle(pdf(&alice, "")).await.unwrap();
    let _ = h
        .orchestrator
        .handle(msg(&alice, "spent $3 at Kiosk"))
        .await
        .unwrap();

    let outcome = h.orchestrator.reset(&alice);
    assert_eq!(outcome.abandoned_flow, Some("expense"));
    assert_eq!(outcome.purged_stages, ["document_import"]);
    assert!(h.documents.is_empty());
    assert!(h.orchestrator.status(&alice).session.is_none());
}
