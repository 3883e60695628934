//! Integration tests for the message store, query compilation against the
//! real full-text index, and concurrent ingestion.

use std::collections::HashSet;
use std::sync::Arc;

use assert_fs::prelude::*;
use assert_fs::TempDir;
use chrono::{DateTime, Duration, Utc};
use predicates::prelude::*;
use proptest::prelude::*;

use mailsink::error::{QueryError, SinkError};
use mailsink::forward::SpoolForwarder;
use mailsink::ingest::{self, Ingestor};
use mailsink::model::mail::{Envelope, NewMessage};
use mailsink::search::{self, query::compile};
use mailsink::store::repository::{Repository, MAX_LIMIT};

fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_735_689_600, 0).unwrap()
}

fn message(subject: &str, body: &str) -> NewMessage {
    NewMessage::from_envelope(&Envelope::new(
        "sender@example.com",
        vec!["rcpt@example.com".into()],
        format!("Subject: {subject}\n\n{body}\n"),
    ))
}

fn open(tmp: &TempDir) -> Repository {
    Repository::open(tmp.child("sink.db").path()).unwrap()
}

fn ids(found: &[mailsink::model::mail::StoredMessage]) -> Vec<i64> {
    found.iter().map(|m| m.id).collect()
}

// ─── Query compilation against the index ────────────────────────────

#[test]
fn test_embedded_quote_round_trips() {
    let tmp = TempDir::new().unwrap();
    let mut repo = open(&tmp);
    let hit = repo.insert(&message(r#"She said "hi" twice"#, "")).unwrap();
    repo.insert(&message("said nothing", "")).unwrap();

    let q = compile(r#"said"hi"#).unwrap();
    assert_eq!(q.as_str(), r#""said""hi""#);
    assert_eq!(ids(&repo.search(&q, 10).unwrap()), vec![hit]);
}

#[test]
fn test_operator_words_are_literals() {
    let tmp = TempDir::new().unwrap();
    let mut repo = open(&tmp);
    let hit = repo.insert(&message("cats OR dogs", "")).unwrap();
    repo.insert(&message("cats only", "")).unwrap();

    let found = search::execute(&repo, Some("cats OR dogs"), 10).unwrap();
    assert_eq!(ids(&found), vec![hit]);
    // Syntax characters never reach the engine unquoted.
    let found = search::execute(&repo, Some("cats* (dogs) ^NEAR"), 10).unwrap();
    assert!(found.is_empty());
}

#[test]
fn test_phrase_and_exclusion() {
    let tmp = TempDir::new().unwrap();
    let mut repo = open(&tmp);
    let a = repo.insert(&message("hello world", "")).unwrap();
    let b = repo.insert(&message("world hello", "")).unwrap();
    let c = repo.insert(&message("hello there", "")).unwrap();

    let phrase = search::execute(&repo, Some(r#""hello world""#), 10).unwrap();
    assert_eq!(ids(&phrase), vec![a]);

    let both = search::execute(&repo, Some("hello world"), 10).unwrap();
    assert_eq!(ids(&both), vec![b, a]);

    let excluded = search::execute(&repo, Some("hello -world"), 10).unwrap();
    assert_eq!(ids(&excluded), vec![c]);
}

#[test]
fn test_field_scoped_terms() {
    let tmp = TempDir::new().unwrap();
    let mut repo = open(&tmp);
    let from_alice = repo
        .insert(&NewMessage::from_envelope(&Envelope::new(
            "alice@example.com",
            vec!["bob@example.com".into()],
            "Subject: status\n\nnothing new\n",
        )))
        .unwrap();
    let mentions_alice = repo
        .insert(&NewMessage::from_envelope(&Envelope::new(
            "bob@example.com",
            vec!["carol@example.com".into()],
            "Subject: status\n\nask alice\n",
        )))
        .unwrap();

    let anywhere = search::execute(&repo, Some("alice"), 10).unwrap();
    assert_eq!(ids(&anywhere), vec![mentions_alice, from_alice]);

    let scoped = search::execute(&repo, Some("from:alice"), 10).unwrap();
    assert_eq!(ids(&scoped), vec![from_alice]);

    let not_to_carol = search::execute(&repo, Some("status -to:carol"), 10).unwrap();
    assert_eq!(ids(&not_to_carol), vec![from_alice]);
}

#[test]
fn test_html_body_is_not_searchable() {
    let tmp = TempDir::new().unwrap();
    let mut repo = open(&tmp);
    repo.insert(&NewMessage::from_envelope(&Envelope::new(
        "a@x.org",
        vec!["b@x.org".into()],
        "Subject: s\nContent-Type: text/html\n\n<p>zebra</p>\n",
    )))
    .unwrap();
    assert!(search::execute(&repo, Some("zebra"), 10).unwrap().is_empty());
}

// ─── Query service ──────────────────────────────────────────────────

#[test]
fn test_blank_query_lists_recent() {
    let tmp = TempDir::new().unwrap();
    let mut repo = open(&tmp);
    let first = repo.insert(&message("one", "")).unwrap();
    let second = repo.insert(&message("two", "")).unwrap();

    for q in [None, Some(""), Some("   ")] {
        let found = search::execute(&repo, q, 10).unwrap();
        assert_eq!(ids(&found), vec![second, first]);
    }
}

#[test]
fn test_invalid_query_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let repo = open(&tmp);

    let err = search::execute(&repo, Some("\"unterminated"), 10).unwrap_err();
    assert!(matches!(
        err,
        SinkError::InvalidQuery(QueryError::UnterminatedQuote { position: 0 })
    ));
    assert!(predicate::str::contains("unterminated").eval(&err.to_string()));

    let err = search::execute(&repo, Some("-spam"), 10).unwrap_err();
    assert!(matches!(err, SinkError::InvalidQuery(QueryError::OnlyExclusions)));

    let err = search::execute(&repo, Some("!!! ..."), 10).unwrap_err();
    assert!(matches!(err, SinkError::InvalidQuery(QueryError::NoTerms)));
}

// ─── Index mirror consistency ───────────────────────────────────────

#[test]
fn test_subject_search_tracks_inserts_and_deletes() {
    let tmp = TempDir::new().unwrap();
    let mut repo = open(&tmp);
    let subjects = ["alpha release", "beta release", "gamma rollout", "delta fix"];
    let mut live: Vec<(i64, &str)> = subjects
        .iter()
        .map(|s| (repo.insert(&message(s, "body")).unwrap(), *s))
        .collect();

    // Delete every other record, then check all survivors and victims.
    let victims: Vec<(i64, &str)> = live.iter().copied().step_by(2).collect();
    for (id, _) in &victims {
        repo.delete(*id).unwrap();
    }
    live.retain(|entry| !victims.contains(entry));

    for (id, subject) in &live {
        let q = compile(&format!("\"{subject}\"")).unwrap();
        assert!(ids(&repo.search(&q, 10).unwrap()).contains(id));
    }
    for (id, subject) in &victims {
        let q = compile(&format!("\"{subject}\"")).unwrap();
        assert!(!ids(&repo.search(&q, 10).unwrap()).contains(id));
        assert!(repo.get(*id).unwrap_err().is_not_found());
    }
    assert_eq!(repo.count().unwrap(), live.len() as u64);
}

#[test]
fn test_ordering_newest_first_with_id_tiebreak() {
    let tmp = TempDir::new().unwrap();
    let mut repo = open(&tmp);
    let t = base_time();

    let old = repo
        .insert(&message("report one", "").received_at(t - Duration::hours(1)))
        .unwrap();
    let tie_a = repo.insert(&message("report two", "").received_at(t)).unwrap();
    let tie_b = repo.insert(&message("report three", "").received_at(t)).unwrap();
    let older_but_later_id = repo
        .insert(&message("report four", "").received_at(t - Duration::days(1)))
        .unwrap();

    let expected = vec![tie_b, tie_a, old, older_but_later_id];
    assert_eq!(ids(&repo.list_recent(10).unwrap()), expected);
    let q = compile("report").unwrap();
    assert_eq!(ids(&repo.search(&q, 10).unwrap()), expected);
    assert_eq!(ids(&repo.search(&q, 2).unwrap()), vec![tie_b, tie_a]);
}

#[test]
fn test_limit_is_capped() {
    let tmp = TempDir::new().unwrap();
    let mut repo = open(&tmp);
    for i in 0..(MAX_LIMIT + 5) {
        repo.insert(&message(&format!("bulk {i}"), "")).unwrap();
    }
    assert_eq!(repo.list_recent(1000).unwrap().len(), MAX_LIMIT);
    let q = compile("bulk").unwrap();
    assert_eq!(repo.search(&q, usize::MAX).unwrap().len(), MAX_LIMIT);
}

#[test]
fn test_raw_source_survives_rederive() {
    let tmp = TempDir::new().unwrap();
    let mut repo = open(&tmp);
    let raw = "Subject: Original\n\n  body text  \n";
    let id = repo.insert(&message("Original", "  body text  ")).unwrap();

    let msg = repo.rederive(id).unwrap();
    assert_eq!(msg.raw, raw);
    assert_eq!(msg.subject, "Original");
    assert_eq!(msg.body, "body text");
}

// ─── Concurrency ────────────────────────────────────────────────────

#[test]
fn test_parallel_ingestion_with_separate_connections() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.child("shared.db");
    let spool = tmp.child("spool");
    // Create the schema up front so workers only contend on writes.
    drop(Repository::open(db.path()).unwrap());

    let forwarder = Arc::new(SpoolForwarder::new(spool.path()));
    let workers: Vec<_> = (0..4)
        .map(|w| {
            let path = db.path().to_path_buf();
            let forwarder = forwarder.clone();
            std::thread::spawn(move || {
                let mut ingestor =
                    Ingestor::new(Repository::open(&path).unwrap()).with_forwarder(forwarder);
                (0..10)
                    .map(|n| {
                        let env = Envelope::new(
                            format!("worker{w}@example.com"),
                            vec!["sink@example.com".into()],
                            format!("Subject: parallel {w} {n}\n\nfrom worker {w}\n"),
                        );
                        ingestor.ingest(&env).unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all = HashSet::new();
    for handle in workers {
        for id in handle.join().unwrap() {
            assert!(all.insert(id), "duplicate id {id}");
        }
    }

    let repo = Repository::open(db.path()).unwrap();
    assert_eq!(repo.count().unwrap(), 40);
    let q = compile("parallel from:worker2").unwrap();
    assert_eq!(repo.search(&q, 100).unwrap().len(), 10);
    assert_eq!(std::fs::read_dir(spool.path()).unwrap().count(), 40);
}

// ─── Directory import ───────────────────────────────────────────────

#[test]
fn test_import_directory() {
    let tmp = TempDir::new().unwrap();
    let inbox = tmp.child("inbox");
    inbox.create_dir_all().unwrap();
    inbox
        .child("a.eml")
        .write_str("From: a@x.org\nTo: b@x.org\nSubject: first\n\none\n")
        .unwrap();
    inbox
        .child("b.EML")
        .write_str("From: a@x.org\nCc: c@x.org\nSubject: second\n\ntwo\n")
        .unwrap();
    inbox
        .child("c.eml")
        .write_str("Subject: nobody to deliver to\n\nthree\n")
        .unwrap();
    inbox.child("notes.txt").write_str("ignored").unwrap();

    let mut ingestor = Ingestor::new(open(&tmp));
    let stats = ingest::import_dir(&mut ingestor, inbox.path(), &|_, _| {}).unwrap();

    assert_eq!(stats.imported, 2);
    assert_eq!(stats.skipped, vec![inbox.child("c.eml").path().to_path_buf()]);
    let stored = ingestor.repository().list_recent(10).unwrap();
    let subjects: HashSet<_> = stored.iter().map(|m| m.subject.as_str()).collect();
    assert_eq!(subjects, HashSet::from(["first", "second"]));
}

// ─── Properties ─────────────────────────────────────────────────────

/// Query text mixing dialect syntax, control characters and non-ASCII.
fn query_text() -> impl Strategy<Value = String> {
    prop_oneof![
        r#"[a-zA-Z0-9 "\-():*^+\x00\x07\x1b\téüß漢字\u{0903}\u{200b}]{0,30}"#,
        any::<String>(),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever compiles is accepted by the full-text engine.
    #[test]
    fn prop_compiled_queries_are_valid_fts(input in query_text()) {
        let tmp = TempDir::new().unwrap();
        let mut repo = open(&tmp);
        repo.insert(&message("a b c", "x y z")).unwrap();

        if let Ok(q) = compile(&input) {
            let result = repo.search(&q, 10);
            prop_assert!(result.is_ok(), "rejected {:?}: {:?}", q.as_str(), result.err());
        }
    }
}

#[test]
fn test_control_characters_never_reach_the_engine() {
    let tmp = TempDir::new().unwrap();
    let mut repo = open(&tmp);
    let hit = repo.insert(&message("hello there", "")).unwrap();

    for input in ["hello\0", "hello\0there", "x\0", "hello -\0x", "\"hello\0there\""] {
        let found = search::execute(&repo, Some(input), 10);
        assert!(found.is_ok(), "{input:?}: {found:?}");
    }
    let found = search::execute(&repo, Some("hello\0"), 10).unwrap();
    assert_eq!(ids(&found), vec![hit]);
}
