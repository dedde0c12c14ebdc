use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::engine::{build_event, EngineConfig, ProtectionEngine};
use super::types::{IgnoreReason, ProtectionOutcome, WatchEvent, WatchEventKind};
use super::watcher::RootWatchers;
use crate::logic::response::{AlertDispatcher, AlertSeverity, EventKind, MemoryDispatcher, Notifier};
use crate::logic::templates::{DuplicatePolicy, TemplateIndex};

const TAX_ID: &str = "0123456789";

fn declaration(company: &str, doc_type: &str, period: &str, amount: u64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<HSoThueDTu xmlns="http://kekhaithue.gdt.gov.vn/TKhaiThue">
  <HSoKhaiThue>
    <TTinChung>
      <ns:mst xmlns:ns="urn:x">{}</ns:mst>
      <tenNNT>{}</tenNNT>
      <LoaiToKhai>{}</LoaiToKhai>
      <KyKhaiThue>{}</KyKhaiThue>
    </TTinChung>
    <CTieuTKhaiChinh><SoTien>{}</SoTien></CTieuTKhaiChinh>
  </HSoKhaiThue>
</HSoThueDTu>"#,
        TAX_ID, company, doc_type, period, amount
    )
}

fn template_xml() -> String {
    declaration("ABC", "Decl01", "2025Q1", 1_000_000)
}

/// GDT layout: the period kind (`kieuKy`) precedes the period itself
fn gdt_declaration(period: &str, amount: u64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<HSoThueDTu xmlns="http://kekhaithue.gdt.gov.vn/TKhaiThue">
  <HSoKhaiThue>
    <TTinChung>
      <TTinTKhaiThue>
        <TKhaiThue>
          <maTKhai>842</maTKhai>
          <tenTKhai>TO KHAI THUE GIA TRI GIA TANG</tenTKhai>
          <loaiTKhai>C</loaiTKhai>
          <KyKKhaiThue>
            <kieuKy>Q</kieuKy>
            <kyKKhai>{}</kyKKhai>
          </KyKKhaiThue>
        </TKhaiThue>
        <NNT>
          <mst>{}</mst>
          <tenNNT>ABC</tenNNT>
        </NNT>
      </TTinTKhaiThue>
    </TTinChung>
    <CTieuTKhaiChinh><ct40>{}</ct40></CTieuTKhaiChinh>
  </HSoKhaiThue>
</HSoThueDTu>"#,
        period, TAX_ID, amount
    )
}

struct Fixture {
    engine: Arc<ProtectionEngine>,
    memory: Arc<MemoryDispatcher>,
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new(settle: Duration) -> Self {
        Self::with_config(|_| EngineConfig {
            settle,
            workers: 2,
            queue_capacity: 64,
            excluded: Vec::new(),
        })
    }

    fn with_config(config: impl FnOnce(&Path) -> EngineConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let index = TemplateIndex::from_documents(
            vec![(PathBuf::from("templates/abc.xml"), template_xml().into_bytes())],
            DuplicatePolicy::KeepFirst,
        )
        .unwrap();

        let memory = Arc::new(MemoryDispatcher::default());
        let dispatchers: Vec<Arc<dyn AlertDispatcher>> = vec![memory.clone() as Arc<dyn AlertDispatcher>];
        let notifier = Arc::new(Notifier::start(dispatchers, 64));

        let config = config(dir.path());

        Self {
            engine: Arc::new(ProtectionEngine::new(index, notifier, config)),
            memory,
            dir,
        }
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    /// Flush queued alerts and return them
    fn events(&self) -> Vec<crate::logic::response::StructuredEvent> {
        self.engine.notifier().shutdown();
        self.memory.events()
    }
}

fn backups_of(path: &Path) -> Vec<PathBuf> {
    let prefix = format!("{}.backup.", path.file_name().unwrap().to_string_lossy());
    fs::read_dir(path.parent().unwrap())
        .unwrap()
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.file_name().unwrap().to_string_lossy().starts_with(&prefix))
        .collect()
}

// ============================================================================
// End-to-end scenarios
// ============================================================================

#[test]
fn test_matching_candidate_is_restored() {
    let fx = Fixture::new(Duration::from_millis(50));
    let candidate = declaration("ABC", "Decl01", "2025Q1", 999_999_999);
    let path = fx.write("tk_01.xml", &candidate);

    let outcome = fx.engine.process_path(&path).unwrap();

    let ProtectionOutcome::Protected { backup_path, .. } = &outcome else {
        panic!("expected Protected, got {:?}", outcome);
    };
    assert_eq!(fs::read_to_string(&path).unwrap(), template_xml());
    assert_eq!(fs::read_to_string(backup_path).unwrap(), candidate);
    assert_eq!(backups_of(&path).len(), 1);

    let events = fx.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::ProtectionSucceeded);
    assert_eq!(events[0].severity, AlertSeverity::High);
    assert_eq!(events[0].tax_id.as_deref(), Some(TAX_ID));
    assert_eq!(events[0].path.as_deref(), Some(path.as_path()));
    assert_eq!(events[0].backup_path.as_ref(), Some(backup_path));

    let stats = fx.engine.stats();
    assert_eq!(stats.evaluations, 1);
    assert_eq!(stats.protected, 1);
}

#[test]
fn test_different_document_type_is_near_miss() {
    let fx = Fixture::new(Duration::from_millis(50));
    let candidate = declaration("ABC", "Decl02", "2025Q1", 5);
    let path = fx.write("tk_02.xml", &candidate);

    let outcome = fx.engine.process_path(&path).unwrap();

    match &outcome {
        ProtectionOutcome::Ignored(decision) => {
            assert!(!decision.matched);
            assert_eq!(
                decision.ignored,
                Some(IgnoreReason::FieldMismatch {
                    differing: vec!["document_type"]
                })
            );
        }
        other => panic!("expected Ignored, got {:?}", other),
    }
    assert_eq!(fs::read_to_string(&path).unwrap(), candidate);
    assert!(backups_of(&path).is_empty());

    let events = fx.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::NearMiss);
    assert_eq!(events[0].severity, AlertSeverity::Info);
    assert_eq!(events[0].differing_fields, vec!["document_type".to_string()]);
}

// ============================================================================
// Evaluation
// ============================================================================

#[test]
fn test_strict_match_gate() {
    let fx = Fixture::new(Duration::from_millis(50));
    let variants = [
        ("XYZ", "Decl01", "2025Q1", "company_name"),
        ("ABC", "Decl02", "2025Q1", "document_type"),
        ("ABC", "Decl01", "2025Q2", "period"),
    ];

    for (company, doc_type, period, field) in variants {
        let bytes = declaration(company, doc_type, period, 1).into_bytes();
        let decision = fx.engine.evaluate_bytes(Path::new("c.xml"), &bytes);
        assert!(!decision.matched, "{} differs but matched", field);
        assert_eq!(
            decision.ignored,
            Some(IgnoreReason::FieldMismatch { differing: vec![field] })
        );
    }
}

#[test]
fn test_other_quarter_in_gdt_layout_is_not_restored() {
    let fx = Fixture::new(Duration::from_millis(50));
    let q1 = TemplateIndex::from_documents(
        vec![(
            PathBuf::from("templates/01gtgt_q1.xml"),
            gdt_declaration("1/2025", 1_000).into_bytes(),
        )],
        DuplicatePolicy::KeepFirst,
    )
    .unwrap();
    assert_eq!(q1.lookup(TAX_ID).unwrap().fields.period.as_deref(), Some("1/2025"));
    fx.engine.replace_templates(q1);

    let q2 = gdt_declaration("2/2025", 1_000);
    let path = fx.write("01gtgt_q2.xml", &q2);
    let outcome = fx.engine.process_path(&path).unwrap();

    match &outcome {
        ProtectionOutcome::Ignored(decision) => {
            assert_eq!(
                decision.ignored,
                Some(IgnoreReason::FieldMismatch {
                    differing: vec!["period"]
                })
            );
        }
        other => panic!("expected Ignored, got {:?}", other),
    }
    assert_eq!(fs::read_to_string(&path).unwrap(), q2);
    assert!(backups_of(&path).is_empty());

    let edited_q1 = gdt_declaration("1/2025", 9_999);
    assert!(fx.engine.evaluate_bytes(Path::new("c.xml"), edited_q1.as_bytes()).matched);
}

#[test]
fn test_ignore_reasons() {
    let fx = Fixture::new(Duration::from_millis(50));
    let eval = |content: &str| {
        fx.engine
            .evaluate_bytes(Path::new("c.xml"), content.as_bytes())
            .ignored
            .unwrap()
    };

    assert!(matches!(eval("<doc><mst>1"), IgnoreReason::Unparseable(_)));
    assert_eq!(eval("<doc><tenNNT>ABC</tenNNT></doc>"), IgnoreReason::NoTaxId);
    assert_eq!(
        eval("<doc><mst>999</mst></doc>"),
        IgnoreReason::NoTemplate {
            tax_id: "999".into()
        }
    );
    assert_eq!(eval(&template_xml()), IgnoreReason::AlreadyCanonical);

    let missing = fx.engine.evaluate(&fx.dir.path().join("missing.xml"));
    assert_eq!(missing.ignored, Some(IgnoreReason::NotAFile));
}

#[test]
fn test_silent_ignores_produce_no_alert() {
    let fx = Fixture::new(Duration::from_millis(50));
    let path = fx.write("other.xml", "<doc><mst>999</mst></doc>");
    let outcome = fx.engine.process_path(&path).unwrap();
    assert!(build_event(&outcome).is_none());
    assert!(fx.events().is_empty());
    assert_eq!(fx.engine.stats().ignored, 1);
}

#[test]
fn test_replace_templates() {
    let fx = Fixture::new(Duration::from_millis(50));
    let candidate = declaration("ABC", "Decl01", "2025Q2", 1);
    assert!(!fx.engine.evaluate_bytes(Path::new("c.xml"), candidate.as_bytes()).matched);

    let q2 = TemplateIndex::from_documents(
        vec![(
            PathBuf::from("templates/abc_q2.xml"),
            declaration("ABC", "Decl01", "2025Q2", 7).into_bytes(),
        )],
        DuplicatePolicy::KeepFirst,
    )
    .unwrap();
    fx.engine.replace_templates(q2);

    let decision = fx.engine.evaluate_bytes(Path::new("c.xml"), candidate.as_bytes());
    assert!(decision.matched);
    assert!(decision.template.unwrap().source_path.ends_with("abc_q2.xml"));
}

#[cfg(unix)]
#[test]
fn test_failed_restore_is_reported() {
    use std::os::unix::fs::PermissionsExt;

    let fx = Fixture::new(Duration::from_millis(50));
    let path = fx.write("locked.xml", &declaration("ABC", "Decl01", "2025Q1", 3));
    fs::set_permissions(fx.dir.path(), fs::Permissions::from_mode(0o555)).unwrap();

    // Root ignores directory permissions
    let canary = fx.dir.path().join("canary");
    if fs::write(&canary, b"x").is_ok() {
        fs::set_permissions(fx.dir.path(), fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let outcome = fx.engine.process_path(&path).unwrap();
    fs::set_permissions(fx.dir.path(), fs::Permissions::from_mode(0o755)).unwrap();

    assert!(matches!(outcome, ProtectionOutcome::Failed { .. }));
    let events = fx.events();
    assert_eq!(events[0].kind, EventKind::ProtectionFailed);
    assert_eq!(events[0].severity, AlertSeverity::Critical);
    assert!(events[0].error.is_some());
    assert_eq!(fx.engine.stats().failed, 1);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_cycles_protect_once() {
    let fx = Fixture::new(Duration::from_millis(50));
    let path = fx.write("race.xml", &declaration("ABC", "Decl01", "2025Q1", 42));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = fx.engine.clone();
            let path = path.clone();
            std::thread::spawn(move || engine.process_path(&path))
        })
        .collect();

    let protected = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .filter(|o| matches!(o, ProtectionOutcome::Protected { .. }))
        .count();

    // Later cycles see the restored bytes and stop at AlreadyCanonical
    assert_eq!(protected, 1);
    assert_eq!(backups_of(&path).len(), 1);
    assert_eq!(fs::read_to_string(&path).unwrap(), template_xml());
}

async fn wait_for<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_burst_produces_one_evaluation() {
    let fx = Fixture::new(Duration::from_millis(300));
    let path = fx.write("burst.xml", &declaration("ABC", "Decl01", "2025Q1", 1));

    let (tx, rx) = mpsc::channel(16);
    let handle = fx.engine.start(rx);

    for _ in 0..5 {
        tx.send(WatchEvent::new(path.clone(), WatchEventKind::Modified))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
    }

    let engine = fx.engine.clone();
    assert!(wait_for(|| engine.stats().evaluations >= 1, Duration::from_secs(5)).await);
    tokio::time::sleep(Duration::from_millis(500)).await;

    let stats = fx.engine.stats();
    assert_eq!(stats.events, 5);
    assert_eq!(stats.evaluations, 1);
    assert_eq!(stats.protected, 1);

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_drops_unsettled_paths() {
    let fx = Fixture::new(Duration::from_secs(30));
    let path = fx.write("late.xml", &declaration("ABC", "Decl01", "2025Q1", 1));

    let (tx, rx) = mpsc::channel(16);
    let handle = fx.engine.start(rx);
    tx.send(WatchEvent::new(path.clone(), WatchEventKind::Created))
        .await
        .unwrap();

    let engine = fx.engine.clone();
    assert!(wait_for(|| engine.stats().events == 1, Duration::from_secs(5)).await);
    handle.shutdown().await;

    assert_eq!(fx.engine.stats().evaluations, 0);
    assert!(backups_of(&path).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_waits_for_running_cycle() {
    let fx = Fixture::new(Duration::from_millis(20));
    let filler = "<ct>1</ct>".repeat(200_000);
    let candidate = declaration("ABC", "Decl01", "2025Q1", 5)
        .replace("</CTieuTKhaiChinh>", &format!("{}</CTieuTKhaiChinh>", filler));
    let path = fx.write("bulky.xml", &candidate);

    let (tx, rx) = mpsc::channel(16);
    let handle = fx.engine.start(rx);
    tx.send(WatchEvent::new(path.clone(), WatchEventKind::Modified))
        .await
        .unwrap();

    // Shut down as soon as the cycle owns the path
    let deadline = Instant::now() + Duration::from_secs(10);
    while fx.engine.in_flight() == 0 && fx.engine.stats().evaluations == 0 {
        assert!(Instant::now() < deadline, "cycle never started");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    handle.shutdown().await;

    assert_eq!(fx.engine.in_flight(), 0);
    assert_eq!(fx.engine.stats().protected, 1);
    assert_eq!(fs::read_to_string(&path).unwrap(), template_xml());
    let backups = backups_of(&path);
    assert_eq!(backups.len(), 1);
    assert_eq!(fs::read_to_string(&backups[0]).unwrap(), candidate);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_excluded_directory_is_never_a_candidate() {
    let fx = Fixture::with_config(|dir| EngineConfig {
        settle: Duration::from_millis(50),
        workers: 2,
        queue_capacity: 64,
        excluded: vec![dir.join("data")],
    });
    fs::create_dir_all(fx.dir.path().join("data").join("templates")).unwrap();

    // An operator editing a template must not be reverted
    let edited = declaration("ABC", "Decl01", "2025Q1", 123);
    let own = fx.write("data/templates/abc.xml", &edited);
    let candidate = fx.write("tk.xml", &declaration("ABC", "Decl01", "2025Q1", 456));
    assert!(fx.engine.is_excluded(&own));
    assert!(!fx.engine.is_excluded(&candidate));

    let (tx, rx) = mpsc::channel(16);
    let handle = fx.engine.start(rx);
    for path in [&own, &candidate] {
        tx.send(WatchEvent::new(path.clone(), WatchEventKind::Modified))
            .await
            .unwrap();
    }

    let engine = fx.engine.clone();
    assert!(wait_for(|| engine.stats().protected == 1, Duration::from_secs(5)).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.shutdown().await;

    let stats = fx.engine.stats();
    assert_eq!(stats.events, 2);
    assert_eq!(stats.evaluations, 1);
    assert_eq!(fs::read_to_string(&own).unwrap(), edited);
    assert!(backups_of(&own).is_empty());
    assert_eq!(fs::read_to_string(&candidate).unwrap(), template_xml());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watched_write_is_restored() {
    let fx = Fixture::new(Duration::from_millis(200));
    let root = fx.dir.path().join("watched");
    fs::create_dir_all(root.join("nested")).unwrap();

    let (tx, rx) = mpsc::channel(64);
    let watchers = RootWatchers::start(&[root.clone()], tx).unwrap();
    let handle = fx.engine.start(rx);

    let path = root.join("nested").join("tk.xml");
    fs::write(&path, declaration("ABC", "Decl01", "2025Q1", 77)).unwrap();

    let check = path.clone();
    let restored = wait_for(
        move || fs::read_to_string(&check).map(|c| c == template_xml()).unwrap_or(false),
        Duration::from_secs(10),
    )
    .await;
    assert!(restored);

    // Our own overwrite settles too, and stops at AlreadyCanonical
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(fx.engine.stats().protected, 1);
    assert_eq!(backups_of(&path).len(), 1);

    drop(watchers);
    handle.shutdown().await;
}
