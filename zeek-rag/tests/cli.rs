use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write(root: &Path, file: &str, content: &str) {
    let path = root.join(file);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// A manual with two pages sharing a leaf name.
fn manual(root: &Path) {
    write(
        root,
        "index.rst",
        "Zeek\n====\n\n.. toctree::\n\n   scripts/builtin-functions\n   frameworks/builtin-functions\n",
    );
    write(root, "scripts/builtin-functions.rst", "Script Functions\n================\n\nFrom scripts.\n");
    write(root, "frameworks/builtin-functions.rst", "Framework Functions\n===================\n\nFrom frameworks.\n");
}

fn zeek_rag(work: &Path) -> Command {
    let mut cmd = Command::cargo_bin("zeek-rag").expect("Binary exists");
    cmd.current_dir(work)
        .env("MD_OUT_DIR", work.join("md"))
        .env("FLAT_OUT_DIR", work.join("flat"))
        .env("EXT_DIR", work.join("ext"))
        .env_remove("ZEEK_LOCAL_SRC")
        .env_remove("UPLOAD_ENABLED");
    cmd
}

#[test]
fn convert_then_flatten_happy_flow() {
    let src = tempdir().unwrap();
    let work = tempdir().unwrap();
    manual(src.path());

    zeek_rag(work.path())
        .arg("convert")
        .arg("--doc-root")
        .arg(src.path())
        .assert()
        .success();
    assert!(work.path().join("md/scripts/builtin-functions.md").is_file());

    zeek_rag(work.path())
        .arg("flatten")
        .arg("--manifest")
        .arg(work.path().join("manifest.json"))
        .assert()
        .success();

    let scripts = fs::read_to_string(work.path().join("flat/scripts__builtin-functions.md")).unwrap();
    let frameworks = fs::read_to_string(work.path().join("flat/frameworks__builtin-functions.md")).unwrap();
    assert!(scripts.contains("From scripts."));
    assert!(frameworks.contains("From frameworks."));
    assert!(work.path().join("manifest.json").is_file());
}

#[test]
fn convert_exits_non_zero_when_a_page_fails() {
    let src = tempdir().unwrap();
    let work = tempdir().unwrap();
    manual(src.path());
    write(src.path(), "broken.rst", "Broken\n======\n\n.. code-block:: zeek\n\nNo content.\n");

    zeek_rag(work.path())
        .arg("convert")
        .arg("--doc-root")
        .arg(src.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("broken.rst"));
    assert!(
        work.path().join("md/index.md").is_file(),
        "the other pages are still written"
    );
}

#[test]
fn build_with_local_source_runs_every_step() {
    let checkout = tempdir().unwrap();
    let work = tempdir().unwrap();
    manual(&checkout.path().join("doc"));
    write(checkout.path(), "doc/ext/zeek.py", "# domain\n");

    zeek_rag(work.path())
        .arg("build")
        .env("ZEEK_LOCAL_SRC", checkout.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Upload disabled"));
    assert!(work.path().join("ext/zeek.py").is_file());
    assert!(work.path().join("flat/index.md").is_file());
}

#[test]
fn tree_prints_the_outline() {
    let src = tempdir().unwrap();
    let work = tempdir().unwrap();
    manual(src.path());
    write(src.path(), "orphan.rst", "Orphan\n======\n");

    zeek_rag(work.path())
        .arg("tree")
        .arg("--doc-root")
        .arg(src.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("+ index\n  - scripts/builtin-functions\n"))
        .stdout(predicate::str::contains("(orphan) orphan"));
}

#[test]
fn invalid_config_fails_with_message() {
    let work = tempdir().unwrap();
    write(work.path(), "bad.yaml", "convert: [:::");

    zeek_rag(work.path())
        .arg("--config")
        .arg(work.path().join("bad.yaml"))
        .arg("convert")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config YAML"));
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*; // needed for .with()
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{event:?}"));
    }
}

#[tokio::test]
async fn emits_command_started_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use zeek_rag::cli::{run, Cli, Commands};

    let missing = tempdir().unwrap();
    let cli = Cli {
        config: Some(missing.path().join("dummy.yaml")),
        command: Commands::Tree {
            doc_root: None,
            json: false,
        },
    };

    let result = run(cli).await;
    assert!(result.is_err(), "a missing config file is an error");

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("command started")),
        "Expected a 'command started' trace event, got: {:?}",
        event_msgs
    );
}

#[test]
fn export_writes_json_and_reports_failed_pages() {
    let src = tempdir().unwrap();
    let work = tempdir().unwrap();
    manual(src.path());
    write(src.path(), "broken.rst", "Broken\n======\n\n.. code-block:: zeek\n\nNo content.\n");
    let output = work.path().join("out/zeek_rag.json");

    zeek_rag(work.path())
        .arg("export")
        .arg("--doc-root")
        .arg(src.path())
        .arg("--output")
        .arg(&output)
        .arg("--version-label")
        .arg("Zeek test")
        .assert()
        .failure()
        .stdout(predicate::str::contains("broken.rst"));

    let exported: serde_json::Value = serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    let docs = exported.as_array().unwrap();
    assert_eq!(docs.len(), 3, "every page that parsed is exported");
    let scripts = docs
        .iter()
        .find(|doc| doc["doc_id"] == "scripts/builtin-functions")
        .unwrap();
    assert_eq!(scripts["version"], "Zeek test");
    assert_eq!(scripts["sections"][0]["title"], "Script Functions");
    assert_eq!(scripts["sections"][0]["blocks"][0]["text"], "From scripts.");
}
