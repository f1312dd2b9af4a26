// Flattening of a nested Markdown tree into one directory.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

use zeek_rag_core::flatten::{flat_name, flatten_tree, plan, trace_name, FlattenConfig, FlattenError};

fn write(root: &Path, file: &str, content: &str) {
    let path = root.join(file);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn read_dir_sorted(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = fs::read_dir(dir)
        .unwrap()
        .map(|e| {
            let e = e.unwrap();
            (
                e.file_name().to_string_lossy().into_owned(),
                fs::read(e.path()).unwrap(),
            )
        })
        .collect();
    files.sort();
    files
}

struct TestCase {
    name: &'static str,
    files: Vec<&'static str>,
    expected: Vec<&'static str>,
}

#[test]
fn flat_names_table_driven() {
    let cases = vec![
        TestCase {
            name: "same leaf name in different directories",
            files: vec!["scripts/builtin-functions.md", "frameworks/builtin-functions.md"],
            expected: vec!["frameworks__builtin-functions.md", "scripts__builtin-functions.md"],
        },
        TestCase {
            name: "directory indexes",
            files: vec!["index.md", "a/index.md", "b/index.md"],
            expected: vec!["a__index.md", "b__index.md", "index.md"],
        },
        TestCase {
            name: "deep script reference",
            files: vec!["scripts/base/frameworks/logging/main.zeek.md"],
            expected: vec!["scripts__base__frameworks__logging__main.zeek.md"],
        },
    ];

    for case in cases {
        let src = tempdir().unwrap();
        for file in &case.files {
            write(src.path(), file, file);
        }
        let mut names: Vec<String> = plan(src.path(), "md")
            .unwrap()
            .into_iter()
            .map(|d| d.flat_name)
            .collect();
        names.sort();
        assert_eq!(names, case.expected, "case: {}", case.name);
    }
}

#[test]
fn copies_keep_their_content_and_the_nested_tree() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    write(src.path(), "scripts/builtin-functions.md", "# scripts version\n");
    write(src.path(), "frameworks/builtin-functions.md", "# frameworks version\n");
    write(src.path(), "notes.txt", "not markdown");

    let config = FlattenConfig {
        output_dir: out.path().join("flat"),
        manifest: Some(out.path().join("manifest.json")),
        ..Default::default()
    };
    let report = flatten_tree(src.path(), &config).unwrap();
    assert_eq!(report.documents.len(), 2);

    assert_eq!(
        fs::read_to_string(config.output_dir.join("scripts__builtin-functions.md")).unwrap(),
        "# scripts version\n"
    );
    assert_eq!(
        fs::read_to_string(config.output_dir.join("frameworks__builtin-functions.md")).unwrap(),
        "# frameworks version\n"
    );
    assert!(src.path().join("scripts/builtin-functions.md").exists(), "copy, not move");
    assert!(!config.output_dir.join("notes.txt").exists());

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.path().join("manifest.json")).unwrap()).unwrap();
    assert_eq!(
        manifest["scripts__builtin-functions.md"],
        "scripts/builtin-functions.md"
    );
}

#[test]
fn flattening_is_idempotent() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    write(src.path(), "index.md", "# index\n");
    write(src.path(), "a/index.md", "# a\n");
    write(src.path(), "a/b/c.md", "# c\n");

    let config = FlattenConfig {
        output_dir: out.path().join("flat"),
        ..Default::default()
    };
    flatten_tree(src.path(), &config).unwrap();
    let first = read_dir_sorted(&config.output_dir);
    fs::write(config.output_dir.join("leftover.md"), "stale").unwrap();
    flatten_tree(src.path(), &config).unwrap();
    let second = read_dir_sorted(&config.output_dir);

    assert_eq!(first, second);
}

#[test]
fn names_are_unique_and_traceable() {
    let src = tempdir().unwrap();
    let files = [
        "index.md",
        "a/index.md",
        "b/index.md",
        "a/b/index.md",
        "a_b/index.md",
        "install/install.md",
    ];
    for file in files {
        write(src.path(), file, file);
    }
    let planned = plan(src.path(), "md").unwrap();
    let names: BTreeSet<&str> = planned.iter().map(|d| d.flat_name.as_str()).collect();
    assert_eq!(names.len(), files.len());
    for doc in &planned {
        assert_eq!(trace_name(&doc.flat_name), doc.source);
    }
}

#[test]
fn colliding_names_fail_before_copying() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    // `a/b__c.md` and `a__b/c.md` both encode to `a__b__c.md`.
    write(src.path(), "a/b__c.md", "one");
    write(src.path(), "a__b/c.md", "two");

    let config = FlattenConfig {
        output_dir: out.path().join("flat"),
        ..Default::default()
    };
    let err = flatten_tree(src.path(), &config).unwrap_err();
    match err {
        FlattenError::Collision { flat_name, first, second } => {
            assert_eq!(flat_name, "a__b__c.md");
            let both: BTreeSet<PathBuf> = [first, second].into_iter().collect();
            assert!(both.contains(Path::new("a/b__c.md")));
            assert!(both.contains(Path::new("a__b/c.md")));
        }
        other => panic!("expected collision, got {other:?}"),
    }
    assert!(!config.output_dir.exists(), "nothing is copied on collision");
}

#[test]
fn missing_source_and_overlapping_output_are_rejected() {
    let src = tempdir().unwrap();
    write(src.path(), "index.md", "# index\n");

    let inside = FlattenConfig {
        output_dir: src.path().join("flat"),
        ..Default::default()
    };
    assert!(matches!(
        flatten_tree(src.path(), &inside),
        Err(FlattenError::OverlappingOutput { .. })
    ));

    let out = tempdir().unwrap();
    let config = FlattenConfig {
        output_dir: out.path().join("flat"),
        ..Default::default()
    };
    assert!(matches!(
        flatten_tree(&src.path().join("missing"), &config),
        Err(FlattenError::MissingSource(_))
    ));
    assert_eq!(flat_name(Path::new("a/b.md")), "a__b.md");
}

#[test]
fn output_enclosing_the_markdown_tree_is_rejected_and_tree_survives() {
    let out = tempdir().unwrap();
    let md = out.path().join("md");
    write(&md, "a/x.md", "# a/x\n");

    let enclosing = FlattenConfig {
        output_dir: out.path().to_path_buf(),
        ..Default::default()
    };
    assert!(matches!(
        flatten_tree(&md, &enclosing),
        Err(FlattenError::OverlappingOutput { .. })
    ));
    assert_eq!(fs::read_to_string(md.join("a/x.md")).unwrap(), "# a/x\n");
}
