// Converts a small manual with the Zeek extension set and checks the mirrored Markdown tree.

use pulldown_cmark::{Event, HeadingLevel, Parser, Tag};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

use zeek_rag_core::convert::{convert_tree, ConvertConfig};
use zeek_rag_core::extensions::ExtensionSet;

fn write(root: &Path, file: &str, content: &str) {
    let path = root.join(file);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn sample_manual(root: &Path) {
    write(
        root,
        "index.rst",
        "\
Zeek Documentation
==================

Start with :doc:`the function reference <scripts/builtin-functions>`.

.. toctree::
   :maxdepth: 1

   scripts/builtin-functions
   frameworks/builtin-functions
",
    );
    write(
        root,
        "scripts/builtin-functions.rst",
        "\
Function Reference
==================

.. zeek:id:: fmt
   :source-code: base/bif/zeek.bif.zeek 120 120

   :Type: :zeek:type:`function` (...) : :zeek:type:`string`

   Produces a formatted string.
",
    );
    write(
        root,
        "frameworks/builtin-functions.rst",
        "\
Functions in Frameworks
=======================

Frameworks call :zeek:id:`fmt` heavily.

.. code-block:: zeek

   print fmt(\"%s\", 1);
",
    );
    write(
        root,
        "broken.rst",
        "\
Broken
======

.. code-block:: zeek

Nothing indented follows the directive.
",
    );
    write(root, "ext/zeek.rst", "Not documentation.\n");
}

fn headings(markdown: &str) -> Vec<(HeadingLevel, String)> {
    let mut found = Vec::new();
    let mut current: Option<(HeadingLevel, String)> = None;
    for event in Parser::new(markdown) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => current = Some((level, String::new())),
            Event::Text(text) | Event::Code(text) => {
                if let Some((_, title)) = current.as_mut() {
                    title.push_str(&text);
                }
            }
            Event::End(pulldown_cmark::TagEnd::Heading(_)) => found.extend(current.take()),
            _ => {}
        }
    }
    found
}

#[test]
fn converts_every_parseable_file_and_reports_the_rest() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    sample_manual(src.path());

    let config = ConvertConfig {
        output_dir: out.path().join("md"),
        ..Default::default()
    };
    let report = convert_tree(src.path(), &config, &ExtensionSet::zeek()).unwrap();

    let mut converted: Vec<&str> = report.converted.iter().map(|d| d.docname.as_str()).collect();
    converted.sort();
    assert_eq!(
        converted,
        vec!["frameworks/builtin-functions", "index", "scripts/builtin-functions"]
    );
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].source_path.ends_with("broken.rst"));
    assert!(report.failed[0].reason.contains("code-block"), "{}", report.failed[0].reason);
    assert!(!report.is_complete());

    assert!(!config.output_dir.join("broken.md").exists());
    assert!(!config.output_dir.join("ext").exists());
}

#[test]
fn markdown_keeps_structure_and_links() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    sample_manual(src.path());
    let config = ConvertConfig {
        output_dir: out.path().join("md"),
        ..Default::default()
    };
    convert_tree(src.path(), &config, &ExtensionSet::zeek()).unwrap();

    let scripts = fs::read_to_string(config.output_dir.join("scripts/builtin-functions.md")).unwrap();
    assert_eq!(
        headings(&scripts),
        vec![
            (HeadingLevel::H1, "scripts/builtin-functions".to_string()),
            (HeadingLevel::H4, "Function Reference".to_string()),
            (HeadingLevel::H3, "id: fmt".to_string()),
        ]
    );
    assert!(scripts.contains("Produces a formatted string."));

    let frameworks = fs::read_to_string(config.output_dir.join("frameworks/builtin-functions.md")).unwrap();
    assert!(frameworks.starts_with("# frameworks/builtin-functions\n"), "{frameworks}");
    assert!(frameworks.contains("[`fmt`](../scripts/builtin-functions.md)"), "{frameworks}");
    assert!(frameworks.contains("```zeek\nprint fmt(\"%s\", 1);\n```"), "{frameworks}");

    let index = fs::read_to_string(config.output_dir.join("index.md")).unwrap();
    assert!(index.contains("[the function reference](scripts/builtin-functions.md)"), "{index}");
    assert!(index.contains("(frameworks/builtin-functions.md)"), "{index}");
}

#[test]
fn reruns_replace_stale_output() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    sample_manual(src.path());
    let config = ConvertConfig {
        output_dir: out.path().join("md"),
        ..Default::default()
    };
    fs::create_dir_all(&config.output_dir).unwrap();
    fs::write(config.output_dir.join("stale.md"), "old").unwrap();

    convert_tree(src.path(), &config, &ExtensionSet::zeek()).unwrap();
    let first = fs::read_to_string(config.output_dir.join("index.md")).unwrap();
    convert_tree(src.path(), &config, &ExtensionSet::zeek()).unwrap();
    let second = fs::read_to_string(config.output_dir.join("index.md")).unwrap();

    assert!(!config.output_dir.join("stale.md").exists());
    assert_eq!(first, second);
}
