//! Documentation extensions: the project-specific markup knowledge the RST parser needs.
//!
//! The upstream project ships its Sphinx extensions as Python modules under `doc/ext/`.
//! Those files are staged next to the generated output for provenance (so a run records
//! exactly which extension sources it was built against), while the behaviour they add to
//! the documentation toolchain is expressed here as an [`ExtensionSet`]: a registry that
//! classifies every directive and role name the parser meets.
//!
//! Anything the registry does not know is classified as `Unknown` and rendered as
//! best-effort plain text instead of failing the document.

use crate::paths::overlaps;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Files reused from the upstream checkout: (path relative to the checkout, staged name).
pub const UPSTREAM_EXTENSION_FILES: [(&str, &str); 5] = [
    ("doc/conf.py", "conf.py"),
    ("doc/ext/zeek.py", "zeek.py"),
    ("doc/ext/zeek_pygments.py", "zeek_pygments.py"),
    ("doc/ext/spicy-pygments.py", "spicy-pygments.py"),
    ("doc/ext/literal-emph.py", "literal-emph.py"),
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtensionsConfig {
    /// Directory the upstream extension files are copied into.
    pub stage_dir: PathBuf,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            stage_dir: PathBuf::from("./ext"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("extension directory {stage_dir} overlaps the source tree {checkout}")]
    OverlappingStageDir { stage_dir: PathBuf, checkout: PathBuf },
    #[error("failed to prepare extension directory {path}: {source}")]
    StageDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of staging the upstream extension files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagedExtensions {
    pub stage_dir: PathBuf,
    pub staged: Vec<PathBuf>,
    /// Upstream paths that were not present in the checkout.
    pub missing: Vec<String>,
}

/// Recreates `stage_dir` and copies every upstream extension file found under `checkout`.
///
/// A missing file is logged and recorded, never fatal: older releases do not ship all of them.
pub fn stage_extensions(
    checkout: &Path,
    stage_dir: &Path,
) -> Result<StagedExtensions, ExtensionError> {
    info!(checkout = %checkout.display(), stage_dir = %stage_dir.display(), "Staging documentation extensions");

    if overlaps(stage_dir, checkout) {
        error!(checkout = %checkout.display(), stage_dir = %stage_dir.display(), "Extension directory overlaps the source tree");
        return Err(ExtensionError::OverlappingStageDir {
            stage_dir: stage_dir.to_path_buf(),
            checkout: checkout.to_path_buf(),
        });
    }
    if stage_dir.exists() {
        fs::remove_dir_all(stage_dir).map_err(|source| ExtensionError::StageDir {
            path: stage_dir.to_path_buf(),
            source,
        })?;
    }
    fs::create_dir_all(stage_dir).map_err(|source| ExtensionError::StageDir {
        path: stage_dir.to_path_buf(),
        source,
    })?;

    let mut report = StagedExtensions {
        stage_dir: stage_dir.to_path_buf(),
        ..Default::default()
    };

    for (relative, staged_name) in UPSTREAM_EXTENSION_FILES {
        let from = checkout.join(relative);
        if !from.is_file() {
            warn!(file = relative, "Extension file not found in checkout, skipping");
            report.missing.push(relative.to_string());
            continue;
        }
        let to = stage_dir.join(staged_name);
        fs::copy(&from, &to).map_err(|source| ExtensionError::Copy {
            from: from.clone(),
            to: to.clone(),
            source,
        })?;
        debug!(from = %from.display(), to = %to.display(), "Staged extension file");
        report.staged.push(to);
    }

    info!(
        staged = report.staged.len(),
        missing = report.missing.len(),
        "Extension staging complete"
    );
    Ok(report)
}

/// How the parser treats a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveKind {
    /// `code-block` and friends: argument is the language.
    Code,
    /// Literal block whose `**…**` markers only emphasise lines.
    LiteralEmph,
    LiteralInclude,
    Include,
    /// Sets the default language of later `::` blocks.
    Highlight,
    Admonition { label: String, argument: AdmonitionArgument },
    /// Renders its content; `titled` means the argument is a heading for it.
    Container { titled: bool },
    ListTable,
    CsvTable,
    Toctree,
    /// A documented object of a domain, rendered as its own segment.
    Object { objtype: String },
    Ignored,
    Unknown,
}

/// What an admonition-like directive does with its argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmonitionArgument {
    /// The argument is the first line of the content (`.. note:: text`).
    Content,
    /// The argument is the admonition's title (`.. admonition:: Title`).
    Title,
    /// First token is a version, the rest is content (`.. versionadded:: 5.0 text`).
    Version,
}

impl DirectiveKind {
    /// Directives docutils rejects when they have no content block.
    pub fn requires_content(&self) -> bool {
        match self {
            DirectiveKind::Code
            | DirectiveKind::LiteralEmph
            | DirectiveKind::ListTable
            | DirectiveKind::CsvTable => true,
            DirectiveKind::Admonition { argument, .. } => *argument != AdmonitionArgument::Version,
            _ => false,
        }
    }
}

/// How the renderer treats an interpreted-text role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleKind {
    /// `:doc:`, a link to another document.
    DocRef,
    /// `:ref:`, a link to a labelled section.
    LabelRef,
    /// Cross-reference to a domain object (`:zeek:type:` …).
    ObjectRef { objtype: String },
    Literal,
    Emphasis,
    Strong,
    Plain,
    Unknown,
}

/// Registry of directives, roles and highlight languages understood by the parser.
#[derive(Debug, Clone)]
pub struct ExtensionSet {
    name: String,
    primary_domain: Option<String>,
    directives: BTreeMap<String, DirectiveKind>,
    roles: BTreeMap<String, RoleKind>,
    languages: BTreeMap<String, String>,
    default_language: String,
    default_role: RoleKind,
}

impl ExtensionSet {
    /// Standard docutils and Sphinx markup only.
    pub fn docutils() -> Self {
        let mut set = ExtensionSet {
            name: "docutils".to_string(),
            primary_domain: None,
            directives: BTreeMap::new(),
            roles: BTreeMap::new(),
            languages: BTreeMap::new(),
            default_language: "text".to_string(),
            default_role: RoleKind::Literal,
        };

        for name in ["code-block", "code", "sourcecode"] {
            set.register_directive(name, DirectiveKind::Code);
        }
        set.register_directive("literalinclude", DirectiveKind::LiteralInclude);
        set.register_directive("include", DirectiveKind::Include);
        set.register_directive("highlight", DirectiveKind::Highlight);
        set.register_directive("toctree", DirectiveKind::Toctree);
        set.register_directive("list-table", DirectiveKind::ListTable);
        set.register_directive("csv-table", DirectiveKind::CsvTable);

        let admonitions = [
            ("note", "Note"),
            ("warning", "Warning"),
            ("tip", "Tip"),
            ("important", "Important"),
            ("caution", "Caution"),
            ("danger", "Danger"),
            ("error", "Error"),
            ("hint", "Hint"),
            ("attention", "Attention"),
            ("seealso", "See also"),
            ("todo", "Todo"),
        ];
        for (name, label) in admonitions {
            set.register_directive(
                name,
                DirectiveKind::Admonition {
                    label: label.to_string(),
                    argument: AdmonitionArgument::Content,
                },
            );
        }
        set.register_directive(
            "admonition",
            DirectiveKind::Admonition {
                label: String::new(),
                argument: AdmonitionArgument::Title,
            },
        );
        for (name, label) in [
            ("versionadded", "New in version"),
            ("versionchanged", "Changed in version"),
            ("deprecated", "Deprecated since version"),
        ] {
            set.register_directive(
                name,
                DirectiveKind::Admonition {
                    label: label.to_string(),
                    argument: AdmonitionArgument::Version,
                },
            );
        }

        for name in ["container", "only", "glossary", "figure", "hlist"] {
            set.register_directive(name, DirectiveKind::Container { titled: false });
        }
        for name in ["topic", "sidebar", "rubric", "table", "centered"] {
            set.register_directive(name, DirectiveKind::Container { titled: true });
        }
        for name in [
            "index",
            "contents",
            "image",
            "raw",
            "productionlist",
            "rst-class",
            "sectnum",
            "meta",
            "default-role",
            "tabularcolumns",
            "sectionauthor",
            "codeauthor",
        ] {
            set.register_directive(name, DirectiveKind::Ignored);
        }

        set.register_role("doc", RoleKind::DocRef);
        set.register_role("ref", RoleKind::LabelRef);
        for name in [
            "literal", "code", "file", "samp", "envvar", "option", "kbd", "math", "makevar",
            "regexp", "mimetype",
        ] {
            set.register_role(name, RoleKind::Literal);
        }
        for name in ["emphasis", "dfn", "title-reference", "t"] {
            set.register_role(name, RoleKind::Emphasis);
        }
        for name in ["strong", "command", "program", "guilabel", "menuselection"] {
            set.register_role(name, RoleKind::Strong);
        }
        for name in ["term", "abbr", "sub", "sup", "pep", "rfc", "download", "numref"] {
            set.register_role(name, RoleKind::Plain);
        }

        set
    }

    /// Docutils/Sphinx plus the Zeek documentation domain, highlighters and `literal-emph`.
    pub fn zeek() -> Self {
        let mut set = Self::docutils();
        set.name = "zeek".to_string();
        set.primary_domain = Some("zeek".to_string());
        // Untyped literal blocks in the manual are Zeek script.
        set.default_language = "zeek".to_string();

        for objtype in ["type", "native-type", "id", "enum", "field", "keyword"] {
            set.register_directive(
                &format!("zeek:{objtype}"),
                DirectiveKind::Object {
                    objtype: objtype.to_string(),
                },
            );
        }
        for objtype in [
            "type",
            "native-type",
            "id",
            "see",
            "enum",
            "field",
            "keyword",
            "attr",
        ] {
            set.register_role(
                &format!("zeek:{objtype}"),
                RoleKind::ObjectRef {
                    objtype: objtype.to_string(),
                },
            );
        }
        set.register_directive("literal-emph", DirectiveKind::LiteralEmph);

        set.register_language("zeek", "zeek");
        set.register_language("bro", "zeek");
        set.register_language("spicy", "spicy");
        set
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn register_directive(&mut self, name: &str, kind: DirectiveKind) {
        self.directives.insert(name.to_ascii_lowercase(), kind);
    }

    pub fn register_role(&mut self, name: &str, kind: RoleKind) {
        self.roles.insert(name.to_ascii_lowercase(), kind);
    }

    pub fn register_language(&mut self, alias: &str, canonical: &str) {
        self.languages
            .insert(alias.to_ascii_lowercase(), canonical.to_string());
    }

    /// Classifies a directive name; bare names also resolve inside the primary domain.
    pub fn directive(&self, name: &str) -> DirectiveKind {
        let name = name.to_ascii_lowercase();
        if let Some(kind) = self.directives.get(&name) {
            return kind.clone();
        }
        match &self.primary_domain {
            Some(domain) if !name.contains(':') => self
                .directives
                .get(&format!("{domain}:{name}"))
                .cloned()
                .unwrap_or(DirectiveKind::Unknown),
            _ => DirectiveKind::Unknown,
        }
    }

    /// Classifies a role name; the empty name is the default role.
    pub fn role(&self, name: &str) -> RoleKind {
        if name.is_empty() {
            return self.default_role.clone();
        }
        let name = name.to_ascii_lowercase();
        if let Some(kind) = self.roles.get(&name) {
            return kind.clone();
        }
        match &self.primary_domain {
            Some(domain) if !name.contains(':') => self
                .roles
                .get(&format!("{domain}:{name}"))
                .cloned()
                .unwrap_or(RoleKind::Unknown),
            _ => RoleKind::Unknown,
        }
    }

    /// Canonical fence language for a highlight name (aliases resolved, lowercase).
    pub fn language(&self, raw: &str) -> String {
        let raw = raw.trim().to_ascii_lowercase();
        if raw.is_empty() {
            return self.default_language.clone();
        }
        self.languages.get(&raw).cloned().unwrap_or(raw)
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// Guess a fence language from an included file's extension.
    pub fn language_for_path(&self, path: &Path) -> String {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "" => self.default_language.clone(),
            "sh" | "bash" => "bash".to_string(),
            "py" => "python".to_string(),
            "txt" | "log" => "text".to_string(),
            other => self
                .languages
                .get(other)
                .cloned()
                .unwrap_or_else(|| other.to_string()),
        }
    }
}

impl Default for ExtensionSet {
    fn default() -> Self {
        Self::zeek()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn zeek_set_classifies_domain_markup() {
        let set = ExtensionSet::zeek();
        assert_eq!(
            set.directive("zeek:type"),
            DirectiveKind::Object {
                objtype: "type".into()
            }
        );
        assert_eq!(
            set.role("zeek:see"),
            RoleKind::ObjectRef {
                objtype: "see".into()
            }
        );
        // primary domain lookup
        assert_eq!(
            set.role("id"),
            RoleKind::ObjectRef {
                objtype: "id".into()
            }
        );
        assert_eq!(set.directive("literal-emph"), DirectiveKind::LiteralEmph);
        assert_eq!(set.language("Bro"), "zeek");
        assert_eq!(set.language(""), "zeek");
    }

    #[test]
    fn unknown_markup_is_classified_not_rejected() {
        let set = ExtensionSet::docutils();
        assert_eq!(set.directive("btest-include"), DirectiveKind::Unknown);
        assert_eq!(set.role("zeek:type"), RoleKind::Unknown);
        assert_eq!(set.language("console"), "console");
        assert_eq!(set.default_language(), "text");
    }

    #[test]
    fn content_requirements_follow_docutils() {
        let set = ExtensionSet::zeek();
        assert!(set.directive("code-block").requires_content());
        assert!(set.directive("note").requires_content());
        assert!(!set.directive("versionadded").requires_content());
        assert!(!set.directive("toctree").requires_content());
    }

    #[test]
    fn stage_extensions_copies_present_files_and_records_missing() {
        let checkout = tempdir().unwrap();
        fs::create_dir_all(checkout.path().join("doc/ext")).unwrap();
        fs::write(checkout.path().join("doc/conf.py"), "project = 'Zeek'\n").unwrap();
        fs::write(checkout.path().join("doc/ext/zeek.py"), "# domain\n").unwrap();

        let out = tempdir().unwrap();
        let stage = out.path().join("ext");
        fs::create_dir_all(&stage).unwrap();
        fs::write(stage.join("stale.py"), "old").unwrap();

        let report = stage_extensions(checkout.path(), &stage).unwrap();

        assert_eq!(report.staged.len(), 2);
        assert_eq!(report.missing.len(), 3);
        assert!(stage.join("conf.py").is_file());
        assert!(stage.join("zeek.py").is_file());
        assert!(!stage.join("stale.py").exists(), "stage dir is recreated");
    }

    #[test]
    fn stage_dir_overlapping_the_checkout_is_refused() {
        let checkout = tempdir().unwrap();
        fs::create_dir_all(checkout.path().join("doc/ext")).unwrap();
        fs::write(checkout.path().join("doc/ext/zeek.py"), "# domain\n").unwrap();

        let inside = stage_extensions(checkout.path(), &checkout.path().join("doc/ext")).unwrap_err();
        assert!(matches!(inside, ExtensionError::OverlappingStageDir { .. }));

        let enclosing = stage_extensions(&checkout.path().join("doc"), checkout.path()).unwrap_err();
        assert!(matches!(enclosing, ExtensionError::OverlappingStageDir { .. }));

        assert!(checkout.path().join("doc/ext/zeek.py").is_file());
    }
}
