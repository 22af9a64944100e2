//! OpenWrt UCI text format and a file-backed [`ConfigStore`].
//!
//! Only the subset the device settings need is understood:
//!
//! ```text
//! config settings
//! 	option Domain 'example.ispapp.co'
//! 	list pingTargets '1.1.1.1'
//! ```
//!
//! Values may be single quoted, double quoted or bare. Entry order survives a
//! load/save cycle, and so do full-line `#` comments and the `package` line.
//! Blank lines and comments trailing a directive are dropped on save. Other
//! directives are skipped.
//!
//! Values are always written on one line, so [`UciFileStore`] refuses to
//! commit a value carrying a line break or other control character.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::keys;
use crate::store::{check_value, ConfigStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UciEntry {
    Option { key: String, value: String },
    List { key: String, value: String },
    /// Full-line comment inside a section, kept verbatim including `#`.
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UciSection {
    pub section_type: String,
    pub name: Option<String>,
    pub entries: Vec<UciEntry>,
}

impl UciSection {
    pub fn new(section_type: impl Into<String>, name: Option<String>) -> Self {
        Self {
            section_type: section_type.into(),
            name,
            entries: Vec::new(),
        }
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.entries.iter().find_map(|entry| match entry {
            UciEntry::Option { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn list(&self, key: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                UciEntry::List { key: k, value } if k == key => Some(value.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Replace an option in place, or append it when absent.
    pub fn set_option(&mut self, key: &str, value: &str) {
        for entry in &mut self.entries {
            if let UciEntry::Option { key: k, value: v } = entry {
                if k == key {
                    *v = value.to_string();
                    return;
                }
            }
        }
        self.entries.push(UciEntry::Option {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UciDocument {
    /// Comments and `package` lines that appear outside any section.
    pub preamble: Vec<String>,
    pub sections: Vec<UciSection>,
}

impl UciDocument {
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let mut doc = UciDocument::default();

        for (index, line) in raw.lines().enumerate() {
            let line_no = index + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('#') {
                match doc.sections.last_mut() {
                    Some(section) => section.entries.push(UciEntry::Comment(trimmed.to_string())),
                    None => doc.preamble.push(trimmed.to_string()),
                }
                continue;
            }

            let words = tokenize(trimmed).map_err(|reason| StoreError::Parse {
                line: line_no,
                reason,
            })?;
            let Some((directive, args)) = words.split_first() else {
                continue;
            };

            match directive.as_str() {
                "package" => doc.preamble.push(trimmed.to_string()),
                "config" => {
                    let section_type = args.first().ok_or_else(|| StoreError::Parse {
                        line: line_no,
                        reason: "config without a section type".into(),
                    })?;
                    doc.sections
                        .push(UciSection::new(section_type.clone(), args.get(1).cloned()));
                }
                "option" | "list" => {
                    let (key, value) = match args {
                        [key, value, ..] => (key.clone(), value.clone()),
                        _ => {
                            return Err(StoreError::Parse {
                                line: line_no,
                                reason: format!("{directive} needs a key and a value"),
                            })
                        }
                    };
                    let section = doc.sections.last_mut().ok_or_else(|| StoreError::Parse {
                        line: line_no,
                        reason: format!("{directive} outside of a section"),
                    })?;
                    let entry = if directive == "option" {
                        UciEntry::Option { key, value }
                    } else {
                        UciEntry::List { key, value }
                    };
                    section.entries.push(entry);
                }
                other => {
                    tracing::debug!(
                        target: "ispapp::config",
                        line = line_no,
                        directive = other,
                        "skipping unsupported uci directive"
                    );
                }
            }
        }

        Ok(doc)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.preamble {
            let _ = writeln!(out, "{line}");
        }
        if !self.preamble.is_empty() {
            out.push('\n');
        }
        for section in &self.sections {
            match &section.name {
                Some(name) => {
                    let _ = writeln!(out, "config {} {}", section.section_type, quote(name));
                }
                None => {
                    let _ = writeln!(out, "config {}", section.section_type);
                }
            }
            for entry in &section.entries {
                let (directive, key, value) = match entry {
                    UciEntry::Option { key, value } => ("option", key, value),
                    UciEntry::List { key, value } => ("list", key, value),
                    UciEntry::Comment(text) => {
                        let _ = writeln!(out, "\t{text}");
                        continue;
                    }
                };
                let _ = writeln!(out, "\t{directive} {key} {}", quote(value));
            }
            out.push('\n');
        }
        out
    }

    /// First section of the given type, i.e. `@<type>[0]`.
    pub fn first_of_type(&self, section_type: &str) -> Option<&UciSection> {
        self.sections
            .iter()
            .find(|section| section.section_type == section_type)
    }

    pub fn first_of_type_mut(&mut self, section_type: &str) -> Option<&mut UciSection> {
        self.sections
            .iter_mut()
            .find(|section| section.section_type == section_type)
    }

    /// Like [`first_of_type_mut`](Self::first_of_type_mut) but appends an
    /// anonymous section when none exists yet.
    pub fn ensure_section(&mut self, section_type: &str) -> &mut UciSection {
        let index = match self
            .sections
            .iter()
            .position(|section| section.section_type == section_type)
        {
            Some(index) => index,
            None => {
                self.sections.push(UciSection::new(section_type, None));
                self.sections.len() - 1
            }
        };
        &mut self.sections[index]
    }
}

fn tokenize(line: &str) -> Result<Vec<String>, String> {
    #[derive(PartialEq)]
    enum Mode {
        Bare,
        Single,
        Double,
    }

    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut mode = Mode::Bare;
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match mode {
            Mode::Single => {
                if ch == '\'' {
                    mode = Mode::Bare;
                } else {
                    current.push(ch);
                }
            }
            Mode::Double => match ch {
                '"' => mode = Mode::Bare,
                '\\' => {
                    let escaped = chars.next().ok_or("dangling escape")?;
                    current.push(escaped);
                }
                _ => current.push(ch),
            },
            Mode::Bare => match ch {
                '\'' => {
                    mode = Mode::Single;
                    in_word = true;
                }
                '"' => {
                    mode = Mode::Double;
                    in_word = true;
                }
                '\\' => {
                    let escaped = chars.next().ok_or("dangling escape")?;
                    current.push(escaped);
                    in_word = true;
                }
                '#' if !in_word => break,
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                c => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }

    if mode != Mode::Bare {
        return Err("unterminated quote".into());
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

struct FileState {
    committed: UciDocument,
    staged: HashMap<String, String>,
    staged_order: Vec<String>,
}

/// [`ConfigStore`] over a UCI file, scoped to `@settings[0]`.
pub struct UciFileStore {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl UciFileStore {
    /// Load `path`. A missing file is treated as an empty package.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let committed = read_document(&path).await?;
        tracing::debug!(
            target: "ispapp::config",
            path = %path.display(),
            sections = committed.sections.len(),
            "loaded uci package"
        );
        Ok(Self {
            path,
            state: Mutex::new(FileState {
                committed,
                staged: HashMap::new(),
                staged_order: Vec::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the last committed document.
    pub async fn document(&self) -> UciDocument {
        self.state.lock().await.committed.clone()
    }
}

async fn read_document(path: &Path) -> Result<UciDocument, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => UciDocument::parse(&raw),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(UciDocument::default()),
        Err(err) => Err(StoreError::Io(err)),
    }
}

async fn write_document(path: &Path, doc: &UciDocument) -> Result<(), StoreError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| keys::PACKAGE.to_string());
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    tokio::fs::write(&tmp, doc.render()).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
    }
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StoreError::Io(err));
    }
    Ok(())
}

#[async_trait]
impl ConfigStore for UciFileStore {
    async fn get(&self, key: &str) -> Option<String> {
        let guard = self.state.lock().await;
        if let Some(value) = guard.staged.get(key) {
            return Some(value.clone());
        }
        guard
            .committed
            .first_of_type(keys::SECTION)
            .and_then(|section| section.option(key))
            .map(str::to_string)
    }

    async fn set(&self, key: &str, value: &str) {
        tracing::trace!(
            target: "ispapp::config",
            key,
            value = keys::redact(key, value),
            "staged uci option"
        );
        let mut guard = self.state.lock().await;
        if guard.staged.insert(key.to_string(), value.to_string()).is_none() {
            guard.staged_order.push(key.to_string());
        }
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        if guard.staged.is_empty() {
            return Ok(());
        }
        for (key, value) in &guard.staged {
            check_value(key, value)?;
        }

        // Re-read so edits made by other writers since open are kept.
        let mut doc = read_document(&self.path).await?;
        {
            let section = doc.ensure_section(keys::SECTION);
            for key in &guard.staged_order {
                if let Some(value) = guard.staged.get(key) {
                    section.set_option(key, value);
                }
            }
        }
        write_document(&self.path, &doc).await?;

        tracing::debug!(
            target: "ispapp::config",
            path = %self.path.display(),
            changed = guard.staged.len(),
            "committed uci changes"
        );
        guard.committed = doc;
        guard.staged.clear();
        guard.staged_order.clear();
        Ok(())
    }

    async fn revert(&self) {
        let mut guard = self.state.lock().await;
        guard.staged.clear();
        guard.staged_order.clear();
    }
}
