//! Destinations for produced class files.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Accepts `(internal class name, class bytes)` pairs for a whole batch.
pub trait OutputSink {
    fn write_class(&mut self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Closes the container. No writes may follow.
    fn finish(&mut self) -> Result<()>;
}

/// Opens a jar sink for `.jar` and `.zip` paths, a directory sink otherwise.
pub fn open_sink(path: &Path) -> Result<Box<dyn OutputSink>> {
    let is_archive = path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| {
            extension.eq_ignore_ascii_case("jar") || extension.eq_ignore_ascii_case("zip")
        });
    if is_archive {
        Ok(Box::new(JarSink::create(path)?))
    } else {
        Ok(Box::new(DirectorySink::new(path)))
    }
}

/// Writes `<root>/<name>.class`.
#[derive(Debug)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl OutputSink for DirectorySink {
    fn write_class(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut path = self.root.clone();
        path.extend(format!("{name}.class").split('/'));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes one `<name>.class` entry per class into a zip archive.
pub struct JarSink {
    path: PathBuf,
    writer: Option<ZipWriter<File>>,
}

impl JarSink {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(ZipWriter::new(file)),
        })
    }
}

impl OutputSink for JarSink {
    fn write_class(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .with_context(|| format!("{} is already closed", self.path.display()))?;
        let entry = format!("{name}.class");
        writer
            .start_file(entry.as_str(), SimpleFileOptions::default())
            .with_context(|| format!("failed to write {}:{}", self.path.display(), entry))?;
        writer
            .write_all(bytes)
            .with_context(|| format!("failed to write {}:{}", self.path.display(), entry))
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .finish()
                .with_context(|| format!("failed to finish {}", self.path.display()))?;
        }
        Ok(())
    }
}
