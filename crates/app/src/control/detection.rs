//! Detection settings and the label file consumed by the detector process.
//!
//! The detector polls a plain-text file holding one class name per line. An
//! empty file means detection is off. Writes go to a sibling temp file that
//! is renamed over the target, so a poll never sees a partial list.

use std::{
    collections::BTreeSet,
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use crate::control::analysis::AnalysisReply;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct DetectionConfig {
    pub(crate) detecting: bool,
    pub(crate) target_classes: BTreeSet<String>,
    pub(crate) analysis_prompt: String,
}

impl DetectionConfig {
    pub(crate) fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            analysis_prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Adopt the analysis service's view of what to detect.
    ///
    /// Classes are trimmed and blank names dropped. A reply that turns
    /// detection off also clears the classes. The prompt is only replaced
    /// when the reply carries a non-empty one.
    pub(crate) fn apply(&mut self, reply: &AnalysisReply) {
        self.detecting = reply.detecting;
        self.target_classes = if reply.detecting {
            normalise_classes(reply.target_classes.iter().map(String::as_str))
        } else {
            BTreeSet::new()
        };
        if let Some(prompt) = reply
            .analysis_prompt
            .as_deref()
            .map(str::trim)
            .filter(|prompt| !prompt.is_empty())
        {
            self.analysis_prompt = prompt.to_string();
        }
    }

    /// Classes the detector should look for right now.
    pub(crate) fn active_classes(&self) -> impl Iterator<Item = &str> {
        self.target_classes
            .iter()
            .map(String::as_str)
            .filter(|_| self.detecting)
    }
}

fn normalise_classes<'a>(classes: impl Iterator<Item = &'a str>) -> BTreeSet<String> {
    classes
        .map(str::trim)
        .filter(|class| !class.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) struct LabelFile {
    path: PathBuf,
    /// Generation of the last contents that reached disk.
    pub(super) written: Mutex<u64>,
}

impl LabelFile {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            written: Mutex::new(0),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// File contents for `config`: one active class per line.
    pub(crate) fn render(config: &DetectionConfig) -> String {
        let mut contents = String::new();
        for class in config.active_classes() {
            contents.push_str(class);
            contents.push('\n');
        }
        contents
    }

    /// Replace the file with the currently active classes.
    #[cfg(test)]
    pub(crate) fn write(&self, config: &DetectionConfig) -> io::Result<()> {
        self.replace(&Self::render(config))
    }

    /// Write `contents` unless a later generation is already on disk.
    ///
    /// Returns whether the file was replaced.
    pub(crate) fn write_generation(&self, generation: u64, contents: &str) -> io::Result<bool> {
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        if *written >= generation {
            return Ok(false);
        }
        self.replace(contents)?;
        *written = generation;
        Ok(true)
    }

    fn replace(&self, contents: &str) -> io::Result<()> {
        let mut tmp_name: OsString = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("labels"));
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        fs::write(&tmp_path, contents)?;
        fs::rename(&tmp_path, &self.path)
    }

    /// Load the classes a previous run left behind.
    pub(crate) fn load(&self) -> io::Result<Vec<String>> {
        read_labels(&self.path)
    }
}

/// Read a label file the way the detector does: a missing file means no
/// filter, blank lines are ignored.
pub(crate) fn read_labels(path: &Path) -> io::Result<Vec<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err),
    }
}
