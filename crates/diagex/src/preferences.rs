//! Remembered export choices (`.diagex/preferences.json`).
//!
//! Records the formats last used for each source file and how often each
//! format was exported. `diagex export` consults this when no format is given.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use diagex_render::ExportFormat;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Preferences {
    /// Formats of the latest export, keyed by source path.
    last_formats: BTreeMap<String, Vec<ExportFormat>>,
    /// Batches that included each format.
    usage: BTreeMap<ExportFormat, u64>,
    updated_at: Option<DateTime<Utc>>,
}

impl Preferences {
    /// Read preferences, starting fresh when the file is missing or unreadable.
    pub(crate) fn load(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable preferences");
            Self::default()
        })
    }

    pub(crate) fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Remember `formats` as the latest choice for every path in `sources`.
    pub(crate) fn record_export<'a>(
        &mut self,
        sources: impl IntoIterator<Item = &'a Path>,
        formats: &[ExportFormat],
    ) {
        for source in sources {
            self.last_formats
                .insert(source.to_string_lossy().into_owned(), formats.to_vec());
        }
        for format in formats {
            *self.usage.entry(*format).or_default() += 1;
        }
        self.updated_at = Some(Utc::now());
    }

    /// Formats to use when none were requested.
    ///
    /// The shared last-used formats when every source agrees, otherwise the
    /// most used format. Empty without history.
    pub(crate) fn default_formats<'a>(
        &self,
        sources: impl IntoIterator<Item = &'a Path>,
    ) -> Vec<ExportFormat> {
        let mut shared: Option<&Vec<ExportFormat>> = None;
        let mut agreed = true;
        for source in sources {
            let last = self.last_formats.get(source.to_string_lossy().as_ref());
            match (last, shared) {
                (None, _) => {
                    agreed = false;
                    break;
                }
                (Some(last), None) => shared = Some(last),
                (Some(last), Some(current)) if last != current => {
                    agreed = false;
                    break;
                }
                _ => {}
            }
        }
        if agreed && let Some(formats) = shared {
            return formats.clone();
        }

        // Ties go to the earlier format in `ExportFormat` order.
        self.usage
            .iter()
            .max_by(|(fa, a), (fb, b)| a.cmp(b).then_with(|| fb.cmp(fa)))
            .map(|(format, _)| vec![*format])
            .unwrap_or_default()
    }
}
