use crate::error::{Context, Result};
use crate::mapping::descriptor::MappingDescriptor;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Index key a target without an explicit descriptor falls back to, for
/// retrieve only.
pub const DEFAULT_SLOT: &str = "default";

/// Startup-built index of mapping descriptors, keyed by target id, base URL,
/// and the default slot. Read-only once serving begins.
#[derive(Clone, Debug, Default)]
pub struct MappingRepository {
    by_key: HashMap<String, Arc<MappingDescriptor>>,
}

/// Outcome of scanning one mappings directory.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub repository: MappingRepository,
    pub loaded: usize,
    pub skipped: Vec<MappingFault>,
}

#[derive(Debug)]
pub struct MappingFault {
    pub path: PathBuf,
    pub reason: String,
}

impl MappingRepository {
    /// Scan `dir` for files ending in `suffix`, in lexicographic filename
    /// order. A file that fails to parse is skipped and reported; it never
    /// aborts the remaining descriptors.
    ///
    /// Default slot: the first descriptor flagged `isDefault` claims it and a
    /// second flagged file is skipped whole; with no flag the last loaded
    /// descriptor fills it.
    pub fn load(dir: &Path, suffix: &str) -> Result<LoadReport> {
        let entries = fs::read_dir(dir)
            .with_context(|| format!("failed to read mappings directory {}", dir.display()))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(suffix))
            })
            .collect();
        paths.sort();

        let mut report = LoadReport::default();
        let mut explicit_default: Option<String> = None;
        let mut implicit_default: Option<String> = None;

        for path in paths {
            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(err) => {
                    skip_file(&mut report, &path, format!("unreadable: {err}"));
                    continue;
                }
            };
            let descriptor = match MappingDescriptor::parse(&text) {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    skip_file(&mut report, &path, err.to_string());
                    continue;
                }
            };

            if descriptor.is_default {
                if let Some(claimed) = &explicit_default {
                    skip_file(
                        &mut report,
                        &path,
                        format!("duplicate default mapping; target `{claimed}` already claims the default slot"),
                    );
                    continue;
                }
                explicit_default = Some(descriptor.target_id.clone());
            } else {
                implicit_default = Some(descriptor.target_id.clone());
            }

            let target_id = descriptor.target_id.clone();
            report.repository.index(Arc::new(descriptor));
            report.loaded += 1;
            tracing::info!(
                target: "turnstone::mapping",
                event = "mapping_loaded",
                path = %path.display(),
                target_id = %target_id,
            );
        }

        let default_target = explicit_default.clone().or(implicit_default);
        if let Some(target) = default_target {
            if let Some(descriptor) = report.repository.resolve(&target) {
                report
                    .repository
                    .by_key
                    .insert(DEFAULT_SLOT.to_string(), descriptor);
                tracing::info!(
                    target: "turnstone::mapping",
                    event = "default_mapping_selected",
                    target_id = %target,
                    explicit = explicit_default.is_some(),
                );
            }
        }

        Ok(report)
    }

    /// Index a descriptor directly, bypassing the directory scan.
    pub fn register(&mut self, descriptor: MappingDescriptor) {
        let shared = Arc::new(descriptor);
        if shared.is_default {
            self.by_key
                .insert(DEFAULT_SLOT.to_string(), Arc::clone(&shared));
        }
        self.index(shared);
    }

    pub fn resolve(&self, target: &str) -> Option<Arc<MappingDescriptor>> {
        self.by_key.get(target).cloned()
    }

    pub fn resolve_or_default(&self, target: &str) -> Option<Arc<MappingDescriptor>> {
        self.resolve(target).or_else(|| self.resolve(DEFAULT_SLOT))
    }

    pub fn default_descriptor(&self) -> Option<Arc<MappingDescriptor>> {
        self.resolve(DEFAULT_SLOT)
    }

    fn index(&mut self, descriptor: Arc<MappingDescriptor>) {
        self.by_key
            .insert(descriptor.target_id.clone(), Arc::clone(&descriptor));
        self.by_key.insert(descriptor.base_url.clone(), descriptor);
    }
}

fn skip_file(report: &mut LoadReport, path: &Path, reason: String) {
    tracing::warn!(
        target: "turnstone::mapping",
        event = "mapping_skipped",
        path = %path.display(),
        reason = %reason,
    );
    report.skipped.push(MappingFault {
        path: path.to_path_buf(),
        reason,
    });
}
