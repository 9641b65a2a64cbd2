//! Loading of compute program source units
//!
//! A program is built from one or more WGSL files. Each file may pull in
//! shared code with `#include "file.wgsl"` (or `#include <file.wgsl>`); the
//! include is spliced in place, and a file is only spliced once per unit.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};
use crate::gpu::program::SourceUnit;

/// Reads source units from disk and resolves their includes
pub struct SourceLoader {
    include_dirs: Vec<PathBuf>,
}

impl SourceLoader {
    pub fn new() -> Self {
        Self {
            include_dirs: Vec::new(),
        }
    }

    /// Add a directory searched for `#include` targets
    pub fn add_include_dir<P: AsRef<Path>>(&mut self, path: P) {
        self.include_dirs.push(path.as_ref().to_path_buf());
    }

    /// Load every path in order, one unit per path
    pub fn load_all<P: AsRef<Path>>(&self, paths: &[P]) -> EngineResult<Vec<SourceUnit>> {
        paths.iter().map(|p| self.load(p.as_ref())).collect()
    }

    /// Load one file as a source unit
    pub fn load(&self, path: &Path) -> EngineResult<SourceUnit> {
        let content = read_source(path)?;
        let mut seen = HashSet::new();
        seen.insert(path.to_path_buf());
        let text = self.expand(&content, path, &mut seen)?;

        log::debug!(
            "[SourceLoader::load] Loaded {} ({} bytes after includes)",
            path.display(),
            text.len()
        );

        Ok(SourceUnit::new(path.display().to_string(), text))
    }

    /// Expand includes in already-loaded text
    pub fn expand_text(&self, name: &str, content: &str) -> EngineResult<SourceUnit> {
        let mut seen = HashSet::new();
        let text = self.expand(content, Path::new(name), &mut seen)?;
        Ok(SourceUnit::new(name, text))
    }

    fn expand(&self, content: &str, current_file: &Path, seen: &mut HashSet<PathBuf>) -> EngineResult<String> {
        let mut result = String::with_capacity(content.len());
        let parent_dir = current_file.parent();

        for line in content.lines() {
            match parse_include_directive(line) {
                Some(include) => {
                    let resolved = self.resolve(&include, parent_dir)?;
                    if seen.insert(resolved.clone()) {
                        let included = read_source(&resolved)?;
                        let expanded = self.expand(&included, &resolved, seen)?;
                        result.push_str(&expanded);
                        if !expanded.ends_with('\n') {
                            result.push('\n');
                        }
                    } else {
                        log::trace!("[SourceLoader] Skipping repeated include {}", include);
                        result.push('\n');
                    }
                }
                None => {
                    result.push_str(line);
                    result.push('\n');
                }
            }
        }

        Ok(result)
    }

    fn resolve(&self, include: &str, current_dir: Option<&Path>) -> EngineResult<PathBuf> {
        let include_path = Path::new(include);

        let candidates = current_dir
            .into_iter()
            .chain(self.include_dirs.iter().map(PathBuf::as_path))
            .map(|dir| dir.join(include_path));

        for candidate in candidates {
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        Err(EngineError::Io {
            path: include_path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "include target not found in any include directory",
            ),
        })
    }
}

impl Default for SourceLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn read_source(path: &Path) -> EngineResult<String> {
    fs::read_to_string(path).map_err(|source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_include_directive(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix("#include")?.trim();
    if let Some(quoted) = rest.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        return Some(quoted.to_string());
    }
    rest.strip_prefix('<')
        .and_then(|r| r.strip_suffix('>'))
        .map(str::to_string)
}
