//! Persisted per-device rule lists.
//!
//! One file per device and policy domain, one rule per line, in priority
//! order. The file is meant to be hand-editable: blank lines and `#`
//! comments are ignored, and the list is re-sorted on load.

use chrono::{DateTime, Utc};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{PolicyError, Result};
use crate::fs_abstraction::FileSystem;
use crate::rules::{insert_by_priority, sort_by_priority, PolicyRule};

pub struct RuleStore<'a, R: PolicyRule> {
    path: PathBuf,
    fs: &'a dyn FileSystem,
    _rule: PhantomData<R>,
}

impl<'a, R: PolicyRule> RuleStore<'a, R> {
    /// Store for the rule file inside a device directory.
    pub fn open(device_dir: &Path, fs: &'a dyn FileSystem) -> Self {
        Self {
            path: device_dir.join(R::FILE_NAME),
            fs,
            _rule: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rules in priority order. A missing file is an empty store.
    pub fn list(&self) -> Result<Vec<R>> {
        if !self.fs.exists(&self.path) {
            return Ok(Vec::new());
        }

        let content = self.fs.read_to_string(&self.path)?;
        let mut rules = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let rule: R = line.parse().map_err(|e: PolicyError| {
                PolicyError::validation(format!(
                    "{}:{}: {}",
                    self.path.display(),
                    index + 1,
                    e
                ))
            })?;
            rules.push(rule);
        }

        sort_by_priority(&mut rules);
        Ok(rules)
    }

    /// Insert a rule, replacing every rule with the same key. Returns the
    /// first replaced rule.
    pub fn add(&self, rule: R) -> Result<Option<R>> {
        let key = rule.key();
        let (replaced, mut rules): (Vec<R>, Vec<R>) =
            self.list()?.into_iter().partition(|r| r.key() == key);
        let replaced = replaced.into_iter().next();

        insert_by_priority(&mut rules, rule);
        self.save(&rules)?;

        debug!(
            "{}: {} rule for {}",
            R::DOMAIN,
            if replaced.is_some() { "replaced" } else { "added" },
            key
        );
        Ok(replaced)
    }

    /// Remove every rule with `key`; [`PolicyError::NotFound`] if absent.
    pub fn remove(&self, key: &R::Key) -> Result<R> {
        let (removed, rules): (Vec<R>, Vec<R>) =
            self.list()?.into_iter().partition(|r| &r.key() == key);
        let removed = removed
            .into_iter()
            .next()
            .ok_or_else(|| PolicyError::NotFound(key.to_string()))?;

        self.save(&rules)?;
        debug!("{}: removed rule for {}", R::DOMAIN, key);
        Ok(removed)
    }

    /// Archive the current file and install an empty store. Returns the
    /// archive path, if there was anything to archive.
    pub fn wipe(&self) -> Result<Option<PathBuf>> {
        self.wipe_at(Utc::now())
    }

    pub(crate) fn wipe_at(&self, now: DateTime<Utc>) -> Result<Option<PathBuf>> {
        let archived = if self.fs.exists(&self.path) {
            let archive = self.archive_path(now);
            self.fs.rename(&self.path, &archive)?;
            info!("{}: archived rules to {}", R::DOMAIN, archive.display());
            Some(archive)
        } else {
            None
        };

        self.save(&[])?;
        Ok(archived)
    }

    fn archive_path(&self, now: DateTime<Utc>) -> PathBuf {
        let base = format!("{}.{}", self.path.display(), now.format("%Y%m%d%H%M%S"));
        let mut candidate = PathBuf::from(&base);
        let mut counter = 1;
        while self.fs.exists(&candidate) {
            candidate = PathBuf::from(format!("{}-{}", base, counter));
            counter += 1;
        }
        candidate
    }

    fn save(&self, rules: &[R]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            self.fs.create_dir_all(parent)?;
        }
        let content: String = rules.iter().map(|r| format!("{}\n", r)).collect();
        self.fs.write_atomic(&self.path, content.as_bytes())?;
        Ok(())
    }
}
