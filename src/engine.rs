//! Policy engine for one domain: store mutation followed by a full rebuild.
//!
//! Every mutation resolves the device first, so an unknown device fails
//! before anything is written. The store is updated before synchronizing;
//! if the rebuild then fails, the store already holds the intended rules and
//! `sync` converges later.

use std::marker::PhantomData;
use std::path::PathBuf;
use tracing::warn;

use crate::device::{Device, DeviceDirectory};
use crate::enforcer::Synchronizer;
use crate::error::{PolicyError, Result};
use crate::fs_abstraction::FileSystem;
use crate::rules::PolicyRule;
use crate::store::RuleStore;

pub struct PolicyEngine<'a, R: PolicyRule, S: Synchronizer<R>> {
    enabled: bool,
    devices: &'a dyn DeviceDirectory,
    fs: &'a dyn FileSystem,
    synchronizer: S,
    _rule: PhantomData<R>,
}

impl<'a, R: PolicyRule, S: Synchronizer<R>> PolicyEngine<'a, R, S> {
    pub fn new(
        enabled: bool,
        devices: &'a dyn DeviceDirectory,
        fs: &'a dyn FileSystem,
        synchronizer: S,
    ) -> Self {
        Self {
            enabled,
            devices,
            fs,
            synchronizer,
            _rule: PhantomData,
        }
    }

    /// [`PolicyError::FeatureDisabled`] when the domain is switched off.
    pub fn ensure_enabled(&self) -> Result<()> {
        if self.enabled {
            Ok(())
        } else {
            Err(PolicyError::FeatureDisabled(R::DOMAIN))
        }
    }

    fn open(&self, device_id: &str) -> Result<(Device, RuleStore<'a, R>)> {
        self.ensure_enabled()?;
        let device = self.devices.resolve(device_id)?;
        let store = RuleStore::open(&self.devices.device_dir(device_id), self.fs);
        Ok((device, store))
    }

    async fn rebuild(&self, device: &Device, store: &RuleStore<'a, R>) -> Result<Vec<R>> {
        let rules = store.list()?;
        if let Err(e) = self.synchronizer.sync(device, &rules).await {
            warn!("{}: sync of {} failed: {}", R::DOMAIN, device.id, e);
            return Err(e);
        }
        Ok(rules)
    }

    /// Upsert a rule and rebuild. Returns the rule it replaced.
    pub async fn add(&self, device_id: &str, rule: R) -> Result<Option<R>> {
        let (device, store) = self.open(device_id)?;
        let replaced = store.add(rule)?;
        self.rebuild(&device, &store).await?;
        Ok(replaced)
    }

    /// Remove a rule and rebuild. Nothing is rebuilt when the key is absent.
    pub async fn remove(&self, device_id: &str, key: &R::Key) -> Result<R> {
        let (device, store) = self.open(device_id)?;
        let removed = store.remove(key)?;
        self.rebuild(&device, &store).await?;
        Ok(removed)
    }

    /// Rebuild from the current store. Returns the rules enforced.
    pub async fn sync(&self, device_id: &str) -> Result<Vec<R>> {
        let (device, store) = self.open(device_id)?;
        self.rebuild(&device, &store).await
    }

    pub fn list(&self, device_id: &str) -> Result<Vec<R>> {
        let (_, store) = self.open(device_id)?;
        store.list()
    }

    /// Archive the store, install an empty one and rebuild.
    pub async fn wipe(&self, device_id: &str) -> Result<Option<PathBuf>> {
        let (device, store) = self.open(device_id)?;
        let archived = store.wipe()?;
        self.rebuild(&device, &store).await?;
        Ok(archived)
    }
}
