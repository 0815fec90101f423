//! Build orchestration
//!
//! One pass discovers every definition under `configs/`, builds each on a
//! bounded pool of workers and then regenerates the index of every
//! ecosystem. Failures stay with their package and end up in the
//! [`BuildReport`]; nothing here aborts the pass.
//!
//! The [`LockArena`] holds the only cross-worker state: a set of packages
//! currently building and one index lock per ecosystem.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use indicatif::ProgressBar;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::core::assembler::{Assembler, AssemblyStatus};
use crate::core::context::BuildServices;
use crate::core::definition;
use crate::core::interpreter::{self, Outcome};
use crate::core::layout::Ecosystem;
use crate::error::{DefinitionError, FailureKind};

/// Per-package and per-ecosystem locks
#[derive(Debug)]
pub struct LockArena {
    building: Mutex<HashSet<(String, Ecosystem)>>,
    indexes: HashMap<Ecosystem, tokio::sync::Mutex<()>>,
}

impl Default for LockArena {
    fn default() -> Self {
        Self {
            building: Mutex::new(HashSet::new()),
            indexes: Ecosystem::ALL
                .into_iter()
                .map(|eco| (eco, tokio::sync::Mutex::new(())))
                .collect(),
        }
    }
}

impl LockArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a package, or `None` when it is already building
    pub fn try_claim(&self, name: &str, ecosystem: Ecosystem) -> Option<PackageClaim<'_>> {
        let key = (name.to_string(), ecosystem);
        let mut building = self.building.lock().unwrap_or_else(PoisonError::into_inner);
        if !building.insert(key.clone()) {
            return None;
        }
        Some(PackageClaim { arena: self, key })
    }

    /// Serialize index regeneration for one ecosystem
    pub async fn index(&self, ecosystem: Ecosystem) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        match self.indexes.get(&ecosystem) {
            Some(lock) => Some(lock.lock().await),
            None => None,
        }
    }
}

/// Held while a package builds; releases the claim on drop
#[derive(Debug)]
pub struct PackageClaim<'a> {
    arena: &'a LockArena,
    key: (String, Ecosystem),
}

impl Drop for PackageClaim<'_> {
    fn drop(&mut self) {
        self.arena
            .building
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Result of one package in a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Built,
    UpToDate,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageReport {
    pub name: String,
    pub ecosystem: Option<Ecosystem>,
    pub definition: PathBuf,
    pub status: PackageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PackageReport {
    fn failed(
        name: String,
        ecosystem: Option<Ecosystem>,
        definition: PathBuf,
        kind: FailureKind,
        error: impl ToString,
    ) -> Self {
        Self {
            name,
            ecosystem,
            definition,
            status: PackageStatus::Failed,
            version: None,
            artifact: None,
            kind: Some(kind),
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssemblyReport {
    pub ecosystem: Ecosystem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AssemblyStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything one pass did
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub packages: Vec<PackageReport>,
    pub assemblies: Vec<AssemblyReport>,
    /// Orphaned payloads removed from `public/data`
    pub removed: Vec<PathBuf>,
}

impl BuildReport {
    pub fn failures(&self) -> impl Iterator<Item = &PackageReport> {
        self.packages
            .iter()
            .filter(|p| p.status == PackageStatus::Failed)
    }

    /// Whether any package or index failed
    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some() || self.assemblies.iter().any(|a| a.error.is_some())
    }

    pub fn count(&self, status: PackageStatus) -> usize {
        self.packages.iter().filter(|p| p.status == status).count()
    }
}

/// Drives one build pass
pub struct BuildOrchestrator {
    services: Arc<BuildServices>,
    assembler: Arc<Assembler>,
    locks: Arc<LockArena>,
    jobs: usize,
    only: Vec<String>,
    progress: Option<ProgressBar>,
}

impl std::fmt::Debug for BuildOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildOrchestrator")
            .field("jobs", &self.jobs)
            .field("only", &self.only)
            .finish_non_exhaustive()
    }
}

impl BuildOrchestrator {
    /// Orchestrator with its own lock arena and the configured worker count
    pub fn new(services: Arc<BuildServices>, assembler: Arc<Assembler>) -> Self {
        let jobs = services.settings.jobs();
        Self {
            services,
            assembler,
            locks: Arc::new(LockArena::new()),
            jobs,
            only: Vec::new(),
            progress: None,
        }
    }

    /// Share locks with other orchestrators over the same repository
    #[must_use]
    pub fn with_locks(mut self, locks: Arc<LockArena>) -> Self {
        self.locks = locks;
        self
    }

    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Restrict the pass to the named packages
    #[must_use]
    pub fn with_packages(mut self, names: Vec<String>) -> Self {
        self.only = names;
        self
    }

    /// Tick `bar` once per finished package
    #[must_use]
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Definitions to build this pass, plus reports for the ones rejected up front
    fn plan(&self) -> Result<(Vec<(PathBuf, String, Ecosystem)>, Vec<PackageReport>), DefinitionError> {
        let mut planned = Vec::new();
        let mut rejected = Vec::new();

        for path in definition::discover(&self.services.layout.configs())? {
            match definition::identity(&path) {
                Some((name, eco)) => planned.push((path, name, eco)),
                None => rejected.push(PackageReport::failed(
                    crate::infra::filesystem::file_name(&path),
                    None,
                    path.clone(),
                    FailureKind::Definition,
                    DefinitionError::UnknownSuffix { path },
                )),
            }
        }

        let ids: Vec<(String, Ecosystem)> =
            planned.iter().map(|(_, n, e)| (n.clone(), *e)).collect();
        let dups: HashSet<(String, Ecosystem)> = definition::duplicates(&ids).into_iter().collect();
        planned.retain(|(path, name, eco)| {
            if dups.contains(&(name.clone(), *eco)) {
                rejected.push(PackageReport::failed(
                    name.clone(),
                    Some(*eco),
                    path.clone(),
                    FailureKind::Definition,
                    format!("{name} is defined more than once for {eco}"),
                ));
                return false;
            }
            true
        });

        if !self.only.is_empty() {
            planned.retain(|(_, name, _)| self.only.contains(name));
            rejected.retain(|r| self.only.contains(&r.name));
        }
        Ok((planned, rejected))
    }

    /// Build every planned package, then assemble every index
    pub async fn run(&self) -> Result<BuildReport, DefinitionError> {
        let (planned, mut packages) = self.plan()?;
        tracing::info!(
            "Building {} package(s) with {} worker(s)",
            planned.len(),
            self.jobs
        );
        if let Some(bar) = &self.progress {
            bar.set_length(planned.len() as u64);
        }

        let semaphore = Arc::new(Semaphore::new(self.jobs.max(1)));
        let mut join_set = JoinSet::new();
        for (path, name, ecosystem) in planned {
            let services = Arc::clone(&self.services);
            let locks = Arc::clone(&self.locks);
            let semaphore = Arc::clone(&semaphore);
            let span = tracing::info_span!("package", name = %name, ecosystem = %ecosystem);

            join_set.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    build_one(&services, &locks, path, name, ecosystem).await
                }
                .instrument(span),
            );
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(report) => {
                    if let Some(bar) = &self.progress {
                        bar.set_message(report.name.clone());
                        bar.inc(1);
                    }
                    packages.push(report);
                }
                Err(e) => tracing::error!("Build task panicked: {e}"),
            }
        }
        if let Some(bar) = &self.progress {
            bar.finish_and_clear();
        }
        packages.sort_by(|a, b| (&a.name, a.ecosystem).cmp(&(&b.name, b.ecosystem)));

        let assemblies = self.assemble_all().await;

        let removed = match self.services.layout.clean_data() {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!("Failed to clean public data: {e}");
                Vec::new()
            }
        };

        Ok(BuildReport {
            packages,
            assemblies,
            removed,
        })
    }

    /// Regenerate every ecosystem's index under its lock
    pub async fn assemble_all(&self) -> Vec<AssemblyReport> {
        let mut reports = Vec::new();
        for ecosystem in Ecosystem::ALL {
            let _guard = self.locks.index(ecosystem).await;
            let report = match self.assembler.assemble(ecosystem).await {
                Ok(status) => AssemblyReport {
                    ecosystem,
                    status: Some(status),
                    error: None,
                },
                Err(e) => {
                    tracing::error!("Failed to assemble {ecosystem} index: {e}");
                    AssemblyReport {
                        ecosystem,
                        status: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            reports.push(report);
        }
        reports
    }
}

async fn build_one(
    services: &BuildServices,
    locks: &LockArena,
    path: PathBuf,
    name: String,
    ecosystem: Ecosystem,
) -> PackageReport {
    let Some(_claim) = locks.try_claim(&name, ecosystem) else {
        tracing::warn!("{name} is already building");
        return PackageReport::failed(
            name.clone(),
            Some(ecosystem),
            path,
            FailureKind::Busy,
            format!("{name} is already being built"),
        );
    };

    let definition = match definition::load(&path) {
        Ok(def) => def,
        Err(e) => {
            tracing::error!("{e}");
            return PackageReport::failed(name, Some(ecosystem), path, FailureKind::Definition, e);
        }
    };

    match interpreter::build(services, &definition).await {
        Ok(outcome) => {
            let (status, version, artifact) = match outcome {
                Outcome::Built { version, artifact } => (PackageStatus::Built, version, artifact),
                Outcome::UpToDate { version } => (PackageStatus::UpToDate, version, None),
            };
            PackageReport {
                name,
                ecosystem: Some(ecosystem),
                definition: path,
                status,
                version: Some(version),
                artifact,
                kind: None,
                error: None,
            }
        }
        Err(e) => {
            tracing::error!("{e}");
            PackageReport::failed(name, Some(ecosystem), path, e.kind(), e)
        }
    }
}
