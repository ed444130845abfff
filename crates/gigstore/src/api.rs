//! # API Facade
//!
//! [`Marketplace`] is the single entry point for gigstore operations. It owns
//! one [`EntityStore`] per kind, all sharing a backend, and hands out the
//! [`Guard`] and [`Validator`] built over them.
//!
//! Two kinds of callers use it:
//!
//! - **Application code** (request handlers) uses the typed stores directly:
//!   `market.gigs().read(&id)`, `market.projects().save(&p)`, and
//!   `market.guard().match_freelancer(..)` for anything that spans documents.
//! - **Operator tooling** (the CLI) uses the command methods, which take an
//!   [`EntityKind`] chosen at runtime and return a [`CmdResult`].
//!
//! ## Generic Over StorageBackend
//!
//! - Production: `Marketplace<FsBackend>`
//! - Testing: `Marketplace<MemBackend>`
//!
//! ## Events
//!
//! By default committed guard transitions are stored as notifications. Use
//! [`Marketplace::with_event_sink`] to deliver them elsewhere.

use crate::commands::{self, CmdResult};
use crate::config::StoreConfig;
use crate::error::Result;
use crate::guard::{EventSink, Guard, MatchRequest};
use crate::migrate::{self, MigrateOptions, MigrationSummary};
use crate::model::{Application, EntityId, EntityKind, Gig, GigRequest, Notification, Project};
use crate::store::{EntityStore, ReindexReport, StorageBackend};
use crate::validator::{ValidationReport, Validator};

/// Runs `$body` with `$store` bound to the store of `$kind`.
macro_rules! with_store {
    ($market:expr, $kind:expr, $store:ident => $body:expr) => {
        match $kind {
            EntityKind::Project => {
                let $store = &$market.projects;
                $body
            }
            EntityKind::Gig => {
                let $store = &$market.gigs;
                $body
            }
            EntityKind::Application => {
                let $store = &$market.applications;
                $body
            }
            EntityKind::GigRequest => {
                let $store = &$market.requests;
                $body
            }
            EntityKind::Notification => {
                let $store = &$market.notifications;
                $body
            }
        }
    };
}

pub struct Marketplace<B: StorageBackend> {
    backend: B,
    config: StoreConfig,
    projects: EntityStore<Project, B>,
    gigs: EntityStore<Gig, B>,
    applications: EntityStore<Application, B>,
    requests: EntityStore<GigRequest, B>,
    notifications: EntityStore<Notification, B>,
    event_sink: Option<Box<dyn EventSink>>,
}

impl<B: StorageBackend> Marketplace<B> {
    pub fn new(backend: B, config: StoreConfig) -> Self {
        let options = config.store_options();
        Self {
            projects: EntityStore::new(backend.clone(), options),
            gigs: EntityStore::new(backend.clone(), options),
            applications: EntityStore::new(backend.clone(), options),
            requests: EntityStore::new(backend.clone(), options),
            notifications: EntityStore::new(backend.clone(), options),
            backend,
            config,
            event_sink: None,
        }
    }

    /// Deliver guard events to `sink` instead of the notifications store.
    pub fn with_event_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn projects(&self) -> &EntityStore<Project, B> {
        &self.projects
    }

    pub fn gigs(&self) -> &EntityStore<Gig, B> {
        &self.gigs
    }

    pub fn applications(&self) -> &EntityStore<Application, B> {
        &self.applications
    }

    pub fn gig_requests(&self) -> &EntityStore<GigRequest, B> {
        &self.requests
    }

    pub fn notifications(&self) -> &EntityStore<Notification, B> {
        &self.notifications
    }

    pub fn guard(&self) -> Guard<'_, B> {
        let events: &dyn EventSink = match &self.event_sink {
            Some(sink) => sink.as_ref(),
            None => &self.notifications,
        };
        Guard::new(
            &self.projects,
            &self.gigs,
            &self.applications,
            &self.requests,
            events,
        )
    }

    pub fn validator(&self) -> Validator<'_, B> {
        Validator::new(&self.projects, &self.gigs, &self.applications, &self.requests)
    }

    /// Migrate every kind, in [`EntityKind::ALL`] order.
    pub fn migrate_all(&self, options: MigrateOptions) -> MigrationSummary {
        let mut summary = MigrationSummary {
            dry_run: options.dry_run,
            ..Default::default()
        };
        for kind in EntityKind::ALL {
            let report = with_store!(self, kind, store => migrate::migrate(store, options));
            summary.push(kind, report);
        }
        summary
    }

    pub fn reindex_all(&self) -> Result<Vec<(EntityKind, ReindexReport)>> {
        let mut reports = Vec::new();
        for kind in EntityKind::ALL {
            let report = with_store!(self, kind, store => store.reindex())?;
            reports.push((kind, report));
        }
        Ok(reports)
    }

    pub fn resolve(&self, kind: EntityKind, id: &EntityId) -> Result<CmdResult> {
        with_store!(self, kind, store => commands::resolve::run(store, id))
    }

    pub fn show(&self, kind: EntityKind, id: &EntityId) -> Result<CmdResult> {
        match kind {
            EntityKind::Project => commands::show::run_project(&self.projects, id),
            _ => with_store!(self, kind, store => commands::show::run(store, id)),
        }
    }

    pub fn list(&self, kind: EntityKind, parent: Option<&EntityId>) -> Result<CmdResult> {
        with_store!(self, kind, store => commands::list::run(store, parent))
    }

    /// Reindex one kind, or all of them.
    pub fn reindex(&self, kind: Option<EntityKind>) -> Result<CmdResult> {
        let kinds = match kind {
            Some(kind) => vec![kind],
            None => EntityKind::ALL.to_vec(),
        };
        let mut result = CmdResult::default();
        let mut reports = Vec::new();
        for kind in kinds {
            let report = with_store!(self, kind, store => commands::reindex::run(store, &mut result))?;
            reports.push((kind, report));
        }
        result.with_report(&reports)
    }

    pub fn migrate(&self, options: MigrateOptions) -> Result<CmdResult> {
        commands::migrate::run(&self.migrate_all(options))
    }

    pub fn validate(&self) -> Result<(CmdResult, ValidationReport)> {
        commands::validate::run(&self.validator())
    }

    pub fn match_freelancer(&self, request: &MatchRequest) -> Result<CmdResult> {
        commands::matching::match_freelancer(&self.guard(), request)
    }

    pub fn accept_request(
        &self,
        request_id: &EntityId,
        tasks: &[String],
        actor_id: Option<EntityId>,
    ) -> Result<CmdResult> {
        commands::matching::accept_request(&self.guard(), request_id, tasks, actor_id)
    }

    pub fn cancel_project(
        &self,
        project_id: &EntityId,
        actor_id: Option<EntityId>,
    ) -> Result<CmdResult> {
        commands::matching::cancel_project(&self.guard(), project_id, actor_id)
    }
}
