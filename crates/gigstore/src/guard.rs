//! # Cross-Entity Consistency Guard
//!
//! A project, the gig it was created for, the accepted application and the
//! fulfilled gig request are separate documents. There is no transaction that
//! spans them, so the guard runs every multi-document change as a saga with an
//! explicit state machine:
//!
//! ```text
//! Created ──verify ok──▶ Verified ──flip ok──▶ Committed
//!    │                       │
//!    └─verify failed─▶ VerifyFailed   └─flip failed─▶ CommitFailed
//!                        │                              │
//!                        └──────────▶ RolledBack ◀──────┘
//!                                  (or RollbackFailed)
//! ```
//!
//! 1. **Create**: write the project and all its tasks.
//! 2. **Verify**: read both back from storage. The write path gives no
//!    transactional guarantee, so success is never assumed.
//! 3. **Commit** ([`Guard::enforce_consistency`]): flip the gig to
//!    `Unavailable` and the application and request to `accepted`, recording
//!    each previous status before touching it. The flips are read back too.
//! 4. **Roll back** ([`Guard::rollback`]) on any failure after step 1: restore
//!    the recorded statuses, delete the project with its tasks. Rollback is
//!    idempotent and tolerates a project that was never written.
//!
//! Callers observe either nothing or everything. A failed rollback is the one
//! exception: it surfaces as [`StoreError::RollbackFailure`] and is logged at
//! error level, since the store then needs repair (see [`crate::validator`]).
//!
//! ## Task Policy
//!
//! All tasks or none. A single failed task write, or a read-back count that
//! does not match, aborts the whole operation.
//!
//! ## Events
//!
//! After a commit, events go to an [`EventSink`] (by default the notifications
//! store). Delivery is fire-and-forget: a failing sink is logged and never
//! undoes the committed change.

use crate::error::{Result, StoreError};
use crate::model::{
    Application, EntityId, Gig, GigRequest, GigStatus, Notification, Project,
    ProjectStatus, ReviewStatus, Task,
};
use crate::store::{EntityStore, StorageBackend};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GuardPhase {
    Created,
    Verified,
    Committed,
    VerifyFailed,
    CommitFailed,
    RolledBack,
    RollbackFailed,
}

impl GuardPhase {
    pub fn can_advance_to(self, next: GuardPhase) -> bool {
        use GuardPhase::*;
        match (self, next) {
            (Created, Verified | VerifyFailed) => true,
            (Verified, Committed | CommitFailed) => true,
            (Committed, _) => false,
            (_, RolledBack | RollbackFailed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GuardPhase::Committed | GuardPhase::RolledBack | GuardPhase::RollbackFailed
        )
    }
}

impl fmt::Display for GuardPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GuardPhase::Created => "created",
            GuardPhase::Verified => "verified",
            GuardPhase::Committed => "committed",
            GuardPhase::VerifyFailed => "verify-failed",
            GuardPhase::CommitFailed => "commit-failed",
            GuardPhase::RolledBack => "rolled-back",
            GuardPhase::RollbackFailed => "rollback-failed",
        })
    }
}

/// A status change made during commit, with the value to restore on rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "entity", rename_all = "kebab-case")]
pub enum Flip {
    Gig { id: EntityId, previous: GigStatus },
    Application { id: EntityId, previous: ReviewStatus },
    Request { id: EntityId, previous: ReviewStatus },
}

impl fmt::Display for Flip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flip::Gig { id, .. } => write!(f, "gig {}", id),
            Flip::Application { id, .. } => write!(f, "application {}", id),
            Flip::Request { id, .. } => write!(f, "gig-request {}", id),
        }
    }
}

/// State of one saga run.
#[derive(Debug, Clone, Serialize)]
pub struct GuardContext {
    phase: GuardPhase,
    history: Vec<GuardPhase>,
    pub project_id: EntityId,
    pub freelancer_id: EntityId,
    pub commissioner_id: EntityId,
    pub gig_id: Option<EntityId>,
    pub application_id: Option<EntityId>,
    pub request_id: Option<EntityId>,
    /// The session user on whose behalf the change is made.
    pub actor_id: Option<EntityId>,
    pub expected_tasks: Vec<EntityId>,
    flips: Vec<Flip>,
    failure: Option<String>,
    /// The project as written, reported when it cannot be read back.
    #[serde(skip)]
    written: Project,
}

impl GuardContext {
    fn new(project: &Project, plan: &Plan) -> Self {
        Self {
            phase: GuardPhase::Created,
            history: vec![GuardPhase::Created],
            project_id: project.id.clone(),
            freelancer_id: project.freelancer_id.clone(),
            commissioner_id: project.commissioner_id.clone(),
            gig_id: plan.gig.as_ref().map(|g| g.id.clone()),
            application_id: plan.application.as_ref().map(|a| a.id.clone()),
            request_id: plan.request.as_ref().map(|r| r.id.clone()),
            actor_id: plan.actor_id.clone(),
            expected_tasks: Vec::new(),
            flips: Vec::new(),
            failure: None,
            written: project.clone(),
        }
    }

    pub fn phase(&self) -> GuardPhase {
        self.phase
    }

    pub fn history(&self) -> &[GuardPhase] {
        &self.history
    }

    pub fn flips(&self) -> &[Flip] {
        &self.flips
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn advance(&mut self, next: GuardPhase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(StoreError::GuardViolation(format!(
                "invalid transition {} -> {}",
                self.phase, next
            )));
        }
        self.phase = next;
        self.history.push(next);
        Ok(())
    }
}

/// Input of the "match freelancer to gig" flow.
#[derive(Debug, Clone)]
pub struct MatchRequest {
    pub gig_id: EntityId,
    pub freelancer_id: EntityId,
    pub commissioner_id: EntityId,
    pub application_id: Option<EntityId>,
    pub request_id: Option<EntityId>,
    pub project_id: Option<EntityId>,
    /// Defaults to the gig title.
    pub title: Option<String>,
    pub tasks: Vec<String>,
    pub actor_id: Option<EntityId>,
}

impl MatchRequest {
    pub fn new(
        gig_id: impl Into<EntityId>,
        freelancer_id: impl Into<EntityId>,
        commissioner_id: impl Into<EntityId>,
    ) -> Self {
        Self {
            gig_id: gig_id.into(),
            freelancer_id: freelancer_id.into(),
            commissioner_id: commissioner_id.into(),
            application_id: None,
            request_id: None,
            project_id: None,
            title: None,
            tasks: Vec::new(),
            actor_id: None,
        }
    }

    pub fn with_application(mut self, id: impl Into<EntityId>) -> Self {
        self.application_id = Some(id.into());
        self
    }

    pub fn with_request(mut self, id: impl Into<EntityId>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_project_id(mut self, id: impl Into<EntityId>) -> Self {
        self.project_id = Some(id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_tasks<I, S>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tasks = tasks.into_iter().map(Into::into).collect();
        self
    }

    pub fn acted_by(mut self, actor: impl Into<EntityId>) -> Self {
        self.actor_id = Some(actor.into());
        self
    }
}

/// What a committed saga produced, as read back from storage.
#[derive(Debug, Clone, Serialize)]
pub struct GuardOutcome {
    pub phase: GuardPhase,
    pub project: Project,
    pub tasks: Vec<Task>,
    pub gig: Option<Gig>,
    pub application: Option<Application>,
    pub request: Option<GigRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub project: Project,
    pub reopened_gig: Option<EntityId>,
    pub withdrawn_applications: Vec<EntityId>,
}

/// Notifications about committed transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    ProjectCreated {
        project_id: EntityId,
        gig_id: Option<EntityId>,
        freelancer_id: EntityId,
        commissioner_id: EntityId,
        actor_id: Option<EntityId>,
    },
    ApplicationAccepted {
        application_id: EntityId,
        freelancer_id: EntityId,
        actor_id: Option<EntityId>,
    },
    GigRequestAccepted {
        request_id: EntityId,
        commissioner_id: EntityId,
        actor_id: Option<EntityId>,
    },
    ProjectCancelled {
        project_id: EntityId,
        freelancer_id: EntityId,
        commissioner_id: EntityId,
        actor_id: Option<EntityId>,
    },
}

impl MarketEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MarketEvent::ProjectCreated { .. } => "project_created",
            MarketEvent::ApplicationAccepted { .. } => "application_accepted",
            MarketEvent::GigRequestAccepted { .. } => "gig_request_accepted",
            MarketEvent::ProjectCancelled { .. } => "project_cancelled",
        }
    }

    /// One notification per user the event concerns.
    pub fn notifications(&self) -> Vec<Notification> {
        let note = |target: &EntityId, actor: &Option<EntityId>, subject: &EntityId, msg: String| {
            let mut n = Notification::new(self.name(), target);
            n.actor_id = actor.clone();
            n.subject_id = Some(subject.clone());
            n.message = msg;
            n
        };
        match self {
            MarketEvent::ProjectCreated {
                project_id,
                freelancer_id,
                commissioner_id,
                actor_id,
                ..
            } => vec![
                note(freelancer_id, actor_id, project_id, format!("Project {} was created for you", project_id)),
                note(commissioner_id, actor_id, project_id, format!("Project {} has started", project_id)),
            ],
            MarketEvent::ApplicationAccepted {
                application_id,
                freelancer_id,
                actor_id,
            } => vec![note(
                freelancer_id,
                actor_id,
                application_id,
                format!("Your application {} was accepted", application_id),
            )],
            MarketEvent::GigRequestAccepted {
                request_id,
                commissioner_id,
                actor_id,
            } => vec![note(
                commissioner_id,
                actor_id,
                request_id,
                format!("Your gig request {} was accepted", request_id),
            )],
            MarketEvent::ProjectCancelled {
                project_id,
                freelancer_id,
                commissioner_id,
                actor_id,
            } => [freelancer_id, commissioner_id]
                .into_iter()
                .map(|target| {
                    note(target, actor_id, project_id, format!("Project {} was cancelled", project_id))
                })
                .collect(),
        }
    }
}

/// Receiver of [`MarketEvent`]s.
pub trait EventSink {
    fn emit(&self, event: &MarketEvent) -> Result<()>;
}

/// The default sink: every event becomes stored notifications.
impl<B: StorageBackend> EventSink for EntityStore<Notification, B> {
    fn emit(&self, event: &MarketEvent) -> Result<()> {
        for notification in event.notifications() {
            self.save(&notification)?;
        }
        Ok(())
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &MarketEvent) -> Result<()> {
        Ok(())
    }
}

struct Plan {
    project: Project,
    task_titles: Vec<String>,
    gig: Option<Gig>,
    application: Option<Application>,
    request: Option<GigRequest>,
    actor_id: Option<EntityId>,
}

pub struct Guard<'a, B: StorageBackend> {
    projects: &'a EntityStore<Project, B>,
    gigs: &'a EntityStore<Gig, B>,
    applications: &'a EntityStore<Application, B>,
    requests: &'a EntityStore<GigRequest, B>,
    events: &'a dyn EventSink,
}

impl<'a, B: StorageBackend> Guard<'a, B> {
    pub fn new(
        projects: &'a EntityStore<Project, B>,
        gigs: &'a EntityStore<Gig, B>,
        applications: &'a EntityStore<Application, B>,
        requests: &'a EntityStore<GigRequest, B>,
        events: &'a dyn EventSink,
    ) -> Self {
        Self {
            projects,
            gigs,
            applications,
            requests,
            events,
        }
    }

    /// Create a project for `request.freelancer_id` on a gig, accepting the
    /// given application and gig request.
    pub fn match_freelancer(&self, request: &MatchRequest) -> Result<GuardOutcome> {
        let mut ctx = self.prepare_match(request)?;
        self.commit(&mut ctx)
    }

    /// Turn a pending gig request into a project.
    pub fn accept_gig_request(
        &self,
        request_id: &EntityId,
        tasks: &[String],
        actor_id: Option<EntityId>,
    ) -> Result<GuardOutcome> {
        let mut ctx = self.prepare_request(request_id, tasks, actor_id)?;
        self.commit(&mut ctx)
    }

    /// Check preconditions, create the project and its tasks, verify them.
    /// Returns a context in phase `Verified`, ready for
    /// [`Self::enforce_consistency`].
    pub fn prepare_match(&self, request: &MatchRequest) -> Result<GuardContext> {
        let gig = self.available_gig(&request.gig_id)?;
        if gig.commissioner_id != request.commissioner_id {
            return Err(StoreError::GuardViolation(format!(
                "gig {} belongs to commissioner {}, not {}",
                gig.id, gig.commissioner_id, request.commissioner_id
            )));
        }

        let application = match &request.application_id {
            Some(id) => {
                let app = self.pending_application(id)?;
                if app.gig_id != gig.id || app.freelancer_id != request.freelancer_id {
                    return Err(StoreError::GuardViolation(format!(
                        "application {} is not freelancer {}'s application to gig {}",
                        id, request.freelancer_id, gig.id
                    )));
                }
                Some(app)
            }
            None => None,
        };

        let gig_request = match &request.request_id {
            Some(id) => {
                let req = self.pending_request(id)?;
                if req.freelancer_id != request.freelancer_id
                    || req.commissioner_id != request.commissioner_id
                {
                    return Err(StoreError::GuardViolation(format!(
                        "gig request {} is between different users",
                        id
                    )));
                }
                Some(req)
            }
            None => None,
        };

        let project_id = self.new_project_id(request.project_id.clone())?;
        let title = request.title.clone().unwrap_or_else(|| gig.title.clone());
        let project = Project::new(
            project_id,
            request.freelancer_id.clone(),
            request.commissioner_id.clone(),
            title,
        )
        .with_gig(gig.id.clone());

        self.prepare(Plan {
            project,
            task_titles: request.tasks.clone(),
            gig: Some(gig),
            application,
            request: gig_request,
            actor_id: request.actor_id.clone(),
        })
    }

    pub fn prepare_request(
        &self,
        request_id: &EntityId,
        tasks: &[String],
        actor_id: Option<EntityId>,
    ) -> Result<GuardContext> {
        let req = self.pending_request(request_id)?;
        let gig = match &req.gig_id {
            Some(gig_id) => Some(self.available_gig(gig_id)?),
            None => None,
        };

        let mut project = Project::new(
            self.new_project_id(None)?,
            req.freelancer_id.clone(),
            req.commissioner_id.clone(),
            req.title.clone(),
        );
        if let Some(gig) = &gig {
            project = project.with_gig(gig.id.clone());
        }

        if let Some(existing) = self
            .projects
            .read_all()
            .into_iter()
            .find(|p| p.is_active() && req.matches(p))
        {
            return Err(StoreError::GuardViolation(format!(
                "gig request {} is already fulfilled by active project {}",
                req.id, existing.id
            )));
        }

        self.prepare(Plan {
            project,
            task_titles: tasks.to_vec(),
            gig,
            application: None,
            request: Some(req),
            actor_id,
        })
    }

    /// Commit step: flip the gig, application and request, then confirm the
    /// flips against storage. Emits events once committed.
    pub fn enforce_consistency(&self, ctx: &mut GuardContext) -> Result<()> {
        if ctx.phase != GuardPhase::Verified {
            return Err(StoreError::GuardViolation(format!(
                "cannot commit in phase {}",
                ctx.phase
            )));
        }

        if let Some(id) = ctx.gig_id.clone() {
            let gig = self
                .gigs
                .read_strict(&id)?
                .ok_or_else(|| StoreError::not_found("gig", &id))?;
            ctx.flips.push(Flip::Gig {
                id: id.clone(),
                previous: gig.status,
            });
            self.gigs
                .update_with(&id, |g| g.status = GigStatus::Unavailable)?;
        }
        if let Some(id) = ctx.application_id.clone() {
            let app = self
                .applications
                .read_strict(&id)?
                .ok_or_else(|| StoreError::not_found("application", &id))?;
            ctx.flips.push(Flip::Application {
                id: id.clone(),
                previous: app.status,
            });
            self.applications
                .update_with(&id, |a| a.status = ReviewStatus::Accepted)?;
        }
        if let Some(id) = ctx.request_id.clone() {
            let req = self
                .requests
                .read_strict(&id)?
                .ok_or_else(|| StoreError::not_found("gig-request", &id))?;
            ctx.flips.push(Flip::Request {
                id: id.clone(),
                previous: req.status,
            });
            self.requests
                .update_with(&id, |r| r.status = ReviewStatus::Accepted)?;
        }

        self.confirm_flips(ctx)?;
        ctx.advance(GuardPhase::Committed)?;
        info!(project = %ctx.project_id, gig = ?ctx.gig_id, "guard committed");

        for event in committed_events(ctx) {
            if let Err(e) = self.events.emit(&event) {
                warn!(event = event.name(), error = %e, "event delivery failed");
            }
        }
        Ok(())
    }

    /// Undo a saga: restore every recorded status and delete the project
    /// with its tasks. Safe to call more than once.
    pub fn rollback(&self, ctx: &mut GuardContext) -> Result<()> {
        if ctx.phase == GuardPhase::Committed {
            return Err(StoreError::GuardViolation(format!(
                "project {} is committed; cancel it instead",
                ctx.project_id
            )));
        }

        let mut failures = Vec::new();
        for flip in ctx.flips.iter().rev() {
            match self.restore(flip) {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => failures.push(format!("restore {}: {}", flip, e)),
            }
        }

        match self.projects.delete(&ctx.project_id) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => failures.push(format!("delete project {}: {}", ctx.project_id, e)),
        }
        if failures.is_empty() && self.projects.resolve(&ctx.project_id).is_some() {
            failures.push(format!("project {} still present", ctx.project_id));
        }

        if failures.is_empty() {
            ctx.advance(GuardPhase::RolledBack)?;
            info!(project = %ctx.project_id, "guard rolled back");
            return Ok(());
        }

        ctx.advance(GuardPhase::RollbackFailed)?;
        error!(
            project = %ctx.project_id,
            failures = ?failures,
            "rollback failed, store needs repair"
        );
        Err(StoreError::RollbackFailure {
            project_id: ctx.project_id.to_string(),
            cause: ctx
                .failure
                .clone()
                .unwrap_or_else(|| "explicit rollback".to_string()),
            failures,
        })
    }

    /// Mark a project cancelled and reopen its gig when no other active
    /// project holds it. Accepted applications for the same gig and
    /// freelancer are withdrawn (set to `rejected`).
    pub fn cancel_project(
        &self,
        project_id: &EntityId,
        actor_id: Option<EntityId>,
    ) -> Result<CancelOutcome> {
        let project = self
            .projects
            .read_strict(project_id)?
            .ok_or_else(|| StoreError::not_found("project", project_id))?;
        if !project.is_active() {
            return Err(StoreError::GuardViolation(format!(
                "project {} is {:?}, only active projects can be cancelled",
                project_id, project.status
            )));
        }

        let project = self
            .projects
            .update_with(project_id, |p| p.status = ProjectStatus::Cancelled)?;

        let mut reopened_gig = None;
        let mut withdrawn_applications = Vec::new();
        if let Some(gig_id) = &project.gig_id {
            let still_held = self
                .projects
                .read_by_parent(gig_id)
                .iter()
                .any(|p| p.id != project.id && p.is_active());
            if !still_held {
                match self.gigs.read_strict(gig_id)? {
                    Some(gig) if gig.status == GigStatus::Unavailable => {
                        self.gigs
                            .update_with(gig_id, |g| g.status = GigStatus::Available)?;
                        reopened_gig = Some(gig_id.clone());
                    }
                    Some(_) => {}
                    None => warn!(gig = %gig_id, project = %project_id, "cancelled project references a missing gig"),
                }

                for app in self.applications.read_by_parent(gig_id) {
                    if app.status == ReviewStatus::Accepted
                        && app.freelancer_id == project.freelancer_id
                    {
                        self.applications
                            .update_with(&app.id, |a| a.status = ReviewStatus::Rejected)?;
                        withdrawn_applications.push(app.id);
                    }
                }
            }
        }

        info!(project = %project_id, gig = ?project.gig_id, reopened = reopened_gig.is_some(), "project cancelled");
        let event = MarketEvent::ProjectCancelled {
            project_id: project.id.clone(),
            freelancer_id: project.freelancer_id.clone(),
            commissioner_id: project.commissioner_id.clone(),
            actor_id,
        };
        if let Err(e) = self.events.emit(&event) {
            warn!(event = event.name(), error = %e, "event delivery failed");
        }

        Ok(CancelOutcome {
            project,
            reopened_gig,
            withdrawn_applications,
        })
    }

    fn commit(&self, ctx: &mut GuardContext) -> Result<GuardOutcome> {
        if let Err(e) = self.enforce_consistency(ctx) {
            return Err(self.abort(ctx, GuardPhase::CommitFailed, e));
        }
        // Committed from here on: a failed read-back is not a failed match.
        let project = match self.projects.read_strict(&ctx.project_id) {
            Ok(Some(project)) => project,
            Ok(None) => {
                warn!(project = %ctx.project_id, "committed project not found on read-back");
                ctx.written.clone()
            }
            Err(e) => {
                warn!(project = %ctx.project_id, error = %e, "committed project could not be read back");
                ctx.written.clone()
            }
        };
        Ok(GuardOutcome {
            phase: ctx.phase,
            tasks: self.projects.read_tasks(&ctx.project_id),
            gig: ctx.gig_id.as_ref().and_then(|id| self.gigs.read(id)),
            application: ctx
                .application_id
                .as_ref()
                .and_then(|id| self.applications.read(id)),
            request: ctx.request_id.as_ref().and_then(|id| self.requests.read(id)),
            project,
        })
    }

    fn prepare(&self, plan: Plan) -> Result<GuardContext> {
        let mut ctx = GuardContext::new(&plan.project, &plan);
        info!(project = %ctx.project_id, gig = ?ctx.gig_id, tasks = plan.task_titles.len(), "guard creating project");

        if let Err(e) = self.create(&plan, &mut ctx) {
            return Err(self.abort(&mut ctx, GuardPhase::VerifyFailed, e));
        }
        if let Err(e) = self.verify(&ctx) {
            return Err(self.abort(&mut ctx, GuardPhase::VerifyFailed, e));
        }
        ctx.advance(GuardPhase::Verified)?;
        Ok(ctx)
    }

    fn create(&self, plan: &Plan, ctx: &mut GuardContext) -> Result<()> {
        self.projects.save(&plan.project)?;
        for (i, title) in plan.task_titles.iter().enumerate() {
            let task = Task::new(plan.project.id.clone(), title.clone(), i as u32 + 1);
            ctx.expected_tasks.push(task.id.clone());
            self.projects.save_task(&task)?;
        }
        Ok(())
    }

    fn verify(&self, ctx: &GuardContext) -> Result<()> {
        let project = self.projects.read_strict(&ctx.project_id)?.ok_or_else(|| {
            StoreError::GuardViolation(format!(
                "project {} not found on read-back",
                ctx.project_id
            ))
        })?;
        if project.gig_id != ctx.gig_id || project.freelancer_id != ctx.freelancer_id {
            return Err(StoreError::GuardViolation(format!(
                "project {} read back with different content",
                ctx.project_id
            )));
        }

        let tasks = self.projects.read_tasks(&ctx.project_id);
        let found: BTreeSet<&EntityId> = tasks.iter().map(|t| &t.id).collect();
        if tasks.len() != ctx.expected_tasks.len()
            || !ctx.expected_tasks.iter().all(|id| found.contains(id))
        {
            return Err(StoreError::GuardViolation(format!(
                "expected {} tasks for project {}, found {}",
                ctx.expected_tasks.len(),
                ctx.project_id,
                tasks.len()
            )));
        }

        if let Some(gig_id) = &ctx.gig_id {
            let active = self
                .projects
                .read_by_parent(gig_id)
                .into_iter()
                .filter(|p| p.is_active())
                .count();
            if active != 1 {
                return Err(StoreError::GuardViolation(format!(
                    "gig {} has {} active projects",
                    gig_id, active
                )));
            }
        }
        Ok(())
    }

    fn confirm_flips(&self, ctx: &GuardContext) -> Result<()> {
        let unconfirmed = |what: String| {
            StoreError::GuardViolation(format!("{} did not persist", what))
        };
        if let Some(id) = &ctx.gig_id {
            if self.gigs.read_strict(id)?.map(|g| g.status) != Some(GigStatus::Unavailable) {
                return Err(unconfirmed(format!("gig {} flip", id)));
            }
        }
        if let Some(id) = &ctx.application_id {
            if self.applications.read_strict(id)?.map(|a| a.status) != Some(ReviewStatus::Accepted)
            {
                return Err(unconfirmed(format!("application {} flip", id)));
            }
        }
        if let Some(id) = &ctx.request_id {
            if self.requests.read_strict(id)?.map(|r| r.status) != Some(ReviewStatus::Accepted) {
                return Err(unconfirmed(format!("gig-request {} flip", id)));
            }
        }
        Ok(())
    }

    fn abort(&self, ctx: &mut GuardContext, failed: GuardPhase, cause: StoreError) -> StoreError {
        let at = ctx.phase;
        warn!(project = %ctx.project_id, phase = %at, error = %cause, "guard failed, rolling back");
        ctx.failure = Some(cause.to_string());
        if let Err(e) = ctx.advance(failed) {
            warn!(error = %e, "unexpected guard transition");
        }
        match self.rollback(ctx) {
            Ok(()) => StoreError::Aborted {
                phase: at,
                source: Box::new(cause),
            },
            Err(rollback_error) => rollback_error,
        }
    }

    /// Put a flipped status back. A flip whose write never landed is a no-op.
    fn restore(&self, flip: &Flip) -> Result<()> {
        match flip {
            Flip::Gig { id, previous } => {
                let previous = *previous;
                if self.gigs.read_strict(id)?.map(|g| g.status) != Some(previous) {
                    self.gigs.update_with(id, |g| g.status = previous)?;
                }
            }
            Flip::Application { id, previous } => {
                let previous = *previous;
                if self.applications.read_strict(id)?.map(|a| a.status) != Some(previous) {
                    self.applications.update_with(id, |a| a.status = previous)?;
                }
            }
            Flip::Request { id, previous } => {
                let previous = *previous;
                if self.requests.read_strict(id)?.map(|r| r.status) != Some(previous) {
                    self.requests.update_with(id, |r| r.status = previous)?;
                }
            }
        }
        Ok(())
    }

    fn available_gig(&self, id: &EntityId) -> Result<Gig> {
        let gig = self
            .gigs
            .read(id)
            .ok_or_else(|| StoreError::GuardViolation(format!("gig {} does not exist", id)))?;
        if gig.status != GigStatus::Available {
            return Err(StoreError::GuardViolation(format!(
                "gig {} is not available",
                id
            )));
        }
        if let Some(active) = self
            .projects
            .read_by_parent(id)
            .into_iter()
            .find(|p| p.is_active())
        {
            return Err(StoreError::GuardViolation(format!(
                "gig {} already has active project {}",
                id, active.id
            )));
        }
        Ok(gig)
    }

    fn pending_application(&self, id: &EntityId) -> Result<Application> {
        let app = self.applications.read(id).ok_or_else(|| {
            StoreError::GuardViolation(format!("application {} does not exist", id))
        })?;
        if app.status != ReviewStatus::Pending {
            return Err(StoreError::GuardViolation(format!(
                "application {} is not pending",
                id
            )));
        }
        Ok(app)
    }

    fn pending_request(&self, id: &EntityId) -> Result<GigRequest> {
        let req = self.requests.read(id).ok_or_else(|| {
            StoreError::GuardViolation(format!("gig request {} does not exist", id))
        })?;
        if req.status != ReviewStatus::Pending {
            return Err(StoreError::GuardViolation(format!(
                "gig request {} is not pending",
                id
            )));
        }
        Ok(req)
    }

    fn new_project_id(&self, requested: Option<EntityId>) -> Result<EntityId> {
        let id = requested.unwrap_or_else(EntityId::generate);
        if !id.is_valid_segment() {
            return Err(StoreError::InvalidPath(id.to_string()));
        }
        if self.projects.resolve(&id).is_some() {
            return Err(StoreError::GuardViolation(format!(
                "project {} already exists",
                id
            )));
        }
        Ok(id)
    }
}

fn committed_events(ctx: &GuardContext) -> Vec<MarketEvent> {
    let mut events = vec![MarketEvent::ProjectCreated {
        project_id: ctx.project_id.clone(),
        gig_id: ctx.gig_id.clone(),
        freelancer_id: ctx.freelancer_id.clone(),
        commissioner_id: ctx.commissioner_id.clone(),
        actor_id: ctx.actor_id.clone(),
    }];
    if let Some(id) = &ctx.application_id {
        events.push(MarketEvent::ApplicationAccepted {
            application_id: id.clone(),
            freelancer_id: ctx.freelancer_id.clone(),
            actor_id: ctx.actor_id.clone(),
        });
    }
    if let Some(id) = &ctx.request_id {
        events.push(MarketEvent::GigRequestAccepted {
            request_id: id.clone(),
            commissioner_id: ctx.commissioner_id.clone(),
            actor_id: ctx.actor_id.clone(),
        });
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mem_backend::MemBackend;
    use crate::store::StoreOptions;
    use std::cell::RefCell;

    struct Stores {
        backend: MemBackend,
        projects: EntityStore<Project, MemBackend>,
        gigs: EntityStore<Gig, MemBackend>,
        applications: EntityStore<Application, MemBackend>,
        requests: EntityStore<GigRequest, MemBackend>,
        notifications: EntityStore<Notification, MemBackend>,
    }

    impl Stores {
        fn new() -> Self {
            let backend = MemBackend::new();
            let options = StoreOptions::default();
            Self {
                projects: EntityStore::new(backend.clone(), options),
                gigs: EntityStore::new(backend.clone(), options),
                applications: EntityStore::new(backend.clone(), options),
                requests: EntityStore::new(backend.clone(), options),
                notifications: EntityStore::new(backend.clone(), options),
                backend,
            }
        }

        fn guard(&self) -> Guard<'_, MemBackend> {
            Guard::new(
                &self.projects,
                &self.gigs,
                &self.applications,
                &self.requests,
                &self.notifications,
            )
        }

        fn seed(&self) {
            self.gigs.save(&Gig::new("g1", "9", "Logo design")).unwrap();
            self.applications
                .save(&Application::new("a1", "g1", "7"))
                .unwrap();
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: RefCell<Vec<MarketEvent>>,
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: &MarketEvent) -> Result<()> {
            self.events.borrow_mut().push(event.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn emit(&self, _event: &MarketEvent) -> Result<()> {
            Err(StoreError::Store("sink offline".into()))
        }
    }

    fn assert_untouched(s: &Stores) {
        assert_eq!(
            s.gigs.read(&"g1".into()).unwrap().status,
            GigStatus::Available
        );
        assert_eq!(
            s.applications.read(&"a1".into()).unwrap().status,
            ReviewStatus::Pending
        );
        assert!(s.projects.read_all().is_empty());
    }

    #[test]
    fn test_phase_transitions() {
        use GuardPhase::*;
        assert!(Created.can_advance_to(Verified));
        assert!(Created.can_advance_to(VerifyFailed));
        assert!(Verified.can_advance_to(Committed));
        assert!(VerifyFailed.can_advance_to(RolledBack));
        assert!(RolledBack.can_advance_to(RolledBack));
        assert!(!Created.can_advance_to(Committed));
        assert!(!Committed.can_advance_to(RolledBack));
    }

    #[test]
    fn test_match_commits_everything() {
        let s = Stores::new();
        s.seed();

        let outcome = s
            .guard()
            .match_freelancer(
                &MatchRequest::new("g1", "7", "9")
                    .with_application("a1")
                    .with_tasks(["Sketch", "Final"]),
            )
            .unwrap();

        assert_eq!(outcome.phase, GuardPhase::Committed);
        assert_eq!(outcome.project.gig_id, Some(EntityId::from("g1")));
        assert_eq!(outcome.project.title, "Logo design");
        assert_eq!(outcome.tasks.len(), 2);
        assert_eq!(outcome.gig.unwrap().status, GigStatus::Unavailable);
        assert_eq!(outcome.application.unwrap().status, ReviewStatus::Accepted);

        let active: Vec<_> = s
            .projects
            .read_by_parent(&"g1".into())
            .into_iter()
            .filter(|p| p.is_active())
            .collect();
        assert_eq!(active.len(), 1);

        // project_created (2 users) + application_accepted (1 user)
        assert_eq!(s.notifications.read_all().len(), 3);
    }

    #[test]
    fn test_preconditions_write_nothing() {
        let s = Stores::new();
        s.seed();
        let before = s.backend.snapshot();

        let wrong_owner = s
            .guard()
            .match_freelancer(&MatchRequest::new("g1", "7", "10"));
        assert!(matches!(wrong_owner, Err(StoreError::GuardViolation(_))));

        let missing = s
            .guard()
            .match_freelancer(&MatchRequest::new("nope", "7", "9"));
        assert!(matches!(missing, Err(StoreError::GuardViolation(_))));

        let foreign_app = s
            .guard()
            .match_freelancer(&MatchRequest::new("g1", "8", "9").with_application("a1"));
        assert!(matches!(foreign_app, Err(StoreError::GuardViolation(_))));

        assert_eq!(s.backend.snapshot(), before);
    }

    #[test]
    fn test_second_match_is_rejected() {
        let s = Stores::new();
        s.seed();
        s.guard()
            .match_freelancer(&MatchRequest::new("g1", "7", "9"))
            .unwrap();

        let again = s
            .guard()
            .match_freelancer(&MatchRequest::new("g1", "8", "9"));
        assert!(matches!(again, Err(StoreError::GuardViolation(_))));
        assert_eq!(s.projects.read_all().len(), 1);
    }

    #[test]
    fn test_task_failure_rolls_back_everything() {
        let s = Stores::new();
        s.seed();
        s.backend.fail_writes_containing("/tasks/");

        let result = s.guard().match_freelancer(
            &MatchRequest::new("g1", "7", "9")
                .with_application("a1")
                .with_project_id("p1")
                .with_tasks(["One", "Two"]),
        );

        match result {
            Err(StoreError::Aborted { phase, .. }) => assert_eq!(phase, GuardPhase::Created),
            other => panic!("expected abort, got {other:?}"),
        }
        assert_untouched(&s);
        assert!(s.projects.resolve(&"p1".into()).is_none());
    }

    #[test]
    fn test_lost_task_write_fails_verification() {
        let s = Stores::new();
        s.seed();
        s.backend.drop_writes_containing("/tasks/");

        let result = s
            .guard()
            .match_freelancer(&MatchRequest::new("g1", "7", "9").with_tasks(["One"]));

        assert!(matches!(result, Err(StoreError::Aborted { .. })));
        assert_untouched(&s);
    }

    #[test]
    fn test_commit_failure_restores_gig() {
        let s = Stores::new();
        s.seed();
        s.backend.fail_writes_containing("applications/");

        let result = s.guard().match_freelancer(
            &MatchRequest::new("g1", "7", "9")
                .with_application("a1")
                .with_project_id("p1"),
        );

        match result {
            Err(StoreError::Aborted { phase, .. }) => assert_eq!(phase, GuardPhase::Verified),
            other => panic!("expected abort, got {other:?}"),
        }
        s.backend.clear_faults();
        assert_untouched(&s);
    }

    #[test]
    fn test_rollback_failure_is_reported() {
        let s = Stores::new();
        s.seed();
        s.backend.fail_writes_containing("applications/");
        s.backend.fail_removes_containing("projects/");

        let result = s.guard().match_freelancer(
            &MatchRequest::new("g1", "7", "9")
                .with_application("a1")
                .with_project_id("p1"),
        );

        match result {
            Err(StoreError::RollbackFailure {
                project_id,
                failures,
                ..
            }) => {
                assert_eq!(project_id, "p1");
                assert!(!failures.is_empty());
            }
            other => panic!("expected rollback failure, got {other:?}"),
        }
    }

    #[test]
    fn test_rollback_is_idempotent() {
        let s = Stores::new();
        s.seed();
        let guard = s.guard();
        let mut ctx = guard
            .prepare_match(&MatchRequest::new("g1", "7", "9").with_tasks(["One"]))
            .unwrap();
        assert_eq!(ctx.phase(), GuardPhase::Verified);

        guard.rollback(&mut ctx).unwrap();
        guard.rollback(&mut ctx).unwrap();
        assert_eq!(ctx.phase(), GuardPhase::RolledBack);
        assert!(s.projects.read(&ctx.project_id).is_none());
        assert_eq!(
            s.gigs.read(&"g1".into()).unwrap().status,
            GigStatus::Available
        );
    }

    #[test]
    fn test_committed_context_cannot_roll_back() {
        let s = Stores::new();
        s.seed();
        let guard = s.guard();
        let mut ctx = guard
            .prepare_match(&MatchRequest::new("g1", "7", "9"))
            .unwrap();
        guard.enforce_consistency(&mut ctx).unwrap();

        assert!(matches!(
            guard.rollback(&mut ctx),
            Err(StoreError::GuardViolation(_))
        ));
        assert_eq!(
            ctx.history(),
            &[GuardPhase::Created, GuardPhase::Verified, GuardPhase::Committed]
        );
    }

    #[test]
    fn test_sink_failure_does_not_undo_commit() {
        let s = Stores::new();
        s.seed();
        let sink = FailingSink;
        let guard = Guard::new(&s.projects, &s.gigs, &s.applications, &s.requests, &sink);

        let outcome = guard
            .match_freelancer(&MatchRequest::new("g1", "7", "9"))
            .unwrap();
        assert_eq!(outcome.phase, GuardPhase::Committed);
        assert_eq!(
            s.gigs.read(&"g1".into()).unwrap().status,
            GigStatus::Unavailable
        );
    }

    /// Breaks project reads once the commit has happened.
    struct ReadBreakingSink<'a> {
        backend: &'a MemBackend,
    }

    impl EventSink for ReadBreakingSink<'_> {
        fn emit(&self, _event: &MarketEvent) -> Result<()> {
            self.backend.fail_reads_containing("project.json");
            Ok(())
        }
    }

    #[test]
    fn test_read_back_failure_after_commit_still_reports_commit() {
        let s = Stores::new();
        s.seed();
        let sink = ReadBreakingSink { backend: &s.backend };
        let guard = Guard::new(&s.projects, &s.gigs, &s.applications, &s.requests, &sink);

        let outcome = guard
            .match_freelancer(
                &MatchRequest::new("g1", "7", "9")
                    .with_application("a1")
                    .with_project_id("p1"),
            )
            .unwrap();
        assert_eq!(outcome.phase, GuardPhase::Committed);
        assert_eq!(outcome.project.id, EntityId::from("p1"));
        assert_eq!(outcome.project.gig_id, Some(EntityId::from("g1")));

        s.backend.clear_faults();
        assert!(s.projects.read(&"p1".into()).is_some());
        assert_eq!(
            s.gigs.read(&"g1".into()).unwrap().status,
            GigStatus::Unavailable
        );
        assert_eq!(
            s.applications.read(&"a1".into()).unwrap().status,
            ReviewStatus::Accepted
        );
    }

    #[test]
    fn test_accept_gig_request_without_gig() {
        let s = Stores::new();
        s.requests
            .save(&GigRequest::new("r1", "7", "9", "Brand refresh"))
            .unwrap();
        let sink = RecordingSink::default();
        let guard = Guard::new(&s.projects, &s.gigs, &s.applications, &s.requests, &sink);

        let outcome = guard
            .accept_gig_request(&"r1".into(), &["Kickoff".to_string()], Some("9".into()))
            .unwrap();
        assert_eq!(outcome.project.title, "Brand refresh");
        assert_eq!(outcome.project.gig_id, None);
        assert_eq!(outcome.request.unwrap().status, ReviewStatus::Accepted);

        let names: Vec<&str> = sink.events.borrow().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["project_created", "gig_request_accepted"]);

        let again = guard.accept_gig_request(&"r1".into(), &[], None);
        assert!(matches!(again, Err(StoreError::GuardViolation(_))));
    }

    #[test]
    fn test_cancel_reopens_gig_and_withdraws_application() {
        let s = Stores::new();
        s.seed();
        let guard = s.guard();
        let outcome = guard
            .match_freelancer(&MatchRequest::new("g1", "7", "9").with_application("a1"))
            .unwrap();

        let cancelled = guard.cancel_project(&outcome.project.id, None).unwrap();
        assert_eq!(cancelled.project.status, ProjectStatus::Cancelled);
        assert_eq!(cancelled.reopened_gig, Some(EntityId::from("g1")));
        assert_eq!(cancelled.withdrawn_applications, vec![EntityId::from("a1")]);
        assert_eq!(
            s.gigs.read(&"g1".into()).unwrap().status,
            GigStatus::Available
        );

        assert!(matches!(
            guard.cancel_project(&outcome.project.id, None),
            Err(StoreError::GuardViolation(_))
        ));
    }
}
