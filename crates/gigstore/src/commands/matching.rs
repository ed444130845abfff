//! Guarded transitions: creating a project from a gig or a gig request, and
//! cancelling one. All of them go through [`crate::guard::Guard`]; this module
//! only turns outcomes into messages.

use crate::commands::{Affected, CmdMessage, CmdResult};
use crate::error::Result;
use crate::guard::{CancelOutcome, Guard, GuardOutcome, MatchRequest};
use crate::model::{EntityId, EntityKind};
use crate::store::StorageBackend;

pub fn match_freelancer<B: StorageBackend>(
    guard: &Guard<'_, B>,
    request: &MatchRequest,
) -> Result<CmdResult> {
    let outcome = guard.match_freelancer(request)?;
    created(outcome)
}

pub fn accept_request<B: StorageBackend>(
    guard: &Guard<'_, B>,
    request_id: &EntityId,
    tasks: &[String],
    actor_id: Option<EntityId>,
) -> Result<CmdResult> {
    let outcome = guard.accept_gig_request(request_id, tasks, actor_id)?;
    created(outcome)
}

pub fn cancel_project<B: StorageBackend>(
    guard: &Guard<'_, B>,
    project_id: &EntityId,
    actor_id: Option<EntityId>,
) -> Result<CmdResult> {
    let CancelOutcome {
        project,
        reopened_gig,
        withdrawn_applications,
    } = guard.cancel_project(project_id, actor_id)?;

    let mut affected = vec![Affected::new(EntityKind::Project, &project.id)];
    let mut result = CmdResult::default();
    result.add_message(CmdMessage::success(format!(
        "Project {} cancelled.",
        project.id
    )));
    if let Some(gig_id) = reopened_gig {
        result.add_message(CmdMessage::info(format!("Gig {} is Available again.", gig_id)));
        affected.push(Affected::new(EntityKind::Gig, gig_id));
    }
    for app_id in withdrawn_applications {
        result.add_message(CmdMessage::info(format!(
            "Application {} withdrawn.",
            app_id
        )));
        affected.push(Affected::new(EntityKind::Application, app_id));
    }
    result.with_report(&project).map(|r| r.with_affected(affected))
}

fn created(outcome: GuardOutcome) -> Result<CmdResult> {
    let mut affected = vec![Affected::new(EntityKind::Project, &outcome.project.id)];
    let mut result = CmdResult::default();
    result.add_message(CmdMessage::success(format!(
        "Project {} created with {} task(s).",
        outcome.project.id,
        outcome.tasks.len()
    )));
    if let Some(gig) = &outcome.gig {
        result.add_message(CmdMessage::info(format!(
            "Gig {} is now {:?}.",
            gig.id, gig.status
        )));
        affected.push(Affected::new(EntityKind::Gig, &gig.id));
    }
    if let Some(app) = &outcome.application {
        result.add_message(CmdMessage::info(format!(
            "Application {} accepted.",
            app.id
        )));
        affected.push(Affected::new(EntityKind::Application, &app.id));
    }
    if let Some(req) = &outcome.request {
        result.add_message(CmdMessage::info(format!(
            "Gig request {} accepted.",
            req.id
        )));
        affected.push(Affected::new(EntityKind::GigRequest, &req.id));
    }
    result.tasks = outcome.tasks.clone();
    result.with_report(&outcome).map(|r| r.with_affected(affected))
}
