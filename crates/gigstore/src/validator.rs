//! # Consistency Validator
//!
//! Detect-and-report audit over gigs, projects, applications and gig requests.
//! The [`crate::guard`] keeps these in lockstep when changes go through it;
//! the validator finds what slipped past (out-of-band edits, crashes between
//! writes, failed rollbacks).
//!
//! It never fixes anything. Each [`Issue`] carries a severity and a suggested
//! action, and the operator decides.
//!
//! | Kind | Severity | Condition |
//! |------|----------|-----------|
//! | `AVAILABLE_GIG_WITH_ACTIVE_PROJECT` | high | gig `Available`, an active project references it |
//! | `UNAVAILABLE_GIG_WITHOUT_PROJECT` | medium | gig `Unavailable`, no non-cancelled project references it |
//! | `ACCEPTED_APPLICATION_WITHOUT_PROJECT` | high | application `accepted`, no active or completed project for its gig and freelancer |
//! | `PENDING_REQUEST_WITH_PROJECT` | low | request `pending`, an active project matches its freelancer, commissioner and title |
//! | `DUPLICATE_ACTIVE_PROJECTS` | critical | more than one active project references a gig |

use crate::model::{
    Application, EntityId, Gig, GigRequest, GigStatus, Project, ProjectStatus, ReviewStatus,
};
use crate::store::{EntityStore, StorageBackend};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueKind {
    AvailableGigWithActiveProject,
    UnavailableGigWithoutProject,
    AcceptedApplicationWithoutProject,
    PendingRequestWithProject,
    DuplicateActiveProjects,
}

impl IssueKind {
    pub const ALL: [IssueKind; 5] = [
        IssueKind::AvailableGigWithActiveProject,
        IssueKind::UnavailableGigWithoutProject,
        IssueKind::AcceptedApplicationWithoutProject,
        IssueKind::PendingRequestWithProject,
        IssueKind::DuplicateActiveProjects,
    ];

    pub fn code(self) -> &'static str {
        match self {
            IssueKind::AvailableGigWithActiveProject => "AVAILABLE_GIG_WITH_ACTIVE_PROJECT",
            IssueKind::UnavailableGigWithoutProject => "UNAVAILABLE_GIG_WITHOUT_PROJECT",
            IssueKind::AcceptedApplicationWithoutProject => "ACCEPTED_APPLICATION_WITHOUT_PROJECT",
            IssueKind::PendingRequestWithProject => "PENDING_REQUEST_WITH_PROJECT",
            IssueKind::DuplicateActiveProjects => "DUPLICATE_ACTIVE_PROJECTS",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            IssueKind::AvailableGigWithActiveProject => Severity::High,
            IssueKind::UnavailableGigWithoutProject => Severity::Medium,
            IssueKind::AcceptedApplicationWithoutProject => Severity::High,
            IssueKind::PendingRequestWithProject => Severity::Low,
            IssueKind::DuplicateActiveProjects => Severity::Critical,
        }
    }

    pub fn suggested_action(self) -> &'static str {
        match self {
            IssueKind::AvailableGigWithActiveProject => "Mark the gig Unavailable",
            IssueKind::UnavailableGigWithoutProject => {
                "Reopen the gig (set Available) or restore its project"
            }
            IssueKind::AcceptedApplicationWithoutProject => {
                "Revert the application to pending or recreate its project"
            }
            IssueKind::PendingRequestWithProject => "Mark the gig request accepted",
            IssueKind::DuplicateActiveProjects => "Cancel all but the oldest active project",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub severity: Severity,
    /// The entity the issue is about (a gig, application or request).
    pub entity_id: EntityId,
    /// Other entities involved, e.g. the projects referencing a gig.
    pub related: Vec<EntityId>,
    pub message: String,
    pub suggested_action: String,
}

impl Issue {
    fn new(kind: IssueKind, entity_id: &EntityId, related: Vec<EntityId>, message: String) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            entity_id: entity_id.clone(),
            related,
            message,
            suggested_action: kind.suggested_action().to_string(),
        }
    }

    pub fn involves(&self, id: &EntityId) -> bool {
        &self.entity_id == id || self.related.contains(id)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub checked_gigs: usize,
    pub checked_projects: usize,
    pub checked_applications: usize,
    pub checked_requests: usize,
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issues_for(&self, id: &EntityId) -> Vec<&Issue> {
        self.issues.iter().filter(|i| i.involves(id)).collect()
    }

    pub fn of_kind(&self, kind: IssueKind) -> Vec<&Issue> {
        self.issues.iter().filter(|i| i.kind == kind).collect()
    }

    pub fn counts_by_kind(&self) -> BTreeMap<IssueKind, usize> {
        let mut counts = BTreeMap::new();
        for issue in &self.issues {
            *counts.entry(issue.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }
}

pub struct Validator<'a, B: StorageBackend> {
    projects: &'a EntityStore<Project, B>,
    gigs: &'a EntityStore<Gig, B>,
    applications: &'a EntityStore<Application, B>,
    requests: &'a EntityStore<GigRequest, B>,
}

impl<'a, B: StorageBackend> Validator<'a, B> {
    pub fn new(
        projects: &'a EntityStore<Project, B>,
        gigs: &'a EntityStore<Gig, B>,
        applications: &'a EntityStore<Application, B>,
        requests: &'a EntityStore<GigRequest, B>,
    ) -> Self {
        Self {
            projects,
            gigs,
            applications,
            requests,
        }
    }

    pub fn run(&self) -> ValidationReport {
        let gigs = self.gigs.read_all();
        let projects = self.projects.read_all();
        let applications = self.applications.read_all();
        let requests = self.requests.read_all();

        let mut report = ValidationReport {
            checked_gigs: gigs.len(),
            checked_projects: projects.len(),
            checked_applications: applications.len(),
            checked_requests: requests.len(),
            issues: Vec::new(),
        };
        report.issues.extend(check_gigs(&gigs, &projects));
        report
            .issues
            .extend(check_applications(&applications, &projects));
        report.issues.extend(check_requests(&requests, &projects));

        if report.is_clean() {
            info!(gigs = report.checked_gigs, projects = report.checked_projects, "validation clean");
        } else {
            warn!(issues = report.issues.len(), "validation found inconsistencies");
        }
        report
    }
}

fn projects_by_gig(projects: &[Project]) -> HashMap<&EntityId, Vec<&Project>> {
    let mut by_gig: HashMap<&EntityId, Vec<&Project>> = HashMap::new();
    for project in projects {
        if let Some(gig_id) = &project.gig_id {
            by_gig.entry(gig_id).or_default().push(project);
        }
    }
    by_gig
}

fn ids(projects: &[&Project]) -> Vec<EntityId> {
    projects.iter().map(|p| p.id.clone()).collect()
}

fn check_gigs(gigs: &[Gig], projects: &[Project]) -> Vec<Issue> {
    let by_gig = projects_by_gig(projects);
    let mut issues = Vec::new();

    for gig in gigs {
        let referencing: &[&Project] = by_gig.get(&gig.id).map(Vec::as_slice).unwrap_or(&[]);
        let mut active: Vec<&Project> = referencing
            .iter()
            .copied()
            .filter(|p| p.is_active())
            .collect();
        // oldest first, so "cancel all but the first" is unambiguous
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        if gig.status == GigStatus::Available && !active.is_empty() {
            issues.push(Issue::new(
                IssueKind::AvailableGigWithActiveProject,
                &gig.id,
                ids(&active),
                format!(
                    "Gig {} is Available but has {} active project(s)",
                    gig.id,
                    active.len()
                ),
            ));
        }

        let live = referencing
            .iter()
            .filter(|p| p.status != ProjectStatus::Cancelled)
            .count();
        if gig.status == GigStatus::Unavailable && live == 0 {
            issues.push(Issue::new(
                IssueKind::UnavailableGigWithoutProject,
                &gig.id,
                Vec::new(),
                format!("Gig {} is Unavailable but no project references it", gig.id),
            ));
        }

        if active.len() > 1 {
            issues.push(Issue::new(
                IssueKind::DuplicateActiveProjects,
                &gig.id,
                ids(&active),
                format!(
                    "Gig {} has {} active projects, expected at most one",
                    gig.id,
                    active.len()
                ),
            ));
        }
    }
    issues
}

fn check_applications(applications: &[Application], projects: &[Project]) -> Vec<Issue> {
    applications
        .iter()
        .filter(|a| a.status == ReviewStatus::Accepted)
        .filter(|a| {
            !projects.iter().any(|p| {
                p.gig_id.as_ref() == Some(&a.gig_id)
                    && p.freelancer_id == a.freelancer_id
                    && (p.is_active() || p.status == ProjectStatus::Completed)
            })
        })
        .map(|a| {
            Issue::new(
                IssueKind::AcceptedApplicationWithoutProject,
                &a.id,
                vec![a.gig_id.clone()],
                format!(
                    "Application {} is accepted but gig {} has no project for freelancer {}",
                    a.id, a.gig_id, a.freelancer_id
                ),
            )
        })
        .collect()
}

fn check_requests(requests: &[GigRequest], projects: &[Project]) -> Vec<Issue> {
    requests
        .iter()
        .filter(|r| r.status == ReviewStatus::Pending)
        .filter_map(|r| {
            let matching: Vec<&Project> = projects
                .iter()
                .filter(|p| p.is_active() && r.matches(p))
                .collect();
            if matching.is_empty() {
                return None;
            }
            Some(Issue::new(
                IssueKind::PendingRequestWithProject,
                &r.id,
                ids(&matching),
                format!(
                    "Gig request {} is pending but project {} already fulfils it",
                    r.id, matching[0].id
                ),
            ))
        })
        .collect()
}
