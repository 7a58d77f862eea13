//! Review of completion reports and resubmission of rejected work.
//!
//! Every `*-report.md` in any role's reports directory is an artifact. The
//! auditor agent judges each one in a fresh session; the verdict is resolved
//! from the reply and from where the artifact ended up:
//!
//! 1. an explicit `VERDICT:` line, after which the artifact is moved here;
//! 2. the judge itself moved the artifact into the accepted or rejected archive;
//! 3. the artifact vanished somewhere else;
//! 4. free-text markers in the reply, after which the artifact is moved here.
//!
//! Anything else leaves the artifact in place for the next cycle. Archives are
//! never overwritten: when an earlier task with the same name was already
//! archived, the new files get a timestamp suffix. A rejection always leaves a
//! rejection record in the rejected archive and queues a
//! `resubmit-<task>-<timestamp>.md` request for the assigner.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::text::truncate_chars;
use crate::core::types::Verdict;
use crate::core::verdict::{
    default_rejection_record, extract_reason, parse_explicit_verdict, scan_markers,
};
use crate::engine::Engine;
use crate::io::layout::{RolePaths, Workspace};
use crate::io::prompt::RESUBMIT;
use crate::io::queue::{list_markdown, move_to};
use crate::io::record_store::RecordPaths;
use crate::io::status::record_completion;
use crate::lifecycle::run_single_round;
use crate::roles::RoleConfig;

const REPORT_SUFFIX: &str = "-report.md";
const STATS_EXCERPT_CHARS: usize = 4000;

/// A completion report waiting for review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifact {
    pub path: PathBuf,
    pub task_name: String,
    /// Role whose reports directory holds the artifact.
    pub owner: RolePaths,
}

impl ReportArtifact {
    /// Recognize `<agents>/<role>/reports/<task>-report.md`.
    pub fn from_path(workspace: &Workspace, path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        let task_name = file_name.strip_suffix(REPORT_SUFFIX)?;
        let reports_dir = path.parent()?;
        let role_dir = reports_dir.parent()?;
        let owner = workspace.role(role_dir.file_name()?.to_str()?);
        (owner.reports_dir == reports_dir && !task_name.is_empty()).then(|| Self {
            path: path.to_path_buf(),
            task_name: task_name.to_string(),
            owner,
        })
    }

    fn file_name(&self) -> String {
        format!("{}{REPORT_SUFFIX}", self.task_name)
    }
}

/// Every report artifact in the workspace, oldest first.
pub fn find_artifacts(workspace: &Workspace) -> Result<Vec<ReportArtifact>> {
    let mut found = Vec::new();
    for role in workspace.role_names()? {
        for path in list_markdown(&workspace.role(&role).reports_dir)? {
            if let Some(artifact) = ReportArtifact::from_path(workspace, &path) {
                let modified = fs::metadata(&path)
                    .and_then(|meta| meta.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                found.push((modified, artifact));
            }
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.path.cmp(&b.1.path)));
    Ok(found.into_iter().map(|(_, artifact)| artifact).collect())
}

/// How a verdict was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    Explicit,
    Filesystem,
    TextMarker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Judged {
        verdict: Verdict,
        source: VerdictSource,
        /// Final location of the artifact.
        archived: PathBuf,
    },
    /// The judge moved the artifact somewhere outside the archives.
    MovedElsewhere,
    /// No verdict could be determined; the artifact stays for the next cycle.
    Undetermined,
    /// The judging round failed; the artifact stays for the next cycle.
    JudgeFailed,
    /// The artifact disappeared before it could be judged.
    Vanished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditOutcome {
    pub task_name: String,
    pub resolution: Resolution,
    pub rejection_record: Option<PathBuf>,
    pub resubmission: Option<PathBuf>,
}

impl AuditOutcome {
    fn unresolved(task_name: &str, resolution: Resolution) -> Self {
        Self {
            task_name: task_name.to_string(),
            resolution,
            rejection_record: None,
            resubmission: None,
        }
    }

    pub fn verdict(&self) -> Option<Verdict> {
        match &self.resolution {
            Resolution::Judged { verdict, .. } => Some(*verdict),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct AuditPrompt<'a> {
    role: &'a str,
    workspace: String,
    task_name: &'a str,
    report_path: String,
    report: &'a str,
    stats: String,
    accepted_dir: String,
    rejected_dir: String,
}

#[derive(Serialize)]
struct ResubmitPrompt<'a> {
    task_name: &'a str,
    reason: &'a str,
    report: String,
}

/// Audit the artifact at `path`. Paths that are not report artifacts are ignored.
pub fn audit_path(
    engine: &Engine<'_>,
    auditor: &RoleConfig,
    path: &Path,
) -> Result<Option<AuditOutcome>> {
    match ReportArtifact::from_path(engine.workspace, path) {
        Some(artifact) => audit_artifact(engine, auditor, &artifact).map(Some),
        None => {
            debug!(path = %path.display(), "not a report artifact");
            Ok(None)
        }
    }
}

/// Judge one artifact and act on the verdict.
#[instrument(skip_all, fields(task = %artifact.task_name, owner = %artifact.owner.name))]
pub fn audit_artifact(
    engine: &Engine<'_>,
    auditor: &RoleConfig,
    artifact: &ReportArtifact,
) -> Result<AuditOutcome> {
    let task_name = artifact.task_name.as_str();
    let report = match fs::read_to_string(&artifact.path) {
        Ok(report) => report,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Ok(AuditOutcome::unresolved(task_name, Resolution::Vanished));
        }
        Err(err) => {
            return Err(err).with_context(|| format!("read {}", artifact.path.display()));
        }
    };
    let stats_paths = RecordPaths::new(&artifact.owner.stats_dir, task_name);
    let stats = match fs::read_to_string(&stats_paths.markdown) {
        Ok(stats) => truncate_chars(&stats, STATS_EXCERPT_CHARS, "\n...(truncated)"),
        Err(_) => String::new(),
    };

    let archives = &auditor.paths;
    let prompt = engine.prompts.render(
        auditor.prompts.primary,
        AuditPrompt {
            role: &auditor.name,
            workspace: engine.workspace.root().display().to_string(),
            task_name,
            report_path: artifact.path.display().to_string(),
            report: &report,
            stats,
            accepted_dir: archives.accepted_dir.display().to_string(),
            rejected_dir: archives.rejected_dir.display().to_string(),
        },
    )?;
    let file_name = artifact.file_name();
    let in_accepted = archives.accepted_dir.join(&file_name);
    let in_rejected = archives.rejected_dir.join(&file_name);
    let judge_record = archives.rejected_dir.join(format!("{task_name}-rejection.md"));
    let accepted_before = file_stamp(&in_accepted);
    let rejected_before = file_stamp(&in_rejected);
    let record_before = file_stamp(&judge_record);
    let stamp = engine.clock.now().format("%Y%m%d-%H%M%S").to_string();
    let accepted_stem = archive_stem(&archives.accepted_dir, task_name, &stamp);
    let rejected_stem = archive_stem(&archives.rejected_dir, task_name, &stamp);

    info!("judging report");
    let round = run_single_round(engine, auditor, &format!("audit-{task_name}"), prompt)?;
    if !round.result.is_success() {
        warn!("judging round failed, artifact kept for the next cycle");
        return Ok(AuditOutcome::unresolved(task_name, Resolution::JudgeFailed));
    }
    let reply = if round.result.stats.last_reply.trim().is_empty() {
        round.result.transcript.as_str()
    } else {
        round.result.stats.last_reply.as_str()
    };

    // Only archive entries that appeared or changed during the round count as
    // the judge's own move.
    let moved_by_judge = !artifact.path.exists();
    let judge_accepted = moved_by_judge && file_stamp(&in_accepted) != accepted_before;
    let judge_rejected = moved_by_judge && file_stamp(&in_rejected) != rejected_before;

    let markers = &engine.settings.audit.markers;
    let (verdict, source, reason) = if let Some(explicit) = parse_explicit_verdict(reply) {
        (explicit.verdict, VerdictSource::Explicit, explicit.reason)
    } else if judge_accepted {
        (Verdict::Accepted, VerdictSource::Filesystem, None)
    } else if judge_rejected {
        (
            Verdict::Rejected,
            VerdictSource::Filesystem,
            extract_reason(reply, markers),
        )
    } else if moved_by_judge {
        warn!("artifact moved outside the archives by the judge");
        return Ok(AuditOutcome::unresolved(task_name, Resolution::MovedElsewhere));
    } else if let Some(verdict) = scan_markers(reply, markers) {
        let reason = match verdict {
            Verdict::Rejected => extract_reason(reply, markers),
            Verdict::Accepted => None,
        };
        (verdict, VerdictSource::TextMarker, reason)
    } else {
        info!("no verdict in reply, artifact kept for the next cycle");
        return Ok(AuditOutcome::unresolved(task_name, Resolution::Undetermined));
    };

    let (archive_dir, stem, placed_by_judge, judge_path) = match verdict {
        Verdict::Accepted => (&archives.accepted_dir, accepted_stem, judge_accepted, in_accepted),
        Verdict::Rejected => (&archives.rejected_dir, rejected_stem, judge_rejected, in_rejected),
    };
    let archived = if placed_by_judge {
        judge_path
    } else {
        let dest = archive_dir.join(format!("{stem}{REPORT_SUFFIX}"));
        match move_to(&artifact.path, &dest)? {
            Some(moved) => moved,
            None => {
                warn!("artifact vanished before it could be archived");
                return Ok(AuditOutcome::unresolved(task_name, Resolution::MovedElsewhere));
            }
        }
    };
    let archived_stats = RecordPaths::new(archive_dir, &stem);
    for (from, to) in stats_paths.all().into_iter().zip(archived_stats.all()) {
        move_to(from, to)?;
    }
    info!(verdict = verdict.as_str(), ?source, archived = %archived.display(), "report judged");

    let mut outcome = AuditOutcome {
        task_name: task_name.to_string(),
        resolution: Resolution::Judged {
            verdict,
            source,
            archived,
        },
        rejection_record: None,
        resubmission: None,
    };
    if verdict == Verdict::Rejected {
        let written_by_judge =
            (file_stamp(&judge_record) != record_before).then_some(judge_record.as_path());
        let (record_path, reason) = ensure_rejection_record(
            written_by_judge,
            &archive_dir.join(format!("{stem}-rejection.md")),
            task_name,
            reason.as_deref(),
        )?;
        outcome.resubmission = Some(resubmit(engine, task_name, &reason, &report)?);
        outcome.rejection_record = Some(record_path);
    }
    if let Err(err) = record_completion(
        &engine.workspace.status_path(),
        &auditor.name,
        &auditor.kind,
        task_name,
        engine.clock.now(),
    ) {
        warn!("failed to update role ledger: {err:#}");
    }
    Ok(outcome)
}

/// Size and modification time of `path`, if it exists.
fn file_stamp(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = fs::metadata(path).ok()?;
    Some((meta.modified().unwrap_or(SystemTime::UNIX_EPOCH), meta.len()))
}

/// Base name for archiving `task_name` in `dir`. Earlier archives with the same
/// name are kept; the new one gets a `-<stamp>` suffix instead.
fn archive_stem(dir: &Path, task_name: &str, stamp: &str) -> String {
    let taken = ["-report.md", "-stats.md", "-stats.json", "-rejection.md"]
        .iter()
        .any(|suffix| dir.join(format!("{task_name}{suffix}")).exists());
    if taken {
        format!("{task_name}-{stamp}")
    } else {
        task_name.to_string()
    }
}

/// Keep the rejection record the judge wrote during this review, or write
/// one at `fallback`. Returns its path and the reason text to resubmit with.
fn ensure_rejection_record(
    written_by_judge: Option<&Path>,
    fallback: &Path,
    task_name: &str,
    reason: Option<&str>,
) -> Result<(PathBuf, String)> {
    if let Some(path) = written_by_judge {
        match fs::read_to_string(path) {
            Ok(existing) if !existing.trim().is_empty() => {
                let reason = reason.map_or_else(|| existing.trim().to_string(), str::to_string);
                return Ok((path.to_path_buf(), reason));
            }
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
        }
    }
    let record = default_rejection_record(task_name, reason);
    fs::write(fallback, &record).with_context(|| format!("write {}", fallback.display()))?;
    debug!(path = %fallback.display(), "wrote rejection record");
    Ok((fallback.to_path_buf(), reason.map_or(record, str::to_string)))
}

/// Queue a rework request for the assigner.
fn resubmit(engine: &Engine<'_>, task_name: &str, reason: &str, report: &str) -> Result<PathBuf> {
    let audit = &engine.settings.audit;
    let text = engine.prompts.render(
        RESUBMIT,
        ResubmitPrompt {
            task_name,
            reason,
            report: truncate_chars(report, audit.report_excerpt_chars, "\n\n...(truncated)"),
        },
    )?;
    let tasks_dir = engine.workspace.role(&audit.assigner).tasks_dir;
    fs::create_dir_all(&tasks_dir)
        .with_context(|| format!("create directory {}", tasks_dir.display()))?;
    let stamp = engine.clock.now().format("%Y%m%d-%H%M%S");
    let path = tasks_dir.join(format!("resubmit-{task_name}-{stamp}.md"));
    fs::write(&path, format!("{text}\n")).with_context(|| format!("write {}", path.display()))?;
    info!(path = %path.display(), "queued resubmission");
    Ok(path)
}
