use crate::activation::activator::{self, ActivationOutcome};
use crate::content::fake_score::{self, FakeScoreReport, ScoringMeta};
use crate::content::inspector;
use crate::error::{AppError, Result};
use crate::integrations::catalog::{CatalogDownloader, ResolvedDownload};
use crate::integrations::fake_reports::{self, FakeModReport, FakeReportPublisher};
use crate::state::event_state::{EventPayload, EventType};
use crate::state::profile_state::{PresentationMeta, Profile, ProfileMod};
use crate::state::state_manager::State;
use crate::utils::file_utils;
use async_trait::async_trait;
use chrono::Utc;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The user's verdict on a suspicious archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallDecision {
    Install,
    Cancel,
    Report,
}

/// Front-end hook consulted when the fake score crosses the warn threshold.
/// Without a registered sink, suspicious installs proceed.
#[async_trait]
pub trait DecisionSink: Send + Sync {
    async fn decide(&self, report: &FakeScoreReport, meta: &ScoringMeta) -> InstallDecision;
}

#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub remote_mod_id: i64,
    /// `None` resolves the latest file.
    pub file_id: Option<i64>,
    /// The game's Mods folder. Activation is skipped when unset or absent on
    /// disk; cache admission and profile attachment still run.
    pub mods_folder: Option<PathBuf>,
}

pub struct InstallHooks<'a> {
    pub decision: Option<&'a dyn DecisionSink>,
    pub reports: Option<&'a dyn FakeReportPublisher>,
    pub cancel: CancellationToken,
}

impl Default for InstallHooks<'_> {
    fn default() -> Self {
        Self {
            decision: None,
            reports: None,
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub profile_id: Uuid,
    pub remote_mod_id: i64,
    pub fingerprint: String,
    pub archive_name: String,
    pub fake_score: FakeScoreReport,
    /// `None` when activation was skipped or failed after the durable
    /// commits; failures are reported through events, not unwound.
    pub activation: Option<ActivationOutcome>,
}

/// Runs the full install pipeline for one mod:
/// resolve, fetch, inspect + score, admit to cache, attach to the active
/// profile, reconcile the Mods folder, clean up.
///
/// Cache admission and profile attachment are the durable commits. Failures
/// before them leave nothing behind but the temp dir (removed); failures
/// after them are surfaced without unwinding.
pub async fn install(
    state: &State,
    downloader: &dyn CatalogDownloader,
    request: InstallRequest,
    hooks: InstallHooks<'_>,
) -> Result<InstallOutcome> {
    let profile = state
        .profile_manager
        .active_profile()
        .await
        .ok_or(AppError::NoActiveProfile)?;

    let temp_dir = state.temp_root.join(format!(
        "mod_{}_{}",
        request.remote_mod_id,
        Utc::now().timestamp_millis()
    ));
    fs::create_dir_all(&temp_dir).await?;

    let event_id = Uuid::new_v4();
    let result = run_stages(
        state,
        downloader,
        &request,
        &hooks,
        &profile,
        &temp_dir,
        event_id,
    )
    .await;

    // Stage 7: the temp dir goes away on every path.
    state
        .events
        .emit_progress(
            event_id,
            EventType::CleaningUp,
            Some(request.remote_mod_id),
            "Removing temporary download",
            None,
        )
        .await;
    if let Err(e) = file_utils::remove_dir_all_if_exists(&temp_dir).await {
        warn!("Failed to remove temp dir {:?}: {}", temp_dir, e);
    }

    match &result {
        Ok(outcome) => {
            state
                .events
                .emit_progress(
                    event_id,
                    EventType::CleaningUp,
                    Some(request.remote_mod_id),
                    format!("Installed '{}'", outcome.archive_name),
                    Some(100.0),
                )
                .await;
        }
        Err(e) => {
            state
                .events
                .emit(EventPayload {
                    event_id,
                    event_type: EventType::Error,
                    target_id: Some(request.remote_mod_id),
                    message: "Install failed".to_string(),
                    progress: None,
                    error: Some(e.to_string()),
                })
                .await;
        }
    }

    result
}

fn check_cancel(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(AppError::Cancelled)
    } else {
        Ok(())
    }
}

async fn run_stages(
    state: &State,
    downloader: &dyn CatalogDownloader,
    request: &InstallRequest,
    hooks: &InstallHooks<'_>,
    profile: &Profile,
    temp_dir: &PathBuf,
    event_id: Uuid,
) -> Result<InstallOutcome> {
    let remote_mod_id = request.remote_mod_id;
    let settings = state.settings_manager.get().await;

    // Stage 1: resolve.
    check_cancel(&hooks.cancel)?;
    state
        .events
        .emit_progress(
            event_id,
            EventType::ResolvingDownload,
            Some(remote_mod_id),
            "Resolving download",
            Some(0.0),
        )
        .await;
    let resolved: ResolvedDownload = downloader
        .resolve_download(remote_mod_id, request.file_id)
        .await?;
    let meta = match downloader.get_mod_metadata(remote_mod_id).await {
        Ok(meta) => meta,
        Err(e) => {
            warn!(
                "Metadata lookup for mod {} failed ({}); continuing without it",
                remote_mod_id, e
            );
            Default::default()
        }
    };
    info!(
        "Resolved mod {} -> '{}' (file {})",
        remote_mod_id, resolved.archive_name, resolved.effective_file_id
    );

    // Stage 2: fetch. The heavy I/O stages share the process-wide budget
    // derived from the disk benchmark.
    check_cancel(&hooks.cancel)?;
    let io_permit = state.io_semaphore.acquire().await?;
    let archive_file_name = sanitize_filename::sanitize(&resolved.archive_name);
    let temp_archive = temp_dir.join(&archive_file_name);
    {
        let events = Arc::clone(&state.events);
        let expected = resolved.byte_size;
        let progress = move |downloaded: u64, total: Option<u64>| {
            let total = total.or(expected);
            let pct = total
                .filter(|t| *t > 0)
                .map(|t| 5.0 + (downloaded as f64 / t as f64) * 55.0);
            let payload = EventPayload {
                event_id,
                event_type: EventType::DownloadingArchive,
                target_id: Some(remote_mod_id),
                message: format!("Downloaded {} bytes", downloaded),
                progress: pct,
                error: None,
            };
            // Fire-and-forget: byte progress must not block the stream.
            let events = Arc::clone(&events);
            tokio::spawn(async move { events.emit(payload).await });
        };
        downloader
            .fetch_to_file(
                &resolved.download_url,
                &temp_archive,
                Duration::from_secs(settings.download_stall_timeout_secs),
                &progress,
                &hooks.cancel,
            )
            .await?;
    }

    // Stage 3: inspect and score.
    check_cancel(&hooks.cancel)?;
    state
        .events
        .emit_progress(
            event_id,
            EventType::InspectingArchive,
            Some(remote_mod_id),
            "Inspecting archive contents",
            Some(62.0),
        )
        .await;
    let inspection = inspector::inspect(&temp_archive, settings.inspection).await?;
    // A decision prompt can stay open for minutes; no reason to sit on an
    // I/O permit meanwhile.
    drop(io_permit);
    let scoring_meta = ScoringMeta {
        title: resolved.mod_name.clone(),
        download_count: meta.download_count,
        is_trending: meta.is_trending,
        creator_warned_count: meta.creator_warned_count,
    };
    let score_report = fake_score::score(&scoring_meta, &inspection, &settings.score_params);
    if score_report.suspicious {
        warn!(
            "Mod {} scored {} ({:?})",
            remote_mod_id, score_report.score, score_report.reasons
        );
        if let Some(sink) = hooks.decision {
            state
                .events
                .emit_progress(
                    event_id,
                    EventType::AwaitingDecision,
                    Some(remote_mod_id),
                    format!("Suspicious mod (score {}), awaiting decision", score_report.score),
                    None,
                )
                .await;
            match sink.decide(&score_report, &scoring_meta).await {
                InstallDecision::Install => {
                    info!("User chose to install mod {} anyway", remote_mod_id);
                }
                InstallDecision::Cancel => {
                    info!("User cancelled install of suspicious mod {}", remote_mod_id);
                    return Err(AppError::UserAborted);
                }
                InstallDecision::Report => {
                    info!("User reported suspicious mod {}", remote_mod_id);
                    if let Some(publisher) = hooks.reports {
                        let report = FakeModReport {
                            remote_mod_id,
                            machine_id: fake_reports::machine_id(),
                            reason: score_report.reasons.join(", "),
                            fake_score: score_report.score,
                            creator_id: meta.creator_id,
                            creator_name: meta.creator_name.clone(),
                        };
                        if let Err(e) = publisher.submit_report(&report).await {
                            warn!("Report submission failed: {}", e);
                        }
                    }
                    return Err(AppError::UserAborted);
                }
            }
        }
    }

    // Stage 4: admit to cache. First durable commit.
    check_cancel(&hooks.cancel)?;
    state
        .events
        .emit_progress(
            event_id,
            EventType::AdmittingToCache,
            Some(remote_mod_id),
            "Admitting archive to cache",
            Some(72.0),
        )
        .await;
    let admit_permit = state.io_semaphore.acquire().await?;
    let entry = state
        .cache_manager
        .admit(
            &temp_archive,
            remote_mod_id,
            &resolved.archive_name,
            profile.id,
            settings.inspection,
        )
        .await?;
    drop(admit_permit);

    // Cancelled between admission and attachment: keep the extracted tree
    // for reuse but give back the profile reference we just took. If the
    // profile already referenced these bytes before this install, the
    // reference stays.
    if hooks.cancel.is_cancelled() {
        let already_referenced = profile
            .mods
            .iter()
            .any(|m| m.fingerprint == entry.fingerprint);
        if !already_referenced {
            state
                .cache_manager
                .release(&entry.fingerprint, profile.id)
                .await?;
        }
        return Err(AppError::Cancelled);
    }

    // Stage 5: attach to profile. Second durable commit.
    state
        .events
        .emit_progress(
            event_id,
            EventType::AttachingToProfile,
            Some(remote_mod_id),
            "Attaching mod to the active profile",
            Some(86.0),
        )
        .await;
    let mod_entry = ProfileMod {
        remote_mod_id,
        display_name: resolved.mod_name.clone(),
        version_label: meta.latest_file_display_name.clone(),
        fingerprint: entry.fingerprint.clone(),
        archive_name: resolved.archive_name.clone(),
        installed_at: Utc::now(),
        enabled: true,
        presentation: PresentationMeta {
            thumbnail_url: meta.thumbnail.clone(),
            authors: meta.authors.clone(),
            last_updated: meta.last_updated,
        },
    };
    let replaced_fingerprint = state.profile_manager.add_mod(profile.id, mod_entry).await?;
    if let Some(old_fingerprint) = replaced_fingerprint {
        // Re-install with different bytes: the old archive loses this
        // profile's reference, unless another entry still shares it.
        let refreshed = state.profile_manager.get_profile(profile.id).await?;
        if !refreshed.mods.iter().any(|m| m.fingerprint == old_fingerprint) {
            state
                .cache_manager
                .release(&old_fingerprint, profile.id)
                .await?;
        }
    }

    // Stage 6: activate. Reported but never unwound.
    let activation = match &request.mods_folder {
        Some(mods_folder) => {
            state
                .events
                .emit_progress(
                    event_id,
                    EventType::ActivatingMods,
                    Some(remote_mod_id),
                    "Reconciling Mods folder",
                    Some(92.0),
                )
                .await;
            let refreshed = state.profile_manager.get_profile(profile.id).await?;
            let desired = activator::build_desired(&refreshed, &state.cache_manager)?;
            match state.activator.reconcile(mods_folder, &desired).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    error!(
                        "Activation failed after install of mod {}: {}. Cache and profile are committed; retry activation.",
                        remote_mod_id, e
                    );
                    state
                        .events
                        .emit(EventPayload {
                            event_id,
                            event_type: EventType::Error,
                            target_id: Some(remote_mod_id),
                            message: "Activation failed; mod remains installed".to_string(),
                            progress: None,
                            error: Some(e.to_string()),
                        })
                        .await;
                    None
                }
            }
        }
        None => None,
    };

    Ok(InstallOutcome {
        profile_id: profile.id,
        remote_mod_id,
        fingerprint: entry.fingerprint,
        archive_name: resolved.archive_name,
        fake_score: score_report,
        activation,
    })
}
