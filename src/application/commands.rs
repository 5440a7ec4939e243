use crate::application::bootstrap::BootstrapResult;
use crate::application::focus_timer::{FocusTimerService, TimerAlarm, TimerSnapshot};
use crate::application::oauth::{OAuthConfig, OAuthManager, TokenStatus};
use crate::application::session::{AccessTokenProvider, InMemoryAccessToken};
use crate::application::sync_engine::{LoginLoad, SyncEngine, SyncReport};
use crate::application::{lock_state, SharedState};
use crate::domain::dashboard::{
    event_heatmap, required_exam_mark, summarize, DashboardSummary, DISTINCTION_MARK,
};
use crate::domain::models::{ApplicationState, Mutation, UserProfile};
use crate::domain::timer::MentalClock;
use crate::infrastructure::config::{load_oauth_settings_from_env, AppSettings};
use crate::infrastructure::credential_store::{CredentialStore, KeyringCredentialStore};
use crate::infrastructure::drive_client::{RemoteStoreClient, ReqwestDriveClient};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_store::{LocalStore, SqliteLocalStore};
use crate::infrastructure::oauth_client::{OAuthHttpClient, ReqwestOAuthClient};
use crate::infrastructure::state_codec::encode_state_pretty;
use crate::infrastructure::userinfo_client::{ReqwestUserInfoClient, UserInfoClient};
use chrono::{Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const BACKUP_FILE_PREFIX: &str = "vibetable_backup_";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

pub type SharedOAuthManager = Arc<OAuthManager<dyn CredentialStore, dyn OAuthHttpClient>>;

/// Collaborators that talk to the outside world.
pub struct AppServices<R: RemoteStoreClient> {
    pub remote: Arc<R>,
    pub tokens: Arc<dyn AccessTokenProvider>,
    pub oauth: Option<SharedOAuthManager>,
    pub profiles: Arc<dyn UserInfoClient>,
    pub alarm: Arc<dyn TimerAlarm>,
}

impl AppServices<ReqwestDriveClient> {
    /// Google-backed services. Without an OAuth client id the app stays offline.
    pub fn google(alarm: Arc<dyn TimerAlarm>) -> Self {
        let client = reqwest::Client::new();
        let oauth: Option<SharedOAuthManager> = match load_oauth_settings_from_env() {
            Ok(settings) => {
                let credential_store: Arc<dyn CredentialStore> =
                    Arc::new(KeyringCredentialStore::default());
                let oauth_client: Arc<dyn OAuthHttpClient> =
                    Arc::new(ReqwestOAuthClient::new(client.clone()));
                Some(Arc::new(OAuthManager::new(
                    OAuthConfig::from(settings),
                    credential_store,
                    oauth_client,
                )))
            }
            Err(error) => {
                tracing::info!(reason = %error, "google sign-in not configured; running offline");
                None
            }
        };
        let tokens: Arc<dyn AccessTokenProvider> = match &oauth {
            Some(manager) => Arc::clone(manager) as Arc<dyn AccessTokenProvider>,
            None => Arc::new(InMemoryAccessToken::default()),
        };

        Self {
            remote: Arc::new(ReqwestDriveClient::new(client.clone())),
            tokens,
            oauth,
            profiles: Arc::new(ReqwestUserInfoClient::new(client)),
            alarm,
        }
    }
}

pub struct AppState<R: RemoteStoreClient = ReqwestDriveClient> {
    workspace_root: PathBuf,
    config_dir: PathBuf,
    logs_dir: PathBuf,
    settings: AppSettings,
    timezone: Tz,
    state: SharedState,
    sync: SyncEngine<SqliteLocalStore, R, dyn AccessTokenProvider>,
    timer: FocusTimerService<SqliteLocalStore, dyn TimerAlarm>,
    tokens: Arc<dyn AccessTokenProvider>,
    oauth: Option<SharedOAuthManager>,
    profiles: Arc<dyn UserInfoClient>,
    sign_in_requested: Arc<AtomicBool>,
}

impl<R: RemoteStoreClient> AppState<R> {
    /// Loads the local slot (defaults on first run) and wires the sync
    /// engine and focus timer over it. An undecodable slot is an error so
    /// the next save cannot overwrite it.
    pub fn with_services(
        bootstrap: BootstrapResult,
        services: AppServices<R>,
    ) -> Result<Self, InfraError> {
        let settings = bootstrap.settings;
        let timezone = settings.parsed_timezone()?;
        let local = Arc::new(SqliteLocalStore::new(
            &bootstrap.database_path,
            settings.local_slot.clone(),
        ));

        let initial = match local.load()? {
            Some(state) => state,
            None => {
                tracing::info!(slot = %settings.local_slot, "no local state; starting from defaults");
                ApplicationState::default()
            }
        };
        let state: SharedState = Arc::new(Mutex::new(initial));

        let sign_in_requested = Arc::new(AtomicBool::new(false));
        let hook_flag = Arc::clone(&sign_in_requested);
        let sync = SyncEngine::new(
            Arc::clone(&local),
            services.remote,
            Arc::clone(&services.tokens),
            settings.remote_file_name.clone(),
        )
        .with_legacy_names(settings.legacy_remote_file_names.clone())
        .with_reauth_hook(Arc::new(move || {
            if !hook_flag.swap(true, Ordering::SeqCst) {
                tracing::warn!("google sign-in required to sync");
            }
        }));

        let timer = FocusTimerService::new(
            MentalClock::new(settings.focus_duration()),
            Arc::clone(&state),
            local,
            services.alarm,
        )
        .with_tick_interval(settings.tick_interval());

        Ok(Self {
            workspace_root: bootstrap.workspace_root,
            config_dir: bootstrap.config_dir,
            logs_dir: bootstrap.logs_dir,
            settings,
            timezone,
            state,
            sync,
            timer,
            tokens: services.tokens,
            oauth: services.oauth,
            profiles: services.profiles,
            sign_in_requested,
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn timer(&self) -> &FocusTimerService<SqliteLocalStore, dyn TimerAlarm> {
        &self.timer
    }

    pub fn snapshot(&self) -> Result<ApplicationState, InfraError> {
        Ok(lock_state(&self.state)?.clone())
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        tracing::error!(command, error = %error, "command failed");
        error.to_string()
    }

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub user_name: String,
    pub sign_in_configured: bool,
    pub sign_in_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_document_id: Option<String>,
    pub timer: TimerSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthenticateGoogleResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub load: LoginLoad,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<UserProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncReport>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HeatmapResponse {
    pub year: i32,
    pub month: u32,
    pub counts: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GradeResponse {
    pub required_mark: i64,
    pub message: String,
}

/// Applies one user mutation, then writes the local slot and mirrors the
/// snapshot remotely. A rejected mutation leaves the state untouched.
pub async fn apply_mutation_impl<R: RemoteStoreClient>(
    state: &AppState<R>,
    mutation: Mutation,
) -> Result<SyncReport, InfraError> {
    let name = mutation.name();
    let today = state.today();
    let (local_persisted, snapshot) = {
        let mut guard = lock_state(&state.state)?;
        let mut working = guard.clone();
        mutation
            .apply(&mut working, today)
            .map_err(InfraError::Validation)?;
        *guard = working;
        (state.sync.persist_local(&guard), guard.clone())
    };

    let report = SyncReport {
        local_persisted,
        remote: state.sync.push_remote(&snapshot).await,
    };
    tracing::info!(mutation = name, remote = ?report.remote, "applied mutation");
    Ok(report)
}

pub async fn sync_impl<R: RemoteStoreClient>(state: &AppState<R>) -> Result<SyncReport, InfraError> {
    let (local_persisted, snapshot) = persist_current(state)?;
    Ok(SyncReport {
        local_persisted,
        remote: state.sync.push_remote(&snapshot).await,
    })
}

/// Writes the local slot under the state lock and returns what was written.
fn persist_current<R: RemoteStoreClient>(
    state: &AppState<R>,
) -> Result<(bool, ApplicationState), InfraError> {
    let guard = lock_state(&state.state)?;
    Ok((state.sync.persist_local(&guard), guard.clone()))
}

pub async fn status_impl<R: RemoteStoreClient>(
    state: &AppState<R>,
) -> Result<StatusResponse, InfraError> {
    let snapshot = state.snapshot()?;
    Ok(StatusResponse {
        user_name: snapshot.user_name,
        sign_in_configured: state.oauth.is_some(),
        sign_in_requested: state.sign_in_requested.load(Ordering::SeqCst),
        remote_document_id: state
            .sync
            .cached_identity()
            .await
            .map(|id| id.to_string()),
        timer: state.timer.snapshot()?,
    })
}

pub async fn authenticate_google_impl<R: RemoteStoreClient>(
    state: &AppState<R>,
    authorization_code: Option<String>,
) -> Result<AuthenticateGoogleResponse, InfraError> {
    let Some(manager) = state.oauth.as_ref() else {
        return Err(InfraError::InvalidConfig(
            "google sign-in is not configured; set VIBETABLE_GOOGLE_CLIENT_ID".to_string(),
        ));
    };

    if let Some(code) = authorization_code {
        let token = manager.authenticate_with_code(&code).await?;
        state.sign_in_requested.store(false, Ordering::SeqCst);
        return Ok(AuthenticateGoogleResponse {
            status: "authenticated".to_string(),
            authorization_url: None,
            expires_at: Some(token.expires_at.to_rfc3339()),
        });
    }

    match manager.current_token().await? {
        TokenStatus::Valid(token) => Ok(AuthenticateGoogleResponse {
            status: "existing".to_string(),
            authorization_url: None,
            expires_at: Some(token.expires_at.to_rfc3339()),
        }),
        TokenStatus::Refreshed(token) => Ok(AuthenticateGoogleResponse {
            status: "refreshed".to_string(),
            authorization_url: None,
            expires_at: Some(token.expires_at.to_rfc3339()),
        }),
        TokenStatus::ReauthenticationRequired => {
            let auth_state = next_id("vibetable-oauth");
            Ok(AuthenticateGoogleResponse {
                status: "reauthentication_required".to_string(),
                authorization_url: Some(manager.build_authorization_url(&auth_state)?),
                expires_at: None,
            })
        }
    }
}

/// Login transition: remote content replaces local state when found, then
/// the fetched profile fills the name and picture defaults.
pub async fn login_impl<R: RemoteStoreClient>(
    state: &AppState<R>,
) -> Result<LoginResponse, InfraError> {
    let profile = fetch_profile(state).await;

    let mut working = state.snapshot()?;
    let load = state.sync.load_on_login(&mut working).await;
    let replaced = matches!(load, LoginLoad::Replaced(_) | LoginLoad::MigratedLegacy(_));
    if !matches!(load, LoginLoad::ReauthenticationRequired) {
        state.sign_in_requested.store(false, Ordering::SeqCst);
    }

    let seeded = {
        let mut guard = lock_state(&state.state)?;
        if replaced {
            *guard = working;
        }
        let before = guard.clone();
        if let Some(profile) = profile.as_ref() {
            guard.seed_profile(profile);
        }
        let changed = *guard != before;
        if replaced || changed {
            // The slot written during the load may already be stale.
            let local_persisted = state.sync.persist_local(&guard);
            changed.then(|| (local_persisted, guard.clone()))
        } else {
            None
        }
    };

    let sync = match seeded {
        Some((local_persisted, snapshot)) => Some(SyncReport {
            local_persisted,
            remote: state.sync.push_remote(&snapshot).await,
        }),
        None => None,
    };
    tracing::info!(load = ?load, profile_seeded = sync.is_some(), "login finished");
    Ok(LoginResponse {
        load,
        profile,
        sync,
    })
}

async fn fetch_profile<R: RemoteStoreClient>(state: &AppState<R>) -> Option<UserProfile> {
    let token = match state.tokens.access_token().await {
        Ok(Some(token)) => token,
        Ok(None) => return None,
        Err(error) => {
            tracing::warn!(error = %error, "could not obtain token for profile fetch");
            return None;
        }
    };
    match state.profiles.fetch_profile(&token).await {
        Ok(profile) => Some(profile),
        Err(error) => {
            tracing::warn!(error = %error, "profile fetch failed");
            None
        }
    }
}

pub fn start_timer_impl<R: RemoteStoreClient>(
    state: &AppState<R>,
) -> Result<TimerSnapshot, InfraError> {
    state.timer.start()?;
    state.timer.snapshot()
}

pub fn pause_timer_impl<R: RemoteStoreClient>(
    state: &AppState<R>,
) -> Result<TimerSnapshot, InfraError> {
    state.timer.pause()?;
    state.timer.snapshot()
}

pub fn reset_timer_impl<R: RemoteStoreClient>(
    state: &AppState<R>,
) -> Result<TimerSnapshot, InfraError> {
    state.timer.reset()?;
    state.timer.snapshot()
}

pub fn resume_timer_impl<R: RemoteStoreClient>(
    state: &AppState<R>,
) -> Result<TimerSnapshot, InfraError> {
    state.timer.resume()?;
    state.timer.snapshot()
}

pub fn timer_state_impl<R: RemoteStoreClient>(
    state: &AppState<R>,
) -> Result<TimerSnapshot, InfraError> {
    state.timer.snapshot()
}

/// Writes `vibetable_backup_<YYYY-MM-DD>.json` into `directory`.
pub fn export_backup_impl<R: RemoteStoreClient>(
    state: &AppState<R>,
    directory: &Path,
) -> Result<PathBuf, InfraError> {
    let snapshot = state.snapshot()?;
    fs::create_dir_all(directory)?;
    let path = directory.join(format!(
        "{BACKUP_FILE_PREFIX}{}.json",
        state.today().format("%Y-%m-%d")
    ));
    fs::write(&path, encode_state_pretty(&snapshot)?)?;
    tracing::info!(path = %path.display(), "exported backup");
    Ok(path)
}

pub fn dashboard_impl<R: RemoteStoreClient>(
    state: &AppState<R>,
) -> Result<DashboardSummary, InfraError> {
    let snapshot = state.snapshot()?;
    Ok(summarize(&snapshot, Utc::now(), state.timezone))
}

/// Defaults to the current month in the configured timezone.
pub fn heatmap_impl<R: RemoteStoreClient>(
    state: &AppState<R>,
    year: Option<i32>,
    month: Option<u32>,
) -> Result<HeatmapResponse, InfraError> {
    let today = state.today();
    let year = year.unwrap_or_else(|| today.year());
    let month = month.unwrap_or_else(|| today.month());
    if !(1..=12).contains(&month) {
        return Err(InfraError::Validation(format!(
            "month must be between 1 and 12, got {month}"
        )));
    }

    let snapshot = state.snapshot()?;
    Ok(HeatmapResponse {
        year,
        month,
        counts: event_heatmap(&snapshot, year, month, state.timezone),
    })
}

pub fn grade_impl(current: f64, weight: f64) -> Result<GradeResponse, InfraError> {
    let required_mark = required_exam_mark(current, weight).map_err(InfraError::Validation)?;
    Ok(GradeResponse {
        required_mark,
        message: format!(
            "You need {required_mark}% on the exam for a Distinction ({DISTINCTION_MARK}% overall)."
        ),
    })
}
