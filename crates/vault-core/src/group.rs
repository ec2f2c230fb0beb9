//! ============================================================================
//! Profile Group - Per-Account Request Queue & Dispatcher
//! ============================================================================
//! Owns every profile of one account plus the serialized request queue in
//! front of the backend. At most one request per group is in flight; the
//! next dispatches only after the previous response has been reconciled and
//! its caller notified. Ordering is the correctness mechanism here: the
//! revision stamped on a queued request is resolved at dispatch time, after
//! every earlier response has already been applied.
//!
//! Shared state lives behind a std::sync::Mutex that is never held across
//! an await; the transport round-trip happens between two lock scopes.
//! ============================================================================

use crate::error::{QueryResult, ERR_MALFORMED_RESPONSE, ERR_TRANSPORT};
use crate::instance::InstanceRegistry;
use crate::profile::{Profile, ReconcileOutcome};
use crate::protocol::ProfileResponse;
use crate::transport::{Transport, TransportError, WireRequest};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

const QUERY_PROFILE_COMMAND: &str = "QueryProfile";

/// Who the account is acting as; selects the permission segment of every
/// profile command URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlContext {
    Client,
    DedicatedServer,
    Cheat,
}

impl UrlContext {
    pub fn permission(&self) -> &'static str {
        match self {
            UrlContext::Client => "client",
            UrlContext::DedicatedServer => "dedicated_server",
            UrlContext::Cheat => "cheat",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupConfig {
    pub base_url: String,
    pub account_id: String,
    pub context: UrlContext,
}

/// A profile command produced by a deferred request generator.
pub struct ProfileCommand {
    pub command: String,
    pub body: Value,
}

impl ProfileCommand {
    pub fn new(command: impl Into<String>, body: Value) -> Self {
        Self {
            command: command.into(),
            body,
        }
    }
}

/// Collector handed to a deferred request generator. Staging through the
/// sink is the only legal way to enqueue from inside a generator; calling
/// back into the group panics.
pub struct RequestSink {
    staged: Vec<StagedCommand>,
}

struct StagedCommand {
    command: ProfileCommand,
    done: Option<oneshot::Sender<QueryResult>>,
}

impl RequestSink {
    fn new() -> Self {
        Self { staged: Vec::new() }
    }

    /// Stage a follow-up command for the same profile, dispatched after the
    /// generator's own request.
    pub fn enqueue(&mut self, command: ProfileCommand) -> oneshot::Receiver<QueryResult> {
        let (tx, rx) = oneshot::channel();
        self.staged.push(StagedCommand {
            command,
            done: Some(tx),
        });
        rx
    }
}

type GeneratorFn = Box<dyn FnOnce(&mut Profile, &mut RequestSink) -> Option<ProfileCommand> + Send>;

enum Pending {
    Direct {
        profile_id: String,
        request: WireRequest,
        is_force_query: bool,
        done: Option<oneshot::Sender<QueryResult>>,
    },
    /// Built into a Direct request only once it reaches the queue head, so
    /// the generator observes profile state with every earlier response
    /// already applied.
    Generator {
        profile_id: String,
        build: GeneratorFn,
        done: Option<oneshot::Sender<QueryResult>>,
    },
}

struct GroupState {
    profiles: HashMap<String, Profile>,
    queue: VecDeque<Pending>,
    dispatching: bool,
    generator_running: bool,
    clock_offset: Duration,
    redemption_active: bool,
}

struct GroupInner {
    config: GroupConfig,
    transport: Arc<dyn Transport>,
    registry: Arc<InstanceRegistry>,
    state: Mutex<GroupState>,
}

/// Cheap-to-clone handle; all clones drive the same account.
#[derive(Clone)]
pub struct ProfileGroup {
    inner: Arc<GroupInner>,
}

/// Backend business-error body (`{errorCode, errorMessage}`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackendErrorBody {
    error_code: String,
    #[serde(default)]
    error_message: String,
}

impl ProfileGroup {
    pub fn new(
        config: GroupConfig,
        transport: Arc<dyn Transport>,
        registry: Arc<InstanceRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                config,
                transport,
                registry,
                state: Mutex::new(GroupState {
                    profiles: HashMap::new(),
                    queue: VecDeque::new(),
                    dispatching: false,
                    generator_running: false,
                    clock_offset: Duration::zero(),
                    redemption_active: false,
                }),
            }),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.inner.config.account_id
    }

    pub fn add_profile(&self, profile_id: impl Into<String>) {
        let profile_id = profile_id.into();
        let profile = Profile::new(
            profile_id.clone(),
            &self.inner.config.account_id,
            self.inner.registry.clone(),
        );
        let mut state = self.lock_state();
        state.profiles.insert(profile_id, profile);
    }

    /// Read access to one profile's cached state.
    pub fn with_profile<R>(&self, profile_id: &str, f: impl FnOnce(&Profile) -> R) -> Option<R> {
        let state = self.lock_state();
        state.profiles.get(profile_id).map(f)
    }

    /// Mutable access, for registering listeners and handlers.
    pub fn with_profile_mut<R>(
        &self,
        profile_id: &str,
        f: impl FnOnce(&mut Profile) -> R,
    ) -> Option<R> {
        let mut state = self.lock_state();
        state.profiles.get_mut(profile_id).map(f)
    }

    /// Current backend time, derived from the offset observed on the most
    /// recent serverTime header.
    pub fn server_now(&self) -> DateTime<Utc> {
        let state = self.lock_state();
        Utc::now() + state.clock_offset
    }

    /// Queue a profile command. The completion arrives on the returned
    /// channel after the response has been reconciled into the profile.
    pub fn enqueue_command(
        &self,
        profile_id: &str,
        command: &str,
        body: Value,
    ) -> oneshot::Receiver<QueryResult> {
        let (tx, rx) = oneshot::channel();
        let request = self.command_request(profile_id, command, &body);
        {
            let mut state = self.lock_state();
            self.assert_not_in_generator(&state);
            if !state.profiles.contains_key(profile_id) {
                let _ = tx.send(QueryResult::failed(0, "", "unknown profile"));
                return rx;
            }
            state.queue.push_back(Pending::Direct {
                profile_id: profile_id.to_string(),
                request,
                is_force_query: false,
                done: Some(tx),
            });
        }
        self.pump();
        rx
    }

    /// Queue a deferred request: `build` runs when the entry reaches the
    /// queue head, against profile state with all earlier responses applied.
    /// Returning None completes the entry without issuing a request.
    pub fn enqueue_generator<F>(&self, profile_id: &str, build: F) -> oneshot::Receiver<QueryResult>
    where
        F: FnOnce(&mut Profile, &mut RequestSink) -> Option<ProfileCommand> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.lock_state();
            self.assert_not_in_generator(&state);
            if !state.profiles.contains_key(profile_id) {
                let _ = tx.send(QueryResult::failed(0, "", "unknown profile"));
                return rx;
            }
            state.queue.push_back(Pending::Generator {
                profile_id: profile_id.to_string(),
                build: Box::new(build),
                done: Some(tx),
            });
        }
        self.pump();
        rx
    }

    /// Request a fresh full profile snapshot. At most one in-flight plus one
    /// queued query exist per profile; further callers coalesce onto the
    /// pending query and share its result.
    pub fn force_query_profile(&self, profile_id: &str) -> oneshot::Receiver<QueryResult> {
        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.lock_state();
            self.assert_not_in_generator(&guard);
            let state = &mut *guard;
            let Some(profile) = state.profiles.get_mut(profile_id) else {
                let _ = tx.send(QueryResult::failed(0, "", "unknown profile"));
                return rx;
            };
            if profile.try_begin_force_query() {
                let request = self.command_request(
                    profile_id,
                    QUERY_PROFILE_COMMAND,
                    &Value::Object(Default::default()),
                );
                state.queue.push_back(Pending::Direct {
                    profile_id: profile_id.to_string(),
                    request,
                    is_force_query: true,
                    done: Some(tx),
                });
            } else {
                profile.push_force_query_waiter(tx);
            }
        }
        self.pump();
        rx
    }

    /// One-shot request outside the queue, for endpoints that do not target
    /// a profile and need no ordering.
    pub async fn execute_now(&self, request: WireRequest) -> QueryResult {
        let response = self.inner.transport.execute(request).await;
        match response {
            Ok(resp) if resp.is_success() => QueryResult::ok(resp.status),
            Ok(resp) => failure_from_response(resp.status, &resp.body),
            Err(TransportError::Cancelled) => QueryResult::cancelled(),
            Err(TransportError::Network(msg)) => QueryResult::failed(0, ERR_TRANSPORT, msg),
        }
    }

    // ========================================================================
    // Redemption mutual exclusion (one group-wide flow at a time)
    // ========================================================================

    pub(crate) fn try_begin_redemption(&self) -> bool {
        let mut state = self.lock_state();
        if state.redemption_active {
            false
        } else {
            state.redemption_active = true;
            true
        }
    }

    pub(crate) fn end_redemption(&self) {
        let mut state = self.lock_state();
        state.redemption_active = false;
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn lock_state(&self) -> MutexGuard<'_, GroupState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn assert_not_in_generator(&self, state: &GroupState) {
        assert!(
            !state.generator_running,
            "enqueue while building a deferred request; stage follow-ups through the RequestSink"
        );
    }

    /// Full command URL minus the revision tag, which is appended at
    /// dispatch time.
    fn command_url(&self, profile_id: &str, command: &str) -> String {
        let config = &self.inner.config;
        format!(
            "{}/api/game/profile/{}/{}/{}?profileId={}",
            config.base_url.trim_end_matches('/'),
            config.account_id,
            config.context.permission(),
            command,
            profile_id
        )
    }

    fn command_request(&self, profile_id: &str, command: &str, body: &Value) -> WireRequest {
        WireRequest::post_json(self.command_url(profile_id, command), body.to_string())
    }

    fn force_query_pending(&self, profile_id: &str) -> Pending {
        Pending::Direct {
            profile_id: profile_id.to_string(),
            request: self.command_request(
                profile_id,
                QUERY_PROFILE_COMMAND,
                &Value::Object(Default::default()),
            ),
            is_force_query: true,
            done: None,
        }
    }

    /// Start the queue driver if it is not already running.
    fn pump(&self) {
        let mut state = self.lock_state();
        if state.dispatching || state.queue.is_empty() {
            return;
        }
        state.dispatching = true;
        drop(state);
        let group = self.clone();
        tokio::spawn(async move {
            group.run_queue().await;
        });
    }

    async fn run_queue(&self) {
        loop {
            // a generator head is materialized into a direct request first;
            // the profile is taken out of the map so the generator runs
            // without the state lock held
            let generator_work = {
                let mut state = self.lock_state();
                if state.queue.is_empty() {
                    state.dispatching = false;
                    return;
                }
                if matches!(state.queue.front(), Some(Pending::Generator { .. })) {
                    let Some(Pending::Generator {
                        profile_id,
                        build,
                        done,
                    }) = state.queue.pop_front()
                    else {
                        unreachable!()
                    };
                    match state.profiles.remove(&profile_id) {
                        Some(profile) => {
                            state.generator_running = true;
                            Some((profile_id, profile, build, done))
                        }
                        None => {
                            if let Some(done) = done {
                                let _ = done.send(QueryResult::failed(0, "", "unknown profile"));
                            }
                            continue;
                        }
                    }
                } else {
                    None
                }
            };

            if let Some((profile_id, mut profile, build, done)) = generator_work {
                let mut sink = RequestSink::new();
                let built = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    build(&mut profile, &mut sink)
                }));

                // the profile goes back into the map whether the generator
                // panicked or not; a lost profile would wedge the account
                let mut state = self.lock_state();
                state.generator_running = false;
                state.profiles.insert(profile_id.clone(), profile);

                let produced = match built {
                    Ok(produced) => produced,
                    Err(payload) => {
                        error!(
                            "deferred request builder for profile {} panicked: {}",
                            profile_id,
                            panic_message(payload.as_ref())
                        );
                        // the caller sees a dropped completion channel; any
                        // requests staged before the panic are discarded
                        drop(done);
                        continue;
                    }
                };

                let mut insert_at = 0;
                if let Some(command) = produced {
                    let request =
                        self.command_request(&profile_id, &command.command, &command.body);
                    state.queue.push_front(Pending::Direct {
                        profile_id: profile_id.clone(),
                        request,
                        is_force_query: false,
                        done,
                    });
                    insert_at = 1;
                } else if let Some(done) = done {
                    debug!(
                        "deferred request for profile {} produced nothing",
                        profile_id
                    );
                    let _ = done.send(QueryResult::ok(0));
                }
                for staged in sink.staged {
                    let request = self.command_request(
                        &profile_id,
                        &staged.command.command,
                        &staged.command.body,
                    );
                    state.queue.insert(
                        insert_at,
                        Pending::Direct {
                            profile_id: profile_id.clone(),
                            request,
                            is_force_query: false,
                            done: staged.done,
                        },
                    );
                    insert_at += 1;
                }
                continue;
            }

            // dispatch the direct head: tag the revision now, release the
            // lock for the round-trip, reconcile under the lock again
            let request = {
                let mut guard = self.lock_state();
                let state = &mut *guard;
                let Some(Pending::Direct {
                    profile_id,
                    request,
                    ..
                }) = state.queue.front_mut()
                else {
                    continue;
                };
                let revision = state
                    .profiles
                    .get(profile_id.as_str())
                    .map(|p| p.revision())
                    .unwrap_or(-1);
                let mut tagged = request.clone();
                tagged.url.push_str(&format!("&rvn={}", revision));
                debug!("dispatching {} (rvn={})", tagged.url, revision);
                tagged
            };

            let response = self.inner.transport.execute(request).await;

            let mut state = self.lock_state();
            let Some(Pending::Direct {
                profile_id,
                is_force_query,
                done,
                ..
            }) = state.queue.front_mut()
            else {
                continue;
            };
            let profile_id = profile_id.clone();
            let is_force_query = *is_force_query;
            let done = done.take();

            let (result, outcomes) = self.route_response(&mut state, &profile_id, response);

            let mut waiters = Vec::new();
            if is_force_query {
                if let Some(profile) = state.profiles.get_mut(&profile_id) {
                    waiters = profile.finish_force_query();
                }
            }
            state.queue.pop_front();
            drop(state);

            // observers run with the state lock released so they may call
            // back into this group without deadlocking the driver
            for outcome in outcomes {
                outcome.dispatch();
            }
            if let Some(done) = done {
                let _ = done.send(result.clone());
            }
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }
    }

    /// Turn a transport outcome into a QueryResult, reconciling any profile
    /// payload and scheduling forced re-queries for desynced profiles.
    ///
    /// Observer callbacks armed by the reconciliation are returned, not run:
    /// the caller dispatches them after releasing the state lock.
    fn route_response(
        &self,
        state: &mut GroupState,
        profile_id: &str,
        response: Result<crate::transport::WireResponse, TransportError>,
    ) -> (QueryResult, Vec<ReconcileOutcome>) {
        let response = match response {
            Ok(resp) => resp,
            Err(TransportError::Cancelled) => return (QueryResult::cancelled(), Vec::new()),
            Err(TransportError::Network(msg)) => {
                warn!("profile {} request failed: {}", profile_id, msg);
                return (QueryResult::failed(0, ERR_TRANSPORT, msg), Vec::new());
            }
        };

        if !response.is_success() {
            return (
                failure_from_response(response.status, &response.body),
                Vec::new(),
            );
        }

        let parsed: ProfileResponse = match serde_json::from_str(&response.body) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("profile {} response did not parse: {}", profile_id, e);
                return (
                    QueryResult::failed(response.status, ERR_MALFORMED_RESPONSE, e.to_string()),
                    Vec::new(),
                );
            }
        };

        if let Some(server_time) = parsed.server_time {
            state.clock_offset = server_time - Utc::now();
        }

        let mut result = QueryResult::ok(response.status);
        let mut outcomes: Vec<ReconcileOutcome> = Vec::new();
        let mut desynced: Vec<String> = Vec::new();

        match state.profiles.get_mut(profile_id) {
            Some(profile) => {
                let outcome = profile.apply_server_payload(&parsed, &mut result);
                if outcome.requery_needed {
                    desynced.push(profile_id.to_string());
                }
                outcomes.push(outcome);
            }
            None => warn!("response for unknown profile {}", profile_id),
        }

        // sibling profiles updated in the same response
        for entry in &parsed.multi_update {
            let sub: ProfileResponse = match serde_json::from_value(entry.clone()) {
                Ok(sub) => sub,
                Err(e) => {
                    error!("unparseable multiUpdate entry: {}", e);
                    continue;
                }
            };
            let Some(sub_id) = sub.profile_id.clone() else {
                error!("multiUpdate entry missing profileId");
                continue;
            };
            match state.profiles.get_mut(&sub_id) {
                Some(profile) => {
                    let outcome = profile.apply_server_payload(&sub, &mut result);
                    if outcome.requery_needed {
                        desynced.push(sub_id);
                    }
                    outcomes.push(outcome);
                }
                None => warn!("multiUpdate for unknown profile {}", sub_id),
            }
        }

        let mut to_schedule = Vec::new();
        for id in desynced {
            if let Some(profile) = state.profiles.get_mut(&id) {
                if profile.try_begin_force_query() {
                    to_schedule.push(id);
                }
            }
        }
        for id in to_schedule {
            debug!("profile {} desynced, scheduling forced re-query", id);
            state.queue.push_back(self.force_query_pending(&id));
        }

        (result, outcomes)
    }
}

/// Map a non-2xx reply onto a QueryResult, preferring the structured
/// backend error body when one is present.
fn failure_from_response(status: u16, body: &str) -> QueryResult {
    match serde_json::from_str::<BackendErrorBody>(body) {
        Ok(err) => QueryResult::failed(status, &err.error_code, err.error_message),
        Err(_) => QueryResult::failed(status, "", body.to_string()),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("opaque panic payload")
}
