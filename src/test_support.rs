//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::Utf8Path;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing_subscriber::fmt::MakeWriter;

use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::engine::{ContainerEngine, ContainerSpec, ContainerStatus, EngineError};
use crate::probe::{AttemptError, FetchFuture, IpFetcher};
use crate::tunnel::{HostResolver, ResolveFuture};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Scripted [`IpFetcher`] returning queued bodies or failures in order.
///
/// Once the queue is empty every further attempt fails, which lets tests
/// exercise the probe's timeout path.
#[derive(Clone, Debug, Default)]
pub struct ScriptedFetcher {
    responses: Arc<Mutex<VecDeque<Result<Value, AttemptError>>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl ScriptedFetcher {
    /// Creates a fetcher with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a JSON body.
    pub fn push_body(&self, body: Value) {
        lock(&self.responses).push_back(Ok(body));
    }

    /// Queues a body reporting `ip` in `country` under the gateway field names.
    pub fn push_gateway_ip(&self, ip: &str, country: &str) {
        self.push_body(serde_json::json!({ "public_ip": ip, "country": country }));
    }

    /// Queues a failed attempt.
    pub fn push_error(&self, message: &str) {
        lock(&self.responses).push_back(Err(AttemptError(message.to_owned())));
    }

    /// URLs requested so far.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }
}

impl IpFetcher for ScriptedFetcher {
    fn fetch_json<'a>(&'a self, url: &'a str, _proxy: Option<&'a str>) -> FetchFuture<'a> {
        lock(&self.requests).push(url.to_owned());
        let next = lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(AttemptError(String::from("connection refused"))));
        Box::pin(async move { next })
    }
}

#[derive(Debug, Default)]
struct FakeContainer {
    spec: ContainerSpec,
    statuses: VecDeque<Option<ContainerStatus>>,
    removed: bool,
}

#[derive(Debug, Default)]
struct FakeEngineState {
    images: BTreeSet<String>,
    status_scripts: BTreeMap<String, Vec<Option<ContainerStatus>>>,
    addresses: BTreeMap<String, IpAddr>,
    containers: BTreeMap<String, FakeContainer>,
    run_order: Vec<String>,
    removed: Vec<String>,
    exec_outputs: VecDeque<CommandOutput>,
    execs: Vec<(String, Vec<String>)>,
    networks: BTreeMap<String, BTreeMap<String, String>>,
    removed_networks: Vec<String>,
    built: Vec<String>,
    pruned: Vec<String>,
    failing_runs: BTreeSet<String>,
    fail_remove: bool,
}

/// In-memory [`ContainerEngine`] with scripted container behaviour.
///
/// Statuses are scripted per image because container names are generated.
/// Each status poll consumes one scripted entry; the last entry repeats.
/// Unscripted containers report `running` until removed, and every removed
/// container reports as absent.
#[derive(Clone, Debug, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<FakeEngineState>>,
}

impl FakeEngine {
    /// Creates an engine knowing no images.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `image` available locally.
    #[must_use]
    pub fn with_image(self, image: &str) -> Self {
        lock(&self.state).images.insert(image.to_owned());
        self
    }

    /// Scripts the statuses reported by containers started from `image`.
    #[must_use]
    pub fn with_statuses(self, image: &str, statuses: Vec<Option<ContainerStatus>>) -> Self {
        lock(&self.state)
            .status_scripts
            .insert(image.to_owned(), statuses);
        self
    }

    /// Scripts the network address of containers started from `image`.
    #[must_use]
    pub fn with_address(self, image: &str, address: IpAddr) -> Self {
        lock(&self.state).addresses.insert(image.to_owned(), address);
        self
    }

    /// Makes `docker run` fail for `image`.
    #[must_use]
    pub fn with_failing_run(self, image: &str) -> Self {
        lock(&self.state).failing_runs.insert(image.to_owned());
        self
    }

    /// Makes every removal request fail.
    #[must_use]
    pub fn with_failing_remove(self) -> Self {
        lock(&self.state).fail_remove = true;
        self
    }

    /// Queues the output of the next `exec`.
    pub fn push_exec_output(&self, code: i32, stdout: &str) {
        lock(&self.state).exec_outputs.push_back(CommandOutput {
            code: Some(code),
            stdout: stdout.to_owned(),
            stderr: String::new(),
        });
    }

    /// Specs of every container started, in start order.
    #[must_use]
    pub fn runs(&self) -> Vec<ContainerSpec> {
        let state = lock(&self.state);
        state
            .run_order
            .iter()
            .filter_map(|name| state.containers.get(name).map(|c| c.spec.clone()))
            .collect()
    }

    /// Names of containers removed, in removal order.
    #[must_use]
    pub fn removed(&self) -> Vec<String> {
        lock(&self.state).removed.clone()
    }

    /// Names of containers started and not yet removed.
    #[must_use]
    pub fn live_containers(&self) -> Vec<String> {
        let state = lock(&self.state);
        state
            .run_order
            .iter()
            .filter(|name| state.containers.get(*name).is_some_and(|c| !c.removed))
            .cloned()
            .collect()
    }

    /// Commands executed inside containers.
    #[must_use]
    pub fn execs(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.state).execs.clone()
    }

    /// Networks currently present.
    #[must_use]
    pub fn networks(&self) -> Vec<String> {
        lock(&self.state).networks.keys().cloned().collect()
    }

    /// Networks removed, in removal order.
    #[must_use]
    pub fn removed_networks(&self) -> Vec<String> {
        lock(&self.state).removed_networks.clone()
    }

    /// Images built.
    #[must_use]
    pub fn built(&self) -> Vec<String> {
        lock(&self.state).built.clone()
    }

    /// Labels passed to image pruning.
    #[must_use]
    pub fn pruned(&self) -> Vec<String> {
        lock(&self.state).pruned.clone()
    }

    fn simulated(message: &str) -> EngineError {
        EngineError::Command(CommandError::Failure {
            program: String::from("docker"),
            status: Some(1),
            status_text: String::from("1"),
            stderr: message.to_owned(),
        })
    }
}

fn label_matches(labels: &BTreeMap<String, String>, filter: &str) -> bool {
    match filter.split_once('=') {
        Some((key, value)) => labels.get(key).is_some_and(|found| found == value),
        None => labels.contains_key(filter),
    }
}

impl ContainerEngine for FakeEngine {
    fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
        Ok(lock(&self.state).images.contains(image))
    }

    fn build_image(&self, _context: &Utf8Path, tag: &str) -> Result<(), EngineError> {
        let mut state = lock(&self.state);
        state.built.push(tag.to_owned());
        state.images.insert(tag.to_owned());
        Ok(())
    }

    fn prune_images(&self, label: &str) -> Result<(), EngineError> {
        lock(&self.state).pruned.push(label.to_owned());
        Ok(())
    }

    fn run_detached(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let mut state = lock(&self.state);
        if state.failing_runs.contains(&spec.image) {
            return Err(Self::simulated("run refused"));
        }
        let statuses = state
            .status_scripts
            .get(&spec.image)
            .cloned()
            .unwrap_or_default();
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                spec: spec.clone(),
                statuses: statuses.into(),
                removed: false,
            },
        );
        state.run_order.push(spec.name.clone());
        Ok(spec.name.clone())
    }

    fn status(&self, name: &str) -> Result<Option<ContainerStatus>, EngineError> {
        let mut state = lock(&self.state);
        let Some(container) = state.containers.get_mut(name) else {
            return Ok(None);
        };
        if container.removed {
            return Ok(None);
        }
        let status = if container.statuses.len() > 1 {
            container.statuses.pop_front().flatten()
        } else {
            container
                .statuses
                .front()
                .cloned()
                .unwrap_or(Some(ContainerStatus::Running))
        };
        Ok(status)
    }

    fn exec(&self, name: &str, argv: &[String]) -> Result<CommandOutput, EngineError> {
        let mut state = lock(&self.state);
        state.execs.push((name.to_owned(), argv.to_vec()));
        Ok(state.exec_outputs.pop_front().unwrap_or(CommandOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        }))
    }

    fn address_on(&self, name: &str, _network: Option<&str>) -> Result<Option<IpAddr>, EngineError> {
        let state = lock(&self.state);
        Ok(state
            .containers
            .get(name)
            .and_then(|container| state.addresses.get(&container.spec.image))
            .copied())
    }

    fn remove_container(&self, name: &str) -> Result<(), EngineError> {
        let mut state = lock(&self.state);
        if state.fail_remove {
            return Err(Self::simulated("removal refused"));
        }
        let Some(container) = state.containers.get_mut(name) else {
            return Err(Self::simulated("no such container"));
        };
        container.removed = true;
        state.removed.push(name.to_owned());
        Ok(())
    }

    fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), EngineError> {
        lock(&self.state)
            .networks
            .insert(name.to_owned(), labels.clone());
        Ok(())
    }

    fn remove_network(&self, name: &str) -> Result<(), EngineError> {
        let mut state = lock(&self.state);
        if state.networks.remove(name).is_none() {
            return Err(Self::simulated("no such network"));
        }
        state.removed_networks.push(name.to_owned());
        Ok(())
    }

    fn list_containers(&self, label: &str) -> Result<Vec<String>, EngineError> {
        let state = lock(&self.state);
        Ok(state
            .run_order
            .iter()
            .filter(|name| {
                state
                    .containers
                    .get(*name)
                    .is_some_and(|c| !c.removed && label_matches(&c.spec.labels, label))
            })
            .cloned()
            .collect())
    }

    fn list_networks(&self, label: &str) -> Result<Vec<String>, EngineError> {
        Ok(lock(&self.state)
            .networks
            .iter()
            .filter(|(_, labels)| label_matches(labels, label))
            .map(|(name, _)| name.clone())
            .collect())
    }
}

/// [`HostResolver`] answering from a fixed table.
#[derive(Clone, Debug, Default)]
pub struct StaticResolver {
    hosts: BTreeMap<String, IpAddr>,
}

impl StaticResolver {
    /// Creates a resolver that knows no hosts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `host` to `address`.
    #[must_use]
    pub fn with_host(mut self, host: &str, address: IpAddr) -> Self {
        self.hosts.insert(host.to_owned(), address);
        self
    }
}

impl HostResolver for StaticResolver {
    fn resolve<'a>(&'a self, host: &'a str) -> ResolveFuture<'a> {
        let answer = self
            .hosts
            .get(host)
            .copied()
            .ok_or_else(|| format!("unknown host {host}"));
        Box::pin(async move { answer })
    }
}

/// In-memory log sink for asserting on `tracing` output.
#[derive(Clone, Debug, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

/// Writer handed out by [`LogCapture`].
#[derive(Debug)]
pub struct LogCaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Creates an empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a debug-level subscriber writing plain text into this capture.
    #[must_use]
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + use<> {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish()
    }

    /// Everything logged so far.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.buffer)).into_owned()
    }
}

impl io::Write for LogCaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.buffer).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogCaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
