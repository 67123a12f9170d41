//! Experiment definition and run lifecycle
//!
//! An [`Experiment`] is the declared shape of a computational experiment:
//! its archive location, parameter scope, hook subscriptions, analyses and
//! the body closure. Calling [`Experiment::run`] drives one full lifecycle
//! and yields a [`Run`], the mutable per-run state that user code interacts
//! with from inside the body and from hook callbacks.
//!
//! The lifecycle is construct, initialize, execute, finalize: parameters are
//! merged and `experiment_constructed` fires; the archive folder, metadata
//! snapshot and log come into existence; the body runs between `before_run`
//! and `after_run` with errors captured instead of aborting; final metadata
//! and data are persisted no matter what, `after_experiment_finalize` fires
//! exactly once, and a captured error is re-raised to the caller only after
//! the archive is complete.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use labbook_core::{DataStore, Parameter, Scope, TypeTag};

use crate::actionable::{ActionableRegistry, ActionableType};
use crate::archive::{Archive, DEBUG_NAME, REQUIREMENTS_FILE_NAME, RunErrorInfo, RunMetadata, RunStatus};
use crate::artifact::{Figure, TrackValue};
use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::hooks::{CommitKind, Flow, HookEvent, HookName, HookRegistry, RegisterMode};
use crate::logging::RunLog;
use crate::mixin::Mixin;
use crate::repro::{DependencySnapshot, SourcePackager};
use crate::session::Session;

/// Route the run into the fixed debug archive.
pub const PARAM_DEBUG: &str = "__DEBUG__";
/// Run in testing mode, applying the testing hook before the body.
pub const PARAM_TESTING: &str = "__TESTING__";
/// Capture the dependency snapshot after a successful run.
pub const PARAM_REPRODUCIBLE: &str = "__REPRODUCIBLE__";
/// Prefix prepended to generated archive names.
pub const PARAM_PREFIX: &str = "__PREFIX__";
/// Whether cached results are loaded.
pub const PARAM_CACHING: &str = "__CACHING__";

type BodyFn = Box<dyn FnMut(&mut Run) -> Result<()>>;
type AnalysisFn = Box<dyn FnMut(&mut Run) -> Result<()>>;

fn special_parameters() -> IndexMap<String, Parameter> {
    let entries = [
        (
            PARAM_DEBUG,
            Value::Bool(false),
            "Run into the fixed 'debug' archive name, replacing the previous debug run.",
        ),
        (
            PARAM_TESTING,
            Value::Bool(false),
            "Run in testing mode: the testing hook replaces expensive parameter values \
             before the body executes.",
        ),
        (
            PARAM_REPRODUCIBLE,
            Value::Bool(false),
            "Capture the dependency and environment snapshot into the archive after a \
             successful run.",
        ),
        (
            PARAM_PREFIX,
            Value::String(String::new()),
            "Prefix prepended to generated archive names.",
        ),
        (
            PARAM_CACHING,
            Value::Bool(true),
            "Whether cached results are loaded. Computed results are stored either way.",
        ),
    ];

    let mut parameters = IndexMap::new();
    for (name, value, description) in entries {
        parameters.insert(
            name.to_string(),
            Parameter {
                name: name.to_string(),
                type_tag: TypeTag::infer(&value),
                description: Some(description.to_string()),
                value,
                usable: true,
                actionable: false,
            },
        );
    }
    parameters
}

/// Declared shape of a computational experiment.
pub struct Experiment {
    base_path: PathBuf,
    namespace: String,
    description: String,
    scope: Scope,
    hooks: Rc<RefCell<HookRegistry>>,
    actionable: Rc<ActionableRegistry>,
    analyses: Vec<AnalysisFn>,
    overrides: IndexMap<String, Value>,
    custom_name: Option<String>,
    source_path: Option<PathBuf>,
    dependencies: Vec<PathBuf>,
    lockfile: Option<PathBuf>,
    packager: Option<Box<dyn SourcePackager>>,
    body: Option<BodyFn>,
}

impl Experiment {
    /// Define an experiment archiving into `<base_path>/<namespace>/`.
    ///
    /// The base path must exist by the time the experiment runs; namespace
    /// folders are created on demand.
    pub fn new(base_path: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        let base_path = base_path.into();
        Self {
            base_path,
            namespace: namespace.into(),
            description: String::new(),
            scope: Scope::new(),
            hooks: Rc::new(RefCell::new(HookRegistry::new())),
            actionable: Rc::new(ActionableRegistry::default()),
            analyses: Vec::new(),
            overrides: IndexMap::new(),
            custom_name: None,
            source_path: None,
            dependencies: Vec::new(),
            lockfile: None,
            packager: None,
            body: None,
        }
    }

    /// Derive a new experiment from an existing definition.
    ///
    /// The child starts with the base's scope, hooks, analyses and body and
    /// then layers its own declarations over them: re-declared parameters
    /// win, appended hooks fire after the base's. The base's source file, if
    /// set, is recorded so initialization copies it into the child archive
    /// alongside the child's own code snapshot.
    pub fn extend(
        base: Experiment,
        base_path: impl Into<PathBuf>,
        namespace: impl Into<String>,
    ) -> Self {
        let mut dependencies = base.dependencies;
        if let Some(source) = base.source_path {
            dependencies.push(source);
        }
        Self {
            base_path: base_path.into(),
            namespace: namespace.into(),
            description: base.description,
            scope: base.scope,
            hooks: base.hooks,
            actionable: base.actionable,
            analyses: base.analyses,
            overrides: IndexMap::new(),
            custom_name: None,
            source_path: None,
            dependencies,
            lockfile: base.lockfile,
            packager: base.packager,
            body: base.body,
        }
    }

    /// Human readable description recorded in the run metadata.
    pub fn describe(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = description.into();
        self
    }

    /// Declare a parameter, inferring its type tag from the value. Only
    /// upper-case names become parameters; other bindings are ignored by
    /// discovery.
    pub fn declare(&mut self, name: impl Into<String>, value: impl Serialize) -> Result<()> {
        Ok(self.scope.bind(name, value)?)
    }

    /// Declare a parameter with a description.
    pub fn declare_described(
        &mut self,
        name: impl Into<String>,
        value: impl Serialize,
        description: impl Into<String>,
    ) -> Result<()> {
        Ok(self.scope.bind_described(name, value, description)?)
    }

    /// Declare a parameter with an explicit type tag, so actionable types
    /// like path copying can claim it.
    pub fn declare_typed(
        &mut self,
        name: impl Into<String>,
        value: impl Serialize,
        type_tag: TypeTag,
        description: Option<&str>,
    ) -> Result<()> {
        Ok(self.scope.bind_typed(name, value, type_tag, description)?)
    }

    /// Full access to the declaration scope.
    pub fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }

    /// Subscribe to a hook, appended after existing entries for the name.
    pub fn on(
        &mut self,
        name: impl Into<HookName>,
        callback: impl FnMut(&mut HookEvent<'_>) -> Result<Flow> + 'static,
    ) {
        self.hooks
            .borrow_mut()
            .register(name, 0, RegisterMode::Append, callback);
    }

    /// Subscribe to a hook, discarding all earlier entries for the name.
    pub fn on_replace(
        &mut self,
        name: impl Into<HookName>,
        callback: impl FnMut(&mut HookEvent<'_>) -> Result<Flow> + 'static,
    ) {
        self.hooks
            .borrow_mut()
            .register(name, 0, RegisterMode::Replace, callback);
    }

    /// Subscribe as an overridable fallback, kept only while no other entry
    /// exists for the name.
    pub fn on_default(
        &mut self,
        name: impl Into<HookName>,
        callback: impl FnMut(&mut HookEvent<'_>) -> Result<Flow> + 'static,
    ) {
        self.hooks.borrow_mut().register_default(name, 0, callback);
    }

    /// Subscribe with explicit priority and mode.
    pub fn on_with(
        &mut self,
        name: impl Into<HookName>,
        priority: i32,
        mode: RegisterMode,
        callback: impl FnMut(&mut HookEvent<'_>) -> Result<Flow> + 'static,
    ) {
        self.hooks.borrow_mut().register(name, priority, mode, callback);
    }

    /// Install the testing overlay, replacing an inherited one.
    ///
    /// The callback runs right before the body when the run has
    /// `__TESTING__` set, typically shrinking dataset sizes and repetition
    /// counts so the full code path finishes quickly.
    pub fn on_testing(&mut self, mut callback: impl FnMut(&mut Run) -> Result<()> + 'static) {
        self.hooks.borrow_mut().register(
            HookName::Testing,
            0,
            RegisterMode::Replace,
            move |event| {
                if let Some(run) = event.run_mut() {
                    callback(run)?;
                }
                Ok(Flow::Continue(None))
            },
        );
    }

    /// Include a mixin: its hooks append after the entries already present
    /// and its parameters become fallback defaults.
    pub fn include(&mut self, mixin: Mixin) {
        let (scope, hooks) = mixin.into_parts();
        self.scope.merge_defaults(&scope);
        self.hooks.borrow_mut().absorb(hooks);
    }

    /// Add an analysis, executed against the finished run after a
    /// successful lifecycle.
    pub fn analysis(&mut self, callback: impl FnMut(&mut Run) -> Result<()> + 'static) {
        self.analyses.push(Box::new(callback));
    }

    /// Override one parameter value from outside, bypassing declarations.
    /// Overrides are applied last during construction and therefore win
    /// over every declared value.
    pub fn override_parameter(
        &mut self,
        name: impl Into<String>,
        value: impl Serialize,
    ) -> Result<()> {
        self.overrides.insert(name.into(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Override several parameters at once.
    pub fn override_parameters(
        &mut self,
        values: impl IntoIterator<Item = (String, Value)>,
    ) -> &mut Self {
        self.overrides.extend(values);
        self
    }

    /// Use a caller-supplied archive name instead of a generated one. Debug
    /// mode still wins over a custom name.
    pub fn with_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.custom_name = Some(name.into());
        self
    }

    /// Source file copied into the archive as the code snapshot.
    pub fn source_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.source_path = Some(path.into());
        self
    }

    /// Lockfile read for the dependency snapshot. Defaults to `Cargo.lock`
    /// in the working directory.
    pub fn lockfile(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.lockfile = Some(path.into());
        self
    }

    /// Packager invoked for locally developed dependencies during the
    /// reproducibility capture.
    pub fn source_packager(&mut self, packager: impl SourcePackager + 'static) -> &mut Self {
        self.packager = Some(Box::new(packager));
        self
    }

    /// Register an actionable parameter type. Must happen before the first
    /// run, while no run still shares the registry.
    pub fn register_actionable(&mut self, actionable: Box<dyn ActionableType>) -> Result<()> {
        match Rc::get_mut(&mut self.actionable) {
            Some(registry) => {
                registry.register(actionable);
                Ok(())
            }
            None => Err(Error::Message(
                "actionable types must be registered before the first run".to_string(),
            )),
        }
    }

    /// Attach the experiment body.
    pub fn main(&mut self, body: impl FnMut(&mut Run) -> Result<()> + 'static) -> &mut Self {
        self.body = Some(Box::new(body));
        self
    }

    /// Base path the archives land under.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Namespace of this experiment, relative to the base path.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Run the full lifecycle, then the registered analyses.
    ///
    /// Analyses only run when the lifecycle succeeded; a failed run returns
    /// its error after the archive is finalized.
    pub fn run(&mut self, session: &Rc<Session>) -> Result<Run> {
        let mut run = self.execute(session)?;
        for analysis in &mut self.analyses {
            analysis(&mut run)?;
        }
        Ok(run)
    }

    /// Run the lifecycle without the analyses.
    #[tracing::instrument(skip(self, session), fields(namespace = %self.namespace))]
    pub fn execute(&mut self, session: &Rc<Session>) -> Result<Run> {
        if self.body.is_none() {
            return Err(Error::MissingBody);
        }

        let mut run = self.construct(session)?;
        self.initialize(&mut run)?;
        run.fire_lifecycle(HookName::AfterExperimentInitialize)?;

        let captured = self.execute_guarded(&mut run);

        self.finalize(&mut run, captured.is_some())?;
        run.fire_lifecycle(HookName::AfterExperimentFinalize)?;

        if captured.is_none() && run.param_flag(PARAM_REPRODUCIBLE) {
            if let Err(error) = self.capture_reproducible(&mut run) {
                tracing::warn!(%error, "reproducibility capture failed");
                let _ = run.log(&format!("reproducibility capture failed: {error}"));
            }
        }

        if let Some(error) = captured {
            // The original error stays the primary outcome; a failing error
            // hook is only logged.
            if let Err(hook_error) = run.fire_failure(&error) {
                tracing::warn!(%hook_error, "before_experiment_error hook failed");
            }
            return Err(error);
        }
        Ok(run)
    }

    /// Restore a finished run from its archive folder for analysis.
    pub fn load(path: &Path, session: &Rc<Session>) -> Result<Run> {
        Run::load(path, session)
    }

    /// Merge the parameter table and fire the construction hooks. No
    /// filesystem contact happens here.
    fn construct(&mut self, session: &Rc<Session>) -> Result<Run> {
        let mut run = Run {
            name: String::new(),
            namespace: self.namespace.clone(),
            base_path: self.base_path.clone(),
            description: self.description.clone(),
            status: RunStatus::Pending,
            parameters: special_parameters(),
            data: DataStore::new(),
            archive: None,
            log: None,
            start_time: None,
            end_time: None,
            tracked: Vec::new(),
            hooks_fired: IndexMap::new(),
            error: None,
            is_running: false,
            is_testing: false,
            cache: Cache::new(self.base_path.join(".cache")),
            session: Rc::clone(session),
            hooks: Rc::clone(&self.hooks),
            actionable: Rc::clone(&self.actionable),
        };

        // Plugins inject their defaults here, before declared values merge
        // over them.
        run.fire_lifecycle(HookName::BeforeExperimentParameters)?;

        for (name, parameter) in self.scope.discover(&self.actionable.tags()) {
            run.merge_parameter(name, parameter);
        }
        let overrides = self.overrides.clone();
        for (name, value) in overrides {
            run.set_param(&name, value)?;
        }
        run.sync_special_flags();

        run.fire_lifecycle(HookName::ExperimentConstructed)?;
        Ok(run)
    }

    /// Create the archive folder, code snapshot, initial metadata and log.
    /// Errors here are fatal; the run has not started.
    fn initialize(&mut self, run: &mut Run) -> Result<()> {
        let debug = run.param_flag(PARAM_DEBUG);
        let prefix = run.param_string(PARAM_PREFIX);
        let name = if debug {
            DEBUG_NAME.to_string()
        } else if let Some(custom) = &self.custom_name {
            custom.clone()
        } else {
            Archive::generate_name(&prefix)
        };

        let archive = Archive::create(&run.base_path, &run.namespace, &name, debug)?;
        run.name = name;
        run.start_time = Some(Utc::now());
        run.status = RunStatus::Running;
        run.is_running = true;

        if let Some(source) = &self.source_path {
            fs::copy(source, archive.code_path()).map_err(|io| Error::FileRead {
                path: source.clone(),
                source: io,
            })?;
        }
        for dependency in &self.dependencies {
            if let Some(file_name) = dependency.file_name().and_then(|name| name.to_str()) {
                fs::copy(dependency, archive.file_path(file_name)).map_err(|io| {
                    Error::FileRead {
                        path: dependency.clone(),
                        source: io,
                    }
                })?;
            }
        }

        let log = RunLog::create(&archive.log_path())?;
        run.archive = Some(archive);
        run.log = Some(log);
        run.save_metadata()?;
        run.log_start_block()?;
        Ok(())
    }

    /// Execute the testing overlay, body and surrounding hooks, capturing
    /// any error instead of letting it unwind past finalization.
    fn execute_guarded(&mut self, run: &mut Run) -> Option<Error> {
        match self.execute_inner(run) {
            Ok(()) => None,
            Err(error) => {
                run.error = Some(RunErrorInfo::from(&error));
                let _ = run.log(&format!("error during run: {error}"));
                tracing::error!(%error, "experiment body failed");
                Some(error)
            }
        }
    }

    fn execute_inner(&mut self, run: &mut Run) -> Result<()> {
        if run.param_flag(PARAM_TESTING) {
            let has_overlay = run.hooks.borrow().has(&HookName::Testing)
                || run.session.hooks().has(&HookName::Testing);
            if has_overlay {
                run.fire_lifecycle(HookName::Testing)?;
                run.is_testing = true;
                run.log("testing mode active")?;
            }
        }

        run.fire_lifecycle(HookName::BeforeRun)?;

        let Some(mut body) = self.body.take() else {
            return Err(Error::MissingBody);
        };
        let outcome = body(run);
        self.body = Some(body);
        outcome?;

        run.fire_lifecycle(HookName::AfterRun)?;
        Ok(())
    }

    /// Stamp times and status, persist metadata and data, close the log.
    /// Runs for successes and failures alike.
    fn finalize(&mut self, run: &mut Run, failed: bool) -> Result<()> {
        run.end_time = Some(Utc::now());
        run.status = if failed {
            RunStatus::Failed
        } else {
            RunStatus::Done
        };
        run.is_running = false;
        run.save_metadata()?;
        run.save_data()?;
        run.log_end_block()?;
        Ok(())
    }

    /// Record what this run was built from: lockfile snapshot, requirements
    /// listing, packaged local sources and actionable parameter files.
    fn capture_reproducible(&self, run: &mut Run) -> Result<()> {
        let Some(archive) = run.archive.clone() else {
            return Ok(());
        };
        run.log("capturing dependency snapshot")?;

        let lockfile = self
            .lockfile
            .clone()
            .unwrap_or_else(|| PathBuf::from("Cargo.lock"));
        let snapshot = DependencySnapshot::from_lockfile(&lockfile)?;
        snapshot.write(&archive.dependencies_path())?;
        archive.write_file(REQUIREMENTS_FILE_NAME, snapshot.requirements().as_bytes())?;

        let sources_dir = archive.sources_dir();
        fs::create_dir_all(&sources_dir)?;
        if let Some(packager) = &self.packager {
            for dependency in snapshot.editable() {
                packager.package(dependency, &sources_dir)?;
                run.log(&format!("  packaged sources of {}", dependency.name))?;
            }
        }

        let actionable_values: Vec<(TypeTag, Value)> = run
            .parameters
            .values()
            .filter(|parameter| parameter.actionable)
            .map(|parameter| (parameter.type_tag.clone(), parameter.value.clone()))
            .collect();
        for (tag, value) in actionable_values {
            if let Some(actionable_type) = self.actionable.get(&tag) {
                actionable_type.on_capture(run, &value)?;
            }
        }

        run.log(&format!(
            "dependency snapshot complete ({} packages)",
            snapshot.packages().len()
        ))?;
        Ok(())
    }
}

/// Mutable state of one experiment run.
///
/// Handed to the body and to hook callbacks. Everything a run accumulates
/// lives here: the merged parameter table, the nested data store, tracked
/// series, hook counters and the archive handle.
pub struct Run {
    name: String,
    namespace: String,
    base_path: PathBuf,
    description: String,
    status: RunStatus,
    parameters: IndexMap<String, Parameter>,
    data: DataStore,
    archive: Option<Archive>,
    log: Option<RunLog>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    tracked: Vec<String>,
    hooks_fired: IndexMap<String, u64>,
    error: Option<RunErrorInfo>,
    is_running: bool,
    is_testing: bool,
    cache: Cache,
    session: Rc<Session>,
    hooks: Rc<RefCell<HookRegistry>>,
    actionable: Rc<ActionableRegistry>,
}

impl Run {
    /// Restore a finished run from its archive for analysis.
    ///
    /// Parameters and data come from the persisted files; the run carries no
    /// log writer, so logging goes to the console only.
    pub fn load(path: &Path, session: &Rc<Session>) -> Result<Self> {
        let metadata = Archive::load_metadata(path)?;
        let archive = Archive::open(path)?;

        let data_path = archive.data_path();
        let data = if data_path.is_file() {
            let text = fs::read_to_string(&data_path).map_err(|source| Error::FileRead {
                path: data_path.clone(),
                source,
            })?;
            serde_json::from_str(&text)?
        } else {
            DataStore::new()
        };

        let base_path = PathBuf::from(&metadata.base_path);
        Ok(Self {
            name: metadata.name,
            namespace: metadata.namespace,
            cache: Cache::new(base_path.join(".cache")),
            base_path,
            description: metadata.description,
            status: metadata.status,
            parameters: metadata.parameters,
            data,
            archive: Some(archive),
            log: None,
            start_time: metadata.start_time,
            end_time: metadata.end_time,
            tracked: metadata.track,
            hooks_fired: metadata.hooks,
            error: metadata.error,
            is_running: false,
            is_testing: false,
            session: Rc::clone(session),
            hooks: Rc::new(RefCell::new(HookRegistry::new())),
            actionable: Rc::new(ActionableRegistry::default()),
        })
    }

    // --- parameters ---------------------------------------------------

    /// Effective value of a parameter. Actionable parameters resolve
    /// through their type, so a copied path may point into the archive.
    pub fn param(&self, name: &str) -> Result<Value> {
        let parameter =
            self.parameters
                .get(name)
                .ok_or_else(|| labbook_core::Error::ParameterUnknown {
                    name: name.to_string(),
                })?;
        if parameter.actionable {
            if let Some(actionable_type) = self.actionable.get(&parameter.type_tag) {
                return actionable_type.get(self, &parameter.value);
            }
        }
        Ok(parameter.value.clone())
    }

    /// Effective parameter value, deserialized into a concrete type.
    pub fn param_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        Ok(serde_json::from_value(self.param(name)?)?)
    }

    /// Write a parameter value. Unknown names insert a new entry, so hooks
    /// can introduce parameters the experiment never declared. Actionable
    /// parameters transform the value through their type first.
    pub fn set_param(&mut self, name: &str, value: impl Serialize) -> Result<()> {
        let mut value = serde_json::to_value(value)?;
        if let Some(parameter) = self.parameters.get(name) {
            if parameter.actionable {
                let registry = Rc::clone(&self.actionable);
                if let Some(actionable_type) = registry.get(&parameter.type_tag) {
                    value = actionable_type.set(self, value)?;
                }
            }
        }
        match self.parameters.get_mut(name) {
            Some(parameter) => {
                parameter.value = value;
                parameter.usable = true;
            }
            None => {
                let type_tag = TypeTag::infer(&value);
                let actionable = self.actionable.get(&type_tag).is_some();
                self.parameters.insert(
                    name.to_string(),
                    Parameter {
                        name: name.to_string(),
                        type_tag,
                        description: None,
                        value,
                        usable: true,
                        actionable,
                    },
                );
            }
        }
        self.sync_special_flags();
        Ok(())
    }

    /// The merged parameter table, in declaration order.
    #[must_use]
    pub fn parameters(&self) -> &IndexMap<String, Parameter> {
        &self.parameters
    }

    fn merge_parameter(&mut self, name: String, mut parameter: Parameter) {
        if let Some(existing) = self.parameters.get(&name) {
            if parameter.description.is_none() {
                parameter.description = existing.description.clone();
            }
        }
        self.parameters.insert(name, parameter);
    }

    fn param_flag(&self, name: &str) -> bool {
        self.parameters
            .get(name)
            .and_then(|parameter| parameter.value.as_bool())
            .unwrap_or(false)
    }

    fn param_flag_or(&self, name: &str, default: bool) -> bool {
        self.parameters
            .get(name)
            .and_then(|parameter| parameter.value.as_bool())
            .unwrap_or(default)
    }

    fn param_string(&self, name: &str) -> String {
        self.parameters
            .get(name)
            .and_then(|parameter| parameter.value.as_str())
            .unwrap_or_default()
            .to_string()
    }

    fn sync_special_flags(&mut self) {
        let enabled = self.param_flag_or(PARAM_CACHING, true);
        self.cache.set_enabled(enabled);
    }

    // --- data ---------------------------------------------------------

    /// Write a value at a slash path into the run data.
    pub fn insert(&mut self, key: &str, value: impl Serialize) -> Result<()> {
        Ok(self.data.insert(key, value)?)
    }

    /// Read the value at a slash path.
    pub fn get(&self, key: &str) -> Result<&Value> {
        Ok(self.data.get(key)?)
    }

    /// Read the value at a slash path, `None` when absent.
    #[must_use]
    pub fn get_opt(&self, key: &str) -> Option<&Value> {
        self.data.get_opt(key)
    }

    /// Read and deserialize the value at a slash path.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        Ok(self.data.get_as(key)?)
    }

    /// The nested run data store.
    #[must_use]
    pub fn data(&self) -> &DataStore {
        &self.data
    }

    /// Mutable access to the run data store.
    pub fn data_mut(&mut self) -> &mut DataStore {
        &mut self.data
    }

    // --- tracking and commits -----------------------------------------

    /// Append a value to a tracked series.
    ///
    /// Numbers accumulate in a list under `key` in the run data. Figures are
    /// written as numbered files into the archive's track folder and the
    /// file name is appended instead. Either way the series is registered in
    /// the metadata and `experiment_track` fires.
    pub fn track(&mut self, key: &str, value: impl Into<TrackValue>) -> Result<()> {
        let value = value.into();

        let existing = match self.data.get_opt(key) {
            Some(Value::Array(items)) => items.len(),
            Some(_) => {
                return Err(Error::Message(format!(
                    "tracked key '{key}' already holds a non-list value"
                )));
            }
            None => {
                self.data.insert(key, Vec::<Value>::new())?;
                0
            }
        };

        let stored = match &value {
            TrackValue::Number(number) => serde_json::Number::from_f64(*number)
                .map_or(Value::Null, Value::Number),
            TrackValue::Figure(figure) => {
                let archive = self.require_archive()?;
                let file_key = key.replace('/', "_");
                let path =
                    archive.track_file_path(&file_key, existing + 1, figure.extension());
                fs::write(&path, figure.bytes()).map_err(|source| Error::FileWrite {
                    path: path.clone(),
                    source,
                })?;
                let file_name = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .unwrap_or_default()
                    .to_string();
                Value::String(file_name)
            }
        };

        if let Value::Array(items) = self.data.get_mut(key)? {
            items.push(stored);
        }
        if !self.tracked.iter().any(|tracked| tracked == key) {
            self.tracked.push(key.to_string());
        }

        self.fire_track(key, &value)?;
        Ok(())
    }

    /// Append to several tracked series at once.
    pub fn track_many<I, K, V>(&mut self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<TrackValue>,
    {
        for (key, value) in pairs {
            self.track(key.as_ref(), value)?;
        }
        Ok(())
    }

    /// Write a text file into the archive and fire the raw commit hook.
    pub fn commit_raw(&mut self, file_name: &str, content: &str) -> Result<()> {
        let archive = self.require_archive()?;
        let path = archive.write_file(file_name, content.as_bytes())?;
        self.fire_commit(CommitKind::Raw, file_name, &path)
    }

    /// Serialize a value as pretty JSON into the archive and fire the JSON
    /// commit hook.
    pub fn commit_json<T: Serialize>(&mut self, file_name: &str, value: &T) -> Result<()> {
        let archive = self.require_archive()?;
        let text = serde_json::to_string_pretty(value)?;
        let path = archive.write_file(file_name, text.as_bytes())?;
        self.fire_commit(CommitKind::Json, file_name, &path)
    }

    /// Write a figure into the archive and fire the figure commit hook.
    /// The figure's extension is appended when `name` has none.
    pub fn commit_fig(&mut self, name: &str, figure: &Figure) -> Result<()> {
        let archive = self.require_archive()?;
        let file_name = if name.contains('.') {
            name.to_string()
        } else {
            format!("{name}.{}", figure.extension())
        };
        let path = archive.write_file(&file_name, figure.bytes())?;
        self.fire_commit(CommitKind::Fig, &file_name, &path)
    }

    fn require_archive(&self) -> Result<Archive> {
        self.archive.clone().ok_or_else(|| {
            Error::Message("the archive does not exist before the run is initialized".to_string())
        })
    }

    // --- logging ------------------------------------------------------

    /// Append a line to the run log. Before the archive exists the line
    /// goes to the console only.
    pub fn log(&mut self, message: &str) -> Result<()> {
        match &mut self.log {
            Some(log) => log.line(message),
            None => {
                tracing::info!("{message}");
                Ok(())
            }
        }
    }

    /// Append several lines to the run log.
    pub fn log_lines<I, S>(&mut self, messages: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for message in messages {
            self.log(message.as_ref())?;
        }
        Ok(())
    }

    /// Write the full parameter table into the run log.
    pub fn log_parameters(&mut self) -> Result<()> {
        let lines: Vec<String> = self
            .parameters
            .values()
            .map(|parameter| format!(" * {}: {}", parameter.name, parameter.value))
            .collect();
        self.log("experiment parameters:")?;
        for line in lines {
            self.log(&line)?;
        }
        Ok(())
    }

    fn log_start_block(&mut self) -> Result<()> {
        self.log("=== EXPERIMENT STARTED ===")?;
        self.log(&format!("  name: {}", self.name))?;
        self.log(&format!("  namespace: {}", self.namespace))?;
        if let Some(archive) = &self.archive {
            let line = format!("  archive: {}", archive.path().display());
            self.log(&line)?;
        }
        self.log(&format!("  parameters: {}", self.parameters.len()))?;
        if self.param_flag(PARAM_DEBUG) {
            self.log("  debug mode: active")?;
        }
        Ok(())
    }

    fn log_end_block(&mut self) -> Result<()> {
        match self.status {
            RunStatus::Failed => self.log("=== EXPERIMENT FAILED ===")?,
            _ => self.log("=== EXPERIMENT FINISHED ===")?,
        }
        self.log(&format!("  status: {}", self.status))?;
        if let Some(duration) = self.duration() {
            self.log(&format!("  duration: {duration:.3}s"))?;
        }
        if let Some(error) = &self.error {
            let line = format!("  error ({}): {}", error.kind, error.message);
            self.log(&line)?;
        }
        Ok(())
    }

    // --- hooks --------------------------------------------------------

    /// Fire a hook by name with an optional value, session callbacks first,
    /// then the experiment's own. Returns the value of the last executed
    /// callback.
    pub fn apply_hook(
        &mut self,
        name: impl Into<HookName>,
        value: Option<Value>,
    ) -> Result<Option<Value>> {
        let name = name.into();
        self.count_hook(&name);
        let session = Rc::clone(&self.session);
        let hooks = Rc::clone(&self.hooks);
        let value_ref = value.as_ref();

        let session_value = session.invoke(&mut HookEvent::Custom {
            name: name.clone(),
            run: self,
            value: value_ref,
        })?;
        let instance_fired = hooks.borrow().has(&name);
        let instance_value = hooks.borrow().invoke(&mut HookEvent::Custom {
            name,
            run: self,
            value: value_ref,
        })?;
        Ok(if instance_fired {
            instance_value
        } else {
            session_value
        })
    }

    pub(crate) fn fire_lifecycle(&mut self, name: HookName) -> Result<Option<Value>> {
        self.count_hook(&name);
        let session = Rc::clone(&self.session);
        let hooks = Rc::clone(&self.hooks);

        let session_value = session.invoke(&mut HookEvent::Lifecycle {
            name: name.clone(),
            run: self,
        })?;
        let instance_fired = hooks.borrow().has(&name);
        let instance_value = hooks.borrow().invoke(&mut HookEvent::Lifecycle {
            name,
            run: self,
        })?;
        Ok(if instance_fired {
            instance_value
        } else {
            session_value
        })
    }

    fn fire_commit(&mut self, kind: CommitKind, file_name: &str, path: &Path) -> Result<()> {
        self.count_hook(&kind.hook_name());
        let session = Rc::clone(&self.session);
        let hooks = Rc::clone(&self.hooks);
        session.invoke(&mut HookEvent::Commit {
            kind,
            run: self,
            file_name,
            path,
        })?;
        hooks.borrow().invoke(&mut HookEvent::Commit {
            kind,
            run: self,
            file_name,
            path,
        })?;
        Ok(())
    }

    fn fire_track(&mut self, key: &str, value: &TrackValue) -> Result<()> {
        self.count_hook(&HookName::Track);
        let session = Rc::clone(&self.session);
        let hooks = Rc::clone(&self.hooks);
        session.invoke(&mut HookEvent::Track {
            run: self,
            key,
            value,
        })?;
        hooks.borrow().invoke(&mut HookEvent::Track {
            run: self,
            key,
            value,
        })?;
        Ok(())
    }

    fn fire_failure(&mut self, error: &Error) -> Result<()> {
        self.count_hook(&HookName::BeforeExperimentError);
        let session = Rc::clone(&self.session);
        let hooks = Rc::clone(&self.hooks);
        session.invoke(&mut HookEvent::Failure { run: self, error })?;
        hooks.borrow().invoke(&mut HookEvent::Failure { run: self, error })?;
        Ok(())
    }

    fn count_hook(&mut self, name: &HookName) {
        *self.hooks_fired.entry(name.to_string()).or_insert(0) += 1;
    }

    // --- persistence --------------------------------------------------

    fn metadata(&self) -> RunMetadata {
        RunMetadata {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            base_path: self.base_path.display().to_string(),
            description: self.description.clone(),
            status: self.status,
            start_time: self.start_time,
            end_time: self.end_time,
            duration: self.duration(),
            parameters: self.parameters.clone(),
            hooks: self.hooks_fired.clone(),
            track: self.tracked.clone(),
            error: self.error.clone(),
        }
    }

    fn save_metadata(&self) -> Result<()> {
        let Some(archive) = &self.archive else {
            return Ok(());
        };
        let text = serde_json::to_string_pretty(&self.metadata())?;
        let path = archive.metadata_path();
        fs::write(&path, text).map_err(|source| Error::FileWrite { path, source })?;
        Ok(())
    }

    fn save_data(&self) -> Result<()> {
        let Some(archive) = &self.archive else {
            return Ok(());
        };
        let text = serde_json::to_string(&Value::Object(self.data.persistable()))?;
        let path = archive.data_path();
        fs::write(&path, text).map_err(|source| Error::FileWrite { path, source })?;
        Ok(())
    }

    // --- accessors ----------------------------------------------------

    /// Archive folder name of this run.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace of the run, relative to the base path.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Base path the archive lives under.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Description of the experiment.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// The archive handle, once it exists.
    #[must_use]
    pub fn archive(&self) -> Option<&Archive> {
        self.archive.as_ref()
    }

    /// Path of the archive folder, once it exists.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.archive.as_ref().map(Archive::path)
    }

    /// The captured error of a failed run.
    #[must_use]
    pub fn error(&self) -> Option<&RunErrorInfo> {
        self.error.as_ref()
    }

    /// Whether the body is currently executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.is_running
    }

    /// Whether the testing overlay was applied to this run.
    #[must_use]
    pub fn is_testing(&self) -> bool {
        self.is_testing
    }

    /// When the archive was created.
    #[must_use]
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    /// When the run finalized.
    #[must_use]
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Wall clock duration in seconds, once the run finished.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Option<f64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => {
                Some((end - start).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }

    /// Names of the tracked series, in first-track order.
    #[must_use]
    pub fn tracked(&self) -> &[String] {
        &self.tracked
    }

    /// Hook names mapped to how often they fired so far.
    #[must_use]
    pub fn hooks_fired(&self) -> &IndexMap<String, u64> {
        &self.hooks_fired
    }

    /// The result cache rooted next to the archives.
    #[must_use]
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Mutable access to the result cache.
    pub fn cache_mut(&mut self) -> &mut Cache {
        &mut self.cache
    }

    /// The session this run dispatches into.
    #[must_use]
    pub fn session(&self) -> &Rc<Session> {
        &self.session
    }
}

impl std::fmt::Debug for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("base_path", &self.base_path)
            .field("description", &self.description)
            .field("status", &self.status)
            .field("parameters", &self.parameters)
            .field("data", &self.data)
            .field("archive", &self.archive)
            .field("start_time", &self.start_time)
            .field("end_time", &self.end_time)
            .field("tracked", &self.tracked)
            .field("hooks_fired", &self.hooks_fired)
            .field("error", &self.error)
            .field("is_running", &self.is_running)
            .field("is_testing", &self.is_testing)
            .field("cache", &self.cache)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use serde_json::json;

    fn experiment_in(dir: &tempfile::TempDir) -> Experiment {
        let mut experiment = Experiment::new(dir.path(), "results/unit");
        experiment.main(|_run| Ok(()));
        experiment
    }

    #[test]
    fn test_construct_seeds_special_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = experiment_in(&dir);
        let run = experiment.construct(&Session::empty()).unwrap();

        let names: Vec<_> = run.parameters().keys().take(5).cloned().collect();
        assert_eq!(
            names,
            vec![
                PARAM_DEBUG,
                PARAM_TESTING,
                PARAM_REPRODUCIBLE,
                PARAM_PREFIX,
                PARAM_CACHING
            ]
        );
        assert_eq!(run.status(), RunStatus::Pending);
        assert!(run.archive().is_none());
    }

    #[test]
    fn test_declared_value_overrides_special_but_keeps_description() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = experiment_in(&dir);
        experiment.declare(PARAM_DEBUG, true).unwrap();

        let run = experiment.construct(&Session::empty()).unwrap();
        let parameter = &run.parameters()[PARAM_DEBUG];
        assert_eq!(parameter.value, json!(true));
        assert!(parameter.description.is_some());
    }

    #[test]
    fn test_overrides_beat_declarations() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = experiment_in(&dir);
        experiment.declare("COUNT", 3).unwrap();
        experiment.override_parameter("COUNT", 10).unwrap();

        let run = experiment.construct(&Session::empty()).unwrap();
        assert_eq!(run.param("COUNT").unwrap(), json!(10));
    }

    #[test]
    fn test_set_param_inserts_unknown_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = experiment_in(&dir);
        let mut run = experiment.construct(&Session::empty()).unwrap();

        run.set_param("INJECTED", 1.5).unwrap();
        let parameter = &run.parameters()["INJECTED"];
        assert_eq!(parameter.type_tag, TypeTag::Float);
        assert_eq!(run.param_as::<f64>("INJECTED").unwrap(), 1.5);
    }

    #[test]
    fn test_caching_parameter_drives_cache_reads() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = experiment_in(&dir);
        experiment.declare(PARAM_CACHING, false).unwrap();

        let mut run = experiment.construct(&Session::empty()).unwrap();
        assert!(!run.cache().is_enabled());
        run.set_param(PARAM_CACHING, true).unwrap();
        assert!(run.cache().is_enabled());
    }

    #[test]
    fn test_run_archives_data_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::new(dir.path(), "results/unit");
        experiment.declare("COUNT", 4).unwrap();
        experiment.main(|run| {
            let count: i64 = run.param_as("COUNT")?;
            run.insert("summary/count", count)?;
            run.insert("_scratch", "not persisted")?;
            run.log("body ran")?;
            Ok(())
        });

        let run = experiment.run(&Session::empty()).unwrap();
        let path = run.path().unwrap();

        let metadata = Archive::load_metadata(path).unwrap();
        assert_eq!(metadata.status, RunStatus::Done);
        assert_eq!(metadata.parameters["COUNT"].value, json!(4));
        assert!(metadata.duration.is_some());
        assert_eq!(metadata.hooks["before_run"], 1);
        assert_eq!(metadata.hooks["after_experiment_finalize"], 1);

        let data: Value =
            serde_json::from_str(&fs::read_to_string(path.join("experiment_data.json")).unwrap())
                .unwrap();
        assert_eq!(data["summary"]["count"], json!(4));
        assert!(data.get("_scratch").is_none());

        let log = fs::read_to_string(path.join("experiment_out.log")).unwrap();
        assert!(log.contains("body ran"));
        assert!(log.contains("=== EXPERIMENT FINISHED ==="));
    }

    #[test]
    fn test_failed_body_finalizes_then_reraises() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::new(dir.path(), "results/unit");
        experiment.main(|run| {
            run.insert("partial", 1)?;
            Err(Error::User(anyhow::anyhow!("model diverged")))
        });
        experiment.analysis(|_run| panic!("analyses must not run after a failure"));

        let error = experiment.run(&Session::empty()).unwrap_err();
        assert_eq!(error.kind(), "user");

        // The archive is complete despite the failure.
        let namespace = dir.path().join("results/unit");
        let archive_path = fs::read_dir(&namespace).unwrap().next().unwrap().unwrap().path();
        let metadata = Archive::load_metadata(&archive_path).unwrap();
        assert_eq!(metadata.status, RunStatus::Failed);
        let info = metadata.error.unwrap();
        assert_eq!(info.kind, "user");
        assert!(info.message.contains("model diverged"));
        assert_eq!(metadata.hooks["after_experiment_finalize"], 1);
        assert_eq!(metadata.hooks["before_experiment_error"], 1);

        let data: Value = serde_json::from_str(
            &fs::read_to_string(archive_path.join("experiment_data.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(data["partial"], json!(1));
    }

    #[test]
    fn test_debug_mode_reuses_fixed_archive_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::new(dir.path(), "results/unit");
        experiment.declare(PARAM_DEBUG, true).unwrap();
        experiment.main(|_run| Ok(()));

        let first = experiment.run(&Session::empty()).unwrap();
        let second = experiment.run(&Session::empty()).unwrap();
        assert_eq!(first.name(), DEBUG_NAME);
        assert_eq!(first.path(), second.path());

        let entries: Vec<_> = fs::read_dir(dir.path().join("results/unit"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_custom_name_and_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::new(dir.path(), "results/unit");
        experiment.with_name("baseline_a");
        experiment.main(|_run| Ok(()));
        let run = experiment.run(&Session::empty()).unwrap();
        assert_eq!(run.name(), "baseline_a");

        let mut experiment = Experiment::new(dir.path(), "results/unit");
        experiment.declare(PARAM_PREFIX, "trial").unwrap();
        experiment.main(|_run| Ok(()));
        let run = experiment.run(&Session::empty()).unwrap();
        assert!(run.name().starts_with("trial__"));
    }

    #[test]
    fn test_track_accumulates_and_counts_hook() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::new(dir.path(), "results/unit");
        experiment.main(|run| {
            for epoch in 0..3 {
                run.track("metrics/loss", f64::from(epoch) * 0.5)?;
            }
            Ok(())
        });

        let run = experiment.run(&Session::empty()).unwrap();
        assert_eq!(run.tracked(), ["metrics/loss".to_string()]);
        assert_eq!(
            run.get("metrics/loss").unwrap(),
            &json!([0.0, 0.5, 1.0])
        );

        let metadata = Archive::load_metadata(run.path().unwrap()).unwrap();
        assert_eq!(metadata.track, vec!["metrics/loss".to_string()]);
        assert_eq!(metadata.hooks["experiment_track"], 3);
    }

    #[test]
    fn test_tracked_figures_land_in_track_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::new(dir.path(), "results/unit");
        experiment.main(|run| {
            run.track("weights", Figure::svg("<svg>1</svg>"))?;
            run.track("weights", Figure::svg("<svg>2</svg>"))?;
            Ok(())
        });

        let run = experiment.run(&Session::empty()).unwrap();
        let track_dir = run.archive().unwrap().track_dir();
        assert!(track_dir.join("weights_001.svg").is_file());
        assert!(track_dir.join("weights_002.svg").is_file());
        assert_eq!(
            run.get("weights").unwrap(),
            &json!(["weights_001.svg", "weights_002.svg"])
        );
    }

    #[test]
    fn test_commit_raw_fires_commit_hook() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::new(dir.path(), "results/unit");
        experiment.on("experiment_commit_raw", |event| {
            let HookEvent::Commit { run, file_name, .. } = event else {
                return Ok(Flow::Continue(None));
            };
            let file_name = (*file_name).to_string();
            run.insert("committed", file_name)?;
            Ok(Flow::Continue(None))
        });
        experiment.main(|run| run.commit_raw("note.txt", "experiment notes\n"));

        let run = experiment.run(&Session::empty()).unwrap();
        assert_eq!(run.get("committed").unwrap(), &json!("note.txt"));
        let note = fs::read_to_string(run.path().unwrap().join("note.txt")).unwrap();
        assert_eq!(note, "experiment notes\n");
    }

    #[test]
    fn test_testing_mode_applies_overlay_before_body() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::new(dir.path(), "results/unit");
        experiment.declare("REPETITIONS", 1000).unwrap();
        experiment.declare(PARAM_TESTING, true).unwrap();
        experiment.on_testing(|run| run.set_param("REPETITIONS", 2));
        experiment.main(|run| {
            let repetitions: i64 = run.param_as("REPETITIONS")?;
            run.insert("repetitions", repetitions)?;
            Ok(())
        });

        let run = experiment.run(&Session::empty()).unwrap();
        assert!(run.is_testing());
        assert_eq!(run.get("repetitions").unwrap(), &json!(2));
    }

    #[test]
    fn test_testing_flag_without_overlay_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::new(dir.path(), "results/unit");
        experiment.declare(PARAM_TESTING, true).unwrap();
        experiment.main(|_run| Ok(()));

        let run = experiment.run(&Session::empty()).unwrap();
        assert!(!run.is_testing());
    }

    #[test]
    fn test_missing_body_fails_before_any_archive() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::new(dir.path(), "results/unit");
        let error = experiment.run(&Session::empty()).unwrap_err();
        assert!(matches!(error, Error::MissingBody));
        assert!(!dir.path().join("results").exists());
    }

    #[test]
    fn test_apply_hook_prefers_instance_value() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::new(dir.path(), "results/unit");
        experiment.on("pick_threshold", |_event| Ok(Flow::Stop(Some(json!(0.75)))));
        experiment.main(|run| {
            let threshold = run.apply_hook("pick_threshold", None)?;
            run.insert("threshold", threshold)?;
            Ok(())
        });

        let run = experiment.run(&Session::empty()).unwrap();
        assert_eq!(run.get("threshold").unwrap(), &json!(0.75));
        assert_eq!(run.hooks_fired()["pick_threshold"], 1);
    }

    #[test]
    fn test_extend_inherits_body_hooks_and_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = Experiment::new(dir.path(), "results/base");
        base.declare("COUNT", 5).unwrap();
        base.on("before_run", |event| {
            if let Some(run) = event.run_mut() {
                run.insert("hooked", true)?;
            }
            Ok(Flow::Continue(None))
        });
        base.main(|run| {
            let count: i64 = run.param_as("COUNT")?;
            run.insert("count", count)?;
            Ok(())
        });

        let mut child = Experiment::extend(base, dir.path(), "results/child");
        child.declare("COUNT", 7).unwrap();

        let run = child.run(&Session::empty()).unwrap();
        assert!(run.path().unwrap().starts_with(dir.path().join("results/child")));
        assert_eq!(run.get("count").unwrap(), &json!(7));
        assert_eq!(run.get("hooked").unwrap(), &json!(true));
    }

    #[test]
    fn test_include_mixin_fills_parameter_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let mut mixin = Mixin::new();
        mixin.bind("SEED", 13).unwrap();
        mixin.bind("COUNT", 99).unwrap();

        let mut experiment = Experiment::new(dir.path(), "results/unit");
        experiment.declare("COUNT", 3).unwrap();
        experiment.include(mixin);
        experiment.main(|_run| Ok(()));

        let run = experiment.construct(&Session::empty()).unwrap();
        assert_eq!(run.param("COUNT").unwrap(), json!(3));
        assert_eq!(run.param("SEED").unwrap(), json!(13));
    }

    #[test]
    fn test_analyses_run_against_finished_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::new(dir.path(), "results/unit");
        experiment.main(|run| run.insert("values", vec![1, 2, 3]));
        experiment.analysis(|run| {
            let values: Vec<i64> = run.get_as("values")?;
            let total: i64 = values.iter().sum();
            run.insert("total", total)
        });

        let run = experiment.run(&Session::empty()).unwrap();
        assert_eq!(run.get("total").unwrap(), &json!(6));
    }

    #[test]
    fn test_load_restores_parameters_and_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut experiment = Experiment::new(dir.path(), "results/unit");
        experiment.declare("COUNT", 12).unwrap();
        experiment.main(|run| run.insert("metrics/final", 0.25));

        let session = Session::empty();
        let finished = experiment.run(&session).unwrap();
        let loaded = Run::load(finished.path().unwrap(), &session).unwrap();

        assert_eq!(loaded.status(), RunStatus::Done);
        assert_eq!(loaded.param("COUNT").unwrap(), json!(12));
        assert_eq!(loaded.get("metrics/final").unwrap(), &json!(0.25));
        assert_eq!(loaded.name(), finished.name());
    }

    #[test]
    fn test_source_file_snapshot_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("my_experiment.rs");
        fs::write(&source, "// experiment body\n").unwrap();

        let mut experiment = Experiment::new(dir.path(), "results/unit");
        experiment.source_file(&source);
        experiment.main(|_run| Ok(()));

        let run = experiment.run(&Session::empty()).unwrap();
        let snapshot = run.path().unwrap().join("experiment_code.rs");
        assert_eq!(
            fs::read_to_string(snapshot).unwrap(),
            "// experiment body\n"
        );
    }
}
