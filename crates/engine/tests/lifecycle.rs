//! Integration tests for the experiment lifecycle
//!
//! These tests drive whole runs through the public API and verify the
//! archive contents a user of a finished run would rely on.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::cell::RefCell;
use std::fs;
use std::rc::Rc;

use serde_json::{Value, json};
use tempfile::tempdir;

use labbook_engine::{
    Archive, Experiment, Flow, HookEvent, Mixin, Run, RunStatus, Session, TypeTag,
};

#[test]
fn test_full_run_produces_complete_archive() {
    let dir = tempdir().unwrap();
    let mut experiment = Experiment::new(dir.path(), "results/training");
    experiment.describe("Gradient descent on a toy objective.");
    experiment.declare("EPOCHS", 5).unwrap();
    experiment.declare("LEARNING_RATE", 0.1).unwrap();
    experiment.main(|run| {
        let epochs: i64 = run.param_as("EPOCHS")?;
        let rate: f64 = run.param_as("LEARNING_RATE")?;
        let mut loss = 1.0;
        for _ in 0..epochs {
            loss *= 1.0 - rate;
            run.track("metrics/loss", loss)?;
        }
        run.insert("metrics/final_loss", loss)?;
        run.commit_raw("notes.txt", "converged without surprises\n")?;
        run.log("training finished")?;
        Ok(())
    });

    let run = experiment.run(&Session::empty()).unwrap();
    let path = run.path().unwrap();

    assert!(path.join("experiment_meta.json").is_file());
    assert!(path.join("experiment_data.json").is_file());
    assert!(path.join("experiment_out.log").is_file());
    assert!(path.join(".track").is_dir());

    let metadata = Archive::load_metadata(path).unwrap();
    assert_eq!(metadata.status, RunStatus::Done);
    assert_eq!(metadata.namespace, "results/training");
    assert_eq!(metadata.description, "Gradient descent on a toy objective.");
    assert_eq!(metadata.parameters["EPOCHS"].value, json!(5));
    assert_eq!(metadata.track, vec!["metrics/loss".to_string()]);
    assert_eq!(metadata.hooks["before_run"], 1);
    assert_eq!(metadata.hooks["after_run"], 1);
    assert_eq!(metadata.hooks["experiment_track"], 5);

    let data: Value =
        serde_json::from_str(&fs::read_to_string(path.join("experiment_data.json")).unwrap())
            .unwrap();
    assert_eq!(data["metrics"]["loss"].as_array().unwrap().len(), 5);
    assert!(data["metrics"]["final_loss"].is_number());

    let notes = fs::read_to_string(path.join("notes.txt")).unwrap();
    assert_eq!(notes, "converged without surprises\n");
}

#[test]
fn test_failed_run_is_archived_before_reraise() {
    let dir = tempdir().unwrap();
    let mut experiment = Experiment::new(dir.path(), "results/failing");
    experiment.main(|run| {
        run.insert("progress", 0.5)?;
        Err(anyhow::anyhow!("input tensor has NaN entries").into())
    });

    let error = experiment.run(&Session::empty()).unwrap_err();
    assert_eq!(error.kind(), "user");

    let namespace = dir.path().join("results/failing");
    let archive_path = fs::read_dir(&namespace)
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let metadata = Archive::load_metadata(&archive_path).unwrap();
    assert_eq!(metadata.status, RunStatus::Failed);
    assert_eq!(metadata.hooks["after_experiment_finalize"], 1);
    assert_eq!(metadata.hooks["before_experiment_error"], 1);

    let info = metadata.error.unwrap();
    assert_eq!(info.kind, "user");
    assert!(info.message.contains("NaN entries"));

    // Data accumulated before the failure is persisted.
    let data: Value = serde_json::from_str(
        &fs::read_to_string(archive_path.join("experiment_data.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(data["progress"], json!(0.5));

    let log = fs::read_to_string(archive_path.join("experiment_out.log")).unwrap();
    assert!(log.contains("=== EXPERIMENT FAILED ==="));
}

#[test]
fn test_debug_runs_replace_each_other() {
    let dir = tempdir().unwrap();

    let mut first = Experiment::new(dir.path(), "results/debugging");
    first.declare("__DEBUG__", true).unwrap();
    first.main(|run| run.commit_raw("marker.txt", "from the first run\n"));
    let first_run = first.run(&Session::empty()).unwrap();
    assert!(first_run.path().unwrap().join("marker.txt").is_file());

    let mut second = Experiment::new(dir.path(), "results/debugging");
    second.declare("__DEBUG__", true).unwrap();
    second.main(|_run| Ok(()));
    let second_run = second.run(&Session::empty()).unwrap();

    // Same fixed folder, wiped between runs.
    assert_eq!(first_run.path(), second_run.path());
    assert!(!second_run.path().unwrap().join("marker.txt").exists());
}

#[test]
fn test_generated_names_carry_prefix() {
    let dir = tempdir().unwrap();
    let mut experiment = Experiment::new(dir.path(), "results/naming");
    experiment.declare("__PREFIX__", "sweep").unwrap();
    experiment.main(|_run| Ok(()));

    let run = experiment.run(&Session::empty()).unwrap();
    let segments: Vec<&str> = run.name().split("__").collect();
    assert_eq!(segments[0], "sweep");
    assert_eq!(segments.len(), 4);
    assert_eq!(segments[3].len(), 4);
}

#[test]
fn test_archive_round_trips_through_load() {
    let dir = tempdir().unwrap();
    let mut experiment = Experiment::new(dir.path(), "results/roundtrip");
    experiment.declare("SEED", 42).unwrap();
    experiment.main(|run| {
        run.insert("samples/drawn", vec![1, 1, 2, 3, 5])?;
        run.track("metrics/accuracy", 0.9)?;
        Ok(())
    });

    let session = Session::empty();
    let finished = experiment.run(&session).unwrap();
    let loaded = Run::load(finished.path().unwrap(), &session).unwrap();

    assert_eq!(loaded.status(), RunStatus::Done);
    assert_eq!(loaded.name(), finished.name());
    assert_eq!(loaded.param("SEED").unwrap(), json!(42));
    assert_eq!(
        loaded.get("samples/drawn").unwrap(),
        &json!([1, 1, 2, 3, 5])
    );
    assert_eq!(loaded.tracked(), finished.tracked());
    assert!(loaded.duration().is_some());
}

#[test]
fn test_mixin_hooks_fire_in_inclusion_order() {
    let dir = tempdir().unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));

    let mut logging_mixin = Mixin::new();
    let seen = order.clone();
    logging_mixin.on("before_run", move |_event| {
        seen.borrow_mut().push("logging");
        Ok(Flow::Continue(None))
    });

    let mut seeding_mixin = Mixin::new();
    seeding_mixin.bind("SEED", 7).unwrap();
    let seen = order.clone();
    seeding_mixin.on("before_run", move |_event| {
        seen.borrow_mut().push("seeding");
        Ok(Flow::Continue(None))
    });

    let mut experiment = Experiment::new(dir.path(), "results/mixins");
    experiment.include(logging_mixin);
    experiment.include(seeding_mixin);
    let seen = order.clone();
    experiment.on("before_run", move |_event| {
        seen.borrow_mut().push("own");
        Ok(Flow::Continue(None))
    });
    experiment.main(|_run| Ok(()));

    let run = experiment.run(&Session::empty()).unwrap();
    assert_eq!(*order.borrow(), vec!["logging", "seeding", "own"]);
    assert_eq!(run.param("SEED").unwrap(), json!(7));
}

#[test]
fn test_testing_mode_is_visible_in_final_metadata() {
    let dir = tempdir().unwrap();
    let mut experiment = Experiment::new(dir.path(), "results/testing");
    experiment.declare("REPETITIONS", 10_000).unwrap();
    experiment.declare("__TESTING__", true).unwrap();
    experiment.on_testing(|run| run.set_param("REPETITIONS", 3));
    experiment.main(|run| {
        let repetitions: i64 = run.param_as("REPETITIONS")?;
        run.insert("repetitions_used", repetitions)?;
        Ok(())
    });

    let run = experiment.run(&Session::empty()).unwrap();
    assert!(run.is_testing());
    assert_eq!(run.get("repetitions_used").unwrap(), &json!(3));

    let metadata = Archive::load_metadata(run.path().unwrap()).unwrap();
    assert_eq!(metadata.parameters["REPETITIONS"].value, json!(3));
    assert_eq!(metadata.hooks["__TESTING__"], 1);
}

#[test]
fn test_reproducible_run_captures_dependency_snapshot() {
    let dir = tempdir().unwrap();
    let lockfile = dir.path().join("Cargo.lock");
    fs::write(
        &lockfile,
        r#"
version = 4

[[package]]
name = "serde"
version = "1.0.219"
source = "registry+https://github.com/rust-lang/crates.io-index"

[[package]]
name = "my-experiments"
version = "0.1.0"
dependencies = ["serde"]
"#,
    )
    .unwrap();

    let mut experiment = Experiment::new(dir.path(), "results/repro");
    experiment.declare("__REPRODUCIBLE__", true).unwrap();
    experiment.lockfile(&lockfile);
    experiment.main(|_run| Ok(()));

    let run = experiment.run(&Session::empty()).unwrap();
    let path = run.path().unwrap();

    let snapshot: Value = serde_json::from_str(
        &fs::read_to_string(path.join(".dependencies.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(snapshot["serde"]["version"], json!("1.0.219"));
    assert!(snapshot["__environment__"]["os"].is_string());

    let requirements = fs::read_to_string(path.join("requirements.txt")).unwrap();
    assert!(requirements.contains("serde==1.0.219"));
    // Locally developed packages are not pinnable by version.
    assert!(!requirements.contains("my-experiments"));

    assert!(path.join(".sources").is_dir());
}

#[test]
fn test_actionable_path_parameter_lands_in_archive() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("model_config.toml");
    fs::write(&config, "layers = 4\n").unwrap();

    let mut experiment = Experiment::new(dir.path(), "results/actionable");
    experiment
        .declare_typed(
            "CONFIG_PATH",
            config.display().to_string(),
            TypeTag::Path,
            Some("model configuration consumed by the body"),
        )
        .unwrap();
    experiment.declare("__REPRODUCIBLE__", true).unwrap();
    experiment.lockfile(dir.path().join("Cargo.lock"));
    fs::write(dir.path().join("Cargo.lock"), "version = 4\n").unwrap();
    experiment.main(|run| {
        let path: String = run.param_as("CONFIG_PATH")?;
        let content = fs::read_to_string(path)?;
        run.insert("config_content", content)?;
        Ok(())
    });

    let run = experiment.run(&Session::empty()).unwrap();
    assert_eq!(run.get("config_content").unwrap(), &json!("layers = 4\n"));

    // The capture pass copied the file next to the run outputs, and reads
    // fall back to that copy once the original is gone.
    assert!(run.path().unwrap().join("model_config.toml.copy").is_file());
    fs::remove_file(&config).unwrap();
    let fallback: String = run.param_as("CONFIG_PATH").unwrap();
    assert!(fallback.ends_with("model_config.toml.copy"));
}

#[test]
fn test_extended_experiment_inherits_body_and_layers_parameters() {
    let dir = tempdir().unwrap();
    let mut base = Experiment::new(dir.path(), "results/base");
    base.declare("WIDTH", 32).unwrap();
    base.declare("DEPTH", 2).unwrap();
    base.main(|run| {
        let width: i64 = run.param_as("WIDTH")?;
        let depth: i64 = run.param_as("DEPTH")?;
        run.insert("cells", width * depth)?;
        Ok(())
    });

    let mut wide = Experiment::extend(base, dir.path(), "results/wide");
    wide.declare("WIDTH", 128).unwrap();

    let run = wide.run(&Session::empty()).unwrap();
    assert_eq!(run.namespace(), "results/wide");
    assert_eq!(run.get("cells").unwrap(), &json!(256));
}

#[test]
fn test_session_hooks_apply_to_every_run() {
    let dir = tempdir().unwrap();
    let fired = Rc::new(RefCell::new(0usize));

    struct StampPlugin {
        fired: Rc<RefCell<usize>>,
    }
    impl labbook_engine::Plugin for StampPlugin {
        fn name(&self) -> &'static str {
            "stamp"
        }
        fn register(&self, hooks: &mut labbook_engine::HookRegistry) -> labbook_engine::Result<()> {
            let fired = self.fired.clone();
            hooks.register(
                "before_run",
                0,
                labbook_engine::RegisterMode::Append,
                move |event| {
                    *fired.borrow_mut() += 1;
                    if let Some(run) = event.run_mut() {
                        run.insert("stamped", true)?;
                    }
                    Ok(Flow::Continue(None))
                },
            );
            Ok(())
        }
    }

    let seen = fired.clone();
    let session = Rc::new(
        Session::builder()
            .bundled(false)
            .plugin(move || {
                Ok(Box::new(StampPlugin {
                    fired: seen.clone(),
                }) as Box<dyn labbook_engine::Plugin>)
            })
            .build(),
    );

    for namespace in ["results/first", "results/second"] {
        let mut experiment = Experiment::new(dir.path(), namespace);
        experiment.main(|_run| Ok(()));
        let run = experiment.run(&session).unwrap();
        assert_eq!(run.get("stamped").unwrap(), &json!(true));
    }
    assert_eq!(*fired.borrow(), 2);
}

#[test]
fn test_stop_flow_skips_later_callbacks_and_returns_value() {
    let dir = tempdir().unwrap();
    let mut experiment = Experiment::new(dir.path(), "results/flow");
    experiment.on("choose_rate", |_event| Ok(Flow::Stop(Some(json!(0.01)))));
    experiment.on("choose_rate", |_event| {
        panic!("a Stop earlier in the chain must prevent this callback")
    });
    experiment.main(|run| {
        let rate = run.apply_hook("choose_rate", Some(json!("hint")))?;
        run.insert("rate", rate)?;
        Ok(())
    });

    let run = experiment.run(&Session::empty()).unwrap();
    assert_eq!(run.get("rate").unwrap(), &json!(0.01));
}

#[test]
fn test_hook_value_threads_through_event_payload() {
    let dir = tempdir().unwrap();
    let mut experiment = Experiment::new(dir.path(), "results/payload");
    experiment.on("scale", |event| {
        let HookEvent::Custom { value, .. } = event else {
            return Ok(Flow::Continue(None));
        };
        let doubled = value
            .and_then(Value::as_f64)
            .map(|number| json!(number * 2.0));
        Ok(Flow::Continue(doubled))
    });
    experiment.main(|run| {
        let scaled = run.apply_hook("scale", Some(json!(21.0)))?;
        run.insert("scaled", scaled)?;
        Ok(())
    });

    let run = experiment.run(&Session::empty()).unwrap();
    assert_eq!(run.get("scaled").unwrap(), &json!(42.0));
}
