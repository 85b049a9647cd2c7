use crate::{
    config::{check_executable, ConfigErrors, SchedulerConfig},
    executors::{Dispatcher, DEFAULT_PARALLEL_TOOL},
    test_util::{Workspace, SOLVER},
};
use std::fs;

fn batch(workspace: &Workspace) -> String {
    format!(
        "executor:
  threads: 3
  ignore_fatal: true
  isolate: true
jobs:
  - program: SimSS
    path: {dir}
    args: -Gfrac 0.5 -JV_file JV_half.dat
    label: half
  - program: SimSS
    path: {dir}
    args: -JV_file JV_full.dat
",
        dir = workspace.dir.display()
    )
}

#[test]
pub fn load_batch_config() {
    let workspace = Workspace::new();
    let path = workspace.root.path().join("batch.yaml");
    fs::write(&path, batch(&workspace)).unwrap();

    let mut config = SchedulerConfig::load(&path).unwrap();

    assert!(!config.preflight_checks());
    assert_eq!(config.jobs[0].label, "half");
    assert_eq!(config.jobs[1].label, "job 1");
    assert_eq!(config.jobs[1].argument_string, "-JV_file JV_full.dat");
    assert_eq!(config.executor.parallel, DEFAULT_PARALLEL_TOOL);

    let options = config.options();
    assert_eq!(options.concurrency.get(), 3);
    assert!(options.use_concurrency);
    assert!(options.ignore_fatal);
    assert!(options.isolate);

    let reports = Dispatcher::new(options).execute(&config.jobs).unwrap();
    assert_eq!(reports[0].label, "half");
    assert_eq!(reports[1].label, "job 1");
    assert!(workspace.read("JV_half.dat").starts_with("Gfrac=0.5\n"));
    assert!(workspace.read("JV_full.dat").starts_with("Gfrac=1\n"));
}

#[test]
pub fn defaults_apply_to_missing_sections() {
    let config: SchedulerConfig = serde_yaml::from_str("jobs: []").unwrap();

    assert!(config.executor.concurrency);
    assert!(!config.executor.ignore_fatal);
    assert!(config.executor.build.is_none());
    assert!(config.options().concurrency.get() >= 1);
}

#[test]
pub fn reject_unknown_fields() {
    assert!(serde_yaml::from_str::<SchedulerConfig>("executor:\n  cores: 4\n").is_err());
    assert!(serde_yaml::from_str::<SchedulerConfig>(
        "jobs:\n  - program: simss\n    path: .\n    argv: -Gfrac 1\n"
    )
    .is_err());
}

#[test]
pub fn preflight_reports_every_problem() {
    let workspace = Workspace::new();
    let yaml = format!(
        "executor:
  threads: 0
  parallel: ''
jobs:
  - program: simss
    path: {missing}
  - program: ''
    path: {dir}
  - program: zimt
    path: {dir}
",
        missing = workspace.root.path().join("nowhere").display(),
        dir = workspace.dir.display()
    );
    let mut config: SchedulerConfig = serde_yaml::from_str(&yaml).unwrap();

    assert!(config.preflight_checks());
    assert_eq!(config.executor.parallel, DEFAULT_PARALLEL_TOOL);
    // an invalid thread count never reaches the dispatcher
    assert!(config.options().concurrency.get() >= 1);
    assert!(serde_yaml::from_str::<SchedulerConfig>("jobs: []")
        .unwrap()
        .preflight_checks());
}

#[test]
pub fn missing_solver_passes_preflight_with_a_build_command() {
    let workspace = Workspace::new();
    let yaml = format!(
        "executor:
  build: make {{name}}
jobs:
  - program: zimt
    path: {dir}
",
        dir = workspace.dir.display()
    );
    let mut config: SchedulerConfig = serde_yaml::from_str(&yaml).unwrap();

    assert!(!config.preflight_checks());
    assert_eq!(config.options().build_command.as_deref(), Some("make {name}"));
}

#[test]
pub fn executable_checks() {
    use std::os::unix::fs::PermissionsExt;

    let workspace = Workspace::new();
    let solver = workspace.dir.join(SOLVER);
    assert!(check_executable(&solver).unwrap());

    fs::set_permissions(&solver, fs::Permissions::from_mode(0o644)).unwrap();
    assert!(!check_executable(&solver).unwrap());

    assert!(matches!(
        check_executable(&workspace.dir.join("zimt")),
        Err(ConfigErrors::FileNotFound)
    ));
}
