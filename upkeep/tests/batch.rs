//! Allowlist-level behavior: failure isolation, the kill switch, and the
//! knowledge graph side channel.

use std::fs;

use upkeep::batch::{RepositoryReport, run_batch};
use upkeep::core::allowlist::RepoId;
use upkeep::core::types::{Proposal, SafeMutation};
use upkeep::decide::{Collaborators, DecisionGate};
use upkeep::io::archive::DECISION_FILE;
use upkeep::io::graph::{KnowledgeGraph, NodeKind};
use upkeep::test_support::{
    FixedSource, LocalForge, MarkerProbe, QUALITY_FILE, TestRemote, edit, test_config,
};

fn ids(raw: &[&str]) -> Vec<RepoId> {
    raw.iter().map(|id| id.parse().expect("repo id")).collect()
}

fn plain_remote() -> TestRemote {
    TestRemote::new(&[
        (QUALITY_FILE, "tests=pass\nlint=10\n"),
        ("app.py", "print('hello')\n"),
    ])
    .expect("remote")
}

#[test]
fn clone_failure_does_not_stop_the_batch() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let remote = plain_remote();
    let forge = LocalForge::new().with_remote("acme/widgets", &remote);
    let probe = MarkerProbe::new();
    let source = FixedSource::new(vec![edit(
        QUALITY_FILE,
        "tests=pass\nlint=0\n",
        "Clean everything",
    )]);
    let gate = DecisionGate::new(
        &config,
        Collaborators {
            forge: &forge,
            probe: &probe,
            source: &source,
        },
    );

    let outcome = run_batch(&gate, &ids(&["ghost/missing", "acme/widgets"]));

    assert!(!outcome.aborted);
    assert_eq!(outcome.reports.len(), 2);
    match &outcome.reports[0] {
        RepositoryReport::Failed { repository, error } => {
            assert_eq!(repository, "ghost/missing");
            assert!(error.contains("acquire working copy"), "{error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(matches!(&outcome.reports[1], RepositoryReport::Decided(decision) if decision.accepted));
    assert_eq!(outcome.accepted_count(), 1);
    assert_eq!(outcome.failed_count(), 1);
    assert!(
        !config
            .artifacts_dir
            .join("ghost__missing")
            .join(DECISION_FILE)
            .exists()
    );
}

#[test]
fn kill_switch_before_first_repository_processes_nothing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    fs::write(&config.kill_switch_file, "").expect("kill switch");
    let remote = plain_remote();
    let forge = LocalForge::new().with_remote("acme/widgets", &remote);
    let probe = MarkerProbe::new();
    let source = FixedSource::new(Vec::new());
    let gate = DecisionGate::new(
        &config,
        Collaborators {
            forge: &forge,
            probe: &probe,
            source: &source,
        },
    );

    let outcome = run_batch(&gate, &ids(&["acme/widgets"]));

    assert!(outcome.aborted);
    assert!(outcome.reports.is_empty());
    assert_eq!(probe.lint_runs(), 0);
    assert!(!config.work_dir.join("acme__widgets").exists());
}

#[test]
fn kill_switch_between_candidates_aborts_the_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let first = plain_remote();
    let second = plain_remote();
    let forge = LocalForge::new()
        .with_remote("acme/first", &first)
        .with_remote("acme/second", &second);
    // Run 1 is the baseline, run 2 scores candidate 1; then the switch flips.
    let probe = MarkerProbe::new().engage_kill_switch_after(&config.kill_switch_file, 2);
    let source = FixedSource::new(vec![
        edit("one.txt", "1\n", "Not an improvement"),
        edit(QUALITY_FILE, "tests=pass\nlint=0\n", "Would be accepted"),
    ]);
    let gate = DecisionGate::new(
        &config,
        Collaborators {
            forge: &forge,
            probe: &probe,
            source: &source,
        },
    );

    let outcome = run_batch(&gate, &ids(&["acme/first", "acme/second"]));

    assert!(outcome.aborted);
    assert!(outcome.reports.is_empty());
    assert_eq!(probe.lint_runs(), 2, "candidate 2 must never be scored");
    assert!(forge.pull_requests().is_empty());
    assert_eq!(first.branches().expect("branches"), vec!["main"]);

    let first_dir = config.artifacts_dir.join("acme__first");
    assert!(first_dir.join("rejected/1.diff").is_file());
    assert!(!first_dir.join(DECISION_FILE).exists());
    assert!(!config.work_dir.join("acme__first").exists());
    assert!(!config.artifacts_dir.join("acme__second").exists());
    assert!(!config.work_dir.join("acme__second").exists());
}

#[test]
fn editorconfig_mutation_accepted_and_graph_recorded() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(temp.path());
    config.graph.enabled = true;
    let remote = TestRemote::new(&[
        (QUALITY_FILE, "tests=pass\nlint=0\npenalty=.editorconfig:10\n"),
        ("src/app.py", "print('hello')\n"),
        ("docs/guide.md", "# guide\n"),
        ("benchmarks/quick.sh", "exit 0\n"),
        ("benchmarks/broken.sh", "exit 3\n"),
    ])
    .expect("remote");
    let forge = LocalForge::new().with_remote("acme/widgets", &remote);
    let probe = MarkerProbe::new();
    let source = FixedSource::new(vec![Proposal::Mutation(SafeMutation::Editorconfig)]);
    let gate = DecisionGate::new(
        &config,
        Collaborators {
            forge: &forge,
            probe: &probe,
            source: &source,
        },
    );

    let outcome = run_batch(&gate, &ids(&["acme/widgets"]));

    assert_eq!(outcome.accepted_count(), 1);
    let (_, request) = &forge.pull_requests()[0];
    let editorconfig = remote
        .read_file(&request.head, ".editorconfig")
        .expect("read")
        .expect("editorconfig on branch");
    assert!(editorconfig.contains("root = true"));

    let graph = KnowledgeGraph::load(&config.graph.path).expect("graph");
    assert_eq!(
        graph.nodes.get("acme/widgets").map(|node| node.kind),
        Some(NodeKind::Repo)
    );
    assert_eq!(
        graph.nodes.get("acme/widgets:src/app.py").map(|node| node.kind),
        Some(NodeKind::File)
    );
    assert!(!graph.nodes.contains_key("acme/widgets:docs/guide.md"));

    let quick = &graph.nodes["acme/widgets:bench:benchmarks/quick.sh"];
    assert_eq!(quick.kind, NodeKind::Bench);
    assert!(quick.attributes["seconds"].is_number());
    let broken = &graph.nodes["acme/widgets:bench:benchmarks/broken.sh"];
    assert!(broken.attributes["seconds"].is_null());
}
