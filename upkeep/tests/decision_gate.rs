//! Decision-gate scenarios against real git remotes and a scripted probe.
//!
//! Each test seeds a bare repository, points a [`LocalForge`] at it and lets
//! the gate clone, score, apply and publish. Quality is driven by the
//! `.quality` file in the working copy (see [`MarkerProbe`]).

use std::fs;

use upkeep::core::allowlist::RepoId;
use upkeep::core::types::{DecisionOutcome, Proposal, SafeMutation};
use upkeep::decide::{Collaborators, DecisionGate};
use upkeep::io::archive::{DECISION_FILE, MANIFEST_FILE};
use upkeep::io::config::AgentConfig;
use upkeep::io::memory::MemoryStore;
use upkeep::io::prompt::PromptBuilder;
use upkeep::propose::GenerativeSource;
use upkeep::test_support::{
    FixedSource, LocalForge, MarkerProbe, QUALITY_FILE, ScriptedCompletion, TestRemote, edit,
    test_config,
};

const REPO: &str = "acme/widgets";

fn repo() -> RepoId {
    REPO.parse().expect("repo id")
}

fn remote(quality: &str) -> TestRemote {
    TestRemote::new(&[
        (QUALITY_FILE, quality),
        ("app.py", "print('hello')\n"),
        ("README.md", "# widgets\n"),
    ])
    .expect("remote")
}

fn decide(
    config: &AgentConfig,
    forge: &LocalForge,
    probe: &MarkerProbe,
    proposals: Vec<Proposal>,
) -> anyhow::Result<DecisionOutcome> {
    let source = FixedSource::new(proposals);
    let gate = DecisionGate::new(
        config,
        Collaborators {
            forge,
            probe,
            source: &source,
        },
    );
    gate.process_repository(&repo())
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// Scenario A: lint 10 → 4 with passing tests is a 6.7% gain and is accepted.
#[test]
fn improving_candidate_opens_pull_request() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let remote = remote("tests=pass\nlint=10\n");
    let forge = LocalForge::new().with_remote(REPO, &remote);
    let probe = MarkerProbe::new();

    let outcome = decide(
        &config,
        &forge,
        &probe,
        vec![edit(QUALITY_FILE, "tests=pass\nlint=4\n", "Fix six lint findings")],
    )
    .expect("decide");

    assert!(outcome.accepted);
    assert!(approx(outcome.delta, 6.0 / 90.0 * 100.0));
    assert!(approx(outcome.baseline_score, 90.0));
    assert!(!outcome.pushed);
    assert_eq!(outcome.candidates_considered, 1);
    assert_eq!(outcome.candidates_rejected, 0);
    assert_eq!(outcome.publish_error, None);

    let pull_requests = forge.pull_requests();
    assert_eq!(pull_requests.len(), 1);
    let (pr_repo, request) = &pull_requests[0];
    assert_eq!(pr_repo, &repo());
    assert_eq!(request.base, "main");
    assert_eq!(request.body, "Fix six lint findings");
    assert!(request.head.starts_with("upkeep/auto-"));
    assert_eq!(
        outcome.published_reference.as_deref(),
        Some("https://forge.test/acme/widgets/pull/1")
    );

    // The branch carries the change; the default branch is untouched.
    assert_eq!(
        remote.read_file(&request.head, QUALITY_FILE).expect("read"),
        Some("tests=pass\nlint=4\n".to_string())
    );
    assert_eq!(
        remote.read_file("main", QUALITY_FILE).expect("read"),
        Some("tests=pass\nlint=10\n".to_string())
    );
    assert_eq!(
        remote.commit_subject(&request.head).expect("subject"),
        "upkeep: Fix six lint findings"
    );
}

/// Scenario B: lint 10 → 9 is a 1.1% gain, below the 5% margin.
#[test]
fn marginal_candidate_is_rejected_and_archived() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let remote = remote("tests=pass\nlint=10\n");
    let forge = LocalForge::new().with_remote(REPO, &remote);
    let probe = MarkerProbe::new();

    let outcome = decide(
        &config,
        &forge,
        &probe,
        vec![edit(QUALITY_FILE, "tests=pass\nlint=9\n", "Fix one finding")],
    )
    .expect("decide");

    assert!(!outcome.accepted);
    assert!(approx(outcome.delta, 1.0 / 90.0 * 100.0));
    assert_eq!(outcome.candidates_considered, 1);
    assert_eq!(outcome.candidates_rejected, 1);
    assert_eq!(outcome.published_reference, None);
    assert!(forge.pull_requests().is_empty());
    assert_eq!(remote.branches().expect("branches"), vec!["main"]);

    let diff = fs::read_to_string(
        config
            .artifacts_dir
            .join(repo().slug())
            .join("rejected/1.diff"),
    )
    .expect("rejected diff");
    assert!(diff.contains("-lint=10"));
    assert!(diff.contains("+lint=9"));
}

/// Scenario C: failing tests with no lint is a zero baseline; fixing the tests counts as 100%.
#[test]
fn zero_baseline_fixed_tests_is_accepted() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let remote = remote("tests=fail\nlint=0\n");
    let forge = LocalForge::new().with_remote(REPO, &remote);
    let probe = MarkerProbe::new();

    let outcome = decide(
        &config,
        &forge,
        &probe,
        vec![edit(QUALITY_FILE, "tests=pass\nlint=0\n", "Repair the test suite")],
    )
    .expect("decide");

    assert!(outcome.accepted);
    assert!(approx(outcome.baseline_score, 0.0));
    assert!(approx(outcome.delta, 100.0));
}

/// Scenario D: a negative baseline that does not move stays rejected.
#[test]
fn unchanged_negative_baseline_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let remote = remote("tests=fail\nlint=5\n");
    let forge = LocalForge::new().with_remote(REPO, &remote);
    let probe = MarkerProbe::new();

    let outcome = decide(
        &config,
        &forge,
        &probe,
        vec![edit("NOTES.md", "nothing useful\n", "Add notes")],
    )
    .expect("decide");

    assert!(!outcome.accepted);
    assert!(approx(outcome.baseline_score, -5.0));
    assert!(approx(outcome.delta, 0.0));
    assert_eq!(outcome.candidates_rejected, 1);
}

/// Scenario E: an unparseable completion yields no candidates, so nothing
/// is accepted and nothing is archived as rejected.
#[test]
fn unparseable_completion_ends_without_candidates() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let remote = remote("tests=pass\nlint=10\n");
    let forge = LocalForge::new().with_remote(REPO, &remote);
    let probe = MarkerProbe::new();
    let completion = ScriptedCompletion::text("Sure! Here are some ideas: tidy things up.");
    let source = GenerativeSource::new(&completion, PromptBuilder::new(32_000), 256, 0.0);
    let gate = DecisionGate::new(
        &config,
        Collaborators {
            forge: &forge,
            probe: &probe,
            source: &source,
        },
    );

    let outcome = gate.process_repository(&repo()).expect("decide");

    assert!(!outcome.accepted);
    assert_eq!(outcome.candidates_considered, 0);
    assert_eq!(outcome.candidates_rejected, 0);
    assert!(approx(outcome.delta, 0.0));
    assert_eq!(completion.prompts().len(), 1);
    assert_eq!(probe.lint_runs(), 1, "only the baseline is scored");
    assert!(forge.pull_requests().is_empty());
    assert!(
        !config
            .artifacts_dir
            .join("acme__widgets")
            .join("rejected")
            .exists()
    );
}

/// The last rejected candidate is not followed by a clone, so an unreachable
/// remote at that point cannot turn a finished evaluation into a failure.
#[test]
fn last_rejection_needs_no_fresh_clone() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let remote = remote("tests=pass\nlint=10\n");
    let forge = LocalForge::new().with_remote(REPO, &remote).clone_limit(2);
    let probe = MarkerProbe::new();

    let outcome = decide(
        &config,
        &forge,
        &probe,
        vec![
            edit("one.txt", "1\n", "First idea"),
            edit("two.txt", "2\n", "Second idea"),
        ],
    )
    .expect("decide");

    assert!(!outcome.accepted);
    assert_eq!(outcome.candidates_rejected, 2);
    assert_eq!(forge.clones(), 2, "one initial clone plus one between candidates");
    let repo_dir = config.artifacts_dir.join("acme__widgets");
    assert!(repo_dir.join(DECISION_FILE).is_file());
    assert!(repo_dir.join("rejected/2.diff").is_file());
    assert!(repo_dir.join("snapshots/after").join("two.txt").is_file());
}

/// Every candidate is scored against the pristine baseline.
#[test]
fn rejected_candidates_do_not_compound() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let remote = remote("tests=pass\nlint=10\n");
    let forge = LocalForge::new().with_remote(REPO, &remote);
    let probe = MarkerProbe::new();

    let outcome = decide(
        &config,
        &forge,
        &probe,
        vec![
            edit("first.txt", "one\n", "First idea"),
            edit("second.txt", "two\n", "Second idea"),
        ],
    )
    .expect("decide");

    assert!(!outcome.accepted);
    assert_eq!(outcome.candidates_considered, 2);
    assert_eq!(outcome.candidates_rejected, 2);

    let observed = probe.observed();
    assert_eq!(observed.len(), 3, "baseline plus one run per candidate");
    assert!(!observed[0].contains_key("first.txt"));
    assert!(observed[1].contains_key("first.txt"));
    assert!(observed[2].contains_key("second.txt"));
    assert!(
        !observed[2].contains_key("first.txt"),
        "second candidate saw the first candidate's edit"
    );

    let rejected = config.artifacts_dir.join(repo().slug()).join("rejected");
    let first = fs::read_to_string(rejected.join("1.diff")).expect("diff 1");
    let second = fs::read_to_string(rejected.join("2.diff")).expect("diff 2");
    assert!(first.contains("first.txt"));
    assert!(!first.contains("second.txt"));
    assert!(second.contains("second.txt"));
    assert!(!second.contains("first.txt"));
}

#[test]
fn first_acceptance_stops_the_loop() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let remote = remote("tests=pass\nlint=10\n");
    let forge = LocalForge::new().with_remote(REPO, &remote);
    let probe = MarkerProbe::new();

    let outcome = decide(
        &config,
        &forge,
        &probe,
        vec![
            edit(QUALITY_FILE, "tests=pass\nlint=0\n", "Clean everything"),
            edit(QUALITY_FILE, "tests=pass\nlint=2\n", "Clean most things"),
        ],
    )
    .expect("decide");

    assert!(outcome.accepted);
    assert_eq!(outcome.candidates_considered, 1);
    assert_eq!(probe.lint_runs(), 2);
    assert_eq!(forge.pull_requests().len(), 1);
}

#[test]
fn max_iterations_caps_candidates() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(temp.path());
    config.max_iterations = 2;
    let remote = remote("tests=pass\nlint=10\n");
    let forge = LocalForge::new().with_remote(REPO, &remote);
    let probe = MarkerProbe::new();

    let outcome = decide(
        &config,
        &forge,
        &probe,
        vec![
            edit("a.txt", "a\n", "a"),
            edit("b.txt", "b\n", "b"),
            edit(QUALITY_FILE, "tests=pass\nlint=0\n", "would have won"),
        ],
    )
    .expect("decide");

    assert!(!outcome.accepted);
    assert_eq!(outcome.candidates_considered, 2);
}

#[test]
fn direct_push_lands_on_default_branch() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(temp.path());
    config.direct_push = true;
    let remote = remote("tests=pass\nlint=10\n");
    let before = remote.head_sha("main").expect("sha");
    let forge = LocalForge::new().with_remote(REPO, &remote);
    let probe = MarkerProbe::new();

    let outcome = decide(
        &config,
        &forge,
        &probe,
        vec![edit(QUALITY_FILE, "tests=pass\nlint=1\n", "Tidy lint\n\nDetails here")],
    )
    .expect("decide");

    assert!(outcome.accepted);
    assert!(outcome.pushed);
    assert!(forge.pull_requests().is_empty());
    assert_eq!(remote.branches().expect("branches"), vec!["main"]);

    let after = remote.head_sha("main").expect("sha");
    assert_ne!(before, after);
    let reference = outcome.published_reference.expect("reference");
    assert!(after.starts_with(&reference), "{after} vs {reference}");
    assert_eq!(
        remote.commit_subject("main").expect("subject"),
        "upkeep: Tidy lint"
    );
    assert_eq!(
        remote.read_file("main", QUALITY_FILE).expect("read"),
        Some("tests=pass\nlint=1\n".to_string())
    );
}

#[test]
fn publish_failure_is_recorded_not_raised() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let remote = remote("tests=pass\nlint=10\n");
    let forge = LocalForge::new()
        .with_remote(REPO, &remote)
        .failing_pull_requests();
    let probe = MarkerProbe::new();

    let outcome = decide(
        &config,
        &forge,
        &probe,
        vec![edit(QUALITY_FILE, "tests=pass\nlint=0\n", "Clean everything")],
    )
    .expect("decide");

    assert!(outcome.accepted);
    assert_eq!(outcome.published_reference, None);
    assert!(!outcome.pushed);
    let error = outcome.publish_error.expect("publish error");
    assert!(error.contains("pull request"), "{error}");
    assert!(
        MemoryStore::new(&config.memory.path)
            .records()
            .expect("records")
            .is_empty()
    );
}

#[test]
fn unsafe_path_is_rejected_and_next_candidate_runs() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let remote = remote("tests=pass\nlint=10\n");
    let forge = LocalForge::new().with_remote(REPO, &remote);
    let probe = MarkerProbe::new();

    let outcome = decide(
        &config,
        &forge,
        &probe,
        vec![
            edit("../escaped.txt", "gotcha\n", "Escape"),
            edit(QUALITY_FILE, "tests=pass\nlint=0\n", "Clean everything"),
        ],
    )
    .expect("decide");

    assert!(outcome.accepted);
    assert_eq!(outcome.candidates_considered, 2);
    assert_eq!(outcome.candidates_rejected, 1);
    // The failed application never reached the probe.
    assert_eq!(probe.lint_runs(), 2);
    assert!(!config.work_dir.join("escaped.txt").exists());
}

#[test]
fn lint_crash_scores_as_sentinel() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let remote = remote("tests=pass\nlint=3\n");
    let forge = LocalForge::new().with_remote(REPO, &remote);
    let probe = MarkerProbe::new();

    let outcome = decide(
        &config,
        &forge,
        &probe,
        vec![edit(QUALITY_FILE, "tests=pass\nlint=crash\n", "Break the linter")],
    )
    .expect("decide");

    assert!(!outcome.accepted);
    assert!(approx(outcome.delta, (100.0 - 9999.0 - 97.0) / 97.0 * 100.0));
    let lint_log = config
        .artifacts_dir
        .join(repo().slug())
        .join("tools/candidate-1/lint.log");
    assert!(lint_log.exists());
}

#[test]
fn accepted_run_leaves_audit_trail_and_memory() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let remote = remote("tests=pass\nlint=10\n");
    let forge = LocalForge::new().with_remote(REPO, &remote);
    let probe = MarkerProbe::new();

    let outcome = decide(
        &config,
        &forge,
        &probe,
        vec![
            edit("a.txt", "a\n", "Nothing"),
            edit(QUALITY_FILE, "tests=pass\nlint=0\n", "Clean everything"),
        ],
    )
    .expect("decide");
    assert!(outcome.accepted);

    let repo_dir = config.artifacts_dir.join(repo().slug());
    let recorded: DecisionOutcome = serde_json::from_str(
        &fs::read_to_string(repo_dir.join(DECISION_FILE)).expect("decision"),
    )
    .expect("parse decision");
    assert_eq!(recorded.repository, REPO);
    assert!(recorded.accepted);
    assert!(approx(recorded.delta, outcome.delta));
    assert_eq!(recorded.published_reference, outcome.published_reference);
    assert_eq!(recorded.candidates_considered, 2);
    assert_eq!(recorded.candidates_rejected, 1);
    assert!(recorded.recorded_at.ends_with('Z'));

    for tag in ["before", "after"] {
        let snapshot = repo_dir.join("snapshots").join(tag);
        assert!(snapshot.join(MANIFEST_FILE).is_file(), "{tag} manifest");
        assert!(snapshot.join("app.py").is_file(), "{tag} app.py");
        assert!(!snapshot.join(".git").exists(), "{tag} .git");
    }
    assert!(repo_dir.join("tools/baseline/tests.log").is_file());
    assert!(repo_dir.join("tools/candidate-2/lint.log").is_file());

    let memories = MemoryStore::new(&config.memory.path)
        .records()
        .expect("records");
    assert_eq!(memories.len(), 1);
    assert!(memories[0].text.contains("Clean everything"));
    assert_eq!(memories[0].metadata.get("repo").map(String::as_str), Some(REPO));

    assert!(
        !config.work_dir.join(repo().slug()).exists(),
        "working copy must be released"
    );
}

#[test]
fn recalled_memories_reach_the_candidate_source() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    MemoryStore::new(&config.memory.path)
        .add("Accepted change on acme/widgets: earlier fix", Default::default())
        .expect("seed memory");
    let remote = remote("tests=pass\nlint=10\n");
    let forge = LocalForge::new().with_remote(REPO, &remote);
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

    let outcome = gate.process_repository(&repo()).expect("decide");

    assert!(!outcome.accepted);
    assert_eq!(outcome.candidates_considered, 0);
    let contexts = source.contexts();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].repository, REPO);
    assert_eq!(contexts[0].default_branch, "main");
    assert!(contexts[0].files.iter().any(|file| file == "app.py"));
    assert_eq!(
        contexts[0].memories,
        vec!["Accepted change on acme/widgets: earlier fix".to_string()]
    );
}

#[test]
fn badge_mutation_is_published_by_deterministic_table() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let remote = remote("tests=pass\nlint=0\npenalty=.editorconfig:10\n");
    let forge = LocalForge::new().with_remote(REPO, &remote);
    let probe = MarkerProbe::new();

    let outcome = decide(
        &config,
        &forge,
        &probe,
        vec![
            Proposal::Mutation(SafeMutation::Badge),
            Proposal::Mutation(SafeMutation::Editorconfig),
        ],
    )
    .expect("decide");

    assert!(outcome.accepted);
    assert_eq!(outcome.candidates_considered, 2);
    assert_eq!(outcome.candidates_rejected, 1);
    let (_, request) = &forge.pull_requests()[0];
    assert!(
        remote
            .read_file(&request.head, ".editorconfig")
            .expect("read")
            .is_some()
    );
    // The rejected badge edit did not ride along.
    assert_eq!(
        remote.read_file(&request.head, "README.md").expect("read"),
        Some("# widgets\n".to_string())
    );
}
