// rollout_flow.rs — End-to-end: a push raises the license-header ideal and
// the upgrade is offered to, and accepted by, the lagging repositories.
//
//   1. Five repositories checked out on disk, ideal seeded at Apache-1.0
//   2. acme/pushed pushes Apache-2.0 to its default branch
//   3. The resolver plans the push; the plan includes push-impact
//   4. The push-impact reaction raises the ideal and sweeps the fleet
//   5. The fingerprint goal records the pushed repository's observation
//   6. The first offer's button is pressed → LICENSE rewritten in that repo
//   7. A second identical push changes nothing
//
// VERIFY:
//   - The stored ideal is Apache-2.0
//   - Exactly one offer per lagging repository, none elsewhere
//   - Events and outbox written as JSONL
//   - The accepted repository now carries Apache-2.0

use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;

use sdm_feature::message::SentMessage;
use sdm_feature::{
    Collaborators, ComparisonPolicy, Feature, FeatureStore, Features, FingerprintRecord,
    JsonFileStore, LogMessageClient, RolloutDecision, StoreFeatureStore, WellKnownGoals,
};
use sdm_goal::contribution::{on_any_push, when_push_satisfies};
use sdm_goal::push_test::to_default_branch;
use sdm_goal::{
    Commit, DeploymentStatusManager, EventDispatcher, Goal, GoalContributionResolver, GoalSet,
    LoadMode, LocalProjectLoader, LogSink, Project, ProjectLoader, Push, RepoRef,
};

fn license(text: &str) -> FingerprintRecord {
    FingerprintRecord::new("license-header", "1.0", json!({ "text": text }))
}

fn apache_version(record: &FingerprintRecord) -> Option<f64> {
    record
        .field("text")?
        .strip_prefix("Apache-")?
        .parse()
        .ok()
}

fn license_header() -> Feature {
    Feature::builder("license-header", "1.0", |project: &dyn Project| {
        Ok(project
            .read_file("LICENSE")?
            .map(|text| license(text.trim())))
    })
    .ideal(license("Apache-1.0"))
    .comparison(ComparisonPolicy::Quality, |baseline, candidate| {
        match (apache_version(baseline), apache_version(candidate)) {
            (Some(b), Some(c)) => c.partial_cmp(&b).unwrap_or(Ordering::Equal),
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (None, None) => Ordering::Equal,
        }
    })
    .summary(|record| record.field("text").unwrap_or("unknown").to_string())
    .transform(|project, ideal| {
        let text = ideal.field("text").unwrap_or_default();
        project.write_file("LICENSE", &format!("{}\n", text))?;
        Ok(())
    })
    .build()
    .unwrap()
}

fn checkout(root: &Path, repo: &str, files: &[(&str, &str)]) {
    let dir = root.join("acme").join(repo);
    fs::create_dir_all(&dir).unwrap();
    for (path, content) in files {
        fs::write(dir.join(path), content).unwrap();
    }
}

fn read_outbox(path: &Path) -> Vec<SentMessage> {
    match fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[test]
fn license_header_upgrade_rolls_out_to_lagging_repos() {
    // =========================================================
    // SETUP
    // =========================================================
    let repos = tempdir().unwrap();
    let state = tempdir().unwrap();

    checkout(repos.path(), "pushed", &[("LICENSE", "Apache-2.0\n")]);
    checkout(repos.path(), "old-a", &[("LICENSE", "Apache-1.0\n")]);
    checkout(repos.path(), "old-b", &[("LICENSE", "Apache-1.0\n"), ("README.md", "b")]);
    checkout(repos.path(), "current", &[("LICENSE", "Apache-2.0\n")]);
    checkout(repos.path(), "unlicensed", &[("README.md", "none")]);

    let loader = LocalProjectLoader::new(repos.path(), "https://github.com");
    let backing = Arc::new(JsonFileStore::new(state.path().join("store")).unwrap());
    let store = Arc::new(StoreFeatureStore::create(backing, [license("Apache-1.0")]).unwrap());
    let features = Features::new(store.clone(), vec![license_header()]).unwrap();

    let outbox = state.path().join("outbox.jsonl");
    let events_log = state.path().join("events.jsonl");
    let messages = LogMessageClient::with_outbox(&outbox);
    let events = EventDispatcher::new().with_sink(Box::new(LogSink::new(&events_log)));
    let with = Collaborators {
        loader: &loader,
        finder: &loader,
        messages: &messages,
        events: &events,
    };

    let registrations = features.enable(&WellKnownGoals {
        inspect: Some(Goal::code_inspection()),
        push_impact: Some(Goal::push_impact()),
    });
    assert!(registrations.iter().any(|r| r.name() == "tr-license-header"));

    let resolver = GoalContributionResolver::new(vec![
        on_any_push().set_goals(
            GoalSet::new("Checks").plan([Goal::code_inspection(), Goal::push_impact(), Goal::fingerprint()]),
        ),
        when_push_satisfies(vec![to_default_branch()])
            .set_goals(GoalSet::new("Build").plan([Goal::build()]).after("Checks")),
    ]);
    let deployments = DeploymentStatusManager::new();

    // =========================================================
    // PUSH: acme/pushed moves to Apache-2.0
    // =========================================================
    let pushed_ref = RepoRef::github("acme", "pushed");
    let push = Push::new(
        pushed_ref.clone(),
        "main",
        vec![Commit::new("abc123", "Relicense under Apache-2.0")],
    );
    let pushed = loader.load(&pushed_ref, LoadMode::ReadOnly).unwrap();
    let ctx = sdm_goal::PushContext::new(&push, pushed.as_ref(), &deployments);

    let resolution = resolver.resolve(&ctx).unwrap();
    let plan = resolution.plan().expect("push should be planned");
    assert_eq!(plan.keys(), vec!["code-inspection", "push-impact", "fingerprint", "build"]);

    let results = features.on_push(&ctx, &with);
    assert_eq!(results.len(), 1);
    let decision = results[0].result.as_ref().unwrap();
    let RolloutDecision::IdealRaised(outcome) = decision else {
        panic!("expected the ideal to be raised, got {:?}", decision);
    };
    assert_eq!(outcome.previous.field("text"), Some("Apache-1.0"));
    assert_eq!(outcome.ideal.field("text"), Some("Apache-2.0"));
    assert!(outcome.failures.is_empty());

    let observations = features.record_observations(&ctx);
    assert!(observations[0].result.as_ref().unwrap().is_some());

    // =========================================================
    // VERIFY: store, outbox, events
    // =========================================================
    let ideal = store.ideal("license-header").unwrap().unwrap();
    assert_eq!(ideal.field("text"), Some("Apache-2.0"));
    assert_eq!(
        store.last_observed(&pushed_ref, "license-header").unwrap(),
        Some(ideal.clone())
    );

    let sent = read_outbox(&outbox);
    let channels: Vec<&str> = sent.iter().map(|s| s.channel.as_str()).collect();
    assert_eq!(channels, vec!["old-a", "old-b"]);
    assert_eq!(
        sent[0].message.attachments[0].text,
        "Accept new feature license-header: Apache-2.0?"
    );

    let events_written = fs::read_to_string(&events_log).unwrap();
    assert_eq!(events_written.matches("\"ideal_raised\"").count(), 1);
    assert_eq!(events_written.matches("\"rollout_offered\"").count(), 2);

    // =========================================================
    // ACCEPT: press the button sent to acme/old-a
    // =========================================================
    let button = sent[0].message.actions().next().unwrap();
    let applied = features.accept_action(button, &loader, &loader).unwrap();
    assert_eq!(applied.field("text"), Some("Apache-2.0"));
    assert_eq!(
        fs::read_to_string(repos.path().join("acme/old-a/LICENSE")).unwrap(),
        "Apache-2.0\n"
    );
    assert_eq!(
        fs::read_to_string(repos.path().join("acme/old-b/LICENSE")).unwrap(),
        "Apache-1.0\n"
    );

    // =========================================================
    // SECOND PUSH: nothing beats the ideal any more
    // =========================================================
    let results = features.on_push(&ctx, &with);
    assert!(matches!(
        results[0].result.as_ref().unwrap(),
        RolloutDecision::NotBetter { .. }
    ));
    assert_eq!(read_outbox(&outbox).len(), 2);
}
