use plansmith_agent::PlanOrchestrator;
use plansmith_observe::Observer;
use plansmith_store::ChangeCheckpointStore;
use plansmith_testkit::{RecordingRunner, TestWorkspace};

fn orchestrator(workspace: &TestWorkspace, stage_writes: bool) -> PlanOrchestrator {
    PlanOrchestrator::new(
        workspace
            .executor(RecordingRunner::succeeding())
            .with_stage_writes(stage_writes),
        ChangeCheckpointStore::new(workspace.path()),
        Observer::new(workspace.path()).expect("observer"),
    )
}

fn counter_response(value: u32) -> String {
    format!("### counter.txt\n```text\nx={value}\n```\n")
}

#[test]
fn revert_walks_back_through_sequential_edits() {
    let workspace = TestWorkspace::with_files("myproj", &[("counter.txt", "x=0\n")]).expect("ws");
    let mut agent = orchestrator(&workspace, false);
    for value in 1..=3 {
        agent.execute_plan(counter_response(value)).expect("plan");
    }
    assert_eq!(workspace.read("counter.txt").as_deref(), Some("x=3\n"));
    assert_eq!(agent.history().len(), 3);

    assert!(!agent.revert_to_checkpoint(4).expect("revert"));
    assert!(!agent.revert_to_checkpoint(-1).expect("revert"));
    assert_eq!(workspace.read("counter.txt").as_deref(), Some("x=3\n"));

    assert!(agent.revert_to_checkpoint(1).expect("revert"));
    assert_eq!(workspace.read("counter.txt").as_deref(), Some("x=1\n"));
    assert_eq!(agent.current_checkpoint(), 1);
    assert_eq!(agent.history().len(), 3);

    assert!(agent.revert_to_checkpoint(0).expect("revert"));
    assert_eq!(workspace.read("counter.txt").as_deref(), Some("x=0\n"));
}

#[test]
fn redo_replays_what_a_revert_undid() {
    let workspace = TestWorkspace::new("myproj").expect("workspace");
    let mut agent = orchestrator(&workspace, false);
    agent
        .execute_plan("### a.txt\n```\na1\n```\n### b.txt\n```\nb1\n```\n")
        .expect("plan");
    agent.execute_plan("### a.txt\n```\na2\n```\n").expect("plan");

    let restored = agent.revert(0).expect("revert").expect("in range");
    assert_eq!(restored, vec!["a.txt", "b.txt"]);
    assert!(!workspace.exists("a.txt"));
    assert!(!workspace.exists("b.txt"));

    let replayed = agent.redo(3).expect("redo").expect("in range");
    assert_eq!(replayed, vec!["a.txt", "b.txt"]);
    assert_eq!(workspace.read("a.txt").as_deref(), Some("a2\n"));
    assert_eq!(workspace.read("b.txt").as_deref(), Some("b1\n"));
    assert_eq!(agent.current_checkpoint(), 3);
}

#[test]
fn staged_suggestion_can_be_accepted_then_rejected() {
    let workspace =
        TestWorkspace::with_files("myproj", &[("app.js", "let v = 1;\n")]).expect("ws");
    let mut agent = orchestrator(&workspace, true);
    let outcome = agent
        .execute_plan("### app.js\n```js\nlet v = 2;\n```\n")
        .expect("plan");
    assert_eq!(outcome.written, vec!["app.js"]);
    assert_eq!(outcome.reports[0].result.output["staged"], true);
    assert_eq!(workspace.read("app.js").as_deref(), Some("let v = 1;\n"));

    assert!(agent.accept("app.js").expect("accept"));
    assert_eq!(workspace.read("app.js").as_deref(), Some("let v = 2;\n"));

    assert!(agent.reject("app.js").expect("reject"));
    assert_eq!(workspace.read("app.js").as_deref(), Some("let v = 1;\n"));

    assert!(!agent.accept("other.js").expect("accept"));
    assert!(!agent.reject("other.js").expect("reject"));
}

#[test]
fn most_recent_record_is_used_for_accept_and_reject() {
    let workspace = TestWorkspace::new("myproj").expect("workspace");
    let mut agent = orchestrator(&workspace, false);
    agent.execute_plan("### f.txt\n```\none\n```\n").expect("plan");
    agent.execute_plan("### f.txt\n```\ntwo\n```\n").expect("plan");

    assert!(agent.reject("f.txt").expect("reject"));
    assert_eq!(workspace.read("f.txt").as_deref(), Some("one\n"));
    assert!(agent.accept("f.txt").expect("accept"));
    assert_eq!(workspace.read("f.txt").as_deref(), Some("two\n"));
}

#[test]
fn persisted_history_survives_a_new_orchestrator() {
    let workspace = TestWorkspace::new("myproj").expect("workspace");
    {
        let mut agent = orchestrator(&workspace, false).with_persist_history(true);
        agent.execute_plan("### a.txt\n```\nfirst\n```\n").expect("plan");
    }
    let store = ChangeCheckpointStore::load(workspace.path()).expect("load");
    assert_eq!(store.len(), 1);
    assert_eq!(store.current_checkpoint(), 1);

    let mut agent = PlanOrchestrator::new(
        workspace.executor(RecordingRunner::succeeding()),
        store,
        Observer::new(workspace.path()).expect("observer"),
    );
    assert!(agent.revert_to_checkpoint(0).expect("revert"));
    assert!(!workspace.exists("a.txt"));
}
