use nexus_engine::{
    BuildConfig, BuildError, BuildReporter, BuildResult, BuildSession, BuildTrigger, HotUpdate,
    HotUpdateTransport, LoaderRule, Matcher, MemoryFileStore, SchedulerState, TransformInput,
    TransformOutput, WatchScheduler,
};
use parking_lot::{Condvar, Mutex};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug)]
enum Event {
    Started(BuildTrigger),
    Finished,
    Failed(String),
    Superseded,
}

struct Recorder(mpsc::UnboundedSender<Event>);

impl BuildReporter for Recorder {
    fn on_build_started(&self, trigger: &BuildTrigger) {
        let _ = self.0.send(Event::Started(trigger.clone()));
    }

    fn on_build_finished(&self, _result: &BuildResult) {
        let _ = self.0.send(Event::Finished);
    }

    fn on_build_failed(&self, error: &BuildError) {
        let _ = self.0.send(Event::Failed(error.to_string()));
    }

    fn on_build_superseded(&self, _pending: usize) {
        let _ = self.0.send(Event::Superseded);
    }
}

struct Updates(mpsc::UnboundedSender<Vec<HotUpdate>>);

impl HotUpdateTransport for Updates {
    fn push(&self, updates: &[HotUpdate]) {
        let _ = self.0.send(updates.to_vec());
    }
}

/// Blocks transforms while closed.
#[derive(Default)]
struct Gate {
    closed: Mutex<bool>,
    opened: Condvar,
}

impl Gate {
    fn close(&self) {
        *self.closed.lock() = true;
    }

    fn open(&self) {
        *self.closed.lock() = false;
        self.opened.notify_all();
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    fn pass(&self) {
        let mut closed = self.closed.lock();
        while *closed {
            self.opened.wait(&mut closed);
        }
    }
}

fn app() -> Arc<MemoryFileStore> {
    Arc::new(MemoryFileStore::with_files([
        ("/app/src/index.js", "import value from './util';\nconsole.log(value);\n"),
        ("/app/src/util.js", "export default 'v0';\n"),
    ]))
}

fn config() -> BuildConfig {
    BuildConfig::development("/app").entry("main", "./src/index.js")
}

fn util() -> PathBuf {
    PathBuf::from("/app/src/util.js")
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for the scheduler")
        .expect("channel closed")
}

struct Harness {
    events: mpsc::UnboundedReceiver<Event>,
    updates: mpsc::UnboundedReceiver<Vec<HotUpdate>>,
}

fn spawn(session: BuildSession) -> (nexus_engine::SchedulerHandle, tokio::task::JoinHandle<BuildSession>, Harness) {
    let (events_tx, events) = mpsc::unbounded_channel();
    let (updates_tx, updates) = mpsc::unbounded_channel();
    let (handle, task) = WatchScheduler::new(
        session,
        Arc::new(Updates(updates_tx)),
        Arc::new(Recorder(events_tx)),
    )
    .spawn();
    (handle, task, Harness { events, updates })
}

#[tokio::test]
async fn test_update_renders_changed_modules() {
    let store = app();
    let mut session = BuildSession::new(config(), store.clone());
    session.build().await.unwrap();

    store.write("/app/src/util.js", "export default 'v1';\n");
    let (_, updates) = session.update(&[util()]).await.unwrap();

    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].module_id, "/src/util.js");
    assert!(updates[0].code.starts_with("__nexus_register__(\"/src/util.js\", {}, function"));
    assert!(updates[0].code.contains("'v1'"));
    // Already delivered.
    assert!(session.take_hot_updates().is_empty());
}

#[tokio::test]
async fn test_watch_pushes_hot_update() {
    let store = app();
    let (handle, task, mut harness) = spawn(BuildSession::new(config(), store.clone()));

    assert!(matches!(next(&mut harness.events).await, Event::Started(BuildTrigger::Initial)));
    assert!(matches!(next(&mut harness.events).await, Event::Finished));
    assert!(handle.wait_for(SchedulerState::Watching).await);

    let _guard = handle.watch(&*store, &[PathBuf::from("/app/src")]).unwrap();
    store.write("/app/src/util.js", "export default 'v1';\n");

    match next(&mut harness.events).await {
        Event::Started(BuildTrigger::Changes(paths)) => assert_eq!(paths, vec![util()]),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(next(&mut harness.events).await, Event::Finished));
    let updates = next(&mut harness.updates).await;
    assert_eq!(updates.len(), 1);
    assert!(updates[0].code.contains("'v1'"));

    handle.stop();
    let session = task.await.unwrap();
    assert_eq!(handle.state(), SchedulerState::Stopped);
    assert_eq!(session.graph().len(), 2);
}

#[tokio::test]
async fn test_changes_during_a_build_are_coalesced() {
    let store = app();
    let gate = Arc::new(Gate::default());
    let (entered_tx, mut entered) = mpsc::unbounded_channel();

    let gated = {
        let gate = gate.clone();
        LoaderRule::new(
            "gate",
            Matcher::suffix(["util.js"]),
            move |input: &TransformInput<'_>| -> anyhow::Result<TransformOutput> {
                if gate.is_closed() {
                    let _ = entered_tx.send(());
                }
                gate.pass();
                Ok(TransformOutput::code(input.code))
            },
        )
    };
    let mut config = config();
    config.rules.insert(0, gated);
    let (handle, task, mut harness) = spawn(BuildSession::new(config, store.clone()));

    assert!(matches!(next(&mut harness.events).await, Event::Started(BuildTrigger::Initial)));
    assert!(matches!(next(&mut harness.events).await, Event::Finished));

    gate.close();
    store.write("/app/src/util.js", "export default 'v1';\n");
    handle.notify(vec![util()]);
    next(&mut entered).await;

    // The first rebuild is stuck in the transform; queue more changes.
    for version in 2..=4 {
        store.write("/app/src/util.js", format!("export default 'v{version}';\n"));
        assert!(handle.notify(vec![util()]));
    }
    gate.open();

    // Each start gets exactly one closing event.
    assert!(matches!(next(&mut harness.events).await, Event::Started(BuildTrigger::Changes(_))));
    assert!(matches!(next(&mut harness.events).await, Event::Superseded));
    assert!(matches!(next(&mut harness.events).await, Event::Started(BuildTrigger::Changes(_))));
    assert!(matches!(next(&mut harness.events).await, Event::Finished));

    let updates = next(&mut harness.updates).await;
    assert_eq!(updates.len(), 1);
    assert!(updates[0].code.contains("'v4'"));

    handle.stop();
    task.await.unwrap();
    assert!(harness.events.try_recv().is_err(), "no further builds expected");
    assert!(harness.updates.try_recv().is_err(), "superseded result must not be pushed");
}

#[tokio::test]
async fn test_failed_rebuild_keeps_watching() {
    let store = app();
    let (handle, task, mut harness) = spawn(BuildSession::new(config(), store.clone()));
    next(&mut harness.events).await;
    next(&mut harness.events).await;

    store.write("/app/src/util.js", "export default (;\n");
    handle.notify(vec![util()]);
    assert!(matches!(next(&mut harness.events).await, Event::Started(_)));
    match next(&mut harness.events).await {
        Event::Failed(message) => assert!(message.contains("/app/src/util.js"), "{message}"),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(handle.wait_for(SchedulerState::Watching).await);

    store.write("/app/src/util.js", "export default 'fixed';\n");
    handle.notify(vec![util()]);
    assert!(matches!(next(&mut harness.events).await, Event::Started(_)));
    assert!(matches!(next(&mut harness.events).await, Event::Finished));
    let updates = next(&mut harness.updates).await;
    assert!(updates[0].code.contains("'fixed'"));

    handle.stop();
    task.await.unwrap();
}

#[tokio::test]
async fn test_failed_initial_build_recovers() {
    let store = Arc::new(MemoryFileStore::with_files([(
        "/app/src/index.js",
        "import value from './util';\nconsole.log(value);\n",
    )]));
    let (handle, task, mut harness) = spawn(BuildSession::new(config(), store.clone()));

    assert!(matches!(next(&mut harness.events).await, Event::Started(BuildTrigger::Initial)));
    match next(&mut harness.events).await {
        Event::Failed(message) => assert!(message.contains("cannot resolve './util'"), "{message}"),
        other => panic!("unexpected event: {other:?}"),
    }

    store.write("/app/src/util.js", "export default 'late';\n");
    handle.notify(vec![util()]);
    assert!(matches!(next(&mut harness.events).await, Event::Started(_)));
    assert!(matches!(next(&mut harness.events).await, Event::Finished));

    handle.stop();
    let session = task.await.unwrap();
    assert_eq!(session.graph().len(), 2);
}

#[tokio::test]
async fn test_stop_while_idle() {
    let (handle, task, mut harness) = spawn(BuildSession::new(config(), app()));
    next(&mut harness.events).await;
    next(&mut harness.events).await;

    handle.stop();
    task.await.unwrap();
    assert_eq!(handle.state(), SchedulerState::Stopped);
    assert!(!handle.wait_for(SchedulerState::Watching).await);
    assert!(!handle.notify(vec![util()]), "scheduler no longer accepts events");
}
