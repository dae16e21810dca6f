use std::path::Path;
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use taskboard_core::{
    Database, Emission, NoteKind, StoreConfig, StoreError, StoreResult, Task, TaskDraft,
};

fn backends(dir: &Path) -> Vec<(&'static str, Database)> {
    vec![
        (
            "sqlite_file",
            Database::open(&StoreConfig::sqlite_file(dir.join("taskboard.db"))).unwrap(),
        ),
        ("memory", Database::open(&StoreConfig::memory()).unwrap()),
    ]
}

fn recorder() -> (
    Arc<Mutex<Vec<Emission<Vec<Task>>>>>,
    impl FnMut(Emission<Vec<Task>>) + Send + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |emission| sink.lock().unwrap().push(emission))
}

#[test]
fn concurrent_writes_publish_two_ordered_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    for (name, db) in backends(dir.path()) {
        let (seen, callback) = recorder();
        let _sub = db.tasks().observe(callback);

        let barrier = Arc::new(Barrier::new(2));
        let handles = ["left", "right"]
            .into_iter()
            .map(|title| {
                let db = db.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    db.write(|| db.tasks().create(TaskDraft::new(title)))
                        .unwrap()
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3, "{name}");
        let sizes = seen
            .iter()
            .map(|emission| emission.as_ref().unwrap().len())
            .collect::<Vec<_>>();
        assert_eq!(sizes, vec![0, 1, 2], "{name}");
        assert_ne!(seen[1], seen[2], "{name}");
    }
}

#[test]
fn failing_write_rolls_back_and_emits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    for (name, db) in backends(dir.path()) {
        let (seen, callback) = recorder();
        let _sub = db.tasks().observe(callback);

        let result = db.write(|| -> StoreResult<()> {
            db.tasks().create(TaskDraft::new("doomed"))?;
            Err(StoreError::NotFound {
                table: taskboard_core::Table::Tasks,
                id: "missing".to_string(),
            })
        });

        assert!(matches!(result, Err(StoreError::NotFound { .. })), "{name}");
        assert!(db.tasks().fetch_all().unwrap().is_empty(), "{name}");
        assert_eq!(seen.lock().unwrap().len(), 1, "{name}");
    }
}

#[derive(Debug)]
enum AppError {
    Store(StoreError),
    Cancelled,
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

#[test]
fn caller_error_type_is_returned_unchanged() {
    let db = Database::open(&StoreConfig::memory()).unwrap();

    let result: Result<(), AppError> = db.write(|| {
        db.tasks().create(TaskDraft::new("a"))?;
        Err(AppError::Cancelled)
    });

    assert!(matches!(result, Err(AppError::Cancelled)));
    assert!(db.tasks().fetch_all().unwrap().is_empty());
}

#[test]
fn nested_write_joins_outer_transaction() {
    let dir = tempfile::tempdir().unwrap();
    for (name, db) in backends(dir.path()) {
        let (seen, callback) = recorder();
        let _sub = db.tasks().observe(callback);

        let (task, note) = db
            .write(|| -> StoreResult<_> {
                let task = db.tasks().create(TaskDraft::new("outer"))?;
                let note = task.add_note(&db, "inner", NoteKind::Note)?;
                assert!(db.in_write_context());
                Ok((task, note))
            })
            .unwrap();

        assert!(!db.in_write_context(), "{name}");
        assert_eq!(seen.lock().unwrap().len(), 2, "{name}");
        assert_eq!(note.task(&db).unwrap(), task, "{name}");
    }
}

#[test]
fn swallowed_nested_failure_aborts_outer_write() {
    let dir = tempfile::tempdir().unwrap();
    for (name, db) in backends(dir.path()) {
        let (seen, callback) = recorder();
        let _sub = db.tasks().observe(callback);

        let result = db.write(|| -> StoreResult<()> {
            db.tasks().create(TaskDraft::new("kept?"))?;
            let nested = db.write(|| -> StoreResult<()> {
                db.tasks().create(TaskDraft::new(""))?;
                Ok(())
            });
            assert!(matches!(nested, Err(StoreError::Validation(_))));
            Ok(())
        });

        assert!(
            matches!(result, Err(StoreError::TransactionAborted)),
            "{name}"
        );
        assert!(db.tasks().fetch_all().unwrap().is_empty(), "{name}");
        assert_eq!(seen.lock().unwrap().len(), 1, "{name}");
    }
}

#[test]
fn panicking_write_is_rolled_back() {
    let db = Database::open(&StoreConfig::memory()).unwrap();
    let panicking = db.clone();

    let outcome = thread::spawn(move || {
        let _ = panicking.write(|| -> StoreResult<()> {
            panicking.tasks().create(TaskDraft::new("lost"))?;
            panic!("writer crashed");
        });
    })
    .join();

    assert!(outcome.is_err());
    assert!(!db.in_write_context());
    assert!(db.tasks().fetch_all().unwrap().is_empty());
    db.write(|| db.tasks().create(TaskDraft::new("after"))).unwrap();
    assert_eq!(db.tasks().fetch_count().unwrap(), 1);
}

#[test]
fn observe_returns_while_another_thread_is_writing() {
    let dir = tempfile::tempdir().unwrap();
    for (name, db) in backends(dir.path()) {
        let (inside_tx, inside_rx) = mpsc::channel();
        let (go_tx, go_rx) = mpsc::channel::<()>();
        let writer_db = db.clone();
        let writer = thread::spawn(move || {
            writer_db
                .write(|| -> StoreResult<bool> {
                    inside_tx.send(()).unwrap();
                    let released = go_rx.recv_timeout(Duration::from_secs(5)).is_ok();
                    writer_db.tasks().create(TaskDraft::new("a"))?;
                    Ok(released)
                })
                .unwrap()
        });
        inside_rx.recv().unwrap();

        let (seen, callback) = recorder();
        let _sub = db.tasks().observe(callback);
        go_tx.send(()).unwrap();
        assert!(writer.join().unwrap(), "{name}");

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        thread::sleep(Duration::from_millis(50));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1, "{name}");
        assert_eq!(seen[0].as_ref().unwrap().len(), 1, "{name}");
    }
}
