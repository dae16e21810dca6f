use taskboard_core::{
    Database, NoteDraft, NoteKind, StoreConfig, StoreError, StoreResult, TaskDraft, Timestamp,
    TASK_COLOR_PALETTE,
};
use uuid::Uuid;

fn backends() -> Vec<(&'static str, Database)> {
    vec![
        (
            "sqlite",
            Database::open(&StoreConfig::sqlite_in_memory()).unwrap(),
        ),
        ("memory", Database::open(&StoreConfig::memory()).unwrap()),
    ]
}

#[test]
fn created_task_has_requested_properties() {
    for (name, db) in backends() {
        let before = Timestamp::now();
        let mut draft = TaskDraft::new("Widget");
        draft.color = TASK_COLOR_PALETTE[2].to_string();
        draft.priority = 0.5;

        let task = db.write(|| db.tasks().create(draft)).unwrap();
        let loaded = db.tasks().find(task.id()).unwrap();

        assert_eq!(loaded.title(), "Widget", "{name}");
        assert_eq!(loaded.color(), TASK_COLOR_PALETTE[2], "{name}");
        assert_eq!(loaded.priority(), 0.5, "{name}");
        assert!(!loaded.is_archived(), "{name}");
        assert_eq!(loaded.created_at(), loaded.updated_at(), "{name}");
        assert!(loaded.created_at() >= before, "{name}");
    }
}

#[test]
fn added_note_links_back_to_its_task() {
    for (name, db) in backends() {
        let task = db.write(|| db.tasks().create(TaskDraft::new("Widget"))).unwrap();

        let note = task.add_note(&db, "hello", NoteKind::Clip).unwrap();

        assert_eq!(note.content(), "hello", "{name}");
        assert_eq!(note.kind(), NoteKind::Clip, "{name}");
        assert_eq!(note.task_id(), task.id(), "{name}");
        assert_eq!(note.task(&db).unwrap(), task, "{name}");
        assert_eq!(task.notes(&db).fetch().unwrap(), vec![note], "{name}");
    }
}

#[test]
fn clip_metadata_persists() {
    for (name, db) in backends() {
        let task = db.write(|| db.tasks().create(TaskDraft::new("Reading"))).unwrap();
        let draft = NoteDraft::new("quoted text")
            .with_kind(NoteKind::Highlight)
            .with_page(
                "https://example.com/post",
                Some("Post".to_string()),
                Some("excerpt".to_string()),
            );

        let note = task.add_note_with(&db, draft).unwrap();
        let loaded = db.notes().find(note.id()).unwrap();

        assert_eq!(loaded.page_url(), Some("https://example.com/post"), "{name}");
        assert_eq!(loaded.page_title(), Some("Post"), "{name}");
        assert_eq!(loaded.excerpt(), Some("excerpt"), "{name}");
        assert_eq!(loaded.kind(), NoteKind::Highlight, "{name}");
    }
}

#[test]
fn update_outside_write_leaves_value_unchanged() {
    for (name, db) in backends() {
        let task = db.write(|| db.tasks().create(TaskDraft::new("Widget"))).unwrap();

        let err = db
            .tasks()
            .update(&task, |draft| draft.title = "Renamed".to_string())
            .unwrap_err();

        assert!(matches!(err, StoreError::NotInWriteContext), "{name}");
        assert_eq!(db.tasks().find(task.id()).unwrap().title(), "Widget", "{name}");
    }
}

#[test]
fn update_keeps_identity_and_advances_updated_at() {
    for (name, db) in backends() {
        let task = db.write(|| db.tasks().create(TaskDraft::new("Widget"))).unwrap();

        let updated = db
            .write(|| {
                db.tasks().update(&task, |draft| {
                    draft.is_archived = true;
                    draft.priority = 1.0;
                })
            })
            .unwrap();

        assert_eq!(updated.id(), task.id(), "{name}");
        assert_eq!(updated.created_at(), task.created_at(), "{name}");
        assert!(updated.updated_at() >= task.updated_at(), "{name}");
        assert_eq!(db.tasks().find(task.id()).unwrap(), updated, "{name}");
    }
}

#[test]
fn invalid_draft_is_rejected_without_writing() {
    for (name, db) in backends() {
        let mut draft = TaskDraft::new("Widget");
        draft.color = "red".to_string();

        let err = db.write(|| db.tasks().create(draft)).unwrap_err();

        assert!(matches!(err, StoreError::Validation(_)), "{name}");
        assert!(db.tasks().fetch_all().unwrap().is_empty(), "{name}");
    }
}

#[test]
fn find_unknown_id_is_not_found() {
    for (name, db) in backends() {
        let err = db.tasks().find(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }), "{name}");
    }
}

#[test]
fn note_on_unsaved_task_fails_and_writes_nothing() {
    for (name, db) in backends() {
        let owner = db.write(|| db.tasks().create(TaskDraft::new("owner"))).unwrap();
        let other_db = Database::open(&StoreConfig::memory()).unwrap();

        let err = owner.add_note(&other_db, "orphan", NoteKind::Note).unwrap_err();

        assert!(matches!(err, StoreError::NotFound { .. }), "{name}");
        assert!(other_db.notes().fetch_all().unwrap().is_empty(), "{name}");
    }
}

#[test]
fn records_are_returned_in_insertion_order() {
    for (name, db) in backends() {
        let titles = ["c", "a", "b"];
        db.write(|| -> StoreResult<()> {
            for title in titles {
                db.tasks().create(TaskDraft::new(title))?;
            }
            Ok(())
        })
        .unwrap();

        let loaded = db.tasks().fetch_all().unwrap();
        let loaded_titles = loaded.iter().map(|task| task.title()).collect::<Vec<_>>();
        assert_eq!(loaded_titles, titles, "{name}");
    }
}
