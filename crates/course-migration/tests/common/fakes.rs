//! In-memory stand-ins for the host platform.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use course_migration::collaborators::{
    AccessPolicy, BackupArtifact, BackupOptions, CatalogError, ContentPackager, CourseCatalog,
    PackagerError,
};
use course_migration::remote::{NotifyError, RestoreNotifier};
use course_migration::worker::{Task, TaskDispatcher};
use course_migration::WorkerError;

#[derive(Debug, Clone, PartialEq)]
pub struct FakeCourse {
    pub name: String,
    pub category_id: i64,
    pub visible: bool,
}

#[derive(Default)]
struct CatalogState {
    courses: HashMap<i64, FakeCourse>,
    categories: HashSet<i64>,
    next_id: i64,
    undeletable: HashSet<i64>,
}

/// Course catalog backed by a map. New course ids start at 1000.
pub struct FakeCatalog {
    state: Mutex<CatalogState>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CatalogState {
                next_id: 1000,
                ..CatalogState::default()
            }),
        }
    }

    pub fn add_category(&self, category_id: i64) {
        self.state.lock().unwrap().categories.insert(category_id);
    }

    pub fn add_course(&self, course_id: i64, name: &str, category_id: i64) {
        let mut state = self.state.lock().unwrap();
        state.categories.insert(category_id);
        state.courses.insert(
            course_id,
            FakeCourse {
                name: name.to_string(),
                category_id,
                visible: true,
            },
        );
    }

    pub fn course(&self, course_id: i64) -> Option<FakeCourse> {
        self.state.lock().unwrap().courses.get(&course_id).cloned()
    }

    /// Makes `delete_course` fail for `course_id` until cleared.
    pub fn set_undeletable(&self, course_id: i64, undeletable: bool) {
        let mut state = self.state.lock().unwrap();
        if undeletable {
            state.undeletable.insert(course_id);
        } else {
            state.undeletable.remove(&course_id);
        }
    }
}

impl CourseCatalog for FakeCatalog {
    fn course_exists(&self, course_id: i64) -> bool {
        self.state.lock().unwrap().courses.contains_key(&course_id)
    }

    fn course_name(&self, course_id: i64) -> Option<String> {
        self.course(course_id).map(|c| c.name)
    }

    fn category_exists(&self, category_id: i64) -> bool {
        self.state.lock().unwrap().categories.contains(&category_id)
    }

    fn create_course(&self, category_id: i64, fullname: &str, _shortname: &str) -> Result<i64, CatalogError> {
        let mut state = self.state.lock().unwrap();
        if !state.categories.contains(&category_id) {
            return Err(CatalogError::CategoryNotFound(category_id));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.courses.insert(
            id,
            FakeCourse {
                name: fullname.to_string(),
                category_id,
                visible: true,
            },
        );
        Ok(id)
    }

    fn delete_course(&self, course_id: i64) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        if state.undeletable.contains(&course_id) {
            return Err(CatalogError::Failed(format!("course {} is locked", course_id)));
        }
        state
            .courses
            .remove(&course_id)
            .map(|_| ())
            .ok_or(CatalogError::CourseNotFound(course_id))
    }

    fn set_course_visible(&self, course_id: i64, visible: bool) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        let course = state
            .courses
            .get_mut(&course_id)
            .ok_or(CatalogError::CourseNotFound(course_id))?;
        course.visible = visible;
        Ok(())
    }
}

/// Packager writing small text archives into `work_dir`.
pub struct FakePackager {
    work_dir: PathBuf,
    pub fail_restore: AtomicBool,
    pub fail_backup: AtomicBool,
    pub panic_backup: AtomicBool,
    /// Time each backup takes.
    pub backup_delay: Mutex<Duration>,
    /// Courses whose archive is reported but never written.
    pub unwritten: Mutex<HashSet<i64>>,
    pub backups: Mutex<Vec<(i64, BackupOptions)>>,
    pub restores: Mutex<Vec<(i64, String)>>,
}

impl FakePackager {
    pub fn new(work_dir: PathBuf) -> Self {
        std::fs::create_dir_all(&work_dir).expect("Failed to create packager dir");
        Self {
            work_dir,
            fail_restore: AtomicBool::new(false),
            fail_backup: AtomicBool::new(false),
            panic_backup: AtomicBool::new(false),
            backup_delay: Mutex::new(Duration::ZERO),
            unwritten: Mutex::new(HashSet::new()),
            backups: Mutex::new(Vec::new()),
            restores: Mutex::new(Vec::new()),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}

impl ContentPackager for FakePackager {
    fn create_backup(&self, course_id: i64, options: BackupOptions) -> Result<BackupArtifact, PackagerError> {
        if self.panic_backup.load(Ordering::SeqCst) {
            panic!("backup controller crashed");
        }
        if self.fail_backup.load(Ordering::SeqCst) {
            return Err(PackagerError::new("Backup controller failed"));
        }
        let delay = *self.backup_delay.lock().unwrap();
        std::thread::sleep(delay);

        let default_name = format!("backup-course-{}.mbz", course_id);
        let path = self.work_dir.join(&default_name);
        if !self.unwritten.lock().unwrap().contains(&course_id) {
            std::fs::write(&path, format!("course {}", course_id))
                .map_err(|e| PackagerError::new(e.to_string()))?;
        }
        self.backups.lock().unwrap().push((course_id, options));
        Ok(BackupArtifact { path, default_name })
    }

    fn extract(&self, archive: &Path, destination: &Path) -> Result<(), PackagerError> {
        let content = std::fs::read_to_string(archive).map_err(|e| PackagerError::new(e.to_string()))?;
        std::fs::write(destination.join("course.txt"), content)
            .map_err(|e| PackagerError::new(e.to_string()))
    }

    fn restore(&self, extracted: &Path, course_id: i64) -> Result<(), PackagerError> {
        if self.fail_restore.load(Ordering::SeqCst) {
            return Err(PackagerError::new("Restore controller failed"));
        }
        let content = std::fs::read_to_string(extracted.join("course.txt"))
            .map_err(|e| PackagerError::new(e.to_string()))?;
        self.restores.lock().unwrap().push((course_id, content));
        Ok(())
    }
}

/// Notifier recording every request; fails with `failure` when set.
#[derive(Default)]
pub struct FakeNotifier {
    pub requests: Mutex<Vec<(String, Option<i64>)>>,
    pub failure: Mutex<Option<String>>,
}

impl FakeNotifier {
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }
}

impl RestoreNotifier for FakeNotifier {
    fn request_restore(&self, filename: &str, category_id: Option<i64>) -> Result<(), NotifyError> {
        self.requests
            .lock()
            .unwrap()
            .push((filename.to_string(), category_id));
        match self.failure.lock().unwrap().clone() {
            Some(message) => Err(NotifyError::Exception(message)),
            None => Ok(()),
        }
    }
}

/// Dispatcher that only records tasks.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub tasks: Mutex<Vec<Task>>,
}

impl RecordingDispatcher {
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().clone()
    }
}

impl TaskDispatcher for RecordingDispatcher {
    fn dispatch(&self, task: Task) -> Result<(), WorkerError> {
        self.tasks.lock().unwrap().push(task);
        Ok(())
    }
}

pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn has_capability(&self, _actor: i64, _capability: &str, _category_id: i64) -> bool {
        true
    }
}
