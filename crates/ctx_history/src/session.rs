//! Session: the shared services every fragment, context and history of one
//! project works against.

use crate::config::Config;
use crate::content_id::{FragmentId, FragmentIdCounter};
use crate::executor::WorkerPool;
use crate::project::{Analyzer, GitProvider, LocalFileSystem, NoGit, NullAnalyzer, ProjectFile, ProjectFileSystem};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Collaborators a fragment needs to compute its snapshot.
pub(crate) struct Services {
    pub(crate) root: PathBuf,
    pub(crate) fs: Arc<dyn ProjectFileSystem>,
    pub(crate) analyzer: Arc<dyn Analyzer>,
    pub(crate) git: Arc<dyn GitProvider>,
}

struct SessionInner {
    services: Arc<Services>,
    ids: FragmentIdCounter,
    pool: WorkerPool,
    config: Config,
}

/// Cheaply clonable handle to a project's services.
///
/// A session owns the fragment id counter, so ids are unique per session
/// rather than per process.
///
/// # Examples
///
/// ```
/// use ctx_history::Session;
/// use tempfile::TempDir;
///
/// let tmp = TempDir::new().unwrap();
/// let session = Session::new(tmp.path());
/// let a = session.next_fragment_id();
/// let b = session.next_fragment_id();
/// assert_ne!(a, b);
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// A session over the local disk with no analyzer and no git.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::builder(root).build()
    }

    pub fn builder(root: impl Into<PathBuf>) -> SessionBuilder {
        SessionBuilder {
            root: root.into(),
            fs: Arc::new(LocalFileSystem),
            analyzer: Arc::new(NullAnalyzer),
            git: Arc::new(NoGit),
            config: Config::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.services.root
    }

    /// A project file under this session's root.
    pub fn file(&self, rel_path: impl AsRef<Path>) -> ProjectFile {
        ProjectFile::new(self.root().to_path_buf(), rel_path)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    pub fn fs(&self) -> &Arc<dyn ProjectFileSystem> {
        &self.inner.services.fs
    }

    pub fn analyzer(&self) -> &Arc<dyn Analyzer> {
        &self.inner.services.analyzer
    }

    pub fn git(&self) -> &Arc<dyn GitProvider> {
        &self.inner.services.git
    }

    pub(crate) fn services(&self) -> &Arc<Services> {
        &self.inner.services
    }

    pub fn id_counter(&self) -> &FragmentIdCounter {
        &self.inner.ids
    }

    pub fn next_fragment_id(&self) -> FragmentId {
        self.inner.ids.next_id()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("root", &self.root())
            .field("next_id", &self.inner.ids.peek())
            .field("pool", &self.inner.pool)
            .finish()
    }
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    root: PathBuf,
    fs: Arc<dyn ProjectFileSystem>,
    analyzer: Arc<dyn Analyzer>,
    git: Arc<dyn GitProvider>,
    config: Config,
}

impl SessionBuilder {
    pub fn file_system(mut self, fs: impl ProjectFileSystem + 'static) -> Self {
        self.fs = Arc::new(fs);
        self
    }

    pub fn analyzer(mut self, analyzer: impl Analyzer + 'static) -> Self {
        self.analyzer = Arc::new(analyzer);
        self
    }

    pub fn git(mut self, git: impl GitProvider + 'static) -> Self {
        self.git = Arc::new(git);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Session {
        let pool = WorkerPool::new("ctx-worker", self.config.workers.threads);
        Session {
            inner: Arc::new(SessionInner {
                services: Arc::new(Services {
                    root: self.root,
                    fs: self.fs,
                    analyzer: self.analyzer,
                    git: self.git,
                }),
                ids: FragmentIdCounter::new(),
                pool,
                config: self.config,
            }),
        }
    }
}
