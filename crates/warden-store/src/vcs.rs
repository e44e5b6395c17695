use git2::build::CheckoutBuilder;
use git2::{ErrorCode, Repository, Signature};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};
use warden_core::{WardenError, WardenResult};

/// A created version-control marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagHandle {
    /// Tag name.
    pub name: String,
    /// Commit the tag points at.
    pub target: String,
}

/// The version-control collaborator consumed by the checkpoint store.
///
/// Calls are blocking and short. Callers that mutate the working tree must
/// hold the checkpoint store's working-tree lock.
pub trait VersionControl: Send + Sync {
    /// Creates tag `name` on the current HEAD. Fails if it already exists.
    fn tag(&self, name: &str, message: &str) -> WardenResult<TagHandle>;
    /// Points `name` at whatever `target_ref` resolves to, replacing any
    /// existing tag of that name.
    fn force_tag(&self, name: &str, target_ref: &str) -> WardenResult<TagHandle>;
    /// Removes tag `name`.
    fn delete_tag(&self, name: &str) -> WardenResult<()>;
    /// Restores the working tree to `reference`, discarding local changes.
    fn checkout(&self, reference: &str) -> WardenResult<()>;
    /// Tag names, sorted.
    fn list_tags(&self) -> WardenResult<Vec<String>>;
    /// Whether tag `name` exists.
    fn tag_exists(&self, name: &str) -> WardenResult<bool>;
    /// Id of the commit HEAD points at.
    fn head_commit(&self) -> WardenResult<String>;
}

fn vcs_err(e: git2::Error) -> WardenError {
    WardenError::VersionControl(e.message().to_string())
}

/// [`VersionControl`] over a git repository on disk.
pub struct GitRepository {
    repo: Mutex<Repository>,
}

impl GitRepository {
    /// Opens the repository containing `path`.
    pub fn open(path: impl AsRef<Path>) -> WardenResult<Self> {
        let path = path.as_ref();
        let repo = Repository::discover(path).map_err(vcs_err)?;
        info!(path = %path.display(), "git repository opened");
        Ok(Self {
            repo: Mutex::new(repo),
        })
    }

    /// Wraps an already opened repository.
    pub fn from_repository(repo: Repository) -> Self {
        Self {
            repo: Mutex::new(repo),
        }
    }

    fn signature(repo: &Repository) -> WardenResult<Signature<'static>> {
        match repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Signature::now("warden", "warden@localhost").map_err(vcs_err),
        }
    }

    fn resolve_commit<'r>(repo: &'r Repository, reference: &str) -> WardenResult<git2::Commit<'r>> {
        let tag_ref = format!("refs/tags/{reference}");
        let object = repo
            .revparse_single(&tag_ref)
            .or_else(|_| repo.revparse_single(reference))
            .map_err(|e| {
                WardenError::VersionControl(format!("unknown reference '{reference}': {}", e.message()))
            })?;
        object.peel_to_commit().map_err(vcs_err)
    }
}

impl VersionControl for GitRepository {
    fn tag(&self, name: &str, message: &str) -> WardenResult<TagHandle> {
        let repo = self.repo.lock();
        let head = repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map_err(vcs_err)?;
        let sig = Self::signature(&repo)?;
        repo.tag(name, head.as_object(), &sig, message, false)
            .map_err(vcs_err)?;
        debug!(tag = %name, commit = %head.id(), "tag created");
        Ok(TagHandle {
            name: name.to_string(),
            target: head.id().to_string(),
        })
    }

    fn force_tag(&self, name: &str, target_ref: &str) -> WardenResult<TagHandle> {
        let repo = self.repo.lock();
        let commit = Self::resolve_commit(&repo, target_ref)?;
        repo.tag_lightweight(name, commit.as_object(), true)
            .map_err(vcs_err)?;
        Ok(TagHandle {
            name: name.to_string(),
            target: commit.id().to_string(),
        })
    }

    fn delete_tag(&self, name: &str) -> WardenResult<()> {
        self.repo.lock().tag_delete(name).map_err(vcs_err)
    }

    fn checkout(&self, reference: &str) -> WardenResult<()> {
        let repo = self.repo.lock();
        let commit = Self::resolve_commit(&repo, reference)?;
        let mut opts = CheckoutBuilder::new();
        opts.force();
        repo.checkout_tree(commit.as_object(), Some(&mut opts))
            .map_err(vcs_err)?;
        repo.set_head_detached(commit.id()).map_err(vcs_err)?;
        info!(reference = %reference, commit = %commit.id(), "working tree restored");
        Ok(())
    }

    fn list_tags(&self) -> WardenResult<Vec<String>> {
        let repo = self.repo.lock();
        let names = repo.tag_names(None).map_err(vcs_err)?;
        let mut tags: Vec<String> = names.iter().flatten().map(str::to_string).collect();
        tags.sort();
        Ok(tags)
    }

    fn tag_exists(&self, name: &str) -> WardenResult<bool> {
        let repo = self.repo.lock();
        let result = match repo.find_reference(&format!("refs/tags/{name}")) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(vcs_err(e)),
        };
        result
    }

    fn head_commit(&self) -> WardenResult<String> {
        let repo = self.repo.lock();
        let head = repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map_err(vcs_err)?;
        Ok(head.id().to_string())
    }
}

#[derive(Default)]
struct MemoryState {
    head: String,
    tags: BTreeMap<String, String>,
    checkouts: Vec<String>,
    fail_tag: bool,
    fail_checkout: bool,
}

/// Simulated [`VersionControl`] that keeps tags in memory.
///
/// Commits are plain strings advanced with [`MemoryVersionControl::commit`].
/// Tag and checkout failures can be forced to exercise the compensating
/// paths of the checkpoint store.
pub struct MemoryVersionControl {
    state: Mutex<MemoryState>,
}

impl MemoryVersionControl {
    /// Starts at commit `initial`.
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                head: initial.into(),
                ..Default::default()
            }),
        }
    }

    /// Moves HEAD to a new commit.
    pub fn commit(&self, id: impl Into<String>) {
        self.state.lock().head = id.into();
    }

    /// Makes every subsequent `tag` call fail.
    pub fn fail_tags(&self, fail: bool) {
        self.state.lock().fail_tag = fail;
    }

    /// Makes every subsequent `checkout` call fail.
    pub fn fail_checkouts(&self, fail: bool) {
        self.state.lock().fail_checkout = fail;
    }

    /// References passed to successful `checkout` calls, in order.
    pub fn checkouts(&self) -> Vec<String> {
        self.state.lock().checkouts.clone()
    }

    fn resolve(state: &MemoryState, reference: &str) -> Option<String> {
        state.tags.get(reference).cloned().or_else(|| {
            (reference == "HEAD" || reference == state.head).then(|| state.head.clone())
        })
    }
}

impl VersionControl for MemoryVersionControl {
    fn tag(&self, name: &str, _message: &str) -> WardenResult<TagHandle> {
        let mut state = self.state.lock();
        if state.fail_tag {
            return Err(WardenError::VersionControl(format!("cannot create tag '{name}'")));
        }
        if state.tags.contains_key(name) {
            return Err(WardenError::VersionControl(format!("tag '{name}' already exists")));
        }
        let target = state.head.clone();
        state.tags.insert(name.to_string(), target.clone());
        Ok(TagHandle {
            name: name.to_string(),
            target,
        })
    }

    fn force_tag(&self, name: &str, target_ref: &str) -> WardenResult<TagHandle> {
        let mut state = self.state.lock();
        let target = Self::resolve(&state, target_ref).ok_or_else(|| {
            WardenError::VersionControl(format!("unknown reference '{target_ref}'"))
        })?;
        state.tags.insert(name.to_string(), target.clone());
        Ok(TagHandle {
            name: name.to_string(),
            target,
        })
    }

    fn delete_tag(&self, name: &str) -> WardenResult<()> {
        match self.state.lock().tags.remove(name) {
            Some(_) => Ok(()),
            None => Err(WardenError::VersionControl(format!("no tag '{name}'"))),
        }
    }

    fn checkout(&self, reference: &str) -> WardenResult<()> {
        let mut state = self.state.lock();
        if state.fail_checkout {
            warn!(reference = %reference, "simulated checkout failure");
            return Err(WardenError::VersionControl(format!("cannot check out '{reference}'")));
        }
        let target = Self::resolve(&state, reference).ok_or_else(|| {
            WardenError::VersionControl(format!("unknown reference '{reference}'"))
        })?;
        state.head = target;
        state.checkouts.push(reference.to_string());
        Ok(())
    }

    fn list_tags(&self) -> WardenResult<Vec<String>> {
        Ok(self.state.lock().tags.keys().cloned().collect())
    }

    fn tag_exists(&self, name: &str) -> WardenResult<bool> {
        Ok(self.state.lock().tags.contains_key(name))
    }

    fn head_commit(&self) -> WardenResult<String> {
        Ok(self.state.lock().head.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_tag_and_checkout() {
        let vcs = MemoryVersionControl::new("c1");
        let handle = vcs.tag("v1", "first").unwrap();
        assert_eq!(handle.target, "c1");
        assert!(vcs.tag("v1", "again").is_err());

        vcs.commit("c2");
        vcs.force_tag("last-good", "HEAD").unwrap();
        assert_eq!(vcs.list_tags().unwrap(), vec!["last-good", "v1"]);

        vcs.checkout("v1").unwrap();
        assert_eq!(vcs.head_commit().unwrap(), "c1");
        assert!(vcs.checkout("nope").is_err());
        assert_eq!(vcs.checkouts(), vec!["v1"]);
    }

    #[test]
    fn test_memory_forced_failures() {
        let vcs = MemoryVersionControl::new("c1");
        vcs.fail_tags(true);
        assert!(vcs.tag("v1", "x").is_err());
        assert!(!vcs.tag_exists("v1").unwrap());

        vcs.fail_tags(false);
        vcs.tag("v1", "x").unwrap();
        vcs.fail_checkouts(true);
        assert!(vcs.checkout("v1").is_err());
        vcs.delete_tag("v1").unwrap();
        assert!(vcs.delete_tag("v1").is_err());
    }
}
